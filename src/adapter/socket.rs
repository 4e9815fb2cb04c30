//! Server-side socket surface.
//!
//! [`SocketAdapter::request`] hands back a [`SyntheticRequest`] immediately,
//! the way a client request object is returned before any I/O happens. The
//! request buffers written chunks, resolves its rule on `end` and reports
//! progress as [`RequestEvent`]s on the paired [`RequestEvents`] stream.
//!
//! Every path ends with the same signal order: `Finish`, `Response`, `End`,
//! `Close`. Failures are reported as an `Error` event followed by `Close`,
//! never as a return value of `write`/`end`.

use super::{build_headers, header_pair, parse_method, SurfaceKind, SurfaceResponse, TransportAdapter};
use crate::error::MockError;
use crate::interceptor::Interceptor;
use crate::request::RequestInfo;
use crate::resolver::Outcome;
use crate::rule::RuleRecord;
use crate::transport::UpstreamResponse;
use bytes::{Bytes, BytesMut};
use http::header::EXPECT;
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Options of a socket-surface request.
#[derive(Debug, Clone, Default)]
pub struct ClientRequestOptions {
    pub url: String,
    /// Defaults to GET
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ClientRequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Stand-in for the connection socket. No connection is ever made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSocket {
    /// Set for `https` targets
    pub authorized: bool,
}

/// Response delivered on the socket surface.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub status_code: u16,
    pub status_message: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: String,
    /// Set once the whole body is available
    pub complete: bool,
    pub mocked: bool,
}

impl IncomingMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MockError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl From<SurfaceResponse> for IncomingMessage {
    fn from(response: SurfaceResponse) -> Self {
        Self {
            status_code: response.status.as_u16(),
            status_message: response.status_text().to_string(),
            headers: response.headers,
            body: response.body,
            url: response.url,
            complete: false,
            mocked: response.mocked,
        }
    }
}

/// Signals emitted by a [`SyntheticRequest`].
#[derive(Debug)]
pub enum RequestEvent {
    Socket(PlaceholderSocket),
    Connect,
    /// The caller sent `expect: 100-continue`
    Continue,
    Drain,
    Finish,
    Response(IncomingMessage),
    /// The response body has been fully delivered
    End,
    Abort,
    /// Final signal, with the error code when the request did not succeed
    Close(Option<&'static str>),
    Error(MockError),
}

impl RequestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RequestEvent::Socket(_) => "socket",
            RequestEvent::Connect => "connect",
            RequestEvent::Continue => "continue",
            RequestEvent::Drain => "drain",
            RequestEvent::Finish => "finish",
            RequestEvent::Response(_) => "response",
            RequestEvent::End => "end",
            RequestEvent::Abort => "abort",
            RequestEvent::Close(_) => "close",
            RequestEvent::Error(_) => "error",
        }
    }
}

/// Receiving side of a request's signals.
pub struct RequestEvents {
    rx: UnboundedReceiver<RequestEvent>,
}

impl RequestEvents {
    pub async fn next(&mut self) -> Option<RequestEvent> {
        self.rx.recv().await
    }

    /// Next signal if one is already queued.
    pub fn try_next(&mut self) -> Option<RequestEvent> {
        self.rx.try_recv().ok()
    }

    /// Collect signals up to and including `Close`.
    pub async fn until_close(&mut self) -> Vec<RequestEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            let done = matches!(event, RequestEvent::Close(_));
            events.push(event);
            if done {
                break;
            }
        }
        events
    }
}

/// Body chunk accepted by [`SyntheticRequest::write`].
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Text(String),
    Binary(Bytes),
    /// Anything else, tagged with its type name
    Invalid(&'static str),
}

impl From<&str> for Chunk {
    fn from(value: &str) -> Self {
        Chunk::Text(value.to_string())
    }
}

impl From<String> for Chunk {
    fn from(value: String) -> Self {
        Chunk::Text(value)
    }
}

impl From<Bytes> for Chunk {
    fn from(value: Bytes) -> Self {
        Chunk::Binary(value)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(value: Vec<u8>) -> Self {
        Chunk::Binary(Bytes::from(value))
    }
}

impl From<&[u8]> for Chunk {
    fn from(value: &[u8]) -> Self {
        Chunk::Binary(Bytes::copy_from_slice(value))
    }
}

impl From<serde_json::Value> for Chunk {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(text) => Chunk::Text(text),
            Value::Null => Chunk::Invalid("null"),
            Value::Bool(_) => Chunk::Invalid("boolean"),
            Value::Number(_) => Chunk::Invalid("number"),
            Value::Array(_) => Chunk::Invalid("array"),
            Value::Object(_) => Chunk::Invalid("object"),
        }
    }
}

/// Lifecycle of a [`SyntheticRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Accepting headers and body chunks
    Writable,
    /// `end` was called; the response is being resolved
    Ended,
    Completed,
    Destroyed,
}

struct State {
    phase: RequestPhase,
    aborted: bool,
    headers: HeaderMap,
    buffer: BytesMut,
    resolution: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    events: UnboundedSender<RequestEvent>,
    info: OnceLock<Arc<RequestInfo>>,
}

impl Shared {
    fn emit(&self, event: RequestEvent) {
        // A dropped receiver means nobody is listening
        let _ = self.events.send(event);
    }
}

/// An in-flight request that never touches the network unless it has to.
pub struct SyntheticRequest {
    shared: Arc<Shared>,
    interceptor: Arc<Interceptor>,
    rule: Option<Arc<RuleRecord>>,
    method: Method,
    url: String,
    socket: PlaceholderSocket,
}

impl SyntheticRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn socket(&self) -> &PlaceholderSocket {
        &self.socket
    }

    /// The rule captured for this request, if any.
    pub fn rule(&self) -> Option<&Arc<RuleRecord>> {
        self.rule.as_ref()
    }

    pub fn phase(&self) -> RequestPhase {
        self.shared.state.lock().phase
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.state.lock().aborted
    }

    pub fn is_destroyed(&self) -> bool {
        self.phase() == RequestPhase::Destroyed
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<(), MockError> {
        let (name, value) = header_pair(name, value)?;
        let mut state = self.shared.state.lock();
        if state.phase != RequestPhase::Writable {
            return Err(MockError::InvalidState("headers cannot be set after end"));
        }
        state.headers.insert(name, value);
        Ok(())
    }

    pub fn get_header(&self, name: &str) -> Option<String> {
        self.shared
            .state
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    pub fn remove_header(&self, name: &str) {
        self.shared.state.lock().headers.remove(name);
    }

    /// Buffer a body chunk. Returns `false` when the chunk was rejected;
    /// the reason is reported as an `Error` event. While the request is
    /// writable every write, rejected or not, is followed by `Drain`.
    pub fn write(&self, chunk: impl Into<Chunk>) -> bool {
        self.write_chunk(chunk.into(), None)
    }

    /// Like [`write`](Self::write); `callback` runs once a non-empty chunk
    /// has been buffered.
    pub fn write_with(&self, chunk: impl Into<Chunk>, callback: impl FnOnce() + Send + 'static) -> bool {
        self.write_chunk(chunk.into(), Some(Box::new(callback)))
    }

    fn write_chunk(&self, chunk: Chunk, callback: Option<Box<dyn FnOnce() + Send>>) -> bool {
        let bytes = match chunk {
            Chunk::Text(text) => Bytes::from(text),
            Chunk::Binary(bytes) => bytes,
            Chunk::Invalid(kind) => {
                self.shared.emit(RequestEvent::Error(MockError::InvalidArgType(kind)));
                if self.phase() == RequestPhase::Writable {
                    self.shared.emit(RequestEvent::Drain);
                }
                return false;
            }
        };

        {
            let mut state = self.shared.state.lock();
            match state.phase {
                RequestPhase::Writable => state.buffer.extend_from_slice(&bytes),
                RequestPhase::Destroyed => {
                    self.shared
                        .emit(RequestEvent::Error(MockError::StreamDestroyed("write")));
                    return false;
                }
                RequestPhase::Ended | RequestPhase::Completed => {
                    self.shared.emit(RequestEvent::Error(MockError::WriteAfterEnd));
                    return false;
                }
            }
        }

        if !bytes.is_empty() {
            if let Some(callback) = callback {
                callback();
            }
        }
        self.shared.emit(RequestEvent::Drain);
        true
    }

    /// Write a final chunk, then [`end`](Self::end). A destroyed request
    /// reports a single `StreamDestroyed` error.
    pub fn end_with(&self, chunk: impl Into<Chunk>) {
        if self.phase() == RequestPhase::Destroyed {
            self.shared
                .emit(RequestEvent::Error(MockError::StreamDestroyed("end")));
            return;
        }
        self.write(chunk);
        self.end();
    }

    /// Finish the request body and resolve the response on a new task.
    /// Must be called within a Tokio runtime.
    pub fn end(&self) {
        let mut state = self.shared.state.lock();
        match state.phase {
            RequestPhase::Writable => {}
            RequestPhase::Ended | RequestPhase::Completed => return,
            RequestPhase::Destroyed => {
                self.shared
                    .emit(RequestEvent::Error(MockError::StreamDestroyed("end")));
                return;
            }
        }
        state.phase = RequestPhase::Ended;

        let body = state.buffer.split().freeze();
        let info = Arc::new(
            RequestInfo::new(self.method.clone(), self.url.clone(), state.headers.clone(), body)
                .with_original_call(Arc::clone(self.interceptor.transport())),
        );
        // end() runs at most once, so the cell is always empty here
        let _ = self.shared.info.set(Arc::clone(&info));

        state.resolution = Some(tokio::spawn(complete(
            Arc::clone(&self.shared),
            Arc::clone(&self.interceptor),
            self.rule.clone(),
            info,
        )));
    }

    /// Abort the request. Idempotent, and a no-op once the response completed.
    pub fn destroy(&self) {
        let mut state = self.shared.state.lock();
        if matches!(state.phase, RequestPhase::Destroyed | RequestPhase::Completed) {
            return;
        }
        state.phase = RequestPhase::Destroyed;
        state.aborted = true;
        if let Some(resolution) = state.resolution.take() {
            resolution.abort();
        }
        debug!(url = %self.url, "Synthetic request destroyed");
        self.shared.emit(RequestEvent::Abort);
        self.shared
            .emit(RequestEvent::Close(Some(MockError::Aborted.code())));
    }

    pub fn abort(&self) {
        self.destroy();
    }

    /// The real, un-mocked response for this request, fetched at most once.
    /// Available after [`end`](Self::end).
    pub async fn original_response(&self) -> Result<Arc<UpstreamResponse>, MockError> {
        let info = self.shared.info.get().ok_or(MockError::InvalidState(
            "the original response is available once the request has ended",
        ))?;
        info.perform_real_call().await
    }
}

async fn complete(
    shared: Arc<Shared>,
    interceptor: Arc<Interceptor>,
    rule: Option<Arc<RuleRecord>>,
    info: Arc<RequestInfo>,
) {
    let result = respond(&interceptor, rule, &info).await;

    let mut state = shared.state.lock();
    if state.phase == RequestPhase::Destroyed {
        debug!(url = %info.url, "Dropping response of destroyed request");
        return;
    }
    state.phase = RequestPhase::Completed;
    state.resolution = None;

    match result {
        Ok(mut message) => {
            message.complete = true;
            shared.emit(RequestEvent::Finish);
            shared.emit(RequestEvent::Response(message));
            shared.emit(RequestEvent::End);
            shared.emit(RequestEvent::Close(None));
        }
        Err(err) => {
            let code = err.code();
            shared.emit(RequestEvent::Error(err));
            shared.emit(RequestEvent::Close(Some(code)));
        }
    }
}

async fn respond(
    interceptor: &Interceptor,
    rule: Option<Arc<RuleRecord>>,
    info: &Arc<RequestInfo>,
) -> Result<IncomingMessage, MockError> {
    if let Some(rule) = rule {
        if let Outcome::Respond(response) = interceptor.resolve(rule, Arc::clone(info)).await? {
            return Ok(SurfaceResponse::mocked(response, info.url.clone())?.into());
        }
    }

    debug!(method = %info.method, url = %info.url, "Replaying call against real transport");
    let upstream = info.perform_real_call().await?;
    Ok(SurfaceResponse::passthrough(UpstreamResponse::clone(&upstream)).into())
}

/// The socket-request surface.
pub struct SocketAdapter {
    interceptor: Arc<Interceptor>,
}

impl SocketAdapter {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }

    /// Create a synthetic request. The rule is selected, and its budget
    /// charged, here; the response is resolved on `end`.
    pub fn request(
        &self,
        options: ClientRequestOptions,
    ) -> Result<(SyntheticRequest, RequestEvents), MockError> {
        let method = match options.method.as_deref() {
            Some(method) => parse_method(method)?,
            None => Method::GET,
        };
        let headers = build_headers(&options.headers)?;

        let lookup = RequestInfo::new(method.clone(), options.url.clone(), headers.clone(), Bytes::new());
        let rule = self.interceptor.select(&lookup);

        let expects_continue = headers
            .get(EXPECT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false);
        let socket = PlaceholderSocket {
            authorized: options.url.starts_with("https://"),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                phase: RequestPhase::Writable,
                aborted: false,
                headers,
                buffer: BytesMut::new(),
                resolution: None,
            }),
            events: tx,
            info: OnceLock::new(),
        });

        shared.emit(RequestEvent::Socket(socket.clone()));
        shared.emit(RequestEvent::Connect);
        if expects_continue {
            shared.emit(RequestEvent::Continue);
        }

        let request = SyntheticRequest {
            shared,
            interceptor: Arc::clone(&self.interceptor),
            rule,
            method,
            url: options.url,
            socket,
        };
        Ok((request, RequestEvents { rx }))
    }
}

impl TransportAdapter for SocketAdapter {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Socket
    }

    fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::registry::Registry;
    use crate::rule::Reply;
    use crate::transport::testing::FakeTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn adapter(transport: FakeTransport) -> (Arc<Registry>, Arc<FakeTransport>, SocketAdapter) {
        let registry = Arc::new(Registry::new());
        let transport = Arc::new(transport);
        let interceptor = Interceptor::new(Arc::clone(&registry), transport.clone());
        (registry, transport, SocketAdapter::new(Arc::new(interceptor)))
    }

    fn names(events: &[RequestEvent]) -> Vec<&'static str> {
        events.iter().map(RequestEvent::name).collect()
    }

    fn response(events: Vec<RequestEvent>) -> IncomingMessage {
        events
            .into_iter()
            .find_map(|event| match event {
                RequestEvent::Response(message) => Some(message),
                _ => None,
            })
            .expect("response event")
    }

    #[tokio::test]
    async fn test_mocked_request_lifecycle() {
        let (registry, transport, adapter) = adapter(FakeTransport::new(200, "real"));
        registry.mock(
            RuleConfig::new("/echo")
                .with_method("post")
                .with_status(201)
                .with_handler(|ctx| async move {
                    Ok(Reply::text(ctx.request.body.as_text().unwrap_or_default()))
                }),
        );

        let (req, mut events) = adapter
            .request(ClientRequestOptions::new("http://x.com/echo").method("POST"))
            .unwrap();
        assert!(req.rule().is_some());
        assert!(req.write("hello "));
        assert!(req.write(Bytes::from_static(b"world")));
        req.end();

        let events = events.until_close().await;
        assert_eq!(
            names(&events),
            vec!["socket", "connect", "drain", "drain", "finish", "response", "end", "close"]
        );
        assert!(matches!(events.last(), Some(RequestEvent::Close(None))));

        let message = response(events);
        assert_eq!(message.status_code, 201);
        assert_eq!(message.status_message, "Created");
        assert_eq!(message.text(), "hello world");
        assert!(message.complete);
        assert!(message.mocked);
        assert_eq!(req.phase(), RequestPhase::Completed);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_socket_and_continue() {
        let (_registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        let (req, mut events) = adapter
            .request(ClientRequestOptions::new("https://x.com/upload").header("Expect", "100-continue"))
            .unwrap();

        assert!(req.socket().authorized);
        assert!(matches!(
            events.next().await,
            Some(RequestEvent::Socket(PlaceholderSocket { authorized: true }))
        ));
        assert!(matches!(events.next().await, Some(RequestEvent::Connect)));
        assert!(matches!(events.next().await, Some(RequestEvent::Continue)));
        assert!(events.try_next().is_none());
    }

    #[tokio::test]
    async fn test_invalid_chunk_is_reported_asynchronously() {
        let (_registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        let (req, mut events) = adapter.request(ClientRequestOptions::new("/x")).unwrap();

        assert!(!req.write(serde_json::json!(42)));
        let _ = events.next().await;
        let _ = events.next().await;
        match events.next().await {
            Some(RequestEvent::Error(err)) => assert_eq!(err.code(), "ERR_INVALID_ARG_TYPE"),
            other => panic!("Expected error event, got {:?}", other),
        }
        assert!(matches!(events.next().await, Some(RequestEvent::Drain)));
        assert_eq!(req.phase(), RequestPhase::Writable);
    }

    #[tokio::test]
    async fn test_end_with_after_destroy_reports_once() {
        let (registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        registry.any("/x", "ok", RuleConfig::default());
        let (req, mut events) = adapter.request(ClientRequestOptions::new("/x")).unwrap();

        req.destroy();
        req.end_with("trailing");

        let mut seen = Vec::new();
        while let Some(event) = events.try_next() {
            seen.push(event);
        }
        assert_eq!(names(&seen), vec!["socket", "connect", "abort", "close", "error"]);
        assert!(matches!(
            seen[4],
            RequestEvent::Error(MockError::StreamDestroyed("end"))
        ));
    }

    #[tokio::test]
    async fn test_write_callback_only_for_non_empty_chunks() {
        let (_registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        let (req, _events) = adapter.request(ClientRequestOptions::new("/x")).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        for chunk in ["", "data"] {
            let calls = Arc::clone(&calls);
            assert!(req.write_with(chunk, move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_after_end() {
        let (registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        registry.any("/x", "ok", RuleConfig::default());
        let (req, mut events) = adapter.request(ClientRequestOptions::new("/x")).unwrap();

        req.end();
        assert!(!req.write("late"));
        assert!(req.set_header("x-late", "1").is_err());

        let events = events.until_close().await;
        assert!(events.iter().any(|e| matches!(e, RequestEvent::Error(MockError::WriteAfterEnd))));
        assert!(matches!(events.last(), Some(RequestEvent::Close(None))));
    }

    #[tokio::test]
    async fn test_destroy_cancels_pending_response() {
        let (registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        registry.any("/slow", "late", RuleConfig::default().with_delay_ms(200));
        let (req, mut events) = adapter.request(ClientRequestOptions::new("/slow")).unwrap();

        req.end();
        req.destroy();
        req.abort();
        assert!(req.is_aborted());
        assert!(req.is_destroyed());

        req.write("after");
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let mut seen = Vec::new();
        while let Some(event) = events.try_next() {
            seen.push(event);
        }
        assert_eq!(names(&seen), vec!["socket", "connect", "abort", "close", "error"]);
        assert!(matches!(seen[3], RequestEvent::Close(Some("ABORT_ERR"))));
        assert!(matches!(
            seen[4],
            RequestEvent::Error(MockError::StreamDestroyed("write"))
        ));
    }

    #[tokio::test]
    async fn test_unmatched_request_replays_real_call() {
        let (_registry, transport, adapter) =
            adapter(FakeTransport::new(200, "upstream").with_header("x-real", "1"));
        let (req, mut events) = adapter
            .request(
                ClientRequestOptions::new("http://real.example.com/data")
                    .method("put")
                    .header("x-token", "abc"),
            )
            .unwrap();
        assert!(req.rule().is_none());
        req.end_with("payload");

        let events = events.until_close().await;
        assert_eq!(
            names(&events),
            vec!["socket", "connect", "drain", "finish", "response", "end", "close"]
        );
        let message = response(events);
        assert!(!message.mocked);
        assert_eq!(message.text(), "upstream");
        assert_eq!(message.headers.get("x-real").unwrap(), "1");

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::PUT);
        assert_eq!(&calls[0].body[..], b"payload");
        assert_eq!(calls[0].headers.get("x-token").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_bypass_reuses_original_response() {
        let (registry, transport, adapter) = adapter(FakeTransport::new(200, "upstream"));
        registry.mock(RuleConfig::new("/maybe").with_handler(|ctx| async move {
            let original = ctx.request.perform_real_call().await?;
            if original.text() == "upstream" {
                Ok(ctx.bypass())
            } else {
                Ok(Reply::text("mocked"))
            }
        }));

        let (req, mut events) = adapter.request(ClientRequestOptions::new("http://x.com/maybe")).unwrap();
        req.end();
        let events = events.until_close().await;
        assert_eq!(
            names(&events),
            vec!["socket", "connect", "finish", "response", "end", "close"]
        );
        assert!(matches!(events.last(), Some(RequestEvent::Close(None))));
        let message = response(events);

        assert_eq!(message.text(), "upstream");
        assert!(!message.mocked);
        assert_eq!(transport.calls().len(), 1);

        let original = req.original_response().await.unwrap();
        assert_eq!(original.text(), "upstream");
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_error_is_an_event() {
        let (registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        registry.mock(
            RuleConfig::new("/broken").with_handler(|_| async { Err(MockError::payload("boom")) }),
        );

        let (req, mut events) = adapter.request(ClientRequestOptions::new("/broken")).unwrap();
        req.end();
        let events = events.until_close().await;
        assert_eq!(names(&events), vec!["socket", "connect", "error", "close"]);
        assert!(matches!(events[3], RequestEvent::Close(Some("ERR_MOCK_PAYLOAD"))));
    }

    #[tokio::test]
    async fn test_remote_failure_is_an_event() {
        let (registry, _transport, adapter) = adapter(FakeTransport::failing());
        registry.mock(RuleConfig::new("/profile").with_remote("https://real.example.com/profile"));

        let (req, mut events) = adapter.request(ClientRequestOptions::new("/profile")).unwrap();
        req.end();
        let events = events.until_close().await;
        assert!(matches!(events[2], RequestEvent::Error(MockError::Remote { .. })));
        assert!(!events.iter().any(|e| matches!(e, RequestEvent::Response(_))));
    }

    #[tokio::test]
    async fn test_header_management() {
        let (_registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        let (req, _events) = adapter
            .request(ClientRequestOptions::new("/x").header("x-a", "1"))
            .unwrap();

        assert_eq!(req.get_header("X-A").as_deref(), Some("1"));
        req.set_header("x-a", "2").unwrap();
        req.set_header("x-b", "3").unwrap();
        assert_eq!(req.get_header("x-a").as_deref(), Some("2"));
        req.remove_header("x-b");
        assert_eq!(req.get_header("x-b"), None);
        assert!(matches!(
            req.set_header("bad name", "1"),
            Err(MockError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_original_response_requires_end() {
        let (_registry, _transport, adapter) = adapter(FakeTransport::new(200, "real"));
        let (req, _events) = adapter.request(ClientRequestOptions::new("/x")).unwrap();
        assert!(matches!(
            req.original_response().await,
            Err(MockError::InvalidState(_))
        ));
    }
}
