//! Event-driven XHR-style surface.
//!
//! An [`XmlHttpRequest`] walks through the usual ready states
//! (`Unsent → Opened → HeadersReceived → Loading → Done`), firing the
//! registered callbacks as it goes. The body is exposed according to the
//! response type selected before `send`.

use super::{header_pair, parse_method, SurfaceKind, SurfaceResponse, TransportAdapter};
use crate::error::MockError;
use crate::interceptor::Interceptor;
use crate::transport::OutboundRequest;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

/// How the response body is exposed through [`XmlHttpRequest::response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Text,
    Json,
    ArrayBuffer,
    Blob,
    Document,
}

/// Response body coerced to the selected [`ResponseType`].
#[derive(Debug, Clone, PartialEq)]
pub enum XhrResponse {
    Text(String),
    Json(serde_json::Value),
    ArrayBuffer(Bytes),
    Blob { bytes: Bytes, mime: String },
    Document(String),
    Null,
}

type StateCallback = Box<dyn FnMut(ReadyState) + Send>;
type LoadCallback = Box<dyn FnMut(u16) + Send>;
type ErrorCallback = Box<dyn FnMut(&MockError) + Send>;
type EventCallback = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct Callbacks {
    ready_state_change: Option<StateCallback>,
    load: Option<LoadCallback>,
    error: Option<ErrorCallback>,
    abort: Option<EventCallback>,
    loadend: Option<EventCallback>,
}

/// Cancels an in-flight [`XmlHttpRequest::send`] from another task.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// A single XHR-style call.
pub struct XmlHttpRequest {
    interceptor: Arc<Interceptor>,
    state: ReadyState,
    method: Method,
    url: String,
    request_headers: HeaderMap,
    response_type: ResponseType,
    sent: bool,
    response: Option<SurfaceResponse>,
    abort_tx: Arc<watch::Sender<bool>>,
    callbacks: Callbacks,
}

impl XmlHttpRequest {
    fn new(interceptor: Arc<Interceptor>) -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            interceptor,
            state: ReadyState::Unsent,
            method: Method::GET,
            url: String::new(),
            request_headers: HeaderMap::new(),
            response_type: ResponseType::default(),
            sent: false,
            response: None,
            abort_tx: Arc::new(abort_tx),
            callbacks: Callbacks::default(),
        }
    }

    pub fn on_ready_state_change(&mut self, f: impl FnMut(ReadyState) + Send + 'static) {
        self.callbacks.ready_state_change = Some(Box::new(f));
    }

    pub fn on_load(&mut self, f: impl FnMut(u16) + Send + 'static) {
        self.callbacks.load = Some(Box::new(f));
    }

    pub fn on_error(&mut self, f: impl FnMut(&MockError) + Send + 'static) {
        self.callbacks.error = Some(Box::new(f));
    }

    pub fn on_abort(&mut self, f: impl FnMut() + Send + 'static) {
        self.callbacks.abort = Some(Box::new(f));
    }

    pub fn on_loadend(&mut self, f: impl FnMut() + Send + 'static) {
        self.callbacks.loadend = Some(Box::new(f));
    }

    /// Start a new call. Any previous response is discarded.
    pub fn open(&mut self, method: &str, url: impl Into<String>) -> Result<(), MockError> {
        self.method = parse_method(method)?;
        self.url = url.into();
        self.request_headers.clear();
        self.response = None;
        self.sent = false;
        self.abort_tx.send_replace(false);
        self.set_state(ReadyState::Opened);
        Ok(())
    }

    /// Add a request header. Repeated names are appended.
    pub fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), MockError> {
        if self.state != ReadyState::Opened || self.sent {
            return Err(MockError::InvalidState(
                "setRequestHeader requires an opened, unsent request",
            ));
        }
        let (name, value) = header_pair(name, value)?;
        self.request_headers.append(name, value);
        Ok(())
    }

    pub fn set_response_type(&mut self, response_type: ResponseType) -> Result<(), MockError> {
        if self.state >= ReadyState::Loading {
            return Err(MockError::InvalidState(
                "responseType cannot change once loading has started",
            ));
        }
        self.response_type = response_type;
        Ok(())
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: Arc::clone(&self.abort_tx),
        }
    }

    /// Abort the call. Outside of an in-flight `send` this resets the
    /// request to `Unsent`.
    pub fn abort(&mut self) {
        self.abort_tx.send_replace(true);
        if self.sent && self.state != ReadyState::Done {
            self.finish_aborted();
        } else {
            self.state = ReadyState::Unsent;
            self.response = None;
        }
    }

    /// Send the call and wait for it to finish. Failures are reported to
    /// the error callback and returned.
    pub async fn send(&mut self, body: Option<Bytes>) -> Result<(), MockError> {
        if self.state != ReadyState::Opened || self.sent {
            return Err(MockError::InvalidState("send requires an opened, unsent request"));
        }
        self.sent = true;

        // GET and HEAD calls carry no body
        let body = match self.method {
            Method::GET | Method::HEAD => Bytes::new(),
            _ => body.unwrap_or_default(),
        };
        let request = OutboundRequest::new(self.method.clone(), self.url.clone())
            .with_headers(self.request_headers.clone())
            .with_body(body);

        let mut aborted = self.abort_tx.subscribe();
        let interceptor = Arc::clone(&self.interceptor);
        let result = tokio::select! {
            result = interceptor.dispatch(request) => {
                result.and_then(|resolution| SurfaceResponse::from_resolution(resolution, &self.url))
            }
            _ = aborted.wait_for(|aborted| *aborted) => Err(MockError::Aborted),
        };

        match result {
            Ok(response) => {
                let status = response.status.as_u16();
                self.response = Some(response);
                self.set_state(ReadyState::HeadersReceived);
                self.set_state(ReadyState::Loading);
                self.set_state(ReadyState::Done);
                if let Some(cb) = self.callbacks.load.as_mut() {
                    cb(status);
                }
                self.fire_loadend();
                Ok(())
            }
            Err(MockError::Aborted) => {
                self.finish_aborted();
                Err(MockError::Aborted)
            }
            Err(err) => {
                debug!(url = %self.url, error = %err, "XHR call failed");
                self.set_state(ReadyState::Done);
                if let Some(cb) = self.callbacks.error.as_mut() {
                    cb(&err);
                }
                self.fire_loadend();
                Err(err)
            }
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.state
    }

    /// 0 until a response has been received.
    pub fn status(&self) -> u16 {
        self.response.as_ref().map(|r| r.status.as_u16()).unwrap_or(0)
    }

    pub fn status_text(&self) -> &str {
        self.response.as_ref().map(|r| r.status_text()).unwrap_or("")
    }

    pub fn response_url(&self) -> &str {
        self.response.as_ref().map(|r| r.url.as_str()).unwrap_or("")
    }

    /// The body as text. Only available for the `Text` response type.
    pub fn response_text(&self) -> Result<String, MockError> {
        if self.response_type != ResponseType::Text {
            return Err(MockError::InvalidState(
                "responseText is only available for the text response type",
            ));
        }
        Ok(self
            .response
            .as_ref()
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .unwrap_or_default())
    }

    /// The body coerced to the selected response type.
    pub fn response(&self) -> XhrResponse {
        let Some(response) = self.response.as_ref() else {
            return match self.response_type {
                ResponseType::Text => XhrResponse::Text(String::new()),
                _ => XhrResponse::Null,
            };
        };
        let text = || String::from_utf8_lossy(&response.body).into_owned();
        match self.response_type {
            ResponseType::Text => XhrResponse::Text(text()),
            ResponseType::Json => serde_json::from_slice(&response.body)
                .map(XhrResponse::Json)
                .unwrap_or(XhrResponse::Null),
            ResponseType::ArrayBuffer => XhrResponse::ArrayBuffer(response.body.clone()),
            ResponseType::Blob => XhrResponse::Blob {
                bytes: response.body.clone(),
                mime: response
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string(),
            },
            ResponseType::Document => XhrResponse::Document(text()),
        }
    }

    /// Values of one response header, joined with `", "`.
    pub fn get_response_header(&self, name: &str) -> Option<String> {
        let response = self.response.as_ref()?;
        let values: Vec<&str> = response
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// All response headers as `name: value` lines, CRLF-terminated.
    pub fn get_all_response_headers(&self) -> String {
        let Some(response) = self.response.as_ref() else {
            return String::new();
        };
        let mut out = String::new();
        for name in response.headers.keys() {
            if let Some(value) = self.get_response_header(name.as_str()) {
                out.push_str(name.as_str());
                out.push_str(": ");
                out.push_str(&value);
                out.push_str("\r\n");
            }
        }
        out
    }

    fn set_state(&mut self, state: ReadyState) {
        self.state = state;
        if let Some(cb) = self.callbacks.ready_state_change.as_mut() {
            cb(state);
        }
    }

    fn finish_aborted(&mut self) {
        self.response = None;
        self.set_state(ReadyState::Done);
        if let Some(cb) = self.callbacks.abort.as_mut() {
            cb();
        }
        self.fire_loadend();
        self.state = ReadyState::Unsent;
    }

    fn fire_loadend(&mut self) {
        if let Some(cb) = self.callbacks.loadend.as_mut() {
            cb();
        }
    }
}

/// The XHR surface.
pub struct XhrAdapter {
    interceptor: Arc<Interceptor>,
}

impl XhrAdapter {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }

    pub fn create(&self) -> XmlHttpRequest {
        XmlHttpRequest::new(Arc::clone(&self.interceptor))
    }
}

impl TransportAdapter for XhrAdapter {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Xhr
    }

    fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }
}
