//! Mini-program style `request(options)` surface.
//!
//! Results are delivered through `success`/`fail`/`complete` callbacks on a
//! spawned task; the returned [`RequestTask`] can abort the call.

use super::{build_headers, parse_method, SurfaceKind, SurfaceResponse, TransportAdapter};
use crate::error::MockError;
use crate::interceptor::Interceptor;
use crate::request::append_query;
use crate::transport::OutboundRequest;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, SET_COOKIE};
use http::{HeaderValue, Method};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// How the body of a successful call is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    /// Parse as JSON, keeping the text when it is not valid JSON
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    #[default]
    Text,
    ArrayBuffer,
}

/// Options of one `request` call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub url: String,
    /// Defaults to GET
    pub method: Option<String>,
    /// Query parameters for GET/HEAD, the body otherwise
    pub data: Option<Value>,
    pub header: Vec<(String, String)>,
    pub data_type: DataType,
    pub response_type: ResponseKind,
}

impl RequestOptions {
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

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.push((name.into(), value.into()));
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn response_type(mut self, response_type: ResponseKind) -> Self {
        self.response_type = response_type;
        self
    }

    fn to_outbound(&self) -> Result<OutboundRequest, MockError> {
        let method = match self.method.as_deref() {
            Some(method) => parse_method(method)?,
            None => Method::GET,
        };
        let mut headers = build_headers(&self.header)?;

        let (url, body) = match (&method, &self.data) {
            (_, None) => (self.url.clone(), Bytes::new()),
            (&Method::GET | &Method::HEAD, Some(data)) => {
                (append_query(&self.url, &query_pairs(data)), Bytes::new())
            }
            (_, Some(Value::String(text))) => (self.url.clone(), Bytes::from(text.clone())),
            (_, Some(data)) => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                (self.url.clone(), Bytes::from(data.to_string()))
            }
        };

        Ok(OutboundRequest::new(method, url)
            .with_headers(headers)
            .with_body(body))
    }
}

/// Flatten the top-level fields of a data object into query pairs.
fn query_pairs(data: &Value) -> Vec<(String, String)> {
    match data {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Parsed body of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    Json(Value),
    Text(String),
    ArrayBuffer(Bytes),
}

#[derive(Debug, Clone)]
pub struct RequestSuccess {
    pub data: ResponseData,
    pub status_code: u16,
    /// Response headers; repeated names are joined with `", "`
    pub header: HashMap<String, String>,
    pub cookies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestFail {
    pub err_msg: String,
}

impl RequestFail {
    fn from_error(err: &MockError) -> Self {
        match err {
            MockError::Aborted => Self {
                err_msg: "request:fail abort".to_string(),
            },
            other => Self {
                err_msg: format!("request:fail {}", other),
            },
        }
    }
}

type SuccessCallback = Box<dyn FnOnce(RequestSuccess) + Send>;
type FailCallback = Box<dyn FnOnce(RequestFail) + Send>;
type CompleteCallback = Box<dyn FnOnce(Result<&RequestSuccess, &RequestFail>) + Send>;

/// `success`/`fail`/`complete` callbacks of one call.
#[derive(Default)]
pub struct RequestCallbacks {
    success: Option<SuccessCallback>,
    fail: Option<FailCallback>,
    complete: Option<CompleteCallback>,
}

impl RequestCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(mut self, f: impl FnOnce(RequestSuccess) + Send + 'static) -> Self {
        self.success = Some(Box::new(f));
        self
    }

    pub fn fail(mut self, f: impl FnOnce(RequestFail) + Send + 'static) -> Self {
        self.fail = Some(Box::new(f));
        self
    }

    pub fn complete(
        mut self,
        f: impl FnOnce(Result<&RequestSuccess, &RequestFail>) + Send + 'static,
    ) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// `success` or `fail` first, `complete` last.
    fn deliver(self, result: Result<RequestSuccess, RequestFail>) {
        match &result {
            Ok(success) => {
                if let Some(cb) = self.success {
                    cb(success.clone());
                }
            }
            Err(fail) => {
                if let Some(cb) = self.fail {
                    cb(fail.clone());
                }
            }
        }
        if let Some(complete) = self.complete {
            complete(result.as_ref());
        }
    }
}

/// Handle of an in-flight `request` call.
pub struct RequestTask {
    abort_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: JoinHandle<()>,
}

impl RequestTask {
    /// Abort the call; its `fail` callback receives `request:fail abort`.
    /// No effect once the call has completed.
    pub fn abort(&self) {
        if let Some(tx) = self.abort_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Wait until the callbacks have run.
    pub async fn finished(self) {
        let _ = self.handle.await;
    }
}

/// The callback-request surface.
pub struct CallbackAdapter {
    interceptor: Arc<Interceptor>,
}

impl CallbackAdapter {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }

    /// Start a call on a new task. Must be called within a Tokio runtime.
    pub fn request(&self, options: RequestOptions, callbacks: RequestCallbacks) -> RequestTask {
        let (abort_tx, abort_rx) = oneshot::channel();
        let interceptor = Arc::clone(&self.interceptor);

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                result = perform(&interceptor, &options) => result,
                Ok(()) = abort_rx => Err(MockError::Aborted),
            };
            if let Err(e) = &result {
                debug!(url = %options.url, error = %e, "Callback request failed");
            }
            callbacks.deliver(result.map_err(|e| RequestFail::from_error(&e)));
        });

        RequestTask {
            abort_tx: Mutex::new(Some(abort_tx)),
            handle,
        }
    }

    /// Promise-style variant of [`request`](Self::request).
    pub async fn request_async(&self, options: RequestOptions) -> Result<RequestSuccess, RequestFail> {
        perform(&self.interceptor, &options)
            .await
            .map_err(|e| RequestFail::from_error(&e))
    }
}

impl TransportAdapter for CallbackAdapter {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Callback
    }

    fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }
}

async fn perform(
    interceptor: &Interceptor,
    options: &RequestOptions,
) -> Result<RequestSuccess, MockError> {
    let request = options.to_outbound()?;
    let url = request.url.clone();
    let resolution = interceptor.dispatch(request).await?;
    let response = SurfaceResponse::from_resolution(resolution, &url)?;
    Ok(render(response, options))
}

fn render(response: SurfaceResponse, options: &RequestOptions) -> RequestSuccess {
    let data = match (options.response_type, options.data_type) {
        (ResponseKind::ArrayBuffer, _) => ResponseData::ArrayBuffer(response.body.clone()),
        (ResponseKind::Text, DataType::Json) => serde_json::from_slice(&response.body)
            .map(ResponseData::Json)
            .unwrap_or_else(|_| ResponseData::Text(String::from_utf8_lossy(&response.body).into_owned())),
        (ResponseKind::Text, DataType::Text) => {
            ResponseData::Text(String::from_utf8_lossy(&response.body).into_owned())
        }
    };

    let mut header: HashMap<String, String> = HashMap::new();
    for (name, value) in response.headers.iter() {
        let Ok(value) = value.to_str() else { continue };
        header
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    let cookies = response
        .headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(String::from))
        .collect();

    RequestSuccess {
        data,
        status_code: response.status.as_u16(),
        header,
        cookies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::registry::Registry;
    use crate::rule::Reply;
    use crate::transport::testing::FakeTransport;

    fn adapter() -> (Arc<Registry>, Arc<FakeTransport>, CallbackAdapter) {
        let registry = Arc::new(Registry::new());
        let transport = Arc::new(FakeTransport::new(200, "real"));
        let interceptor = Interceptor::new(Arc::clone(&registry), transport.clone());
        (registry, transport, CallbackAdapter::new(Arc::new(interceptor)))
    }

    #[tokio::test]
    async fn test_success_and_complete_callbacks() {
        let (registry, _transport, adapter) = adapter();
        registry.get(
            "/user",
            serde_json::json!({ "name": "ann" }),
            RuleConfig::default().with_header("Set-Cookie", "sid=1"),
        );

        let (tx, rx) = oneshot::channel();
        let completed = Arc::new(Mutex::new(false));
        let seen = Arc::clone(&completed);
        let task = adapter.request(
            RequestOptions::new("https://api.example.com/user"),
            RequestCallbacks::new()
                .success(move |res| {
                    let _ = tx.send(res);
                })
                .fail(|fail| panic!("unexpected failure: {:?}", fail))
                .complete(move |result| *seen.lock() = result.is_ok()),
        );
        task.finished().await;

        let res = rx.await.unwrap();
        assert_eq!(res.status_code, 200);
        assert_eq!(res.data, ResponseData::Json(serde_json::json!({ "name": "ann" })));
        assert_eq!(res.header.get("content-type").unwrap(), "application/json");
        assert_eq!(res.cookies, vec!["sid=1".to_string()]);
        assert!(*completed.lock());
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, RequestCallbacks) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (on_success, on_fail, on_complete) =
            (Arc::clone(&order), Arc::clone(&order), Arc::clone(&order));
        let callbacks = RequestCallbacks::new()
            .success(move |_| on_success.lock().push("success"))
            .fail(move |_| on_fail.lock().push("fail"))
            .complete(move |_| on_complete.lock().push("complete"));
        (order, callbacks)
    }

    #[tokio::test]
    async fn test_complete_runs_after_success() {
        let (registry, _transport, adapter) = adapter();
        registry.get("/a", "ok", RuleConfig::default());

        let (order, callbacks) = recorder();
        adapter
            .request(RequestOptions::new("/a"), callbacks)
            .finished()
            .await;
        assert_eq!(*order.lock(), ["success", "complete"]);
    }

    #[tokio::test]
    async fn test_complete_runs_after_fail() {
        let (registry, _transport, adapter) = adapter();
        registry.mock(
            RuleConfig::new("/broken").with_handler(|_| async { Err(MockError::payload("boom")) }),
        );

        let (order, callbacks) = recorder();
        adapter
            .request(RequestOptions::new("/broken"), callbacks)
            .finished()
            .await;
        assert_eq!(*order.lock(), ["fail", "complete"]);
    }

    #[tokio::test]
    async fn test_get_data_becomes_query() {
        let (registry, _transport, adapter) = adapter();
        registry.mock(RuleConfig::new("/search").with_handler(|ctx| async move {
            Ok(Reply::text(ctx.request.query.get("q").cloned().unwrap_or_default()))
        }));

        let res = adapter
            .request_async(
                RequestOptions::new("/search")
                    .data(serde_json::json!({ "q": "rust lang" }))
                    .data_type(DataType::Text),
            )
            .await
            .unwrap();
        assert_eq!(res.data, ResponseData::Text("rust lang".to_string()));
    }

    #[tokio::test]
    async fn test_post_data_becomes_json_body() {
        let (_registry, transport, adapter) = adapter();

        adapter
            .request_async(
                RequestOptions::new("http://x.com/submit")
                    .method("post")
                    .data(serde_json::json!({ "a": 1 })),
            )
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].method, Method::POST);
        assert_eq!(&calls[0].body[..], br#"{"a":1}"#);
        assert_eq!(calls[0].headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_failure_message() {
        let (registry, _transport, adapter) = adapter();
        registry.mock(
            RuleConfig::new("/broken").with_handler(|_| async { Err(MockError::payload("boom")) }),
        );

        let fail = adapter
            .request_async(RequestOptions::new("/broken"))
            .await
            .unwrap_err();
        assert_eq!(fail.err_msg, "request:fail payload handler failed: boom");
    }

    #[tokio::test]
    async fn test_abort() {
        let (registry, _transport, adapter) = adapter();
        registry.get("/slow", "late", RuleConfig::default().with_delay_ms(5_000));

        let (tx, rx) = oneshot::channel();
        let task = adapter.request(
            RequestOptions::new("/slow"),
            RequestCallbacks::new()
                .success(|_| panic!("aborted call must not succeed"))
                .fail(move |fail| {
                    let _ = tx.send(fail);
                }),
        );
        task.abort();
        task.finished().await;

        assert_eq!(rx.await.unwrap().err_msg, "request:fail abort");
    }

    #[tokio::test]
    async fn test_array_buffer_response() {
        let (registry, _transport, adapter) = adapter();
        registry.get("/bin", Bytes::from_static(&[1, 2, 3]), RuleConfig::default());

        let res = adapter
            .request_async(RequestOptions::new("/bin").response_type(ResponseKind::ArrayBuffer))
            .await
            .unwrap();
        assert_eq!(res.data, ResponseData::ArrayBuffer(Bytes::from_static(&[1, 2, 3])));
    }
}
