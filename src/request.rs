//! Normalized view of an outgoing call.

use crate::error::MockError;
use crate::transport::{OutboundRequest, Transport, UpstreamResponse};
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Request body, parsed when possible.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Text(String),
    Binary(Bytes),
}

impl RequestBody {
    /// JSON if it parses as JSON, text if it is UTF-8, binary otherwise.
    pub fn parse(bytes: &Bytes) -> Self {
        if bytes.is_empty() {
            return RequestBody::Empty;
        }
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(bytes) {
            return RequestBody::Json(value);
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => RequestBody::Text(text.to_string()),
            Err(_) => RequestBody::Binary(bytes.clone()),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(value.to_string()),
            RequestBody::Text(text) => Some(text.clone()),
            RequestBody::Binary(bytes) => std::str::from_utf8(bytes).ok().map(String::from),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            RequestBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Lazily performed, cached un-mocked call.
struct OriginalCall {
    transport: Arc<dyn Transport>,
    request: OutboundRequest,
    response: OnceCell<Arc<UpstreamResponse>>,
}

/// A call in progress, as payload handlers and templates see it.
pub struct RequestInfo {
    pub url: String,
    pub method: Method,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: RequestBody,
    raw_body: Bytes,
    original: Option<OriginalCall>,
}

impl RequestInfo {
    pub fn new(method: Method, url: impl Into<String>, headers: HeaderMap, body: Bytes) -> Self {
        let url = url.into();
        let query = url
            .split_once('?')
            .map(|(_, query)| query.split('#').next().unwrap_or(""))
            .map(parse_query_string)
            .unwrap_or_default();
        Self {
            query,
            method,
            headers,
            body: RequestBody::parse(&body),
            raw_body: body,
            url,
            original: None,
        }
    }

    pub fn from_outbound(request: &OutboundRequest) -> Self {
        Self::new(
            request.method.clone(),
            request.url.clone(),
            request.headers.clone(),
            request.body.clone(),
        )
    }

    /// Make [`perform_real_call`](Self::perform_real_call) available.
    pub fn with_original_call(mut self, transport: Arc<dyn Transport>) -> Self {
        self.original = Some(OriginalCall {
            request: self.to_outbound(),
            transport,
            response: OnceCell::new(),
        });
        self
    }

    /// Body exactly as sent.
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    /// First value of a header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn to_outbound(&self) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.raw_body.clone(),
        }
    }

    /// Perform the original, un-mocked call. The call happens at most once;
    /// later invocations return the cached response.
    pub async fn perform_real_call(&self) -> Result<Arc<UpstreamResponse>, MockError> {
        let original = self.original.as_ref().ok_or(MockError::InvalidState(
            "the real call is only available on the socket surface",
        ))?;
        let response = original
            .response
            .get_or_try_init(|| async {
                let response = original.transport.send(original.request.clone()).await?;
                Ok::<_, MockError>(Arc::new(response))
            })
            .await?;
        Ok(Arc::clone(response))
    }
}

impl fmt::Debug for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestInfo")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("real_call", &self.original.is_some())
            .finish()
    }
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params.insert(decode_component(key), decode_component(value));
    }

    params
}

fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    urlencoding::decode(&s)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(s)
}

/// Append `params` to `url` as an encoded query string.
pub fn append_query(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let encoded: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, encoded.join("&"))
}
