//! Promise-style `fetch` surface.

use super::{build_headers, parse_method, SurfaceKind, SurfaceResponse, TransportAdapter};
use crate::error::MockError;
use crate::interceptor::Interceptor;
use crate::transport::OutboundRequest;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Options of a single `fetch` call.
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl RequestInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the body and mark it as JSON.
    pub fn json(self, value: &serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(value.to_string())
    }
}

/// Response-shaped value handed back by [`FetchAdapter::fetch`].
///
/// Body accessors consume the response; call `clone()` first to read it twice.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    url: String,
    body: Bytes,
    mocked: bool,
}

impl FetchResponse {
    fn from_surface(response: SurfaceResponse) -> Self {
        Self {
            status_text: response.status_text().to_string(),
            status: response.status,
            headers: response.headers,
            url: response.url,
            body: response.body,
            mocked: response.mocked,
        }
    }

    /// `true` for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Mocked responses never follow redirects.
    pub fn redirected(&self) -> bool {
        false
    }

    pub fn is_mocked(&self) -> bool {
        self.mocked
    }

    pub fn text(self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(self) -> Result<T, MockError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn bytes(self) -> Bytes {
        self.body
    }
}

/// The `fetch` surface.
pub struct FetchAdapter {
    interceptor: Arc<Interceptor>,
}

impl FetchAdapter {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }

    /// Perform a call. Resolution errors are returned as `Err`, the way a
    /// rejected promise would report them.
    pub async fn fetch(&self, url: &str, init: RequestInit) -> Result<FetchResponse, MockError> {
        let method = match init.method.as_deref() {
            Some(method) => parse_method(method)?,
            None => Method::GET,
        };
        let request = OutboundRequest::new(method, url)
            .with_headers(build_headers(&init.headers)?)
            .with_body(init.body.unwrap_or_default());

        let resolution = self.interceptor.dispatch(request).await?;
        let response = SurfaceResponse::from_resolution(resolution, url)?;
        Ok(FetchResponse::from_surface(response))
    }
}

impl TransportAdapter for FetchAdapter {
    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Fetch
    }

    fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }
}
