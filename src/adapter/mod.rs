//! Call surfaces.
//!
//! Each adapter renders the interceptor's outcome into the shape one kind of
//! client expects. Adapters are installed into a [`MockEnvironment`], which
//! hands out a single instance per surface.

pub mod callback;
pub mod fetch;
pub mod socket;
pub mod xhr;

pub use callback::CallbackAdapter;
pub use fetch::FetchAdapter;
pub use socket::SocketAdapter;
pub use xhr::XhrAdapter;

use crate::config::{MockConfig, Settings};
use crate::error::MockError;
use crate::interceptor::{Interceptor, Resolution};
use crate::registry::Registry;
use crate::resolver::MockResponse;
use crate::transport::{Transport, UpstreamResponse};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// The call surfaces an environment can install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    Xhr,
    Fetch,
    Callback,
    Socket,
}

impl SurfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceKind::Xhr => "xhr",
            SurfaceKind::Fetch => "fetch",
            SurfaceKind::Callback => "callback",
            SurfaceKind::Socket => "socket",
        }
    }
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability shared by every installed surface.
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> SurfaceKind;

    fn interceptor(&self) -> &Arc<Interceptor>;
}

/// A response in surface-neutral form: status, headers and body bytes.
#[derive(Debug, Clone)]
pub struct SurfaceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: String,
    /// `false` when the real transport answered
    pub mocked: bool,
}

impl SurfaceResponse {
    pub fn mocked(response: MockResponse, url: impl Into<String>) -> Result<Self, MockError> {
        Ok(Self {
            body: response.body_bytes()?,
            status: response.status,
            headers: response.headers,
            url: url.into(),
            mocked: true,
        })
    }

    pub fn passthrough(response: UpstreamResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            url: response.url,
            mocked: false,
        }
    }

    pub fn from_resolution(resolution: Resolution, url: &str) -> Result<Self, MockError> {
        match resolution {
            Resolution::Mocked(response) => Self::mocked(response, url),
            Resolution::Passthrough(response) => Ok(Self::passthrough(response)),
        }
    }

    /// Reason phrase for the status, empty for unregistered codes.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }
}

/// An interceptor plus the adapters installed on top of it.
pub struct MockEnvironment {
    interceptor: Arc<Interceptor>,
    xhr: OnceLock<Arc<XhrAdapter>>,
    fetch: OnceLock<Arc<FetchAdapter>>,
    callback: OnceLock<Arc<CallbackAdapter>>,
    socket: OnceLock<Arc<SocketAdapter>>,
}

impl MockEnvironment {
    pub fn new(registry: Arc<Registry>, transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(registry, transport, Settings::default())
    }

    pub fn with_settings(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        settings: Settings,
    ) -> Self {
        Self::from_interceptor(Arc::new(Interceptor::with_settings(
            registry, transport, settings,
        )))
    }

    pub fn from_interceptor(interceptor: Arc<Interceptor>) -> Self {
        Self {
            interceptor,
            xhr: OnceLock::new(),
            fetch: OnceLock::new(),
            callback: OnceLock::new(),
            socket: OnceLock::new(),
        }
    }

    /// Build an environment from a loaded configuration file.
    pub fn from_config(config: &MockConfig, transport: Arc<dyn Transport>) -> Result<Self, MockError> {
        let registry = Arc::new(Registry::from_config(config)?);
        Ok(Self::with_settings(registry, transport, config.settings.clone()))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.interceptor.registry()
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn xhr(&self) -> Arc<XhrAdapter> {
        Arc::clone(self.xhr.get_or_init(|| {
            log_install(SurfaceKind::Xhr);
            Arc::new(XhrAdapter::new(Arc::clone(&self.interceptor)))
        }))
    }

    pub fn fetch(&self) -> Arc<FetchAdapter> {
        Arc::clone(self.fetch.get_or_init(|| {
            log_install(SurfaceKind::Fetch);
            Arc::new(FetchAdapter::new(Arc::clone(&self.interceptor)))
        }))
    }

    pub fn callback(&self) -> Arc<CallbackAdapter> {
        Arc::clone(self.callback.get_or_init(|| {
            log_install(SurfaceKind::Callback);
            Arc::new(CallbackAdapter::new(Arc::clone(&self.interceptor)))
        }))
    }

    pub fn socket(&self) -> Arc<SocketAdapter> {
        Arc::clone(self.socket.get_or_init(|| {
            log_install(SurfaceKind::Socket);
            Arc::new(SocketAdapter::new(Arc::clone(&self.interceptor)))
        }))
    }

    /// Install one surface. Installing twice returns the existing adapter.
    pub fn install(&self, kind: SurfaceKind) -> Arc<dyn TransportAdapter> {
        match kind {
            SurfaceKind::Xhr => self.xhr(),
            SurfaceKind::Fetch => self.fetch(),
            SurfaceKind::Callback => self.callback(),
            SurfaceKind::Socket => self.socket(),
        }
    }
}

fn log_install(kind: SurfaceKind) {
    info!(surface = %kind, "Installed call surface");
}

/// Parse a caller-supplied method name, case-insensitively.
pub(crate) fn parse_method(method: &str) -> Result<Method, MockError> {
    Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
        MockError::InvalidToken {
            kind: "method",
            value: method.to_string(),
        }
    })
}

/// Validate caller-supplied header pairs.
pub(crate) fn build_headers<K, V>(pairs: &[(K, V)]) -> Result<HeaderMap, MockError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let (name, value) = header_pair(name.as_ref(), value.as_ref())?;
        headers.append(name, value);
    }
    Ok(headers)
}

pub(crate) fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), MockError> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| MockError::InvalidToken {
        kind: "header name",
        value: name.to_string(),
    })?;
    let header_value = HeaderValue::from_str(value).map_err(|_| MockError::InvalidToken {
        kind: "header value",
        value: value.to_string(),
    })?;
    Ok((header_name, header_value))
}
