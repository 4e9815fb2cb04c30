//! Error types shared by the registry, the resolver and every call surface.

use thiserror::Error;

/// Errors raised while registering, resolving or delivering a mock.
#[derive(Debug, Error)]
pub enum MockError {
    /// The rule configuration could not be normalized.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// A payload handler reported a failure.
    #[error("payload handler failed: {0}")]
    Payload(String),

    /// The real call required by a remote-passthrough rule failed.
    #[error("remote call to {url} failed: {source}")]
    Remote {
        url: String,
        #[source]
        source: TransportError,
    },

    /// A payload handler asked for bypass on a rule that already performed a remote call.
    #[error("rule `{0}` requested bypass after a remote call; remote and bypass are mutually exclusive")]
    BypassAfterRemote(String),

    /// A chunk passed to `write`/`end` was neither a string nor binary data.
    #[error("the \"chunk\" argument must be a string or binary data, received {0}")]
    InvalidArgType(&'static str),

    /// An operation was attempted on a destroyed synthetic request.
    #[error("cannot call {0} after a stream was destroyed")]
    StreamDestroyed(&'static str),

    /// A write was attempted after `end`.
    #[error("write after end")]
    WriteAfterEnd,

    /// The call was aborted by the caller.
    #[error("the operation was aborted")]
    Aborted,

    /// A method or header supplied by the caller is not a valid HTTP token.
    #[error("invalid HTTP {kind}: {value:?}")]
    InvalidToken { kind: &'static str, value: String },

    /// A request was used in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Template rendering failed.
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// A `file` payload could not be loaded.
    #[error("failed to load payload file {path}: {source}")]
    PayloadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl MockError {
    /// Stable error code, reported on the socket surface.
    pub fn code(&self) -> &'static str {
        match self {
            MockError::InvalidRule(_) => "ERR_INVALID_RULE",
            MockError::Payload(_) => "ERR_MOCK_PAYLOAD",
            MockError::Remote { .. } => "ERR_MOCK_REMOTE",
            MockError::BypassAfterRemote(_) => "ERR_MOCK_BYPASS_AFTER_REMOTE",
            MockError::InvalidArgType(_) => "ERR_INVALID_ARG_TYPE",
            MockError::StreamDestroyed(_) => "ERR_STREAM_DESTROYED",
            MockError::WriteAfterEnd => "ERR_STREAM_WRITE_AFTER_END",
            MockError::Aborted => "ABORT_ERR",
            MockError::InvalidToken { .. } => "ERR_INVALID_HTTP_TOKEN",
            MockError::InvalidState(_) => "ERR_INVALID_STATE",
            MockError::Template(_) => "ERR_MOCK_TEMPLATE",
            MockError::PayloadFile { .. } => "ENOENT",
            MockError::Json(_) => "ERR_INVALID_JSON",
            MockError::Transport(_) => "ECONNREFUSED",
        }
    }

    /// Build a payload failure from any displayable error.
    pub fn payload(message: impl std::fmt::Display) -> Self {
        MockError::Payload(message.to_string())
    }
}

/// Errors raised by the real network transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}
