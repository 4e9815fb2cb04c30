//! Mock Interceptor
//!
//! Scripted responses for outgoing HTTP calls, for tests, demos and offline
//! development. One [`Registry`] of rules is shared by four call surfaces:
//! an XHR-style object, a `fetch`-style function, a callback-style
//! `request(options)` and a server-side synthetic socket request.
//!
//! # Features
//!
//! - **Rule Matching**: Regex rules first, then exact/prefix, then substring
//! - **Static and Computed Payloads**: Fixed bodies, files, or async handlers
//! - **Bypass**: A handler can hand a single call back to the real network
//! - **Remote Passthrough**: Call a real endpoint and reshape its response
//! - **Latency Simulation**: Per-rule delays
//! - **Match Limits**: Limit how many times a rule can be matched
//! - **Dynamic Templates**: Handlebars templates over the request
//!
//! # Example Configuration
//!
//! ```yaml
//! rules:
//!   - url: www.api.com/partial
//!     method: get
//!     body: "get content"
//!   - url:
//!       pattern: "/users/\\d+$"
//!       flags: i
//!     status: 200
//!     delay: 150
//!     times: 3
//!     headers:
//!       X-Mock: "1"
//!     body:
//!       name: "{{query.name}}"
//!     template: true
//! settings:
//!   log_unmatched: false
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mock_interceptor::adapter::fetch::RequestInit;
//! use mock_interceptor::{MockEnvironment, Registry, ReqwestTransport, RuleConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), mock_interceptor::MockError> {
//! let registry = Arc::new(Registry::new());
//! registry.get("/hello", "world", RuleConfig::default().with_status(201));
//!
//! let env = MockEnvironment::new(registry, Arc::new(ReqwestTransport::new()));
//! let response = env.fetch().fetch("https://api.example.com/hello", RequestInit::new()).await?;
//! assert_eq!(response.text(), "world");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod annotation;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod matcher;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod rule;
pub mod template;
pub mod transport;

pub use adapter::{MockEnvironment, SurfaceKind, TransportAdapter};
pub use config::{MockConfig, RuleConfig, Settings};
pub use error::{MockError, TransportError};
pub use interceptor::{Interceptor, Resolution};
pub use registry::Registry;
pub use request::RequestInfo;
pub use rule::{Payload, PayloadContext, Reply, ResponseBody, RuleRecord};
pub use transport::{ReqwestTransport, Transport};
