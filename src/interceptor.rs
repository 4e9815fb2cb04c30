//! Shared call pipeline behind every surface adapter.
//!
//! Normalizes a call, asks the registry for a rule, charges the rule's
//! budget, performs the remote call of passthrough rules, resolves the payload
//! and falls through to the real transport when nothing (or a bypass) answers.

use crate::config::Settings;
use crate::error::MockError;
use crate::registry::Registry;
use crate::request::RequestInfo;
use crate::resolver::{MockResponse, Outcome, ResponseResolver};
use crate::rule::RuleRecord;
use crate::transport::{OutboundRequest, Transport, UpstreamResponse};
use http::header::HOST;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a call was answered.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// By a rule
    Mocked(MockResponse),
    /// By the real transport
    Passthrough(UpstreamResponse),
}

/// The call pipeline.
pub struct Interceptor {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    resolver: ResponseResolver,
    settings: Settings,
    /// Total calls seen.
    requests_total: AtomicU64,
    /// Calls a rule was selected for.
    requests_matched: AtomicU64,
    /// Calls no rule was selected for.
    requests_unmatched: AtomicU64,
    /// Calls whose rule asked for bypass.
    requests_bypassed: AtomicU64,
}

impl Interceptor {
    pub fn new(registry: Arc<Registry>, transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(registry, transport, Settings::default())
    }

    pub fn with_settings(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        settings: Settings,
    ) -> Self {
        info!(
            rules = registry.len(),
            enabled = registry.is_enabled(),
            "Mock interceptor initialized"
        );

        Self {
            resolver: ResponseResolver::new(settings.default_content_type.clone()),
            registry,
            transport,
            settings,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            requests_bypassed: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    pub fn total_bypassed(&self) -> u64 {
        self.requests_bypassed.load(Ordering::Relaxed)
    }

    /// Select the rule answering `request` and charge one use of its budget.
    ///
    /// The returned rule is captured by the caller for the rest of the call,
    /// so later registry changes do not affect it.
    pub fn select(&self, request: &RequestInfo) -> Option<Arc<RuleRecord>> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        // A rule spent by a concurrent call drops out of the next lookup
        while let Some(found) = self.registry.find(&request.url, &request.method) {
            if !found.rule.try_consume() {
                continue;
            }
            self.requests_matched.fetch_add(1, Ordering::Relaxed);
            if self.settings.log_matches {
                info!(
                    rule = %found.rule.identity_key(),
                    class = ?found.class,
                    method = %request.method,
                    url = %request.url,
                    "Call matched rule"
                );
            }
            return Some(found.rule);
        }

        self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_unmatched {
            warn!(
                method = %request.method,
                url = %request.url,
                "No matching rule, using real transport"
            );
        }
        None
    }

    /// Call the remote target of a passthrough rule.
    pub async fn call_remote(
        &self,
        rule: &RuleRecord,
        request: &RequestInfo,
    ) -> Result<Option<Arc<UpstreamResponse>>, MockError> {
        let Some(target) = rule.remote() else {
            return Ok(None);
        };

        let mut headers = request.headers.clone();
        headers.remove(HOST);
        let outbound = OutboundRequest {
            method: target.method.clone().unwrap_or_else(|| request.method.clone()),
            url: target.url.clone(),
            headers,
            body: request.raw_body().clone(),
        };

        debug!(rule = %rule.identity_key(), remote = %target.url, "Calling remote target");
        let response = self
            .transport
            .send(outbound)
            .await
            .map_err(|source| MockError::Remote {
                url: target.url.clone(),
                source,
            })?;
        Ok(Some(Arc::new(response)))
    }

    /// Resolve a selected rule: remote call first, then payload and delay.
    pub async fn resolve(
        &self,
        rule: Arc<RuleRecord>,
        request: Arc<RequestInfo>,
    ) -> Result<Outcome, MockError> {
        let remote = self.call_remote(&rule, &request).await?;
        let outcome = self.resolver.resolve(rule, request, remote).await?;
        if matches!(outcome, Outcome::Bypass) {
            self.requests_bypassed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    /// Send a call to the real transport unmodified.
    pub async fn forward(&self, request: OutboundRequest) -> Result<UpstreamResponse, MockError> {
        debug!(method = %request.method, url = %request.url, "Passing call through");
        Ok(self.transport.send(request).await?)
    }

    /// Full pipeline: mocked response, or the real transport's.
    pub async fn dispatch(&self, request: OutboundRequest) -> Result<Resolution, MockError> {
        let info = Arc::new(RequestInfo::from_outbound(&request));
        if let Some(rule) = self.select(&info) {
            if let Outcome::Respond(response) = self.resolve(rule, info).await? {
                return Ok(Resolution::Mocked(response));
            }
        }
        Ok(Resolution::Passthrough(self.forward(request).await?))
    }
}
