//! Turns a matched rule into a response, or into a bypass decision.

use crate::annotation::strip_annotation;
use crate::error::MockError;
use crate::request::RequestInfo;
use crate::rule::{Payload, PayloadContext, Reply, ResponseBody, RuleRecord};
use crate::template::{TemplateContext, TemplateEngine};
use crate::transport::UpstreamResponse;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode};
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// A response produced by a rule, before any surface-specific rendering.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    /// Identity key of the rule that produced it
    pub rule: String,
}

impl MockResponse {
    pub fn body_bytes(&self) -> Result<Bytes, MockError> {
        self.body.to_bytes()
    }
}

/// Resolution of a matched rule.
#[derive(Debug, Clone)]
pub enum Outcome {
    Respond(MockResponse),
    /// Answer the call with the real transport instead
    Bypass,
}

/// Computes rule payloads and applies rule delays.
pub struct ResponseResolver {
    templates: TemplateEngine,
    default_content_type: String,
}

impl ResponseResolver {
    pub fn new(default_content_type: impl Into<String>) -> Self {
        Self {
            templates: TemplateEngine::new(),
            default_content_type: default_content_type.into(),
        }
    }

    /// Resolve `rule` for `request`.
    ///
    /// The payload is computed first; the outcome (body, bypass or error) is
    /// then held back until the rule's delay has elapsed since the call started.
    pub async fn resolve(
        &self,
        rule: Arc<RuleRecord>,
        request: Arc<RequestInfo>,
        remote: Option<Arc<UpstreamResponse>>,
    ) -> Result<Outcome, MockError> {
        let started = Instant::now();
        let reply = self.compute(&rule, &request, remote.clone()).await;

        if !rule.delay().is_zero() {
            debug!(rule = %rule.identity_key(), delay_ms = rule.delay().as_millis() as u64, "Applying delay");
            sleep_until(started + rule.delay()).await;
        }

        match reply? {
            Reply::Bypass if remote.is_some() => {
                Err(MockError::BypassAfterRemote(rule.identity_key().to_string()))
            }
            Reply::Bypass => {
                debug!(rule = %rule.identity_key(), "Payload requested bypass");
                Ok(Outcome::Bypass)
            }
            Reply::Body(body) => Ok(Outcome::Respond(self.build_response(
                &rule,
                body,
                remote.as_deref(),
            ))),
        }
    }

    async fn compute(
        &self,
        rule: &Arc<RuleRecord>,
        request: &Arc<RequestInfo>,
        remote: Option<Arc<UpstreamResponse>>,
    ) -> Result<Reply, MockError> {
        match rule.payload() {
            Payload::Static(body) => Ok(Reply::Body(self.render(rule, request, remote, body)?)),
            Payload::File(path) => {
                let body = load_payload_file(path).await?;
                Ok(Reply::Body(self.render(rule, request, remote, &body)?))
            }
            Payload::Handler(handler) => {
                handler
                    .respond(PayloadContext {
                        request: Arc::clone(request),
                        rule: Arc::clone(rule),
                        remote,
                    })
                    .await
            }
        }
    }

    fn render(
        &self,
        rule: &RuleRecord,
        request: &RequestInfo,
        remote: Option<Arc<UpstreamResponse>>,
        body: &ResponseBody,
    ) -> Result<ResponseBody, MockError> {
        if !rule.is_template() {
            return Ok(body.clone());
        }
        let ctx = TemplateContext::new(request, rule, remote.as_deref());
        Ok(self.templates.render_body(body, &ctx)?)
    }

    /// Status and headers: the rule's own settings win over the remote response's.
    fn build_response(
        &self,
        rule: &RuleRecord,
        body: ResponseBody,
        remote: Option<&UpstreamResponse>,
    ) -> MockResponse {
        let mut headers = HeaderMap::new();
        if let Some(remote) = remote {
            headers = remote.headers.clone();
            // The body is replaced, so the remote's framing no longer applies
            for name in [CONTENT_LENGTH, TRANSFER_ENCODING, CONTENT_ENCODING] {
                headers.remove(name);
            }
        }
        for name in rule.headers().keys() {
            headers.remove(name);
            for value in rule.headers().get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        if !headers.contains_key(CONTENT_TYPE) {
            let content_type = body
                .content_type()
                .unwrap_or(self.default_content_type.as_str());
            if let Ok(value) = HeaderValue::from_str(content_type) {
                headers.insert(CONTENT_TYPE, value);
            }
        }

        let status = rule
            .explicit_status()
            .or(remote.map(|r| r.status))
            .unwrap_or(StatusCode::OK);

        MockResponse {
            status,
            headers,
            body,
            rule: rule.identity_key().to_string(),
        }
    }
}

impl Default for ResponseResolver {
    fn default() -> Self {
        Self::new("application/json")
    }
}

async fn load_payload_file(path: &Path) -> Result<ResponseBody, MockError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|source| MockError::PayloadFile {
            path: path.display().to_string(),
            source,
        })?;

    let text = match String::from_utf8(content) {
        Ok(text) => text,
        Err(e) => return Ok(ResponseBody::Binary(Bytes::from(e.into_bytes()))),
    };
    // Annotated rule files carry their settings in a leading comment
    let payload = strip_annotation(&text);

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        return Ok(ResponseBody::Json(serde_json::from_str(payload)?));
    }
    Ok(ResponseBody::Text(payload.to_string()))
}
