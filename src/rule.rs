//! Rule records: the normalized, registry-owned form of a rule configuration.

use crate::config::{RemoteSpec, RuleConfig, UrlSpec};
use crate::error::MockError;
use crate::request::RequestInfo;
use crate::transport::UpstreamResponse;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// What a rule's URL is matched with.
#[derive(Debug, Clone)]
pub enum MatchKey {
    /// Exact, left-anchored prefix, or substring match
    Literal(String),
    /// Regular expression; `regex` is `None` when the source failed to compile
    Pattern {
        source: String,
        flags: String,
        regex: Option<Regex>,
    },
}

impl MatchKey {
    /// Build a key from its configured form.
    pub fn from_spec(spec: UrlSpec) -> Result<Self, MockError> {
        match spec {
            UrlSpec::Literal(value) if value.is_empty() => {
                Err(MockError::InvalidRule("url cannot be empty".to_string()))
            }
            UrlSpec::Literal(value) => Ok(MatchKey::Literal(value)),
            UrlSpec::Pattern { pattern, .. } if pattern.is_empty() => {
                Err(MockError::InvalidRule("url pattern cannot be empty".to_string()))
            }
            UrlSpec::Pattern { pattern, flags } => Ok(Self::pattern(pattern, flags)),
        }
    }

    /// Compile a pattern. Compilation failures are kept so the rule is
    /// skipped at match time instead of aborting registration of others.
    pub fn pattern(source: impl Into<String>, flags: impl Into<String>) -> Self {
        let source = source.into();
        let flags = flags.into();
        let regex = match compile_pattern(&source, &flags) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(pattern = %source, error = %e, "Malformed url pattern, rule will never match");
                None
            }
        };
        MatchKey::Pattern { source, flags, regex }
    }

    /// Interpret `/source/flags` and `#source#flags` as regular expressions,
    /// anything else as a literal.
    pub fn parse_delimited(raw: &str) -> Self {
        match UrlSpec::parse_delimited(raw) {
            UrlSpec::Literal(value) => MatchKey::Literal(value),
            UrlSpec::Pattern { pattern, flags } => Self::pattern(pattern, flags),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, MatchKey::Pattern { .. })
    }

    /// Pattern source or literal text.
    pub fn as_str(&self) -> &str {
        match self {
            MatchKey::Literal(value) => value,
            MatchKey::Pattern { source, .. } => source,
        }
    }

    /// Compiled expression, if this is a well-formed pattern.
    pub fn regex(&self) -> Option<&Regex> {
        match self {
            MatchKey::Pattern { regex, .. } => regex.as_ref(),
            MatchKey::Literal(_) => None,
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKey::Literal(value) => f.write_str(value),
            MatchKey::Pattern { source, flags, .. } => write!(f, "/{}/{}", source, flags),
        }
    }
}

fn compile_pattern(source: &str, flags: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
}

/// HTTP verb a rule answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Any,
}

impl Verb {
    /// Case-insensitive parse; missing or unknown verbs mean `Any`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("get") => Verb::Get,
            Some("post") => Verb::Post,
            Some("put") => Verb::Put,
            Some("patch") => Verb::Patch,
            Some("delete") => Verb::Delete,
            Some("head") => Verb::Head,
            _ => Verb::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Post => "post",
            Verb::Put => "put",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
            Verb::Head => "head",
            Verb::Any => "any",
        }
    }

    /// Whether a request with this method can be answered.
    pub fn accepts(&self, method: &Method) -> bool {
        *self == Verb::Any || method.as_str().eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a mocked response.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Json(serde_json::Value),
    Binary(Bytes),
}

impl ResponseBody {
    /// Strings become text, everything else JSON.
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => ResponseBody::Text(text),
            other => ResponseBody::Json(other),
        }
    }

    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> Result<Bytes, MockError> {
        match self {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Text(text) => Ok(Bytes::from(text.clone())),
            ResponseBody::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            ResponseBody::Binary(bytes) => Ok(bytes.clone()),
        }
    }

    /// Natural content type for this body, if it has one.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::Text(_) => Some("text/plain"),
            ResponseBody::Json(_) => Some("application/json"),
            ResponseBody::Binary(_) => Some("application/octet-stream"),
        }
    }
}

impl From<&str> for ResponseBody {
    fn from(value: &str) -> Self {
        ResponseBody::Text(value.to_string())
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        ResponseBody::Text(value)
    }
}

impl From<serde_json::Value> for ResponseBody {
    fn from(value: serde_json::Value) -> Self {
        ResponseBody::from_value(value)
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        ResponseBody::Binary(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        ResponseBody::Binary(Bytes::from(value))
    }
}

/// Result of a payload handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer the call with this body
    Body(ResponseBody),
    /// Abandon the mock for this call and use the real transport
    Bypass,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Body(ResponseBody::Text(text.into()))
    }

    pub fn json(value: serde_json::Value) -> Self {
        Reply::Body(ResponseBody::Json(value))
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Reply::Bypass)
    }
}

impl From<ResponseBody> for Reply {
    fn from(value: ResponseBody) -> Self {
        Reply::Body(value)
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Reply::text(value)
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Reply::text(value)
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Reply::Body(ResponseBody::from_value(value))
    }
}

/// Everything a payload handler gets to look at.
#[derive(Debug, Clone)]
pub struct PayloadContext {
    pub request: Arc<RequestInfo>,
    pub rule: Arc<RuleRecord>,
    /// Response of the remote target, for passthrough rules
    pub remote: Option<Arc<UpstreamResponse>>,
}

impl PayloadContext {
    /// Shorthand for `self.rule.bypass()`.
    pub fn bypass(&self) -> Reply {
        self.rule.bypass()
    }
}

/// Computes a rule's body at match time.
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    async fn respond(&self, ctx: PayloadContext) -> Result<Reply, MockError>;
}

/// Adapts an async closure to [`PayloadHandler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> PayloadHandler for HandlerFn<F>
where
    F: Fn(PayloadContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply, MockError>> + Send,
{
    async fn respond(&self, ctx: PayloadContext) -> Result<Reply, MockError> {
        (self.0)(ctx).await
    }
}

/// Adapts a synchronous closure to [`PayloadHandler`].
pub struct SyncHandlerFn<F>(pub F);

#[async_trait]
impl<F> PayloadHandler for SyncHandlerFn<F>
where
    F: Fn(PayloadContext) -> Result<Reply, MockError> + Send + Sync,
{
    async fn respond(&self, ctx: PayloadContext) -> Result<Reply, MockError> {
        (self.0)(ctx)
    }
}

/// Where a rule's body comes from.
#[derive(Clone)]
pub enum Payload {
    Static(ResponseBody),
    /// Loaded at match time; `.json` files are parsed
    File(PathBuf),
    Handler(Arc<dyn PayloadHandler>),
}

impl Payload {
    pub fn handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(PayloadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, MockError>> + Send + 'static,
    {
        Payload::Handler(Arc::new(HandlerFn(handler)))
    }

    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(PayloadContext) -> Result<Reply, MockError> + Send + Sync + 'static,
    {
        Payload::Handler(Arc::new(SyncHandlerFn(handler)))
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Static(ResponseBody::Empty)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Static(body) => f.debug_tuple("Static").field(body).finish(),
            Payload::File(path) => f.debug_tuple("File").field(path).finish(),
            Payload::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

impl From<ResponseBody> for Payload {
    fn from(value: ResponseBody) -> Self {
        Payload::Static(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Static(value.into())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Static(value.into())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Static(value.into())
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Static(value.into())
    }
}

/// Real endpoint a passthrough rule calls before computing its body.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTarget {
    pub url: String,
    /// Overrides the original request method
    pub method: Option<Method>,
}

impl RemoteTarget {
    /// Parse `[<method>] <absolute-url>`.
    pub fn parse(value: &str) -> Result<Self, MockError> {
        let mut parts = value.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(url), None, None) => Self::new(url, None),
            (Some(method), Some(url), None) => Self::new(url, Some(method)),
            _ => Err(MockError::InvalidRule(format!("invalid remote target `{}`", value))),
        }
    }

    fn new(url: &str, method: Option<&str>) -> Result<Self, MockError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(MockError::InvalidRule(format!(
                "remote target must be an absolute http(s) url, got `{}`",
                url
            )));
        }
        let method = method
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| MockError::InvalidRule(format!("invalid remote method `{}`", m)))
            })
            .transpose()?;
        Ok(Self {
            url: url.to_string(),
            method,
        })
    }

    fn from_spec(spec: RemoteSpec) -> Result<Self, MockError> {
        match spec {
            RemoteSpec::Url(url) => Self::parse(&url),
            RemoteSpec::Detailed { url, method } => Self::new(&url, method.as_deref()),
        }
    }
}

/// A registered rule.
///
/// Immutable after creation apart from the remaining-uses budget, which the
/// interceptor decrements each time the rule is selected.
#[derive(Debug)]
pub struct RuleRecord {
    match_key: MatchKey,
    verb: Verb,
    payload: Payload,
    status: Option<StatusCode>,
    headers: HeaderMap,
    delay: Duration,
    remaining: Option<AtomicU32>,
    enabled: bool,
    template: bool,
    identity_key: String,
    remote: Option<RemoteTarget>,
}

impl RuleRecord {
    /// Normalize a configuration into a rule, rejecting it if the URL is missing
    /// or any header or remote target is malformed.
    pub fn from_config(config: RuleConfig) -> Result<Self, MockError> {
        let url = config
            .url
            .ok_or_else(|| MockError::InvalidRule("url is required".to_string()))?;
        let match_key = MatchKey::from_spec(url)?;
        let verb = Verb::parse(config.method.as_deref());

        let payload = if let Some(payload) = config.payload {
            payload
        } else if let Some(path) = config.file {
            Payload::File(path)
        } else if let Some(encoded) = config.body_base64 {
            use base64::Engine;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| MockError::InvalidRule(format!("invalid base64 body: {}", e)))?;
            Payload::Static(ResponseBody::Binary(Bytes::from(bytes)))
        } else if let Some(body) = config.body {
            Payload::Static(ResponseBody::from_value(body))
        } else {
            Payload::default()
        };

        let mut headers = HeaderMap::new();
        for (name, value) in config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| MockError::InvalidRule(format!("invalid header name `{}`", name)))?;
            let header_value = HeaderValue::from_str(&value).map_err(|_| {
                MockError::InvalidRule(format!("invalid value for header `{}`", name))
            })?;
            headers.append(header_name, header_value);
        }

        let remote = config.remote.map(RemoteTarget::from_spec).transpose()?;
        let identity_key = format!("{}#{}", match_key, verb);

        Ok(Self {
            status: normalize_status(config.status.as_ref()),
            delay: Duration::from_millis(normalize_delay(config.delay.as_ref())),
            remaining: normalize_times(config.times.as_ref()).map(AtomicU32::new),
            enabled: !is_disable_flag(config.disable.as_ref()),
            template: config.template,
            match_key,
            verb,
            payload,
            headers,
            identity_key,
            remote,
        })
    }

    pub fn match_key(&self) -> &MatchKey {
        &self.match_key
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Configured status, or 200.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Status only if it was explicitly configured.
    pub fn explicit_status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_template(&self) -> bool {
        self.template
    }

    /// `matchKey + verb`; registering the same key again replaces this rule.
    pub fn identity_key(&self) -> &str {
        &self.identity_key
    }

    pub fn remote(&self) -> Option<&RemoteTarget> {
        self.remote.as_ref()
    }

    /// `None` means unbounded.
    pub fn remaining_uses(&self) -> Option<u32> {
        self.remaining.as_ref().map(|r| r.load(Ordering::SeqCst))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_uses() == Some(0)
    }

    /// Enabled and not exhausted.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.is_exhausted()
    }

    /// The bypass marker. Return it from a payload handler to answer this
    /// one call with the real transport.
    pub fn bypass(&self) -> Reply {
        Reply::Bypass
    }

    /// Charge one use. Fails without going below zero when the budget is spent.
    pub(crate) fn try_consume(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }
}

fn value_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn normalize_status(value: Option<&serde_json::Value>) -> Option<StatusCode> {
    let text = value.and_then(value_text)?;
    let bytes = text.as_bytes();
    let valid = bytes.len() == 3
        && (b'1'..=b'5').contains(&bytes[0])
        && bytes[1..].iter().all(u8::is_ascii_digit);
    if !valid {
        warn!(status = %text, "Invalid status code, using 200");
        return None;
    }
    text.parse::<u16>().ok().and_then(|s| StatusCode::from_u16(s).ok())
}

fn normalize_delay(value: Option<&serde_json::Value>) -> u64 {
    let ms = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match ms {
        Some(ms) if ms.is_finite() && ms > 0.0 => ms as u64,
        _ => 0,
    }
}

fn normalize_times(value: Option<&serde_json::Value>) -> Option<u32> {
    let times = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if !times.is_finite() {
        return None;
    }
    Some(times.clamp(0.0, u32::MAX as f64) as u32)
}

fn is_disable_flag(value: Option<&serde_json::Value>) -> bool {
    value
        .and_then(value_text)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "yes" | "true" | "1"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(config: RuleConfig) -> RuleRecord {
        RuleRecord::from_config(config).unwrap()
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let err = RuleRecord::from_config(RuleConfig::default()).unwrap_err();
        assert!(matches!(err, MockError::InvalidRule(_)));

        let err = RuleRecord::from_config(RuleConfig::new("")).unwrap_err();
        assert!(matches!(err, MockError::InvalidRule(_)));
    }

    #[test]
    fn test_defaults() {
        let rule = record(RuleConfig::new("/api"));
        assert_eq!(rule.verb(), Verb::Any);
        assert_eq!(rule.status(), StatusCode::OK);
        assert_eq!(rule.explicit_status(), None);
        assert_eq!(rule.delay(), Duration::ZERO);
        assert_eq!(rule.remaining_uses(), None);
        assert!(rule.is_enabled());
        assert!(rule.remote().is_none());
        assert_eq!(rule.identity_key(), "/api#any");
    }

    #[test]
    fn test_verb_normalization() {
        assert_eq!(Verb::parse(Some("POST")), Verb::Post);
        assert_eq!(Verb::parse(Some("Delete")), Verb::Delete);
        assert_eq!(Verb::parse(Some("options")), Verb::Any);
        assert_eq!(Verb::parse(None), Verb::Any);

        assert!(Verb::Get.accepts(&Method::GET));
        assert!(!Verb::Get.accepts(&Method::POST));
        assert!(Verb::Any.accepts(&Method::OPTIONS));
    }

    #[test]
    fn test_status_normalization() {
        let rule = record(RuleConfig::new("/a").with_status(404));
        assert_eq!(rule.status(), StatusCode::NOT_FOUND);

        let mut config = RuleConfig::new("/a");
        config.status = Some(json!("503"));
        assert_eq!(record(config).status(), StatusCode::SERVICE_UNAVAILABLE);

        for invalid in [json!(99), json!(600), json!("abc"), json!(2000), json!("20")] {
            let mut config = RuleConfig::new("/a");
            config.status = Some(invalid);
            assert_eq!(record(config).status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_delay_normalization() {
        let mut config = RuleConfig::new("/a");
        config.delay = Some(json!("150"));
        assert_eq!(record(config).delay(), Duration::from_millis(150));

        for invalid in [json!(-20), json!("soon"), json!(null), json!([1])] {
            let mut config = RuleConfig::new("/a");
            config.delay = Some(invalid);
            assert_eq!(record(config).delay(), Duration::ZERO);
        }
    }

    #[test]
    fn test_times_normalization() {
        let mut config = RuleConfig::new("/a");
        config.times = Some(json!("3"));
        assert_eq!(record(config).remaining_uses(), Some(3));

        let mut config = RuleConfig::new("/a");
        config.times = Some(json!(-1));
        assert!(record(config).is_exhausted());

        let mut config = RuleConfig::new("/a");
        config.times = Some(json!("many"));
        assert_eq!(record(config).remaining_uses(), None);
    }

    #[test]
    fn test_disable_flag() {
        for flag in [json!("yes"), json!("TRUE"), json!("1"), json!(true), json!(1)] {
            let mut config = RuleConfig::new("/a");
            config.disable = Some(flag);
            assert!(!record(config).is_enabled());
        }
        for flag in [json!("no"), json!(false), json!("0")] {
            let mut config = RuleConfig::new("/a");
            config.disable = Some(flag);
            assert!(record(config).is_enabled());
        }
    }

    #[test]
    fn test_try_consume_never_goes_negative() {
        let rule = record(RuleConfig::new("/a").with_times(2));
        assert!(rule.try_consume());
        assert!(rule.try_consume());
        assert!(!rule.try_consume());
        assert_eq!(rule.remaining_uses(), Some(0));
        assert!(!rule.is_available());
    }

    #[test]
    fn test_parse_delimited() {
        let key = MatchKey::parse_delimited("/^https?://api/i");
        assert!(key.is_regex());
        assert!(key.regex().unwrap().is_match("HTTPS://API.example.com"));

        let key = MatchKey::parse_delimited("#/users/\\d+#");
        assert!(key.regex().unwrap().is_match("http://x.com/users/42"));

        let key = MatchKey::parse_delimited("www.api.com/users");
        assert!(!key.is_regex());

        // Trailing text that is not a flag set stays literal
        let key = MatchKey::parse_delimited("/api/users");
        assert!(!key.is_regex());
    }

    #[test]
    fn test_malformed_pattern_is_kept_without_regex() {
        let key = MatchKey::pattern("([unclosed", "");
        assert!(key.is_regex());
        assert!(key.regex().is_none());
    }

    #[test]
    fn test_payload_precedence() {
        let rule = record(
            RuleConfig::new("/a")
                .with_body("inline")
                .with_file("/tmp/ignored.json")
                .with_payload(json!({"ok": true})),
        );
        assert!(matches!(rule.payload(), Payload::Static(ResponseBody::Json(_))));

        let rule = record(RuleConfig::new("/a").with_body("inline").with_file("/tmp/x.json"));
        assert!(matches!(rule.payload(), Payload::File(_)));

        let mut config = RuleConfig::new("/a");
        config.body_base64 = Some("aGVsbG8=".to_string());
        match record(config).payload() {
            Payload::Static(ResponseBody::Binary(bytes)) => assert_eq!(&bytes[..], b"hello"),
            other => panic!("Expected binary payload, got {:?}", other),
        }
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let rule = record(RuleConfig::new("/a").with_header("X-Request-Id", "abc"));
        assert_eq!(rule.headers().get("x-request-id").unwrap(), "abc");

        let err = RuleRecord::from_config(RuleConfig::new("/a").with_header("bad header", "v"))
            .unwrap_err();
        assert!(matches!(err, MockError::InvalidRule(_)));
    }

    #[test]
    fn test_headers_keep_configured_order() {
        let rule = record(
            RuleConfig::new("/a")
                .with_header("X-Zeta", "1")
                .with_header("Content-Type", "text/plain")
                .with_header("X-Alpha", "2"),
        );
        let names: Vec<_> = rule.headers().keys().map(|n| n.as_str()).collect();
        assert_eq!(names, ["x-zeta", "content-type", "x-alpha"]);
    }

    #[test]
    fn test_remote_target() {
        let target = RemoteTarget::parse("post https://real.example.com/endpoint").unwrap();
        assert_eq!(target.method, Some(Method::POST));
        assert_eq!(target.url, "https://real.example.com/endpoint");

        let target = RemoteTarget::parse("https://real.example.com").unwrap();
        assert_eq!(target.method, None);

        assert!(RemoteTarget::parse("real.example.com").is_err());
        assert!(RemoteTarget::parse("").is_err());
    }

    #[test]
    fn test_bypass_is_a_variant() {
        let rule = record(RuleConfig::new("/a"));
        assert!(rule.bypass().is_bypass());
        assert!(!Reply::text("bypass").is_bypass());
    }
}
