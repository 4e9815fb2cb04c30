//! The rule registry.
//!
//! One registry is shared by every call surface of a [`MockEnvironment`]. It
//! owns the rules, keyed by identity (`url + verb`), and answers match queries.
//!
//! [`MockEnvironment`]: crate::adapter::MockEnvironment

use crate::config::{MockConfig, RuleConfig, UrlSpec};
use crate::error::MockError;
use crate::matcher::{find_match, MatchResult};
use crate::rule::{Payload, RuleRecord, Verb};
use http::Method;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store of registered rules.
pub struct Registry {
    rules: RwLock<Vec<Arc<RuleRecord>>>,
    enabled: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Build a registry holding every rule of `config`.
    pub fn from_config(config: &MockConfig) -> Result<Self, MockError> {
        let registry = Self::new();
        for rule in &config.rules {
            registry.try_mock(rule.clone())?;
        }
        if !config.settings.enabled {
            registry.disable();
        }
        info!(rules = registry.len(), enabled = config.settings.enabled, "Registry loaded");
        Ok(registry)
    }

    /// Register a rule, replacing any rule with the same url and verb.
    /// Returns `None` when the configuration is rejected.
    pub fn mock(&self, config: RuleConfig) -> Option<Arc<RuleRecord>> {
        match self.try_mock(config) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(error = %e, "Rejected mock rule");
                None
            }
        }
    }

    /// Like [`mock`](Self::mock), but reports why a rule was rejected.
    pub fn try_mock(&self, config: RuleConfig) -> Result<Arc<RuleRecord>, MockError> {
        let rule = Arc::new(RuleRecord::from_config(config)?);
        let mut rules = self.rules.write();
        match rules
            .iter()
            .position(|r| r.identity_key() == rule.identity_key())
        {
            Some(idx) => {
                debug!(rule = %rule.identity_key(), "Replacing mock rule");
                rules[idx] = Arc::clone(&rule);
            }
            None => {
                debug!(rule = %rule.identity_key(), "Registered mock rule");
                rules.push(Arc::clone(&rule));
            }
        }
        Ok(rule)
    }

    /// Register a rule from a loosely-typed JSON object.
    pub fn mock_value(&self, value: serde_json::Value) -> Option<Arc<RuleRecord>> {
        match RuleConfig::from_value(value) {
            Ok(config) => self.mock(config),
            Err(e) => {
                warn!(error = %e, "Rejected mock rule");
                None
            }
        }
    }

    /// Best rule for a call. Does not charge the rule's budget.
    pub fn match_rule(&self, url: &str, method: &Method) -> Option<Arc<RuleRecord>> {
        self.find(url, method).map(|m| m.rule)
    }

    /// Like [`match_rule`](Self::match_rule), but also reports the match class.
    pub fn find(&self, url: &str, method: &Method) -> Option<MatchResult> {
        if !self.is_enabled() {
            return None;
        }
        let rules = self.rules.read();
        find_match(&rules, url, method)
    }

    /// Remove every rule. The global switch is left as is.
    pub fn reset(&self) {
        let removed = {
            let mut rules = self.rules.write();
            let n = rules.len();
            rules.clear();
            n
        };
        info!(removed, "Registry reset");
    }

    /// Remove one rule by identity key.
    pub fn remove(&self, identity_key: &str) -> Option<Arc<RuleRecord>> {
        let mut rules = self.rules.write();
        let idx = rules.iter().position(|r| r.identity_key() == identity_key)?;
        Some(rules.remove(idx))
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.log_rules("Mocking enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.log_rules("Mocking disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Snapshot of the registered rules, in registration order.
    pub fn rules(&self) -> Vec<Arc<RuleRecord>> {
        self.rules.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn get(
        &self,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.register_verb(Verb::Get, url, body, options)
    }

    pub fn post(
        &self,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.register_verb(Verb::Post, url, body, options)
    }

    pub fn put(
        &self,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.register_verb(Verb::Put, url, body, options)
    }

    pub fn patch(
        &self,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.register_verb(Verb::Patch, url, body, options)
    }

    pub fn delete(
        &self,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.register_verb(Verb::Delete, url, body, options)
    }

    pub fn head(
        &self,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.register_verb(Verb::Head, url, body, options)
    }

    pub fn any(
        &self,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.register_verb(Verb::Any, url, body, options)
    }

    fn register_verb(
        &self,
        verb: Verb,
        url: impl Into<UrlSpec>,
        body: impl Into<Payload>,
        options: RuleConfig,
    ) -> Option<Arc<RuleRecord>> {
        self.mock(
            options
                .with_url(url)
                .with_method(verb.as_str())
                .with_payload(body),
        )
    }

    fn log_rules(&self, message: &str) {
        let rules = self.rules.read();
        info!(rules = rules.len(), "{}", message);
        for rule in rules.iter() {
            debug!(
                rule = %rule.identity_key(),
                enabled = rule.is_enabled(),
                remaining = ?rule.remaining_uses(),
                "Registered rule"
            );
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::ResponseBody;

    fn static_text(rule: &RuleRecord) -> Option<&str> {
        match rule.payload() {
            Payload::Static(ResponseBody::Text(text)) => Some(text),
            _ => None,
        }
    }

    #[test]
    fn test_upsert_replaces_same_url_and_verb() {
        let registry = Registry::new();
        registry.get("/a", "first", RuleConfig::default()).unwrap();
        registry.post("/a", "post", RuleConfig::default()).unwrap();
        registry.get("/a", "second", RuleConfig::default()).unwrap();

        assert_eq!(registry.len(), 2);
        let rule = registry.match_rule("/a", &Method::GET).unwrap();
        assert_eq!(static_text(&rule), Some("second"));
        // Replacement keeps the original position
        assert_eq!(registry.rules()[0].identity_key(), "/a#get");
    }

    #[test]
    fn test_rejected_rule() {
        let registry = Registry::new();
        assert!(registry.mock(RuleConfig::default()).is_none());
        assert!(registry.mock_value(serde_json::json!({ "url": 1 })).is_none());
        assert!(registry
            .mock_value(serde_json::json!({ "url": "/ok", "times": "2" }))
            .is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reset_clears_rules() {
        let registry = Registry::new();
        registry.any("/a", "a", RuleConfig::default());
        registry.get("/b", "b", RuleConfig::default());

        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.match_rule("/a", &Method::GET).is_none());
        assert!(registry.match_rule("/b", &Method::GET).is_none());
        assert!(registry.is_enabled());
    }

    #[test]
    fn test_global_switch() {
        let registry = Registry::new();
        registry.any("/a", "a", RuleConfig::default());

        registry.disable();
        assert!(registry.match_rule("/a", &Method::GET).is_none());

        registry.enable();
        assert!(registry.match_rule("/a", &Method::GET).is_some());
    }

    #[test]
    fn test_match_is_pure() {
        let registry = Registry::new();
        registry.get("/a", "a", RuleConfig::default().with_times(1));

        assert!(registry.match_rule("/a", &Method::GET).is_some());
        assert!(registry.match_rule("/a", &Method::GET).is_some());
        assert_eq!(registry.rules()[0].remaining_uses(), Some(1));
    }

    #[test]
    fn test_remove() {
        let registry = Registry::new();
        registry.get("/a", "a", RuleConfig::default());
        assert!(registry.remove("/a#get").is_some());
        assert!(registry.remove("/a#get").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_config() {
        let yaml = r#"
rules:
  - url: www.api.com/partial
    method: get
    body: "get content"
  - url: www.api.com/partial
    method: post
    body: "post content"
settings:
  enabled: false
"#;
        let config: MockConfig = serde_yaml::from_str(yaml).unwrap();
        let registry = Registry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_enabled());
    }
}
