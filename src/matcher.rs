//! Rule matching.
//!
//! Resolves an outgoing call to at most one rule. Precedence, applied over the
//! rules that are enabled, verb-compatible and not exhausted:
//!
//! 1. regular expression rules that match the URL,
//! 2. literal rules equal to the URL or a left-anchored prefix of it,
//! 3. literal rules found anywhere else in the URL.
//!
//! Within a class the first rule in registration order wins. Matching never
//! charges a rule's remaining-uses budget; the interceptor does that.

use crate::rule::{MatchKey, RuleRecord};
use http::Method;
use std::sync::Arc;
use tracing::debug;

/// How a rule matched a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchClass {
    Regex,
    Prefix,
    Substring,
}

/// Result of matching a call against the registered rules.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// The matched rule
    pub rule: Arc<RuleRecord>,
    /// Which precedence class selected it
    pub class: MatchClass,
}

/// Find the best rule for a call.
pub fn find_match(rules: &[Arc<RuleRecord>], url: &str, method: &Method) -> Option<MatchResult> {
    let candidates: Vec<&Arc<RuleRecord>> = rules
        .iter()
        .filter(|rule| rule.is_available() && rule.verb().accepts(method))
        .collect();

    for rule in &candidates {
        if let MatchKey::Pattern { source, regex, .. } = rule.match_key() {
            match regex {
                Some(regex) if regex.is_match(url) => {
                    return Some(found(rule, MatchClass::Regex));
                }
                Some(_) => {}
                None => {
                    debug!(pattern = %source, "Skipping rule with malformed pattern");
                }
            }
        }
    }

    for rule in &candidates {
        if let MatchKey::Literal(key) = rule.match_key() {
            if url == key || url.starts_with(key.as_str()) {
                return Some(found(rule, MatchClass::Prefix));
            }
        }
    }

    for rule in &candidates {
        if let MatchKey::Literal(key) = rule.match_key() {
            if url.contains(key.as_str()) {
                return Some(found(rule, MatchClass::Substring));
            }
        }
    }

    None
}

fn found(rule: &Arc<RuleRecord>, class: MatchClass) -> MatchResult {
    MatchResult {
        rule: Arc::clone(rule),
        class,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;

    fn make_rule(config: RuleConfig) -> Arc<RuleRecord> {
        Arc::new(RuleRecord::from_config(config).unwrap())
    }

    fn body_of(result: Option<MatchResult>) -> Option<serde_json::Value> {
        result.map(|r| match r.rule.payload() {
            crate::rule::Payload::Static(body) => match body {
                crate::rule::ResponseBody::Text(t) => serde_json::json!(t),
                crate::rule::ResponseBody::Json(v) => v.clone(),
                _ => serde_json::Value::Null,
            },
            _ => serde_json::Value::Null,
        })
    }

    #[test]
    fn test_regex_beats_string() {
        let rules = vec![
            make_rule(RuleConfig::new("http://api.com/users").with_body("string")),
            make_rule(
                RuleConfig::new(regex::Regex::new(r"/users$").unwrap()).with_body("regex"),
            ),
        ];

        let result = find_match(&rules, "http://api.com/users", &Method::GET).unwrap();
        assert_eq!(result.class, MatchClass::Regex);
        assert_eq!(body_of(Some(result)), Some(serde_json::json!("regex")));
    }

    #[test]
    fn test_prefix_beats_substring() {
        let rules = vec![
            make_rule(RuleConfig::new("users").with_body("substring")),
            make_rule(RuleConfig::new("http://api.com/users").with_body("prefix")),
        ];

        let result = find_match(&rules, "http://api.com/users/42", &Method::GET).unwrap();
        assert_eq!(result.class, MatchClass::Prefix);
        assert_eq!(body_of(Some(result)), Some(serde_json::json!("prefix")));
    }

    #[test]
    fn test_substring_fallback() {
        let rules = vec![make_rule(RuleConfig::new("www.api.com/partial").with_body("x"))];

        let result = find_match(&rules, "https://www.api.com/partial-other", &Method::GET).unwrap();
        assert_eq!(result.class, MatchClass::Substring);

        assert!(find_match(&rules, "https://www.api.com/other", &Method::GET).is_none());
    }

    #[test]
    fn test_registration_order_within_class() {
        let rules = vec![
            make_rule(RuleConfig::new("http://a.com").with_body("first")),
            make_rule(RuleConfig::new("http://a.com/b").with_body("second")),
        ];

        let result = find_match(&rules, "http://a.com/b", &Method::GET);
        assert_eq!(body_of(result), Some(serde_json::json!("first")));
    }

    #[test]
    fn test_verb_filter() {
        let rules = vec![
            make_rule(RuleConfig::new("/partial").with_method("get").with_body("get content")),
            make_rule(RuleConfig::new("/partial").with_method("post").with_body("post content")),
        ];

        let result = find_match(&rules, "http://x.com/partial", &Method::POST);
        assert_eq!(body_of(result), Some(serde_json::json!("post content")));

        assert!(find_match(&rules, "http://x.com/partial", &Method::DELETE).is_none());
    }

    #[test]
    fn test_disabled_and_exhausted_rules_are_skipped() {
        let rules = vec![
            make_rule(RuleConfig::new("/a").disabled()),
            make_rule(RuleConfig::new("/a").with_times(0)),
        ];

        assert!(find_match(&rules, "http://x.com/a", &Method::GET).is_none());
    }

    #[test]
    fn test_malformed_pattern_does_not_abort_scan() {
        let mut broken = RuleConfig::new("unused");
        broken.url = Some(crate::config::UrlSpec::Pattern {
            pattern: "([".to_string(),
            flags: String::new(),
        });
        let rules = vec![
            make_rule(broken),
            make_rule(
                RuleConfig::new(regex::Regex::new("example").unwrap()).with_body("ok"),
            ),
        ];

        let result = find_match(&rules, "http://example.com", &Method::GET);
        assert_eq!(body_of(result), Some(serde_json::json!("ok")));
    }

    #[test]
    fn test_matching_does_not_consume() {
        let rules = vec![make_rule(RuleConfig::new("/a").with_times(1))];

        for _ in 0..3 {
            assert!(find_match(&rules, "/a", &Method::GET).is_some());
        }
        assert_eq!(rules[0].remaining_uses(), Some(1));
    }
}
