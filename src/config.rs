//! Configuration for the mock interceptor.
//!
//! Rule configurations are deliberately loosely typed: numbers may arrive as
//! strings, flags as strings or booleans. [`RuleRecord::from_config`] is where
//! they get normalized.
//!
//! [`RuleRecord::from_config`]: crate::rule::RuleRecord::from_config

use crate::error::MockError;
use crate::rule::{Payload, PayloadContext, Reply, RuleRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Main configuration file: a list of rules plus global settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockConfig {
    /// Rule definitions, in registration order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

impl MockConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration by normalizing every rule.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            RuleRecord::from_config(rule.clone())
                .map_err(|e| anyhow::anyhow!("Rule {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// URL part of a rule: a literal string or a regular expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlSpec {
    /// Matched as exact, prefix or substring
    Literal(String),
    /// Regular expression with JavaScript-style flags
    Pattern {
        pattern: String,
        #[serde(default)]
        flags: String,
    },
}

impl UrlSpec {
    /// Read `/source/flags` or `#source#flags` as a pattern, anything else
    /// as a literal.
    pub fn parse_delimited(raw: &str) -> Self {
        for delim in ['/', '#'] {
            let Some(rest) = raw.strip_prefix(delim) else {
                continue;
            };
            let Some(end) = rest.rfind(delim) else {
                continue;
            };
            let (source, flags) = (&rest[..end], &rest[end + 1..]);
            if !source.is_empty() && flags.chars().all(|c| "gimsuyx".contains(c)) {
                return UrlSpec::Pattern {
                    pattern: source.to_string(),
                    flags: flags.to_string(),
                };
            }
        }
        UrlSpec::Literal(raw.to_string())
    }
}

impl From<&str> for UrlSpec {
    fn from(value: &str) -> Self {
        UrlSpec::Literal(value.to_string())
    }
}

impl From<String> for UrlSpec {
    fn from(value: String) -> Self {
        UrlSpec::Literal(value)
    }
}

impl From<regex::Regex> for UrlSpec {
    fn from(value: regex::Regex) -> Self {
        UrlSpec::Pattern {
            pattern: value.as_str().to_string(),
            flags: String::new(),
        }
    }
}

impl From<&regex::Regex> for UrlSpec {
    fn from(value: &regex::Regex) -> Self {
        value.clone().into()
    }
}

/// Remote target of a passthrough rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteSpec {
    /// Call the URL with the original request method
    Url(String),
    /// Call the URL, optionally overriding the method
    Detailed {
        url: String,
        #[serde(default)]
        method: Option<String>,
    },
}

/// A single rule definition, as written by hand or produced by tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// URL pattern (required)
    #[serde(default)]
    pub url: Option<UrlSpec>,

    /// HTTP method; unknown or missing means any
    #[serde(default)]
    pub method: Option<String>,

    /// Static body: strings become text, anything else JSON
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// Static binary body, base64 encoded
    #[serde(default)]
    pub body_base64: Option<String>,

    /// Load the payload from this file at match time
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Render string payloads as Handlebars templates
    #[serde(default)]
    pub template: bool,

    /// Status code (number or numeric string)
    #[serde(default)]
    pub status: Option<serde_json::Value>,

    /// Response headers, in the order they were written
    #[serde(default, with = "ordered_headers")]
    pub headers: Vec<(String, String)>,

    /// Delay in milliseconds (number or numeric string)
    #[serde(default)]
    pub delay: Option<serde_json::Value>,

    /// How many times the rule may be matched (number or numeric string)
    #[serde(default)]
    pub times: Option<serde_json::Value>,

    /// `yes`, `true` or `1` disables the rule
    #[serde(default)]
    pub disable: Option<serde_json::Value>,

    /// Forward matches to a real endpoint first
    #[serde(default)]
    pub remote: Option<RemoteSpec>,

    /// Programmatic payload; takes precedence over `body`, `body_base64` and `file`
    #[serde(skip)]
    pub payload: Option<Payload>,
}

impl RuleConfig {
    /// Start a rule for the given URL.
    pub fn new(url: impl Into<UrlSpec>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Parse a rule from a loosely-typed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, MockError> {
        serde_json::from_value(value).map_err(|e| MockError::InvalidRule(e.to_string()))
    }

    pub fn with_url(mut self, url: impl Into<UrlSpec>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<serde_json::Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Compute the body with an async handler on every match.
    pub fn with_handler<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(PayloadContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, MockError>> + Send + 'static,
    {
        self.with_payload(Payload::handler(handler))
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_template(mut self) -> Self {
        self.template = true;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set a response header. A header of the same name (ignoring case)
    /// is replaced in place.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Value of a configured response header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms.into());
        self
    }

    pub fn with_times(mut self, times: u32) -> Self {
        self.times = Some(times.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disable = Some("true".into());
        self
    }

    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        self.remote = Some(RemoteSpec::Url(url.into()));
        self
    }

    pub fn with_remote_method(mut self, method: impl Into<String>, url: impl Into<String>) -> Self {
        self.remote = Some(RemoteSpec::Detailed {
            url: url.into(),
            method: Some(method.into()),
        });
        self
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Global on/off switch for mocking
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log all matched rules
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log calls that fall through to the real transport
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Content type used when neither the rule nor its body implies one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// Header maps are read and written as YAML/JSON mappings, keeping entry order.
mod ordered_headers {
    use super::fmt;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(headers: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(headers.len()))?;
        for (name, value) in headers {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Vec<(String, String)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of header names to values")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut headers = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, String>()? {
                    headers.push(entry);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}
