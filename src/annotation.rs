//! Annotated rule files.
//!
//! A rule file starts with a doc-style block comment carrying the rule's
//! settings; the rest of the file is the payload:
//!
//! ```text
//! /**
//!  * @url #/users/\d+#i
//!  * @method get
//!  * @status 200
//!  * @delay 150
//!  * @times 3
//!  * @header X-Mock: 1
//!  * @remote post https://real.example.com/users
//!  */
//! { "name": "ann" }
//! ```
//!
//! The payload is not read here. Rules built from a file point back at it,
//! so it is loaded (without the comment) each time the rule matches.

use crate::config::{RemoteSpec, RuleConfig, UrlSpec};
use crate::error::MockError;
use anyhow::Context;
use std::path::Path;
use tracing::{debug, warn};

const OPEN: &str = "/**";
const CLOSE: &str = "*/";

/// Split `source` into its leading annotation block and the rest.
fn split(source: &str) -> Option<(&str, &str)> {
    let trimmed = source.trim_start();
    let body = trimmed.strip_prefix(OPEN)?;
    let end = body.find(CLOSE)?;
    Some((&body[..end], &body[end + CLOSE.len()..]))
}

/// The payload part of an annotated file. Sources without a leading
/// annotation block are returned unchanged.
pub fn strip_annotation(source: &str) -> &str {
    match split(source) {
        Some((_, rest)) => rest.trim_start(),
        None => source,
    }
}

/// Parse the annotation block at the top of `source` into a rule.
pub fn parse_rule(source: &str) -> Result<RuleConfig, MockError> {
    let (block, _) = split(source)
        .ok_or_else(|| MockError::InvalidRule("missing leading annotation block".to_string()))?;

    let mut config = RuleConfig::default();
    for line in block.lines() {
        let line = line.trim().trim_start_matches('*').trim();
        let Some(tag_line) = line.strip_prefix('@') else {
            continue;
        };
        let (tag, value) = match tag_line.split_once(char::is_whitespace) {
            Some((tag, value)) => (tag, value.trim()),
            None => (tag_line, ""),
        };

        match tag {
            "url" => config.url = Some(UrlSpec::parse_delimited(value)),
            "method" => config.method = Some(value.to_string()),
            "delay" => config.delay = Some(value.into()),
            "status" => config.status = Some(value.into()),
            "times" => config.times = Some(value.into()),
            "header" => {
                let Some((name, value)) = value.split_once(':') else {
                    return Err(MockError::InvalidRule(format!(
                        "@header expects `name: value`, got {:?}",
                        value
                    )));
                };
                config = config.with_header(name.trim(), value.trim());
            }
            "disable" => {
                let flag = if value.is_empty() { "true" } else { value };
                config.disable = Some(flag.into());
            }
            // `[method] url`, validated when the rule is registered
            "remote" => config.remote = Some(RemoteSpec::Url(value.to_string())),
            "template" => config.template = true,
            other => debug!(tag = other, "Ignoring unknown annotation"),
        }
    }

    if config.url.is_none() {
        return Err(MockError::InvalidRule("annotation block has no @url".to_string()));
    }
    Ok(config)
}

/// Read one annotated rule file. The rule's payload is the file itself.
pub fn load_rule_file(path: &Path) -> anyhow::Result<RuleConfig> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule file: {}", path.display()))?;
    let config = parse_rule(&source)
        .with_context(|| format!("Invalid rule file: {}", path.display()))?;
    Ok(config.with_file(path))
}

/// Read every annotated rule file in `dir`, in file name order. Files without
/// an annotation block are skipped.
pub fn load_rule_dir(dir: &Path) -> anyhow::Result<Vec<RuleConfig>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read rule directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut rules = Vec::new();
    for path in paths {
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable rule file");
                continue;
            }
        };
        if split(&source).is_none() {
            debug!(path = %path.display(), "Skipping file without annotation block");
            continue;
        }
        let config = parse_rule(&source)
            .with_context(|| format!("Invalid rule file: {}", path.display()))?;
        rules.push(config.with_file(path));
    }
    Ok(rules)
}
