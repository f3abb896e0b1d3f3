//! Extraction rules
//!
//! A rule string is classified once into one of four kinds:
//! - `//h1[@class='title']` - path query
//! - `/Members: (\d+)/` - pattern over the text content
//! - `.item a::attr(href)::all` - selector with chained modifiers
//! - `h1.title` - plain CSS selector (everything else)

mod eval;
mod path;

pub use eval::{evaluate, RawValue, Scope};
pub use path::{compile_path, CompiledPath};

pub(crate) use eval::compile_selector;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use thiserror::Error;

use crate::error::FailureCategory;

/// Delimiter between a base selector and its modifiers
pub const MODIFIER_DELIMITER: &str = "::";

/// Parsed extraction rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionRule {
    Selector {
        selector: String,
    },
    Path {
        path: String,
    },
    Pattern {
        pattern: String,
    },
    Chained {
        base_selector: String,
        modifiers: Vec<Modifier>,
    },
}

/// Post-processing step applied to the nodes matched by a chained rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    /// Element text content
    Text,
    /// Attribute value
    Attr { name: String },
    /// "true"/"false" depending on whether anything matched
    Exists,
    /// Keep every match as an array
    All,
    /// Token that is none of the above; evaluation fails on it
    Unrecognized(String),
}

/// Engine-level failure while compiling or evaluating a rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unsupported path query `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("unrecognized modifier `{0}`")]
    UnknownModifier(String),
}

impl RuleError {
    pub fn category(&self) -> FailureCategory {
        FailureCategory::ExtractionRuleError
    }
}

/// Classify a rule string.
///
/// Total: every input maps to some rule. Malformed input is kept as-is and
/// reported when the rule is evaluated.
pub fn parse_rule(raw: &str) -> ExtractionRule {
    let rule = raw.trim();

    if rule.starts_with("//") {
        return ExtractionRule::Path {
            path: rule.to_string(),
        };
    }

    if rule.len() >= 2 && rule.starts_with('/') && rule.ends_with('/') {
        return ExtractionRule::Pattern {
            pattern: rule[1..rule.len() - 1].to_string(),
        };
    }

    if let Some((base, chain)) = rule.split_once(MODIFIER_DELIMITER) {
        return ExtractionRule::Chained {
            base_selector: base.trim().to_string(),
            modifiers: chain.split(MODIFIER_DELIMITER).map(parse_modifier).collect(),
        };
    }

    ExtractionRule::Selector {
        selector: rule.to_string(),
    }
}

fn parse_modifier(token: &str) -> Modifier {
    let token = token.trim();
    match token {
        "text" => Modifier::Text,
        "exists" => Modifier::Exists,
        "all" => Modifier::All,
        _ => token
            .strip_prefix("attr(")
            .and_then(|rest| rest.strip_suffix(')'))
            .map(|name| name.trim().trim_matches(|c| c == '"' || c == '\''))
            .filter(|name| !name.is_empty())
            .map(|name| Modifier::Attr {
                name: name.to_string(),
            })
            .unwrap_or_else(|| Modifier::Unrecognized(token.to_string())),
    }
}

/// Read-through cache of parsed rules keyed by the raw rule string.
///
/// Entries are never replaced once inserted, so a cache can be shared
/// between extractors running in parallel.
#[derive(Debug, Default)]
pub struct RuleCache {
    rules: RwLock<HashMap<String, Arc<ExtractionRule>>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached rule for `raw`, parsing and inserting it on a miss
    pub fn get_or_parse(&self, raw: &str) -> Arc<ExtractionRule> {
        if let Ok(rules) = self.rules.read() {
            if let Some(rule) = rules.get(raw) {
                return Arc::clone(rule);
            }
        }

        let parsed = Arc::new(parse_rule(raw));

        // A poisoned lock only costs us the memoization
        match self.rules.write() {
            Ok(mut rules) => Arc::clone(
                rules
                    .entry(raw.to_string())
                    .or_insert_with(|| Arc::clone(&parsed)),
            ),
            Err(_) => parsed,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.read().map(|rules| rules.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
