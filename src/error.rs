//! Failure taxonomy shared by the fetch, rule and report layers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a failed fetch, field or run.
///
/// Categories are stable strings: downstream tooling groups reports by them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Fetch exceeded its deadline on the final attempt
    NetworkTimeout,
    /// Connection-level failure or HTTP error status on the final attempt
    NetworkError,
    /// Fetched content could not be turned into a queryable document
    ParseError,
    /// Fetch succeeded but the body was empty
    NoContent,
    /// Invalid input (URL) or a downstream value constraint
    ValidationError,
    /// A rule raised an engine-level error against the document
    ExtractionRuleError,
    /// Nothing failed outright, but no priority field was extracted
    NoFieldsExtracted,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::NetworkTimeout => "network_timeout",
            FailureCategory::NetworkError => "network_error",
            FailureCategory::ParseError => "parse_error",
            FailureCategory::NoContent => "no_content",
            FailureCategory::ValidationError => "validation_error",
            FailureCategory::ExtractionRuleError => "extraction_rule_error",
            FailureCategory::NoFieldsExtracted => "no_fields_extracted",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_names_match_display() {
        let all = [
            FailureCategory::NetworkTimeout,
            FailureCategory::NetworkError,
            FailureCategory::ParseError,
            FailureCategory::NoContent,
            FailureCategory::ValidationError,
            FailureCategory::ExtractionRuleError,
            FailureCategory::NoFieldsExtracted,
            FailureCategory::Unknown,
        ];

        for category in all {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category));
        }
    }
}
