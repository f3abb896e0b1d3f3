//! Final per-URL report

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::FailureCategory;
use crate::extract::{Extraction, FieldGroup, FieldMap, FieldOutcome, FieldStatus};
use crate::fetch::FetchOutcome;

/// Outcome of one extraction run, ready to hand to a serializer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub url: String,
    pub site_type: String,
    /// At least one priority field was extracted
    pub success: bool,
    pub failure_reason: Option<FailureCategory>,
    /// Human-readable detail for `failure_reason`
    pub error: Option<String>,
    pub priority_fields: FieldMap,
    pub extra_fields: FieldMap,
    pub catalogue_name: Option<String>,
    pub catalogue_items: Option<Vec<FieldMap>>,
    pub field_statuses: Vec<FieldOutcome>,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    pub fetch_attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Field names grouped by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldStatusSummary {
    pub extracted: Vec<String>,
    pub failed: Vec<String>,
    pub not_found: Vec<String>,
}

impl ExtractionReport {
    pub fn field_summary(&self) -> FieldStatusSummary {
        let mut summary = FieldStatusSummary::default();
        for outcome in &self.field_statuses {
            let list = match outcome.status {
                FieldStatus::Extracted => &mut summary.extracted,
                FieldStatus::Failed { .. } => &mut summary.failed,
                FieldStatus::NotFound => &mut summary.not_found,
            };
            list.push(outcome.name.clone());
        }
        summary
    }
}

/// Combine a fetch and the extraction run over its content.
///
/// `extraction` is ignored when the fetch failed or returned no content.
/// `started_at` is when the fetch was started.
pub fn assemble(
    fetch: &FetchOutcome,
    extraction: Option<Extraction>,
    started_at: Instant,
    site_type: &str,
) -> ExtractionReport {
    let mut report = ExtractionReport {
        url: fetch.url.clone(),
        site_type: site_type.to_string(),
        success: false,
        failure_reason: None,
        error: None,
        priority_fields: FieldMap::new(),
        extra_fields: FieldMap::new(),
        catalogue_name: None,
        catalogue_items: None,
        field_statuses: Vec::new(),
        duration: Duration::ZERO,
        fetch_attempts: fetch.attempts,
        timestamp: Utc::now(),
    };

    let failure = match (&fetch.error, extraction) {
        (Some(e), _) => Some((e.category(), e.to_string())),
        (None, _) if !fetch.has_content() => Some((
            FailureCategory::NoContent,
            "fetch returned empty content".to_string(),
        )),
        (None, None) => Some((
            FailureCategory::ParseError,
            "content could not be parsed".to_string(),
        )),
        (None, Some(extraction)) => {
            report.success = extraction.has_priority_success();
            let failure = (!report.success).then(|| priority_failure(&extraction.field_statuses));

            report.priority_fields = extraction.priority_fields;
            report.extra_fields = extraction.extra_fields;
            report.catalogue_name = extraction.catalogue_name;
            report.catalogue_items = extraction.catalogue_items;
            report.field_statuses = extraction.field_statuses;
            failure
        }
    };

    if let Some((category, message)) = failure {
        report.failure_reason = Some(category);
        report.error = Some(message);
    }
    report.duration = started_at.elapsed();
    report
}

/// Most specific reason no priority field was extracted
fn priority_failure(outcomes: &[FieldOutcome]) -> (FailureCategory, String) {
    let failed: Vec<&FieldOutcome> = outcomes
        .iter()
        .filter(|o| o.group == FieldGroup::Priority && o.failure_category().is_some())
        .collect();

    let Some(first) = failed.first() else {
        return (
            FailureCategory::NoFieldsExtracted,
            "no priority fields extracted".to_string(),
        );
    };

    let category = first.failure_category().unwrap_or(FailureCategory::Unknown);
    let shared = failed
        .iter()
        .all(|o| o.failure_category() == Some(category));

    let names: Vec<&str> = failed.iter().map(|o| o.name.as_str()).collect();
    let message = format!("priority fields failed: {}", names.join(", "));

    if shared {
        (category, message)
    } else {
        (FailureCategory::Unknown, message)
    }
}

fn duration_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::TypedValue;
    use crate::fetch::FetchError;

    fn fetched(content: &str) -> FetchOutcome {
        FetchOutcome {
            url: "https://example.com".into(),
            content: Some(content.into()),
            status_code: Some(200),
            duration: Duration::from_millis(5),
            attempts: 1,
            error: None,
        }
    }

    fn outcome(name: &str, group: FieldGroup, status: FieldStatus) -> FieldOutcome {
        let value = (status == FieldStatus::Extracted).then(|| TypedValue::String(name.into()));
        FieldOutcome {
            name: name.into(),
            group,
            value,
            status,
        }
    }

    fn failed(category: FailureCategory) -> FieldStatus {
        FieldStatus::Failed {
            category,
            message: "boom".into(),
        }
    }

    fn extraction(outcomes: Vec<FieldOutcome>) -> Extraction {
        let mut extraction = Extraction::default();
        for o in &outcomes {
            if let Some(value) = &o.value {
                let map = match o.group {
                    FieldGroup::Priority => &mut extraction.priority_fields,
                    _ => &mut extraction.extra_fields,
                };
                map.insert(o.name.clone(), value.clone());
            }
        }
        extraction.field_statuses = outcomes;
        extraction
    }

    #[test]
    fn test_fetch_failure_short_circuits() {
        let fetch = FetchOutcome {
            url: "https://example.com/missing".into(),
            content: None,
            status_code: Some(404),
            duration: Duration::from_millis(3),
            attempts: 1,
            error: Some(FetchError::ClientStatus(404)),
        };
        let extraction = extraction(vec![outcome(
            "name",
            FieldGroup::Priority,
            FieldStatus::Extracted,
        )]);

        let report = assemble(&fetch, Some(extraction), Instant::now(), "fablab");

        assert!(!report.success);
        assert_eq!(report.failure_reason, Some(FailureCategory::NetworkError));
        assert_eq!(report.error.as_deref(), Some("client error: HTTP 404"));
        assert!(report.priority_fields.is_empty());
        assert!(report.field_statuses.is_empty());
        assert_eq!(report.fetch_attempts, 1);
        assert_eq!(report.site_type, "fablab");
    }

    #[test]
    fn test_empty_content() {
        let report = assemble(&fetched("  \n"), Some(Extraction::default()), Instant::now(), "x");
        assert!(!report.success);
        assert_eq!(report.failure_reason, Some(FailureCategory::NoContent));

        let report = assemble(&fetched("<p>hi</p>"), None, Instant::now(), "x");
        assert_eq!(report.failure_reason, Some(FailureCategory::ParseError));
    }

    #[test]
    fn test_success() {
        let extraction = extraction(vec![
            outcome("name", FieldGroup::Priority, FieldStatus::Extracted),
            outcome("members", FieldGroup::Priority, failed(FailureCategory::ExtractionRuleError)),
            outcome("logo", FieldGroup::Extra, FieldStatus::NotFound),
        ]);

        let report = assemble(&fetched("<h1>x</h1>"), Some(extraction), Instant::now(), "x");

        assert!(report.success);
        assert_eq!(report.failure_reason, None);
        assert_eq!(report.error, None);
        assert_eq!(report.priority_fields.len(), 1);
        assert_eq!(
            report.field_summary(),
            FieldStatusSummary {
                extracted: vec!["name".into()],
                failed: vec!["members".into()],
                not_found: vec!["logo".into()],
            }
        );
    }

    #[test]
    fn test_failure_reason() {
        let rule_error = failed(FailureCategory::ExtractionRuleError);
        let cases = vec![
            (
                vec![
                    outcome("a", FieldGroup::Priority, rule_error.clone()),
                    outcome("b", FieldGroup::Priority, FieldStatus::NotFound),
                ],
                FailureCategory::ExtractionRuleError,
            ),
            (
                vec![
                    outcome("a", FieldGroup::Priority, rule_error.clone()),
                    outcome("b", FieldGroup::Priority, failed(FailureCategory::ParseError)),
                ],
                FailureCategory::Unknown,
            ),
            (
                vec![
                    outcome("a", FieldGroup::Priority, FieldStatus::NotFound),
                    outcome("x", FieldGroup::Extra, rule_error.clone()),
                ],
                FailureCategory::NoFieldsExtracted,
            ),
            (vec![], FailureCategory::NoFieldsExtracted),
        ];

        for (outcomes, expected) in cases {
            let extraction = extraction(outcomes);
            let report = assemble(&fetched("<p/>"), Some(extraction), Instant::now(), "x");
            assert!(!report.success);
            assert_eq!(report.failure_reason, Some(expected));
            assert!(report.error.is_some());
        }
    }

    #[test]
    fn test_success_iff_priority_extracted() {
        let statuses = [
            FieldStatus::Extracted,
            FieldStatus::NotFound,
            failed(FailureCategory::ExtractionRuleError),
        ];
        let groups = [
            FieldGroup::Priority,
            FieldGroup::Priority,
            FieldGroup::Extra,
            FieldGroup::Extra,
        ];

        // Every assignment of statuses to two priority and two extra fields
        for combo in 0..statuses.len().pow(groups.len() as u32) {
            let mut n = combo;
            let outcomes: Vec<FieldOutcome> = groups
                .iter()
                .enumerate()
                .map(|(i, group)| {
                    let status = statuses[n % statuses.len()].clone();
                    n /= statuses.len();
                    outcome(&format!("f{i}"), *group, status)
                })
                .collect();
            let expected = outcomes
                .iter()
                .any(|o| o.group == FieldGroup::Priority && o.is_extracted());

            let mut extraction = extraction(outcomes);
            // Catalogue results never count
            extraction.catalogue_items = Some(vec![FieldMap::from([(
                "name".to_string(),
                TypedValue::Bool(true),
            )])]);

            let report = assemble(&fetched("<p/>"), Some(extraction), Instant::now(), "x");
            assert_eq!(report.success, expected, "combo {combo}");
            assert_eq!(report.failure_reason.is_none(), expected, "combo {combo}");
        }
    }

    #[test]
    fn test_serialization() {
        let extraction = extraction(vec![outcome(
            "name",
            FieldGroup::Priority,
            FieldStatus::Extracted,
        )]);
        let fetch = fetched("<h1>x</h1>");
        let mut report = assemble(&fetch, Some(extraction), Instant::now(), "makerspace");
        report.duration = Duration::from_millis(1500);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["failure_reason"], serde_json::Value::Null);
        assert_eq!(json["duration"], 1.5);
        assert_eq!(json["priority_fields"]["name"], "name");
        assert_eq!(json["field_statuses"][0]["status"], "extracted");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
