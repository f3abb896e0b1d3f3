//! Per-field and per-item extraction over a parsed page

use std::sync::Arc;

use indexmap::IndexMap;
use scraper::Html;
use serde::Serialize;
use tracing::{debug, warn};

use crate::coerce::TypedValue;
use crate::error::FailureCategory;
use crate::profile::{CatalogueSpec, FieldSpec, SiteProfile};
use crate::rules::{compile_selector, evaluate, RuleCache, Scope};

/// Extracted values keyed by field name, in declaration order
pub type FieldMap = IndexMap<String, TypedValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Priority,
    Extra,
    Catalogue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldStatus {
    Extracted,
    Failed {
        category: FailureCategory,
        message: String,
    },
    NotFound,
}

/// What happened to one declared field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOutcome {
    pub name: String,
    pub group: FieldGroup,
    pub value: Option<TypedValue>,
    #[serde(flatten)]
    pub status: FieldStatus,
}

impl FieldOutcome {
    pub fn is_extracted(&self) -> bool {
        self.status == FieldStatus::Extracted
    }

    pub fn failure_category(&self) -> Option<FailureCategory> {
        match &self.status {
            FieldStatus::Failed { category, .. } => Some(*category),
            _ => None,
        }
    }
}

/// Everything pulled out of one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub priority_fields: FieldMap,
    pub extra_fields: FieldMap,
    /// `output_name` of the catalogue, when the profile has one
    pub catalogue_name: Option<String>,
    pub catalogue_items: Option<Vec<FieldMap>>,
    /// Priority fields then extra fields, in declaration order
    pub field_statuses: Vec<FieldOutcome>,
}

impl Extraction {
    pub fn has_priority_success(&self) -> bool {
        self.field_statuses
            .iter()
            .any(|o| o.group == FieldGroup::Priority && o.is_extracted())
    }
}

/// Runs a profile's rules against documents.
///
/// Parsed rules are memoized in a [`RuleCache`], which can be shared
/// between extractors.
#[derive(Debug, Default, Clone)]
pub struct Extractor {
    cache: Arc<RuleCache>,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: Arc<RuleCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    /// Extract every declared field. A failing field never stops its siblings.
    pub fn extract(&self, document: &Html, profile: &SiteProfile) -> Extraction {
        let scope = Scope::Document(document);
        let mut extraction = Extraction::default();

        let groups = [
            (FieldGroup::Priority, &profile.priority),
            (FieldGroup::Extra, &profile.extra),
        ];
        for (group, specs) in groups {
            for spec in specs {
                let outcome = self.extract_field(spec, group, scope);
                if let Some(value) = &outcome.value {
                    let map = match group {
                        FieldGroup::Priority => &mut extraction.priority_fields,
                        _ => &mut extraction.extra_fields,
                    };
                    map.insert(spec.name.clone(), value.clone());
                }
                extraction.field_statuses.push(outcome);
            }
        }

        if let Some(catalogue) = &profile.catalogue {
            extraction.catalogue_name = Some(catalogue.output_name.clone());
            extraction.catalogue_items = Some(self.extract_catalogue(document, catalogue));
        }

        extraction
    }

    /// Evaluate one field within `scope`
    pub fn extract_field(
        &self,
        spec: &FieldSpec,
        group: FieldGroup,
        scope: Scope<'_>,
    ) -> FieldOutcome {
        let rule = self.cache.get_or_parse(&spec.rule);

        let (value, status) = match evaluate(&rule, scope) {
            Ok(Some(raw)) => (Some(raw.into_typed()), FieldStatus::Extracted),
            Ok(None) => (None, FieldStatus::NotFound),
            Err(e) => {
                warn!(
                    field = %spec.name,
                    rule = %spec.rule,
                    error = %e,
                    "field extraction failed"
                );
                (
                    None,
                    FieldStatus::Failed {
                        category: e.category(),
                        message: e.to_string(),
                    },
                )
            }
        };
        debug!(field = %spec.name, ?group, ?status, "field evaluated");

        FieldOutcome {
            name: spec.name.clone(),
            group,
            value,
            status,
        }
    }

    /// One map per `item_selector` match, in document order. Items with no
    /// extracted field are dropped.
    pub fn extract_catalogue(&self, document: &Html, catalogue: &CatalogueSpec) -> Vec<FieldMap> {
        let selector = match compile_selector(&catalogue.item_selector) {
            Ok(selector) => selector,
            Err(e) => {
                warn!(catalogue = %catalogue.output_name, error = %e, "invalid item selector");
                return Vec::new();
            }
        };

        let mut items = Vec::new();
        for (index, container) in document.select(&selector).enumerate() {
            let scope = Scope::Element(container);
            let mut item = FieldMap::new();

            for spec in &catalogue.fields {
                let outcome = self.extract_field(spec, FieldGroup::Catalogue, scope);
                if let Some(value) = outcome.value {
                    item.insert(outcome.name, value);
                }
            }

            if item.is_empty() {
                debug!(catalogue = %catalogue.output_name, index, "dropping empty item");
            } else {
                items.push(item);
            }
        }
        items
    }
}
