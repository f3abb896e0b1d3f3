//! Site profiles: which fields to extract from a page and how to fetch it
//!
//! Profiles are usually written as TOML:
//!
//! ```toml
//! site_type = "makerspace"
//! timeout_seconds = 20
//! max_retries = 2
//!
//! [fields.priority]
//! name = "h1.title"
//! members = "/(\\d+) members/"
//!
//! [fields.extra]
//! logo = "header img::attr(src)"
//!
//! [catalogue]
//! item_selector = ".machine"
//! output_name = "machines"
//!
//! [catalogue.fields]
//! model = ".model"
//! bookable = ".book::exists"
//! ```

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::FetchOptions;
use crate::rules::{parse_rule, ExtractionRule, RuleError};

pub const DEFAULT_SITE_TYPE: &str = "unknown";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Named rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Rule source text, parsed through the extractor's rule cache
    pub rule: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rule: rule.into(),
        }
    }

    pub fn parsed_rule(&self) -> ExtractionRule {
        parse_rule(&self.rule)
    }
}

/// Repeated-item extraction: every `item_selector` match is one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueSpec {
    pub item_selector: String,
    pub output_name: String,
    #[serde(
        default,
        deserialize_with = "field_table",
        serialize_with = "write_field_table"
    )]
    pub fields: Vec<FieldSpec>,
}

impl CatalogueSpec {
    pub fn new(item_selector: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            item_selector: item_selector.into(),
            output_name: output_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, rule: impl Into<String>) -> Self {
        self.fields.push(FieldSpec::new(name, rule));
        self
    }
}

/// Everything one extraction run needs to know about a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProfileDocument", into = "ProfileDocument")]
pub struct SiteProfile {
    pub site_type: String,
    /// Drive the success flag, in declaration order
    pub priority: Vec<FieldSpec>,
    /// Informational only, in declaration order
    pub extra: Vec<FieldSpec>,
    pub catalogue: Option<CatalogueSpec>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            site_type: DEFAULT_SITE_TYPE.to_string(),
            priority: Vec::new(),
            extra: Vec::new(),
            catalogue: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid profile document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("field `{field}` has an invalid rule: {source}")]
    InvalidRule {
        field: String,
        #[source]
        source: RuleError,
    },

    #[error("duplicate field name `{0}`")]
    DuplicateField(String),

    #[error("field names must not be empty")]
    EmptyFieldName,

    #[error("{0}")]
    Invalid(String),
}

impl SiteProfile {
    pub fn new(site_type: impl Into<String>) -> Self {
        Self {
            site_type: site_type.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML profile and validate it
    pub fn from_toml_str(s: &str) -> Result<Self, ProfileError> {
        let profile: SiteProfile = toml::from_str(s)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn priority(mut self, name: impl Into<String>, rule: impl Into<String>) -> Self {
        self.priority.push(FieldSpec::new(name, rule));
        self
    }

    pub fn extra(mut self, name: impl Into<String>, rule: impl Into<String>) -> Self {
        self.extra.push(FieldSpec::new(name, rule));
        self
    }

    pub fn with_catalogue(mut self, catalogue: CatalogueSpec) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    pub fn with_fetch(mut self, timeout: Duration, max_retries: u32, backoff_factor: f64) -> Self {
        self.timeout = timeout;
        self.max_retries = max_retries;
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::new(self.timeout, self.max_retries, self.backoff_factor)
    }

    /// Check the profile before it is handed to the pipeline.
    ///
    /// The pipeline tolerates invalid profiles (bad rules become failed
    /// fields), so this is where configuration mistakes are caught early.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.timeout < Duration::from_secs(1) {
            return Err(ProfileError::Invalid(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ProfileError::Invalid(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }

        check_fields(self.priority.iter().chain(&self.extra))?;

        if let Some(catalogue) = &self.catalogue {
            if catalogue.output_name.trim().is_empty() {
                return Err(ProfileError::Invalid(
                    "catalogue output_name must not be empty".to_string(),
                ));
            }
            ExtractionRule::Selector {
                selector: catalogue.item_selector.clone(),
            }
            .check()
            .map_err(|source| ProfileError::InvalidRule {
                field: catalogue.output_name.clone(),
                source,
            })?;
            if catalogue.fields.is_empty() {
                return Err(ProfileError::Invalid(format!(
                    "catalogue `{}` declares no fields",
                    catalogue.output_name
                )));
            }
            check_fields(catalogue.fields.iter())?;
        }

        Ok(())
    }
}

fn check_fields<'a>(fields: impl Iterator<Item = &'a FieldSpec>) -> Result<(), ProfileError> {
    let mut seen = HashSet::new();
    for spec in fields {
        if spec.name.trim().is_empty() {
            return Err(ProfileError::EmptyFieldName);
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(ProfileError::DuplicateField(spec.name.clone()));
        }
        spec.parsed_rule()
            .check()
            .map_err(|source| ProfileError::InvalidRule {
                field: spec.name.clone(),
                source,
            })?;
    }
    Ok(())
}

/// On-disk shape of a profile; scalars come before tables
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileDocument {
    #[serde(default = "default_site_type")]
    site_type: String,
    #[serde(default = "default_timeout_secs")]
    timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_backoff_factor")]
    backoff_factor: f64,
    #[serde(default)]
    fields: FieldGroups,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalogue: Option<CatalogueSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FieldGroups {
    #[serde(
        default,
        deserialize_with = "field_table",
        serialize_with = "write_field_table"
    )]
    priority: Vec<FieldSpec>,
    #[serde(
        default,
        deserialize_with = "field_table",
        serialize_with = "write_field_table"
    )]
    extra: Vec<FieldSpec>,
}

impl From<ProfileDocument> for SiteProfile {
    fn from(doc: ProfileDocument) -> Self {
        Self {
            site_type: doc.site_type,
            priority: doc.fields.priority,
            extra: doc.fields.extra,
            catalogue: doc.catalogue,
            timeout: Duration::from_secs(doc.timeout_seconds),
            max_retries: doc.max_retries,
            backoff_factor: doc.backoff_factor,
        }
    }
}

impl From<SiteProfile> for ProfileDocument {
    fn from(profile: SiteProfile) -> Self {
        Self {
            site_type: profile.site_type,
            timeout_seconds: profile.timeout.as_secs(),
            max_retries: profile.max_retries,
            backoff_factor: profile.backoff_factor,
            fields: FieldGroups {
                priority: profile.priority,
                extra: profile.extra,
            },
            catalogue: profile.catalogue,
        }
    }
}

fn default_site_type() -> String {
    DEFAULT_SITE_TYPE.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

/// `name = "rule"` table, kept in document order
fn field_table<'de, D>(deserializer: D) -> Result<Vec<FieldSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FieldTable;

    impl<'de> Visitor<'de> for FieldTable {
        type Value = Vec<FieldSpec>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a table of `field name = \"rule\"` pairs")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut fields = Vec::new();
            while let Some((name, rule)) = map.next_entry::<String, String>()? {
                fields.push(FieldSpec { name, rule });
            }
            Ok(fields)
        }
    }

    deserializer.deserialize_map(FieldTable)
}

fn write_field_table<S>(fields: &[FieldSpec], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for spec in fields {
        map.serialize_entry(&spec.name, &spec.rule)?;
    }
    map.end()
}
