//! Single-page extraction for structured site profiles
//!
//! Fetches a page (with retries and backoff), runs a profile's rules over it
//! and assembles a report:
//! - CSS selectors (`h1.title`)
//! - path queries (`//div[@id='contact']/p`)
//! - patterns over the page text (`/(\d+) members/`)
//! - chained modifiers (`.gallery img::attr(src)::all`)
//! - repeated items ("catalogues") evaluated per container
//!
//! Extracted strings are coerced to booleans, numbers, lists or strings.

pub mod coerce;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod profile;
pub mod report;
pub mod rules;

pub use coerce::{coerce, Number, TypedValue};
pub use error::FailureCategory;
pub use extract::{Extraction, Extractor, FieldGroup, FieldMap, FieldOutcome, FieldStatus};
pub use fetch::{
    CancelToken, FetchError, FetchOptions, FetchOutcome, Fetcher, Sleeper, ThreadSleeper,
};
pub use pipeline::Scraper;
pub use profile::{CatalogueSpec, FieldSpec, ProfileError, SiteProfile};
pub use report::{assemble, ExtractionReport, FieldStatusSummary};
pub use rules::{parse_rule, ExtractionRule, Modifier, RuleCache, RuleError};
