//! URL + profile in, report out

use std::time::{Duration, Instant};

use scraper::Html;
use tracing::info;

use crate::extract::{Extraction, Extractor};
use crate::fetch::{CancelToken, FetchOutcome, Fetcher};
use crate::profile::SiteProfile;
use crate::report::{assemble, ExtractionReport};

/// Fetches pages and runs a site profile over them.
///
/// Every failure ends up in the returned report; nothing here panics or
/// returns an error.
#[derive(Debug, Default)]
pub struct Scraper {
    fetcher: Fetcher,
    extractor: Extractor,
    deadline: Option<Duration>,
}

impl Scraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parts(fetcher: Fetcher, extractor: Extractor) -> Self {
        Self {
            fetcher,
            extractor,
            deadline: None,
        }
    }

    /// Bound each fetch, retries and backoff included
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn scrape(&self, url: &str, profile: &SiteProfile) -> ExtractionReport {
        self.scrape_with_cancel(url, profile, &CancelToken::new())
    }

    pub fn scrape_with_cancel(
        &self,
        url: &str,
        profile: &SiteProfile,
        cancel: &CancelToken,
    ) -> ExtractionReport {
        let started = Instant::now();

        let mut options = profile.fetch_options();
        options.deadline = self.deadline;
        let fetch = self.fetcher.fetch_with(url, &options, cancel);

        self.finish(&fetch, profile, started)
    }

    /// Run extraction over content that was already fetched
    pub fn extract_html(&self, url: &str, html: &str, profile: &SiteProfile) -> ExtractionReport {
        let started = Instant::now();
        let fetch = FetchOutcome::from_content(url, html);
        self.finish(&fetch, profile, started)
    }

    fn finish(
        &self,
        fetch: &FetchOutcome,
        profile: &SiteProfile,
        started: Instant,
    ) -> ExtractionReport {
        let extraction = self.extract_content(fetch, profile);
        let report = assemble(fetch, extraction, started, &profile.site_type);

        info!(
            url = %report.url,
            site_type = %report.site_type,
            success = report.success,
            failure_reason = ?report.failure_reason,
            attempts = report.fetch_attempts,
            duration = ?report.duration,
            "extraction finished"
        );
        report
    }

    fn extract_content(&self, fetch: &FetchOutcome, profile: &SiteProfile) -> Option<Extraction> {
        if !fetch.is_success() || !fetch.has_content() {
            return None;
        }
        let content = fetch.content.as_deref()?;
        let document = Html::parse_document(content);
        Some(self.extractor.extract(&document, profile))
    }
}
