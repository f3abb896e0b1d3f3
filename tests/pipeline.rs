use std::sync::{Arc, Mutex};
use std::time::Duration;

use page_extract::{
    CatalogueSpec, Extractor, FailureCategory, FetchError, Fetcher, FieldStatus, Scraper,
    SiteProfile, Sleeper, TypedValue,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scraper talking to a local mock server without sleeping between retries
fn scraper() -> (Scraper, Arc<RecordingSleeper>) {
    init_logging();
    let agent = ureq::Agent::new_with_config(
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .proxy(None)
            .build(),
    );
    let sleeper = Arc::new(RecordingSleeper::default());
    let fetcher = Fetcher::with_agent(agent).with_sleeper(sleeper.clone());
    (Scraper::with_parts(fetcher, Extractor::new()), sleeper)
}

const SPACE_PAGE: &str = r#"
<html>
<head><title>Fab Lab Süd</title></head>
<body>
    <header><img class="logo" src="/logo.svg"></header>
    <h1 class="title">Fab Lab Süd</h1>
    <span class="status">yes</span>
    <p class="about">Founded 2012. We have 85 Members and a wood shop.</p>
    <a class="site" href="https://x.io">x</a>
    <div id="contact"><p>Hauptstraße 1</p></div>
    <ul class="areas"><li>wood</li><li>laser</li><li>electronics</li></ul>
    <div class="row"><span class="name">Epilog Zing</span><span class="kind">laser</span></div>
    <div class="row"><p>Coming soon</p></div>
    <div class="row"><span class="name">Prusa MK4</span><a class="book" href="/book/2">book</a></div>
</body>
</html>
"#;

const SPACE_PROFILE: &str = r#"
site_type = "fablab"
max_retries = 2

[fields.priority]
name = "h1.title"
open = ".status::text"
members = "/(\\d+) members/"

[fields.extra]
website = "a.site::attr(href)"
logo = "header img::attr(src)"
address = "//div[@id='contact']/p"
areas = "ul.areas li::all"
phone = ".phone"

[catalogue]
item_selector = ".row"
output_name = "machines"

[catalogue.fields]
name = ".name"
kind = ".kind"
bookable = ".book::exists"
"#;

#[test]
fn test_full_profile_against_mock_site() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/fablab-sued")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(SPACE_PAGE)
        .create();

    let profile = SiteProfile::from_toml_str(SPACE_PROFILE).unwrap();
    let (scraper, sleeper) = scraper();
    let report = scraper.scrape(&format!("{}/fablab-sued", server.url()), &profile);

    mock.assert();
    assert!(report.success);
    assert_eq!(report.failure_reason, None);
    assert_eq!(report.site_type, "fablab");
    assert_eq!(report.fetch_attempts, 1);
    assert!(sleeper.slept.lock().unwrap().is_empty());

    let priority = &report.priority_fields;
    assert_eq!(priority["name"], TypedValue::String("Fab Lab Süd".into()));
    assert_eq!(priority["open"], TypedValue::Bool(true));
    assert_eq!(priority["members"], TypedValue::from(85));

    let extra = &report.extra_fields;
    assert_eq!(extra["website"], TypedValue::String("https://x.io".into()));
    assert_eq!(extra["logo"], TypedValue::String("/logo.svg".into()));
    assert_eq!(extra["address"], TypedValue::String("Hauptstraße 1".into()));
    assert_eq!(
        extra["areas"],
        TypedValue::List(vec!["wood".into(), "laser".into(), "electronics".into()])
    );
    assert!(!extra.contains_key("phone"));

    // `bookable` always yields a value, so even the middle row is kept
    let items = report.catalogue_items.as_ref().unwrap();
    assert_eq!(report.catalogue_name.as_deref(), Some("machines"));
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["name"], TypedValue::String("Epilog Zing".into()));
    assert_eq!(items[0]["bookable"], TypedValue::Bool(false));
    assert_eq!(items[1].len(), 1);
    assert_eq!(items[2]["bookable"], TypedValue::Bool(true));

    let summary = report.field_summary();
    assert_eq!(
        summary.extracted,
        vec!["name", "open", "members", "website", "logo", "address", "areas"]
    );
    assert!(summary.failed.is_empty());
    assert_eq!(summary.not_found, vec!["phone"]);
}

#[test]
fn test_boolean_field() {
    let (scraper, _) = scraper();
    let profile = SiteProfile::new("x").priority("open", ".status::text");

    let report = scraper.extract_html(
        "https://x.io",
        r#"<span class="status">yes</span>"#,
        &profile,
    );

    assert_eq!(report.priority_fields["open"], TypedValue::Bool(true));
    assert_eq!(report.field_statuses[0].status, FieldStatus::Extracted);
}

#[test]
fn test_attribute_extraction() {
    let (scraper, _) = scraper();
    let profile = SiteProfile::new("x").priority("link", "a::attr(href)");

    let report = scraper.extract_html("https://x.io", r#"<a href="https://x.io">x</a>"#, &profile);

    assert_eq!(
        report.priority_fields["link"],
        TypedValue::String("https://x.io".into())
    );
}

#[test]
fn test_catalogue_with_partial_item() {
    let (scraper, _) = scraper();
    let html = r#"
        <div class="row"><span class="name">first</span></div>
        <div class="row"><span class="other">second</span></div>
        <div class="row"><span class="name">third</span></div>
    "#;
    let profile = SiteProfile::new("x")
        .with_catalogue(CatalogueSpec::new(".row", "rows").field("name", ".name"));

    let report = scraper.extract_html("https://x.io", html, &profile);

    let items = report.catalogue_items.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["name"], TypedValue::String("first".into()));
    assert_eq!(items[1]["name"], TypedValue::String("third".into()));
    // Catalogue results alone never make a run successful
    assert!(!report.success);
}

#[test]
fn test_retry_then_succeed() {
    let mut server = mockito::Server::new();
    let unavailable = server.mock("GET", "/").with_status(503).expect(2).create();
    let ok = server
        .mock("GET", "/")
        .with_status(200)
        .with_body("<html><h1>ok</h1></html>")
        .expect(1)
        .create();

    let (scraper, sleeper) = scraper();
    let profile = SiteProfile::new("x")
        .priority("heading", "h1")
        .with_fetch(Duration::from_secs(5), 2, 2.0);

    let report = scraper.scrape(&server.url(), &profile);

    unavailable.assert();
    ok.assert();
    assert!(report.success);
    assert_eq!(report.fetch_attempts, 3);
    assert_eq!(
        *sleeper.slept.lock().unwrap(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[test]
fn test_terminal_not_found() {
    let mut server = mockito::Server::new();
    let mock = server.mock("GET", "/gone").with_status(404).expect(1).create();

    let (scraper, sleeper) = scraper();
    let profile = SiteProfile::new("x")
        .priority("heading", "h1")
        .with_fetch(Duration::from_secs(5), 3, 2.0);

    let report = scraper.scrape(&format!("{}/gone", server.url()), &profile);

    mock.assert();
    assert!(!report.success);
    assert_eq!(report.fetch_attempts, 1);
    assert_eq!(report.failure_reason, Some(FailureCategory::NetworkError));
    assert_eq!(report.error, Some(FetchError::ClientStatus(404).to_string()));
    assert!(report.field_statuses.is_empty());
    assert!(sleeper.slept.lock().unwrap().is_empty());
}

#[test]
fn test_broken_rule_is_reported_not_raised() {
    let (scraper, _) = scraper();
    let profile = SiteProfile::new("x")
        .priority("members", "/(\\d+ members/")
        .priority("count", ".count::number");

    let report = scraper.extract_html("https://x.io", "<p>12 members</p>", &profile);

    assert!(!report.success);
    assert_eq!(report.failure_reason, Some(FailureCategory::ExtractionRuleError));
    assert_eq!(report.field_summary().failed, vec!["members", "count"]);
}
