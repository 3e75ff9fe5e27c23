//! Shared fixtures for the integration tests

use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::{
    CollectorConfig, Config, NotifierConfig, OutputConfig, UserAgentConfig,
};
use sumi_harvest::storage::Store;
use sumi_harvest::{DedupGate, DedupOutcome, Document, Identity, Pipeline, SqliteStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a configuration with short backoffs suitable for tests
pub fn test_config(max_concurrent: u32) -> Config {
    Config {
        collector: CollectorConfig {
            max_concurrent,
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 10,
            max_backoff_ms: 50,
            robots_cache_ttl_secs: 3_600,
            robots_timeout_secs: 5,
            respect_robots: true,
            min_domain_interval_ms: 0,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        output: OutputConfig {
            database_path: ":memory:".to_string(),
        },
        notifier: NotifierConfig::default(),
        targets: Vec::new(),
        feeds: Vec::new(),
    }
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new_in_memory().expect("in-memory store"))
}

pub fn pipeline(config: &Config, store: Arc<dyn Store>) -> Pipeline {
    Pipeline::new(config, store).expect("pipeline builds")
}

/// Serves robots.txt as a 404, which allows everything
pub async fn mount_no_robots(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

pub async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(server)
        .await;
}

pub fn html_page(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><p>{}</p></body></html>",
        title, body
    )
}

pub async fn mount_page(server: &MockServer, page_path: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html_page(title, "Some words worth keeping."))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

/// Stores a document for `url` as if an earlier run had collected it
pub fn seed_document(store: Arc<dyn Store>, url: &str) {
    let gate = DedupGate::new(store);
    let outcome = gate
        .check_and_reserve(&Identity::from_url(url), url)
        .expect("reserve");
    let DedupOutcome::Fresh(reservation) = outcome else {
        panic!("{} was already stored", url);
    };

    let document = Document {
        url: url.to_string(),
        title: "Seeded".to_string(),
        content: "Stored by an earlier run".to_string(),
        extracted_links: Default::default(),
        collected_at: chrono::Utc::now(),
        canonical_url: None,
        entries: Vec::new(),
    };
    reservation.commit(&document).expect("commit");
}

/// Number of requests the server received for `request_path`
pub async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == request_path)
        .count()
}

/// Waits until the server has seen `count` requests for paths other than robots.txt
pub async fn wait_for_page_requests(server: &MockServer, count: usize) {
    let poll = async {
        loop {
            let seen = server
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .filter(|request| request.url.path() != "/robots.txt")
                .count();
            if seen >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("requests did not arrive in time");
}
