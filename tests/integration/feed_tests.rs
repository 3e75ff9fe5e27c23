//! End-to-end runs over RSS and Atom feeds

use crate::common::{memory_store, mount_no_robots, pipeline, seed_document, test_config};
use sumi_harvest::state::SkipReason;
use sumi_harvest::storage::Store;
use sumi_harvest::{Identity, Target, TargetOutcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(base: &str, slugs: &[&str]) -> String {
    let items: String = slugs
        .iter()
        .map(|slug| {
            format!(
                "<item><title>Story {slug}</title><link>{base}/posts/{slug}</link>\
                 <description>About {slug}</description></item>"
            )
        })
        .collect();
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>News</title>\
         <description>Latest</description>{items}</channel></rss>"
    )
}

async fn mount_feed(server: &MockServer, feed_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(feed_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "application/rss+xml"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_feed_entries_are_stored_once() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_no_robots(&server).await;
    mount_feed(&server, "/rss", rss(&base, &["a", "b", "c"])).await;

    let store = memory_store();
    let config = test_config(1);
    let feed_url = format!("{}/rss", base);

    let first = pipeline(&config, store.clone())
        .run(vec![Target::feed(feed_url.clone())])
        .await
        .unwrap();
    assert_eq!(
        first.outcome_for(&feed_url),
        Some(&TargetOutcome::Recorded { written: 3 })
    );
    assert_eq!(first.metrics.success, 1);
    assert_eq!(first.metrics.records_written, 3);
    assert_eq!(store.count_documents().unwrap(), 3);

    let entry = store
        .get_document(&Identity::from_url(&format!("{}/posts/b", base)))
        .unwrap()
        .unwrap();
    assert_eq!(entry.title, "Story b");
    assert_eq!(entry.content, "About b");

    let second = pipeline(&config, store.clone())
        .run(vec![Target::feed(feed_url.clone())])
        .await
        .unwrap();
    assert_eq!(
        second.outcome_for(&feed_url),
        Some(&TargetOutcome::Skipped(SkipReason::Duplicate))
    );
    assert_eq!(second.metrics.records_written, 0);
    assert_eq!(store.count_documents().unwrap(), 3);
}

#[tokio::test]
async fn test_feed_writes_only_new_entries() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_no_robots(&server).await;
    mount_feed(&server, "/rss", rss(&base, &["old", "new"])).await;

    let store = memory_store();
    seed_document(store.clone(), &format!("{}/posts/old", base));

    let feed_url = format!("{}/rss", base);
    let report = pipeline(&test_config(1), store.clone())
        .run(vec![Target::feed(feed_url.clone())])
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&feed_url),
        Some(&TargetOutcome::Recorded { written: 1 })
    );
    assert_eq!(store.count_documents().unwrap(), 2);
}

#[tokio::test]
async fn test_empty_feed_is_skipped() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_no_robots(&server).await;
    mount_feed(&server, "/rss", rss(&base, &[])).await;

    let feed_url = format!("{}/rss", base);
    let report = pipeline(&test_config(1), memory_store())
        .run(vec![Target::feed(feed_url.clone())])
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&feed_url),
        Some(&TargetOutcome::Skipped(SkipReason::NoEntries))
    );
    assert_eq!(report.metrics.skipped, 1);
}

#[tokio::test]
async fn test_html_served_as_feed_fails() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    mount_feed(
        &server,
        "/not-a-feed",
        "<html><body>Just a page</body></html>".to_string(),
    )
    .await;

    let feed_url = format!("{}/not-a-feed", server.uri());
    let report = pipeline(&test_config(1), memory_store())
        .run(vec![Target::feed(feed_url.clone())])
        .await
        .unwrap();

    assert!(matches!(
        report.outcome_for(&feed_url),
        Some(TargetOutcome::Failed { .. })
    ));
    assert!(report.aborted.is_none());
}

#[tokio::test]
async fn test_atom_feed_entries_are_stored() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_no_robots(&server).await;
    let atom = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
          <title>Posts</title>
          <entry><title>One</title><link rel="alternate" href="{base}/p/1"/><summary>First</summary></entry>
          <entry><title>Two</title><link href="{base}/p/2"/><summary>Second</summary></entry>
        </feed>"#
    );
    mount_feed(&server, "/atom", atom).await;

    let store = memory_store();
    let report = pipeline(&test_config(1), store.clone())
        .run(vec![Target::feed(format!("{}/atom", base))])
        .await
        .unwrap();

    assert_eq!(report.metrics.records_written, 2);
    let second = store
        .get_document(&Identity::from_url(&format!("{}/p/2", base)))
        .unwrap()
        .unwrap();
    assert_eq!(second.title, "Two");
}
