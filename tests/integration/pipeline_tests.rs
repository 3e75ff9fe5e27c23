//! End-to-end runs over pages

use crate::common::{
    memory_store, mount_no_robots, mount_page, mount_robots, pipeline, requests_to, seed_document,
    test_config, wait_for_page_requests,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_harvest::pipeline::{AbortReason, ParseError, Parser};
use sumi_harvest::state::SkipReason;
use sumi_harvest::storage::{RunStatus, Store};
use sumi_harvest::{Document, FailureKind, Identity, SqliteStore, Target, TargetKind, TargetOutcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_fresh_duplicate_and_flaky_targets() {
    let server = MockServer::start().await;
    let base = server.uri();
    mount_no_robots(&server).await;
    mount_page(&server, "/fresh", "Fresh page").await;
    mount_page(&server, "/seen", "Seen page").await;

    // First attempt plus three retries
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let store = memory_store();
    let seen_url = format!("{}/seen", base);
    seed_document(store.clone(), &seen_url);

    let config = test_config(3);
    let report = pipeline(&config, store.clone())
        .run(vec![
            Target::page(format!("{}/fresh", base)),
            Target::page(seen_url.clone()),
            Target::page(format!("{}/flaky", base)),
        ])
        .await
        .unwrap();

    assert!(report.aborted.is_none());
    assert_eq!(report.undispatched, 0);
    assert_eq!(report.metrics.total, 3);
    assert_eq!(report.metrics.success, 1);
    assert_eq!(report.metrics.skipped, 1);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.records_written, 1);

    assert_eq!(
        report.outcome_for(&format!("{}/fresh", base)),
        Some(&TargetOutcome::Recorded { written: 1 })
    );
    assert_eq!(
        report.outcome_for(&seen_url),
        Some(&TargetOutcome::Skipped(SkipReason::Duplicate))
    );
    assert_eq!(
        report.outcome_for(&format!("{}/flaky", base)),
        Some(&TargetOutcome::failed(FailureKind::Transient, "HTTP 500"))
    );

    assert_eq!(report.metrics.failures.len(), 1);
    assert_eq!(report.metrics.failures[0].url, format!("{}/flaky", base));
    assert_eq!(report.metrics.failures[0].reason, "HTTP 500");

    // The seeded document was not overwritten
    let stored = store
        .get_document(&Identity::from_url(&seen_url))
        .unwrap()
        .unwrap();
    assert_eq!(stored.title, "Seeded");

    let fresh = store
        .get_document(&Identity::from_url(&format!("{}/fresh", base)))
        .unwrap()
        .unwrap();
    assert_eq!(fresh.title, "Fresh page");
    assert_eq!(store.count_documents().unwrap(), 2);

    let run = store.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total, 3);
    assert_eq!(run.records_written, 1);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/gone", server.uri());
    let report = pipeline(&test_config(1), memory_store())
        .run(vec![Target::page(url.clone())])
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&url),
        Some(&TargetOutcome::failed(FailureKind::Fatal, "HTTP 404"))
    );
    assert_eq!(report.metrics.failed, 1);
}

#[tokio::test]
async fn test_robots_disallow_skips_without_fetching() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nDisallow: /private").await;
    mount_page(&server, "/public", "Public").await;
    Mock::given(method("GET"))
        .and(path("/private/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(0)
        .mount(&server)
        .await;

    let base = server.uri();
    let report = pipeline(&test_config(2), memory_store())
        .run(vec![
            Target::page(format!("{}/private/page", base)),
            Target::page(format!("{}/public", base)),
        ])
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&format!("{}/private/page", base)),
        Some(&TargetOutcome::Skipped(SkipReason::Disallowed))
    );
    assert_eq!(
        report.outcome_for(&format!("{}/public", base)),
        Some(&TargetOutcome::Recorded { written: 1 })
    );
    assert_eq!(report.metrics.skipped, 1);
    assert_eq!(report.metrics.success, 1);
}

#[tokio::test]
async fn test_robots_ignored_when_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /"))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "/page", "Page").await;

    let mut config = test_config(1);
    config.collector.respect_robots = false;

    let url = format!("{}/page", server.uri());
    let report = pipeline(&config, memory_store())
        .run(vec![Target::page(url.clone())])
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&url),
        Some(&TargetOutcome::Recorded { written: 1 })
    );
}

#[tokio::test]
async fn test_crawl_delay_spaces_requests_to_one_origin() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nCrawl-delay: 0.3").await;
    mount_page(&server, "/a", "A").await;
    mount_page(&server, "/b", "B").await;

    let base = server.uri();
    let started = Instant::now();
    let report = pipeline(&test_config(2), memory_store())
        .run(vec![
            Target::page(format!("{}/a", base)),
            Target::page(format!("{}/b", base)),
        ])
        .await
        .unwrap();

    assert_eq!(report.metrics.success, 2);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_malformed_target_fails_fatally() {
    let report = pipeline(&test_config(1), memory_store())
        .run(vec![Target::page("not a url")])
        .await
        .unwrap();

    match report.outcome_for("not a url") {
        Some(TargetOutcome::Failed { kind, .. }) => assert_eq!(*kind, FailureKind::Fatal),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(report.aborted.is_none());
}

#[tokio::test]
async fn test_cancellation_stops_in_flight_and_queued_targets() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Slow</title></head></html>")
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;

    let base = server.uri();
    let targets: Vec<Target> = (0..5)
        .map(|i| Target::page(format!("{}/slow?n={}", base, i)))
        .collect();

    let store = memory_store();
    let pipeline = pipeline(&test_config(2), store.clone());
    let cancel = pipeline.cancellation_handle();
    let run = tokio::spawn(pipeline.run(targets));

    wait_for_page_requests(&server, 2).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run stops promptly after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(report.aborted, Some(AbortReason::Cancelled));
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.undispatched, 3);
    assert_eq!(report.metrics.failed, 2);
    assert_eq!(report.metrics.total, 2);
    for (_, outcome) in &report.outcomes {
        assert_eq!(outcome, &TargetOutcome::cancelled());
    }

    assert_eq!(store.count_documents().unwrap(), 0);
    assert_eq!(
        store.get_run(report.run_id).unwrap().status,
        RunStatus::Interrupted
    );
}

#[tokio::test]
async fn test_rerun_writes_nothing_new() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    mount_page(&server, "/one", "One").await;
    mount_page(&server, "/two", "Two").await;

    let base = server.uri();
    let targets = vec![
        Target::page(format!("{}/one", base)),
        Target::page(format!("{}/two", base)),
    ];
    let store = memory_store();
    let config = test_config(2);

    let first = pipeline(&config, store.clone())
        .run(targets.clone())
        .await
        .unwrap();
    assert_eq!(first.metrics.records_written, 2);

    let second = pipeline(&config, store.clone()).run(targets).await.unwrap();
    assert_eq!(second.metrics.records_written, 0);
    assert_eq!(second.metrics.skipped, 2);
    assert_ne!(first.run_id, second.run_id);

    assert_eq!(store.count_documents().unwrap(), 2);
    assert_eq!(store.count_runs().unwrap(), 2);
    assert_eq!(requests_to(&server, "/one").await, 2);
}

#[tokio::test]
async fn test_canonical_url_deduplicates_aliases() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    let base = server.uri();
    let page = format!(
        r#"<html><head><title>Article</title><link rel="canonical" href="{}/article"></head>
        <body>Text</body></html>"#,
        base
    );
    for alias in ["/article", "/article-amp"] {
        Mock::given(method("GET"))
            .and(path(alias))
            .respond_with(ResponseTemplate::new(200).set_body_string(page.clone()))
            .mount(&server)
            .await;
    }

    let store = memory_store();
    let report = pipeline(&test_config(1), store.clone())
        .run(vec![
            Target::page(format!("{}/article", base)),
            Target::page(format!("{}/article-amp", base)),
        ])
        .await
        .unwrap();

    assert_eq!(report.metrics.records_written, 1);
    assert_eq!(report.metrics.skipped, 1);
    assert_eq!(store.count_documents().unwrap(), 1);
}

#[tokio::test]
async fn test_failing_webhook_does_not_fail_the_run() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    mount_page(&server, "/page", "Page").await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(1);
    config.notifier.enabled = true;
    config.notifier.webhook_url = Some(format!("{}/hook", server.uri()));

    let report = pipeline(&config, memory_store())
        .run(vec![Target::page(format!("{}/page", server.uri()))])
        .await
        .unwrap();

    assert!(report.aborted.is_none());
    assert_eq!(report.metrics.success, 1);
}

#[tokio::test]
async fn test_empty_target_list_completes() {
    let store = memory_store();
    let report = pipeline(&test_config(4), store.clone())
        .run(Vec::new())
        .await
        .unwrap();

    assert_eq!(report.metrics.total, 0);
    assert_eq!(report.metrics.success_rate(), 0.0);
    assert!(report.aborted.is_none());
    assert_eq!(
        store.get_run(report.run_id).unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_shared_store_is_usable_as_trait_object() {
    let store: Arc<dyn Store> = memory_store();
    let report = pipeline(&test_config(1), Arc::clone(&store))
        .run(Vec::new())
        .await
        .unwrap();
    assert_eq!(store.latest_run().unwrap().map(|run| run.id), Some(report.run_id));
}

/// Waits until the store holds `count` documents
async fn wait_for_documents(store: &SqliteStore, count: u64) {
    let poll = async {
        while store.count_documents().unwrap() < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("documents were not stored in time");
}

#[tokio::test]
async fn test_retry_after_is_waited_out_before_retrying() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "/busy", "Busy page").await;

    let mut config = test_config(1);
    config.collector.max_backoff_ms = 5_000;

    let url = format!("{}/busy", server.uri());
    let started = Instant::now();
    let report = pipeline(&config, memory_store())
        .run(vec![Target::page(url.clone())])
        .await
        .unwrap();

    assert_eq!(
        report.outcome_for(&url),
        Some(&TargetOutcome::Recorded { written: 1 })
    );
    assert_eq!(requests_to(&server, "/busy").await, 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_cancellation_during_backoff() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = test_config(1);
    config.collector.base_delay_ms = 10_000;
    config.collector.max_backoff_ms = 10_000;

    let url = format!("{}/down", server.uri());
    let pipeline = pipeline(&config, memory_store());
    let cancel = pipeline.cancellation_handle();
    let run = tokio::spawn(pipeline.run(vec![Target::page(url.clone())]));

    wait_for_page_requests(&server, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("backoff sleep is cancellable")
        .unwrap()
        .unwrap();

    assert_eq!(report.outcome_for(&url), Some(&TargetOutcome::cancelled()));
    assert_eq!(report.metrics.total, 1);
    assert_eq!(requests_to(&server, "/down").await, 1);
}

#[tokio::test]
async fn test_huge_crawl_delay_is_clamped_and_cancellable() {
    let server = MockServer::start().await;
    mount_robots(&server, "User-agent: *\nCrawl-delay: 1e20").await;
    mount_page(&server, "/a", "A").await;
    mount_page(&server, "/b", "B").await;

    let base = server.uri();
    let store = memory_store();
    let pipeline = pipeline(&test_config(2), store.clone());
    let cancel = pipeline.cancellation_handle();
    let run = tokio::spawn(pipeline.run(vec![
        Target::page(format!("{}/a", base)),
        Target::page(format!("{}/b", base)),
    ]));

    // One target is fetched at once, the other sleeps out the delay
    wait_for_documents(&store, 1).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("crawl-delay sleep is cancellable")
        .unwrap()
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.metrics.total, 2);
    assert_eq!(report.metrics.success, 1);
    assert_eq!(report.metrics.failed, 1);
    assert!(report
        .outcomes
        .iter()
        .any(|(_, outcome)| outcome == &TargetOutcome::cancelled()));
    assert_eq!(report.undispatched, 0);
}

struct ExplodingParser;

impl Parser for ExplodingParser {
    fn parse(&self, _raw: &[u8], source_url: &str, _kind: TargetKind) -> Result<Document, ParseError> {
        panic!("cannot parse {}", source_url);
    }
}

#[tokio::test]
async fn test_crashed_worker_still_accounts_for_every_target() {
    let server = MockServer::start().await;
    mount_no_robots(&server).await;
    mount_page(&server, "/a", "A").await;
    mount_page(&server, "/b", "B").await;

    let base = server.uri();
    let report = pipeline(&test_config(1), memory_store())
        .with_parser(Arc::new(ExplodingParser))
        .run(vec![
            Target::page(format!("{}/a", base)),
            Target::page(format!("{}/b", base)),
        ])
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.metrics.total, 2);
    assert_eq!(report.metrics.failed, 2);
    assert_eq!(report.undispatched, 0);
    for (_, outcome) in &report.outcomes {
        assert!(matches!(
            outcome,
            TargetOutcome::Failed {
                kind: FailureKind::Fatal,
                ..
            }
        ));
    }
}
