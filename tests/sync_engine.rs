//! End-to-end tests of the sync engine against mocked feed servers.
//!
//! Every test builds its own in-memory store and `MockServer`, so they are
//! independent of each other and of the network.

use chrono::{DateTime, Duration, Utc};
use feedsync::config::Config;
use feedsync::feed::{FeedFormat, FeedMetadata, Fetcher};
use feedsync::storage::{
    CategorySettings, Database, DefragmentOutcome, FeedSettings, FetchRecord, MessageFlags,
    UpdatePolicy,
};
use feedsync::sync::{
    Operation, ReconcileCounts, Scheduler, SyncError, SyncEvent, UpdateSelection, UpdateSummary,
    UpdateTrigger,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Fixtures
// ============================================================================

const TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <item>
        <title>First</title>
        <link>https://example.com/posts/1</link>
        <description>One</description>
        <pubDate>Tue, 14 Nov 2023 22:13:20 GMT</pubDate>
    </item>
    <item>
        <title>Second</title>
        <link>https://example.com/posts/2</link>
        <description>Two</description>
    </item>
</channel></rss>"#;

/// Same items as `TWO_ITEMS`, with a retitled first item and a moved date.
const FIRST_RETITLED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <item>
        <title>First (corrected)</title>
        <link>https://example.com/posts/1</link>
        <description>One</description>
        <pubDate>Wed, 15 Nov 2023 10:00:00 GMT</pubDate>
    </item>
    <item>
        <title>Second</title>
        <link>https://example.com/posts/2</link>
        <description>Two</description>
    </item>
</channel></rss>"#;

const WITH_DUPLICATES: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Sloppy</title>
    <item><title>Linked</title><link>https://example.com/a</link></item>
    <item><title>Linked again</title><link>https://example.com/a#comments</link></item>
    <item><title>Plain</title><description>Same body</description></item>
    <item><title>Plain</title><description>Same body</description></item>
</channel></rss>"#;

const ATOM_ONE_ENTRY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom</title>
    <id>urn:example:feed</id>
    <entry>
        <title>Entry</title>
        <id>urn:example:1</id>
        <link href="https://atom.example.com/1"/>
        <updated>2023-11-14T22:13:20Z</updated>
    </entry>
</feed>"#;

const MALFORMED_ATOM: &str =
    r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><title>Oops</entry></feed>"#;

fn config() -> Config {
    Config {
        global_interval_minutes: 10,
        connection_timeout_ms: 5_000,
        worker_pool_size: 4,
        ..Default::default()
    }
}

async fn engine_with(
    config: &Config,
    events: Option<mpsc::Sender<SyncEvent>>,
) -> (Scheduler, Database) {
    let db = Database::open(Database::IN_MEMORY).await.unwrap();
    let fetcher = Fetcher::new(config).unwrap();
    (Scheduler::new(db.clone(), fetcher, config, events), db)
}

async fn engine() -> (Scheduler, Database) {
    engine_with(&config(), None).await
}

async fn serve(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn add_feed(db: &Database, server: &MockServer, route: &str) -> i64 {
    db.insert_feed(&FeedSettings {
        url: format!("{}{}", server.uri(), route),
        title: route.trim_start_matches('/').to_string(),
        ..Default::default()
    })
    .await
    .unwrap()
}

async fn update(scheduler: &Scheduler, selection: UpdateSelection) -> UpdateSummary {
    scheduler
        .request_update(selection, UpdateTrigger::Manual)
        .unwrap()
        .wait()
        .await
        .unwrap()
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_first_update_inserts_with_cleared_flags() {
    let server = MockServer::start().await;
    serve(&server, "/rss", TWO_ITEMS).await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/rss").await;

    let summary = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(summary.feeds_total, 1);
    assert_eq!(summary.new, 2);
    assert_eq!(summary.failed, 0);
    assert!(!summary.cancelled);

    let messages = db.get_messages_for_feed(feed_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.flags == MessageFlags::default()));
    assert!(messages
        .iter()
        .any(|m| m.identity == "url:https://example.com/posts/1"));

    let feed = db.get_feed(feed_id).await.unwrap().unwrap();
    assert_eq!(feed.format, Some(FeedFormat::Rss2));
    assert!(feed.last_fetched.is_some());
    assert_eq!(feed.last_error, None);
}

#[tokio::test]
async fn test_repeated_updates_keep_flags_and_rows() {
    let server = MockServer::start().await;
    serve(&server, "/rss", TWO_ITEMS).await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/rss").await;

    update(&scheduler, UpdateSelection::All).await;
    let messages = db.get_messages_for_feed(feed_id).await.unwrap();
    db.set_message_flags(
        messages[0].id,
        MessageFlags {
            read: true,
            important: true,
            deleted: false,
        },
    )
    .await
    .unwrap();
    db.set_message_flags(
        messages[1].id,
        MessageFlags {
            read: false,
            important: false,
            deleted: true,
        },
    )
    .await
    .unwrap();
    let before = db.get_all_messages().await.unwrap();

    for _ in 0..2 {
        let summary = update(&scheduler, UpdateSelection::All).await;
        assert_eq!(summary.new, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.unchanged, 2);
    }

    assert_eq!(db.get_all_messages().await.unwrap(), before);
}

#[tokio::test]
async fn test_duplicate_items_in_one_document_stored_once() {
    let server = MockServer::start().await;
    serve(&server, "/dup", WITH_DUPLICATES).await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/dup").await;

    let first = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(first.new, 2);
    let second = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(second.new, 0);
    assert_eq!(second.unchanged, 2);

    let messages = db.get_messages_for_feed(feed_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    // First occurrence wins
    assert!(messages.iter().any(|m| m.title == "Linked"));
}

#[tokio::test]
async fn test_important_message_survives_unchanged_refetch() {
    let server = MockServer::start().await;
    serve(&server, "/rss", TWO_ITEMS).await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/rss").await;

    update(&scheduler, UpdateSelection::All).await;
    let first = db
        .get_messages_for_feed(feed_id)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.title == "First")
        .unwrap();
    assert!(db.toggle_message_important(first.id).await.unwrap());

    let summary = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(summary.updated, 0);

    let after = db
        .get_all_messages()
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.id == first.id)
        .unwrap();
    assert!(after.flags.important);
    assert_eq!(after.title, first.title);
    assert_eq!(after.published, first.published);
}

#[tokio::test]
async fn test_changed_item_updates_content_only() {
    let server = MockServer::start().await;
    serve(&server, "/rss", TWO_ITEMS).await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/rss").await;

    update(&scheduler, UpdateSelection::All).await;
    let original = db
        .get_messages_for_feed(feed_id)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.title == "First")
        .unwrap();
    let flags = MessageFlags {
        read: true,
        important: true,
        deleted: false,
    };
    db.set_message_flags(original.id, flags).await.unwrap();

    server.reset().await;
    serve(&server, "/rss", FIRST_RETITLED).await;
    let summary = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(summary.new, 0);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.unchanged, 1);

    let messages = db.get_messages_for_feed(feed_id).await.unwrap();
    assert_eq!(messages.len(), 2);
    let changed = messages.iter().find(|m| m.id == original.id).unwrap();
    assert_eq!(changed.title, "First (corrected)");
    assert_eq!(changed.flags, flags);
    assert_eq!(changed.published, original.published);
    assert_eq!(changed.fetched_at, original.fetched_at);
}

#[tokio::test]
async fn test_purged_message_is_not_resurrected() {
    let server = MockServer::start().await;
    serve(&server, "/rss", TWO_ITEMS).await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/rss").await;

    update(&scheduler, UpdateSelection::All).await;
    let victim = db.get_messages_for_feed(feed_id).await.unwrap()[0].clone();
    db.mark_message_deleted(victim.id).await.unwrap();
    assert_eq!(scheduler.purge_deleted().await.unwrap(), 1);

    let summary = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(summary.new, 0);
    assert_eq!(summary.unchanged, 2);

    let identities: Vec<String> = db
        .get_messages_for_feed(feed_id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.identity)
        .collect();
    assert_eq!(identities.len(), 1);
    assert!(!identities.contains(&victim.identity));
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_malformed_feed_fails_alone() {
    let server = MockServer::start().await;
    serve(&server, "/broken", MALFORMED_ATOM).await;
    serve(&server, "/atom", ATOM_ONE_ENTRY).await;
    let (scheduler, db) = engine().await;
    let broken = add_feed(&db, &server, "/broken").await;
    let good = add_feed(&db, &server, "/atom").await;

    let summary = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(summary.feeds_total, 2);
    assert_eq!(summary.new, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].feed_id, broken);
    assert!(matches!(
        summary.errors[0].error,
        SyncError::UnparsableContent { .. }
    ));

    assert!(db.get_messages_for_feed(broken).await.unwrap().is_empty());
    assert_eq!(db.get_messages_for_feed(good).await.unwrap().len(), 1);

    let broken_feed = db.get_feed(broken).await.unwrap().unwrap();
    assert!(broken_feed.last_error.is_some());
    assert!(broken_feed.last_fetched.is_some());
}

#[tokio::test]
async fn test_http_error_reported_per_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve(&server, "/rss", TWO_ITEMS).await;
    let (scheduler, db) = engine().await;
    let gone = add_feed(&db, &server, "/gone").await;
    add_feed(&db, &server, "/rss").await;

    let summary = update(&scheduler, UpdateSelection::All).await;
    assert_eq!(summary.new, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[0].feed_id, gone);
    assert!(matches!(summary.errors[0].error, SyncError::Network { .. }));
}

#[tokio::test]
async fn test_store_unavailable_aborts_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(TWO_ITEMS)
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let (tx, mut rx) = mpsc::channel(32);
    let (scheduler, db) = engine_with(&config(), Some(tx)).await;
    add_feed(&db, &server, "/slow").await;

    let handle = scheduler
        .request_update(UpdateSelection::All, UpdateTrigger::Manual)
        .unwrap();
    // Feeds are resolved before UpdateStarted, the fetch is now in flight
    assert!(matches!(
        rx.recv().await,
        Some(SyncEvent::UpdateStarted { .. })
    ));
    db.close().await;

    let result = handle.wait().await;
    assert!(matches!(result, Err(SyncError::StoreUnavailable(_))));
    assert_eq!(scheduler.active_operation(), None);
}

#[tokio::test]
async fn test_store_loss_stops_dispatch_but_lets_in_flight_feeds_finish() {
    let server = MockServer::start().await;
    for (route, delay_ms) in [("/a-fast", 100), ("/b-slow", 600)] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(TWO_ITEMS)
                    .set_delay(std::time::Duration::from_millis(delay_ms)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/c-queued"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEMS))
        .expect(0)
        .mount(&server)
        .await;

    let two_workers = Config {
        worker_pool_size: 2,
        ..config()
    };
    let (tx, mut rx) = mpsc::channel(32);
    let (scheduler, db) = engine_with(&two_workers, Some(tx)).await;
    // Dispatched in title order, two at a time
    for route in ["/a-fast", "/b-slow", "/c-queued"] {
        add_feed(&db, &server, route).await;
    }

    let started = std::time::Instant::now();
    let handle = scheduler
        .request_update(UpdateSelection::All, UpdateTrigger::Manual)
        .unwrap();
    let token = handle.cancellation_token();
    assert!(matches!(
        rx.recv().await,
        Some(SyncEvent::UpdateStarted { .. })
    ));
    db.close().await;

    let result = handle.wait().await;
    assert!(matches!(result, Err(SyncError::StoreUnavailable(_))));
    // The slow fetch was not aborted when the fast feed hit the closed store
    assert!(started.elapsed() >= std::time::Duration::from_millis(500));
    assert!(!token.is_cancelled());
    assert_eq!(scheduler.active_operation(), None);
}

// ============================================================================
// Lock
// ============================================================================

#[tokio::test]
async fn test_second_request_while_updating_is_busy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(TWO_ITEMS)
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/slow").await;

    let running = scheduler
        .request_update(UpdateSelection::All, UpdateTrigger::Manual)
        .unwrap();
    assert_eq!(scheduler.active_operation(), Some(Operation::Update));

    let busy = SyncError::Busy {
        active: Operation::Update,
    };
    assert_eq!(
        scheduler
            .request_update(UpdateSelection::feeds([feed_id]), UpdateTrigger::Manual)
            .unwrap_err(),
        busy
    );
    assert_eq!(scheduler.defragment().await.unwrap_err(), busy);
    assert_eq!(scheduler.purge_deleted().await.unwrap_err(), busy);
    assert_eq!(
        scheduler
            .add_feed(&FeedSettings {
                url: "https://example.com/other.xml".into(),
                title: "Other".into(),
                ..Default::default()
            })
            .await
            .unwrap_err(),
        busy
    );
    // A busy tick is skipped, not queued
    assert!(scheduler.tick(Utc::now()).await.unwrap().is_none());

    let summary = running.wait().await.unwrap();
    assert_eq!(summary.new, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(db.get_feeds().await.unwrap().len(), 1);
    assert_eq!(scheduler.active_operation(), None);
}

#[tokio::test]
async fn test_defragment_when_idle() {
    let server = MockServer::start().await;
    serve(&server, "/rss", TWO_ITEMS).await;

    let (scheduler, _db) = engine().await;
    assert_eq!(
        scheduler.defragment().await.unwrap(),
        DefragmentOutcome::UnsupportedByBackend
    );

    let dir = std::env::temp_dir().join(format!("feedsync_engine_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("messages.db");
    let db = Database::open(file.to_str().unwrap()).await.unwrap();
    let config = config();
    let scheduler = Scheduler::new(db.clone(), Fetcher::new(&config).unwrap(), &config, None);
    let feed_id = add_feed(&db, &server, "/rss").await;
    update(&scheduler, UpdateSelection::All).await;
    let id = db.get_messages_for_feed(feed_id).await.unwrap()[0].id;
    db.toggle_message_important(id).await.unwrap();
    let before = db.get_all_messages().await.unwrap();

    assert_eq!(
        scheduler.defragment().await.unwrap(),
        DefragmentOutcome::Success
    );
    assert_eq!(db.get_all_messages().await.unwrap(), before);
    assert_eq!(scheduler.active_operation(), None);

    db.close().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_cancel_releases_lock_and_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(TWO_ITEMS)
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let (scheduler, db) = engine().await;
    let feed_id = add_feed(&db, &server, "/slow").await;

    let handle = scheduler
        .request_update(UpdateSelection::All, UpdateTrigger::Manual)
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    handle.cancel();

    let summary = handle.wait().await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert!(db.get_messages_for_feed(feed_id).await.unwrap().is_empty());
    assert_eq!(db.get_feed(feed_id).await.unwrap().unwrap().last_fetched, None);

    assert_eq!(scheduler.active_operation(), None);
    assert!(scheduler.defragment().await.is_ok());
}

// ============================================================================
// Scheduling
// ============================================================================

async fn fetched_at(db: &Database, feed_id: i64, at: DateTime<Utc>) {
    let metadata = FeedMetadata::default();
    db.commit_feed_update(
        feed_id,
        &[],
        &[],
        FetchRecord {
            fetched_at: at.timestamp(),
            format: FeedFormat::Rss2,
            metadata: &metadata,
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_tick_custom_interval_beats_global() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEMS))
        .expect(1)
        .mount(&server)
        .await;
    let config = Config {
        global_interval_minutes: 30,
        ..config()
    };
    let (scheduler, db) = engine_with(&config, None).await;
    let feed_id = db
        .insert_feed(&FeedSettings {
            url: format!("{}/rss", server.uri()),
            title: "Every ten minutes".into(),
            update_policy: UpdatePolicy::Custom(10),
            ..Default::default()
        })
        .await
        .unwrap();

    let t = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    fetched_at(&db, feed_id, t).await;
    let feed = db.get_feed(feed_id).await.unwrap().unwrap();

    let at_nine = t + Duration::minutes(9);
    assert_eq!(scheduler.minutes_until_due(&feed, at_nine), Some(1));
    assert!(scheduler.tick(at_nine).await.unwrap().is_none());

    let at_eleven = t + Duration::minutes(11);
    let handle = scheduler.tick(at_eleven).await.unwrap().unwrap();
    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.trigger, UpdateTrigger::Scheduled);
    assert_eq!(summary.feeds_total, 1);
    assert_eq!(summary.new, 2);
}

#[tokio::test]
async fn test_tick_skips_disabled_and_uses_custom_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manual"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEMS))
        .expect(0)
        .mount(&server)
        .await;
    serve(&server, "/hourly", ATOM_ONE_ENTRY).await;
    let (scheduler, db) = engine().await;

    let manual = db
        .insert_feed(&FeedSettings {
            url: format!("{}/manual", server.uri()),
            title: "Manual".into(),
            update_policy: UpdatePolicy::Disabled,
            ..Default::default()
        })
        .await
        .unwrap();
    let hourly = db
        .insert_feed(&FeedSettings {
            url: format!("{}/hourly", server.uri()),
            title: "Hourly".into(),
            update_policy: UpdatePolicy::Custom(60),
            ..Default::default()
        })
        .await
        .unwrap();

    let t = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    fetched_at(&db, hourly, t).await;
    let manual_feed = db.get_feed(manual).await.unwrap().unwrap();
    assert_eq!(scheduler.minutes_until_due(&manual_feed, t), None);

    // Past the global interval but not the feed's own
    assert!(scheduler
        .tick(t + Duration::minutes(30))
        .await
        .unwrap()
        .is_none());

    let summary = scheduler
        .tick(t + Duration::minutes(61))
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.feeds_total, 1);
    assert_eq!(db.get_messages_for_feed(hourly).await.unwrap().len(), 1);
}

// ============================================================================
// Selection and events
// ============================================================================

#[tokio::test]
async fn test_category_selection_includes_nested_feeds() {
    let server = MockServer::start().await;
    serve(&server, "/top", TWO_ITEMS).await;
    serve(&server, "/nested", ATOM_ONE_ENTRY).await;
    Mock::given(method("GET"))
        .and(path("/elsewhere"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEMS))
        .expect(0)
        .mount(&server)
        .await;
    let (scheduler, db) = engine().await;

    let news = scheduler
        .add_category(&CategorySettings {
            title: "News".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let local = scheduler
        .add_category(&CategorySettings {
            title: "Local".into(),
            parent_id: Some(news),
            ..Default::default()
        })
        .await
        .unwrap();
    let sports = scheduler
        .add_category(&CategorySettings {
            title: "Sports".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    for (route, category) in [("/top", news), ("/nested", local), ("/elsewhere", sports)] {
        scheduler
            .add_feed(&FeedSettings {
                url: format!("{}{}", server.uri(), route),
                title: route.into(),
                category_id: Some(category),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let summary = update(&scheduler, UpdateSelection::categories([news])).await;
    assert_eq!(summary.feeds_total, 2);
    assert_eq!(summary.new, 3);
}

#[tokio::test]
async fn test_explicit_feed_and_category_overlap_counted_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TWO_ITEMS))
        .expect(1)
        .mount(&server)
        .await;
    let (scheduler, db) = engine().await;
    let category = scheduler
        .add_category(&CategorySettings {
            title: "Blogs".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let feed_id = add_feed(&db, &server, "/rss").await;
    scheduler.move_feed(feed_id, Some(category)).await.unwrap();

    let summary = update(
        &scheduler,
        UpdateSelection::Items {
            feeds: vec![feed_id],
            categories: vec![category],
        },
    )
    .await;
    assert_eq!(summary.feeds_total, 1);
}

#[tokio::test]
async fn test_events_follow_job_progress() {
    let server = MockServer::start().await;
    serve(&server, "/rss", TWO_ITEMS).await;
    serve(&server, "/atom", ATOM_ONE_ENTRY).await;
    let (tx, mut rx) = mpsc::channel(32);
    let (scheduler, db) = engine_with(&config(), Some(tx)).await;
    add_feed(&db, &server, "/rss").await;
    add_feed(&db, &server, "/atom").await;

    let summary = update(&scheduler, UpdateSelection::All).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[0],
        SyncEvent::UpdateStarted {
            trigger: UpdateTrigger::Manual,
            feeds_total: 2
        }
    ));
    let mut progress: Vec<usize> = events[1..3]
        .iter()
        .map(|e| match e {
            SyncEvent::FeedUpdated { current, total, .. } => {
                assert_eq!(*total, 2);
                *current
            }
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    progress.sort_unstable();
    assert_eq!(progress, vec![1, 2]);
    match &events[3] {
        SyncEvent::UpdateFinished(finished) => assert_eq!(finished, &summary),
        other => panic!("unexpected event {:?}", other),
    }

    scheduler.defragment().await.unwrap();
    assert!(matches!(
        rx.try_recv(),
        Ok(SyncEvent::DefragmentFinished(
            DefragmentOutcome::UnsupportedByBackend
        ))
    ));
}

#[tokio::test]
async fn test_empty_selection_finishes_immediately() {
    let (scheduler, _db) = engine().await;
    let summary = update(&scheduler, UpdateSelection::feeds(Vec::new())).await;
    assert_eq!(summary.feeds_total, 0);
    assert_eq!(summary.counts(), ReconcileCounts::default());
    assert!(!summary.cancelled);
}

#[tokio::test]
async fn test_structural_edit_errors_are_invalid_edit() {
    let (scheduler, _db) = engine().await;
    assert!(matches!(
        scheduler.remove_feed(404).await,
        Err(SyncError::InvalidEdit(_))
    ));
    assert!(matches!(
        scheduler
            .add_feed(&FeedSettings {
                url: "ftp://example.com/feed".into(),
                title: "FTP".into(),
                ..Default::default()
            })
            .await,
        Err(SyncError::InvalidEdit(_))
    ));
}
