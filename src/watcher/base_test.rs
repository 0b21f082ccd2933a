//! Unit tests for the single-subscription watchers
//!
//! Covers:
//! - Initial snapshot / pulse ordering
//! - Filtering, deduplication and coalescing under a slow consumer
//! - Terminal errors: source termination, mapper failure, setup failures
//! - Degrading to a silent watcher on unsupported watches

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::test_utils::*;
use crate::ChangeBatch;
use crate::ChangeType;
use crate::Error;
use crate::EventMultiplexer;
use crate::MockWatchableDb;
use crate::Subscription;
use crate::WatcherFactory;

async fn wait_for_subscriptions(
    source: &EventMultiplexer,
    expected: usize,
) {
    timeout(RECV_TIMEOUT, async {
        while source.subscription_count() != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription count never settled");
}

/// Mock source handing out one subscription fed by the returned sender
fn scripted_db() -> (MockWatchableDb, mpsc::Sender<ChangeBatch>, CancellationToken) {
    let (tx, rx) = mpsc::channel(8);
    let done = CancellationToken::new();
    let sub = Subscription::new(42, rx, done.clone(), || {});

    let mut db = MockWatchableDb::new();
    db.expect_subscribe().times(1).return_once(move |_| Ok(sub));
    (db, tx, done)
}

#[tokio::test]
async fn test_namespace_watcher_emits_initial_query_first() {
    let (source, factory) = setup_factory();

    let mut watcher = factory
        .new_namespace_watcher("unit", ChangeType::ALL, |_db: Arc<EventMultiplexer>| async {
            Ok::<_, Error>(vec!["app/0".to_string(), "app/1".to_string()])
        })
        .await
        .unwrap();

    assert_eq!(next_within(&mut watcher).await, vec!["app/0", "app/1"]);

    source.publish(vec![event(ChangeType::CREATE, "unit", "app/2")]).await.unwrap();
    assert_eq!(next_within(&mut watcher).await, vec!["app/2"]);

    assert!(watcher.stop().await.is_ok());
}

#[tokio::test]
async fn test_empty_namespace_watcher_starts_empty() {
    let (_source, factory) = setup_factory();

    let mut watcher = factory.new_empty_namespace_watcher("unit", ChangeType::ALL).await.unwrap();

    assert!(next_within(&mut watcher).await.is_empty());
    assert_no_change(&mut watcher).await;
}

#[tokio::test]
async fn test_namespace_watcher_respects_change_mask_and_namespace() {
    let (source, factory) = setup_factory();
    let mut watcher = factory
        .new_empty_namespace_watcher("unit", ChangeType::CREATE | ChangeType::DELETE)
        .await
        .unwrap();
    next_within(&mut watcher).await;

    source.publish(vec![event(ChangeType::UPDATE, "unit", "app/0")]).await.unwrap();
    source.publish(vec![event(ChangeType::CREATE, "machine", "0")]).await.unwrap();
    assert_no_change(&mut watcher).await;

    source.publish(vec![event(ChangeType::DELETE, "unit", "app/0")]).await.unwrap();
    assert_eq!(next_within(&mut watcher).await, vec!["app/0"]);
}

#[tokio::test]
async fn test_namespace_watcher_dedups_batch() {
    let (source, factory) = setup_factory();
    let mut watcher = factory.new_empty_namespace_watcher("unit", ChangeType::ALL).await.unwrap();
    next_within(&mut watcher).await;

    source
        .publish(vec![
            event(ChangeType::CREATE, "unit", "app/0"),
            event(ChangeType::UPDATE, "unit", "app/1"),
            event(ChangeType::UPDATE, "unit", "app/0"),
        ])
        .await
        .unwrap();

    assert_eq!(next_within(&mut watcher).await, vec!["app/0", "app/1"]);
}

#[tokio::test]
async fn test_slow_consumer_coalesces_changes() {
    let (source, factory) = setup_factory();
    let mut watcher = factory.new_empty_namespace_watcher("unit", ChangeType::ALL).await.unwrap();
    next_within(&mut watcher).await;

    for id in ["app/0", "app/1", "app/2", "app/3"] {
        source.publish(vec![event(ChangeType::UPDATE, "unit", id)]).await.unwrap();
    }
    // Let the watcher drain its subscription while nobody reads.
    sleep(QUIET_PERIOD).await;

    assert_eq!(next_within(&mut watcher).await, vec!["app/0", "app/1", "app/2", "app/3"]);
    assert_no_change(&mut watcher).await;
}

#[tokio::test]
async fn test_initial_snapshot_is_not_merged_with_live_changes() {
    let (source, factory) = setup_factory();
    let mut watcher = factory
        .new_namespace_watcher("unit", ChangeType::ALL, |_db: Arc<EventMultiplexer>| async {
            Ok::<_, Error>(vec!["a".to_string(), "b".to_string()])
        })
        .await
        .unwrap();

    // Written before the first read, possibly before the task ever ran.
    source.publish(vec![event(ChangeType::CREATE, "unit", "c")]).await.unwrap();
    sleep(QUIET_PERIOD).await;

    assert_eq!(next_within(&mut watcher).await, vec!["a", "b"]);
    assert_eq!(next_within(&mut watcher).await, vec!["c"]);
}

#[tokio::test]
async fn test_initial_snapshot_is_deduplicated() {
    let (_source, factory) = setup_factory();
    let mut watcher = factory
        .new_namespace_watcher("unit", ChangeType::ALL, |_db: Arc<EventMultiplexer>| async {
            Ok::<_, Error>(vec!["a".to_string(), "b".to_string(), "a".to_string()])
        })
        .await
        .unwrap();

    assert_eq!(next_within(&mut watcher).await, vec!["a", "b"]);
}

#[tokio::test]
async fn test_notify_watcher_pulses_once_per_read() {
    let (source, factory) = setup_factory();
    let mut watcher = factory.new_namespace_notify_watcher("unit", ChangeType::ALL).unwrap();

    // Initial liveness pulse.
    next_within(&mut watcher).await;
    assert_no_change(&mut watcher).await;

    source.publish(vec![event(ChangeType::CREATE, "unit", "app/0")]).await.unwrap();
    source.publish(vec![event(ChangeType::CREATE, "unit", "app/1")]).await.unwrap();
    sleep(QUIET_PERIOD).await;

    next_within(&mut watcher).await;
    assert_no_change(&mut watcher).await;
}

#[tokio::test]
async fn test_value_watcher_only_fires_for_its_value() {
    let (source, factory) = setup_factory();
    let mut watcher = factory.new_value_watcher("application", "mysql", ChangeType::ALL).unwrap();
    next_within(&mut watcher).await;

    source.publish(vec![event(ChangeType::UPDATE, "application", "wordpress")]).await.unwrap();
    assert_no_change(&mut watcher).await;

    source.publish(vec![event(ChangeType::UPDATE, "application", "mysql")]).await.unwrap();
    next_within(&mut watcher).await;
}

#[tokio::test]
async fn test_mapper_can_suppress_dispatch() {
    let (source, factory) = setup_factory();
    let mapper = |_db: Arc<EventMultiplexer>, changes: ChangeBatch| async move {
        Ok::<_, Error>(changes.into_iter().filter(|c| c.changed().starts_with("keep")).collect())
    };
    let mut watcher = factory
        .new_namespace_mapper_watcher("unit", ChangeType::ALL, crate::EmptyQuery, mapper)
        .await
        .unwrap();
    next_within(&mut watcher).await;

    source.publish(vec![event(ChangeType::CREATE, "unit", "drop/0")]).await.unwrap();
    assert_no_change(&mut watcher).await;

    source
        .publish(vec![
            event(ChangeType::CREATE, "unit", "drop/1"),
            event(ChangeType::CREATE, "unit", "keep/0"),
        ])
        .await
        .unwrap();
    assert_eq!(next_within(&mut watcher).await, vec!["keep/0"]);
}

#[tokio::test]
async fn test_mapper_error_kills_watcher() {
    let (source, factory) = setup_factory();
    let mapper = |_db: Arc<EventMultiplexer>, _changes: ChangeBatch| async {
        Err::<ChangeBatch, _>(Error::Mapper("lookup failed".into()))
    };
    let mut watcher = factory.new_namespace_notify_mapper_watcher("unit", ChangeType::ALL, mapper).unwrap();
    next_within(&mut watcher).await;

    source.publish(vec![event(ChangeType::CREATE, "unit", "app/0")]).await.unwrap();

    let result = timeout(RECV_TIMEOUT, watcher.wait()).await.expect("watcher did not stop");
    assert_eq!(result, Err(Error::Mapper("lookup failed".into())));
    assert_eq!(watcher.next().await, None);
    assert_eq!(source.subscription_count(), 0);
}

#[tokio::test]
async fn test_terminated_subscription_reports_closed() {
    let (source, factory) = setup_factory();
    let mut watcher = factory.new_empty_namespace_watcher("unit", ChangeType::ALL).await.unwrap();
    next_within(&mut watcher).await;

    // First subscription of a fresh source.
    source.terminate(1);

    let result = timeout(RECV_TIMEOUT, watcher.wait()).await.expect("watcher did not stop");
    assert!(result.unwrap_err().is_subscription_closed());
}

#[tokio::test]
async fn test_source_close_reports_closed() {
    let (source, factory) = setup_factory();
    let watcher = factory.new_namespace_notify_watcher("unit", ChangeType::ALL).unwrap();

    source.close();

    let result = timeout(RECV_TIMEOUT, watcher.wait()).await.expect("watcher did not stop");
    assert_eq!(result, Err(Error::SubscriptionClosed));
}

#[tokio::test]
async fn test_kill_stops_cleanly_and_unsubscribes() {
    let (source, factory) = setup_factory();
    let watcher = factory.new_namespace_notify_watcher("unit", ChangeType::ALL).unwrap();
    assert_eq!(source.subscription_count(), 1);

    assert!(watcher.stop().await.is_ok());
    assert!(watcher.is_dying());
    assert_eq!(source.subscription_count(), 0);
}

#[tokio::test]
async fn test_dropping_watcher_releases_subscription() {
    let (source, factory) = setup_factory();
    let watcher = factory.new_empty_namespace_watcher("unit", ChangeType::ALL).await.unwrap();
    assert_eq!(source.subscription_count(), 1);

    drop(watcher);
    wait_for_subscriptions(&source, 0).await;
}

#[tokio::test]
async fn test_empty_batches_are_not_dispatched() {
    enable_logger();
    let (db, tx, _done) = scripted_db();
    let factory = WatcherFactory::new(Arc::new(db), test_config());
    let mut watcher = factory.new_namespace_notify_watcher("unit", ChangeType::ALL).unwrap();
    next_within(&mut watcher).await;

    tx.send(vec![]).await.unwrap();
    assert_no_change(&mut watcher).await;

    tx.send(vec![event(ChangeType::CREATE, "unit", "app/0")]).await.unwrap();
    next_within(&mut watcher).await;
}

#[tokio::test]
async fn test_closed_channel_without_done_exits_cleanly() {
    enable_logger();
    let (db, tx, _done) = scripted_db();
    let factory = WatcherFactory::new(Arc::new(db), test_config());
    let mut watcher = factory.new_namespace_notify_watcher("unit", ChangeType::ALL).unwrap();
    next_within(&mut watcher).await;

    drop(tx);

    let result = timeout(RECV_TIMEOUT, watcher.wait()).await.expect("watcher did not stop");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_done_signal_reports_closed() {
    enable_logger();
    let (db, _tx, done) = scripted_db();
    let factory = WatcherFactory::new(Arc::new(db), test_config());
    let watcher = factory.new_namespace_notify_watcher("unit", ChangeType::ALL).unwrap();

    done.cancel();

    let result = timeout(RECV_TIMEOUT, watcher.wait()).await.expect("watcher did not stop");
    assert_eq!(result, Err(Error::SubscriptionClosed));
}

#[tokio::test]
async fn test_unsupported_watch_degrades_to_silent_watcher() {
    enable_logger();
    let mut db = MockWatchableDb::new();
    db.expect_subscribe()
        .times(1)
        .returning(|_| Err(Error::WatchUnsupported("no change log".into())));
    let factory = WatcherFactory::new(Arc::new(db), test_config());

    let mut watcher = factory.new_namespace_notify_watcher("unit", ChangeType::ALL).unwrap();

    next_within(&mut watcher).await;
    assert_no_change(&mut watcher).await;
    assert!(watcher.stop().await.is_ok());
}

#[tokio::test]
async fn test_subscribe_failure_is_returned() {
    enable_logger();
    let mut db = MockWatchableDb::new();
    db.expect_subscribe()
        .times(1)
        .returning(|_| Err(Error::Subscribe("rejected".into())));
    let factory = WatcherFactory::new(Arc::new(db), test_config());

    let result = factory.new_value_watcher("application", "mysql", ChangeType::ALL);
    assert!(matches!(result, Err(Error::Subscribe(_))));
}

#[tokio::test]
async fn test_initial_query_failure_is_returned() {
    let (source, factory) = setup_factory();

    let result = factory
        .new_namespace_watcher("unit", ChangeType::ALL, |_db: Arc<EventMultiplexer>| async {
            Err::<Vec<String>, _>(Error::Fatal("db down".into()))
        })
        .await;

    match result {
        Err(Error::InitialQuery { namespace, .. }) => assert_eq!(namespace, "unit"),
        other => panic!("unexpected result: {other:?}"),
    }
    // The subscription taken before the query is released again.
    assert_eq!(source.subscription_count(), 0);
}
