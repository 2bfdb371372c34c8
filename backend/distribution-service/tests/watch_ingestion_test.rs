//! Watch event ingestion, aggregation and retention

mod common;

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde_json::json;
use uuid::Uuid;

use common::{anonymous_viewer, payload, test_settings, user_viewer, TestHarness};
use distribution_service::error::AppError;
use distribution_service::models::{ViewSample, Viewer, WatchEvent};

#[tokio::test]
async fn test_watch_duration_skew_edges() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());
    let (_, viewer) = user_viewer();

    // Exactly 1.1x the total duration is tolerated
    assert!(h
        .state
        .watch_events
        .record_watch_event(post_id, &viewer, payload(11.0, 10.0, 1.0))
        .await
        .is_ok());

    let err = h
        .state
        .watch_events
        .record_watch_event(post_id, &viewer, payload(11.01, 10.0, 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidPayload(_)));
    assert!(err.is_client_error());

    h.settle().await;
    assert_eq!(h.watch_events.count(), 1);
}

#[tokio::test]
async fn test_rate_and_duration_bounds() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());
    let viewer = Viewer::anonymous();
    let store = &h.state.watch_events;

    assert!(store
        .record_watch_event(post_id, &viewer, payload(0.0, 10.0, 0.0))
        .await
        .is_ok());
    assert!(store
        .record_watch_event(post_id, &viewer, payload(10.0, 10.0, 1.0))
        .await
        .is_ok());

    let rejected = [
        payload(5.0, 10.0, 1.0001),
        payload(5.0, 10.0, -0.01),
        payload(-1.0, 10.0, 0.5),
        payload(5.0, -10.0, 0.5),
    ];
    for body in rejected {
        assert!(matches!(
            store.record_watch_event(post_id, &viewer, body).await,
            Err(AppError::InvalidPayload(_))
        ));
    }

    let mut negative_skip = payload(5.0, 10.0, 0.5);
    negative_skip.skip_time = Some(-2.0);
    assert!(store
        .record_watch_event(post_id, &viewer, negative_skip)
        .await
        .is_err());

    let mut long_session = payload(5.0, 10.0, 0.5);
    long_session.session_id = Some("s".repeat(129));
    assert!(store
        .record_watch_event(post_id, &viewer, long_session)
        .await
        .is_err());

    h.settle().await;
    assert_eq!(h.watch_events.count(), 2);
}

#[tokio::test]
async fn test_batch_with_three_bad_items() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());
    let (_, viewer) = user_viewer();

    let mut items: Vec<serde_json::Value> = (0..97)
        .map(|i| {
            json!({
                "postId": post_id,
                "watchDuration": (i % 10) as f64,
                "totalDuration": 10.0,
                "completionRate": (i % 10) as f64 / 10.0,
                "source": "explore",
            })
        })
        .collect();
    items.push(json!({
        "postId": post_id,
        "watchDuration": 5.0,
        "totalDuration": 10.0,
        "completionRate": 1.5,
    }));
    items.push(json!({
        "postId": post_id,
        "watchDuration": 50.0,
        "totalDuration": 10.0,
        "completionRate": 0.5,
    }));
    items.push(json!({
        "watchDuration": 5.0,
        "totalDuration": 10.0,
        "completionRate": 0.5,
    }));

    let outcome = h
        .state
        .watch_events
        .record_watch_events_batch(&viewer, items)
        .await
        .unwrap();

    assert_eq!(outcome.processed, 97);
    assert_eq!(outcome.failed, 3);

    h.settle().await;
    assert_eq!(h.watch_events.count(), 97);
    assert_eq!(h.post_metrics.snapshot(post_id).unwrap().total_views, 97);
}

#[tokio::test]
async fn test_batch_storage_failure_does_not_abort() {
    let h = TestHarness::new();
    let healthy = h.seed_post(Uuid::new_v4(), Utc::now());
    let broken = h.seed_post(Uuid::new_v4(), Utc::now());
    h.watch_events.fail_inserts_for(broken);

    let item = |post_id: Uuid| {
        json!({
            "postId": post_id,
            "watchDuration": 3.0,
            "totalDuration": 10.0,
            "completionRate": 0.3,
        })
    };
    let items = vec![item(healthy), item(broken), item(healthy)];

    let outcome = h
        .state
        .watch_events
        .record_watch_events_batch(&Viewer::anonymous(), items)
        .await
        .unwrap();

    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.failed, 1);
}

#[tokio::test]
async fn test_oversized_batch_is_rejected_outright() {
    let h = TestHarness::new();
    let items = vec![json!({}); 101];

    let err = h
        .state
        .watch_events
        .record_watch_events_batch(&Viewer::anonymous(), items)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.watch_events.count(), 0);
}

/// Store an anonymous event for `post_id` and return its id
fn stored_event(h: &TestHarness, post_id: Uuid) -> Uuid {
    let event = WatchEvent::new(
        post_id,
        &Viewer::anonymous(),
        payload(1.0, 10.0, 0.1),
        Utc::now(),
    );
    let id = event.id;
    h.watch_events.seed(event);
    id
}

#[tokio::test]
async fn test_means_do_not_depend_on_order() {
    let h = TestHarness::new();
    let author = Uuid::new_v4();
    let forward = h.seed_post(author, Utc::now());
    let backward = h.seed_post(author, Utc::now());

    let samples: Vec<ViewSample> = (0..40)
        .map(|i| ViewSample {
            watch_duration: (i * 7 % 31) as f64,
            completion_rate: (i * 13 % 100) as f64 / 100.0,
            replayed: i % 3 == 0,
            saved: i % 5 == 0,
            shared: i % 7 == 0,
            skipped: i % 4 == 0,
            observed_at: Utc::now(),
        })
        .collect();

    let aggregator = &h.state.aggregator;
    for s in &samples {
        let event_id = stored_event(&h, forward);
        aggregator
            .apply(event_id, forward, s, false, Utc::now())
            .await
            .unwrap();
    }
    for s in samples.iter().rev() {
        let event_id = stored_event(&h, backward);
        aggregator
            .apply(event_id, backward, s, false, Utc::now())
            .await
            .unwrap();
    }

    let a = h.post_metrics.snapshot(forward).unwrap();
    let b = h.post_metrics.snapshot(backward).unwrap();
    let close = |x: f64, y: f64| (x - y).abs() < 1e-9;

    assert_eq!(a.total_views, b.total_views);
    assert!(close(a.avg_watch_time, b.avg_watch_time));
    assert!(close(a.completion_rate, b.completion_rate));
    assert!(close(a.replay_rate, b.replay_rate));
    assert!(close(a.save_rate, b.save_rate));
    assert!(close(a.share_rate, b.share_rate));
    assert!(close(a.skip_rate, b.skip_rate));

    let expected_completion =
        samples.iter().map(|s| s.completion_rate).sum::<f64>() / samples.len() as f64;
    assert!(close(a.completion_rate, expected_completion));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifty_concurrent_events_are_all_counted() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());

    let calls = (0..50).map(|_| {
        let store = h.state.watch_events.clone();
        tokio::spawn(async move {
            let (_, viewer) = user_viewer();
            store
                .record_watch_event(post_id, &viewer, payload(4.0, 10.0, 0.4))
                .await
        })
    });
    for result in join_all(calls).await {
        assert!(result.unwrap().is_ok());
    }

    h.settle().await;
    let metrics = h.post_metrics.snapshot(post_id).unwrap();
    assert_eq!(metrics.total_views, 50);
    assert_eq!(metrics.unique_views, 50);
    assert!((metrics.completion_rate - 0.4).abs() < 1e-9);
    assert!(metrics.viral_score > 0.0);
}

#[tokio::test]
async fn test_repeat_viewer_counts_once_toward_unique_views() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());
    let (_, user) = user_viewer();
    let anon = anonymous_viewer("198.51.100.7:40000");
    let same_anon_new_port = anonymous_viewer("198.51.100.7:40001");

    for viewer in [&user, &user, &anon, &same_anon_new_port] {
        h.state
            .watch_events
            .record_watch_event(post_id, viewer, payload(2.0, 10.0, 0.2))
            .await
            .unwrap();
    }
    h.state
        .watch_events
        .record_watch_event(post_id, &Viewer::anonymous(), payload(2.0, 10.0, 0.2))
        .await
        .unwrap();

    h.settle().await;
    let metrics = h.post_metrics.snapshot(post_id).unwrap();
    assert_eq!(metrics.total_views, 5);
    assert_eq!(metrics.unique_views, 2);
    assert!(metrics.unique_views <= metrics.total_views);
}

#[tokio::test]
async fn test_dedup_outage_still_counts_views() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());
    h.view_dedup.fail(true);

    let (_, viewer) = user_viewer();
    h.state
        .watch_events
        .record_watch_event(post_id, &viewer, payload(2.0, 10.0, 0.2))
        .await
        .unwrap();

    h.settle().await;
    let metrics = h.post_metrics.snapshot(post_id).unwrap();
    assert_eq!(metrics.total_views, 1);
    assert_eq!(metrics.unique_views, 0);
}

#[tokio::test]
async fn test_anonymous_views_never_touch_interests() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());
    h.state
        .interests
        .auto_tag_post(post_id, "#coding tutorial")
        .await
        .unwrap();

    let (user_id, viewer) = user_viewer();
    let store = &h.state.watch_events;
    store
        .record_watch_event(post_id, &anonymous_viewer("203.0.113.1"), payload(10.0, 10.0, 1.0))
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.interests.weight(user_id, "coding"), None);

    store
        .record_watch_event(post_id, &viewer, payload(10.0, 10.0, 1.0))
        .await
        .unwrap();
    h.settle().await;
    assert!(h.interests.weight(user_id, "coding").unwrap() > 0.0);
}

#[tokio::test]
async fn test_batch_and_single_submissions_aggregate_identically() {
    let h = TestHarness::new();
    let author = Uuid::new_v4();
    let batched = h.seed_post(author, Utc::now());
    let single = h.seed_post(author, Utc::now());
    let (_, viewer) = user_viewer();

    let bodies: Vec<(f64, f64)> = (0..20)
        .map(|i| ((i * 3 % 10) as f64, (i * 3 % 10) as f64 / 10.0))
        .collect();

    let items = bodies
        .iter()
        .map(|(watch, completion)| {
            json!({
                "postId": batched,
                "watchDuration": watch,
                "totalDuration": 10.0,
                "completionRate": completion,
            })
        })
        .collect();
    let outcome = h
        .state
        .watch_events
        .record_watch_events_batch(&viewer, items)
        .await
        .unwrap();
    assert_eq!(outcome.processed, bodies.len());

    for (watch, completion) in &bodies {
        h.state
            .watch_events
            .record_watch_event(single, &viewer, payload(*watch, 10.0, *completion))
            .await
            .unwrap();
    }

    h.settle().await;
    let a = h.post_metrics.snapshot(batched).unwrap();
    let b = h.post_metrics.snapshot(single).unwrap();
    assert_eq!(a.total_views, 20);
    assert_eq!(a.total_views, b.total_views);
    assert!((a.avg_watch_time - b.avg_watch_time).abs() < 1e-9);
    assert!((a.completion_rate - b.completion_rate).abs() < 1e-9);
}

#[tokio::test]
async fn test_saturated_queue_still_aggregates_every_view() {
    let mut settings = test_settings();
    settings.tasks.workers = 1;
    settings.tasks.queue_capacity = 2;
    let h = TestHarness::with_settings(settings);
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());

    for _ in 0..50 {
        let (_, viewer) = user_viewer();
        h.state
            .watch_events
            .record_watch_event(post_id, &viewer, payload(4.0, 10.0, 0.4))
            .await
            .unwrap();
    }

    h.settle().await;
    let stats = h.state.tasks.stats();
    assert!(stats.rejected > 0);

    let metrics = h.post_metrics.snapshot(post_id).unwrap();
    assert_eq!(metrics.total_views, 50);
    assert_eq!(metrics.unique_views, 50);
    assert_eq!(h.watch_events.pending_count(), 0);
}

#[tokio::test]
async fn test_view_before_creation_hook_is_kept() {
    let h = TestHarness::new();
    let post_id = Uuid::new_v4();
    let author = Uuid::new_v4();

    h.state
        .watch_events
        .record_watch_event(post_id, &Viewer::anonymous(), payload(1.0, 10.0, 0.1))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.state.tasks.stats().failed, 0);
    let metrics = h.post_metrics.snapshot(post_id).unwrap();
    assert_eq!(metrics.total_views, 1);
    assert_eq!(metrics.author_id, None);

    let attached = h
        .state
        .aggregator
        .initialize_post(post_id, author, Utc::now())
        .await
        .unwrap();
    assert!(attached);

    let metrics = h.post_metrics.snapshot(post_id).unwrap();
    assert_eq!(metrics.author_id, Some(author));
    assert_eq!(metrics.total_views, 1);
}

#[tokio::test]
async fn test_reconcile_picks_up_views_whose_task_gave_up() {
    let h = TestHarness::new();
    let post_id = h.seed_post(Uuid::new_v4(), Utc::now());
    h.post_metrics.fail_view_writes(3);

    h.state
        .watch_events
        .record_watch_event(post_id, &Viewer::anonymous(), payload(6.0, 10.0, 0.6))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.state.tasks.stats().failed, 1);
    assert_eq!(h.post_metrics.snapshot(post_id).unwrap().total_views, 0);
    assert_eq!(h.watch_events.pending_count(), 1);

    // Still inside the grace period
    let store = &h.state.watch_events;
    assert_eq!(store.reconcile_pending(Utc::now()).await.unwrap(), 0);

    let later = Utc::now() + Duration::minutes(10);
    assert_eq!(store.reconcile_pending(later).await.unwrap(), 1);
    assert_eq!(store.reconcile_pending(later).await.unwrap(), 0);

    let metrics = h.post_metrics.snapshot(post_id).unwrap();
    assert_eq!(metrics.total_views, 1);
    assert!((metrics.completion_rate - 0.6).abs() < 1e-9);
    assert_eq!(h.watch_events.pending_count(), 0);
}

#[tokio::test]
async fn test_purge_removes_only_expired_events() {
    let h = TestHarness::new();
    let now = Utc::now();
    let post_id = Uuid::new_v4();
    let viewer = Viewer::anonymous();

    for days in [91, 120, 89, 1] {
        h.watch_events.seed(WatchEvent::new(
            post_id,
            &viewer,
            payload(1.0, 10.0, 0.1),
            now - Duration::days(days),
        ));
    }

    let deleted = h.state.watch_events.purge_expired(now).await.unwrap();
    assert_eq!(deleted, 2);

    let remaining: Vec<_> = h.watch_events.all();
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|e| e.created_at > now - Duration::days(90)));
}
