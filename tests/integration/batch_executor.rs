//! Integration tests for the batch executor

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use xhs_crawler::executor::{
    BatchConfig, BatchError, BatchExecutor, ErrorKind, Failure, ItemStatus,
};
use xhs_crawler::fingerprint::Fingerprint;
use xhs_crawler::remote::caller_fn;
use xhs_crawler::resume::{ProgressStatus, ProgressStore};
use xhs_crawler::shutdown::StopSignal;

fn config() -> BatchConfig {
    BatchConfig::default()
        .with_rate(1000.0, 10)
        .with_base_backoff(Duration::from_millis(5))
}

fn items(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("item-{i}")).collect()
}

#[tokio::test]
async fn test_auth_failure_aborts_remaining_items() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProgressStore::load(dir.path().join("p.json")).unwrap());
    let called = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&called);
    let caller = caller_fn(move |item: String| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(item.clone());
            if item == "item-2" {
                Err(Failure::http(401, "login required"))
            } else {
                Ok(())
            }
        }
    });

    let executor = BatchExecutor::new()
        .with_progress_store(Arc::clone(&store))
        .with_stop(StopSignal::shared());
    let result = executor.run(items(5), &caller, &config()).await.unwrap();

    assert_eq!(*called.lock().unwrap(), vec!["item-1", "item-2"]);
    assert_eq!(result.outcome("item-1").unwrap().status, ItemStatus::Completed);
    let failed = result.outcome("item-2").unwrap();
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.kind, Some(ErrorKind::AuthInvalid));
    for key in ["item-3", "item-4", "item-5"] {
        assert_eq!(result.outcome(key).unwrap().status, ItemStatus::NotAttempted);
    }

    let abort = result.abort.as_ref().expect("abort flag must be set");
    assert_eq!(abort.fingerprint.as_str(), "item-2");
    assert_eq!(abort.kind, ErrorKind::AuthInvalid);
    assert_eq!(result.not_attempted, 3);
    assert!(result.format_report().contains("ABORTED"));

    // Untouched items stay pending for the next run
    let pending = store.fingerprints_with_status(ProgressStatus::Pending);
    assert_eq!(pending.len(), 3);
    assert_eq!(
        store.get(&Fingerprint::new("item-2").unwrap()).unwrap().status,
        ProgressStatus::Failed
    );
}

#[tokio::test]
async fn test_abort_cuts_short_in_flight_retries() {
    let aborted = Arc::new(AtomicBool::new(false));
    let late_calls = Arc::new(AtomicU32::new(0));

    let (flag, late) = (Arc::clone(&aborted), Arc::clone(&late_calls));
    let caller = caller_fn(move |item: String| {
        let (flag, late) = (Arc::clone(&flag), Arc::clone(&late));
        async move {
            match item.as_str() {
                "item-1" => {
                    if flag.load(Ordering::SeqCst) {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(Failure::http(503, "busy"))
                }
                "item-2" => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    flag.store(true, Ordering::SeqCst);
                    Err(Failure::http(401, "login required"))
                }
                _ => Ok(()),
            }
        }
    });

    let config = config()
        .with_resume(false)
        .with_concurrency(2)
        .with_max_attempts(5)
        .with_base_backoff(Duration::from_millis(200));
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        BatchExecutor::new()
            .with_stop(StopSignal::shared())
            .run(items(3), &caller, &config),
    )
    .await
    .expect("abort must wake the backoff")
    .unwrap();

    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    let retried = result.outcome("item-1").unwrap();
    assert_eq!(retried.status, ItemStatus::Failed);
    assert_eq!(retried.attempts, 1);
    assert!(retried.reason.as_deref().unwrap().starts_with("interrupted"));
    assert_eq!(result.abort.as_ref().unwrap().kind, ErrorKind::AuthInvalid);
    assert_eq!(result.outcome("item-3").unwrap().status, ItemStatus::NotAttempted);
    assert!(!result.cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_abort_releases_items_waiting_for_a_token() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&calls);
    let caller = caller_fn(move |item: String| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(item.clone());
            if item == "item-1" {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(Failure::http(401, "login required"))
            } else {
                Ok(())
            }
        }
    });

    // One token per second: item-2 queues on the limiter behind item-1.
    let config = BatchConfig::default()
        .with_rate(1.0, 1)
        .with_resume(false)
        .with_concurrency(2);
    let start = tokio::time::Instant::now();
    let result = BatchExecutor::new()
        .with_stop(StopSignal::shared())
        .run(items(2), &caller, &config)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(*calls.lock().unwrap(), vec!["item-1"]);
    let queued = result.outcome("item-2").unwrap();
    assert_eq!(queued.status, ItemStatus::Failed);
    assert!(queued.reason.as_deref().unwrap().contains("batch halted"));
    assert!(result.is_aborted());
}

#[tokio::test]
async fn test_fatal_failure_aborts_batch() {
    let caller = caller_fn(|item: String| async move {
        if item == "item-1" {
            Err(Failure::http(404, "Not Found"))
        } else {
            Ok(())
        }
    });
    let executor = BatchExecutor::new().with_stop(StopSignal::shared());
    let result = executor
        .run(items(3), &caller, &config().with_resume(false))
        .await
        .unwrap();

    assert_eq!(result.abort.as_ref().unwrap().kind, ErrorKind::Fatal);
    assert_eq!(result.completed, 0);
    assert_eq!(result.not_attempted, 2);
}

#[tokio::test]
async fn test_partial_failure_continues() {
    let caller = caller_fn(|item: String| async move {
        match item.as_str() {
            "item-2" => Err(Failure::http(502, "Bad Gateway")),
            "item-4" => Err(Failure::missing_field("note_card")),
            _ => Ok(item.len()),
        }
    });
    let executor = BatchExecutor::new().with_stop(StopSignal::shared());
    let result = executor
        .run(items(5), &caller, &config().with_resume(false))
        .await
        .unwrap();

    assert!(!result.is_aborted());
    assert_eq!(result.completed, 3);
    assert_eq!(result.failed, 2);
    assert_eq!(result.outcome("item-2").unwrap().attempts, 3);
    assert_eq!(result.outcome("item-4").unwrap().attempts, 2);
    assert_eq!(
        result.outcome("item-4").unwrap().kind,
        Some(ErrorKind::MalformedResponse)
    );

    let report = result.format_report();
    assert!(report.contains("Item: item-2"));
    assert!(report.contains("Item: item-4"));
    assert!(report.contains("Total failures: 2"));
}

#[tokio::test]
async fn test_concurrency_does_not_change_outcomes() {
    let caller = caller_fn(|item: String| async move {
        tokio::time::sleep(Duration::from_millis(2)).await;
        if item.ends_with('3') || item.ends_with('7') {
            Err(Failure::timeout("request timed out"))
        } else {
            Ok(item)
        }
    });

    let mut summaries = Vec::new();
    for concurrency in [1, 4] {
        let executor = BatchExecutor::new().with_stop(StopSignal::shared());
        let result = executor
            .run(
                items(8),
                &caller,
                &config().with_resume(false).with_concurrency(concurrency),
            )
            .await
            .unwrap();
        let statuses: Vec<_> = result
            .outcomes
            .iter()
            .map(|o| (o.fingerprint.to_string(), o.status))
            .collect();
        summaries.push((result.completed, result.failed, statuses));
    }
    assert_eq!(summaries[0], summaries[1]);
    assert_eq!(summaries[0].0, 6);
}

#[tokio::test]
async fn test_concurrent_workers_never_call_item_twice() {
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let duplicates = Arc::new(AtomicU32::new(0));

    let (seen_c, dup_c) = (Arc::clone(&seen), Arc::clone(&duplicates));
    let caller = caller_fn(move |item: String| {
        let (seen, dup) = (Arc::clone(&seen_c), Arc::clone(&dup_c));
        async move {
            if !seen.lock().unwrap().insert(item) {
                dup.fetch_add(1, Ordering::SeqCst);
            }
            Ok::<_, Failure>(())
        }
    });

    let executor = BatchExecutor::new().with_stop(StopSignal::shared());
    let result = executor
        .run(items(40), &caller, &config().with_resume(false).with_concurrency(8))
        .await
        .unwrap();

    assert_eq!(result.completed, 40);
    assert_eq!(duplicates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_signal_halts_dequeuing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProgressStore::load(dir.path().join("p.json")).unwrap());
    let stop = StopSignal::shared();

    let trigger = Arc::clone(&stop);
    let caller = caller_fn(move |item: String| {
        let trigger = Arc::clone(&trigger);
        async move {
            if item == "item-2" {
                trigger.request_stop();
            }
            Ok::<_, Failure>(())
        }
    });

    let executor = BatchExecutor::new()
        .with_progress_store(Arc::clone(&store))
        .with_stop(Arc::clone(&stop));
    let result = executor.run(items(5), &caller, &config()).await.unwrap();

    // the in-flight item still settles and persists
    assert_eq!(result.completed, 2);
    assert_eq!(result.not_attempted, 3);
    assert!(result.cancelled);
    assert!(!result.is_aborted());
    assert_eq!(store.stats().completed, 2);
    assert_eq!(store.stats().pending, 3);
}

#[tokio::test]
async fn test_completed_items_stay_skipped_when_stopped() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProgressStore::load(dir.path().join("p.json")).unwrap());
    let done = Fingerprint::new("item-1").unwrap();
    store.register([&done]).unwrap();
    store.mark_in_progress(&done).unwrap();
    store.mark_completed(&done).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let caller = caller_fn(move |_item: String| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Failure>(())
        }
    });

    let stop = StopSignal::shared();
    stop.request_stop();
    let result = BatchExecutor::new()
        .with_progress_store(Arc::clone(&store))
        .with_stop(stop)
        .run(items(2), &caller, &config())
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.outcome("item-1").unwrap().status, ItemStatus::Skipped);
    assert_eq!(result.outcome("item-2").unwrap().status, ItemStatus::NotAttempted);
    assert_eq!(result.skipped, 1);
    assert!(result.cancelled);
}

#[tokio::test]
async fn test_stop_during_backoff_interrupts_item() {
    let stop = StopSignal::shared();
    let trigger = Arc::clone(&stop);
    let caller = caller_fn(move |_item: String| {
        let trigger = Arc::clone(&trigger);
        async move {
            trigger.request_stop();
            Err::<(), _>(Failure::http(503, "busy"))
        }
    });

    let executor = BatchExecutor::new().with_stop(stop);
    let config = config()
        .with_resume(false)
        .with_base_backoff(Duration::from_secs(30));
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.run(items(2), &caller, &config),
    )
    .await
    .expect("backoff must be cut short by the stop signal")
    .unwrap();

    let first = result.outcome("item-1").unwrap();
    assert_eq!(first.status, ItemStatus::Failed);
    assert_eq!(first.attempts, 1);
    assert!(first.reason.as_deref().unwrap().starts_with("interrupted"));
    assert_eq!(result.outcome("item-2").unwrap().status, ItemStatus::NotAttempted);
    assert!(result.cancelled);
}

#[tokio::test]
async fn test_duplicate_fingerprints_rejected_before_any_call() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let caller = caller_fn(move |_item: String| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Failure>(())
        }
    });

    let items = vec![
        "https://www.xiaohongshu.com/explore/abc?xsec_token=1".to_string(),
        "https://www.xiaohongshu.com/explore/abc?xsec_token=2".to_string(),
    ];
    let err = BatchExecutor::new()
        .with_stop(StopSignal::shared())
        .run(items, &caller, &config().with_resume(false))
        .await
        .unwrap_err();

    assert!(matches!(err, BatchError::DuplicateFingerprint(ref fp) if fp == "abc"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_batch() {
    let caller = caller_fn(|_item: String| async { Ok::<_, Failure>(()) });
    let result = BatchExecutor::new()
        .with_stop(StopSignal::shared())
        .run(Vec::<String>::new(), &caller, &config().with_resume(false))
        .await
        .unwrap();
    assert!(result.outcomes.is_empty());
    assert!(!result.is_aborted());
}
