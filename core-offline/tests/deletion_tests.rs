//! Integration tests for deleting downloads and looking them up

mod common;

use common::*;
use core_offline::{DerivedState, OfflineError};
use core_runtime::events::DownloadState;

#[tokio::test]
async fn test_delete_twice() {
    let harness = Harness::new();
    let path = harness.seed_downloaded("ep2").await;
    let manager = harness.ready_manager().await;

    manager.request_delete(&id("ep2")).await.unwrap();
    assert!(!harness.fs.contains(&path));
    assert!(!harness.fs.contains(&path.join("index.m3u8")));

    let err = manager.request_delete(&id("ep2")).await.unwrap_err();
    assert!(matches!(err, OfflineError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_of_running_download_is_rejected() {
    let harness = Harness::new();
    let manager = harness.ready_manager().await;

    manager.request_download(asset("busy")).await.unwrap();
    let err = manager.request_delete(&id("busy")).await.unwrap_err();

    assert!(matches!(err, OfflineError::NotFound(_)));
    assert!(manager
        .query_state(&id("busy"))
        .await
        .unwrap()
        .is_downloading());
}

#[tokio::test]
async fn test_failed_storage_removal_keeps_entry() {
    let harness = Harness::new();
    let path = harness.seed_downloaded("ro").await;
    let manager = harness.ready_manager().await;
    harness.fs.fail_deletes();

    let err = manager.request_delete(&id("ro")).await.unwrap_err();
    assert!(matches!(err, OfflineError::Io(_)));
    assert!(err.is_recoverable());

    assert!(harness.fs.contains(&path));
    assert!(harness.has_entry("ro"));
    assert_eq!(
        manager.query_state(&id("ro")).await.unwrap(),
        DerivedState::Downloaded
    );
}

#[tokio::test]
async fn test_delete_by_prefix() {
    let harness = Harness::new();
    harness.seed_downloaded("show-1").await;
    harness.seed_downloaded("show-2").await;
    harness.seed_downloaded("movie").await;
    let manager = harness.ready_manager().await;
    let mut events = manager.subscribe();

    manager.request_download(asset("show-3")).await.unwrap();
    let handle = harness.engine.handle_for("show-3");

    let summary = manager.request_delete_by_prefix("show-").await.unwrap();
    assert_eq!(summary.deleted, vec![id("show-1"), id("show-2")]);
    assert_eq!(summary.cancelled, vec![id("show-3")]);
    assert!(summary.failed.is_empty());
    assert_eq!(harness.engine.aborted(), vec![handle]);

    assert_eq!(manager.query_completed().await.unwrap(), vec![asset("movie")]);
    assert!(!harness.has_entry("show-1"));
    assert!(!harness.has_entry("show-2"));

    harness.engine.cancelled(handle);
    wait_for_state(&mut events, "show-3", DownloadState::NotDownloaded).await;
    assert!(manager.find_by_prefix("show-").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_by_empty_prefix_clears_everything() {
    let harness = Harness::new();
    harness.seed_downloaded("a").await;
    harness.seed_downloaded("b").await;
    harness.kv.insert_raw("player.volume", b"0.8");
    let manager = harness.ready_manager().await;
    manager.request_download(asset("c")).await.unwrap();

    let summary = manager.request_delete_by_prefix("").await.unwrap();
    assert_eq!(summary.deleted, vec![id("a"), id("b")]);
    assert_eq!(summary.cancelled, vec![id("c")]);

    // Keys outside the download namespace are left alone.
    assert_eq!(harness.kv.keys(), vec!["player.volume".to_string()]);
}

#[tokio::test]
async fn test_delete_by_prefix_reports_failures() {
    let harness = Harness::new();
    harness.seed_downloaded("ep-1").await;
    let manager = harness.ready_manager().await;
    harness.fs.fail_deletes();

    let summary = manager.request_delete_by_prefix("ep-").await.unwrap();
    assert!(summary.deleted.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, id("ep-1"));
    assert!(harness.has_entry("ep-1"));
}

#[tokio::test]
async fn test_delete_by_prefix_leaves_everything_when_listing_fails() {
    let harness = Harness::new();
    harness.seed_downloaded("show-1").await;
    let manager = harness.ready_manager().await;
    manager.request_download(asset("show-2")).await.unwrap();
    harness.kv.fail_listing();

    let err = manager.request_delete_by_prefix("show-").await.unwrap_err();
    assert!(matches!(err, OfflineError::Bridge(_)));

    assert!(harness.engine.aborted().is_empty());
    assert!(harness.has_entry("show-1"));
    assert!(manager
        .query_state(&id("show-2"))
        .await
        .unwrap()
        .is_downloading());
}

#[tokio::test]
async fn test_find_exact_and_by_prefix() {
    let harness = Harness::new();
    harness.seed_downloaded("show-1").await;
    harness.seed_downloaded("movie").await;
    let manager = harness.ready_manager().await;
    manager.request_download(asset("show-2")).await.unwrap();

    let found: Vec<String> = manager
        .find_by_prefix("show-")
        .await
        .unwrap()
        .into_iter()
        .map(|asset| asset.id.to_string())
        .collect();
    assert_eq!(found, vec!["show-1", "show-2"]);

    assert_eq!(
        manager.find_exact(&id("show-2")).await.unwrap(),
        Some(asset("show-2"))
    );
    assert_eq!(
        manager.find_exact(&id("movie")).await.unwrap(),
        Some(asset("movie"))
    );
    assert_eq!(manager.find_exact(&id("nope")).await.unwrap(), None);
    assert_eq!(manager.find_by_prefix("").await.unwrap().len(), 3);
}
