//! A device syncing with the authority over real HTTP.

mod common;

use std::sync::Arc;

use chrono::Utc;
use pretty_assertions::assert_eq;
use recall_authority::{router, AppState};
use recall_core::Answer;
use recall_sync::remote::RemoteAuthority;
use recall_sync::{
    ensure_registered, CardRepository, HttpConnector, HttpRemote, IdentityAuthority, SqliteStore,
    StudyService, SyncEngine, SyncError, SyncStatus,
};

use common::fixtures::sample_md_content;

const DECK: &str = "rust/basics.md";

/// Serve the authority on an ephemeral port and return its base URL.
async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_sync_over_http() {
    let authority = Arc::new(IdentityAuthority::new());
    let endpoint = spawn_server(AppState::new(Arc::clone(&authority))).await;
    let client = reqwest::Client::new();
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("rust")).unwrap();
    std::fs::write(dir.path().join(DECK), sample_md_content(2, false)).unwrap();

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let device = ensure_registered(store.as_ref(), &client, &endpoint, "laptop")
        .await
        .unwrap();
    // A second call reuses the stored identity.
    let again = ensure_registered(store.as_ref(), &client, &endpoint, "laptop")
        .await
        .unwrap();
    assert_eq!(again, device);

    let engine = SyncEngine::new(
        Arc::clone(&store),
        Arc::new(HttpConnector::with_client(client.clone(), device.token.clone())),
        device.device_id.clone(),
    );
    let roots = vec![dir.path().to_path_buf()];

    let status = engine.start_sync(&endpoint, &roots).await.unwrap();
    assert!(matches!(status, SyncStatus::Completed { .. }), "{status:?}");
    assert_eq!(
        std::fs::read_to_string(dir.path().join(DECK)).unwrap(),
        sample_md_content(2, true)
    );
    assert_eq!(store.list_cards(None).unwrap().len(), 2);

    let study = StudyService::new(Arc::clone(&store), device.device_id.clone());
    let session = study.begin_session(Some("rust"), Utc::now()).unwrap();
    let answer = Answer {
        card_id: 1,
        rating: 3,
        typed: None,
        time_taken_ms: Some(1800),
    };
    let graded = study.submit_review(&session, answer, Utc::now()).unwrap();

    let status = engine.start_sync(&endpoint, &roots).await.unwrap();
    match status {
        SyncStatus::Completed { stats, .. } => assert_eq!(stats.reviews_synced, 1),
        other => panic!("expected completed sync, got {other:?}"),
    }
    assert_eq!(authority.reviews_for_card(1), vec![graded.review.clone()]);
    assert_eq!(
        authority.card_state(&device.device_id, 1),
        Some(graded.review.state_after)
    );

    let remote = HttpRemote::new(client, endpoint, device.token);
    let status = remote.device_status().await.unwrap();
    assert_eq!(status.name, "laptop");
    assert_eq!(status.card_count, 2);
    assert_eq!(status.review_count, 1);
    remote.health().await.unwrap();
}

#[tokio::test]
async fn test_unknown_token_is_not_authenticated() {
    let authority = Arc::new(IdentityAuthority::new());
    let endpoint = spawn_server(AppState::new(authority)).await;
    let remote = HttpRemote::new(reqwest::Client::new(), endpoint, "stale-token");

    let result = remote.device_status().await;

    assert!(matches!(result, Err(SyncError::NotAuthenticated)));
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authority.json");
    let authority = Arc::new(IdentityAuthority::new());
    let endpoint = spawn_server(AppState::with_snapshot(authority, path.clone())).await;

    let client = reqwest::Client::new();
    let registered = HttpRemote::register(&client, &endpoint, "laptop")
        .await
        .unwrap();
    let remote = HttpRemote::new(client, endpoint, registered.token.clone());
    let request = common::fixtures::sync_upload_request(vec![common::fixtures::sync_file(
        DECK,
        &sample_md_content(3, false),
    )]);
    remote.upload(request).await.unwrap();

    let restored = IdentityAuthority::load_snapshot(&path).unwrap();
    assert_eq!(restored.last_id(), 3);
    assert_eq!(restored.authenticate(&registered.token).unwrap(), registered.device_id);
}
