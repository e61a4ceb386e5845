//! Sync API tests.

mod common;

use axum::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use pretty_assertions::assert_eq;
use recall_sync::remote::{
    ConfirmDeleteResponse, OrphanInfo, PullResponse, PushReviewsResponse, UploadResponse,
};
use recall_sync::{hash_content, IdentityAuthority};

use common::fixtures;
use common::TestContext;

const DECK: &str = "rust/basics.md";

fn authorized(request: TestRequest, token: &str) -> TestRequest {
    request.add_header(
        AUTHORIZATION,
        HeaderValue::from_str(&TestContext::auth_header_value(token)).unwrap(),
    )
}

async fn upload(server: &TestServer, token: &str, content: &str) -> UploadResponse {
    let response = authorized(server.post("/api/sync/upload"), token)
        .json(&fixtures::sync_upload_request(vec![fixtures::sync_file(
            DECK, content,
        )]))
        .await;
    response.assert_status_ok();
    response.json()
}

async fn pull(server: &TestServer, token: &str) -> PullResponse {
    let response = authorized(server.post("/api/sync/pull"), token)
        .json(&fixtures::sync_pull_request())
        .await;
    response.assert_status_ok();
    response.json()
}

/// Test sync pull returns empty for new device.
#[tokio::test]
async fn test_sync_pull_initial() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, token) = ctx.create_test_device("laptop");

    let body = pull(&server, &token).await;

    assert!(body.cards.is_empty());
    assert!(body.card_states.is_empty());
    assert!(body.settings.decks.is_empty());
}

/// Test sync upload creates new cards.
#[tokio::test]
async fn test_sync_upload_new_cards() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, token) = ctx.create_test_device("laptop");

    let body = upload(&server, &token, &fixtures::sample_md_content(3, false)).await;

    // Should have assigned 3 new IDs
    let ids: Vec<i64> = body.new_ids.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    // Should have updated file content
    assert_eq!(body.updated_files.len(), 1);
    let updated = &body.updated_files[0];
    assert_eq!(updated.path, DECK);
    assert_eq!(updated.content, fixtures::sample_md_content(3, true));
    assert_eq!(updated.hash, hash_content(&updated.content));

    // No orphaned cards on first upload
    assert!(body.orphaned_cards.is_empty());
}

/// Test sync upload with existing card IDs.
#[tokio::test]
async fn test_sync_upload_existing_ids_needs_no_rewrite() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, token) = ctx.create_test_device("laptop");

    let body = upload(&server, &token, &fixtures::sample_md_content(2, true)).await;

    assert!(body.new_ids.is_empty());
    assert!(body.updated_files.is_empty());
    assert_eq!(ctx.authority.last_id(), 2);

    let pulled = pull(&server, &token).await;
    assert_eq!(pulled.cards.len(), 2);
    assert_eq!(pulled.cards[0].deck_path, "rust");
}

#[tokio::test]
async fn test_repeated_upload_replays_assignment() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, token) = ctx.create_test_device("laptop");
    let content = fixtures::sample_md_content(2, false);

    let first = upload(&server, &token, &content).await;
    let second = upload(&server, &token, &content).await;

    assert_eq!(first, second);
    assert_eq!(ctx.authority.last_id(), 2);
}

#[tokio::test]
async fn test_upload_rejects_hash_mismatch() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, token) = ctx.create_test_device("laptop");
    let mut file = fixtures::sync_file(DECK, &fixtures::sample_md_content(1, false));
    file.hash = hash_content("something else");

    let response = authorized(server.post("/api/sync/upload"), &token)
        .json(&fixtures::sync_upload_request(vec![file]))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(ctx.authority.last_id(), 0);
}

#[tokio::test]
async fn test_upload_reports_identity_exhaustion() {
    let ctx = TestContext::with_authority(IdentityAuthority::with_last_id(i64::MAX));
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, token) = ctx.create_test_device("laptop");

    let response = authorized(server.post("/api/sync/upload"), &token)
        .json(&fixtures::sync_upload_request(vec![fixtures::sync_file(
            DECK,
            &fixtures::sample_md_content(1, false),
        )]))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "identity_exhausted");
}

#[tokio::test]
async fn test_removed_card_is_orphaned_until_confirmed() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, token) = ctx.create_test_device("laptop");
    upload(&server, &token, &fixtures::sample_md_content(2, false)).await;

    let body = upload(&server, &token, &fixtures::sample_md_content(1, true)).await;
    assert_eq!(
        body.orphaned_cards,
        vec![OrphanInfo {
            card_id: 2,
            question_preview: "Question 2?".to_string(),
        }]
    );

    let response = authorized(server.post("/api/sync/confirm-delete"), &token)
        .json(&fixtures::confirm_delete_request(vec![1, 2]))
        .await;
    response.assert_status_ok();
    let deleted: ConfirmDeleteResponse = response.json();
    // Card 1 is still present in the file and is not an orphan.
    assert_eq!(deleted.deleted_count, 1);

    let pulled = pull(&server, &token).await;
    let card = pulled.cards.iter().find(|c| c.id == 2).unwrap();
    assert!(card.deleted_at.is_some());
    assert!(ctx.authority.card(1).unwrap().deleted_at.is_none());
}

#[tokio::test]
async fn test_push_reviews_then_pull_state() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (device, token) = ctx.create_test_device("laptop");
    upload(&server, &token, &fixtures::sample_md_content(1, false)).await;

    let review = fixtures::review(1, 3);
    let response = authorized(server.post("/api/sync/push-reviews"), &token)
        .json(&fixtures::push_reviews_request(vec![review.clone()]))
        .await;
    response.assert_status_ok();
    let pushed: PushReviewsResponse = response.json();
    assert_eq!(pushed.synced_count, 1);

    let pulled = pull(&server, &token).await;
    assert_eq!(pulled.card_states.len(), 1);
    assert_eq!(pulled.card_states[0].card_id, 1);
    assert_eq!(pulled.card_states[0].state, review.state_after);
    assert_eq!(ctx.authority.reviews_for_card(1), vec![review]);
    assert_eq!(ctx.authority.device_status(&device).unwrap().review_count, 1);
}

#[tokio::test]
async fn test_states_are_scoped_to_the_pushing_device() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();
    let (_, laptop) = ctx.create_test_device("laptop");
    let (_, phone) = ctx.create_test_device("phone");
    upload(&server, &laptop, &fixtures::sample_md_content(1, false)).await;

    authorized(server.post("/api/sync/push-reviews"), &laptop)
        .json(&fixtures::push_reviews_request(vec![fixtures::review(1, 3)]))
        .await
        .assert_status_ok();

    let pulled = pull(&server, &phone).await;
    assert!(pulled.card_states.is_empty());
    // The phone never uploaded the file, so the card is not its to pull.
    assert!(pulled.cards.is_empty());
}

#[tokio::test]
async fn test_sync_routes_require_authentication() {
    let ctx = TestContext::new();
    let server = TestServer::new(ctx.router()).unwrap();

    let response = server
        .post("/api/sync/pull")
        .json(&fixtures::sync_pull_request())
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}
