//! Test fixtures and factory functions for creating test data.

use chrono::Utc;
use recall_core::{grade, initial_state, Answer, EffectiveSettings, Review};
use recall_sync::hash_content;
use recall_sync::remote::{
    ConfirmDeleteRequest, PullRequest, PushReviewsRequest, SyncFile, UploadRequest,
};
use serde_json::{json, Value};

/// Generate sample MD content with a specified number of cards.
///
/// # Arguments
/// * `num_cards` - Number of cards to generate
/// * `with_ids` - Whether to include ID lines (numbered from 1)
pub fn sample_md_content(num_cards: usize, with_ids: bool) -> String {
    (0..num_cards)
        .map(|i| {
            if with_ids {
                format!(
                    "ID: {}\nQ: Question {}?\nA: Answer {}.\n",
                    i + 1,
                    i + 1,
                    i + 1
                )
            } else {
                format!("Q: Question {}?\nA: Answer {}.\n", i + 1, i + 1)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Create a SyncFile for upload requests.
pub fn sync_file(path: &str, content: &str) -> SyncFile {
    SyncFile {
        path: path.to_string(),
        content: content.to_string(),
        hash: hash_content(content),
    }
}

pub fn sync_upload_request(files: Vec<SyncFile>) -> UploadRequest {
    UploadRequest { files }
}

pub fn sync_pull_request() -> PullRequest {
    PullRequest { last_sync_at: None }
}

pub fn confirm_delete_request(card_ids: Vec<i64>) -> ConfirmDeleteRequest {
    ConfirmDeleteRequest { card_ids }
}

/// A graded flip-mode review of a new card under default settings.
pub fn review(card_id: i64, rating: u8) -> Review {
    let settings = EffectiveSettings::default();
    let state = initial_state(settings.algorithm);
    let answer = Answer {
        card_id,
        rating,
        typed: None,
        time_taken_ms: Some(2500),
    };
    grade(&settings, &state, "Answer.", answer, Utc::now())
        .unwrap()
        .review
}

pub fn push_reviews_request(reviews: Vec<Review>) -> PushReviewsRequest {
    PushReviewsRequest {
        reviews,
        settings: None,
    }
}

/// Create a device registration request body.
pub fn device_register_request(name: Option<&str>) -> Value {
    match name {
        Some(name) => json!({ "name": name }),
        None => Value::Null,
    }
}
