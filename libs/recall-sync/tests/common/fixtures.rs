//! Test fixtures and factory functions for creating test data.

use recall_core::Answer;

/// Generate sample markdown with a specified number of cards.
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

/// A flip-mode answer with the given 4-point rating.
pub fn flip(card_id: i64, rating: u8) -> Answer<'static> {
    Answer {
        card_id,
        rating,
        typed: None,
        time_taken_ms: Some(2500),
    }
}
