//! Review grading: answer matching plus scheduling into one review record.

use chrono::{DateTime, Utc};

use crate::algorithm::{schedule, SchedulingResult};
use crate::error::ValidationError;
use crate::matching::{compare, MatchResult};
use crate::types::{AnswerMode, CardState, EffectiveSettings, Review};

/// One answer submitted by the user.
#[derive(Debug, Clone, Copy)]
pub struct Answer<'a> {
    pub card_id: i64,
    /// Raw button value on the session's rating scale.
    pub rating: u8,
    /// Present in typed mode.
    pub typed: Option<&'a str>,
    pub time_taken_ms: Option<u32>,
}

/// Everything produced by grading one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Graded {
    pub review: Review,
    pub scheduling: SchedulingResult,
    pub match_result: Option<MatchResult>,
}

/// Grade an answer against `correct_answer` and schedule the card.
///
/// Validation happens before any computation: an unknown rating for the
/// scale, or a bad fuzzy threshold, returns an error and produces nothing.
pub fn grade(
    settings: &EffectiveSettings,
    state: &CardState,
    correct_answer: &str,
    answer: Answer<'_>,
    now: DateTime<Utc>,
) -> Result<Graded, ValidationError> {
    let rating = settings.rating_scale.rating(answer.rating)?;

    let match_result = answer
        .typed
        .map(|typed| {
            compare(
                typed,
                correct_answer,
                settings.matching_mode,
                settings.fuzzy_threshold,
            )
        })
        .transpose()?;

    let scheduling = schedule(settings.algorithm, state, rating, now);

    let review = Review {
        card_id: answer.card_id,
        reviewed_at: now,
        rating,
        rating_scale: settings.rating_scale,
        answer_mode: if answer.typed.is_some() {
            AnswerMode::Typed
        } else {
            AnswerMode::Flip
        },
        typed_answer: answer.typed.map(str::to_string),
        was_correct: match_result.as_ref().map(|m| m.is_correct),
        time_taken_ms: answer.time_taken_ms,
        interval_before: state.interval_days,
        interval_after: scheduling.new_state.interval_days,
        ease_before: state.ease_factor,
        ease_after: scheduling.new_state.ease_factor,
        algorithm: settings.algorithm,
        state_after: scheduling.new_state.clone(),
    };

    Ok(Graded {
        review,
        scheduling,
        match_result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::initial_state;
    use crate::types::{Algorithm, CardStatus, MatchingMode, Rating, RatingScale};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn flip(rating: u8) -> Answer<'static> {
        Answer {
            card_id: 7,
            rating,
            typed: None,
            time_taken_ms: Some(1500),
        }
    }

    #[test]
    fn new_card_rated_good_under_sm2() {
        let settings = EffectiveSettings::default();
        let state = initial_state(Algorithm::Sm2);

        let graded = grade(&settings, &state, "answer", flip(3), now()).unwrap();

        assert_eq!(graded.review.rating, Rating::Good);
        assert_eq!(graded.review.answer_mode, AnswerMode::Flip);
        assert_eq!(graded.review.algorithm, Algorithm::Sm2);
        assert_eq!(graded.review.interval_before, 0.0);
        assert_eq!(graded.review.interval_after, 1.0);
        assert_eq!(graded.review.ease_after, 2.5);
        assert_eq!(graded.review.state_after.status, CardStatus::Review);
        assert_eq!(graded.scheduling.next_due, now() + Duration::days(1));
        assert!(graded.match_result.is_none());
    }

    #[test]
    fn typed_answer_records_correctness() {
        let settings = EffectiveSettings {
            matching_mode: MatchingMode::Fuzzy,
            ..Default::default()
        };
        let state = initial_state(Algorithm::Sm2);
        let answer = Answer {
            typed: Some("Ownershp"),
            ..flip(3)
        };

        let graded = grade(&settings, &state, "ownership", answer, now()).unwrap();

        assert_eq!(graded.review.answer_mode, AnswerMode::Typed);
        assert_eq!(graded.review.typed_answer.as_deref(), Some("Ownershp"));
        assert_eq!(graded.review.was_correct, Some(true));
    }

    #[test]
    fn two_point_scale_maps_onto_internal_ratings() {
        let settings = EffectiveSettings {
            rating_scale: RatingScale::TwoPoint,
            ..Default::default()
        };
        let state = initial_state(Algorithm::Fsrs);

        let wrong = grade(&settings, &state, "a", flip(1), now()).unwrap();
        assert_eq!(wrong.review.rating, Rating::Again);
        assert_eq!(wrong.review.rating_scale, RatingScale::TwoPoint);

        let correct = grade(&settings, &state, "a", flip(2), now()).unwrap();
        assert_eq!(correct.review.rating, Rating::Good);

        assert_eq!(
            grade(&settings, &state, "a", flip(3), now()).unwrap_err(),
            ValidationError::RatingOutOfScale {
                value: 3,
                scale: "2point"
            }
        );
    }

    #[test]
    fn invalid_input_is_rejected_before_scheduling() {
        let state = initial_state(Algorithm::Sm2);
        assert_eq!(
            grade(&EffectiveSettings::default(), &state, "a", flip(0), now()).unwrap_err(),
            ValidationError::InvalidRating(0)
        );

        let settings = EffectiveSettings {
            fuzzy_threshold: 1.2,
            ..Default::default()
        };
        let answer = Answer {
            typed: Some("a"),
            ..flip(3)
        };
        assert!(grade(&settings, &state, "a", answer, now()).is_err());
    }

    #[test]
    fn algorithm_is_pinned_on_review() {
        let settings = EffectiveSettings {
            algorithm: Algorithm::Fsrs,
            ..Default::default()
        };
        let graded = grade(&settings, &CardState::default(), "a", flip(4), now()).unwrap();
        assert_eq!(graded.review.algorithm, Algorithm::Fsrs);
        assert!(graded.review.state_after.stability.is_some());
    }
}
