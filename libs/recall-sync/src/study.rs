//! Study sessions: grade an answer, persist the new state, queue the review.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use recall_core::{grade, initial_state, Answer, DeviceId, EffectiveSettings, Graded};
use serde::Serialize;
use tracing::debug;

use crate::error::{StoreError, StudyError};
use crate::store::{LocalStore, StudyQueue};

/// Settings and queue captured when a session starts. The algorithm stays
/// fixed for the session even if settings change meanwhile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudySession {
    pub deck_path: Option<String>,
    pub settings: EffectiveSettings,
    pub queue: StudyQueue,
    pub started_at: DateTime<Utc>,
}

/// Records reviews for one device against a local store.
pub struct StudyService<S> {
    store: Arc<S>,
    device: DeviceId,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl<S: LocalStore> StudyService<S> {
    pub fn new(store: Arc<S>, device: DeviceId) -> Self {
        Self {
            store,
            device,
            locks: DashMap::new(),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn begin_session(
        &self,
        deck_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StudySession, StudyError> {
        let settings = self.store.get_effective_settings(deck_path)?;
        settings.validate()?;
        let queue = self
            .store
            .study_queue(&self.device, deck_path, &settings, now)?;
        debug!(
            deck = deck_path.unwrap_or("*"),
            new = queue.new_cards.len(),
            due = queue.due_cards.len(),
            "study session started"
        );
        Ok(StudySession {
            deck_path: deck_path.map(str::to_string),
            settings,
            queue,
            started_at: now,
        })
    }

    /// Grade and record one answer.
    ///
    /// The read of the current state, the scheduling and the write of the
    /// new state happen under a lock for the card, so two answers for the
    /// same card never lose an update.
    pub fn submit_review(
        &self,
        session: &StudySession,
        answer: Answer<'_>,
        now: DateTime<Utc>,
    ) -> Result<Graded, StudyError> {
        let card_id = answer.card_id;
        let lock = self.lock_for(card_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.record(session, answer, now)
        };
        drop(lock);
        // Only the map still holds it: nobody is waiting on the card.
        self.locks
            .remove_if(&card_id, |_, held| Arc::strong_count(held) == 1);
        result
    }

    fn record(
        &self,
        session: &StudySession,
        answer: Answer<'_>,
        now: DateTime<Utc>,
    ) -> Result<Graded, StudyError> {
        let card = self
            .store
            .get_card(answer.card_id)?
            .filter(|card| !card.is_deleted())
            .ok_or(StoreError::CardNotFound(answer.card_id))?;
        let state = self
            .store
            .get_card_state(card.id, &self.device)?
            .unwrap_or_else(|| initial_state(session.settings.algorithm));

        let graded = grade(&session.settings, &state, &card.answer, answer, now)?;
        self.store.record_review(&self.device, &graded.review)?;

        debug!(
            card_id = card.id,
            rating = graded.review.rating.to_value(),
            status = graded.review.state_after.status.as_str(),
            "review recorded"
        );
        Ok(graded)
    }

    fn lock_for(&self, card_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(card_id).or_default().clone()
    }
}
