//! Review processing: one grading event end to end.
//!
//! The card mutation is the durable source of truth. The review-log append
//! and the concept-mastery update are telemetry-grade: their failures are
//! logged and the request still succeeds.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::card_store::{Card, CardState, CardStore, ReviewLogEntry, StoreError};
use crate::services::fsrs::{self, Rating};
use crate::services::mastery;

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone)]
pub struct ReviewInput {
    pub card_id: String,
    pub rating: Rating,
    pub duration_ms: Option<i64>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub next_due: DateTime<Utc>,
    pub scheduled_days: f64,
    pub new_state: CardState,
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// Covers both "no such card" and "not your card" so existence is
    /// never leaked across users.
    #[error("card not found")]
    NotFound,
    #[error("card was modified concurrently")]
    Conflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn submit_review<S: CardStore>(
    store: &S,
    user_id: &str,
    input: ReviewInput,
) -> Result<ReviewOutcome, ReviewError> {
    let Some(card) = store.card(&input.card_id).await? else {
        return Err(ReviewError::NotFound);
    };
    if card.user_id != user_id {
        return Err(ReviewError::NotFound);
    }

    let settings = store.srs_settings(user_id).await?;
    let elapsed_days = elapsed_days(&card, input.now);
    let update = fsrs::process_review(
        &card,
        input.rating,
        elapsed_days,
        settings.target_retention,
        input.now,
    );

    let lapsed = input.rating == Rating::Again && card.state == CardState::Review;
    let updated = Card {
        state: update.state,
        stability: update.stability,
        difficulty: update.difficulty,
        scheduled_days: update.scheduled_days,
        due_date: update.due_date,
        reps: card.reps + 1,
        lapses: card.lapses + i64::from(lapsed),
        last_review: Some(input.now),
        updated_at: input.now,
        ..card.clone()
    };

    if !store.update_card(&updated, card.version).await? {
        return Err(ReviewError::Conflict);
    }

    let log_entry = ReviewLogEntry {
        id: Uuid::new_v4().to_string(),
        card_id: card.id.clone(),
        user_id: user_id.to_string(),
        rating: input.rating as i64,
        duration_ms: input.duration_ms,
        reviewed_at: input.now,
    };
    if let Err(err) = store.append_review_log(&log_entry).await {
        tracing::warn!(error = %err, card_id = %card.id, "review log append failed");
    }

    if !card.concept_ids.is_empty() {
        let recalled = matches!(input.rating, Rating::Good | Rating::Easy);
        if let Err(err) =
            mastery::record_exposure(store, user_id, &card.concept_ids, recalled, input.now).await
        {
            tracing::warn!(error = %err, card_id = %card.id, "concept mastery update failed");
        }
    }

    Ok(ReviewOutcome {
        next_due: update.due_date,
        scheduled_days: update.scheduled_days,
        new_state: update.state,
    })
}

fn elapsed_days(card: &Card, now: DateTime<Utc>) -> f64 {
    match card.last_review {
        Some(last) => {
            let ms = now.signed_duration_since(last).num_milliseconds();
            (ms.max(0) as f64) / MS_PER_DAY
        }
        None => 0.0,
    }
}
