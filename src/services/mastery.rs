//! Concept-mastery derivation.
//!
//! Mastery moves in fixed steps per graded card: +0.05 on a correct
//! answer, -0.1 on a miss, clamped to [0, 1]. Crossing 0.5 upward on a
//! correct answer closes any open knowledge-gap records for the concept.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::card_store::{CardStore, ConceptMastery, StoreError};

const MASTERY_GAIN: f64 = 0.05;
const MASTERY_LOSS: f64 = 0.1;
const GAP_RESOLVE_THRESHOLD: f64 = 0.5;

pub fn apply_delta(level: f64, success: bool) -> f64 {
    if success {
        (level + MASTERY_GAIN).min(1.0)
    } else {
        (level - MASTERY_LOSS).max(0.0)
    }
}

/// Applies one graded card to every concept it references. Rows are
/// created lazily on first exposure.
pub async fn record_exposure<S: CardStore>(
    store: &S,
    user_id: &str,
    concept_ids: &[String],
    success: bool,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    for concept_id in concept_ids {
        let mut mastery = store
            .concept_mastery(user_id, concept_id)
            .await?
            .unwrap_or_else(|| ConceptMastery {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                concept_id: concept_id.clone(),
                mastery_level: 0.0,
                peak_mastery: 0.0,
                total_exposures: 0,
                successful_recalls: 0,
                last_reviewed_at: None,
            });

        mastery.mastery_level = apply_delta(mastery.mastery_level, success);
        mastery.peak_mastery = mastery.peak_mastery.max(mastery.mastery_level);
        mastery.total_exposures += 1;
        if success {
            mastery.successful_recalls += 1;
        }
        mastery.last_reviewed_at = Some(now);

        let resolve = success && mastery.mastery_level >= GAP_RESOLVE_THRESHOLD;
        store.upsert_concept_mastery(&mastery).await?;
        if resolve {
            store.resolve_knowledge_gaps(user_id, concept_id, now).await?;
        }
    }
    Ok(())
}
