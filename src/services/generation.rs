//! Card creation from course content: one card per quiz-able step.
//! Re-running for the same course is idempotent; existing cards are
//! counted as skipped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::card_store::{Card, CardState, CardStore, StoreError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub created: i64,
    pub skipped: i64,
}

pub async fn generate_cards<S: CardStore>(
    store: &S,
    user_id: &str,
    course_id: &str,
    now: DateTime<Utc>,
) -> Result<GenerationSummary, StoreError> {
    let steps = store.quiz_steps(course_id).await?;

    let mut created = 0;
    let mut skipped = 0;
    for step in steps {
        let card = Card {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            course_id: step.course_id.clone(),
            lesson_index: step.lesson_index,
            step_index: step.step_index,
            state: CardState::New,
            stability: 0.0,
            difficulty: 0.0,
            scheduled_days: 0.0,
            reps: 0,
            lapses: 0,
            // A new card is immediately eligible.
            due_date: now,
            last_review: None,
            concept_ids: step.concept_ids.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        if store.insert_card(&card).await? {
            created += 1;
        } else {
            skipped += 1;
        }
    }

    Ok(GenerationSummary { created, skipped })
}
