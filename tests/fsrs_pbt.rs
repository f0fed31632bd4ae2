//! Property-Based Tests for the FSRS memory model
//!
//! Tests the following invariants:
//! - Determinism: identical inputs always produce identical output
//! - Bounds: difficulty stays in [1,10], stability stays non-negative,
//!   Review-bound intervals stay in [1, 36500] days
//! - Monotonicity: in Review state a higher rating never yields lower
//!   stability

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use recall_backend::db::card_store::{Card, CardState};
use recall_backend::services::fsrs::{process_review, Rating};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

fn arb_rating() -> impl Strategy<Value = Rating> {
    prop_oneof![
        Just(Rating::Again),
        Just(Rating::Hard),
        Just(Rating::Good),
        Just(Rating::Easy),
    ]
}

fn arb_state() -> impl Strategy<Value = CardState> {
    prop_oneof![
        Just(CardState::New),
        Just(CardState::Learning),
        Just(CardState::Review),
        Just(CardState::Relearning),
    ]
}

// Stability never drops below the model's 0.1 floor once seeded.
fn arb_stability() -> impl Strategy<Value = f64> {
    (10u64..=100_000u64).prop_map(|v| v as f64 / 100.0)
}

fn arb_difficulty() -> impl Strategy<Value = f64> {
    (100u64..=1000u64).prop_map(|v| v as f64 / 100.0)
}

fn arb_elapsed_days() -> impl Strategy<Value = f64> {
    (0u64..=365_000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_retention() -> impl Strategy<Value = f64> {
    (700u64..=970u64).prop_map(|v| v as f64 / 1000.0)
}

fn card_with(state: CardState, stability: f64, difficulty: f64) -> Card {
    let t0 = fixed_now();
    Card {
        id: "card".to_string(),
        user_id: "user".to_string(),
        course_id: "course".to_string(),
        lesson_index: 0,
        step_index: 0,
        state,
        stability: if state == CardState::New { 0.0 } else { stability },
        difficulty: if state == CardState::New { 0.0 } else { difficulty },
        scheduled_days: 0.0,
        reps: if state == CardState::New { 0 } else { 1 },
        lapses: 0,
        due_date: t0,
        last_review: None,
        concept_ids: vec![],
        version: 0,
        created_at: t0,
        updated_at: t0,
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_process_review_is_deterministic(
        state in arb_state(),
        stability in arb_stability(),
        difficulty in arb_difficulty(),
        rating in arb_rating(),
        elapsed in arb_elapsed_days(),
        retention in arb_retention(),
    ) {
        let card = card_with(state, stability, difficulty);
        let first = process_review(&card, rating, elapsed, retention, fixed_now());
        let second = process_review(&card, rating, elapsed, retention, fixed_now());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_outputs_stay_bounded(
        state in arb_state(),
        stability in arb_stability(),
        difficulty in arb_difficulty(),
        rating in arb_rating(),
        elapsed in arb_elapsed_days(),
        retention in arb_retention(),
    ) {
        let card = card_with(state, stability, difficulty);
        let update = process_review(&card, rating, elapsed, retention, fixed_now());

        prop_assert!(update.stability >= 0.0);
        prop_assert!(update.stability.is_finite());
        prop_assert!((1.0..=10.0).contains(&update.difficulty));
        prop_assert!(update.scheduled_days > 0.0);
        if update.state == CardState::Review {
            prop_assert!(update.scheduled_days >= 1.0);
            prop_assert!(update.scheduled_days <= 36500.0);
        }
        prop_assert!(update.due_date > fixed_now());
    }

    #[test]
    fn prop_review_stability_monotone_in_rating(
        stability in arb_stability(),
        difficulty in arb_difficulty(),
        elapsed in arb_elapsed_days(),
        retention in arb_retention(),
    ) {
        let card = card_with(CardState::Review, stability, difficulty);
        let ratings = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];
        let mut previous = f64::NEG_INFINITY;
        for rating in ratings {
            let update = process_review(&card, rating, elapsed, retention, fixed_now());
            prop_assert!(
                update.stability >= previous,
                "stability {} fell below {} at {:?}",
                update.stability,
                previous,
                rating
            );
            previous = update.stability;
        }
    }

    #[test]
    fn prop_lapse_never_raises_stability(
        stability in arb_stability(),
        difficulty in arb_difficulty(),
        elapsed in arb_elapsed_days(),
        retention in arb_retention(),
    ) {
        let card = card_with(CardState::Review, stability, difficulty);
        let update = process_review(&card, Rating::Again, elapsed, retention, fixed_now());
        prop_assert_eq!(update.state, CardState::Relearning);
        prop_assert!(update.stability <= card.stability);
    }
}
