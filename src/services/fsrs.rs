//! FSRS memory model.
//!
//! Forgetting curve: R(t, S) = (1 + t/(9·S))^(-1)
//! Interval inversion: I(S, r) = 9·S·(1/r - 1), clamped to [1, 36500] days.
//!
//! Pure and deterministic: the caller supplies `now` and `elapsed_days`;
//! nothing in here reads the clock or draws randomness.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::card_store::{Card, CardState};

const DECAY: f64 = -1.0;
const FACTOR: f64 = 1.0 / 9.0;
const MIN_STABILITY: f64 = 0.1;
const MIN_INTERVAL_DAYS: f64 = 1.0;
const MAX_INTERVAL_DAYS: f64 = 36500.0;

// Sub-day steps for cards still in (re)learning.
const AGAIN_STEP_DAYS: f64 = 10.0 / (24.0 * 60.0);
const HARD_STEP_DAYS: f64 = 30.0 / (24.0 * 60.0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsrsParams {
    pub w: [f64; 17],
}

impl Default for FsrsParams {
    fn default() -> Self {
        Self {
            w: [
                0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability per rating
                4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
                0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
                1.26, 0.29, 2.61, // w14-w16
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    pub fn try_from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Again),
            2 => Some(Self::Hard),
            3 => Some(Self::Good),
            4 => Some(Self::Easy),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Again)
    }
}

/// Result of grading one card: the fields the processor persists.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingUpdate {
    pub stability: f64,
    pub difficulty: f64,
    pub state: CardState,
    pub scheduled_days: f64,
    pub due_date: DateTime<Utc>,
}

pub fn process_review(
    card: &Card,
    rating: Rating,
    elapsed_days: f64,
    target_retention: f64,
    now: DateTime<Utc>,
) -> SchedulingUpdate {
    process_review_with_params(
        card,
        rating,
        elapsed_days,
        target_retention,
        &FsrsParams::default(),
        now,
    )
}

pub fn process_review_with_params(
    card: &Card,
    rating: Rating,
    elapsed_days: f64,
    target_retention: f64,
    params: &FsrsParams,
    now: DateTime<Utc>,
) -> SchedulingUpdate {
    let w = &params.w;
    let elapsed_days = elapsed_days.max(0.0);

    match card.state {
        CardState::New => {
            let stability = initial_stability(w, rating);
            let difficulty = initial_difficulty(w, rating);
            if rating == Rating::Good || rating == Rating::Easy {
                let interval = next_interval(stability, target_retention);
                schedule(stability, difficulty, CardState::Review, interval, now)
            } else {
                let step = learning_step(rating);
                schedule(stability, difficulty, CardState::Learning, step, now)
            }
        }
        // Short-step states: retrievability is never computed here.
        CardState::Learning | CardState::Relearning => {
            let difficulty = next_difficulty(w, card.difficulty, rating);
            let stability = card.stability.max(MIN_STABILITY);
            if rating == Rating::Good || rating == Rating::Easy {
                let interval = next_interval(stability, target_retention);
                schedule(stability, difficulty, CardState::Review, interval, now)
            } else {
                let step = learning_step(rating);
                schedule(stability, difficulty, card.state, step, now)
            }
        }
        CardState::Review => {
            let retention = retrievability(card.stability, elapsed_days);
            let difficulty = next_difficulty(w, card.difficulty, rating);
            if rating == Rating::Again {
                let stability =
                    next_forget_stability(w, card.difficulty, card.stability, retention);
                let step = learning_step(rating);
                schedule(stability, difficulty, CardState::Relearning, step, now)
            } else {
                let stability =
                    next_recall_stability(w, card.difficulty, card.stability, retention, rating);
                let interval = next_interval(stability, target_retention);
                schedule(stability, difficulty, CardState::Review, interval, now)
            }
        }
    }
}

/// Estimated recall probability after `elapsed_days` at the given stability.
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    (1.0 + FACTOR * elapsed_days.max(0.0) / stability).powf(DECAY)
}

fn schedule(
    stability: f64,
    difficulty: f64,
    state: CardState,
    scheduled_days: f64,
    now: DateTime<Utc>,
) -> SchedulingUpdate {
    SchedulingUpdate {
        stability,
        difficulty,
        state,
        scheduled_days,
        due_date: now + Duration::milliseconds((scheduled_days * 86_400_000.0) as i64),
    }
}

fn learning_step(rating: Rating) -> f64 {
    match rating {
        Rating::Again => AGAIN_STEP_DAYS,
        _ => HARD_STEP_DAYS,
    }
}

fn initial_stability(w: &[f64; 17], rating: Rating) -> f64 {
    w[(rating as usize) - 1].max(MIN_STABILITY)
}

fn initial_difficulty(w: &[f64; 17], rating: Rating) -> f64 {
    let d = w[4] - (rating as i32 - 3) as f64 * w[5];
    d.clamp(1.0, 10.0)
}

fn next_difficulty(w: &[f64; 17], d: f64, rating: Rating) -> f64 {
    let delta = -(rating as i32 - 3) as f64;
    let d_new = d + w[6] * delta;
    let d_mean_reverted = w[7] * (w[4] - w[5]) + (1.0 - w[7]) * d_new;
    d_mean_reverted.clamp(1.0, 10.0)
}

fn next_recall_stability(w: &[f64; 17], d: f64, s: f64, r: f64, rating: Rating) -> f64 {
    let hard_penalty = if rating == Rating::Hard { w[15] } else { 1.0 };
    let easy_bonus = if rating == Rating::Easy { w[16] } else { 1.0 };

    let growth = w[8].exp()
        * (11.0 - d)
        * s.powf(-w[9])
        * ((1.0 - r) * w[10]).exp_m1()
        * hard_penalty
        * easy_bonus;
    (s * (1.0 + growth)).max(MIN_STABILITY)
}

fn next_forget_stability(w: &[f64; 17], d: f64, s: f64, r: f64) -> f64 {
    let forgotten = w[11]
        * d.powf(-w[12])
        * ((s + 1.0).powf(w[13]) - 1.0)
        * (w[14] * (1.0 - r)).exp();
    forgotten.clamp(MIN_STABILITY, s.max(MIN_STABILITY))
}

fn next_interval(stability: f64, target_retention: f64) -> f64 {
    let retention = target_retention.clamp(0.0001, 0.9999);
    let interval = stability / FACTOR * (retention.powf(1.0 / DECAY) - 1.0);
    interval.clamp(MIN_INTERVAL_DAYS, MAX_INTERVAL_DAYS)
}
