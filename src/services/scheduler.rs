//! Due-card selection under the user's daily quotas.
//!
//! Quota enforcement is advisory: it is based on a review-log count read
//! at selection time, not a reservation, so concurrent selections may
//! momentarily observe the same budget. The store is queried read-only.

use chrono::{DateTime, NaiveTime, Utc};

use crate::db::card_store::{Card, CardStore, StoreError, UserSrsSettings};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct DueSelection {
    pub new_cards: Vec<Card>,
    pub due_cards: Vec<Card>,
    pub reviewed_today: i64,
}

impl DueSelection {
    pub fn total(&self) -> usize {
        self.new_cards.len() + self.due_cards.len()
    }
}

/// Remaining daily budget: `(new_limit, remaining_reviews)`.
pub fn quota_limits(settings: &UserSrsSettings, reviewed_today: i64) -> (i64, i64) {
    let remaining = (settings.max_reviews_per_day - reviewed_today).max(0);
    let new_limit = settings.max_new_cards_per_day.clamp(0, remaining);
    (new_limit, remaining)
}

/// Midnight of the civil date of `now`. The caller owns the clock; shift
/// `now` before calling to get learner-local windows.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

pub async fn select_due<S: CardStore>(
    store: &S,
    user_id: &str,
    now: DateTime<Utc>,
    settings: &UserSrsSettings,
) -> Result<DueSelection, SchedulerError> {
    let reviewed_today = store.reviews_since(user_id, start_of_day(now)).await?;
    let (new_limit, remaining) = quota_limits(settings, reviewed_today);

    let new_cards = store.new_cards(user_id, new_limit).await?;
    let due_limit = remaining - new_cards.len() as i64;
    let due_cards = store.due_cards(user_id, now, due_limit).await?;

    Ok(DueSelection {
        new_cards,
        due_cards,
        reviewed_today,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::card_store::{CardState, ReviewLogEntry};
    use crate::db::memory_store::MemoryCardStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 14, 30, 0).unwrap()
    }

    fn seed_cards(store: &MemoryCardStore, new_count: usize, due_count: usize) {
        for i in 0..new_count {
            store.seed_card(Card {
                id: format!("new-{i}"),
                user_id: "u1".to_string(),
                course_id: "course-1".to_string(),
                lesson_index: 0,
                step_index: i as i64,
                state: CardState::New,
                stability: 0.0,
                difficulty: 0.0,
                scheduled_days: 0.0,
                reps: 0,
                lapses: 0,
                due_date: now() - Duration::days(1),
                last_review: None,
                concept_ids: vec![],
                version: 0,
                created_at: now() - Duration::days(10) + Duration::minutes(i as i64),
                updated_at: now(),
            });
        }
        for i in 0..due_count {
            store.seed_card(Card {
                id: format!("due-{i}"),
                user_id: "u1".to_string(),
                course_id: "course-1".to_string(),
                lesson_index: 1,
                step_index: i as i64,
                state: CardState::Review,
                stability: 4.0,
                difficulty: 5.0,
                scheduled_days: 4.0,
                reps: 2,
                lapses: 0,
                due_date: now() - Duration::hours(i as i64 + 1),
                last_review: Some(now() - Duration::days(4)),
                concept_ids: vec![],
                version: 1,
                created_at: now() - Duration::days(20),
                updated_at: now(),
            });
        }
    }

    fn log_entry(i: usize, at: DateTime<Utc>) -> ReviewLogEntry {
        ReviewLogEntry {
            id: format!("log-{i}"),
            card_id: format!("due-{i}"),
            user_id: "u1".to_string(),
            rating: 3,
            duration_ms: Some(1500),
            reviewed_at: at,
        }
    }

    #[test]
    fn test_quota_limits_math() {
        let settings = UserSrsSettings {
            max_new_cards_per_day: 20,
            max_reviews_per_day: 200,
            ..Default::default()
        };
        assert_eq!(quota_limits(&settings, 0), (20, 200));
        assert_eq!(quota_limits(&settings, 195), (5, 5));
        assert_eq!(quota_limits(&settings, 200), (0, 0));
        assert_eq!(quota_limits(&settings, 10_000), (0, 0));
    }

    #[test]
    fn test_start_of_day() {
        let midnight = start_of_day(now());
        assert_eq!(
            midnight,
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_quota_exhaustion_scenario() {
        // 5/day cap, 3 already reviewed, plenty available: exactly 2 out.
        let store = MemoryCardStore::new();
        seed_cards(&store, 10, 10);
        for i in 0..3 {
            store.seed_log(log_entry(i, now() - Duration::hours(2)));
        }
        let settings = UserSrsSettings {
            max_reviews_per_day: 5,
            ..Default::default()
        };

        let selection = select_due(&store, "u1", now(), &settings).await.unwrap();
        assert_eq!(selection.reviewed_today, 3);
        assert_eq!(selection.total(), 2);
    }

    #[tokio::test]
    async fn test_yesterdays_reviews_do_not_count() {
        let store = MemoryCardStore::new();
        seed_cards(&store, 0, 4);
        for i in 0..5 {
            store.seed_log(log_entry(i, now() - Duration::days(1)));
        }
        let settings = UserSrsSettings {
            max_reviews_per_day: 5,
            ..Default::default()
        };

        let selection = select_due(&store, "u1", now(), &settings).await.unwrap();
        assert_eq!(selection.reviewed_today, 0);
        assert_eq!(selection.due_cards.len(), 4);
    }

    #[tokio::test]
    async fn test_new_cards_bounded_separately() {
        let store = MemoryCardStore::new();
        seed_cards(&store, 10, 10);
        let settings = UserSrsSettings {
            max_new_cards_per_day: 3,
            max_reviews_per_day: 100,
            ..Default::default()
        };

        let selection = select_due(&store, "u1", now(), &settings).await.unwrap();
        assert_eq!(selection.new_cards.len(), 3);
        assert_eq!(selection.due_cards.len(), 10);
        // Oldest new cards first.
        assert_eq!(selection.new_cards[0].id, "new-0");
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let store = MemoryCardStore::new();
        store.set_unavailable(true);
        let result = select_due(&store, "u1", now(), &UserSrsSettings::default()).await;
        assert!(matches!(
            result,
            Err(SchedulerError::Store(StoreError::Unavailable(_)))
        ));
    }
}
