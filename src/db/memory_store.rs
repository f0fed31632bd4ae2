//! In-memory [`CardStore`] used by the test suites and local tooling.
//! Mirrors the SQLite implementation's ordering and conflict semantics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::db::card_store::{
    Card, CardState, CardStore, ConceptMastery, CourseStep, ReviewLogEntry, StoreError,
    UserSrsSettings,
};

#[derive(Debug, Clone)]
struct GapRow {
    user_id: String,
    concept_id: String,
    // None while the gap is still open.
    resolved_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryCardStore {
    cards: Mutex<Vec<Card>>,
    logs: Mutex<Vec<ReviewLogEntry>>,
    mastery: Mutex<HashMap<(String, String), ConceptMastery>>,
    gaps: Mutex<Vec<GapRow>>,
    settings: Mutex<HashMap<String, UserSrsSettings>>,
    steps: Mutex<Vec<CourseStep>>,
    unavailable: AtomicBool,
    log_writes_fail: AtomicBool,
    update_conflicts: AtomicBool,
}

impl MemoryCardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_card(&self, card: Card) {
        self.cards.lock().unwrap().push(card);
    }

    pub fn seed_settings(&self, user_id: &str, settings: UserSrsSettings) {
        self.settings
            .lock()
            .unwrap()
            .insert(user_id.to_string(), settings);
    }

    pub fn seed_step(&self, step: CourseStep) {
        self.steps.lock().unwrap().push(step);
    }

    pub fn seed_gap(&self, user_id: &str, concept_id: &str) {
        self.gaps.lock().unwrap().push(GapRow {
            user_id: user_id.to_string(),
            concept_id: concept_id.to_string(),
            resolved_at: None,
        });
    }

    pub fn seed_log(&self, entry: ReviewLogEntry) {
        self.logs.lock().unwrap().push(entry);
    }

    /// Makes every call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::Relaxed);
    }

    /// Makes only review-log appends fail, for degrade-path tests.
    pub fn set_log_writes_fail(&self, value: bool) {
        self.log_writes_fail.store(value, Ordering::Relaxed);
    }

    /// Makes every conditional card update report a lost race.
    pub fn set_update_conflicts(&self, value: bool) {
        self.update_conflicts.store(value, Ordering::Relaxed);
    }

    pub fn log_count(&self) -> usize {
        self.logs.lock().unwrap().len()
    }

    pub fn card_snapshot(&self, card_id: &str) -> Option<Card> {
        self.cards
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == card_id)
            .cloned()
    }

    pub fn open_gap_count(&self, user_id: &str, concept_id: &str) -> usize {
        self.gaps
            .lock()
            .unwrap()
            .iter()
            .filter(|g| g.user_id == user_id && g.concept_id == concept_id && g.resolved_at.is_none())
            .count()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

impl CardStore for MemoryCardStore {
    async fn card(&self, card_id: &str) -> Result<Option<Card>, StoreError> {
        self.check_available()?;
        Ok(self
            .cards
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == card_id)
            .cloned())
    }

    async fn new_cards(&self, user_id: &str, limit: i64) -> Result<Vec<Card>, StoreError> {
        self.check_available()?;
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut out: Vec<Card> = self
            .cards
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id && c.state == CardState::New)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn due_cards(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Card>, StoreError> {
        self.check_available()?;
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let mut out: Vec<Card> = self
            .cards
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id && c.state != CardState::New && c.due_date <= now)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.due_date);
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn reviews_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.check_available()?;
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.user_id == user_id && l.reviewed_at >= since)
            .count() as i64)
    }

    async fn update_card(&self, card: &Card, expected_version: i64) -> Result<bool, StoreError> {
        self.check_available()?;
        if self.update_conflicts.load(Ordering::Relaxed) {
            return Ok(false);
        }
        let mut cards = self.cards.lock().unwrap();
        let Some(existing) = cards
            .iter_mut()
            .find(|c| c.id == card.id && c.version == expected_version)
        else {
            return Ok(false);
        };
        *existing = Card {
            version: expected_version + 1,
            ..card.clone()
        };
        Ok(true)
    }

    async fn insert_card(&self, card: &Card) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut cards = self.cards.lock().unwrap();
        let exists = cards.iter().any(|c| {
            c.user_id == card.user_id
                && c.course_id == card.course_id
                && c.lesson_index == card.lesson_index
                && c.step_index == card.step_index
        });
        if exists {
            return Ok(false);
        }
        cards.push(card.clone());
        Ok(true)
    }

    async fn append_review_log(&self, entry: &ReviewLogEntry) -> Result<(), StoreError> {
        self.check_available()?;
        if self.log_writes_fail.load(Ordering::Relaxed) {
            return Err(StoreError::Internal("log write refused".to_string()));
        }
        self.logs.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn srs_settings(&self, user_id: &str) -> Result<UserSrsSettings, StoreError> {
        self.check_available()?;
        Ok(self
            .settings
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn concept_mastery(
        &self,
        user_id: &str,
        concept_id: &str,
    ) -> Result<Option<ConceptMastery>, StoreError> {
        self.check_available()?;
        Ok(self
            .mastery
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), concept_id.to_string()))
            .cloned())
    }

    async fn upsert_concept_mastery(&self, mastery: &ConceptMastery) -> Result<(), StoreError> {
        self.check_available()?;
        self.mastery.lock().unwrap().insert(
            (mastery.user_id.clone(), mastery.concept_id.clone()),
            mastery.clone(),
        );
        Ok(())
    }

    async fn resolve_knowledge_gaps(
        &self,
        user_id: &str,
        concept_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut gaps = self.gaps.lock().unwrap();
        let mut closed = 0;
        for gap in gaps.iter_mut().filter(|g| {
            g.user_id == user_id && g.concept_id == concept_id && g.resolved_at.is_none()
        }) {
            gap.resolved_at = Some(now);
            closed += 1;
        }
        Ok(closed)
    }

    async fn quiz_steps(&self, course_id: &str) -> Result<Vec<CourseStep>, StoreError> {
        self.check_available()?;
        let mut out: Vec<CourseStep> = self
            .steps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.course_id == course_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.lesson_index, s.step_index));
        Ok(out)
    }
}
