use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::future::Future;

const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;

/// Card lifecycle. Cards never return to `New`; they cycle between
/// `Review` and `Relearning` once graduated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardState {
    New,
    Learning,
    Review,
    Relearning,
}

impl Default for CardState {
    fn default() -> Self {
        Self::New
    }
}

impl CardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Learning => "LEARNING",
            Self::Review => "REVIEW",
            Self::Relearning => "RELEARNING",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LEARNING" => Self::Learning,
            "REVIEW" => Self::Review,
            "RELEARNING" => Self::Relearning,
            _ => Self::New,
        }
    }
}

/// One reviewable fact owned by exactly one user. `elapsed_days` is not
/// stored; it is recomputed from `last_review` at grading time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub lesson_index: i64,
    pub step_index: i64,
    pub state: CardState,
    pub stability: f64,
    pub difficulty: f64,
    pub scheduled_days: f64,
    pub reps: i64,
    pub lapses: i64,
    pub due_date: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,
    pub concept_ids: Vec<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record of one grading event. Write-once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLogEntry {
    pub id: String,
    pub card_id: String,
    pub user_id: String,
    pub rating: i64,
    pub duration_ms: Option<i64>,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMastery {
    pub id: String,
    pub user_id: String,
    pub concept_id: String,
    pub mastery_level: f64,
    pub peak_mastery: f64,
    pub total_exposures: i64,
    pub successful_recalls: i64,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

/// Per-user scheduling preferences. Read-only input to the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSrsSettings {
    pub target_retention: f64,
    pub max_new_cards_per_day: i64,
    pub max_reviews_per_day: i64,
    pub interleave_reviews: bool,
}

impl Default for UserSrsSettings {
    fn default() -> Self {
        Self {
            target_retention: 0.9,
            max_new_cards_per_day: 20,
            max_reviews_per_day: 200,
            interleave_reviews: true,
        }
    }
}

/// A quiz-able unit of course content; the producer of card rows.
#[derive(Debug, Clone)]
pub struct CourseStep {
    pub id: String,
    pub course_id: String,
    pub lesson_index: i64,
    pub step_index: i64,
    pub concept_ids: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conflicting write")]
    Conflict,
    #[error("store error: {0}")]
    Internal(String),
}

/// Persistence boundary for the scheduling engine. Services are generic
/// over this trait; production uses [`SqliteCardStore`], tests use the
/// in-memory implementation.
pub trait CardStore: Send + Sync {
    fn card(
        &self,
        card_id: &str,
    ) -> impl Future<Output = Result<Option<Card>, StoreError>> + Send;

    /// Cards in `New` state, oldest first.
    fn new_cards(
        &self,
        user_id: &str,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Card>, StoreError>> + Send;

    /// Cards past their due date (any state but `New`), most overdue first.
    fn due_cards(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Card>, StoreError>> + Send;

    /// Review-log entries recorded at or after `since`.
    fn reviews_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Conditional write keyed on `expected_version`. Returns false when
    /// another writer got there first; the row is left untouched.
    fn update_card(
        &self,
        card: &Card,
        expected_version: i64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns false when the card already exists (unique-key conflict).
    fn insert_card(&self, card: &Card)
        -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn append_review_log(
        &self,
        entry: &ReviewLogEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Falls back to [`UserSrsSettings::default`] when the user has no row.
    fn srs_settings(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<UserSrsSettings, StoreError>> + Send;

    fn concept_mastery(
        &self,
        user_id: &str,
        concept_id: &str,
    ) -> impl Future<Output = Result<Option<ConceptMastery>, StoreError>> + Send;

    fn upsert_concept_mastery(
        &self,
        mastery: &ConceptMastery,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Marks open gap records for the concept as resolved. Returns the
    /// number of rows closed.
    fn resolve_knowledge_gaps(
        &self,
        user_id: &str,
        concept_id: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn quiz_steps(
        &self,
        course_id: &str,
    ) -> impl Future<Output = Result<Vec<CourseStep>, StoreError>> + Send;
}

/// SQLite-backed store. Every call carries a timeout and surfaces
/// `StoreError::Unavailable` instead of hanging; retry policy belongs to
/// the caller.
#[derive(Clone)]
pub struct SqliteCardStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteCardStore {
    pub fn new(pool: SqlitePool) -> Self {
        let secs = std::env::var("STORE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_STORE_TIMEOUT_SECS);
        Self {
            pool,
            timeout: Duration::from_secs(secs),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_sqlx_error(err)),
            Err(_) => Err(StoreError::Unavailable("store call timed out".to_string())),
        }
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Internal(other.to_string()),
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn parse_concept_ids(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn map_card_row(row: &SqliteRow) -> Card {
    let state: String = row.try_get("state").unwrap_or_else(|_| "NEW".to_string());
    let concept_ids: String = row.try_get("conceptIds").unwrap_or_else(|_| "[]".to_string());
    Card {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        course_id: row.try_get("courseId").unwrap_or_default(),
        lesson_index: row.try_get("lessonIndex").unwrap_or(0),
        step_index: row.try_get("stepIndex").unwrap_or(0),
        state: CardState::from_str(&state),
        stability: row.try_get("stability").unwrap_or(0.0),
        difficulty: row.try_get("difficulty").unwrap_or(0.0),
        scheduled_days: row.try_get("scheduledDays").unwrap_or(0.0),
        reps: row.try_get("reps").unwrap_or(0),
        lapses: row.try_get("lapses").unwrap_or(0),
        due_date: ms_to_datetime(row.try_get("dueDate").unwrap_or(0)),
        last_review: row
            .try_get::<Option<i64>, _>("lastReview")
            .unwrap_or(None)
            .map(ms_to_datetime),
        concept_ids: parse_concept_ids(&concept_ids),
        version: row.try_get("version").unwrap_or(0),
        created_at: ms_to_datetime(row.try_get("createdAt").unwrap_or(0)),
        updated_at: ms_to_datetime(row.try_get("updatedAt").unwrap_or(0)),
    }
}

const CARD_COLUMNS: &str = r#""id","userId","courseId","lessonIndex","stepIndex","state","stability","difficulty","scheduledDays","reps","lapses","dueDate","lastReview","conceptIds","version","createdAt","updatedAt""#;

impl CardStore for SqliteCardStore {
    async fn card(&self, card_id: &str) -> Result<Option<Card>, StoreError> {
        let query = format!(
            r#"SELECT {CARD_COLUMNS} FROM "cards" WHERE "id" = ? LIMIT 1"#
        );
        let row = self
            .guarded(sqlx::query(&query).bind(card_id).fetch_optional(&self.pool))
            .await?;
        Ok(row.map(|row| map_card_row(&row)))
    }

    async fn new_cards(&self, user_id: &str, limit: i64) -> Result<Vec<Card>, StoreError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let query = format!(
            r#"
            SELECT {CARD_COLUMNS} FROM "cards"
            WHERE "userId" = ? AND "state" = 'NEW'
            ORDER BY "createdAt" ASC
            LIMIT ?
            "#
        );
        let rows = self
            .guarded(
                sqlx::query(&query)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.iter().map(map_card_row).collect())
    }

    async fn due_cards(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Card>, StoreError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let query = format!(
            r#"
            SELECT {CARD_COLUMNS} FROM "cards"
            WHERE "userId" = ? AND "state" != 'NEW' AND "dueDate" <= ?
            ORDER BY "dueDate" ASC
            LIMIT ?
            "#
        );
        let rows = self
            .guarded(
                sqlx::query(&query)
                    .bind(user_id)
                    .bind(now.timestamp_millis())
                    .bind(limit)
                    .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.iter().map(map_card_row).collect())
    }

    async fn reviews_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count: i64 = self
            .guarded(
                sqlx::query_scalar(
                    r#"SELECT COUNT(*) FROM "review_logs" WHERE "userId" = ? AND "reviewedAt" >= ?"#,
                )
                .bind(user_id)
                .bind(since.timestamp_millis())
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(count)
    }

    async fn update_card(&self, card: &Card, expected_version: i64) -> Result<bool, StoreError> {
        let concept_ids =
            serde_json::to_string(&card.concept_ids).unwrap_or_else(|_| "[]".to_string());
        let result = self
            .guarded(
                sqlx::query(
                    r#"
                    UPDATE "cards" SET
                        "state" = ?,
                        "stability" = ?,
                        "difficulty" = ?,
                        "scheduledDays" = ?,
                        "reps" = ?,
                        "lapses" = ?,
                        "dueDate" = ?,
                        "lastReview" = ?,
                        "conceptIds" = ?,
                        "version" = ? + 1,
                        "updatedAt" = ?
                    WHERE "id" = ? AND "version" = ?
                    "#,
                )
                .bind(card.state.as_str())
                .bind(card.stability)
                .bind(card.difficulty)
                .bind(card.scheduled_days)
                .bind(card.reps)
                .bind(card.lapses)
                .bind(card.due_date.timestamp_millis())
                .bind(card.last_review.map(|dt| dt.timestamp_millis()))
                .bind(concept_ids)
                .bind(expected_version)
                .bind(card.updated_at.timestamp_millis())
                .bind(&card.id)
                .bind(expected_version)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_card(&self, card: &Card) -> Result<bool, StoreError> {
        let concept_ids =
            serde_json::to_string(&card.concept_ids).unwrap_or_else(|_| "[]".to_string());
        let result = self
            .guarded(
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO "cards"
                        ("id","userId","courseId","lessonIndex","stepIndex","state",
                         "stability","difficulty","scheduledDays","reps","lapses",
                         "dueDate","lastReview","conceptIds","version","createdAt","updatedAt")
                    VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
                    "#,
                )
                .bind(&card.id)
                .bind(&card.user_id)
                .bind(&card.course_id)
                .bind(card.lesson_index)
                .bind(card.step_index)
                .bind(card.state.as_str())
                .bind(card.stability)
                .bind(card.difficulty)
                .bind(card.scheduled_days)
                .bind(card.reps)
                .bind(card.lapses)
                .bind(card.due_date.timestamp_millis())
                .bind(card.last_review.map(|dt| dt.timestamp_millis()))
                .bind(concept_ids)
                .bind(card.version)
                .bind(card.created_at.timestamp_millis())
                .bind(card.updated_at.timestamp_millis())
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_review_log(&self, entry: &ReviewLogEntry) -> Result<(), StoreError> {
        self.guarded(
            sqlx::query(
                r#"
                INSERT INTO "review_logs"
                    ("id","cardId","userId","rating","durationMs","reviewedAt")
                VALUES (?,?,?,?,?,?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.card_id)
            .bind(&entry.user_id)
            .bind(entry.rating)
            .bind(entry.duration_ms)
            .bind(entry.reviewed_at.timestamp_millis())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn srs_settings(&self, user_id: &str) -> Result<UserSrsSettings, StoreError> {
        let row = self
            .guarded(
                sqlx::query(
                    r#"
                    SELECT "targetRetention","maxNewCardsPerDay","maxReviewsPerDay","interleaveReviews"
                    FROM "srs_settings" WHERE "userId" = ? LIMIT 1
                    "#,
                )
                .bind(user_id)
                .fetch_optional(&self.pool),
            )
            .await?;
        let Some(row) = row else {
            return Ok(UserSrsSettings::default());
        };
        let defaults = UserSrsSettings::default();
        Ok(UserSrsSettings {
            target_retention: row
                .try_get("targetRetention")
                .unwrap_or(defaults.target_retention),
            max_new_cards_per_day: row
                .try_get("maxNewCardsPerDay")
                .unwrap_or(defaults.max_new_cards_per_day),
            max_reviews_per_day: row
                .try_get("maxReviewsPerDay")
                .unwrap_or(defaults.max_reviews_per_day),
            interleave_reviews: row
                .try_get::<i64, _>("interleaveReviews")
                .map(|v| v != 0)
                .unwrap_or(defaults.interleave_reviews),
        })
    }

    async fn concept_mastery(
        &self,
        user_id: &str,
        concept_id: &str,
    ) -> Result<Option<ConceptMastery>, StoreError> {
        let row = self
            .guarded(
                sqlx::query(
                    r#"
                    SELECT "id","userId","conceptId","masteryLevel","peakMastery",
                           "totalExposures","successfulRecalls","lastReviewedAt"
                    FROM "concept_mastery" WHERE "userId" = ? AND "conceptId" = ? LIMIT 1
                    "#,
                )
                .bind(user_id)
                .bind(concept_id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|row| ConceptMastery {
            id: row.try_get("id").unwrap_or_default(),
            user_id: row.try_get("userId").unwrap_or_default(),
            concept_id: row.try_get("conceptId").unwrap_or_default(),
            mastery_level: row.try_get("masteryLevel").unwrap_or(0.0),
            peak_mastery: row.try_get("peakMastery").unwrap_or(0.0),
            total_exposures: row.try_get("totalExposures").unwrap_or(0),
            successful_recalls: row.try_get("successfulRecalls").unwrap_or(0),
            last_reviewed_at: row
                .try_get::<Option<i64>, _>("lastReviewedAt")
                .unwrap_or(None)
                .map(ms_to_datetime),
        }))
    }

    async fn upsert_concept_mastery(&self, mastery: &ConceptMastery) -> Result<(), StoreError> {
        self.guarded(
            sqlx::query(
                r#"
                INSERT INTO "concept_mastery"
                    ("id","userId","conceptId","masteryLevel","peakMastery",
                     "totalExposures","successfulRecalls","lastReviewedAt")
                VALUES (?,?,?,?,?,?,?,?)
                ON CONFLICT ("userId","conceptId") DO UPDATE SET
                    "masteryLevel" = excluded."masteryLevel",
                    "peakMastery" = excluded."peakMastery",
                    "totalExposures" = excluded."totalExposures",
                    "successfulRecalls" = excluded."successfulRecalls",
                    "lastReviewedAt" = excluded."lastReviewedAt"
                "#,
            )
            .bind(&mastery.id)
            .bind(&mastery.user_id)
            .bind(&mastery.concept_id)
            .bind(mastery.mastery_level)
            .bind(mastery.peak_mastery)
            .bind(mastery.total_exposures)
            .bind(mastery.successful_recalls)
            .bind(mastery.last_reviewed_at.map(|dt| dt.timestamp_millis()))
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn resolve_knowledge_gaps(
        &self,
        user_id: &str,
        concept_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = self
            .guarded(
                sqlx::query(
                    r#"
                    UPDATE "knowledge_gaps"
                    SET "resolved" = 1, "resolvedAt" = ?
                    WHERE "userId" = ? AND "conceptId" = ? AND "resolved" = 0
                    "#,
                )
                .bind(now.timestamp_millis())
                .bind(user_id)
                .bind(concept_id)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn quiz_steps(&self, course_id: &str) -> Result<Vec<CourseStep>, StoreError> {
        let rows = self
            .guarded(
                sqlx::query(
                    r#"
                    SELECT "id","courseId","lessonIndex","stepIndex","conceptIds"
                    FROM "course_steps"
                    WHERE "courseId" = ? AND "kind" = 'quiz'
                    ORDER BY "lessonIndex" ASC, "stepIndex" ASC
                    "#,
                )
                .bind(course_id)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let concept_ids: String =
                    row.try_get("conceptIds").unwrap_or_else(|_| "[]".to_string());
                CourseStep {
                    id: row.try_get("id").unwrap_or_default(),
                    course_id: row.try_get("courseId").unwrap_or_default(),
                    lesson_index: row.try_get("lessonIndex").unwrap_or(0),
                    step_index: row.try_get("stepIndex").unwrap_or(0),
                    concept_ids: parse_concept_ids(&concept_ids),
                }
            })
            .collect())
    }
}
