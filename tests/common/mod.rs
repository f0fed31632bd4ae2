#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;

use recall_backend::db::card_store::SqliteCardStore;
use recall_backend::db::{apply_schema, connect};
use recall_backend::routes;
use recall_backend::state::AppState;

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    _temp_dir: TempDir,
}

/// Router over a throwaway SQLite file; every test gets its own database.
pub async fn create_test_app() -> TestApp {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.display());

    let pool = connect(&url).await.expect("failed to open test database");
    apply_schema(&pool).await.expect("failed to apply schema");

    let store = SqliteCardStore::new(pool.clone());
    let app = routes::router(AppState::new(Some(Arc::new(store))));

    TestApp {
        app,
        pool,
        _temp_dir: temp_dir,
    }
}

pub async fn seed_user(pool: &SqlitePool, user_id: &str, token: &str) {
    let now = Utc::now().timestamp_millis();
    sqlx::query(r#"INSERT INTO "users" ("id","email","username","createdAt") VALUES (?,?,?,?)"#)
        .bind(user_id)
        .bind(format!("{user_id}@example.com"))
        .bind(user_id)
        .bind(now)
        .execute(pool)
        .await
        .expect("failed to insert user");

    sqlx::query(r#"INSERT INTO "sessions" ("token","userId","createdAt") VALUES (?,?,?)"#)
        .bind(token)
        .bind(user_id)
        .bind(now)
        .execute(pool)
        .await
        .expect("failed to insert session");
}

pub async fn seed_quiz_steps(pool: &SqlitePool, course_id: &str, count: i64) {
    let now = Utc::now().timestamp_millis();
    for i in 0..count {
        sqlx::query(
            r#"
            INSERT INTO "course_steps"
                ("id","courseId","lessonIndex","stepIndex","kind","conceptIds","createdAt")
            VALUES (?,?,?,?,?,?,?)
            "#,
        )
        .bind(format!("{course_id}-step-{i}"))
        .bind(course_id)
        .bind(i / 2)
        .bind(i % 2)
        .bind("quiz")
        .bind(format!(r#"["concept-{}"]"#, i / 2))
        .bind(now)
        .execute(pool)
        .await
        .expect("failed to insert course step");
    }
}
