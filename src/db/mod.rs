pub mod card_store;
pub mod memory_store;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::db::card_store::SqliteCardStore;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Opens the SQLite pool, applies the schema, and hands back the store.
pub async fn init_store(url: &str) -> Result<SqliteCardStore, sqlx::Error> {
    let pool = connect(url).await?;
    apply_schema(&pool).await?;
    Ok(SqliteCardStore::new(pool))
}

pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

/// Applies `sql/schema.sql` statement by statement. Every statement is
/// idempotent, so re-running on an existing database is a no-op.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in split_sql_statements(SCHEMA_SQL) {
        let sql = strip_comment_lines(&stmt);
        if sql.is_empty() {
            continue;
        }
        sqlx::query(&sql).execute(pool).await?;
    }

    sqlx::query(
        r#"INSERT OR REPLACE INTO "_db_metadata" ("key","value") VALUES ('schema_version','1')"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn strip_comment_lines(stmt: &str) -> String {
    stmt.lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Splits a schema file into statements on semicolons, quote-aware.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ';' if !in_single_quote && !in_double_quote => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}
