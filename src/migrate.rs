use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            identity TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            author TEXT,
            size_bytes INTEGER NOT NULL,
            format TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending',
            failure_reason TEXT,
            excerpt_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create excerpts table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS excerpts (
            document_identity TEXT NOT NULL,
            seq_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            paragraph_count INTEGER NOT NULL,
            PRIMARY KEY (document_identity, seq_index),
            FOREIGN KEY (document_identity) REFERENCES documents(identity)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            chat_id INTEGER PRIMARY KEY,
            display_name TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create user_progress table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_progress (
            user_id INTEGER NOT NULL,
            document_identity TEXT NOT NULL,
            current_index INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'not_started',
            active INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, document_identity),
            FOREIGN KEY (user_id) REFERENCES users(chat_id),
            FOREIGN KEY (document_identity) REFERENCES documents(identity)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create schedules table (one per user)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            user_id INTEGER PRIMARY KEY,
            time_of_day TEXT NOT NULL,
            frequency TEXT NOT NULL,
            timezone TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            last_delivery_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(chat_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_user_progress_active ON user_progress(user_id, active)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_state ON documents(state)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_schedules_active ON schedules(active)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
