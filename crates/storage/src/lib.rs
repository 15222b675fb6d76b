use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{Conversation, ConversationId, Presence, Ts, UserId};

const MEMORY_URL: &str = "sqlite::memory:";

/// Local snapshot of conversation metadata and resolved user names.
///
/// Nothing here is authoritative: the snapshot only seeds a session before the
/// platform answers.
#[derive(Clone)]
pub struct SnapshotStore {
    pool: Pool<Sqlite>,
}

impl SnapshotStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let database_url = normalize_database_url(database_url);
        ensure_sqlite_parent_dir_exists(&database_url)?;

        let connect_options =
            SqliteConnectOptions::from_str(&database_url)?.create_if_missing(true);
        // Every in-memory connection is its own database.
        let max_connections = if database_url == MEMORY_URL { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open snapshot database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Replaces the stored conversation set.
    pub async fn save_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        let saved_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM conversations")
            .execute(&mut *tx)
            .await
            .context("failed to clear conversations")?;
        for conversation in conversations {
            sqlx::query(
                r#"
                INSERT INTO conversations
                    (id, display_name, last_read, latest_message, is_member, peer_user_id, saved_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(conversation.id.as_str())
            .bind(&conversation.display_name)
            .bind(conversation.last_read.as_ref().map(Ts::as_str))
            .bind(conversation.latest_message.as_ref().map(Ts::as_str))
            .bind(conversation.is_member)
            .bind(conversation.peer_user_id.as_ref().map(UserId::as_str))
            .bind(saved_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to save conversation {}", conversation.id))?;
        }
        tx.commit().await?;
        debug!(count = conversations.len(), "storage: conversations saved");
        Ok(())
    }

    /// Stored conversations ordered by id. Presence is never persisted.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, display_name, last_read, latest_message, is_member, peer_user_id
            FROM conversations
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load conversations")?;

        rows.into_iter()
            .map(|row| {
                Ok(Conversation {
                    id: ConversationId::new(row.try_get::<String, _>("id")?),
                    display_name: row.try_get("display_name")?,
                    last_read: row
                        .try_get::<Option<String>, _>("last_read")?
                        .map(Ts::new),
                    latest_message: row
                        .try_get::<Option<String>, _>("latest_message")?
                        .map(Ts::new),
                    is_member: row.try_get("is_member")?,
                    peer_user_id: row
                        .try_get::<Option<String>, _>("peer_user_id")?
                        .map(UserId::new),
                    peer_presence: Presence::Unknown,
                })
            })
            .collect()
    }

    /// Upserts resolved display names; users already stored but absent here are kept.
    pub async fn save_users<'a>(
        &self,
        users: impl IntoIterator<Item = (&'a UserId, &'a str)>,
    ) -> Result<()> {
        let saved_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut count = 0usize;
        for (user_id, display_name) in users {
            sqlx::query(
                r#"
                INSERT INTO users (id, display_name, saved_at)
                VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    saved_at = excluded.saved_at
                "#,
            )
            .bind(user_id.as_str())
            .bind(display_name)
            .bind(saved_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to save user {user_id}"))?;
            count += 1;
        }
        tx.commit().await?;
        debug!(count, "storage: users saved");
        Ok(())
    }

    pub async fn load_users(&self) -> Result<Vec<(UserId, String)>> {
        let rows = sqlx::query("SELECT id, display_name FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to load users")?;
        rows.into_iter()
            .map(|row| {
                Ok((
                    UserId::new(row.try_get::<String, _>("id")?),
                    row.try_get("display_name")?,
                ))
            })
            .collect()
    }
}

/// Accepts bare file paths as well as `sqlite:` URLs.
pub fn normalize_database_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{}", raw.replace('\\', "/"))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == MEMORY_URL || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
