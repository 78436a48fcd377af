use crate::constants::DB_PRAGMAS;
use crate::types::{Admin, OperatorId, OperatorRole, RelayError, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;

pub type DbPool = SqlitePool;

pub async fn init_db<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path_str = match path.as_ref().to_str() {
        Some(s) => s,
        None => {
            return Err(RelayError::Config(
                "Invalid database path: Path contains non-UTF8 characters".to_string(),
            )
            .into())
        }
    };
    let url = format!("sqlite:{}?mode=rwc", path_str);

    let pool = match SqlitePool::connect(&url).await {
        Ok(p) => p,
        Err(e) => return Err(RelayError::Database(e).into()),
    };

    configure_db(&pool).await?;
    migrate(&pool).await?;
    verify_schema_version(&pool).await;

    Ok(pool)
}

/// Single-connection in-memory database; every connection to `:memory:` is
/// its own database, so the pool must never open a second one.
pub async fn init_memory_db() -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn configure_db(pool: &DbPool) -> Result<()> {
    for pragma in DB_PRAGMAS {
        if let Err(e) = sqlx::query(pragma).execute(pool).await {
            return Err(RelayError::Database(e).into());
        }
    }
    Ok(())
}

async fn migrate(pool: &DbPool) -> Result<()> {
    if let Err(e) = sqlx::migrate!("./migrations").run(pool).await {
        return Err(RelayError::internal(format!("Migration failed: {}", e)).into());
    }
    Ok(())
}

async fn verify_schema_version(pool: &DbPool) {
    let version_row: std::result::Result<(String,), sqlx::Error> =
        sqlx::query_as("SELECT value FROM schema_metadata WHERE key = 'schema_version'")
            .fetch_one(pool)
            .await;

    match version_row {
        Ok((version,)) => {
            tracing::info!("Database initialized. Schema version: {}", version);
        }
        Err(e) => {
            tracing::warn!("Could not verify schema version: {}", e);
        }
    }
}

// --- CONFIG ---

pub async fn load_config(pool: &DbPool) -> Result<HashMap<String, String>> {
    let rows = sqlx::query("SELECT key, value FROM config")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
        .collect())
}

pub async fn set_config(pool: &DbPool, key: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

// --- ADMINS ---

pub async fn load_admins(pool: &DbPool) -> Result<Vec<Admin>> {
    let rows = sqlx::query("SELECT telegram_id, username, role FROM admins ORDER BY rowid")
        .fetch_all(pool)
        .await?;

    let mut admins = Vec::with_capacity(rows.len());
    for r in rows {
        let id: i64 = r.get(0);
        let role_raw: String = r.get(2);
        let role = match OperatorRole::parse(&role_raw) {
            Some(role) => role,
            None => {
                tracing::warn!("Admin {} has unknown role '{}', treating as admin", id, role_raw);
                OperatorRole::Admin
            }
        };
        admins.push(Admin {
            operator_id: OperatorId(id),
            username: r.get(1),
            role,
        });
    }
    Ok(admins)
}

pub async fn add_admin(pool: &DbPool, admin: &Admin) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO admins (telegram_id, username, role) VALUES (?1, ?2, ?3)")
        .bind(admin.operator_id.0)
        .bind(admin.username.as_deref())
        .bind(admin.role.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

// --- CREDENTIALS (per operator) ---

/// Active and valid credentials of one operator, oldest first.
pub async fn load_credentials(pool: &DbPool, owner: OperatorId) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT key FROM deepseek_keys
         WHERE is_active = 1 AND is_valid = 1 AND owner_telegram_id = ?1
         ORDER BY id",
    )
    .bind(owner.0)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).filter(|k| !k.is_empty()).collect())
}

pub async fn add_credential(pool: &DbPool, owner: OperatorId, credential: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO deepseek_keys (key, is_active, is_valid, owner_telegram_id)
         VALUES (?1, 1, 1, ?2)",
    )
    .bind(credential)
    .bind(owner.0)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_credential(pool: &DbPool, owner: OperatorId, credential: &str) -> Result<()> {
    sqlx::query("DELETE FROM deepseek_keys WHERE key = ?1 AND owner_telegram_id = ?2")
        .bind(credential)
        .bind(owner.0)
        .execute(pool)
        .await?;
    Ok(())
}

// --- CHANNEL / BOT STATE (per operator) ---

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotState {
    pub channel: Option<String>,
    pub enabled: bool,
}

pub async fn load_bot_state(pool: &DbPool, owner: OperatorId) -> Result<BotState> {
    let row = sqlx::query(
        "SELECT c.name, b.bot_enabled
         FROM bot_state b
         LEFT JOIN channels c ON b.current_channel_id = c.id
         WHERE b.owner_telegram_id = ?1",
    )
    .bind(owner.0)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some(r) => BotState {
            channel: r.get(0),
            enabled: r.get::<i64, _>(1) != 0,
        },
        None => BotState::default(),
    })
}

/// Makes `channel` the operator's only active channel.
pub async fn set_current_channel(pool: &DbPool, owner: OperatorId, channel: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT OR IGNORE INTO channels (name, is_active, owner_telegram_id) VALUES (?1, 0, ?2)",
    )
    .bind(channel)
    .bind(owner.0)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE channels SET is_active = (name = ?1) WHERE owner_telegram_id = ?2")
        .bind(channel)
        .bind(owner.0)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO bot_state (owner_telegram_id, bot_enabled, current_channel_id)
         VALUES (?1, 0, NULL)",
    )
    .bind(owner.0)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE bot_state
         SET current_channel_id = (
             SELECT id FROM channels WHERE name = ?1 AND owner_telegram_id = ?2 LIMIT 1
         )
         WHERE owner_telegram_id = ?2",
    )
    .bind(channel)
    .bind(owner.0)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn set_bot_enabled(pool: &DbPool, owner: OperatorId, enabled: bool) -> Result<()> {
    sqlx::query(
        "INSERT INTO bot_state (owner_telegram_id, bot_enabled, current_channel_id)
         VALUES (?1, ?2, NULL)
         ON CONFLICT(owner_telegram_id) DO UPDATE SET bot_enabled = excluded.bot_enabled",
    )
    .bind(owner.0)
    .bind(enabled as i64)
    .execute(pool)
    .await?;
    Ok(())
}

// --- STOP WORDS (global) ---

pub async fn load_stop_words(pool: &DbPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT word FROM stop_words ORDER BY id")
        .fetch_all(pool)
        .await?;
    let mut words: Vec<String> = Vec::with_capacity(rows.len());
    for (word,) in rows {
        let word = word.trim().to_lowercase();
        if !word.is_empty() && !words.contains(&word) {
            words.push(word);
        }
    }
    Ok(words)
}

pub async fn add_stop_word(pool: &DbPool, word: &str) -> Result<()> {
    let word = word.trim().to_lowercase();
    if word.is_empty() {
        return Ok(());
    }
    sqlx::query("INSERT OR IGNORE INTO stop_words (word) VALUES (?1)")
        .bind(word)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_stop_word(pool: &DbPool, word: &str) -> Result<()> {
    let word = word.trim().to_lowercase();
    if word.is_empty() {
        return Ok(());
    }
    // Rows written by older tools may carry any case; SQLite's lower() only
    // folds ASCII, so matching happens here.
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, word FROM stop_words")
        .fetch_all(pool)
        .await?;
    for (id, stored) in rows {
        if stored.trim().to_lowercase() == word {
            sqlx::query("DELETE FROM stop_words WHERE id = ?1")
                .bind(id)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}
