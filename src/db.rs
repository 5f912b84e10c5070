use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use crate::config::ProxyConfig;

const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Opens (creating if absent) the SQLite database and applies the schema,
/// mirroring the original bootstrap's idempotent `CREATE TABLE IF NOT EXISTS`
/// sequence and its seeded defaults for `admin_password_hash` and
/// `target_url`.
pub async fn connect_and_bootstrap(config: &ProxyConfig) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("creating database directory")?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.db_path))
        .context("parsing sqlite connection string")?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("connecting to sqlite database")?;

    bootstrap_schema(&pool).await?;
    seed_defaults(&pool, &config.target_url).await?;

    Ok(pool)
}

/// Creates every table (idempotent) but does not seed defaults. Exposed so
/// callers embedding the proxy or writing integration tests can stand up a
/// schema against an in-memory or scratch database without a full
/// [`connect_and_bootstrap`].
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interception_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            method_name TEXT NOT NULL,
            email TEXT,
            action TEXT NOT NULL CHECK(action IN ('passthrough', 'modify', 'replace', 'randomize_app_duration')),
            custom_response TEXT,
            remark TEXT,
            is_enabled BOOLEAN NOT NULL DEFAULT 1,
            is_global BOOLEAN NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_interception_rules_method_email ON interception_rules(method_name, email)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            command_json TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('unverified', 'verified', 'rejected', 'sent', 'failed')),
            received_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            processed_at DATETIME,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS request_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            method TEXT,
            request_body TEXT,
            response_body TEXT,
            intercepted_request TEXT,
            intercepted_response TEXT,
            request_interception_action TEXT,
            response_interception_action TEXT,
            email TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // tactics_templates is schema-only: the proxy core never interprets the
    // tactics payload, but the table is kept for parity with the upstream
    // admin tooling that may read it out of band.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tactics_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            template_json TEXT NOT NULL,
            is_default BOOLEAN DEFAULT 0,
            is_applied BOOLEAN DEFAULT 0,
            description TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_defaults(pool: &SqlitePool, target_url: &str) -> Result<()> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT value FROM config WHERE key = 'admin_password_hash'")
            .fetch_optional(pool)
            .await?;
    if existing.is_none() {
        let hash = bcrypt::hash(DEFAULT_ADMIN_PASSWORD, bcrypt::DEFAULT_COST)
            .context("hashing default admin password")?;
        sqlx::query(
            "INSERT INTO config (key, value, description) VALUES ('admin_password_hash', ?, 'Admin panel login password hash')",
        )
        .bind(hash)
        .execute(pool)
        .await?;
    }

    let existing_target: Option<(String,)> =
        sqlx::query_as("SELECT value FROM config WHERE key = 'target_url'")
            .fetch_optional(pool)
            .await?;
    if existing_target.is_none() {
        sqlx::query(
            "INSERT INTO config (key, value, description) VALUES ('target_url', ?, 'Upstream target URL')",
        )
        .bind(target_url)
        .execute(pool)
        .await?;
    }

    Ok(())
}
