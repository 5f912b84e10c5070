//! The `unverified -> verified|rejected -> sent|failed` command review workflow.

use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::{china_now, Command};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command not found")]
    NotFound,
    #[error("command must be verified before it can be sent to a device")]
    NotVerified,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct CommandStore {
    pool: SqlitePool,
}

impl CommandStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_all(&self) -> Result<Vec<Command>, CommandError> {
        let commands =
            sqlx::query_as::<_, Command>("SELECT * FROM commands ORDER BY received_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(commands)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Command>, CommandError> {
        let command = sqlx::query_as::<_, Command>("SELECT * FROM commands WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(command)
    }

    pub async fn insert(&self, command_json: &str) -> Result<i64, CommandError> {
        let now = china_now().naive_local();
        let id = sqlx::query(
            "INSERT INTO commands (command_json, status, received_at) VALUES (?, 'unverified', ?)",
        )
        .bind(command_json)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn update_status(
        &self,
        id: i64,
        status: &str,
        notes: Option<&str>,
    ) -> Result<Command, CommandError> {
        self.find_by_id(id).await?.ok_or(CommandError::NotFound)?;
        let now = china_now().naive_local();
        sqlx::query(
            "UPDATE commands SET status = ?, processed_at = ?, notes = COALESCE(?, notes) WHERE id = ?",
        )
        .bind(status)
        .bind(now)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.find_by_id(id).await?.ok_or(CommandError::NotFound)
    }

    /// Simulates dispatching a verified command to the device. The real wire
    /// protocol for device delivery is out of scope; this models only the
    /// state transition and the shape of the operator-facing response.
    pub async fn send_to_device(&self, id: i64) -> Result<String, CommandError> {
        let command = self.find_by_id(id).await?.ok_or(CommandError::NotFound)?;
        if command.status != "verified" {
            return Err(CommandError::NotVerified);
        }

        let device_response = "Command executed successfully".to_string();
        self.update_status(id, "sent", Some("Command sent to device")).await?;
        Ok(device_response)
    }
}
