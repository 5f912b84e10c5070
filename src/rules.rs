//! Interception rule persistence and resolution.
//!
//! Resolution is a two-pass scan over the enabled rules for a method, newest
//! first: a user-scoped rule whose comma-separated email list contains the
//! caller wins outright; only when no user-scoped rule matches do we fall
//! back to the first enabled global rule.

use sqlx::SqlitePool;
use thiserror::Error;

use crate::models::{china_now, InterceptionRule, VALID_ACTIONS};

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid action '{0}', must be one of: passthrough, modify, replace, randomize_app_duration")]
    InvalidAction(String),
    #[error("custom_response is required when action is 'replace' or 'modify'")]
    MissingCustomResponse,
    #[error("rule not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

fn validate_action(action: &str, custom_response: &Option<String>) -> Result<(), RuleError> {
    if !VALID_ACTIONS.contains(&action) {
        return Err(RuleError::InvalidAction(action.to_string()));
    }
    if matches!(action, "replace" | "modify") && custom_response.as_deref().unwrap_or("").is_empty() {
        return Err(RuleError::MissingCustomResponse);
    }
    Ok(())
}

#[derive(Clone)]
pub struct RuleStore {
    pool: SqlitePool,
}

impl RuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_all(&self) -> Result<Vec<InterceptionRule>, RuleError> {
        let rules = sqlx::query_as::<_, InterceptionRule>(
            "SELECT * FROM interception_rules ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<InterceptionRule>, RuleError> {
        let rule = sqlx::query_as::<_, InterceptionRule>(
            "SELECT * FROM interception_rules WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rule)
    }

    /// Resolves the rule that applies to `(method, email)`, if any.
    pub async fn resolve(
        &self,
        method: &str,
        email: Option<&str>,
    ) -> Result<Option<InterceptionRule>, RuleError> {
        let rules = sqlx::query_as::<_, InterceptionRule>(
            "SELECT * FROM interception_rules WHERE method_name = ? AND is_enabled = 1 ORDER BY created_at DESC",
        )
        .bind(method)
        .fetch_all(&self.pool)
        .await?;

        for rule in &rules {
            if rule.is_global {
                continue;
            }
            let Some(rule_email) = rule.email.as_deref() else { continue };
            let Some(caller_email) = email else { continue };
            let scoped: Vec<&str> = rule_email.split(',').map(str::trim).collect();
            if scoped.contains(&caller_email) {
                return Ok(Some(rule.clone()));
            }
        }

        for rule in &rules {
            if rule.is_global && rule.email.is_none() {
                return Ok(Some(rule.clone()));
            }
        }

        Ok(None)
    }

    /// Upserts a rule for `(method_name, email-scope)`: updates in place if a
    /// rule already exists at that scope, otherwise inserts a new one.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        method_name: &str,
        action: &str,
        custom_response: Option<&str>,
        email: Option<&str>,
        is_global: bool,
        remark: Option<&str>,
    ) -> Result<InterceptionRule, RuleError> {
        validate_action(action, &custom_response.map(str::to_string))?;

        let target_email = if is_global { None } else { email };
        let existing = sqlx::query_as::<_, InterceptionRule>(
            "SELECT * FROM interception_rules WHERE method_name = ? AND email IS ?",
        )
        .bind(method_name)
        .bind(target_email)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(existing) = existing {
            self.update(
                existing.id,
                Some(method_name),
                Some(action),
                custom_response,
                Some(true),
                target_email,
                Some(is_global),
                remark,
            )
            .await?;
            return self.find_by_id(existing.id).await?.ok_or(RuleError::NotFound);
        }

        let now = china_now().naive_local();
        let id = sqlx::query(
            r#"
            INSERT INTO interception_rules
                (method_name, email, action, custom_response, remark, is_enabled, is_global, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(method_name)
        .bind(target_email)
        .bind(action)
        .bind(custom_response)
        .bind(remark)
        .bind(is_global)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.find_by_id(id).await?.ok_or(RuleError::NotFound)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        id: i64,
        method_name: Option<&str>,
        action: Option<&str>,
        custom_response: Option<&str>,
        is_enabled: Option<bool>,
        email: Option<&str>,
        is_global: Option<bool>,
        remark: Option<&str>,
    ) -> Result<InterceptionRule, RuleError> {
        let existing = self.find_by_id(id).await?.ok_or(RuleError::NotFound)?;

        let action = action.unwrap_or(&existing.action);
        let custom_response = custom_response.or(existing.custom_response.as_deref());
        validate_action(action, &custom_response.map(str::to_string))?;

        let method_name = method_name.unwrap_or(&existing.method_name);
        let is_enabled = is_enabled.unwrap_or(existing.is_enabled);
        let resolved_is_global = is_global.unwrap_or(existing.is_global);
        let email = if is_global.unwrap_or(false) {
            None
        } else {
            email.or(existing.email.as_deref())
        };
        let remark = remark.or(existing.remark.as_deref());
        let now = china_now().naive_local();

        sqlx::query(
            r#"
            UPDATE interception_rules
            SET method_name = ?, email = ?, action = ?, custom_response = ?, remark = ?,
                is_enabled = ?, is_global = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(method_name)
        .bind(email)
        .bind(action)
        .bind(custom_response)
        .bind(remark)
        .bind(is_enabled)
        .bind(resolved_is_global)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.find_by_id(id).await?.ok_or(RuleError::NotFound)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RuleError> {
        let result = sqlx::query("DELETE FROM interception_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RuleError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::bootstrap_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn user_scoped_rule_beats_global() {
        let store = RuleStore::new(pool().await);
        store
            .create("getTactics", "passthrough", None, None, true, None)
            .await
            .unwrap();
        store
            .create(
                "getTactics",
                "replace",
                Some("{}"),
                Some("a@b.com, c@d.com"),
                false,
                None,
            )
            .await
            .unwrap();

        let resolved = store.resolve("getTactics", Some("c@d.com")).await.unwrap().unwrap();
        assert_eq!(resolved.action, "replace");

        let fallback = store.resolve("getTactics", Some("nobody@else.com")).await.unwrap().unwrap();
        assert_eq!(fallback.action, "passthrough");
    }

    #[tokio::test]
    async fn disabled_rule_is_invisible() {
        let store = RuleStore::new(pool().await);
        let rule = store
            .create("ping", "replace", Some("{}"), None, true, None)
            .await
            .unwrap();
        store
            .update(rule.id, None, None, None, Some(false), None, None, None)
            .await
            .unwrap();
        assert!(store.resolve("ping", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_requires_custom_response() {
        let store = RuleStore::new(pool().await);
        let err = store.create("ping", "replace", None, None, true, None).await;
        assert!(matches!(err, Err(RuleError::MissingCustomResponse)));
    }
}
