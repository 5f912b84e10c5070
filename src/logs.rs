//! Append-only audit log of proxied requests.

use sqlx::SqlitePool;

use crate::models::{china_now, RequestLog};

#[derive(Clone)]
pub struct LogSink {
    pool: SqlitePool,
}

#[derive(Default)]
pub struct NewLogEntry<'a> {
    pub method: &'a str,
    pub request_body: &'a str,
    pub response_body: &'a str,
    pub intercepted_request: Option<&'a str>,
    pub intercepted_response: Option<&'a str>,
    pub request_interception_action: Option<&'a str>,
    pub response_interception_action: Option<&'a str>,
    pub email: Option<&'a str>,
}

impl LogSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends a log entry. Failures are swallowed by the caller — see
    /// `pipeline::append_log_best_effort` — so the append itself is allowed
    /// to propagate a plain `sqlx::Error`.
    pub async fn append(&self, entry: NewLogEntry<'_>) -> Result<i64, sqlx::Error> {
        let now = china_now().naive_local();
        let id = sqlx::query(
            r#"
            INSERT INTO request_logs
                (method, request_body, response_body, intercepted_request, intercepted_response,
                 request_interception_action, response_interception_action, email, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.method)
        .bind(entry.request_body)
        .bind(entry.response_body)
        .bind(entry.intercepted_request)
        .bind(entry.intercepted_response)
        .bind(entry.request_interception_action)
        .bind(entry.response_interception_action)
        .bind(entry.email)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn list(
        &self,
        method: Option<&str>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RequestLog>, i64), sqlx::Error> {
        let pattern = search.map(|s| format!("%{s}%"));

        let rows = sqlx::query_as::<_, RequestLog>(
            r#"
            SELECT * FROM request_logs
            WHERE (?1 IS NULL OR method = ?1)
              AND (?2 IS NULL OR request_body LIKE ?2 OR response_body LIKE ?2)
            ORDER BY created_at DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(method)
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM request_logs
            WHERE (?1 IS NULL OR method = ?1)
              AND (?2 IS NULL OR request_body LIKE ?2 OR response_body LIKE ?2)
            "#,
        )
        .bind(method)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    pub async fn list_methods(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT DISTINCT method FROM request_logs WHERE method IS NOT NULL ORDER BY method",
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Distinct caller emails observed in logs, falling back to rule-scoped
    /// emails if no log has recorded one yet.
    pub async fn list_emails(&self) -> Result<Vec<String>, sqlx::Error> {
        let mut emails: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT email FROM request_logs WHERE email IS NOT NULL AND email != '' ORDER BY email",
        )
        .fetch_all(&self.pool)
        .await?;

        if emails.is_empty() {
            let rule_emails: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT email FROM interception_rules WHERE email IS NOT NULL AND email != ''",
            )
            .fetch_all(&self.pool)
            .await?;
            emails.extend(rule_emails);
            emails.sort();
            emails.dedup();
        }

        Ok(emails)
    }
}
