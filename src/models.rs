use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::Serialize;

/// Fixed UTC+8 offset. The operator's clock is a constant operational
/// choice, not a daylight-saving-aware requirement, so we avoid pulling in
/// a full tz database dependency for it.
pub fn china_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("valid fixed offset")
}

pub fn china_now() -> DateTime<FixedOffset> {
    chrono::Utc::now().with_timezone(&china_offset())
}

/// Rows are written with [`china_now`] timestamps already in local time, so
/// reattaching the fixed offset (rather than reinterpreting as UTC) recovers
/// the original instant.
fn to_china(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    naive.and_local_timezone(china_offset()).single().expect("fixed offset is always unambiguous")
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InterceptionRule {
    pub id: i64,
    pub method_name: String,
    pub email: Option<String>,
    pub action: String,
    pub custom_response: Option<String>,
    pub remark: Option<String>,
    pub is_enabled: bool,
    pub is_global: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleResponse {
    pub id: i64,
    pub method_name: String,
    pub email: Option<String>,
    pub action: String,
    pub custom_response: Option<String>,
    pub remark: Option<String>,
    pub is_enabled: bool,
    pub is_global: bool,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl From<InterceptionRule> for RuleResponse {
    fn from(r: InterceptionRule) -> Self {
        Self {
            id: r.id,
            method_name: r.method_name,
            email: r.email,
            action: r.action,
            custom_response: r.custom_response,
            remark: r.remark,
            is_enabled: r.is_enabled,
            is_global: r.is_global,
            created_at: to_china(r.created_at),
            updated_at: to_china(r.updated_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Command {
    pub id: i64,
    pub command_json: String,
    pub status: String,
    pub received_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub id: i64,
    pub command: serde_json::Value,
    pub status: String,
    pub received_at: DateTime<FixedOffset>,
    pub processed_at: Option<DateTime<FixedOffset>>,
    pub notes: Option<String>,
}

impl From<Command> for CommandResponse {
    fn from(c: Command) -> Self {
        let command = serde_json::from_str(&c.command_json).unwrap_or(serde_json::json!({}));
        Self {
            id: c.id,
            command,
            status: c.status,
            received_at: to_china(c.received_at),
            processed_at: c.processed_at.map(to_china),
            notes: c.notes,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RequestLog {
    pub id: i64,
    pub method: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub intercepted_request: Option<String>,
    pub intercepted_response: Option<String>,
    pub request_interception_action: Option<String>,
    pub response_interception_action: Option<String>,
    pub email: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogResponse {
    pub id: i64,
    pub method: Option<String>,
    pub request_body: serde_json::Value,
    pub response_body: serde_json::Value,
    pub intercepted_request: Option<serde_json::Value>,
    pub intercepted_response: Option<serde_json::Value>,
    pub request_interception_action: Option<String>,
    pub response_interception_action: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<FixedOffset>,
}

impl From<RequestLog> for RequestLogResponse {
    fn from(l: RequestLog) -> Self {
        let parse = |s: Option<String>| -> serde_json::Value {
            s.and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::json!({}))
        };
        let parse_opt = |s: Option<String>| -> Option<serde_json::Value> {
            s.and_then(|s| serde_json::from_str(&s).ok())
        };
        Self {
            id: l.id,
            method: l.method,
            request_body: parse(l.request_body),
            response_body: parse(l.response_body),
            intercepted_request: parse_opt(l.intercepted_request),
            intercepted_response: parse_opt(l.intercepted_response),
            request_interception_action: l.request_interception_action,
            response_interception_action: l.response_interception_action,
            email: l.email,
            created_at: to_china(l.created_at),
        }
    }
}

pub const VALID_ACTIONS: &[&str] = &["passthrough", "modify", "replace", "randomize_app_duration"];
