use std::sync::Arc;

use reqwest::Client;
use sqlx::SqlitePool;

use crate::commands::CommandStore;
use crate::config::ProxyConfig;
use crate::cryptor::Cryptor;
use crate::logs::LogSink;
use crate::metrics::ProxyMetrics;
use crate::rules::RuleStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub cryptor: Cryptor,
    pub pool: SqlitePool,
    pub rules: RuleStore,
    pub logs: LogSink,
    pub commands: CommandStore,
    pub http_client: Client,
    pub metrics: Arc<ProxyMetrics>,
}
