use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, Method};
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use reqwest::Client;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use linspirer_proxy::admin;
use linspirer_proxy::admin_auth::admin_auth_gate;
use linspirer_proxy::commands::CommandStore;
use linspirer_proxy::config::ProxyConfig;
use linspirer_proxy::cryptor::Cryptor;
use linspirer_proxy::db;
use linspirer_proxy::logs::LogSink;
use linspirer_proxy::metrics::ProxyMetrics;
use linspirer_proxy::pipeline::{handle_public_interface, INTERCEPT_PATH};
use linspirer_proxy::rules::RuleStore;
use linspirer_proxy::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = ProxyConfig::from_env()?;
    let pool = db::connect_and_bootstrap(&config).await?;
    info!(db_path = %config.db_path, "database ready");

    let cryptor = Cryptor::new(config.key, config.iv);
    let rules = RuleStore::new(pool.clone());
    let logs = LogSink::new(pool.clone());
    let commands = CommandStore::new(pool.clone());
    let metrics = Arc::new(ProxyMetrics::new()?);

    let http_client = Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(30))
        .build()?;

    let state = AppState {
        config: Arc::new(config.clone()),
        cryptor,
        pool,
        rules,
        logs,
        commands,
        http_client,
        metrics,
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, HeaderName::from_static("x-requested-with")]);

    let admin_api = Router::new()
        .route("/login", post(admin::login))
        .route("/password", put(admin::change_password))
        .route("/rules", get(admin::list_rules).post(admin::create_rule))
        .route("/rules/:id", put(admin::update_rule).delete(admin::delete_rule))
        .route("/commands", get(admin::list_commands))
        .route("/commands/:id", post(admin::update_command))
        .route("/commands/:id/send", post(admin::send_command))
        .route("/logs", get(admin::list_logs))
        .route("/logs/methods", get(admin::list_log_methods))
        .route("/logs/emails", get(admin::list_log_emails))
        .route("/logs/stats", get(admin::log_stats))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_gate));

    let app = Router::new()
        .route("/healthz", get(admin::healthz))
        .route("/metrics", get(admin::metrics_endpoint))
        .route(INTERCEPT_PATH, post(handle_public_interface))
        .nest("/admin/api", admin_api)
        .layer(cors)
        .with_state(state);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    info!(%addr, "starting linspirer-proxy");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
