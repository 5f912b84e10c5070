//! End-to-end coverage of the proxy pipeline against a real axum router, a
//! scratch in-memory sqlite database, and an `httpmock` stand-in for the
//! upstream control server. Mirrors the numbered scenarios worked through
//! by hand when this pipeline was designed.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::Router;
use httpmock::prelude::*;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::ServiceExt;

use linspirer_proxy::commands::CommandStore;
use linspirer_proxy::config::ProxyConfig;
use linspirer_proxy::cryptor::Cryptor;
use linspirer_proxy::db::bootstrap_schema;
use linspirer_proxy::logs::LogSink;
use linspirer_proxy::metrics::ProxyMetrics;
use linspirer_proxy::pipeline::{handle_public_interface, INTERCEPT_PATH};
use linspirer_proxy::rules::RuleStore;
use linspirer_proxy::state::AppState;

const KEY: [u8; 16] = *b"AAAAAAAAAAAAAAAA";
const IV: [u8; 16] = *b"BBBBBBBBBBBBBBBB";

async fn scratch_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    bootstrap_schema(&pool).await.unwrap();
    pool
}

async fn test_state(pool: SqlitePool, target_url: String) -> AppState {
    let config = ProxyConfig {
        key: KEY,
        iv: IV,
        target_url,
        db_path: ":memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: "test-secret".to_string(),
    };
    AppState {
        config: Arc::new(config),
        cryptor: Cryptor::new(KEY, IV),
        rules: RuleStore::new(pool.clone()),
        logs: LogSink::new(pool.clone()),
        commands: CommandStore::new(pool.clone()),
        http_client: reqwest::Client::builder().danger_accept_invalid_certs(true).build().unwrap(),
        metrics: Arc::new(ProxyMetrics::new().unwrap()),
        pool,
    }
}

fn app(state: AppState) -> Router {
    Router::new().route(INTERCEPT_PATH, post(handle_public_interface)).with_state(state)
}

async fn post_envelope(router: &Router, envelope: &Value) -> (StatusCode, String) {
    let req = Request::builder()
        .uri(INTERCEPT_PATH)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(envelope.to_string()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn encrypted_envelope(cryptor: &Cryptor, method: &str, params: &Value) -> Value {
    let params_ct = cryptor.encrypt(&params.to_string()).unwrap();
    json!({
        "!version": 1,
        "client_version": "1",
        "id": 1,
        "jsonrpc": "2.0",
        "content": { "method": method, "params": params_ct }
    })
}

/// Scenario 1: a global `replace` rule short-circuits the upstream entirely
/// and the client receives the encrypted custom response.
#[tokio::test]
async fn global_replace_short_circuits_upstream() {
    let pool = scratch_pool().await;
    let cryptor = Cryptor::new(KEY, IV);
    let upstream = MockServer::start();
    let never_called = upstream.mock(|when, then| {
        when.method(POST).path(INTERCEPT_PATH);
        then.status(200).body("should never be hit");
    });

    let rules = RuleStore::new(pool.clone());
    rules
        .create(
            "getTactics",
            "replace",
            Some(r#"{"code":0,"data":{"type":"object","data":{}}}"#),
            None,
            true,
            None,
        )
        .await
        .unwrap();

    let state = test_state(pool.clone(), upstream.base_url()).await;
    let router = app(state);
    let envelope = encrypted_envelope(&cryptor, "getTactics", &json!({"email": "u@x"}));

    let (status, body) = post_envelope(&router, &envelope).await;
    assert_eq!(status, StatusCode::OK);
    let decrypted = cryptor.decrypt(&body).unwrap();
    assert_eq!(decrypted, r#"{"code":0,"data":{"type":"object","data":{}}}"#);
    assert_eq!(never_called.hits(), 0);

    let (logs, total) = LogSink::new(pool).list(None, None, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(logs[0].response_interception_action.as_deref(), Some("replace"));
    assert_eq!(logs[0].request_interception_action, None);
    assert_eq!(logs[0].email.as_deref(), Some("u@x"));
}

/// Scenario 2: a user-scoped rule wins over a global rule for the matching
/// caller; other callers still see the global rule's response.
#[tokio::test]
async fn user_scoped_rule_beats_global_rule() {
    let pool = scratch_pool().await;
    let cryptor = Cryptor::new(KEY, IV);
    let upstream = MockServer::start();

    let rules = RuleStore::new(pool.clone());
    rules.create("getCmd", "replace", Some(r#"{"g":1}"#), None, true, None).await.unwrap();
    rules
        .create("getCmd", "replace", Some(r#"{"u":1}"#), Some("u@x"), false, None)
        .await
        .unwrap();

    let state = test_state(pool, upstream.base_url()).await;
    let router = app(state);

    let (_, body_u) = post_envelope(&router, &encrypted_envelope(&cryptor, "getCmd", &json!({"email": "u@x"}))).await;
    assert_eq!(cryptor.decrypt(&body_u).unwrap(), r#"{"u":1}"#);

    let (_, body_v) = post_envelope(&router, &encrypted_envelope(&cryptor, "getCmd", &json!({"email": "v@x"}))).await;
    assert_eq!(cryptor.decrypt(&body_v).unwrap(), r#"{"g":1}"#);
}

/// Scenario 3: a disabled rule is invisible to resolution; the request is
/// forwarded untouched and both log action fields stay null.
#[tokio::test]
async fn disabled_rule_is_passed_through() {
    let pool = scratch_pool().await;
    let cryptor = Cryptor::new(KEY, IV);
    let upstream = MockServer::start();

    let upstream_plaintext = json!({"code": 0, "data": "from upstream"}).to_string();
    let upstream_ciphertext = cryptor.encrypt(&upstream_plaintext).unwrap();
    upstream.mock(|when, then| {
        when.method(POST).path(INTERCEPT_PATH);
        then.status(200).body(upstream_ciphertext.as_str());
    });

    let rules = RuleStore::new(pool.clone());
    let rule = rules.create("getTactics", "replace", Some(r#"{"code":0}"#), None, true, None).await.unwrap();
    rules.update(rule.id, None, None, None, Some(false), None, None, None).await.unwrap();

    let state = test_state(pool.clone(), upstream.base_url()).await;
    let router = app(state);
    let (status, body) = post_envelope(&router, &encrypted_envelope(&cryptor, "getTactics", &json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(cryptor.decrypt(&body).unwrap(), upstream_plaintext);

    let (logs, _) = LogSink::new(pool).list(None, None, 10, 0).await.unwrap();
    assert_eq!(logs[0].request_interception_action, None);
    assert_eq!(logs[0].response_interception_action, None);
}

/// Scenario 4: `randomize_app_duration` rewrites long-duration entries for
/// the targeted package and leaves everything else alone.
#[tokio::test]
async fn randomize_app_duration_thins_and_rewrites_targeted_entries() {
    let pool = scratch_pool().await;
    let cryptor = Cryptor::new(KEY, IV);
    let upstream = MockServer::start();
    let echoed = cryptor.encrypt(&json!({"code": 0}).to_string()).unwrap();
    upstream.mock(|when, then| {
        when.method(POST).path(INTERCEPT_PATH);
        then.status(200).body(echoed.as_str());
    });

    let rules = RuleStore::new(pool.clone());
    rules
        .create(
            "reportUsage",
            "randomize_app_duration",
            Some(r#"{"packages":["com.kingsoft"],"max_duration_minutes":30,"keep_count":2}"#),
            None,
            true,
            None,
        )
        .await
        .unwrap();

    let state = test_state(pool.clone(), upstream.base_url()).await;
    let router = app(state);
    let params = json!({
        "logs": [
            {"mPackageName": "com.kingsoft", "mBeginTimeStamp": 0, "mEndTimeStamp": 7_200_000},
            {"mPackageName": "com.x", "mBeginTimeStamp": 0, "mEndTimeStamp": 5_000},
        ]
    });
    let (status, _) = post_envelope(&router, &encrypted_envelope(&cryptor, "reportUsage", &params)).await;
    assert_eq!(status, StatusCode::OK);

    let (logs, _) = LogSink::new(pool).list(None, None, 10, 0).await.unwrap();
    assert_eq!(logs[0].request_interception_action.as_deref(), Some("randomize_app_duration"));
    let intercepted: Value = serde_json::from_str(logs[0].intercepted_request.as_deref().unwrap()).unwrap();
    let logs_out = intercepted["content"]["params"]["logs"].as_array().unwrap();

    let kingsoft = logs_out.iter().find(|l| l["mPackageName"] == "com.kingsoft").unwrap();
    assert!(kingsoft["mEndTimeStamp"].as_i64().unwrap() <= 1_800_000);
    assert_eq!(kingsoft["mDuration"], kingsoft["mEndTimeStamp"]);

    let other = logs_out.iter().find(|l| l["mPackageName"] == "com.x").unwrap();
    assert_eq!(other["mEndTimeStamp"], 5_000);
}

/// Scenario 5: an unreachable upstream surfaces as a 502 and no row is
/// written to the audit log.
#[tokio::test]
async fn unreachable_upstream_returns_502_and_does_not_log() {
    let pool = scratch_pool().await;
    let cryptor = Cryptor::new(KEY, IV);

    // Bind then immediately drop a listener to get a port nothing answers on.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_port = probe.local_addr().unwrap().port();
    drop(probe);

    let state = test_state(pool.clone(), format!("http://127.0.0.1:{dead_port}")).await;
    let router = app(state);
    let (status, body) = post_envelope(&router, &encrypted_envelope(&cryptor, "getTactics", &json!({}))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert!(parsed.get("error").is_some());

    let (_, total) = LogSink::new(pool).list(None, None, 10, 0).await.unwrap();
    assert_eq!(total, 0);
}

/// Scenario 6: the caller's email is recovered from `params` even when no
/// rule matches, and is recorded on the passthrough log row.
#[tokio::test]
async fn email_is_extracted_and_logged_on_passthrough() {
    let pool = scratch_pool().await;
    let cryptor = Cryptor::new(KEY, IV);
    let upstream = MockServer::start();
    let echoed = cryptor.encrypt(&json!({"code": 0}).to_string()).unwrap();
    upstream.mock(|when, then| {
        when.method(POST).path(INTERCEPT_PATH);
        then.status(200).body(echoed.as_str());
    });

    let state = test_state(pool.clone(), upstream.base_url()).await;
    let router = app(state);
    let params = json!({"userEmail": "u@x"});
    let (status, _) = post_envelope(&router, &encrypted_envelope(&cryptor, "heartbeat", &params)).await;
    assert_eq!(status, StatusCode::OK);

    let (logs, _) = LogSink::new(pool).list(None, None, 10, 0).await.unwrap();
    assert_eq!(logs[0].email.as_deref(), Some("u@x"));
    assert_eq!(logs[0].request_interception_action, None);
    assert_eq!(logs[0].response_interception_action, None);
}

/// Boundary: an empty body is forwarded untouched and produces no audit row.
#[tokio::test]
async fn empty_body_is_forwarded_without_logging() {
    let pool = scratch_pool().await;
    let upstream = MockServer::start();
    let echo = upstream.mock(|when, then| {
        when.method(POST).path(INTERCEPT_PATH);
        then.status(200).body("");
    });

    let state = test_state(pool.clone(), upstream.base_url()).await;
    let router = app(state);
    let req = Request::builder()
        .uri(INTERCEPT_PATH)
        .method("POST")
        .body(Body::from(""))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(echo.hits(), 1);

    let (_, total) = LogSink::new(pool).list(None, None, 10, 0).await.unwrap();
    assert_eq!(total, 0);
}
