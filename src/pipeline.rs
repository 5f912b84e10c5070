//! The intercepting proxy's request lifecycle: parse, decrypt, resolve a
//! rule, apply an action, forward upstream, transform the response,
//! re-encrypt, and log — all on the single `/public-interface.php` path.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::actions::{apply_request_action, RequestOutcome};
use crate::envelope;
use crate::logs::NewLogEntry;
use crate::state::AppState;

pub const INTERCEPT_PATH: &str = "/public-interface.php";
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn handle_public_interface(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body_str = String::from_utf8_lossy(&body).to_string();

    let Some(mut request_envelope) = envelope::parse(&body_str) else {
        return raw_forward(&state, &headers, body).await;
    };

    envelope::decrypt_params(&mut request_envelope, &state.cryptor);
    let method = envelope::method(&request_envelope);
    let email = envelope::extract_email(&request_envelope);

    let rule = match state.rules.resolve(&method, email.as_deref()).await {
        Ok(rule) => rule,
        Err(err) => {
            warn!(%method, error = %err, "rule resolution failed, treating as passthrough");
            None
        }
    };

    let request_body_for_log = serde_json::to_string(&request_envelope).unwrap_or_default();

    let outcome = match &rule {
        Some(rule) => apply_request_action(&rule.action, rule.custom_response.as_deref(), &request_envelope)
            .unwrap_or(RequestOutcome::Passthrough),
        None => RequestOutcome::Passthrough,
    };

    state.metrics.record_action(rule.as_ref().map(|r| r.action.as_str()).unwrap_or("passthrough"));

    if let RequestOutcome::Replace { response_body } = outcome {
        let response_str = serde_json::to_string(&response_body).unwrap_or_default();
        let encrypted = match state.cryptor.encrypt(&response_str) {
            Ok(enc) => enc,
            Err(err) => {
                warn!(%method, error = %err, "failed to encrypt replace response");
                state.metrics.record_encrypt_failure("replace_response");
                response_str.clone()
            }
        };

        append_log_best_effort(
            &state,
            NewLogEntry {
                method: &method,
                request_body: &request_body_for_log,
                response_body: &response_str,
                intercepted_request: Some(&request_body_for_log),
                intercepted_response: Some(&response_str),
                request_interception_action: None,
                response_interception_action: Some("replace"),
                email: email.as_deref(),
            },
        )
        .await;

        return (StatusCode::OK, [("content-type", "application/json")], encrypted).into_response();
    }

    let (outgoing_envelope, intercepted_request, req_action) = match outcome {
        RequestOutcome::Forward { envelope, intercepted, action_label } => {
            (envelope, Some(serde_json::to_string(&intercepted).unwrap_or_default()), Some(action_label))
        }
        _ => (request_envelope.clone(), None, None),
    };

    let outgoing_body = match envelope::encrypt_for_wire(&outgoing_envelope, &state.cryptor) {
        Ok(body) => body,
        Err(err) => {
            warn!(%method, error = %err, "failed to encrypt outgoing request, forwarding raw envelope");
            state.metrics.record_encrypt_failure("request");
            serde_json::to_string(&outgoing_envelope).unwrap_or_default()
        }
    };

    let target_url = format!("{}{}", state.config.target_url, INTERCEPT_PATH);
    let started = Instant::now();
    let upstream_result = state
        .http_client
        .post(&target_url)
        .header("content-type", "application/json")
        .timeout(UPSTREAM_TIMEOUT)
        .body(outgoing_body)
        .send()
        .await;
    state.metrics.observe_upstream_latency(started.elapsed().as_secs_f64());

    let upstream_response = match upstream_result {
        Ok(resp) => resp,
        Err(err) => {
            warn!(%method, error = %err, "failed to reach upstream");
            state.metrics.record_upstream_failure("connect");
            return (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({ "error": format!("Failed to connect to target: {err}") })),
            )
                .into_response();
        }
    };

    let status = upstream_response.status();
    let response_bytes = upstream_response.bytes().await.unwrap_or_default();
    let response_text = String::from_utf8_lossy(&response_bytes).to_string();

    let decrypted_response = match state.cryptor.decrypt(&response_text) {
        Ok(plaintext) => plaintext,
        Err(err) => {
            warn!(%method, error = %err, "failed to decrypt upstream response, using raw body");
            state.metrics.record_decrypt_failure("response");
            response_text.clone()
        }
    };

    // Structural slot: only `replace` transforms the response, and `replace`
    // already short-circuited above, so this never fires today. Kept so a
    // future response-rewriting action has somewhere to plug in.
    let (final_response_body, resp_action) = (decrypted_response, None::<&str>);

    let encrypted_response = match state.cryptor.encrypt(&final_response_body) {
        Ok(enc) => enc,
        Err(err) => {
            warn!(%method, error = %err, "failed to encrypt response, forwarding raw upstream body");
            state.metrics.record_encrypt_failure("response");
            response_text.clone()
        }
    };

    info!(%method, req_action = req_action.unwrap_or("none"), "proxied request");

    append_log_best_effort(
        &state,
        NewLogEntry {
            method: &method,
            request_body: &request_body_for_log,
            response_body: &final_response_body,
            intercepted_request: intercepted_request.as_deref(),
            intercepted_response: None,
            request_interception_action: req_action,
            response_interception_action: resp_action,
            email: email.as_deref(),
        },
    )
    .await;

    let status_code = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK);
    (status_code, [("content-type", "application/json")], encrypted_response).into_response()
}

async fn append_log_best_effort(state: &AppState, entry: NewLogEntry<'_>) {
    let method = entry.method.to_string();
    if let Err(err) = state.logs.append(entry).await {
        warn!(%method, error = %err, "failed to save request log");
        state.metrics.record_log_append_failure(&method);
    }
}

/// Raw, uninterpreted forward used when the body is empty or not JSON — the
/// proxy has nothing to decrypt or rule against, so it just relays bytes.
async fn raw_forward(state: &AppState, headers: &HeaderMap, body: Bytes) -> Response {
    let target_url = format!("{}{}", state.config.target_url, INTERCEPT_PATH);
    let mut request = state.http_client.post(&target_url).timeout(UPSTREAM_TIMEOUT).body(body);
    for (name, value) in headers.iter() {
        if name.as_str().eq_ignore_ascii_case("host") {
            continue;
        }
        request = request.header(name, value);
    }

    match request.send().await {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::OK);
            let bytes = resp.bytes().await.unwrap_or_default();
            (status, bytes).into_response()
        }
        Err(err) => {
            warn!(error = %err, "failed to reach upstream for raw forward");
            state.metrics.record_upstream_failure("connect");
            (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({ "error": format!("Failed to connect to target: {err}") })),
            )
                .into_response()
        }
    }
}
