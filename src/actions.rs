//! Pure transforms applied to a decrypted JSON-RPC envelope once a rule has
//! been resolved for the request.

use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;

use crate::envelope;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("custom_response is not valid JSON: {0}")]
    InvalidCustomResponse(serde_json::Error),
}

/// What the pipeline should do next after an action has run against the
/// request side of the envelope.
pub enum RequestOutcome {
    /// `replace` short-circuits the pipeline entirely: this value is
    /// encrypted and returned to the caller without contacting upstream.
    Replace { response_body: Value },
    /// `modify` / `randomize_app_duration` substitute the envelope that gets
    /// forwarded upstream. `rule_info` is attached for audit logging only
    /// and is stripped before the envelope is encrypted.
    Forward { envelope: Value, intercepted: Value, action_label: &'static str },
    /// No rule, or a `passthrough` rule: forward the original envelope.
    Passthrough,
}

/// Dispatches on the resolved rule's action. `request_envelope` is the
/// already-decrypted JSON-RPC object (`{"method": .., "params": <object>}`).
pub fn apply_request_action(
    action: &str,
    custom_response: Option<&str>,
    request_envelope: &Value,
) -> Result<RequestOutcome, ActionError> {
    match action {
        "replace" => {
            let response_body = parse_custom_response(custom_response)?;
            Ok(RequestOutcome::Replace { response_body })
        }
        "modify" => {
            let new_params = parse_custom_response(custom_response)?;
            let mut modified = request_envelope.clone();
            envelope::set_params(&mut modified, new_params);
            Ok(RequestOutcome::Forward {
                intercepted: modified.clone(),
                envelope: modified,
                action_label: "modify",
            })
        }
        "randomize_app_duration" => {
            let envelope = randomize_app_duration(request_envelope, custom_response);
            Ok(RequestOutcome::Forward {
                intercepted: envelope.clone(),
                envelope,
                action_label: "randomize_app_duration",
            })
        }
        _ => Ok(RequestOutcome::Passthrough),
    }
}

fn parse_custom_response(custom_response: Option<&str>) -> Result<Value, ActionError> {
    match custom_response {
        Some(raw) if !raw.is_empty() => {
            serde_json::from_str(raw).map_err(ActionError::InvalidCustomResponse)
        }
        _ => Ok(json!({})),
    }
}

#[derive(serde::Deserialize, Default)]
struct RandomizeConfig {
    #[serde(default = "default_packages")]
    packages: Vec<String>,
    #[serde(default = "default_max_duration_minutes")]
    max_duration_minutes: u64,
    #[serde(default = "default_keep_count")]
    keep_count: usize,
}

fn default_packages() -> Vec<String> {
    vec!["com.kingsoft".to_string()]
}
fn default_max_duration_minutes() -> u64 {
    30
}
fn default_keep_count() -> usize {
    2
}

/// Thins out usage-log entries for targeted packages: durations exceeding
/// `max_duration_minutes` are rewritten to a random shorter duration, and
/// each package's group is sampled down to `keep_count` entries (order
/// preserved), mirroring the original's `randomize_app_duration`.
fn randomize_app_duration(request_envelope: &Value, config_raw: Option<&str>) -> Value {
    let mut modified = request_envelope.clone();

    let Some(params) = envelope::content(&modified).get("params").and_then(|p| p.as_object()) else {
        return request_envelope.clone();
    };
    let Some(logs) = params.get("logs").and_then(|l| l.as_array()) else {
        return request_envelope.clone();
    };
    if logs.is_empty() {
        return request_envelope.clone();
    }

    let config: RandomizeConfig = config_raw
        .filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let max_duration_ms = (config.max_duration_minutes * 60 * 1000) as i64;

    let mut filtered_logs: Vec<Value> = Vec::new();
    let mut by_package: std::collections::HashMap<String, Vec<Value>> = std::collections::HashMap::new();
    let mut action_details: Vec<Value> = Vec::new();

    for log in logs {
        let Some(log_obj) = log.as_object() else { continue };
        let package_name = log_obj
            .get("mPackageName")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if !config.packages.contains(&package_name) {
            filtered_logs.push(log.clone());
            continue;
        }
        by_package.entry(package_name).or_default().push(log.clone());
    }

    let mut rng = rand::thread_rng();
    for (package, package_logs) in by_package {
        let mut modified_logs: Vec<Value> = Vec::with_capacity(package_logs.len());

        for log in package_logs {
            let mut log = log;
            let begin_time = log.get("mBeginTimeStamp").and_then(|v| v.as_i64()).unwrap_or(0);
            let end_time = log.get("mEndTimeStamp").and_then(|v| v.as_i64()).unwrap_or(0);
            let duration = end_time - begin_time;

            if duration > max_duration_ms {
                let new_duration = rng.gen_range(1..=(max_duration_ms / 1000).max(1)) * 1000;
                let new_end_time = begin_time + new_duration;
                if let Some(obj) = log.as_object_mut() {
                    obj.insert("mEndTimeStamp".to_string(), json!(new_end_time));
                    obj.insert("mDuration".to_string(), json!(new_duration));
                }
                action_details.push(json!({
                    "package": package,
                    "original_duration_ms": duration,
                    "new_duration_ms": new_duration,
                    "original_end_time": begin_time + duration,
                    "new_end_time": new_end_time,
                }));
            }
            modified_logs.push(log);
        }

        let original_count = modified_logs.len();
        if original_count > config.keep_count {
            let mut indices: Vec<usize> =
                rand::seq::index::sample(&mut rng, original_count, config.keep_count).into_vec();
            indices.sort_unstable();
            modified_logs = indices.into_iter().map(|i| modified_logs[i].clone()).collect();
            action_details.push(json!({
                "action": "reduce_count",
                "package": package,
                "original_count": original_count,
                "new_count": config.keep_count,
            }));
        }

        filtered_logs.extend(modified_logs);
    }

    if let Some(params_obj) = envelope::content_mut(&mut modified).get_mut("params").and_then(|p| p.as_object_mut()) {
        params_obj.insert("logs".to_string(), json!(filtered_logs));
    }
    modified["_rule_info"] = json!({
        "method": envelope::method(request_envelope),
        "status": "Enabled",
        "action": "randomize_app_duration",
        "config": config_raw,
        "action_details": action_details,
    });

    modified
}
