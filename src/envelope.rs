//! Parsing and re-serializing the JSON-RPC envelope carried by the proxied
//! body. Two wire shapes are accepted: the newer `{"!version": .., "content":
//! {"method": .., "params": ..}}` wrapper, and the legacy flat
//! `{"method": .., "params": ..}` shape. Both are normalized through the same
//! accessors so the rest of the pipeline never has to branch on which one it
//! is holding; whichever shape came in is the shape that goes back out.

use serde_json::Value;

use crate::cryptor::Cryptor;

const EMAIL_FIELDS: &[&str] = &["email", "userEmail", "user_email", "username", "userId", "user_id", "user"];

/// Parses the raw request body into an envelope, or `None` if the body is
/// empty or not JSON — both cases mean "pass the request through untouched".
pub fn parse(body: &str) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}

/// Returns the sub-object carrying `method`/`params`, regardless of which
/// wire shape the envelope uses: the wrapped `{"content": {...}}` form, or
/// the legacy flat form where those fields sit at the top level.
pub(crate) fn content(envelope: &Value) -> &Value {
    if envelope.get("content").is_some() {
        &envelope["content"]
    } else {
        envelope
    }
}

pub(crate) fn content_mut(envelope: &mut Value) -> &mut Value {
    if envelope.get("content").is_some() {
        envelope.get_mut("content").unwrap()
    } else {
        envelope
    }
}

pub fn method(envelope: &Value) -> String {
    content(envelope)
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string()
}

/// Overwrites `params` in place, in whichever nesting this envelope uses,
/// leaving every framing field (`method`, `id`, `jsonrpc`, `!version`, ...)
/// untouched. Used by the `modify` action, which substitutes the request
/// payload but not the envelope carrying it.
pub fn set_params(envelope: &mut Value, params: Value) {
    content_mut(envelope)["params"] = params;
}

/// Decrypts `params` in place when it is still a ciphertext string. On
/// failure, replaces it with `{"error": "Failed to decrypt params"}` and lets
/// the pipeline continue rather than aborting the request.
pub fn decrypt_params(envelope: &mut Value, cryptor: &Cryptor) {
    let slot = content_mut(envelope);
    let Some(Value::String(ciphertext)) = slot.get("params").cloned() else {
        return;
    };
    match cryptor.decrypt(&ciphertext) {
        Ok(plaintext) => {
            let parsed: Value = serde_json::from_str(&plaintext)
                .unwrap_or_else(|_| Value::String(plaintext));
            slot["params"] = parsed;
        }
        Err(_) => {
            slot["params"] = serde_json::json!({ "error": "Failed to decrypt params" });
        }
    }
}

/// Scans `params` for a caller identity, checking object fields directly or,
/// when `params` arrived as a JSON-encoded string, parsing it first.
pub fn extract_email(envelope: &Value) -> Option<String> {
    let params = content(envelope).get("params")?;
    match params {
        Value::Object(map) => scan_email_fields(map),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s).ok()?;
            scan_email_fields(parsed.as_object()?)
        }
        _ => None,
    }
}

fn scan_email_fields(map: &serde_json::Map<String, Value>) -> Option<String> {
    for field in EMAIL_FIELDS {
        if let Some(Value::String(v)) = map.get(*field) {
            if !v.is_empty() {
                return Some(v.clone());
            }
        }
    }
    None
}

/// Re-encrypts `params` into the envelope's wire shape and serializes the
/// whole envelope as the body to send upstream. Any `_rule_info` trace
/// attached for audit logging is stripped first — it never leaves the proxy.
pub fn encrypt_for_wire(envelope: &Value, cryptor: &Cryptor) -> Result<String, crate::cryptor::CryptoError> {
    let mut outgoing = envelope.clone();
    if let Value::Object(map) = &mut outgoing {
        map.remove("_rule_info");
    }
    let slot = content_mut(&mut outgoing);
    if let Some(params) = slot.get("params").cloned() {
        if !matches!(params, Value::Null) {
            let params_str = serde_json::to_string(&params).unwrap_or_default();
            let encrypted = cryptor.encrypt(&params_str)?;
            slot["params"] = Value::String(encrypted);
        }
    }
    Ok(serde_json::to_string(&outgoing).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cryptor() -> Cryptor {
        Cryptor::new(*b"0123456789abcdef", *b"fedcba9876543210")
    }

    #[test]
    fn reads_legacy_flat_shape() {
        let envelope: Value = serde_json::json!({"method": "ping", "params": {}});
        assert_eq!(method(&envelope), "ping");
    }

    #[test]
    fn reads_wrapped_shape() {
        let envelope: Value =
            serde_json::json!({"!version": 1, "content": {"method": "ping", "params": {}}});
        assert_eq!(method(&envelope), "ping");
    }

    #[test]
    fn email_found_in_string_params() {
        let c = cryptor();
        let inner = serde_json::json!({"email": "a@b.com"}).to_string();
        let mut envelope = serde_json::json!({"method": "x", "params": c.encrypt(&inner).unwrap()});
        decrypt_params(&mut envelope, &c);
        assert_eq!(extract_email(&envelope).as_deref(), Some("a@b.com"));
    }

    #[test]
    fn decrypt_failure_is_non_fatal() {
        let c = cryptor();
        let mut envelope = serde_json::json!({"method": "x", "params": "not-valid-ciphertext"});
        decrypt_params(&mut envelope, &c);
        assert_eq!(envelope["params"]["error"], "Failed to decrypt params");
    }

    #[test]
    fn wrapped_shape_round_trips_through_encrypt() {
        let c = cryptor();
        let envelope = serde_json::json!({
            "!version": 1,
            "content": {"method": "ping", "params": {"a": 1}}
        });
        let wire = encrypt_for_wire(&envelope, &c).unwrap();
        let reparsed: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(reparsed["content"]["method"], "ping");
        assert!(reparsed["content"]["params"].is_string());
    }
}
