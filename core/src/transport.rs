//! The seam between the client façades and the remote platform.
//!
//! Everything above this module speaks in terms of `(method, path, body)`
//! and JSON values; the reqwest implementations live in `http_client` and
//! tests substitute an in-memory engine.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::InfshErr;
use crate::error::Result;

/// Blocking transport: every call occupies the calling thread until the
/// response has been decoded.
pub trait Transport: Send + Sync {
    fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value>;
}

/// Suspending transport with the same contract as [`Transport`].
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value>;
}

/// Turns a raw API response into the JSON payload callers care about.
///
/// - empty bodies decode to `null`,
/// - `{"success": .., "data": ..}` envelopes are unwrapped to `data`,
/// - non-success statuses become [`InfshErr::Api`], using the `error` field
///   (a string, or an object with `code`/`message`) when the body has one.
pub(crate) fn decode_response(status: StatusCode, body: &[u8]) -> Result<Value> {
    let parsed = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => Value::String(String::from_utf8_lossy(body).into_owned()),
        }
    };

    if !status.is_success() {
        let (code, message) = error_details(&parsed);
        let message = message.unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });
        return Err(InfshErr::api(status, code, message));
    }

    if let Value::Object(mut map) = parsed {
        if map.get("success").is_some_and(Value::is_boolean) && map.contains_key("data") {
            if map.get("success") == Some(&Value::Bool(false)) {
                let (code, message) = error_details(&Value::Object(map));
                return Err(InfshErr::api(
                    status,
                    code,
                    message.unwrap_or_else(|| "request was not successful".to_string()),
                ));
            }
            return Ok(map.remove("data").unwrap_or(Value::Null));
        }
        return Ok(Value::Object(map));
    }
    Ok(parsed)
}

fn error_details(body: &Value) -> (Option<String>, Option<String>) {
    let as_string = |v: &Value| v.as_str().map(str::to_string);
    match body.get("error") {
        Some(Value::String(message)) => (None, Some(message.clone())),
        Some(error @ Value::Object(_)) => (
            error.get("code").and_then(as_string),
            error.get("message").and_then(as_string),
        ),
        _ => match body {
            Value::String(text) if !text.trim().is_empty() => (None, Some(text.trim().to_string())),
            _ => (
                body.get("code").and_then(as_string),
                body.get("message").and_then(as_string),
            ),
        },
    }
}
