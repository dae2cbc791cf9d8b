//! Request validation.
//!
//! Turns a raw request body into a [`SigningRequest`] or rejects it. This
//! stage is pure: the current time is passed in, nothing is logged or stored.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{BridgeError, Result};
use crate::request::{Action, SigningRequest};

/// Default freshness window (±5 minutes)
pub const DEFAULT_FRESHNESS_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Default request body ceiling (64 KiB)
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Validates raw requests against size, shape, action and freshness rules.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    freshness_window_ms: i64,
    max_request_bytes: usize,
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW_MS, DEFAULT_MAX_REQUEST_BYTES)
    }
}

impl RequestValidator {
    pub fn new(freshness_window_ms: i64, max_request_bytes: usize) -> Self {
        Self {
            freshness_window_ms,
            max_request_bytes,
        }
    }

    pub fn freshness_window_ms(&self) -> i64 {
        self.freshness_window_ms
    }

    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// Validate a raw request body received at `now_ms`.
    pub fn validate(&self, raw: &[u8], now_ms: i64) -> Result<SigningRequest> {
        if raw.len() > self.max_request_bytes {
            return Err(BridgeError::RequestTooLarge {
                size: raw.len(),
                limit: self.max_request_bytes,
            });
        }
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(BridgeError::MalformedRequest("empty request body".into()));
        }

        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| BridgeError::MalformedRequest(format!("invalid JSON: {e}")))?;
        let Value::Object(object) = value else {
            return Err(BridgeError::MalformedRequest(
                "request must be a JSON object".into(),
            ));
        };

        let action_name = required_string(&object, "type")?;
        let id = required_string(&object, "id")?;
        let calling_app = required_string(&object, "callingApp")?;

        let action = Action::parse(action_name)
            .ok_or_else(|| BridgeError::UnsupportedAction(action_name.to_string()))?;
        let params = parse_params(object.get("params"))?;
        let timestamp = parse_timestamp(object.get("timestamp"))?;

        self.check_freshness(timestamp, now_ms)?;

        Ok(SigningRequest {
            id: id.to_string(),
            action,
            params,
            calling_app: calling_app.to_string(),
            timestamp,
        })
    }

    /// Reject zero, stale and future-dated timestamps.
    pub fn check_freshness(&self, timestamp: i64, now_ms: i64) -> Result<()> {
        let skew = now_ms.saturating_sub(timestamp).saturating_abs();
        if timestamp <= 0 || skew > self.freshness_window_ms {
            return Err(BridgeError::StaleOrFutureTimestamp {
                timestamp,
                now: now_ms,
            });
        }
        Ok(())
    }
}

fn required_string<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) => Err(BridgeError::MalformedRequest(format!(
            "field `{field}` must not be empty"
        ))),
        Some(Value::Null) | None => Err(BridgeError::MalformedRequest(format!(
            "missing field `{field}`"
        ))),
        Some(_) => Err(BridgeError::MalformedRequest(format!(
            "field `{field}` must be a string"
        ))),
    }
}

fn parse_params(value: Option<&Value>) -> Result<BTreeMap<String, String>> {
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()),
        Some(_) => Err(BridgeError::MalformedRequest(
            "field `params` must be an object".into(),
        )),
    }
}

/// A missing timestamp is treated as `0`, which the freshness check rejects.
fn parse_timestamp(value: Option<&Value>) -> Result<i64> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| BridgeError::MalformedRequest("timestamp out of range".into())),
        Some(_) => Err(BridgeError::MalformedRequest(
            "field `timestamp` must be an integer".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_760_000_000_000;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn request(timestamp: i64) -> Vec<u8> {
        body(json!({
            "type": "get_public_key",
            "id": "t1",
            "params": {},
            "callingApp": "app1",
            "timestamp": timestamp,
        }))
    }

    #[test]
    fn test_valid_request() {
        let validator = RequestValidator::default();
        let request = validator.validate(&request(NOW), NOW).unwrap();
        assert_eq!(request.action, Action::GetPublicKey);
        assert_eq!(request.id, "t1");
        assert_eq!(request.calling_app, "app1");
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_malformed_bodies() {
        let validator = RequestValidator::default();
        for raw in [
            &b"{\"invalid\": json}"[..],
            b"",
            b"   ",
            b"not json at all",
            b"[1,2,3]",
            b"{\"type\": \"get_public_key\"}",
        ] {
            let err = validator.validate(raw, NOW).unwrap_err();
            assert!(
                matches!(err, BridgeError::MalformedRequest(_)),
                "{:?} -> {err:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_missing_or_empty_identity_fields() {
        let validator = RequestValidator::default();
        let missing_app = body(json!({"type": "get_public_key", "id": "x", "timestamp": NOW}));
        let empty_id = body(json!({
            "type": "get_public_key", "id": "", "callingApp": "a", "timestamp": NOW
        }));
        let numeric_id = body(json!({
            "type": "get_public_key", "id": 7, "callingApp": "a", "timestamp": NOW
        }));
        for raw in [missing_app, empty_id, numeric_id] {
            assert!(matches!(
                validator.validate(&raw, NOW),
                Err(BridgeError::MalformedRequest(_))
            ));
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        let validator = RequestValidator::default();
        let raw = body(json!({
            "type": "nonexistent_action",
            "id": "test1",
            "params": {},
            "callingApp": "test",
            "timestamp": NOW,
        }));
        assert_eq!(
            validator.validate(&raw, NOW).unwrap_err(),
            BridgeError::UnsupportedAction("nonexistent_action".into())
        );
    }

    #[test]
    fn test_timestamp_window() {
        let validator = RequestValidator::default();
        let day = 24 * 60 * 60 * 1000;

        for ts in [0, -5, NOW - day, NOW + day, NOW - DEFAULT_FRESHNESS_WINDOW_MS - 1] {
            assert!(
                matches!(
                    validator.validate(&request(ts), NOW),
                    Err(BridgeError::StaleOrFutureTimestamp { .. })
                ),
                "timestamp {ts} should be rejected"
            );
        }

        for ts in [NOW - DEFAULT_FRESHNESS_WINDOW_MS, NOW + DEFAULT_FRESHNESS_WINDOW_MS, NOW - 1] {
            assert!(validator.validate(&request(ts), NOW).is_ok(), "timestamp {ts}");
        }
    }

    #[test]
    fn test_zero_timestamp_rejected_even_with_huge_window() {
        let validator = RequestValidator::new(i64::MAX, DEFAULT_MAX_REQUEST_BYTES);
        assert!(matches!(
            validator.validate(&request(0), NOW),
            Err(BridgeError::StaleOrFutureTimestamp { timestamp: 0, .. })
        ));
    }

    #[test]
    fn test_missing_timestamp_is_stale() {
        let validator = RequestValidator::default();
        let raw = body(json!({"type": "get_public_key", "id": "x", "callingApp": "a"}));
        assert!(matches!(
            validator.validate(&raw, NOW),
            Err(BridgeError::StaleOrFutureTimestamp { timestamp: 0, .. })
        ));
    }

    #[test]
    fn test_body_size_ceiling() {
        let validator = RequestValidator::new(DEFAULT_FRESHNESS_WINDOW_MS, 1024);
        let raw = format!(
            "{{\"type\": \"get_public_key\", \"data\": \"{}\"}}",
            "x".repeat(10_000)
        );
        assert_eq!(
            validator.validate(raw.as_bytes(), NOW).unwrap_err(),
            BridgeError::RequestTooLarge {
                size: raw.len(),
                limit: 1024
            }
        );
    }

    #[test]
    fn test_non_string_params_kept_as_json_text() {
        let validator = RequestValidator::default();
        let raw = body(json!({
            "type": "sign_event",
            "id": "s1",
            "params": {"event": {"kind": 1, "content": "hi"}},
            "callingApp": "app",
            "timestamp": NOW,
        }));
        let request = validator.validate(&raw, NOW).unwrap();
        let event: Value = serde_json::from_str(request.param("event").unwrap()).unwrap();
        assert_eq!(event["kind"], 1);
    }

    #[test]
    fn test_params_must_be_object() {
        let validator = RequestValidator::default();
        let raw = body(json!({
            "type": "get_public_key", "id": "x", "callingApp": "a",
            "params": ["nope"], "timestamp": NOW
        }));
        assert!(matches!(
            validator.validate(&raw, NOW),
            Err(BridgeError::MalformedRequest(_))
        ));
    }
}
