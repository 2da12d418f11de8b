//! Request and response envelope definitions.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ProtoError, ProtoResult};

/// Command answered directly by the session as a liveness probe.
pub const PING_COMMAND: &str = "ping";

/// Result payload sent back for a `ping` command.
pub const PONG_PAYLOAD: &str = "pong";

/// Result payload carried by server-initiated heartbeat frames.
pub const HEARTBEAT_PAYLOAD: &str = "ping";

/// Normalized pattern identifying the handler a request is routed to.
///
/// Clients send the pattern either as an object (`{"cmd": "sum"}`) or, when
/// they JSON-encode it twice, as a string holding that object
/// (`"{\"cmd\":\"sum\"}"`). Both forms resolve to the same `Pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Pattern {
    cmd: String,
}

#[derive(Deserialize)]
struct StructuredPattern {
    cmd: String,
}

impl Pattern {
    /// Create a pattern for the given command.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    /// Resolve a raw `pattern` field.
    ///
    /// Tries the structured form first, then unwraps at most one level of
    /// string encoding.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::InvalidPattern` if neither form exposes `cmd`.
    pub fn from_value(value: &Value) -> ProtoResult<Self> {
        if let Ok(structured) = StructuredPattern::deserialize(value) {
            return Ok(Self::new(structured.cmd));
        }

        if let Value::String(encoded) = value {
            if let Ok(structured) = serde_json::from_str::<StructuredPattern>(encoded) {
                return Ok(Self::new(structured.cmd));
            }
        }

        Err(ProtoError::InvalidPattern)
    }

    /// The command name.
    #[must_use]
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Whether this is the built-in liveness probe.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.cmd == PING_COMMAND
    }

    /// Whether the command name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cmd.is_empty()
    }
}

/// Request envelope as it appears on the wire, before pattern normalization.
///
/// Decoding is split in two so that the request `id` is still known when the
/// pattern turns out to be unusable.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Correlation id chosen by the client.
    #[serde(default)]
    pub id: Option<String>,
    /// Raw pattern field.
    #[serde(default)]
    pub pattern: Value,
    /// Request payload, passed to the handler untouched.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Parse a frame body.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::InvalidJson` if the body is not a JSON envelope.
    pub fn from_slice(body: &[u8]) -> ProtoResult<Self> {
        serde_json::from_slice(body).map_err(|e| ProtoError::InvalidJson(e.to_string()))
    }

    /// Normalize the pattern and produce a routable request.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::InvalidPattern` if the pattern cannot be resolved.
    pub fn into_request(self) -> ProtoResult<Request> {
        let pattern = Pattern::from_value(&self.pattern)?;
        Ok(Request {
            id: self.id,
            pattern,
            data: self.data,
        })
    }
}

/// A decoded request ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Correlation id chosen by the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Normalized pattern.
    pub pattern: Pattern,
    /// Request payload.
    pub data: Value,
}

impl Request {
    /// Create a request.
    #[must_use]
    pub fn new(id: impl Into<String>, cmd: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(id.into()),
            pattern: Pattern::new(cmd),
            data,
        }
    }

    /// Decode a frame body into a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON or the pattern cannot be resolved.
    pub fn from_slice(body: &[u8]) -> ProtoResult<Self> {
        Envelope::from_slice(body)?.into_request()
    }

    /// The command name this request is routed by.
    #[must_use]
    pub fn cmd(&self) -> &str {
        self.pattern.cmd()
    }

    /// Serialize to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> ProtoResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }
}

/// Outcome marker carried by error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The request failed.
    Error,
}

/// Response envelope.
///
/// Success responses carry `response` and no error fields; error responses
/// carry `err` plus `status = "error"` and no `response`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Correlation id copied from the request, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Handler result.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub response: Option<Value>,
    /// Failure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Failure marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    /// Tells the client no further frames follow for this id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_disposed: Option<bool>,
}

// A present `"response": null` is a null result, not a missing one.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Response {
    /// Successful response carrying a handler result.
    #[must_use]
    pub fn success(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            response: Some(result),
            is_disposed: Some(true),
            ..Self::default()
        }
    }

    /// Error response carrying the failure text.
    #[must_use]
    pub fn error(id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            id,
            err: Some(message.into()),
            status: Some(ResponseStatus::Error),
            is_disposed: Some(true),
            ..Self::default()
        }
    }

    /// Reply to a `ping` command.
    #[must_use]
    pub fn pong(id: Option<String>) -> Self {
        Self::success(id, Value::String(PONG_PAYLOAD.to_string()))
    }

    /// Server-initiated liveness frame.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self {
            response: Some(Value::String(HEARTBEAT_PAYLOAD.to_string())),
            ..Self::default()
        }
    }

    /// Whether this is an error response.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.err.is_some()
    }

    /// Serialize to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> ProtoResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a response envelope.
    pub fn from_slice(body: &[u8]) -> ProtoResult<Self> {
        serde_json::from_slice(body).map_err(|e| ProtoError::InvalidJson(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    // ==================== Pattern Tests ====================

    #[test_case(json!({"cmd": "sum"}), "sum" ; "structured")]
    #[test_case(json!("{\"cmd\":\"sum\"}"), "sum" ; "double encoded")]
    #[test_case(json!({"cmd": "sum", "version": 2}), "sum" ; "extra fields ignored")]
    #[test_case(json!({"cmd": ""}), "" ; "empty command")]
    fn test_pattern_resolves(raw: Value, expected: &str) {
        let pattern = Pattern::from_value(&raw).unwrap();
        assert_eq!(pattern.cmd(), expected);
    }

    #[test_case(json!("sum") ; "bare string")]
    #[test_case(json!({"name": "sum"}) ; "missing cmd")]
    #[test_case(json!({"cmd": 7}) ; "numeric cmd")]
    #[test_case(json!(null) ; "null")]
    #[test_case(json!("\"{\\\"cmd\\\":\\\"sum\\\"}\"") ; "triple encoded")]
    fn test_pattern_rejected(raw: Value) {
        assert!(matches!(
            Pattern::from_value(&raw),
            Err(ProtoError::InvalidPattern)
        ));
    }

    #[test]
    fn test_pattern_ping_and_empty() {
        assert!(Pattern::new("ping").is_ping());
        assert!(!Pattern::new("pingx").is_ping());
        assert!(Pattern::new("").is_empty());
    }

    // ==================== Request Tests ====================

    #[test]
    fn test_request_from_slice() {
        let body = br#"{"id":"1","pattern":{"cmd":"echo"},"data":{"x":1}}"#;
        let request = Request::from_slice(body).unwrap();

        assert_eq!(request.id.as_deref(), Some("1"));
        assert_eq!(request.cmd(), "echo");
        assert_eq!(request.data, json!({"x": 1}));
    }

    #[test]
    fn test_request_double_encoded_pattern() {
        let body = br#"{"id":"7","pattern":"{\"cmd\":\"echo\"}","data":[1,2]}"#;
        let request = Request::from_slice(body).unwrap();

        assert_eq!(request.cmd(), "echo");
        assert_eq!(request.data, json!([1, 2]));
    }

    #[test]
    fn test_request_missing_data_is_null() {
        let request = Request::from_slice(br#"{"id":"1","pattern":{"cmd":"a"}}"#).unwrap();
        assert_eq!(request.data, Value::Null);
    }

    #[test]
    fn test_request_invalid_json() {
        let err = Request::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, ProtoError::InvalidJson(_)));
    }

    #[test]
    fn test_envelope_keeps_id_when_pattern_invalid() {
        let envelope = Envelope::from_slice(br#"{"id":"42","pattern":"nope","data":null}"#).unwrap();
        assert_eq!(envelope.id.as_deref(), Some("42"));
        assert!(matches!(
            envelope.into_request(),
            Err(ProtoError::InvalidPattern)
        ));
    }

    #[test]
    fn test_request_serializes_structured_pattern() {
        let request = Request::new("9", "sum", json!([1, 2]));
        let bytes = request.to_json_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["pattern"], json!({"cmd": "sum"}));
        assert_eq!(value["id"], json!("9"));
        assert_eq!(Request::from_slice(&bytes).unwrap(), request);
    }

    // ==================== Response Tests ====================

    #[test]
    fn test_success_response_shape() {
        let resp = Response::success(Some("1".into()), json!({"x": 1}));
        let value: Value = serde_json::from_slice(&resp.to_json_bytes().unwrap()).unwrap();

        assert_eq!(value, json!({"id": "1", "response": {"x": 1}, "isDisposed": true}));
        assert!(!resp.is_error());
    }

    #[test]
    fn test_error_response_shape() {
        let resp = Response::error(None, "Unknown pattern: nope");
        let value: Value = serde_json::from_slice(&resp.to_json_bytes().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"err": "Unknown pattern: nope", "status": "error", "isDisposed": true})
        );
        assert!(resp.is_error());
        assert!(resp.response.is_none());
    }

    #[test]
    fn test_pong_and_heartbeat_payloads() {
        assert_eq!(Response::pong(None).response, Some(json!("pong")));

        let heartbeat = Response::heartbeat();
        assert_eq!(heartbeat.response, Some(json!("ping")));
        assert!(heartbeat.id.is_none());
        assert!(heartbeat.is_disposed.is_none());
    }

    #[test]
    fn test_null_result_survives_decoding() {
        let resp = Response::success(Some("1".into()), Value::Null);
        let decoded = Response::from_slice(&resp.to_json_bytes().unwrap()).unwrap();

        assert_eq!(decoded.response, Some(Value::Null));
        assert_eq!(decoded, resp);
    }
}
