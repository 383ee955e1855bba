//! JSON-RPC 2.0 request/response value model.
//!
//! The `id` type covers the full JSON-RPC variant space (`integer |
//! string | null | absent`), and a response is exactly one of
//! `result`/`error` by construction — there are two constructors, never a
//! bare struct literal with both fields set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DaemonError;

/// Request/response correlation id. `Absent` means a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Integer(i64),
    String(String),
    Null,
}

/// Parameter shape: `params` may be omitted, positional, or named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    ByPosition(Vec<Value>),
    ByName(serde_json::Map<String, Value>),
    None,
}

impl Default for Params {
    fn default() -> Self {
        Params::None
    }
}

/// A parsed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default, skip_serializing_if = "is_none_params")]
    pub params: Params,
    /// `None` means "absent" (notification).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
}

fn is_none_params(p: &Params) -> bool {
    matches!(p, Params::None)
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Parses the canonical JSON-RPC 2.0 envelope from a raw value.
    /// Rejects missing `jsonrpc: "2.0"` or missing `method` with
    /// `InvalidRequest`.
    pub fn from_canonical(raw: &Value) -> Result<Request, DaemonError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| DaemonError::InvalidRequest("request must be a JSON object".into()))?;

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some("2.0") => {}
            _ => {
                return Err(DaemonError::InvalidRequest(
                    "missing or invalid \"jsonrpc\": \"2.0\"".into(),
                ))
            }
        }

        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::InvalidRequest("missing \"method\"".into()))?
            .to_string();

        let params = match obj.get("params") {
            None | Some(Value::Null) => Params::None,
            Some(Value::Array(items)) => Params::ByPosition(items.clone()),
            Some(Value::Object(map)) => Params::ByName(map.clone()),
            Some(_) => {
                return Err(DaemonError::InvalidRequest(
                    "\"params\" must be an array, object, or absent".into(),
                ))
            }
        };

        let id = match obj.get("id") {
            None => None,
            Some(Value::Null) => Some(Id::Null),
            Some(Value::Number(n)) if n.is_i64() => Some(Id::Integer(n.as_i64().unwrap())),
            Some(Value::String(s)) => Some(Id::String(s.clone())),
            Some(_) => {
                return Err(DaemonError::InvalidRequest(
                    "\"id\" must be an integer, string, or null".into(),
                ))
            }
        };

        Ok(Request { method, params, id })
    }
}

/// Error payload embedded in a failed [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&DaemonError> for RpcError {
    fn from(e: &DaemonError) -> Self {
        let data = match e {
            DaemonError::EngineFailure { kind, .. } => {
                Some(serde_json::json!({ "kind": kind }))
            }
            other => Some(serde_json::json!({ "kind": other.kind_tag() })),
        };
        RpcError {
            code: e.rpc_code(),
            message: e.to_string(),
            data,
        }
    }
}

/// A JSON-RPC response: exactly one of `result` or `error`, enforced by
/// construction via the two constructors below (never by hand-building
/// the struct with both fields set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Id,
}

impl Response {
    pub fn success(id: Id, result: Value) -> Self {
        Response {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Id, error: &DaemonError) -> Self {
        Response {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError::from(error)),
            id,
        }
    }

    /// For unparseable requests the id is `null`.
    pub fn unparseable(error: &DaemonError) -> Self {
        Response {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError::from(error)),
            id: Id::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_canonical_request_with_named_params() {
        let raw = json!({
            "jsonrpc": "2.0",
            "method": "goxel.add_voxel",
            "params": {"x": 1, "y": 2, "z": 3},
            "id": 42
        });
        let req = Request::from_canonical(&raw).unwrap();
        assert_eq!(req.method, "goxel.add_voxel");
        assert_eq!(req.id, Some(Id::Integer(42)));
        assert!(matches!(req.params, Params::ByName(_)));
    }

    #[test]
    fn notification_has_no_id() {
        let raw = json!({"jsonrpc": "2.0", "method": "ping"});
        let req = Request::from_canonical(&raw).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn rejects_missing_jsonrpc_version() {
        let raw = json!({"method": "ping", "id": 1});
        let err = Request::from_canonical(&raw).unwrap_err();
        assert!(matches!(err, DaemonError::InvalidRequest(_)));
    }

    #[test]
    fn rejects_missing_method() {
        let raw = json!({"jsonrpc": "2.0", "id": 1});
        let err = Request::from_canonical(&raw).unwrap_err();
        assert!(matches!(err, DaemonError::InvalidRequest(_)));
    }

    #[test]
    fn response_serialization_omits_absent_fields() {
        let resp = Response::success(Id::Integer(1), json!("pong"));
        let s = serde_json::to_string(&resp).unwrap();
        assert!(!s.contains("error"));
        let parsed: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed["result"], "pong");
    }

    #[test]
    fn error_response_round_trip_preserves_id() {
        let err = DaemonError::MethodNotFound("foo".into());
        let resp = Response::failure(Id::String("abc".into()), &err);
        assert_eq!(resp.id, Id::String("abc".into()));
        assert_eq!(resp.error.as_ref().unwrap().code, -32601);
        assert!(resp.result.is_none());
    }

    // Round-trip property: parsing always recovers the method and id.
    proptest::proptest! {
        #[test]
        fn round_trip_canonical_request(method in "[a-z]{1,8}\\.[a-z]{1,8}", id in 0i64..1_000_000) {
            let raw = json!({"jsonrpc": "2.0", "method": method, "id": id});
            let req = Request::from_canonical(&raw).unwrap();
            prop_assert_eq!(&req.method, &method);
            prop_assert_eq!(req.id, Some(Id::Integer(id)));
        }
    }
}
