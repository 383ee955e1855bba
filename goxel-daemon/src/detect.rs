//! Protocol dialect detector.
//!
//! Classifies an incoming JSON object's dialect by its top-level keys,
//! first match wins, without allocating beyond examining those keys.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    CanonicalJsonRpc,
    ToolCall,
    LegacyFlat,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub dialect: Dialect,
    pub confidence: f32,
}

/// Classifies a raw JSON value into one of the four dialects.
///
/// Rule order is load-bearing: callers depend on the rank, not the
/// numeric confidence value. Canonical JSON-RPC wins over tool-call,
/// which wins over legacy flat.
pub fn detect(raw: &Value) -> Detection {
    let Some(obj) = raw.as_object() else {
        return Detection {
            dialect: Dialect::Unknown,
            confidence: 0.0,
        };
    };

    let has_jsonrpc_2 = matches!(obj.get("jsonrpc"), Some(Value::String(s)) if s == "2.0");
    let has_method = matches!(obj.get("method"), Some(Value::String(_)));
    let has_tool = matches!(obj.get("tool"), Some(Value::String(_)));

    if has_jsonrpc_2 && has_method {
        return Detection {
            dialect: Dialect::CanonicalJsonRpc,
            confidence: 0.95,
        };
    }
    if has_tool {
        return Detection {
            dialect: Dialect::ToolCall,
            confidence: 0.9,
        };
    }
    if has_method {
        return Detection {
            dialect: Dialect::LegacyFlat,
            confidence: 0.75,
        };
    }
    Detection {
        dialect: Dialect::Unknown,
        confidence: 0.0,
    }
}
