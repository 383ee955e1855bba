//! Typed error taxonomy with the JSON-RPC code mapping baked in.
//!
//! Handlers and internal components return [`DaemonError`]; the dispatcher
//! (and the tool-call translator's reverse path) are the only places that
//! know about JSON-RPC error codes, via [`DaemonError::rpc_code`].

use thiserror::Error;

/// One variant per reserved error kind a handler or internal component
/// can fail with.
#[derive(Debug, Clone, Error)]
pub enum DaemonError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("engine failure ({kind}): {message}")]
    EngineFailure { kind: String, message: String },

    #[error("server busy")]
    ServerBusy,

    #[error("request timed out")]
    Timeout,

    /// Connection gone or shutdown drain abandoned the entry. Never
    /// serialized: a cancelled request produces no response.
    #[error("cancelled")]
    Cancelled,

    #[error("unknown tool: {0}")]
    TranslationInvalidTool(String),

    #[error("bad tool arguments: {0}")]
    TranslationParams(String),
}

impl DaemonError {
    /// Maps an error kind to its reserved JSON-RPC code.
    pub fn rpc_code(&self) -> i32 {
        match self {
            DaemonError::Parse(_) => -32700,
            DaemonError::InvalidRequest(_) => -32600,
            DaemonError::MethodNotFound(_) => -32601,
            DaemonError::InvalidParams(_) => -32602,
            DaemonError::EngineFailure { .. } => -32603,
            DaemonError::ServerBusy => -32000,
            DaemonError::Timeout => -32001,
            DaemonError::Cancelled => 0, // never surfaced
            DaemonError::TranslationInvalidTool(_) => -32601,
            DaemonError::TranslationParams(_) => -32602,
        }
    }

    /// Short machine-readable kind tag, carried as `error.data.kind` for
    /// engine failures so callers can distinguish sub-kinds without
    /// parsing the message.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            DaemonError::Parse(_) => "parse",
            DaemonError::InvalidRequest(_) => "invalid_request",
            DaemonError::MethodNotFound(_) => "method_not_found",
            DaemonError::InvalidParams(_) => "invalid_params",
            DaemonError::EngineFailure { .. } => "engine_failure",
            DaemonError::ServerBusy => "server_busy",
            DaemonError::Timeout => "timeout",
            DaemonError::Cancelled => "cancelled",
            DaemonError::TranslationInvalidTool(_) => "translation_invalid_tool",
            DaemonError::TranslationParams(_) => "translation_params",
        }
    }
}
