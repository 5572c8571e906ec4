//! JSON-RPC 2.0 error envelope.

use serde_json::{json, Value};

use crate::error::FarmerbotError;

/// JSON-RPC 2.0 reserved and application error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Caller twin id did not match the farmer's twin id.
    Unauthorized,
    /// A guarded power operation or node-list update refused.
    PolicyRefused,
    NodeNotFound,
    NoSuitableNode,
}

impl RpcErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            RpcErrorCode::ParseError => -32700,
            RpcErrorCode::InvalidRequest => -32600,
            RpcErrorCode::MethodNotFound => -32601,
            RpcErrorCode::InvalidParams => -32602,
            RpcErrorCode::InternalError => -32603,
            RpcErrorCode::Unauthorized => -32000,
            RpcErrorCode::PolicyRefused => -32001,
            RpcErrorCode::NodeNotFound => -32002,
            RpcErrorCode::NoSuitableNode => -32003,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: RpcErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ParseError, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(RpcErrorCode::MethodNotFound, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InvalidParams, message)
    }

    pub fn to_json(&self, id: Option<Value>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": {
                "code": self.code.code(),
                "message": self.message,
            },
            "id": id,
        })
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<FarmerbotError> for RpcError {
    fn from(e: FarmerbotError) -> Self {
        let code = match &e {
            FarmerbotError::Unauthorized { .. } => RpcErrorCode::Unauthorized,
            FarmerbotError::PolicyRefused(_) => RpcErrorCode::PolicyRefused,
            FarmerbotError::NodeNotFound(_) => RpcErrorCode::NodeNotFound,
            FarmerbotError::NoSuitableNode => RpcErrorCode::NoSuitableNode,
            FarmerbotError::Unreachable(..) | FarmerbotError::ChainError(_) | FarmerbotError::Fatal(_) => {
                RpcErrorCode::InternalError
            }
        };
        RpcError::new(code, e.to_string())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;
