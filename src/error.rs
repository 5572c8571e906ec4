//! Crate-wide error taxonomy.
//!
//! Mirrors the kinds described in the control loop design: transient errors
//! are retried by the reconciler, policy-refused and authorization errors are
//! surfaced verbatim to RPC callers, and fatal errors abort the process.

use thiserror::Error;

/// Errors produced by farmerbot's core components.
#[derive(Debug, Error)]
pub enum FarmerbotError {
    /// Node RPC timeout or unreachable transport. Retried next cycle.
    #[error("node {0} is unreachable: {1}")]
    Unreachable(u32, String),

    /// Chain call failed. Retried next cycle.
    #[error("chain error: {0}")]
    ChainError(String),

    /// A guarded operation (power_off, includenode, ...) refused due to a
    /// policy violation. Surfaced to the caller, never logged as an error.
    #[error("{0}")]
    PolicyRefused(String),

    /// RPC caller's twin id did not match the farmer's twin id.
    #[error("you are not authorized for this action: caller twin id {caller} does not match farm owner twin id {expected}")]
    Unauthorized { caller: u32, expected: u32 },

    /// No such node in the managed set.
    #[error("node {0} is not found")]
    NodeNotFound(u32),

    /// `findnode` could not satisfy the filter.
    #[error("no suitable node found")]
    NoSuitableNode,

    /// Startup validation, insufficient balance, or handshake failure.
    /// The process aborts after reporting this.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl FarmerbotError {
    /// True for errors that the background reconciler absorbs (logs and
    /// retries) rather than propagating to a caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(..) | Self::ChainError(_))
    }
}

impl From<serde_json::Error> for FarmerbotError {
    fn from(e: serde_json::Error) -> Self {
        FarmerbotError::PolicyRefused(format!("failed to load request payload: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, FarmerbotError>;
