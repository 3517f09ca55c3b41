//! Error taxonomy for the safety kernel
//!
//! `BadInput` propagates to the caller with no side effect; everything else
//! is contained at the subsystem boundary and surfaces through statistics.

use thiserror::Error;

/// Failure kinds shared across the kernel
#[derive(Debug, Error)]
pub enum KernelError {
    /// Caller passed a domain-violating value; no side effect occurred
    #[error("bad input: {0}")]
    BadInput(String),

    /// KV store operation failed (transient or connectivity)
    #[error("kv store error: {0}")]
    Kv(String),

    /// A probe against an external collaborator failed
    #[error("probe failed: {0}")]
    Probe(String),

    /// Subsystem constructed without a required collaborator or setting
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Doomsday reset attempted with a wrong or empty password
    #[error("authentication failed")]
    Authentication,

    /// A subscribed handler raised; contained and counted by the bus
    #[error("handler error: {0}")]
    Handler(String),

    /// Start requested while the component is already running
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
}

impl From<redis::RedisError> for KernelError {
    fn from(err: redis::RedisError) -> Self {
        Self::Kv(err.to_string())
    }
}

/// Result alias used throughout the kernel crates
pub type KernelResult<T> = Result<T, KernelError>;
