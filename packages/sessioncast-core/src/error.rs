use thiserror::Error;

/// Every error kind the core runtime can produce.
///
/// Adapter failures (`SubprocessTimeout`, `SubprocessFailure`) are absorbed at
/// the call site per the propagation policy and never reach a capture tick's
/// caller as an `Err` — they are logged and the tick simply reschedules.
#[derive(Debug, Error)]
pub enum AgentError {
    /// `token` or `machine_id` missing/empty at construction. Fatal.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Socket failure surfaced as an `Event::Error`; not fatal.
    #[error("transport error: {0}")]
    Transport(String),

    /// `connect()` attempted while `circuit_open_until > now`.
    #[error("circuit breaker open, retry after the cooldown window")]
    CircuitBreaker,

    /// Bad inbound frame; logged and dropped, never propagated to the socket.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// Outbound encode failure; logged and dropped.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// Multiplexer subprocess exceeded its wall-clock budget.
    #[error("subprocess timed out")]
    SubprocessTimeout,

    /// Multiplexer subprocess exited non-zero or could not be spawned.
    #[error("subprocess failed: {0}")]
    SubprocessFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
