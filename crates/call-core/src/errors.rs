//! Error handling for the call engine.

use thiserror::Error;

use crate::types::CallEndReason;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by engine operations.
///
/// Every variant here is recoverable at the call/connection boundary:
/// nothing in this crate aborts the process. Resolution failures carry the
/// call-end-reason they translate to.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No endpoint is registered for the requested protocol prefix.
    #[error("no endpoint registered for protocol \"{prefix}\"")]
    NoEndpoint { prefix: String },

    /// The remote party string was empty.
    #[error("remote party is empty")]
    EmptyRemoteParty,

    /// The token does not name a live call.
    #[error("call \"{token}\" not found")]
    CallNotFound { token: String },

    /// An endpoint accepted the connection request but setup failed.
    #[error("connection setup failed: {reason}")]
    ConnectionFailed { reason: CallEndReason },

    /// The application handler vetoed the incoming connection.
    #[error("incoming connection refused by handler")]
    ConnectionRefused,

    /// The route table had rules but none matched the search key.
    #[error("no route matched \"{search}\"")]
    NoRoute { search: String },

    /// A route rule failed to parse or its pattern failed to compile.
    #[error("invalid route entry \"{spec}\": {reason}")]
    InvalidRoute { spec: String, reason: String },

    /// A `@file` route include could not be read.
    #[error("failed to read route file \"{path}\"")]
    RouteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,
}
