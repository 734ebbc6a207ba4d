//! Client error types.

use std::time::Duration;

use gapline_storage::StorageError;
use gapline_types::{Counter, PeerId, StreamId, UpdateKind};
use thiserror::Error;

/// Error type handlers return; `anyhow::Error` and any `std` error convert
/// into it with `?`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by an outbound call.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Congestion signal: the server asks to wait before calling again.
    #[error("flood wait for {0:?}")]
    FloodWait(Duration),

    /// Error reported by the server.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The connection failed underneath the call.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a response of the wrong shape.
    #[error("unexpected response to {request}: got {response}")]
    UnexpectedResponse {
        request: &'static str,
        response: &'static str,
    },

    /// The call was abandoned because the client is shutting down.
    #[error("call cancelled")]
    Cancelled,
}

impl RpcError {
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Returns the wait duration if this is a congestion signal.
    pub fn flood_wait(&self) -> Option<Duration> {
        match self {
            Self::FloodWait(wait) => Some(*wait),
            _ => None,
        }
    }

    /// Returns true if the session is not (or no longer) authorized.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Rpc { code: 401, .. })
    }

    /// Returns true if the server error message equals `message`.
    pub fn is_message(&self, message: &str) -> bool {
        matches!(self, Self::Rpc { message: m, .. } if m == message)
    }
}

/// Errors from peer resolution.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The id has never been seen with entity data, so it cannot be resolved.
    #[error("peer {0} is unknown")]
    Unknown(PeerId),

    #[error("username @{0} not found")]
    UsernameNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Errors from the interactive authentication flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The phone number has no account and the authenticator declined to
    /// create one.
    #[error("sign up required")]
    SignUpRequired,

    /// The session is not authorized and no authenticator was supplied.
    #[error("not authorized and no authenticator configured")]
    NoAuthenticator,

    /// The authenticator could not produce an answer (closed terminal, ...).
    #[error("authenticator input failed: {0}")]
    Input(String),
}

/// Errors that end a client run.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Durable state could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An outbound call failed (including a failed recovery fetch).
    #[error("rpc error: {0}")]
    Rpc(RpcError),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A registered update handler failed.
    #[error("handler for {kind} failed: {source}")]
    Handler {
        kind: UpdateKind,
        #[source]
        source: BoxError,
    },

    /// Recovery rounds stopped making progress while updates were still
    /// waiting behind a hole.
    #[error("gap on {stream} {counter} unresolved: local {local}, next buffered {next}")]
    GapUnresolved {
        stream: StreamId,
        counter: Counter,
        local: i64,
        next: i64,
    },

    /// The application's main task failed.
    #[error("application error: {0}")]
    Application(#[source] BoxError),

    /// A task of the run panicked.
    #[error("task {0} panicked")]
    TaskPanicked(String),

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Cancelled => Self::Cancelled,
            other => Self::Rpc(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(RpcError::rpc(401, "AUTH_KEY_UNREGISTERED"), true ; "unregistered key")]
    #[test_case(RpcError::rpc(401, "SESSION_REVOKED"), true ; "revoked session")]
    #[test_case(RpcError::rpc(400, "PHONE_CODE_INVALID"), false ; "bad request")]
    #[test_case(RpcError::FloodWait(Duration::from_secs(3)), false ; "flood wait")]
    #[test_case(RpcError::Transport("reset".into()), false ; "transport")]
    fn unauthorized_detection(err: RpcError, expected: bool) {
        assert_eq!(err.is_unauthorized(), expected);
    }

    #[test]
    fn flood_wait_duration() {
        let err = RpcError::FloodWait(Duration::from_secs(2));
        assert_eq!(err.flood_wait(), Some(Duration::from_secs(2)));
        assert_eq!(RpcError::rpc(420, "FLOOD").flood_wait(), None);
    }

    #[test]
    fn cancelled_call_cancels_the_run() {
        assert!(ClientError::from(RpcError::Cancelled).is_cancelled());
        assert!(matches!(
            ClientError::from(RpcError::rpc(500, "INTERNAL")),
            ClientError::Rpc(_)
        ));
    }

    #[test]
    fn anyhow_errors_box_into_handler_errors() {
        fn handler() -> Result<(), BoxError> {
            let queued: anyhow::Result<()> = Err(anyhow::anyhow!("queue full"));
            queued?;
            Ok(())
        }
        assert_eq!(handler().unwrap_err().to_string(), "queue full");
    }
}
