//! The seam between the client and the wire.
//!
//! Framing, encryption and serialization live behind [`Transport`]. The
//! client only sees typed [`Request`]s and [`Response`]s through an
//! [`Invoker`], plus a channel of [`Inbound`] events.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use gapline_types::{Difference, PeerId, PeerRecord, SequenceState, StreamId, Update};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::RpcError;

// ============================================================================
// Requests
// ============================================================================

/// Outbound calls the client makes.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Current server position of the common stream.
    GetState,

    /// Events of `stream` after `from`, in slices of at most `limit`.
    GetDifference {
        stream: StreamId,
        from: SequenceState,
        /// Newest date the caller has seen buffered, if any.
        until_date: Option<i64>,
        limit: u32,
        /// Channel access hash, required for channel streams.
        access_hash: Option<String>,
    },

    ResolveUsername {
        username: String,
    },

    /// One page of the dialog list, newest first.
    GetDialogs {
        offset: Option<DialogsOffset>,
        limit: u32,
    },

    /// The authorized user; fails with 401 before authorization.
    GetSelf,

    SendCode {
        phone: String,
    },

    SignIn {
        phone: String,
        code_hash: String,
        code: String,
    },

    CheckPassword {
        password: String,
    },

    SignUp {
        phone: String,
        code_hash: String,
        first_name: String,
        last_name: String,
    },

    AcceptTermsOfService {
        id: String,
    },

    /// Any call this crate has no typed variant for.
    Raw {
        method: String,
        params: serde_json::Value,
    },
}

impl Request {
    /// Short method name for logs and errors.
    pub fn method(&self) -> &'static str {
        match self {
            Request::GetState => "get_state",
            Request::GetDifference { .. } => "get_difference",
            Request::ResolveUsername { .. } => "resolve_username",
            Request::GetDialogs { .. } => "get_dialogs",
            Request::GetSelf => "get_self",
            Request::SendCode { .. } => "send_code",
            Request::SignIn { .. } => "sign_in",
            Request::CheckPassword { .. } => "check_password",
            Request::SignUp { .. } => "sign_up",
            Request::AcceptTermsOfService { .. } => "accept_terms_of_service",
            Request::Raw { .. } => "raw",
        }
    }
}

/// Position to continue the dialog list from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogsOffset {
    pub date: i64,
    pub peer: PeerId,
}

// ============================================================================
// Responses
// ============================================================================

/// Results of outbound calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    State(SequenceState),
    Difference(Difference),
    /// A resolved peer, as returned by username resolution.
    Peer(PeerRecord),
    Dialogs(DialogsSlice),
    User(User),
    SentCode(SentCode),
    /// Sign-in succeeded.
    Authorized(User),
    /// The phone number has no account yet.
    SignUpRequired {
        terms_of_service: Option<TermsOfService>,
    },
    /// The call succeeded without a result.
    Ok,
    Raw(serde_json::Value),
}

impl Response {
    fn variant(&self) -> &'static str {
        match self {
            Response::State(_) => "state",
            Response::Difference(_) => "difference",
            Response::Peer(_) => "peer",
            Response::Dialogs(_) => "dialogs",
            Response::User(_) => "user",
            Response::SentCode(_) => "sent_code",
            Response::Authorized(_) => "authorized",
            Response::SignUpRequired { .. } => "sign_up_required",
            Response::Ok => "ok",
            Response::Raw(_) => "raw",
        }
    }

    /// Error for a response that does not fit `request`.
    pub fn unexpected(&self, request: &'static str) -> RpcError {
        RpcError::UnexpectedResponse {
            request,
            response: self.variant(),
        }
    }

    pub fn into_difference(self) -> Result<Difference, RpcError> {
        match self {
            Response::Difference(difference) => Ok(difference),
            other => Err(other.unexpected("get_difference")),
        }
    }

    pub fn into_peer(self) -> Result<PeerRecord, RpcError> {
        match self {
            Response::Peer(record) => Ok(record),
            other => Err(other.unexpected("resolve_username")),
        }
    }

    pub fn into_dialogs(self) -> Result<DialogsSlice, RpcError> {
        match self {
            Response::Dialogs(slice) => Ok(slice),
            other => Err(other.unexpected("get_dialogs")),
        }
    }

    pub fn into_user(self) -> Result<User, RpcError> {
        match self {
            Response::User(user) | Response::Authorized(user) => Ok(user),
            other => Err(other.unexpected("get_self")),
        }
    }
}

/// One page of the dialog list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DialogsSlice {
    pub peers: Vec<PeerRecord>,
    /// Where the next page starts; `None` on the last page.
    pub next: Option<DialogsOffset>,
}

/// The account the session is authorized as.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// Confirmation that a login code was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCode {
    /// Opaque token to pass back with the code.
    pub code_hash: String,
    /// How the code was delivered ("app", "sms", ...).
    pub delivery: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermsOfService {
    pub id: String,
    pub text: String,
}

// ============================================================================
// Invoker and Transport
// ============================================================================

/// Issues outbound calls.
///
/// Flood control wraps an `Invoker` and is an `Invoker` itself, so layers
/// compose by nesting.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, request: Request) -> Result<Response, RpcError>;
}

#[async_trait]
impl<T: Invoker + ?Sized> Invoker for Arc<T> {
    async fn invoke(&self, request: Request) -> Result<Response, RpcError> {
        (**self).invoke(request).await
    }
}

/// Event pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Update(Update),
    /// The server dropped events for `stream` ("too long") and the client
    /// has to fetch them.
    Gap(StreamId),
}

/// A live connection.
pub struct Connection {
    pub invoker: Arc<dyn Invoker>,
    pub inbound: mpsc::Receiver<Inbound>,
}

/// Opens connections to the server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connects, resuming `session` when one was stored before.
    async fn connect(&self, session: Option<Bytes>) -> Result<Connection, RpcError>;

    /// The current session blob, once there is one worth persisting.
    async fn session(&self) -> Option<Bytes>;
}
