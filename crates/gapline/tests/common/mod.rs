//! In-process server and transport for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gapline::{
    Client, Connection, Difference, DialogsOffset, DialogsSlice, Inbound, Invoker, PeerRecord,
    Request, Response, RpcError, SentCode, Sequence, SequenceState, StreamId, Transport, Update,
    UpdateContext, UpdateKind, User,
};
use tokio::sync::mpsc;

pub const LOGIN_CODE: &str = "12345";
pub const SESSION_BLOB: &[u8] = b"auth-key:42";

/// A sequenced message on `stream` at `pts`.
pub fn message(stream: StreamId, pts: i64) -> Update {
    let kind = match stream {
        StreamId::Common => UpdateKind::NewMessage,
        StreamId::Channel(_) => UpdateKind::NewChannelMessage,
    };
    Update::new(kind, stream)
        .with_sequence(Sequence::pts(pts))
        .with_date(1_000 + pts)
}

pub fn me() -> User {
    User {
        id: 42,
        first_name: "Ada".into(),
        ..Default::default()
    }
}

#[derive(Default)]
struct ServerState {
    history: HashMap<StreamId, Vec<Update>>,
    authorized: bool,
    /// The authorized session belongs to a bot account.
    bot: bool,
    dialogs: Vec<PeerRecord>,
    usernames: HashMap<String, PeerRecord>,
    flood_next: VecDeque<Duration>,
    difference_delay: Duration,
    calls: Vec<&'static str>,
    resumed: Option<Bytes>,
}

/// Keeps per-stream history and answers the calls the client makes.
#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn authorized() -> Arc<Self> {
        let server = Self::new();
        server.state.lock().unwrap().authorized = true;
        server
    }

    /// Authorized, but as a bot until a user signs in.
    pub fn bot_session() -> Arc<Self> {
        let server = Self::authorized();
        server.state.lock().unwrap().bot = true;
        server
    }

    /// Appends a message to `stream`'s history and returns it.
    pub fn publish(&self, stream: StreamId) -> Update {
        let mut state = self.state.lock().unwrap();
        let history = state.history.entry(stream).or_default();
        let update = message(stream, history.len() as i64 + 1);
        history.push(update.clone());
        update
    }

    pub fn publish_many(&self, stream: StreamId, count: usize) -> Vec<Update> {
        (0..count).map(|_| self.publish(stream)).collect()
    }

    pub fn head(&self, stream: StreamId) -> i64 {
        let state = self.state.lock().unwrap();
        state.history.get(&stream).map_or(0, |h| h.len() as i64)
    }

    pub fn add_dialogs(&self, peers: impl IntoIterator<Item = PeerRecord>) {
        self.state.lock().unwrap().dialogs.extend(peers);
    }

    pub fn add_username(&self, username: &str, record: PeerRecord) {
        self.state
            .lock()
            .unwrap()
            .usernames
            .insert(username.to_string(), record);
    }

    /// The next call fails with a congestion signal of `wait`.
    pub fn flood_next(&self, wait: Duration) {
        self.state.lock().unwrap().flood_next.push_back(wait);
    }

    /// Every difference fetch takes `delay` to answer.
    pub fn delay_differences(&self, delay: Duration) {
        self.state.lock().unwrap().difference_delay = delay;
    }

    pub fn is_authorized(&self) -> bool {
        self.state.lock().unwrap().authorized
    }

    /// Number of received calls of `method`.
    pub fn calls(&self, method: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.iter().filter(|&&m| m == method).count()
    }

    /// The session blob the last connection was opened with.
    pub fn resumed(&self) -> Option<Bytes> {
        self.state.lock().unwrap().resumed.clone()
    }

    /// Every received call, in order.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    fn difference(&self, stream: StreamId, from: SequenceState, limit: u32) -> Difference {
        let state = self.state.lock().unwrap();
        let history = state.history.get(&stream).map_or(&[][..], Vec::as_slice);
        let start = usize::try_from(from.pts).unwrap_or(0).min(history.len());
        let end = (start + limit as usize).min(history.len());
        let updates = history[start..end].to_vec();
        let pts = end as i64;
        Difference {
            updates,
            entities: Vec::new(),
            state: SequenceState {
                pts: pts.max(from.pts),
                date: 1_000 + pts,
                ..from
            },
            is_final: end == history.len(),
        }
    }

    fn dialogs(&self, offset: Option<DialogsOffset>, limit: u32) -> DialogsSlice {
        let state = self.state.lock().unwrap();
        let start = offset.map_or(0, |o| o.date as usize).min(state.dialogs.len());
        let end = (start + limit as usize).min(state.dialogs.len());
        let peers = state.dialogs[start..end].to_vec();
        let next = (end < state.dialogs.len()).then(|| DialogsOffset {
            date: end as i64,
            peer: state.dialogs[end - 1].id,
        });
        DialogsSlice { peers, next }
    }
}

#[async_trait]
impl Invoker for FakeServer {
    async fn invoke(&self, request: Request) -> Result<Response, RpcError> {
        let (flood, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(request.method());
            (state.flood_next.pop_front(), state.difference_delay)
        };
        if let Some(wait) = flood {
            return Err(RpcError::FloodWait(wait));
        }

        match request {
            Request::GetDifference {
                stream,
                from,
                limit,
                ..
            } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Response::Difference(self.difference(stream, from, limit)))
            }
            Request::GetSelf if self.is_authorized() => {
                let bot = self.state.lock().unwrap().bot;
                Ok(Response::User(User { bot, ..me() }))
            }
            Request::GetSelf => Err(RpcError::rpc(401, "AUTH_KEY_UNREGISTERED")),
            Request::SendCode { .. } => Ok(Response::SentCode(SentCode {
                code_hash: "hash".into(),
                delivery: "app".into(),
            })),
            Request::SignIn { code, .. } if code == LOGIN_CODE => {
                let mut state = self.state.lock().unwrap();
                state.authorized = true;
                state.bot = false;
                Ok(Response::Authorized(me()))
            }
            Request::SignIn { .. } => Err(RpcError::rpc(400, "PHONE_CODE_INVALID")),
            Request::GetDialogs { offset, limit } => {
                Ok(Response::Dialogs(self.dialogs(offset, limit)))
            }
            Request::ResolveUsername { username } => {
                let state = self.state.lock().unwrap();
                state
                    .usernames
                    .get(&username)
                    .cloned()
                    .map(Response::Peer)
                    .ok_or_else(|| RpcError::rpc(400, "USERNAME_NOT_OCCUPIED"))
            }
            other => Err(RpcError::Transport(format!("{} not served", other.method()))),
        }
    }
}

/// Transport handing out one connection to a [`FakeServer`].
pub struct FakeTransport {
    server: Arc<FakeServer>,
    inbound: Mutex<Option<mpsc::Receiver<Inbound>>>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, session: Option<Bytes>) -> Result<Connection, RpcError> {
        self.server.state.lock().unwrap().resumed = session;
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RpcError::Transport("already connected".into()))?;
        Ok(Connection {
            invoker: self.server.clone(),
            inbound,
        })
    }

    async fn session(&self) -> Option<Bytes> {
        self.server
            .is_authorized()
            .then(|| Bytes::from_static(SESSION_BLOB))
    }
}

/// A transport over `server` and the sender feeding its inbound channel.
pub fn transport(server: &Arc<FakeServer>) -> (FakeTransport, mpsc::Sender<Inbound>) {
    let (tx, rx) = mpsc::channel(64);
    let transport = FakeTransport {
        server: server.clone(),
        inbound: Mutex::new(Some(rx)),
    };
    (transport, tx)
}

/// Records the counter value of every update of `kind` the client
/// dispatches.
pub fn record(client: &mut Client<FakeTransport>, kind: UpdateKind) -> Arc<Mutex<Vec<i64>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on(kind, move |_ctx: UpdateContext, update: Update| {
        let sink = sink.clone();
        async move {
            sink.lock()
                .unwrap()
                .push(update.sequence.map_or(0, |s| s.value));
            Ok::<(), gapline::BoxError>(())
        }
    });
    seen
}

/// Polls `done` until it holds, panicking after a minute of (virtual) time.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Runs `fut` and returns how much (virtual) time it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let start = tokio::time::Instant::now();
    let output = fut.await;
    (output, start.elapsed())
}
