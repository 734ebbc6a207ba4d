//! # gapline-types: Core types for `gapline`
//!
//! This crate contains the value types shared across the client:
//! - Stream identity ([`StreamId`]) and event counters ([`Counter`], [`Sequence`])
//! - Per-stream sequencing state ([`SequenceState`])
//! - Peer identity and metadata ([`PeerId`], [`PeerKind`], [`PeerRecord`])
//! - Inbound events ([`Update`], [`UpdateKind`]) and recovery batches ([`Difference`])
//!
//! Nothing in here performs I/O.

use std::{
    cmp::Ordering,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing identifiers from their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    #[error("unknown peer kind '{0}' (expected user, chat or channel)")]
    UnknownKind(String),

    #[error("malformed identifier '{0}'")]
    Malformed(String),
}

// ============================================================================
// Streams and counters
// ============================================================================

/// Identifies one independently sequenced event stream.
///
/// The account-wide stream carries the `pts`, `qts` and `seq` counters;
/// every channel the user is a member of has its own `pts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    /// The user's own account-wide stream.
    Common,
    /// A channel's stream, keyed by channel id.
    Channel(i64),
}

impl StreamId {
    /// Returns the channel id for channel streams.
    pub fn channel_id(self) -> Option<i64> {
        match self {
            StreamId::Common => None,
            StreamId::Channel(id) => Some(id),
        }
    }

    /// Counters tracked for this stream.
    pub fn counters(self) -> &'static [Counter] {
        match self {
            StreamId::Common => &Counter::ALL,
            StreamId::Channel(_) => &[Counter::Pts],
        }
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Common => write!(f, "common"),
            StreamId::Channel(id) => write!(f, "channel:{id}"),
        }
    }
}

impl FromStr for StreamId {
    type Err = ParseIdError;

    /// Parses `common` or `channel:<id>`.
    ///
    /// ```
    /// # use gapline_types::StreamId;
    /// assert_eq!("common".parse::<StreamId>().unwrap(), StreamId::Common);
    /// assert_eq!("channel:42".parse::<StreamId>().unwrap(), StreamId::Channel(42));
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "common" {
            return Ok(StreamId::Common);
        }
        let id = s
            .strip_prefix("channel:")
            .and_then(|id| id.parse::<i64>().ok())
            .ok_or_else(|| ParseIdError::Malformed(s.to_string()))?;
        Ok(StreamId::Channel(id))
    }
}

/// One of the monotonic counters a stream may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// Message-box counter (account-wide or per channel).
    Pts,
    /// Secondary event category (secret chats, bot participant updates).
    Qts,
    /// Account-wide container sequence.
    Seq,
}

impl Counter {
    pub const ALL: [Counter; 3] = [Counter::Pts, Counter::Qts, Counter::Seq];
}

impl Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Counter::Pts => "pts",
            Counter::Qts => "qts",
            Counter::Seq => "seq",
        };
        f.write_str(name)
    }
}

/// Position of an update along one counter.
///
/// `value` is the counter *after* applying the update and `count` is how many
/// counter steps the update consumes, so the update expects the local counter
/// to equal `value - count` beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sequence {
    pub counter: Counter,
    pub value: i64,
    #[serde(default = "default_count")]
    pub count: i64,
}

fn default_count() -> i64 {
    1
}

/// How an incoming [`Sequence`] relates to the locally stored counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The update is the next one in order.
    Apply,
    /// The update was already applied.
    Duplicate,
    /// One or more updates before this one are missing.
    Gap,
}

impl Sequence {
    pub fn new(counter: Counter, value: i64) -> Self {
        Self {
            counter,
            value,
            count: 1,
        }
    }

    pub fn pts(value: i64) -> Self {
        Self::new(Counter::Pts, value)
    }

    pub fn qts(value: i64) -> Self {
        Self::new(Counter::Qts, value)
    }

    pub fn seq(value: i64) -> Self {
        Self::new(Counter::Seq, value)
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    /// Counter value the local state must hold for this update to apply.
    pub fn expected_local(&self) -> i64 {
        self.value - self.count
    }

    /// Classifies this update against the stored counter.
    ///
    /// ```
    /// # use gapline_types::{Sequence, Verdict};
    /// assert_eq!(Sequence::pts(6).classify(5), Verdict::Apply);
    /// assert_eq!(Sequence::pts(5).classify(5), Verdict::Duplicate);
    /// assert_eq!(Sequence::pts(9).classify(5), Verdict::Gap);
    /// ```
    pub fn classify(&self, local: i64) -> Verdict {
        match (local + self.count).cmp(&self.value) {
            Ordering::Equal => Verdict::Apply,
            Ordering::Greater => Verdict::Duplicate,
            Ordering::Less => Verdict::Gap,
        }
    }
}

// ============================================================================
// Sequencing state
// ============================================================================

/// Last applied position of one stream.
///
/// # Invariants
///
/// - `pts`, `qts` and `seq` never decrease over the stored lifetime
/// - `date` is the unix timestamp (seconds) of the last applied update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SequenceState {
    pub pts: i64,
    pub qts: i64,
    pub seq: i64,
    pub date: i64,
}

impl SequenceState {
    pub fn get(&self, counter: Counter) -> i64 {
        match counter {
            Counter::Pts => self.pts,
            Counter::Qts => self.qts,
            Counter::Seq => self.seq,
        }
    }

    fn slot(&mut self, counter: Counter) -> &mut i64 {
        match counter {
            Counter::Pts => &mut self.pts,
            Counter::Qts => &mut self.qts,
            Counter::Seq => &mut self.seq,
        }
    }

    /// Records an applied update. Counters and date only move forward.
    pub fn advance(&mut self, sequence: &Sequence, date: i64) {
        let slot = self.slot(sequence.counter);
        *slot = (*slot).max(sequence.value);
        self.date = self.date.max(date);
    }

    /// Counter-wise maximum of `self` and `other`.
    pub fn merge_max(&self, other: &SequenceState) -> SequenceState {
        SequenceState {
            pts: self.pts.max(other.pts),
            qts: self.qts.max(other.qts),
            seq: self.seq.max(other.seq),
            date: self.date.max(other.date),
        }
    }
}

// ============================================================================
// Peers
// ============================================================================

/// Discriminates the three kinds of peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

impl Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerKind::User => "user",
            PeerKind::Chat => "chat",
            PeerKind::Channel => "channel",
        };
        f.write_str(name)
    }
}

impl FromStr for PeerKind {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(PeerKind::User),
            "chat" => Ok(PeerKind::Chat),
            "channel" => Ok(PeerKind::Channel),
            other => Err(ParseIdError::UnknownKind(other.to_string())),
        }
    }
}

/// Opaque peer reference: numeric id plus kind.
///
/// Ids are only unique within a kind, so the kind is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId {
    pub kind: PeerKind,
    pub id: i64,
}

impl PeerId {
    pub fn new(kind: PeerKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn user(id: i64) -> Self {
        Self::new(PeerKind::User, id)
    }

    pub fn chat(id: i64) -> Self {
        Self::new(PeerKind::Chat, id)
    }

    pub fn channel(id: i64) -> Self {
        Self::new(PeerKind::Channel, id)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for PeerId {
    type Err = ParseIdError;

    /// Parses `<kind>:<id>`, e.g. `user:7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseIdError::Malformed(s.to_string()))?;
        let id = id
            .parse::<i64>()
            .map_err(|_| ParseIdError::Malformed(s.to_string()))?;
        Ok(PeerId::new(kind.parse()?, id))
    }
}

/// Last known metadata for a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    /// Token required by calls that target this peer. `None` or empty when
    /// the server did not include it (e.g. "min" entities).
    #[serde(default)]
    pub access_hash: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl PeerRecord {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            access_hash: None,
            display_name: String::new(),
            username: None,
        }
    }

    pub fn with_access_hash(mut self, hash: impl Into<String>) -> Self {
        self.access_hash = Some(hash.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Returns true when the record carries a usable access hash.
    pub fn has_access_hash(&self) -> bool {
        self.access_hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Merges a newer observation of the same peer into this record.
    ///
    /// Fields present in `incoming` win, except that a missing or empty
    /// access hash never replaces a valid one.
    ///
    /// ```
    /// # use gapline_types::{PeerId, PeerRecord};
    /// let stored = PeerRecord::new(PeerId::user(7)).with_access_hash("abc");
    /// let merged = stored.merge(PeerRecord::new(PeerId::user(7)).with_access_hash(""));
    /// assert_eq!(merged.access_hash.as_deref(), Some("abc"));
    /// ```
    pub fn merge(self, incoming: PeerRecord) -> PeerRecord {
        debug_assert_eq!(self.id, incoming.id, "merging records of different peers");

        let access_hash = if incoming.has_access_hash() {
            incoming.access_hash
        } else {
            self.access_hash
        };
        let display_name = if incoming.display_name.is_empty() {
            self.display_name
        } else {
            incoming.display_name
        };
        let username = incoming.username.or(self.username);

        PeerRecord {
            id: self.id,
            access_hash,
            display_name,
            username,
        }
    }
}

impl Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.display_name, &self.username) {
            (name, Some(username)) if !name.is_empty() => write!(f, "{name} (@{username})"),
            (name, _) if !name.is_empty() => f.write_str(name),
            (_, Some(username)) => write!(f, "@{username}"),
            _ => write!(f, "{}", self.id),
        }
    }
}

// ============================================================================
// Updates
// ============================================================================

/// Kind of an inbound update; the dispatcher's routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    NewMessage,
    NewChannelMessage,
    EditMessage,
    EditChannelMessage,
    DeleteMessages,
    DeleteChannelMessages,
    ReadHistory,
    ChannelParticipant,
    UserStatus,
    /// Any kind this crate has no dedicated variant for.
    Other(String),
}

impl Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::Other(name) => f.write_str(name),
            known => {
                let value = serde_json::to_value(known).map_err(|_| fmt::Error)?;
                f.write_str(value.as_str().unwrap_or("unknown"))
            }
        }
    }
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub kind: UpdateKind,
    pub stream: StreamId,
    /// Counter position; `None` for updates that are not sequenced
    /// (typing notifications, status changes).
    #[serde(default)]
    pub sequence: Option<Sequence>,
    #[serde(default)]
    pub date: i64,
    /// Peer the update is about, if any.
    #[serde(default)]
    pub peer: Option<PeerId>,
    /// Peer metadata delivered alongside the update.
    #[serde(default)]
    pub entities: Vec<PeerRecord>,
    /// Kind-specific body, left for handlers to interpret.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Update {
    pub fn new(kind: UpdateKind, stream: StreamId) -> Self {
        Self {
            kind,
            stream,
            sequence: None,
            date: 0,
            peer: None,
            entities: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_date(mut self, date: i64) -> Self {
        self.date = date;
        self
    }

    pub fn with_peer(mut self, peer: PeerId) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_entity(mut self, record: PeerRecord) -> Self {
        self.entities.push(record);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Looks up the attached entity for `peer`, if the update carries one.
    pub fn entity(&self, peer: PeerId) -> Option<&PeerRecord> {
        self.entities.iter().find(|record| record.id == peer)
    }
}

/// One slice of a recovery fetch.
///
/// `state` is the server's position after the slice; `is_final` is false
/// when more slices remain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Difference {
    pub updates: Vec<Update>,
    #[serde(default)]
    pub entities: Vec<PeerRecord>,
    pub state: SequenceState,
    pub is_final: bool,
}

impl Difference {
    /// A final slice with no updates, reporting `state`.
    pub fn empty(state: SequenceState) -> Self {
        Self {
            updates: Vec::new(),
            entities: Vec::new(),
            state,
            is_final: true,
        }
    }
}
