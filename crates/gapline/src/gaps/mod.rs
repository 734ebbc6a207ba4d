//! Gap detection and recovery.
//!
//! The engine owns the inbound side of a connection. Each stream is in one
//! of three phases:
//!
//! ```text
//!   Synced ──gap──► Recovering ──fetched──► Draining ──settled──► Synced
//!                       ▲                       │
//!                       └──── hole remains ─────┘
//! ```
//!
//! While a stream is not `Synced`, sequenced updates for it are held in a
//! `RecoveryBuffer` and merged with the fetched difference before being
//! applied in counter order.
//!
//! Applying an update means: run its handler, then persist the advanced
//! state. A crash between the two redelivers the update on the next start,
//! so handlers see every update at least once and must tolerate repeats.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gapline_config::RecoveryConfig;
use gapline_storage::{SequenceStateStore, StorageError};
use gapline_types::{Counter, Difference, Sequence, SequenceState, StreamId, Update, Verdict};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::dispatch::{Dispatcher, UpdateContext};
use crate::error::{ClientError, RpcError};
use crate::group::ReadySignal;
use crate::peers::PeerResolver;
use crate::persist::offload;
use crate::transport::{Inbound, Invoker, Request};

mod buffer;

use buffer::RecoveryBuffer;

/// Recovery tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Updates requested per difference slice.
    pub difference_limit: u32,
    /// Live updates buffered per stream while it recovers.
    pub max_buffered: usize,
    /// Consecutive recovery rounds without progress before giving up.
    pub max_rounds: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            difference_limit: 100,
            max_buffered: 10_000,
            max_rounds: 3,
        }
    }
}

impl From<&RecoveryConfig> for EngineConfig {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            difference_limit: config.difference_limit,
            max_buffered: config.max_buffered,
            max_rounds: config.max_rounds,
        }
    }
}

/// Phase of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Synced,
    /// A difference fetch is in flight.
    Recovering,
    /// The fetched difference is being applied.
    Draining,
}

#[derive(Debug)]
struct StreamBox {
    /// `None` until the first update for a stream that was never stored.
    state: Option<SequenceState>,
    phase: Phase,
    buffer: RecoveryBuffer,
    /// Fetch again when the current fetch completes.
    refetch: bool,
    stalled_rounds: u32,
}

impl StreamBox {
    fn new(state: Option<SequenceState>, capacity: usize) -> Self {
        Self {
            state,
            phase: Phase::Synced,
            buffer: RecoveryBuffer::new(capacity),
            refetch: false,
            stalled_rounds: 0,
        }
    }
}

type FetchOutcome = (StreamId, Result<Vec<Difference>, RpcError>);

/// Sequences inbound updates and recovers from gaps.
pub struct Engine {
    states: Arc<dyn SequenceStateStore>,
    peers: Arc<PeerResolver>,
    dispatcher: Arc<Dispatcher>,
    api: Arc<dyn Invoker>,
    config: EngineConfig,
    streams: HashMap<StreamId, StreamBox>,
    fetches: JoinSet<FetchOutcome>,
    /// Streams whose startup recovery has not settled yet.
    catching_up: HashSet<StreamId>,
}

impl Engine {
    pub fn new(
        states: Arc<dyn SequenceStateStore>,
        peers: Arc<PeerResolver>,
        dispatcher: Arc<Dispatcher>,
        api: Arc<dyn Invoker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            states,
            peers,
            dispatcher,
            api,
            config,
            streams: HashMap::new(),
            fetches: JoinSet::new(),
            catching_up: HashSet::new(),
        }
    }

    /// Processes `inbound` until it closes or `cancel` fires.
    ///
    /// Every stored stream is recovered first; `ready` is set once all of
    /// them are back in sync. Returns `Ok` when the inbound channel closes
    /// and no fetch is left, and [`ClientError::Cancelled`] on cancellation.
    /// Any other error is fatal: the stored state still reflects the last
    /// applied update, so a restart resumes from there.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        ready: ReadySignal,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        self.catch_up()?;
        self.signal_if_caught_up(&ready);

        let mut inbound_open = true;
        loop {
            if !inbound_open && self.fetches.is_empty() {
                info!("inbound channel closed");
                return Ok(());
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(in_flight = self.fetches.len(), "update engine cancelled");
                    return Err(ClientError::Cancelled);
                }
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    let (stream, outcome) = joined
                        .map_err(|_| ClientError::TaskPanicked("difference fetch".to_string()))?;
                    self.finish_recovery(stream, outcome?).await?;
                    self.signal_if_caught_up(&ready);
                }
                event = inbound.recv(), if inbound_open => match event {
                    Some(Inbound::Update(update)) => self.handle_update(update).await?,
                    Some(Inbound::Gap(stream)) => self.handle_gap(stream)?,
                    None => inbound_open = false,
                },
            }
        }
    }

    /// Starts recovery of every stored stream.
    fn catch_up(&mut self) -> Result<(), ClientError> {
        let streams = self.states.streams()?;
        info!(streams = streams.len(), "catching up");
        for stream in streams {
            self.catching_up.insert(stream);
            self.start_recovery(stream)?;
        }
        Ok(())
    }

    fn signal_if_caught_up(&mut self, ready: &ReadySignal) {
        let streams = &self.streams;
        self.catching_up.retain(|stream| {
            streams
                .get(stream)
                .is_some_and(|bx| bx.phase != Phase::Synced)
        });
        if self.catching_up.is_empty() && !ready.is_set() {
            info!("caught up");
            ready.set();
        }
    }

    fn stream_mut(&mut self, stream: StreamId) -> Result<&mut StreamBox, StorageError> {
        match self.streams.entry(stream) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let state = self.states.get(stream)?;
                Ok(entry.insert(StreamBox::new(state, self.config.max_buffered)))
            }
        }
    }

    async fn handle_update(&mut self, update: Update) -> Result<(), ClientError> {
        self.peers.ingest(&update.entities).await?;
        let Some(sequence) = update.sequence else {
            return self.apply(update).await;
        };

        let stream = update.stream;
        let bx = self.stream_mut(stream)?;
        if bx.phase != Phase::Synced {
            if !bx.buffer.push_live(update) {
                debug!(%stream, value = sequence.value, "recovery buffer full, dropping update");
                bx.refetch = true;
            }
            return Ok(());
        }

        // A counter at zero was never seen; its first update sets it.
        let local = bx
            .state
            .map(|state| state.get(sequence.counter))
            .filter(|&local| local > 0);
        let Some(local) = local else {
            debug!(
                %stream,
                counter = %sequence.counter,
                value = sequence.value,
                "initializing counter"
            );
            return self.apply(update).await;
        };

        match sequence.classify(local) {
            Verdict::Apply => self.apply(update).await,
            Verdict::Duplicate => {
                trace!(%stream, value = sequence.value, local, "duplicate update");
                Ok(())
            }
            Verdict::Gap => {
                info!(
                    %stream,
                    counter = %sequence.counter,
                    local,
                    remote = sequence.value,
                    "gap detected"
                );
                bx.buffer.push_live(update);
                self.start_recovery(stream)?;
                Ok(())
            }
        }
    }

    fn handle_gap(&mut self, stream: StreamId) -> Result<(), ClientError> {
        let bx = self.stream_mut(stream)?;
        if bx.phase == Phase::Synced {
            info!(%stream, "server reported gap");
            self.start_recovery(stream)?;
        } else {
            bx.refetch = true;
        }
        Ok(())
    }

    /// Dispatches `update`, then persists the state it advances to.
    async fn apply(&mut self, update: Update) -> Result<(), ClientError> {
        let peer = self.peers.update_peer(&update)?;
        let ctx = UpdateContext {
            peer,
            api: self.api.clone(),
        };
        let stream = update.stream;
        let sequence = update.sequence;
        let date = update.date;
        self.dispatcher.dispatch(ctx, update).await?;

        let Some(sequence) = sequence else {
            return Ok(());
        };
        let bx = self.stream_mut(stream)?;
        let mut state = bx.state.unwrap_or_default();
        state.advance(&sequence, date);
        bx.state = Some(state);
        persist(self.states.clone(), stream, state).await?;
        Ok(())
    }

    fn start_recovery(&mut self, stream: StreamId) -> Result<(), StorageError> {
        let limit = self.config.difference_limit;
        let access_hash = match stream.channel_id() {
            Some(id) => self.peers.channel_access_hash(id)?,
            None => None,
        };

        let bx = self.stream_mut(stream)?;
        bx.phase = Phase::Recovering;
        bx.refetch = false;
        let from = bx.state.unwrap_or_default();
        let until_date = bx.buffer.max_date();
        debug!(%stream, pts = from.pts, qts = from.qts, seq = from.seq, "fetching difference");

        let api = self.api.clone();
        self.fetches.spawn(async move {
            let outcome = fetch_difference(api, stream, from, until_date, limit, access_hash).await;
            (stream, outcome)
        });
        Ok(())
    }

    async fn finish_recovery(
        &mut self,
        stream: StreamId,
        slices: Vec<Difference>,
    ) -> Result<(), ClientError> {
        let bx = self.stream_mut(stream)?;
        bx.phase = Phase::Draining;
        let before = bx.state;
        let mut target = before.unwrap_or_default();

        let mut unsequenced = Vec::new();
        let mut foreign = Vec::new();
        let mut fetched = 0usize;
        for slice in slices {
            self.peers.ingest(&slice.entities).await?;
            target = target.merge_max(&slice.state);
            for update in slice.updates {
                if update.stream != stream {
                    foreign.push(update);
                    continue;
                }
                self.peers.ingest(&update.entities).await?;
                if update.sequence.is_none() {
                    unsequenced.push(update);
                } else {
                    fetched += 1;
                    self.stream_mut(stream)?.buffer.push_recovered(update);
                }
            }
        }
        debug!(%stream, fetched, "difference received");

        for update in unsequenced {
            self.apply(update).await?;
        }
        self.drain(stream).await?;
        while self.skip_covered_holes(stream, &target).await? {
            self.drain(stream).await?;
        }
        self.advance_to(stream, target).await?;
        self.drain(stream).await?;

        let max_rounds = self.config.max_rounds;
        let bx = self.stream_mut(stream)?;
        if bx.buffer.is_empty() && !bx.refetch {
            bx.phase = Phase::Synced;
            bx.stalled_rounds = 0;
            let state = bx.state.unwrap_or_default();
            info!(%stream, pts = state.pts, qts = state.qts, seq = state.seq, "stream recovered");
        } else {
            if bx.state == before {
                bx.stalled_rounds += 1;
            } else {
                bx.stalled_rounds = 0;
            }
            if bx.stalled_rounds >= max_rounds {
                let (counter, next) = bx.buffer.first_blocked().unwrap_or((Counter::Pts, 0));
                let local = bx.state.map_or(0, |state| state.get(counter));
                return Err(ClientError::GapUnresolved {
                    stream,
                    counter,
                    local,
                    next,
                });
            }
            debug!(%stream, buffered = bx.buffer.len(), "gap remains, fetching again");
            self.start_recovery(stream)?;
        }

        for update in foreign {
            self.handle_update(update).await?;
        }
        Ok(())
    }

    /// Applies buffered updates while the next one is in order.
    async fn drain(&mut self, stream: StreamId) -> Result<(), ClientError> {
        loop {
            let bx = self.stream_mut(stream)?;
            let state = bx.state.unwrap_or_default();
            let Some(update) = bx.buffer.pop_ready(&state) else {
                return Ok(());
            };
            self.apply(update).await?;
        }
    }

    /// Moves counters past holes that lie within the server's position.
    ///
    /// The server's difference holds everything up to `target` that is
    /// addressed to this client, so a missing counter value at or below
    /// it has nothing to deliver. Returns true if any counter moved.
    async fn skip_covered_holes(
        &mut self,
        stream: StreamId,
        target: &SequenceState,
    ) -> Result<bool, ClientError> {
        let bx = self.stream_mut(stream)?;
        let mut state = bx.state.unwrap_or_default();
        let mut skipped = false;
        for counter in Counter::ALL {
            let Some(first) = bx.buffer.first(counter) else {
                continue;
            };
            let local = state.get(counter);
            if first.value <= target.get(counter) && first.classify(local) == Verdict::Gap {
                debug!(
                    %stream,
                    %counter,
                    from = local,
                    to = first.expected_local(),
                    "skipping empty range"
                );
                state.advance(&Sequence::new(counter, first.expected_local()), 0);
                skipped = true;
            }
        }
        if skipped {
            bx.state = Some(state);
            persist(self.states.clone(), stream, state).await?;
        }
        Ok(skipped)
    }

    /// Raises the stored state to the server's position.
    async fn advance_to(
        &mut self,
        stream: StreamId,
        target: SequenceState,
    ) -> Result<(), StorageError> {
        let bx = self.stream_mut(stream)?;
        let next = bx.state.unwrap_or_default().merge_max(&target);
        if bx.state == Some(next) {
            return Ok(());
        }
        bx.state = Some(next);
        persist(self.states.clone(), stream, next).await
    }
}

async fn persist(
    states: Arc<dyn SequenceStateStore>,
    stream: StreamId,
    state: SequenceState,
) -> Result<(), StorageError> {
    offload(move || states.set(stream, state)).await
}

/// Fetches every slice of the difference of `stream` after `from`.
async fn fetch_difference(
    api: Arc<dyn Invoker>,
    stream: StreamId,
    mut from: SequenceState,
    until_date: Option<i64>,
    limit: u32,
    access_hash: Option<String>,
) -> Result<Vec<Difference>, RpcError> {
    let mut slices = Vec::new();
    loop {
        let request = Request::GetDifference {
            stream,
            from,
            until_date,
            limit,
            access_hash: access_hash.clone(),
        };
        let slice = api.invoke(request).await?.into_difference()?;
        // A slice that does not move the position would repeat forever.
        let done = slice.is_final || slice.state == from;
        from = from.merge_max(&slice.state);
        slices.push(slice);
        if done {
            return Ok(slices);
        }
    }
}
