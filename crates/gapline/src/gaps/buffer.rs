//! Updates held while a stream recovers.

use std::collections::BTreeMap;

use gapline_types::{Counter, Sequence, SequenceState, Update, Verdict};

/// Sequenced updates of one stream, ordered by counter and value.
///
/// Live arrivals are bounded by `capacity`; updates returned by a recovery
/// fetch are always kept since they are what closes the hole. A second
/// update at the same position is a redelivery and is ignored.
#[derive(Debug)]
pub(crate) struct RecoveryBuffer {
    entries: BTreeMap<(Counter, i64), Update>,
    capacity: usize,
}

impl RecoveryBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffers a live update. Returns false if it was dropped for lack of
    /// room; the caller must fetch again to get it back.
    pub(crate) fn push_live(&mut self, update: Update) -> bool {
        let Some(key) = key(&update) else {
            return true;
        };
        if self.entries.contains_key(&key) {
            return true;
        }
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.insert(key, update);
        true
    }

    /// Buffers an update returned by a recovery fetch.
    pub(crate) fn push_recovered(&mut self, update: Update) {
        if let Some(key) = key(&update) {
            self.entries.entry(key).or_insert(update);
        }
    }

    /// Removes and returns the next update that applies on top of `state`.
    ///
    /// Updates already covered by `state` are discarded on the way.
    pub(crate) fn pop_ready(&mut self, state: &SequenceState) -> Option<Update> {
        for counter in Counter::ALL {
            let local = state.get(counter);
            loop {
                let Some((&key, update)) = self
                    .entries
                    .range((counter, i64::MIN)..=(counter, i64::MAX))
                    .next()
                else {
                    break;
                };
                let verdict = update
                    .sequence
                    .map_or(Verdict::Duplicate, |sequence| sequence.classify(local));
                match verdict {
                    Verdict::Apply => return self.entries.remove(&key),
                    Verdict::Duplicate => {
                        self.entries.remove(&key);
                    }
                    Verdict::Gap => break,
                }
            }
        }
        None
    }

    /// Lowest buffered sequence on `counter`.
    pub(crate) fn first(&self, counter: Counter) -> Option<Sequence> {
        self.entries
            .range((counter, i64::MIN)..=(counter, i64::MAX))
            .next()
            .and_then(|(_, update)| update.sequence)
    }

    /// The first buffered position that does not apply, for diagnostics.
    pub(crate) fn first_blocked(&self) -> Option<(Counter, i64)> {
        self.entries.keys().next().copied()
    }

    /// Newest date among buffered updates.
    pub(crate) fn max_date(&self) -> Option<i64> {
        self.entries.values().map(|update| update.date).max()
    }
}

fn key(update: &Update) -> Option<(Counter, i64)> {
    update
        .sequence
        .map(|sequence| (sequence.counter, sequence.value))
}
