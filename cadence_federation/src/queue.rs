//! Per-recipient message queues: the TSO min-heap, the receive-order FIFO
//! and the retraction set.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

use cadence_core::{FederateHandle, LogicalTime, RetractionHandle, TimePosition};

use crate::{events::FedCallback, proto::MessageEnvelope};

/// A queued timestamped message awaiting delivery. Ordered by
/// `(position, sender, sent_serial)` — the delivery tie-break.
#[derive(Debug, Clone)]
pub struct TsoEntry<T: LogicalTime> {
    pub position: TimePosition<T>,
    pub sender: FederateHandle,
    pub sent_serial: u64,
    pub timestamp: T,
    pub envelope: MessageEnvelope,
}

impl<T: LogicalTime> TsoEntry<T> {
    fn key(&self) -> (TimePosition<T>, FederateHandle, u64) {
        (self.position, self.sender, self.sent_serial)
    }
}

impl<T: LogicalTime> PartialEq for TsoEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T: LogicalTime> Eq for TsoEntry<T> {}

impl<T: LogicalTime> PartialOrd for TsoEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: LogicalTime> Ord for TsoEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// The inbound queues of one federate.
#[derive(Debug)]
pub struct InboundQueues<T: LogicalTime> {
    /// Not-yet-deliverable timestamped events, min-first via `Reverse`.
    tso: BinaryHeap<Reverse<TsoEntry<T>>>,
    /// Receive-order events, already shaped as callbacks.
    ro: VecDeque<FedCallback<T>>,
    /// Retraction handles whose messages must be dropped on dequeue.
    retracted: HashSet<RetractionHandle>,
}

impl<T: LogicalTime> Default for InboundQueues<T> {
    fn default() -> Self {
        Self {
            tso: BinaryHeap::new(),
            ro: VecDeque::new(),
            retracted: HashSet::new(),
        }
    }
}

impl<T: LogicalTime> InboundQueues<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_tso(&mut self, entry: TsoEntry<T>) {
        if let Some(handle) = entry.envelope.retraction {
            if self.retracted.remove(&handle) {
                tracing::debug!(%handle, "Dropping already-retracted message at enqueue.");
                return;
            }
        }
        self.tso.push(Reverse(entry));
    }

    pub fn push_ro(&mut self, callback: FedCallback<T>) {
        self.ro.push_back(callback);
    }

    pub fn pop_ro(&mut self) -> Option<FedCallback<T>> {
        self.ro.pop_front()
    }

    pub fn ro_is_empty(&self) -> bool {
        self.ro.is_empty()
    }

    pub fn tso_len(&self) -> usize {
        self.tso.len()
    }

    /// Position of the earliest queued TSO message, skipping retracted ones.
    pub fn min_tso_position(&mut self) -> Option<TimePosition<T>> {
        self.skim_retracted();
        self.tso.peek().map(|Reverse(entry)| entry.position)
    }

    /// Pop the earliest TSO entry if its position is `<= limit` and, when a
    /// `horizon` is given, strictly below it.
    pub fn pop_tso_within(
        &mut self,
        limit: TimePosition<T>,
        horizon: Option<TimePosition<T>>,
    ) -> Option<TsoEntry<T>> {
        self.skim_retracted();
        let Reverse(head) = self.tso.peek()?;
        if head.position > limit {
            return None;
        }
        if let Some(horizon) = horizon {
            if head.position >= horizon {
                return None;
            }
        }
        self.tso.pop().map(|Reverse(entry)| entry)
    }

    /// Mark a retraction; the matching message is dropped at (or before)
    /// dequeue and never delivered.
    pub fn retract(&mut self, handle: RetractionHandle) {
        self.retracted.insert(handle);
    }

    pub fn is_retracted(&self, handle: &RetractionHandle) -> bool {
        self.retracted.contains(handle)
    }

    /// Drop queued TSO entries with timestamp `<= threshold` (used when time
    /// constrained becomes enabled: those arrived before it was active).
    pub fn drop_tso_at_or_before(&mut self, threshold: T) {
        self.retain_tso(|entry| entry.timestamp > threshold);
    }

    /// Remove queued entries that no longer have a recipient-side referent
    /// (unsubscribed class, removed object).
    pub fn purge_where(&mut self, mut drop: impl FnMut(&MessageEnvelope) -> bool) {
        self.retain_tso(|entry| !drop(&entry.envelope));
    }

    /// Drain every remaining TSO entry (time constrained disabled: delivery
    /// degenerates to receive order).
    pub fn drain_tso(&mut self) -> Vec<TsoEntry<T>> {
        let mut entries: Vec<_> = self
            .tso
            .drain()
            .map(|Reverse(entry)| entry)
            .filter(|entry| {
                entry
                    .envelope
                    .retraction
                    .map_or(true, |h| !self.retracted.contains(&h))
            })
            .collect();
        entries.sort();
        entries
    }

    fn retain_tso(&mut self, mut keep: impl FnMut(&TsoEntry<T>) -> bool) {
        let entries = std::mem::take(&mut self.tso);
        self.tso = entries
            .into_iter()
            .filter(|Reverse(entry)| keep(entry))
            .collect();
    }

    fn skim_retracted(&mut self) {
        while let Some(Reverse(head)) = self.tso.peek() {
            match head.envelope.retraction {
                Some(handle) if self.retracted.contains(&handle) => {
                    tracing::debug!(%handle, "Dropping retracted message at dequeue.");
                    self.tso.pop();
                }
                _ => break,
            }
        }
    }
}
