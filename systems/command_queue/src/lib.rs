#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Tick-aligned command buffering and relay sequencing.
//!
//! Producers (local input, network handlers) append to a [`CommandQueue`] at
//! any time; the tick driver drains it exactly once per tick. Authorities
//! stamp dispatched commands with per-slot sequence numbers through a
//! [`RelayOutbox`], and consumers screen relayed entries with a
//! [`SequenceTracker`].

use std::collections::{BTreeMap, VecDeque};

use convoy_core::{
    wire::{CommandBatch, SequencedCommand},
    Command, SlotId, Tick,
};

/// Distance beyond which a sequence number counts as behind.
const HALF_SEQUENCE_RANGE: u32 = u32::MAX / 2;

/// Where a queued command entered the local process from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandSource {
    /// Issued by local input.
    Local,
    /// Submitted by a guest to this authority.
    Submitted,
    /// Relayed by the authority in a command batch.
    Relayed,
}

impl CommandSource {
    /// Reports whether the command arrived inside an authority batch.
    #[must_use]
    pub const fn is_relayed(self) -> bool {
        matches!(self, Self::Relayed)
    }
}

/// Command awaiting dispatch, together with its provenance.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedCommand {
    /// The buffered command.
    pub command: Command,
    /// Where the command came from.
    pub source: CommandSource,
}

impl QueuedCommand {
    /// Wraps a locally issued command.
    #[must_use]
    pub const fn local(command: Command) -> Self {
        Self {
            command,
            source: CommandSource::Local,
        }
    }

    /// Wraps a command submitted by a guest.
    #[must_use]
    pub const fn submitted(command: Command) -> Self {
        Self {
            command,
            source: CommandSource::Submitted,
        }
    }

    /// Wraps a command taken from an authority batch.
    #[must_use]
    pub const fn relayed(command: Command) -> Self {
        Self {
            command,
            source: CommandSource::Relayed,
        }
    }
}

/// Commands drained for dispatch at a specific tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushedBatch {
    /// Tick the commands are dispatched at.
    pub tick: Tick,
    /// Commands in enqueue order.
    pub commands: Vec<QueuedCommand>,
}

impl FlushedBatch {
    /// Reports whether nothing was drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Append-only FIFO of input intents, drained once per tick.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command. Never blocks and never drops.
    pub fn enqueue(&mut self, queued: QueuedCommand) {
        self.pending.push_back(queued);
    }

    /// Returns and clears everything buffered, stamped with `tick`.
    pub fn flush(&mut self, tick: Tick) -> FlushedBatch {
        FlushedBatch {
            tick,
            commands: self.pending.drain(..).collect(),
        }
    }

    /// Number of commands awaiting the next flush.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Authority-side buffer that sequences dispatched commands for relay.
#[derive(Debug, Default)]
pub struct RelayOutbox {
    next_seq: BTreeMap<SlotId, u32>,
    pending: Vec<SequencedCommand>,
}

impl RelayOutbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the command with the next sequence number of its origin slot.
    pub fn push(&mut self, command: Command) -> u32 {
        let slot = command.origin_slot;
        let counter = self.next_seq.entry(slot).or_insert(0);
        let seq = *counter;
        *counter = counter.wrapping_add(1);
        self.pending.push(SequencedCommand { slot, seq, command });
        seq
    }

    /// Number of commands awaiting relay.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drains pending commands into a single batch for `tick`.
    pub fn drain(&mut self, tick: Tick) -> Option<CommandBatch> {
        if self.pending.is_empty() {
            return None;
        }
        Some(CommandBatch {
            tick,
            entries: std::mem::take(&mut self.pending),
        })
    }
}

/// Outcome of screening a sequenced entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceVerdict {
    /// The entry is the next one expected.
    InOrder,
    /// Entries were skipped; the entry is accepted anyway.
    Gap {
        /// Number of sequence numbers that never arrived.
        missing: u32,
    },
    /// The entry was already seen and must be dropped.
    Duplicate,
}

impl SequenceVerdict {
    /// Reports whether the entry should be dispatched.
    #[must_use]
    pub const fn accepts(self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Consumer-side per-slot sequence screen.
///
/// Gaps are reported but never retried; convergence relies on the next
/// authoritative correction.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    expected: BTreeMap<SlotId, u32>,
}

impl SequenceTracker {
    /// Creates a tracker that expects sequence zero from every slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Screens `seq` from `slot`, advancing the expectation when accepted.
    ///
    /// Sequence numbers wrap like the outbox counter: anything within half
    /// the `u32` range behind the expectation is a duplicate, anything ahead
    /// of it a gap.
    pub fn observe(&mut self, slot: SlotId, seq: u32) -> SequenceVerdict {
        let expected = self.expected.entry(slot).or_insert(0);
        let ahead = seq.wrapping_sub(*expected);
        if ahead > HALF_SEQUENCE_RANGE {
            log::debug!("dropping duplicate relay {slot} seq {seq} (expected {expected})");
            return SequenceVerdict::Duplicate;
        }

        let verdict = if ahead == 0 {
            SequenceVerdict::InOrder
        } else {
            log::warn!("relay gap from {slot}: {ahead} entries missing before seq {seq}");
            SequenceVerdict::Gap { missing: ahead }
        };
        *expected = seq.wrapping_add(1);
        verdict
    }

    /// Next sequence number expected from `slot`.
    #[must_use]
    pub fn expected(&self, slot: SlotId) -> u32 {
        self.expected.get(&slot).copied().unwrap_or(0)
    }

    /// Forgets every expectation.
    pub fn reset(&mut self) {
        self.expected.clear();
    }
}
