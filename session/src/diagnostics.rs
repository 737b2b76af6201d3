//! Counters describing the health of a session.

use convoy_core::{StateDigest, Tick};

use crate::mode::LinkHealth;

/// Mismatch between the local and the authority's simulation digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Divergence {
    /// Tick both digests were sampled at.
    pub tick: Tick,
    /// Digest computed locally.
    pub local: StateDigest,
    /// Digest reported by the authority.
    pub remote: StateDigest,
}

/// Protocol and synchronization counters.
///
/// Nothing here stops the simulation; it only reports.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    /// Digest mismatches, oldest first.
    pub divergences: Vec<Divergence>,
    /// Digests that matched the authority's.
    pub hashes_matched: u64,
    /// Latest digest computed locally.
    pub last_digest: Option<(Tick, StateDigest)>,
    /// Relayed or submitted entries dropped as duplicates.
    pub duplicates_dropped: u64,
    /// Sequence numbers that never arrived.
    pub sequence_gaps: u64,
    /// Commands the world rejected.
    pub commands_rejected: u64,
    /// Gated commands withheld from local execution.
    pub commands_gated: u64,
    /// Frames that failed to decode or arrived at the wrong role.
    pub messages_dropped: u64,
    /// Messages the link refused to send.
    pub send_failures: u64,
    /// Freshness of the snapshot stream.
    pub link_health: LinkHealth,
}

impl Diagnostics {
    /// Reports whether any digest mismatch was observed.
    #[must_use]
    pub fn diverged(&self) -> bool {
        !self.divergences.is_empty()
    }
}
