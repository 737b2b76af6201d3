#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Capture, persistence and hashing of complete session state.
//!
//! A [`SaveState`] bundles the tick counter, both deterministic streams and
//! every unit record. Seat selection is transient client state and never
//! reaches the persisted bytes, so saving, restoring into a fresh session and
//! saving again yields identical bytes.

use convoy_core::{
    Presence, SaveState, SeatPolicy, StateDigest, Tick, UnitRecord, SAVE_STATE_VERSION,
};
use convoy_system_determinism::{Determinism, DeterminismState, StateError};
use convoy_world::{query, World};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while encoding, decoding or restoring a save state.
///
/// A failed restore leaves the target session untouched.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The state could not be encoded.
    #[error("failed to encode save state")]
    Encode(#[source] bincode::Error),
    /// The payload is not a save state.
    #[error("malformed save state payload of {len} bytes")]
    Malformed {
        /// Length of the rejected payload.
        len: usize,
        /// Decoder failure.
        #[source]
        source: bincode::Error,
    },
    /// The payload was written by an incompatible layout version.
    #[error("save state version {found} is not supported (expected {expected})")]
    UnsupportedVersion {
        /// Version tag found in the payload.
        found: u32,
        /// Version tag this build writes.
        expected: u32,
    },
    /// The deterministic streams could not be restored.
    #[error(transparent)]
    Determinism(#[from] StateError),
}

/// World and tick reconstructed from a save state.
#[derive(Clone, Debug)]
pub struct Restored {
    /// Rebuilt world.
    pub world: World,
    /// Tick the simulation continues from.
    pub tick: Tick,
}

/// Captures the complete state of a session at `tick`.
#[must_use]
pub fn capture(world: &World, tick: Tick, determinism: &Determinism) -> SaveState {
    let DeterminismState { rng, ids } = determinism.state();
    SaveState {
        version: SAVE_STATE_VERSION,
        tick,
        rng,
        ids,
        units: query::unit_records(world),
    }
}

/// Encodes a save state into bytes.
pub fn encode(state: &SaveState) -> Result<Vec<u8>, SurfaceError> {
    bincode::serialize(state).map_err(SurfaceError::Encode)
}

/// Decodes bytes produced by [`encode`], rejecting foreign layout versions.
pub fn decode(bytes: &[u8]) -> Result<SaveState, SurfaceError> {
    let state: SaveState =
        bincode::deserialize(bytes).map_err(|source| SurfaceError::Malformed {
            len: bytes.len(),
            source,
        })?;
    check_version(state.version)?;
    Ok(state)
}

/// Restores the deterministic streams and rebuilds the world from `state`.
///
/// `determinism` is only modified when the whole state is valid.
pub fn restore(
    state: SaveState,
    determinism: &mut Determinism,
    seat_policy: SeatPolicy,
) -> Result<Restored, SurfaceError> {
    check_version(state.version)?;
    determinism.restore(DeterminismState {
        rng: state.rng,
        ids: state.ids,
    })?;
    log::info!(
        "restored {} units at tick {}",
        state.units.len(),
        state.tick
    );
    Ok(Restored {
        world: World::from_records(state.units, seat_policy),
        tick: state.tick,
    })
}

fn check_version(found: u32) -> Result<(), SurfaceError> {
    if found != SAVE_STATE_VERSION {
        return Err(SurfaceError::UnsupportedVersion {
            found,
            expected: SAVE_STATE_VERSION,
        });
    }
    Ok(())
}

/// SHA-256 digest of an encoded save state.
#[must_use]
pub fn digest(bytes: &[u8]) -> StateDigest {
    finish(Sha256::new_with_prefix(bytes))
}

/// Digest of the shared simulation at `tick`.
///
/// Covers the id, model and pose of simulated units only. Participants with a
/// closed execution gate never hold move keys or paths and converge through
/// position syncs, so only the synced pose is comparable. Ownership, seat
/// selection, passive counterparts and the deterministic streams stay out of
/// the hash as well.
#[must_use]
pub fn simulation_digest(tick: Tick, world: &World) -> StateDigest {
    let mut hasher = Sha256::new();
    hasher.update(tick.get().to_le_bytes());
    for record in query::unit_records(world) {
        if record.presence == Presence::Simulated {
            hash_unit(&mut hasher, &record);
        }
    }
    finish(hasher)
}

fn finish(hasher: Sha256) -> StateDigest {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    StateDigest::from_bytes(bytes)
}

fn hash_unit(hasher: &mut Sha256, record: &UnitRecord) {
    hasher.update(record.id.get().to_le_bytes());
    hasher.update(record.model_index.to_le_bytes());
    for value in record.pose.position.to_array() {
        hasher.update(value.to_bits().to_le_bytes());
    }
    for value in record.pose.orientation.to_array() {
        hasher.update(value.to_bits().to_le_bytes());
    }
}
