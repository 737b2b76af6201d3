#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic randomness and identifier generation.
//!
//! A session owns exactly one [`Determinism`] instance and passes it by
//! reference to whatever needs random draws or fresh identifiers. Two
//! participants that start from the same seed and consume the same draws in
//! the same order therefore derive identical values, and both streams can be
//! captured and restored across save/load or a rejoin.

use convoy_core::{CommandId, EntityId, IdState, RngState, SlotId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ChaCha addresses its keystream with a 68-bit word counter.
const WORD_POS_BITS: u32 = 68;

/// Errors raised when restoring deterministic state.
///
/// A failed restore never modifies the target.
#[derive(Debug, Error)]
pub enum StateError {
    /// The identifier counter must never restart at zero.
    #[error("identifier counter must be non-zero")]
    ZeroCounter,
    /// The stream position exceeds the generator's addressable range.
    #[error("rng word position {0} exceeds the 68-bit stream range")]
    WordPositionOutOfRange(u128),
    /// The encoded state could not be decoded.
    #[error("malformed deterministic state payload")]
    Malformed(#[source] bincode::Error),
    /// The state could not be encoded.
    #[error("failed to encode deterministic state")]
    Encode(#[source] bincode::Error),
}

/// Seeded pseudo-random stream shared by everything derived deterministically.
#[derive(Clone, Debug)]
pub struct SeededRng {
    rng: ChaCha8Rng,
}

impl SeededRng {
    /// Creates a stream from a 64-bit session seed.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draws the next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Draws a value in `[low, high)`.
    pub fn next_range(&mut self, low: f32, high: f32) -> f32 {
        let unit = self.next_f64() as f32;
        low + (high - low) * unit
    }

    /// Draws a value in `[0, len)`, such as a model index. Returns zero for
    /// an empty range.
    pub fn next_below(&mut self, len: u16) -> u16 {
        if len == 0 {
            return 0;
        }
        let scaled = (self.next_f64() * f64::from(len)) as u16;
        scaled.min(len - 1)
    }

    /// Captures the exact stream position.
    #[must_use]
    pub fn state(&self) -> RngState {
        RngState {
            seed: self.rng.get_seed(),
            word_pos: self.rng.get_word_pos(),
        }
    }

    /// Rewinds or fast-forwards the stream to a captured position.
    pub fn restore(&mut self, state: RngState) -> Result<(), StateError> {
        self.rng = rng_from_state(state)?;
        Ok(())
    }
}

fn rng_from_state(state: RngState) -> Result<ChaCha8Rng, StateError> {
    if state.word_pos >> WORD_POS_BITS != 0 {
        return Err(StateError::WordPositionOutOfRange(state.word_pos));
    }
    let mut rng = ChaCha8Rng::from_seed(state.seed);
    rng.set_word_pos(state.word_pos);
    Ok(rng)
}

/// Monotonic counter handing out entity and command identifiers.
#[derive(Clone, Debug)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    /// Creates a generator whose first identifier is `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns a fresh entity identifier.
    pub fn next_entity_id(&mut self) -> EntityId {
        EntityId::new(self.bump())
    }

    /// Returns a fresh command identifier namespaced by `slot`.
    pub fn next_command_id(&mut self, slot: SlotId) -> CommandId {
        CommandId::new(slot, self.bump())
    }

    /// Captures the counter position.
    #[must_use]
    pub const fn state(&self) -> IdState {
        IdState { next: self.next }
    }

    /// Restores a captured counter position.
    pub fn restore(&mut self, state: IdState) -> Result<(), StateError> {
        validate_ids(state)?;
        self.next = state.next;
        Ok(())
    }

    fn bump(&mut self) -> u64 {
        let value = self.next;
        self.next = self.next.saturating_add(1);
        value
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_ids(state: IdState) -> Result<(), StateError> {
    if state.next == 0 {
        return Err(StateError::ZeroCounter);
    }
    Ok(())
}

/// Captured state of both deterministic streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterminismState {
    /// Random stream position.
    pub rng: RngState,
    /// Identifier counter position.
    pub ids: IdState,
}

/// The per-session pair of deterministic streams.
#[derive(Clone, Debug)]
pub struct Determinism {
    rng: SeededRng,
    ids: IdGenerator,
}

impl Determinism {
    /// Creates both streams for a session seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SeededRng::from_seed(seed),
            ids: IdGenerator::new(),
        }
    }

    /// Mutable access to the random stream.
    pub fn rng(&mut self) -> &mut SeededRng {
        &mut self.rng
    }

    /// Mutable access to the identifier generator.
    pub fn ids(&mut self) -> &mut IdGenerator {
        &mut self.ids
    }

    /// Captures both streams.
    #[must_use]
    pub fn state(&self) -> DeterminismState {
        DeterminismState {
            rng: self.rng.state(),
            ids: self.ids.state(),
        }
    }

    /// Restores both streams, or neither when either half is malformed.
    pub fn restore(&mut self, state: DeterminismState) -> Result<(), StateError> {
        validate_ids(state.ids)?;
        let rng = rng_from_state(state.rng)?;
        self.rng.rng = rng;
        self.ids.next = state.ids.next;
        log::debug!(
            "restored deterministic streams (next id {}, word {})",
            state.ids.next,
            state.rng.word_pos
        );
        Ok(())
    }

    /// Encodes both streams into an opaque payload.
    pub fn encode_state(&self) -> Result<Vec<u8>, StateError> {
        bincode::serialize(&self.state()).map_err(StateError::Encode)
    }

    /// Restores both streams from a payload produced by [`Self::encode_state`].
    pub fn restore_encoded(&mut self, bytes: &[u8]) -> Result<(), StateError> {
        let state: DeterminismState = match bincode::deserialize(bytes) {
            Ok(state) => state,
            Err(error) => {
                log::warn!("rejected deterministic state payload of {} bytes", bytes.len());
                return Err(StateError::Malformed(error));
            }
        };
        self.restore(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_below_stays_in_range() {
        let mut rng = SeededRng::from_seed(7);
        for _ in 0..256 {
            assert!(rng.next_below(3) < 3);
        }
        assert_eq!(rng.next_below(0), 0);
        assert!(rng.next_below(u16::MAX) < u16::MAX);
    }

    #[test]
    fn identifiers_start_at_one() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_entity_id(), EntityId::new(1));
        assert_eq!(
            ids.next_command_id(SlotId::new(2)),
            CommandId::new(SlotId::new(2), 2)
        );
    }

    #[test]
    fn oversized_word_position_is_rejected() {
        let mut rng = SeededRng::from_seed(1);
        let mut state = rng.state();
        state.word_pos = 1u128 << 70;
        assert!(matches!(
            rng.restore(state),
            Err(StateError::WordPositionOutOfRange(_))
        ));
    }
}
