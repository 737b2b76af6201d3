//! Latching of directional input between upstream sends.

use std::collections::BTreeMap;

use convoy_core::{wire::MoveInput, EntityId, MoveKeys};

/// OR-latches directional keys per unit until the next send.
///
/// A key tapped and released between two sends is still reported once. A
/// unit whose keys are idle and unchanged produces no message.
#[derive(Clone, Debug, Default)]
pub struct InputLatch {
    held: BTreeMap<EntityId, MoveKeys>,
    latched: BTreeMap<EntityId, MoveKeys>,
    sent: BTreeMap<EntityId, MoveKeys>,
}

impl InputLatch {
    /// Creates an empty latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the keys currently held for `unit`.
    pub fn press(&mut self, unit: EntityId, keys: MoveKeys) {
        let _ = self.held.insert(unit, keys);
        let latched = self.latched.entry(unit).or_insert(MoveKeys::NONE);
        *latched = latched.union(keys);
    }

    /// Number of units with latched input.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latched.len()
    }

    /// Reports whether nothing is latched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latched.is_empty()
    }

    /// Produces the messages to send and re-arms the latch with held keys.
    pub fn drain(&mut self) -> Vec<MoveInput> {
        let latched = std::mem::replace(&mut self.latched, self.held.clone());
        let mut messages = Vec::new();
        for (unit, keys) in latched {
            let previous = self.sent.insert(unit, keys);
            if keys.any() || previous != Some(keys) {
                messages.push(MoveInput::new(unit, keys));
            }
        }
        messages
    }

    /// Forgets every latched and held key.
    pub fn clear(&mut self) {
        self.held.clear();
        self.latched.clear();
        self.sent.clear();
    }
}
