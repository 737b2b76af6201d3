//! Wire messages exchanged between participants and their binary codec.
//!
//! Transports only move opaque byte frames; this module owns the frame
//! layout. Every frame carries an [`Envelope`] whose version must match
//! [`WIRE_VERSION`] exactly.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Command, EntityId, MoveKeys, Pose, SlotId, Snapshot, StateDigest, Tick};

/// Version tag embedded in every encoded frame.
pub const WIRE_VERSION: u16 = 1;

/// Latched directional input forwarded by a mirrored participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInput {
    /// Thrust along the unit's forward axis.
    pub forward: bool,
    /// Thrust against the unit's forward axis.
    pub backward: bool,
    /// Yaw to the left.
    pub left: bool,
    /// Yaw to the right.
    pub right: bool,
    /// Unit the input steers.
    pub unit: EntityId,
}

impl MoveInput {
    /// Builds an input message from a key set.
    #[must_use]
    pub const fn new(unit: EntityId, keys: MoveKeys) -> Self {
        Self {
            forward: keys.forward,
            backward: keys.backward,
            left: keys.left,
            right: keys.right,
            unit,
        }
    }

    /// Key set carried by the message.
    #[must_use]
    pub const fn keys(&self) -> MoveKeys {
        MoveKeys {
            forward: self.forward,
            backward: self.backward,
            left: self.left,
            right: self.right,
        }
    }
}

/// Command tagged with the per-slot sequence number used for relaying.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequencedCommand {
    /// Slot the command originated from.
    pub slot: SlotId,
    /// Monotonically increasing per-slot counter.
    pub seq: u32,
    /// The command itself.
    pub command: Command,
}

/// Ordered batch of commands the authority executed during a tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Authority tick at which the commands were dispatched.
    pub tick: Tick,
    /// Commands in dispatch order.
    pub entries: Vec<SequencedCommand>,
}

/// Initial placement of a unit announced by the authority.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpawnEntry {
    /// Identifier assigned to the unit.
    pub id: EntityId,
    /// Slot owning the unit.
    pub owner_slot: SlotId,
    /// Index of the visual model used for the unit.
    pub model_index: u16,
    /// Spawn position in world units.
    pub position: Vec3,
}

/// Set of units every participant must create.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpawnManifest {
    /// Units in identifier order.
    pub entries: Vec<SpawnEntry>,
}

/// Authoritative pose of a single unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    /// Identifier of the unit.
    pub id: EntityId,
    /// Authoritative pose.
    pub pose: Pose,
}

/// Positional correction published at a reduced cadence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSync {
    /// Authority tick the poses were captured at.
    pub tick: Tick,
    /// Poses in identifier order.
    pub entries: Vec<PositionEntry>,
}

/// Periodic digest of the authority's simulation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHashReport {
    /// Tick the digest was sampled at.
    pub tick: Tick,
    /// Digest of the simulation state after that tick.
    pub digest: StateDigest,
}

/// Every message kind produced or consumed by the simulation core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Latched input from a mirrored participant to the authority.
    MoveInput(MoveInput),
    /// Command a guest asks the authority to execute and relay.
    CmdSubmit(SequencedCommand),
    /// Commands relayed by the authority.
    CmdBatch(CommandBatch),
    /// Authoritative snapshot pushed into mirrors' snapshot buffers.
    ServerSnapshot(Snapshot),
    /// Idempotent unit creation list.
    SpawnManifest(SpawnManifest),
    /// Reduced-cadence positional correction.
    PositionSync(PositionSync),
    /// Divergence-detection digest.
    StateHash(StateHashReport),
}

impl WireMessage {
    /// Short name used in diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MoveInput(_) => "MOVE_INPUT",
            Self::CmdSubmit(_) => "CMD_SUBMIT",
            Self::CmdBatch(_) => "CMD_BATCH",
            Self::ServerSnapshot(_) => "SERVER_SNAPSHOT",
            Self::SpawnManifest(_) => "SPAWN_MANIFEST",
            Self::PositionSync(_) => "POSITION_SYNC",
            Self::StateHash(_) => "STATE_HASH",
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u16,
    message: &'a WireMessage,
}

/// Versioned frame wrapping a single message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Frame layout version.
    pub version: u16,
    /// Wrapped message.
    pub message: WireMessage,
}

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// The message could not be serialized.
    #[error("failed to encode {label} frame")]
    Encode {
        /// Kind of the message being encoded.
        label: &'static str,
        /// Underlying serializer failure.
        #[source]
        source: bincode::Error,
    },
    /// The frame is truncated, corrupt, or names an unknown message kind.
    #[error("failed to decode frame of {len} bytes")]
    Decode {
        /// Length of the rejected frame.
        len: usize,
        /// Underlying deserializer failure.
        #[source]
        source: bincode::Error,
    },
    /// The frame was produced by an incompatible peer.
    #[error("unsupported wire version {found} (expected {WIRE_VERSION})")]
    UnsupportedVersion {
        /// Version found in the frame.
        found: u16,
    },
}

/// Encodes a message into a versioned frame.
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, WireError> {
    bincode::serialize(&EnvelopeRef {
        version: WIRE_VERSION,
        message,
    })
    .map_err(|source| WireError::Encode {
        label: message.label(),
        source,
    })
}

/// Decodes a versioned frame into a message.
pub fn decode(bytes: &[u8]) -> Result<WireMessage, WireError> {
    let envelope: Envelope = bincode::deserialize(bytes).map_err(|source| WireError::Decode {
        len: bytes.len(),
        source,
    })?;
    if envelope.version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion {
            found: envelope.version,
        });
    }
    Ok(envelope.message)
}
