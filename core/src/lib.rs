#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Convoy simulation core.
//!
//! This crate defines the message surface that connects adapters, the
//! authoritative world, and the pure systems. Participants submit [`Command`]
//! values describing desired mutations, the session gates and dispatches them
//! into the world at tick boundaries, and the world reports [`Event`] values
//! describing what changed. Remote authorities publish [`Snapshot`] values
//! that mirrored participants interpolate between.

pub mod wire;

use std::{fmt, time::Duration};

use bitflags::bitflags;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Number of simulation ticks executed per second of wall-clock time.
pub const TICK_RATE_HZ: u32 = 20;

/// Fixed duration of a single simulation tick.
pub const FIXED_TIMESTEP: Duration = Duration::from_millis(50);

/// Cadence, in ticks, at which an authority publishes positional corrections.
pub const POSITION_SYNC_INTERVAL_TICKS: u64 = 3;

/// Cadence, in ticks, at which participants sample the simulation digest.
pub const STATE_HASH_INTERVAL_TICKS: u64 = 60;

/// Version tag embedded in persisted save states.
pub const SAVE_STATE_VERSION: u32 = 1;

/// Discrete unit of simulation time.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Tick(u64);

impl Tick {
    /// The first tick of every session.
    pub const ZERO: Tick = Tick(0);

    /// Creates a tick from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the tick.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Returns the tick that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Reports whether the tick lands on the provided cadence.
    ///
    /// A zero interval never fires.
    #[must_use]
    pub const fn falls_on(&self, interval: u64) -> bool {
        interval != 0 && self.0 % interval == 0
    }

    /// Number of ticks elapsed since `earlier`, saturating at zero.
    #[must_use]
    pub const fn since(&self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Seat number identifying a participant within a session.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SlotId(u8);

impl SlotId {
    /// Slot occupied by the hosting (or offline) participant.
    pub const HOST: SlotId = SlotId(0);

    /// Creates a slot identifier from its numeric value.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the slot.
    #[must_use]
    pub const fn get(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Unique identifier assigned to a unit at spawn time and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a new entity identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit{}", self.0)
    }
}

/// Identifier of a command, namespaced by the slot that minted it.
///
/// Counters are process-local, so two participants may mint the same counter
/// value; the slot prefix keeps the composite identifier unique.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId {
    slot: SlotId,
    counter: u64,
}

impl CommandId {
    /// Creates a composite command identifier.
    #[must_use]
    pub const fn new(slot: SlotId, counter: u64) -> Self {
        Self { slot, counter }
    }

    /// Slot that minted the identifier.
    #[must_use]
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Process-local counter value.
    #[must_use]
    pub const fn counter(&self) -> u64 {
        self.counter
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot.get(), self.counter)
    }
}

/// Role the local process plays within the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Single-player session without any transport.
    Offline,
    /// Participant whose simulation is authoritative for everyone else.
    Host,
    /// Participant consuming the authority's relays and snapshots.
    Guest,
}

impl Role {
    /// Reports whether the role owns the authoritative simulation.
    #[must_use]
    pub const fn is_authority(self) -> bool {
        matches!(self, Self::Offline | Self::Host)
    }
}

/// Directional input keys held for a unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveKeys {
    /// Thrust along the unit's forward axis.
    pub forward: bool,
    /// Thrust against the unit's forward axis.
    pub backward: bool,
    /// Yaw to the left.
    pub left: bool,
    /// Yaw to the right.
    pub right: bool,
}

impl MoveKeys {
    /// No keys held.
    pub const NONE: MoveKeys = MoveKeys {
        forward: false,
        backward: false,
        left: false,
        right: false,
    };

    /// Reports whether any key is held.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.forward || self.backward || self.left || self.right
    }

    /// Combines two key sets, keeping every key pressed in either.
    #[must_use]
    pub const fn union(self, other: MoveKeys) -> Self {
        Self {
            forward: self.forward || other.forward,
            backward: self.backward || other.backward,
            left: self.left || other.left,
            right: self.right || other.right,
        }
    }

    /// Net thrust in the range `-1.0..=1.0`.
    #[must_use]
    pub fn thrust(&self) -> f32 {
        axis(self.forward, self.backward)
    }

    /// Net yaw in the range `-1.0..=1.0`, positive turning left.
    #[must_use]
    pub fn turn(&self) -> f32 {
        axis(self.left, self.right)
    }
}

fn axis(positive: bool, negative: bool) -> f32 {
    match (positive, negative) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    }
}

/// Payload-carrying kinds of commands accepted by the simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Claims the seat of a unit for the issuing slot.
    Select,
    /// Releases the seat of a unit held by the issuing slot.
    Deselect,
    /// Replaces the directional keys steering a unit.
    Move {
        /// Keys held by the issuing participant.
        keys: MoveKeys,
    },
    /// Assigns a pre-sampled waypoint path to a unit.
    SetPath {
        /// Waypoints in world space, visited in order.
        waypoints: Vec<Vec3>,
    },
    /// Turns the unit's current path into a closed loop.
    ClosePath,
}

impl CommandKind {
    /// Reports whether the command only touches client-local seat state.
    ///
    /// UI-only commands bypass the execution gate.
    #[must_use]
    pub const fn is_ui_only(&self) -> bool {
        matches!(self, Self::Select | Self::Deselect)
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Deselect => "deselect",
            Self::Move { .. } => "move",
            Self::SetPath { .. } => "set-path",
            Self::ClosePath => "close-path",
        }
    }
}

/// Input intent targeting a single unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Identifier minted when the command was created.
    pub id: CommandId,
    /// Unit the command applies to.
    pub target: EntityId,
    /// Kind of the command together with its payload.
    pub kind: CommandKind,
    /// Slot of the participant that issued the command.
    pub origin_slot: SlotId,
    /// Per-slot issue order assigned by the originating participant.
    pub sequence: u32,
}

/// Rule deciding how seat selection interacts with unit ownership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeatPolicy {
    /// Selection never changes the owning slot.
    #[default]
    Fixed,
    /// Selecting the unit transfers ownership to the selecting slot.
    Transferable,
}

/// Whether a unit is simulated locally or only mirrors remote state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Presence {
    /// Unit participates in local simulation.
    #[default]
    Simulated,
    /// Visual-only counterpart created for a unit seen in a remote snapshot.
    Passive,
}

bitflags! {
    /// Path-following state published alongside unit poses.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PathFlags: u8 {
        /// A path is assigned to the unit.
        const HAS_PATH = 0b0000_0001;
        /// The assigned path loops back to its first waypoint.
        const CLOSED = 0b0000_0010;
        /// The unit changed position during the last tick.
        const MOVING = 0b0000_0100;
    }
}

/// Position and orientation of a unit in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position in world units.
    pub position: Vec3,
    /// Orientation as a unit quaternion.
    pub orientation: Quat,
}

impl Pose {
    /// Creates a pose from its components.
    #[must_use]
    pub const fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Pose located at `position` with the identity orientation.
    #[must_use]
    pub const fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Blends two poses, linearly for position and spherically for orientation.
    #[must_use]
    pub fn blend(&self, other: &Pose, alpha: f32) -> Pose {
        let alpha = alpha.clamp(0.0, 1.0);
        Pose {
            position: self.position.lerp(other.position, alpha),
            orientation: self.orientation.slerp(other.orientation, alpha),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// Pose a renderer should display for a unit this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderTarget {
    /// Pose to display.
    pub pose: Pose,
    /// Indicates the pose must be applied directly instead of smoothed.
    pub snapped: bool,
}

/// Events broadcast by the world after processing commands and ticks.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Confirms that a unit was created.
    UnitSpawned {
        /// Identifier of the new unit.
        unit: EntityId,
        /// Slot owning the unit.
        owner: SlotId,
        /// Whether the unit is simulated or passive.
        presence: Presence,
    },
    /// Confirms that a slot took the seat of a unit.
    UnitSelected {
        /// Identifier of the selected unit.
        unit: EntityId,
        /// Slot holding the seat.
        slot: SlotId,
    },
    /// Confirms that a slot released the seat of a unit.
    UnitDeselected {
        /// Identifier of the released unit.
        unit: EntityId,
        /// Slot that released the seat.
        slot: SlotId,
    },
    /// Announces that ownership of a unit changed hands.
    SeatTransferred {
        /// Identifier of the transferred unit.
        unit: EntityId,
        /// Previous owner.
        from: SlotId,
        /// New owner.
        to: SlotId,
    },
    /// Confirms that the directional keys of a unit changed.
    MoveKeysChanged {
        /// Identifier of the steered unit.
        unit: EntityId,
        /// Keys now held.
        keys: MoveKeys,
    },
    /// Confirms that a path was assigned to a unit.
    PathAssigned {
        /// Identifier of the unit.
        unit: EntityId,
        /// Number of waypoints in the path.
        waypoints: usize,
    },
    /// Confirms that a unit's path now loops.
    PathClosed {
        /// Identifier of the unit.
        unit: EntityId,
    },
    /// Reports that a unit reached the final waypoint of an open path.
    PathCompleted {
        /// Identifier of the unit.
        unit: EntityId,
    },
    /// Reports that a command could not be applied.
    CommandRejected {
        /// Identifier of the rejected command.
        command: CommandId,
        /// Specific reason the command failed.
        reason: RejectReason,
    },
}

/// Reasons the world may refuse to apply a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// No unit with the targeted identifier exists.
    UnknownUnit,
    /// Another slot holds the seat of the targeted unit.
    SeatLocked,
    /// The issuing slot does not hold the seat it tried to release.
    NotSelectedBySlot,
    /// A path must contain at least one waypoint.
    EmptyPath,
    /// The unit has no path to close.
    NoPath,
    /// Passive counterparts only mirror remote state.
    PassiveUnit,
}

/// Per-unit entry of an authoritative snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotUnit {
    /// Identifier of the unit.
    pub id: EntityId,
    /// Authoritative pose of the unit.
    pub pose: Pose,
    /// Path-following state of the unit.
    pub path_flags: PathFlags,
}

/// Authoritative description of shared unit state at a tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Authority tick the snapshot was captured at.
    pub tick: Tick,
    /// Authority clock reading in milliseconds.
    pub server_time_ms: u64,
    /// Units contained in the snapshot.
    pub units: Vec<SnapshotUnit>,
}

impl Snapshot {
    /// Looks up the entry for `id`, if present.
    #[must_use]
    pub fn unit(&self, id: EntityId) -> Option<&SnapshotUnit> {
        self.units.iter().find(|unit| unit.id == id)
    }

    /// Reports whether the snapshot contains `id`.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.unit(id).is_some()
    }
}

/// Persisted state of the seeded random stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RngState {
    /// Seed the stream was initialised from.
    pub seed: [u8; 32],
    /// Number of 32-bit words consumed from the stream.
    pub word_pos: u128,
}

/// Persisted state of the identifier generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdState {
    /// Next counter value to hand out. Never zero.
    pub next: u64,
}

/// Waypoint path assigned to a unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Waypoints in visiting order.
    pub waypoints: Vec<Vec3>,
    /// Index of the waypoint currently steered towards.
    pub cursor: u32,
    /// Whether the path loops back to its first waypoint.
    pub closed: bool,
}

/// Persisted description of a single unit.
///
/// Seat selection is transient client state and therefore absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Identifier of the unit.
    pub id: EntityId,
    /// Slot owning the unit.
    pub owner_slot: SlotId,
    /// Seat policy applied on selection.
    pub seat_policy: SeatPolicy,
    /// Index of the visual model used for the unit.
    pub model_index: u16,
    /// Current pose.
    pub pose: Pose,
    /// Directional keys currently steering the unit.
    pub move_keys: MoveKeys,
    /// Assigned path, if any.
    pub path: Option<PathRecord>,
    /// Whether the unit is simulated or passive.
    pub presence: Presence,
}

/// Complete persisted state of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    /// Layout version of the persisted state.
    pub version: u32,
    /// Tick the state was captured at.
    pub tick: Tick,
    /// Seeded random stream position.
    pub rng: RngState,
    /// Identifier generator position.
    pub ids: IdState,
    /// Units ordered by identifier.
    pub units: Vec<UnitRecord>,
}

/// SHA-256 digest of serialized simulation state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateDigest([u8; 32]);

impl StateDigest {
    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDigest({self})")
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
