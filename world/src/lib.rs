#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative unit state for the Convoy simulation core.
//!
//! The world only changes through the free functions of this crate: [`apply`]
//! executes a single already-gated command, [`advance`] runs one tick of unit
//! physics, and the `apply_*` helpers fold authority messages back in. Units
//! are kept in identifier order so every traversal is deterministic.

use std::{collections::BTreeMap, f32::consts::FRAC_PI_2, time::Duration};

use convoy_core::{
    wire::{PositionSync, SpawnEntry, SpawnManifest},
    Command, CommandId, CommandKind, EntityId, Event, MoveKeys, PathFlags, PathRecord, Pose,
    Presence, RejectReason, RenderTarget, SeatPolicy, SlotId, UnitRecord,
};
use glam::{Quat, Vec3};

/// Linear speed of a unit steered by move keys, in world units per second.
pub const MOVE_SPEED: f32 = 6.0;
/// Angular speed of a unit steered by move keys, in radians per second.
pub const TURN_RATE: f32 = FRAC_PI_2;
/// Linear speed of a unit following a path, in world units per second.
pub const PATH_SPEED: f32 = 4.0;
/// Distance under which a waypoint counts as reached.
pub const ARRIVAL_EPSILON: f32 = 0.05;

/// Represents the authoritative Convoy world state.
#[derive(Clone, Debug, Default)]
pub struct World {
    units: BTreeMap<EntityId, Unit>,
    seat_policy: SeatPolicy,
}

impl World {
    /// Creates an empty world whose units use [`SeatPolicy::Fixed`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty world whose spawned units use `seat_policy`.
    #[must_use]
    pub fn with_seat_policy(seat_policy: SeatPolicy) -> Self {
        Self {
            units: BTreeMap::new(),
            seat_policy,
        }
    }

    /// Rebuilds a world from persisted unit records.
    #[must_use]
    pub fn from_records(records: Vec<UnitRecord>, seat_policy: SeatPolicy) -> Self {
        let units = records
            .into_iter()
            .map(|record| (record.id, Unit::from_record(record)))
            .collect();
        Self { units, seat_policy }
    }

    fn insert(&mut self, unit: Unit, out_events: &mut Vec<Event>) {
        out_events.push(Event::UnitSpawned {
            unit: unit.id,
            owner: unit.owner_slot,
            presence: unit.presence,
        });
        let _ = self.units.insert(unit.id, unit);
    }
}

/// Applies the provided command to the world, mutating state deterministically.
///
/// Gating has already happened; every command reaching this function is
/// executed or rejected with [`Event::CommandRejected`].
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    let Command {
        id,
        target,
        kind,
        origin_slot,
        ..
    } = command;

    let Some(unit) = world.units.get_mut(&target) else {
        reject(id, RejectReason::UnknownUnit, out_events);
        return;
    };

    if !kind.is_ui_only() && unit.presence == Presence::Passive {
        reject(id, RejectReason::PassiveUnit, out_events);
        return;
    }

    match kind {
        CommandKind::Select => {
            if let Some(holder) = unit.selected_by {
                if holder != origin_slot {
                    reject(id, RejectReason::SeatLocked, out_events);
                    return;
                }
            }
            unit.selected_by = Some(origin_slot);
            out_events.push(Event::UnitSelected {
                unit: target,
                slot: origin_slot,
            });
            if unit.seat_policy == SeatPolicy::Transferable && unit.owner_slot != origin_slot {
                let from = unit.owner_slot;
                unit.owner_slot = origin_slot;
                out_events.push(Event::SeatTransferred {
                    unit: target,
                    from,
                    to: origin_slot,
                });
            }
        }
        CommandKind::Deselect => {
            if unit.selected_by != Some(origin_slot) {
                reject(id, RejectReason::NotSelectedBySlot, out_events);
                return;
            }
            unit.selected_by = None;
            out_events.push(Event::UnitDeselected {
                unit: target,
                slot: origin_slot,
            });
        }
        CommandKind::Move { keys } => {
            if unit.move_keys != keys {
                unit.move_keys = keys;
                out_events.push(Event::MoveKeysChanged { unit: target, keys });
            }
        }
        CommandKind::SetPath { waypoints } => {
            if waypoints.is_empty() {
                reject(id, RejectReason::EmptyPath, out_events);
                return;
            }
            let count = waypoints.len();
            unit.path = Some(PathRecord {
                waypoints,
                cursor: 0,
                closed: false,
            });
            out_events.push(Event::PathAssigned {
                unit: target,
                waypoints: count,
            });
        }
        CommandKind::ClosePath => {
            let Some(path) = unit.path.as_mut() else {
                reject(id, RejectReason::NoPath, out_events);
                return;
            };
            path.closed = true;
            out_events.push(Event::PathClosed { unit: target });
        }
    }
}

fn reject(command: CommandId, reason: RejectReason, out_events: &mut Vec<Event>) {
    log::warn!("dropping command {command}: {reason:?}");
    out_events.push(Event::CommandRejected { command, reason });
}

/// Runs one tick of unit physics for every simulated unit.
pub fn advance(world: &mut World, dt: Duration, out_events: &mut Vec<Event>) {
    let seconds = dt.as_secs_f32();
    for unit in world.units.values_mut() {
        if unit.presence == Presence::Simulated {
            unit.advance(seconds, out_events);
        }
    }
}

/// Creates every manifest unit that does not exist yet.
///
/// Applying the same manifest twice creates nothing the second time.
/// Returns the number of units created.
pub fn apply_manifest(
    world: &mut World,
    manifest: &SpawnManifest,
    out_events: &mut Vec<Event>,
) -> usize {
    let mut created = 0;
    for entry in &manifest.entries {
        if let Some(existing) = world.units.get_mut(&entry.id) {
            if existing.presence == Presence::Passive {
                existing.owner_slot = entry.owner_slot;
                existing.model_index = entry.model_index;
            }
            continue;
        }
        let unit = Unit::spawned(entry, world.seat_policy);
        world.insert(unit, out_events);
        created += 1;
    }
    if created > 0 {
        log::info!("spawned {created} units from manifest");
    }
    created
}

/// Overwrites the pose of every known simulated unit listed in `sync`.
///
/// Returns the number of corrected units.
pub fn apply_position_sync(world: &mut World, sync: &PositionSync) -> usize {
    let mut corrected = 0;
    for entry in &sync.entries {
        match world.units.get_mut(&entry.id) {
            Some(unit) if unit.presence == Presence::Simulated => {
                unit.snap_to(entry.pose);
                corrected += 1;
            }
            Some(_) => {}
            None => log::debug!("position sync {} names unknown {}", sync.tick, entry.id),
        }
    }
    corrected
}

/// Creates a passive visual-only counterpart for `id` unless one exists.
///
/// Returns `true` when a unit was created.
pub fn ensure_passive(
    world: &mut World,
    id: EntityId,
    pose: Pose,
    out_events: &mut Vec<Event>,
) -> bool {
    if world.units.contains_key(&id) {
        return false;
    }
    log::info!("creating passive counterpart for {id}");
    let mut unit = Unit::spawned(
        &SpawnEntry {
            id,
            owner_slot: SlotId::HOST,
            model_index: 0,
            position: pose.position,
        },
        world.seat_policy,
    );
    unit.presence = Presence::Passive;
    unit.snap_to(pose);
    world.insert(unit, out_events);
    true
}

/// Writes the pose a renderer should display for `id`.
///
/// Returns `false` when the unit does not exist.
pub fn set_render_target(world: &mut World, id: EntityId, target: RenderTarget) -> bool {
    match world.units.get_mut(&id) {
        Some(unit) => {
            unit.render = target;
            true
        }
        None => false,
    }
}

/// Blends the previous and current tick poses of simulated units.
pub fn apply_local_render(world: &mut World, alpha: f32) {
    for unit in world.units.values_mut() {
        if unit.presence == Presence::Simulated {
            unit.render = RenderTarget {
                pose: unit.previous.blend(&unit.pose, alpha),
                snapped: false,
            };
        }
    }
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use convoy_core::{
        wire::PositionEntry, EntityId, MoveKeys, PathFlags, Pose, Presence, RenderTarget,
        SeatPolicy, SlotId, SnapshotUnit, UnitRecord,
    };

    use super::World;

    /// Immutable representation of a single unit's state used for queries.
    #[derive(Clone, Debug, PartialEq)]
    pub struct UnitView {
        /// Identifier of the unit.
        pub id: EntityId,
        /// Slot owning the unit.
        pub owner_slot: SlotId,
        /// Slot currently holding the seat, if any.
        pub selected_by_slot: Option<SlotId>,
        /// Seat policy applied on selection.
        pub seat_policy: SeatPolicy,
        /// Index of the visual model used for the unit.
        pub model_index: u16,
        /// Simulation pose after the last tick.
        pub pose: Pose,
        /// Pose the renderer should display.
        pub render: RenderTarget,
        /// Directional keys steering the unit.
        pub move_keys: MoveKeys,
        /// Path-following state.
        pub path_flags: PathFlags,
        /// Whether the unit is simulated or passive.
        pub presence: Presence,
    }

    /// Number of units in the world.
    #[must_use]
    pub fn unit_count(world: &World) -> usize {
        world.units.len()
    }

    /// Reports whether `id` exists.
    #[must_use]
    pub fn contains(world: &World, id: EntityId) -> bool {
        world.units.contains_key(&id)
    }

    /// Captures a view of a single unit.
    #[must_use]
    pub fn unit(world: &World, id: EntityId) -> Option<UnitView> {
        world.units.get(&id).map(|unit| unit.view())
    }

    /// Captures views of every unit in identifier order.
    #[must_use]
    pub fn units(world: &World) -> Vec<UnitView> {
        world.units.values().map(|unit| unit.view()).collect()
    }

    /// Persistable records of every unit in identifier order.
    #[must_use]
    pub fn unit_records(world: &World) -> Vec<UnitRecord> {
        world.units.values().map(|unit| unit.record()).collect()
    }

    /// Snapshot entries for every simulated unit in identifier order.
    #[must_use]
    pub fn snapshot_units(world: &World) -> Vec<SnapshotUnit> {
        world
            .units
            .values()
            .filter(|unit| unit.presence == Presence::Simulated)
            .map(|unit| SnapshotUnit {
                id: unit.id,
                pose: unit.pose,
                path_flags: unit.path_flags(),
            })
            .collect()
    }

    /// Positional correction entries for every simulated unit.
    #[must_use]
    pub fn position_entries(world: &World) -> Vec<PositionEntry> {
        world
            .units
            .values()
            .filter(|unit| unit.presence == Presence::Simulated)
            .map(|unit| PositionEntry {
                id: unit.id,
                pose: unit.pose,
            })
            .collect()
    }

    /// Render targets of every unit in identifier order.
    #[must_use]
    pub fn render_targets(world: &World) -> Vec<(EntityId, RenderTarget)> {
        world
            .units
            .values()
            .map(|unit| (unit.id, unit.render))
            .collect()
    }
}

#[derive(Clone, Debug)]
struct Unit {
    id: EntityId,
    owner_slot: SlotId,
    selected_by: Option<SlotId>,
    seat_policy: SeatPolicy,
    model_index: u16,
    pose: Pose,
    previous: Pose,
    render: RenderTarget,
    move_keys: MoveKeys,
    path: Option<PathRecord>,
    presence: Presence,
    moving: bool,
}

impl Unit {
    fn spawned(entry: &SpawnEntry, seat_policy: SeatPolicy) -> Self {
        let pose = Pose::at(entry.position);
        Self {
            id: entry.id,
            owner_slot: entry.owner_slot,
            selected_by: None,
            seat_policy,
            model_index: entry.model_index,
            pose,
            previous: pose,
            render: RenderTarget {
                pose,
                snapped: true,
            },
            move_keys: MoveKeys::NONE,
            path: None,
            presence: Presence::Simulated,
            moving: false,
        }
    }

    fn from_record(record: UnitRecord) -> Self {
        Self {
            id: record.id,
            owner_slot: record.owner_slot,
            selected_by: None,
            seat_policy: record.seat_policy,
            model_index: record.model_index,
            pose: record.pose,
            previous: record.pose,
            render: RenderTarget {
                pose: record.pose,
                snapped: true,
            },
            move_keys: record.move_keys,
            path: record.path,
            presence: record.presence,
            moving: false,
        }
    }

    fn record(&self) -> UnitRecord {
        UnitRecord {
            id: self.id,
            owner_slot: self.owner_slot,
            seat_policy: self.seat_policy,
            model_index: self.model_index,
            pose: self.pose,
            move_keys: self.move_keys,
            path: self.path.clone(),
            presence: self.presence,
        }
    }

    fn view(&self) -> query::UnitView {
        query::UnitView {
            id: self.id,
            owner_slot: self.owner_slot,
            selected_by_slot: self.selected_by,
            seat_policy: self.seat_policy,
            model_index: self.model_index,
            pose: self.pose,
            render: self.render,
            move_keys: self.move_keys,
            path_flags: self.path_flags(),
            presence: self.presence,
        }
    }

    fn path_flags(&self) -> PathFlags {
        let mut flags = PathFlags::empty();
        if let Some(path) = &self.path {
            flags |= PathFlags::HAS_PATH;
            if path.closed {
                flags |= PathFlags::CLOSED;
            }
        }
        if self.moving {
            flags |= PathFlags::MOVING;
        }
        flags
    }

    fn snap_to(&mut self, pose: Pose) {
        self.pose = pose;
        self.previous = pose;
        self.render = RenderTarget {
            pose,
            snapped: true,
        };
    }

    fn advance(&mut self, seconds: f32, out_events: &mut Vec<Event>) {
        self.previous = self.pose;
        let before = self.pose.position;

        if self.move_keys.any() {
            let turn = self.move_keys.turn();
            if turn != 0.0 {
                let yaw = Quat::from_rotation_y(turn * TURN_RATE * seconds);
                self.pose.orientation = (yaw * self.pose.orientation).normalize();
            }
            let thrust = self.move_keys.thrust();
            if thrust != 0.0 {
                let forward = self.pose.orientation * Vec3::Z;
                self.pose.position += forward * (thrust * MOVE_SPEED * seconds);
            }
        } else if let Some(path) = self.path.as_mut() {
            if follow_path(&mut self.pose, path, PATH_SPEED * seconds) {
                self.path = None;
                out_events.push(Event::PathCompleted { unit: self.id });
            }
        }

        self.moving = self.pose.position != before;
    }
}

/// Moves `pose` along `path` by at most `budget` units.
///
/// Returns `true` once the final waypoint of an open path is reached.
fn follow_path(pose: &mut Pose, path: &mut PathRecord, mut budget: f32) -> bool {
    let len = path.waypoints.len();
    if len == 0 {
        return true;
    }

    // One lap at most, so a closed loop of coincident waypoints terminates.
    for _ in 0..=len {
        let cursor = path.cursor as usize % len;
        let target = path.waypoints[cursor];
        let delta = target - pose.position;
        let distance = delta.length();

        if distance > budget.max(ARRIVAL_EPSILON) {
            let direction = delta / distance;
            pose.position += direction * budget;
            pose.orientation = heading(direction);
            return false;
        }

        pose.position = target;
        budget -= distance;
        if cursor + 1 < len {
            path.cursor = (cursor + 1) as u32;
        } else if path.closed {
            path.cursor = 0;
        } else {
            return true;
        }
        if budget <= 0.0 {
            break;
        }
    }
    false
}

fn heading(direction: Vec3) -> Quat {
    Quat::from_rotation_y(direction.x.atan2(direction.z))
}
