use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Duration,
};

use convoy_core::{
    wire::{PositionEntry, PositionSync, SpawnEntry, SpawnManifest},
    Command, CommandId, CommandKind, EntityId, Event, MoveKeys, PathFlags, Pose, Presence,
    RejectReason, RenderTarget, SeatPolicy, SlotId, Tick,
};
use convoy_world::{self as world, query, World, ARRIVAL_EPSILON, MOVE_SPEED, PATH_SPEED};
use glam::{Quat, Vec3};

const DT: Duration = Duration::from_millis(50);

fn manifest(ids: &[u64]) -> SpawnManifest {
    SpawnManifest {
        entries: ids
            .iter()
            .map(|id| SpawnEntry {
                id: EntityId::new(*id),
                owner_slot: SlotId::HOST,
                model_index: 0,
                position: Vec3::ZERO,
            })
            .collect(),
    }
}

fn spawned(ids: &[u64]) -> World {
    let mut world = World::new();
    let mut events = Vec::new();
    let _ = world::apply_manifest(&mut world, &manifest(ids), &mut events);
    world
}

fn command(slot: u8, counter: u64, target: u64, kind: CommandKind) -> Command {
    Command {
        id: CommandId::new(SlotId::new(slot), counter),
        target: EntityId::new(target),
        kind,
        origin_slot: SlotId::new(slot),
        sequence: counter as u32,
    }
}

fn apply(world: &mut World, command: Command) -> Vec<Event> {
    let mut events = Vec::new();
    world::apply(world, command, &mut events);
    events
}

fn forward() -> MoveKeys {
    MoveKeys {
        forward: true,
        ..MoveKeys::NONE
    }
}

#[test]
fn manifest_is_idempotent() {
    let mut world = World::new();
    let mut events = Vec::new();
    assert_eq!(world::apply_manifest(&mut world, &manifest(&[1, 2]), &mut events), 2);
    assert_eq!(world::apply_manifest(&mut world, &manifest(&[1, 2]), &mut events), 0);
    assert_eq!(query::unit_count(&world), 2);
    assert_eq!(events.len(), 2);
}

#[test]
fn select_locks_seat_against_other_slots() {
    let mut world = spawned(&[1]);

    let events = apply(&mut world, command(1, 1, 1, CommandKind::Select));
    assert_eq!(
        events,
        vec![Event::UnitSelected {
            unit: EntityId::new(1),
            slot: SlotId::new(1),
        }]
    );

    let events = apply(&mut world, command(2, 1, 1, CommandKind::Select));
    assert!(matches!(
        events.as_slice(),
        [Event::CommandRejected {
            reason: RejectReason::SeatLocked,
            ..
        }]
    ));
    let view = query::unit(&world, EntityId::new(1)).expect("unit");
    assert_eq!(view.selected_by_slot, Some(SlotId::new(1)));
    assert_eq!(view.owner_slot, SlotId::HOST, "fixed seats keep their owner");
}

#[test]
fn deselect_requires_holding_the_seat() {
    let mut world = spawned(&[1]);
    let _ = apply(&mut world, command(1, 1, 1, CommandKind::Select));

    let events = apply(&mut world, command(2, 1, 1, CommandKind::Deselect));
    assert!(matches!(
        events.as_slice(),
        [Event::CommandRejected {
            reason: RejectReason::NotSelectedBySlot,
            ..
        }]
    ));

    let _ = apply(&mut world, command(1, 2, 1, CommandKind::Deselect));
    let view = query::unit(&world, EntityId::new(1)).expect("unit");
    assert_eq!(view.selected_by_slot, None);
}

#[test]
fn transferable_seat_moves_ownership() {
    let mut world = World::with_seat_policy(SeatPolicy::Transferable);
    let mut events = Vec::new();
    let _ = world::apply_manifest(&mut world, &manifest(&[4]), &mut events);

    let events = apply(&mut world, command(3, 1, 4, CommandKind::Select));
    assert!(events.contains(&Event::SeatTransferred {
        unit: EntityId::new(4),
        from: SlotId::HOST,
        to: SlotId::new(3),
    }));
    let view = query::unit(&world, EntityId::new(4)).expect("unit");
    assert_eq!(view.owner_slot, SlotId::new(3));
}

#[test]
fn unknown_targets_are_rejected() {
    let mut world = World::new();
    let events = apply(&mut world, command(0, 1, 9, CommandKind::Select));
    assert!(matches!(
        events.as_slice(),
        [Event::CommandRejected {
            reason: RejectReason::UnknownUnit,
            ..
        }]
    ));
}

#[test]
fn move_keys_drive_unit_forward() {
    let mut world = spawned(&[1]);
    let _ = apply(
        &mut world,
        command(0, 1, 1, CommandKind::Move { keys: forward() }),
    );

    let mut events = Vec::new();
    for _ in 0..20 {
        world::advance(&mut world, DT, &mut events);
    }

    let view = query::unit(&world, EntityId::new(1)).expect("unit");
    assert!((view.pose.position.z - MOVE_SPEED).abs() < 1e-3);
    assert!(view.path_flags.contains(PathFlags::MOVING));
}

#[test]
fn turning_rotates_the_forward_axis() {
    let mut world = spawned(&[1]);
    let keys = MoveKeys {
        left: true,
        ..MoveKeys::NONE
    };
    let _ = apply(&mut world, command(0, 1, 1, CommandKind::Move { keys }));

    let mut events = Vec::new();
    world::advance(&mut world, Duration::from_secs(1), &mut events);

    let view = query::unit(&world, EntityId::new(1)).expect("unit");
    let facing = view.pose.orientation * Vec3::Z;
    assert!((facing - Vec3::X).length() < 1e-4);
    assert_eq!(view.pose.position, Vec3::ZERO);
}

#[test]
fn open_path_is_followed_to_completion() {
    let mut world = spawned(&[1]);
    let waypoints = vec![Vec3::new(0.0, 0.0, 2.0), Vec3::new(2.0, 0.0, 2.0)];
    let _ = apply(&mut world, command(0, 1, 1, CommandKind::SetPath { waypoints }));

    let mut events = Vec::new();
    let ticks = (4.0 / (PATH_SPEED * DT.as_secs_f32())).ceil() as usize + 1;
    for _ in 0..ticks {
        world::advance(&mut world, DT, &mut events);
    }

    assert!(events.contains(&Event::PathCompleted {
        unit: EntityId::new(1),
    }));
    let view = query::unit(&world, EntityId::new(1)).expect("unit");
    assert!(view.pose.position.distance(Vec3::new(2.0, 0.0, 2.0)) <= ARRIVAL_EPSILON);
    assert!(!view.path_flags.contains(PathFlags::HAS_PATH));
}

#[test]
fn closed_path_keeps_looping() {
    let mut world = spawned(&[1]);
    let waypoints = vec![Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 1.0)];
    let _ = apply(&mut world, command(0, 1, 1, CommandKind::SetPath { waypoints }));
    let _ = apply(&mut world, command(0, 2, 1, CommandKind::ClosePath));

    let mut events = Vec::new();
    for _ in 0..200 {
        world::advance(&mut world, DT, &mut events);
    }

    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::PathCompleted { .. })));
    let flags = query::unit(&world, EntityId::new(1))
        .expect("unit")
        .path_flags;
    assert!(flags.contains(PathFlags::HAS_PATH | PathFlags::CLOSED));
}

#[test]
fn path_commands_validate_their_preconditions() {
    let mut world = spawned(&[1]);
    let events = apply(
        &mut world,
        command(0, 1, 1, CommandKind::SetPath { waypoints: vec![] }),
    );
    assert!(matches!(
        events.as_slice(),
        [Event::CommandRejected {
            reason: RejectReason::EmptyPath,
            ..
        }]
    ));

    let events = apply(&mut world, command(0, 2, 1, CommandKind::ClosePath));
    assert!(matches!(
        events.as_slice(),
        [Event::CommandRejected {
            reason: RejectReason::NoPath,
            ..
        }]
    ));
}

#[test]
fn passive_units_are_created_once_and_never_simulated() {
    let mut world = World::new();
    let mut events = Vec::new();
    let pose = Pose::at(Vec3::new(3.0, 0.0, 0.0));

    assert!(world::ensure_passive(&mut world, EntityId::new(5), pose, &mut events));
    assert!(!world::ensure_passive(&mut world, EntityId::new(5), pose, &mut events));
    assert_eq!(query::unit_count(&world), 1);

    let rejected = apply(
        &mut world,
        command(1, 1, 5, CommandKind::Move { keys: forward() }),
    );
    assert!(matches!(
        rejected.as_slice(),
        [Event::CommandRejected {
            reason: RejectReason::PassiveUnit,
            ..
        }]
    ));

    world::advance(&mut world, DT, &mut events);
    let view = query::unit(&world, EntityId::new(5)).expect("unit");
    assert_eq!(view.presence, Presence::Passive);
    assert_eq!(view.pose, pose);
    assert!(query::snapshot_units(&world).is_empty());
}

#[test]
fn position_sync_overwrites_simulated_poses() {
    let mut world = spawned(&[1, 2]);
    let corrected = Pose::new(Vec3::new(9.0, 0.0, 9.0), Quat::from_rotation_y(1.0));
    let sync = PositionSync {
        tick: Tick::new(3),
        entries: vec![
            PositionEntry {
                id: EntityId::new(2),
                pose: corrected,
            },
            PositionEntry {
                id: EntityId::new(40),
                pose: corrected,
            },
        ],
    };

    assert_eq!(world::apply_position_sync(&mut world, &sync), 1);
    let view = query::unit(&world, EntityId::new(2)).expect("unit");
    assert_eq!(view.pose, corrected);
    assert!(view.render.snapped);
}

#[test]
fn local_render_blends_previous_and_current_pose() {
    let mut world = spawned(&[1]);
    let _ = apply(
        &mut world,
        command(0, 1, 1, CommandKind::Move { keys: forward() }),
    );
    let mut events = Vec::new();
    world::advance(&mut world, DT, &mut events);
    world::apply_local_render(&mut world, 0.5);

    let targets = query::render_targets(&world);
    let (_, target) = targets[0];
    let step = MOVE_SPEED * DT.as_secs_f32();
    assert!((target.pose.position.z - step * 0.5).abs() < 1e-5);
    assert!(!target.snapped);

    let snapped = RenderTarget {
        pose: Pose::at(Vec3::ONE),
        snapped: true,
    };
    assert!(world::set_render_target(&mut world, EntityId::new(1), snapped));
    assert!(!world::set_render_target(&mut world, EntityId::new(7), snapped));
}

#[test]
fn records_round_trip_without_seat_selection() {
    let mut world = spawned(&[1, 2]);
    let _ = apply(&mut world, command(1, 1, 1, CommandKind::Select));
    let records = query::unit_records(&world);

    let restored = World::from_records(records.clone(), SeatPolicy::Fixed);
    assert_eq!(query::unit_records(&restored), records);
    let view = query::unit(&restored, EntityId::new(1)).expect("unit");
    assert_eq!(view.selected_by_slot, None);
}

#[test]
fn deterministic_replay_is_reproducible() {
    let first = replay();
    let second = replay();
    assert_eq!(first, second, "replay diverged between runs");
}

fn replay() -> u64 {
    let mut world = spawned(&[1, 2, 3]);
    let script = vec![
        command(0, 1, 1, CommandKind::Move { keys: forward() }),
        command(
            1,
            1,
            2,
            CommandKind::SetPath {
                waypoints: vec![Vec3::new(5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 5.0)],
            },
        ),
        command(1, 2, 2, CommandKind::ClosePath),
        command(
            2,
            1,
            3,
            CommandKind::Move {
                keys: MoveKeys {
                    forward: true,
                    right: true,
                    ..MoveKeys::NONE
                },
            },
        ),
    ];

    let mut events = Vec::new();
    for command in script {
        world::apply(&mut world, command, &mut events);
        for _ in 0..17 {
            world::advance(&mut world, DT, &mut events);
        }
    }

    let mut hasher = DefaultHasher::new();
    for unit in query::units(&world) {
        unit.id.hash(&mut hasher);
        unit.pose.position.to_array().map(f32::to_bits).hash(&mut hasher);
        unit.pose.orientation.to_array().map(f32::to_bits).hash(&mut hasher);
        unit.path_flags.bits().hash(&mut hasher);
    }
    events.len().hash(&mut hasher);
    hasher.finish()
}
