use std::time::Duration;

use convoy_core::{
    wire::{CommandBatch, SequencedCommand, SpawnEntry, SpawnManifest, WireMessage},
    Command, CommandId, CommandKind, EntityId, MoveKeys, Role, SlotId, Tick,
};
use convoy_session::{
    config::SessionConfig,
    link::{LoopbackHub, LoopbackLink, OfflineLink},
    Session,
};
use convoy_world::query;
use glam::Vec3;

const UNIT: EntityId = EntityId::new(1);
const GUEST: SlotId = SlotId::new(1);

fn forward() -> CommandKind {
    CommandKind::Move {
        keys: MoveKeys {
            forward: true,
            ..MoveKeys::NONE
        },
    }
}

fn guest(hub: &LoopbackHub) -> Session<LoopbackLink> {
    let mut session = Session::new(SessionConfig::default(), 7, hub.connect(Role::Guest, GUEST))
        .expect("guest");
    session.receive(
        SlotId::HOST,
        WireMessage::SpawnManifest(SpawnManifest {
            entries: vec![SpawnEntry {
                id: UNIT,
                owner_slot: SlotId::HOST,
                model_index: 0,
                position: Vec3::ZERO,
            }],
        }),
    );
    session
}

fn position(session: &Session<LoopbackLink>) -> Vec3 {
    query::unit(session.world(), UNIT)
        .expect("unit")
        .pose
        .position
}

#[test]
fn closed_gate_keeps_guest_units_still_but_selects() {
    let hub = LoopbackHub::new();
    let _host = hub.connect(Role::Host, SlotId::HOST);
    let mut session = guest(&hub);

    assert!(session.issue(UNIT, forward()).is_some());
    assert!(session.issue(UNIT, CommandKind::Select).is_some());
    for frame in 1..=10 {
        let _ = session.step(Duration::from_millis(50 * frame));
    }

    assert_eq!(position(&session), Vec3::ZERO);
    let unit = query::unit(session.world(), UNIT).expect("unit");
    assert_eq!(unit.selected_by_slot, Some(GUEST));
    assert_eq!(session.diagnostics().commands_gated, 1);
    assert_eq!(hub.pending(SlotId::HOST), 1, "gated command was submitted");
}

fn relayed_host_move() -> WireMessage {
    WireMessage::CmdBatch(CommandBatch {
        tick: Tick::new(1),
        entries: vec![SequencedCommand {
            slot: SlotId::HOST,
            seq: 0,
            command: Command {
                id: CommandId::new(SlotId::HOST, 1),
                target: UNIT,
                kind: forward(),
                origin_slot: SlotId::HOST,
                sequence: 0,
            },
        }],
    })
}

#[test]
fn closed_gate_ignores_relayed_moves() {
    let hub = LoopbackHub::new();
    let _host = hub.connect(Role::Host, SlotId::HOST);
    let mut session = guest(&hub);
    session.receive(SlotId::HOST, relayed_host_move());

    for frame in 1..=10 {
        let _ = session.step(Duration::from_millis(50 * frame));
    }

    assert_eq!(position(&session), Vec3::ZERO);
    let unit = query::unit(session.world(), UNIT).expect("unit");
    assert_eq!(unit.move_keys, MoveKeys::NONE);
    assert_eq!(session.diagnostics().commands_gated, 1);
}

#[test]
fn open_gate_follows_relayed_moves() {
    let hub = LoopbackHub::new();
    let _host = hub.connect(Role::Host, SlotId::HOST);
    let mut session = guest(&hub);
    session.set_guest_prediction(true);
    session.receive(SlotId::HOST, relayed_host_move());

    for frame in 1..=10 {
        let _ = session.step(Duration::from_millis(50 * frame));
    }

    assert!(position(&session).z > 0.0);
}

#[test]
fn prediction_lets_guest_move_locally() {
    let hub = LoopbackHub::new();
    let _host = hub.connect(Role::Host, SlotId::HOST);
    let mut session = guest(&hub);
    session.set_guest_prediction(true);
    assert!(session.gate().is_open());

    let _ = session.issue(UNIT, forward());
    for frame in 1..=10 {
        let _ = session.step(Duration::from_millis(50 * frame));
    }

    assert!(position(&session).z > 0.0);
}

#[test]
fn offline_sessions_always_execute() {
    let mut session =
        Session::new(SessionConfig::default(), 1234, OfflineLink).expect("offline");
    let ids = session.spawn_units(1).expect("offline spawns");
    let start = query::unit(session.world(), ids[0]).expect("unit").pose.position;

    let _ = session.issue(ids[0], forward());
    let _ = session.step(Duration::from_millis(200));

    let unit = query::unit(session.world(), ids[0]).expect("unit");
    assert!(unit.pose.position.distance(start) > 0.0);
    assert!(session.diagnostics().last_digest.is_some());
}
