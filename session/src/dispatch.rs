//! Gated execution of flushed commands.

use convoy_core::{Event, SlotId};
use convoy_system_command_queue::{FlushedBatch, QueuedCommand, RelayOutbox};
use convoy_world::{self as world, World};

use crate::gate::ExecutionGate;

/// What happened to the commands of one flushed batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Commands handed to the world.
    pub executed: usize,
    /// Gated commands withheld because the gate was closed.
    pub gated: usize,
    /// Relayed commands skipped because they already ran locally.
    pub own_relays_skipped: usize,
    /// Commands queued for relay to other participants.
    pub relayed: usize,
}

/// Executes a flushed batch against the world.
///
/// Seat selection always runs. Every other command, relayed or not, runs
/// only while the gate is open; a guest with a closed gate follows the
/// authority through position syncs instead. Relayed copies of the local
/// slot's own commands are skipped since they already ran when issued. When
/// an `outbox` is supplied, every executed gated command that did not arrive
/// by relay is queued for relay exactly once.
pub fn dispatch(
    batch: FlushedBatch,
    gate: &ExecutionGate,
    local_slot: SlotId,
    world: &mut World,
    mut outbox: Option<&mut RelayOutbox>,
    out_events: &mut Vec<Event>,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let tick = batch.tick;

    for QueuedCommand { command, source } in batch.commands {
        let ui_only = command.kind.is_ui_only();
        if !gate.admits(&command.kind) {
            log::debug!(
                "gate withheld {} {} at {tick}",
                command.kind.label(),
                command.id
            );
            report.gated += 1;
            continue;
        }
        if !ui_only && source.is_relayed() && command.origin_slot == local_slot {
            report.own_relays_skipped += 1;
            continue;
        }

        let relay = match outbox.as_deref_mut() {
            Some(outbox) if !ui_only && !source.is_relayed() => Some((outbox, command.clone())),
            _ => None,
        };
        world::apply(world, command, out_events);
        report.executed += 1;

        if let Some((outbox, command)) = relay {
            let _ = outbox.push(command);
            report.relayed += 1;
        }
    }

    report
}
