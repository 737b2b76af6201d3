use std::collections::HashSet;

use convoy_core::{Command, CommandId, CommandKind, EntityId, MoveKeys, SlotId, Tick};
use convoy_system_command_queue::{
    CommandQueue, CommandSource, QueuedCommand, RelayOutbox, SequenceTracker, SequenceVerdict,
};

fn command(slot: u8, counter: u64, kind: CommandKind) -> Command {
    Command {
        id: CommandId::new(SlotId::new(slot), counter),
        target: EntityId::new(1),
        kind,
        origin_slot: SlotId::new(slot),
        sequence: counter as u32,
    }
}

fn forward() -> CommandKind {
    CommandKind::Move {
        keys: MoveKeys {
            forward: true,
            ..MoveKeys::NONE
        },
    }
}

#[test]
fn flush_returns_enqueued_commands_in_order() {
    let mut queue = CommandQueue::new();
    let issued = vec![
        command(0, 1, CommandKind::Select),
        command(0, 2, forward()),
        command(1, 1, CommandKind::ClosePath),
    ];
    for entry in &issued {
        queue.enqueue(QueuedCommand::local(entry.clone()));
    }
    assert_eq!(queue.pending_count(), 3);

    let batch = queue.flush(Tick::new(5));
    assert_eq!(batch.tick, Tick::new(5));
    let drained: Vec<Command> = batch.commands.into_iter().map(|queued| queued.command).collect();
    assert_eq!(drained, issued);
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn flush_never_returns_a_command_twice() {
    let mut queue = CommandQueue::new();
    let mut seen = HashSet::new();

    for tick in 0..10u64 {
        for counter in 0..tick {
            queue.enqueue(QueuedCommand::local(command(0, tick * 100 + counter, forward())));
        }
        for queued in queue.flush(Tick::new(tick)).commands {
            assert!(seen.insert(queued.command.id), "command returned twice");
        }
    }
    assert_eq!(seen.len(), 45);
    assert!(queue.flush(Tick::new(10)).is_empty());
}

#[test]
fn residue_enqueued_after_flush_lands_in_next_batch() {
    let mut queue = CommandQueue::new();
    queue.enqueue(QueuedCommand::local(command(0, 1, forward())));
    let first = queue.flush(Tick::new(1));
    queue.enqueue(QueuedCommand::relayed(command(2, 7, CommandKind::Deselect)));
    let second = queue.flush(Tick::new(2));

    assert_eq!(first.commands.len(), 1);
    assert_eq!(second.commands.len(), 1);
    assert_eq!(second.commands[0].source, CommandSource::Relayed);
    assert_eq!(second.tick, Tick::new(2));
}

#[test]
fn pending_count_does_not_consume() {
    let mut queue = CommandQueue::new();
    queue.enqueue(QueuedCommand::submitted(command(3, 1, forward())));
    assert_eq!(queue.pending_count(), 1);
    assert_eq!(queue.pending_count(), 1);
    assert_eq!(queue.flush(Tick::ZERO).commands.len(), 1);
}

#[test]
fn outbox_sequences_per_origin_slot() {
    let mut outbox = RelayOutbox::new();
    assert_eq!(outbox.push(command(1, 10, forward())), 0);
    assert_eq!(outbox.push(command(2, 11, forward())), 0);
    assert_eq!(outbox.push(command(1, 12, forward())), 1);
    assert_eq!(outbox.pending_count(), 3);

    let batch = outbox.drain(Tick::new(4)).expect("batch");
    assert_eq!(batch.tick, Tick::new(4));
    let stamps: Vec<(u8, u32)> = batch
        .entries
        .iter()
        .map(|entry| (entry.slot.get(), entry.seq))
        .collect();
    assert_eq!(stamps, vec![(1, 0), (2, 0), (1, 1)]);
    assert!(outbox.drain(Tick::new(5)).is_none());

    assert_eq!(outbox.push(command(1, 13, forward())), 2);
}

#[test]
fn tracker_drops_duplicates_and_reports_gaps() {
    let mut tracker = SequenceTracker::new();
    let slot = SlotId::new(1);

    assert_eq!(tracker.observe(slot, 0), SequenceVerdict::InOrder);
    assert_eq!(tracker.observe(slot, 1), SequenceVerdict::InOrder);
    assert_eq!(tracker.observe(slot, 1), SequenceVerdict::Duplicate);
    assert_eq!(tracker.observe(slot, 4), SequenceVerdict::Gap { missing: 2 });
    assert_eq!(tracker.observe(slot, 2), SequenceVerdict::Duplicate);
    assert_eq!(tracker.expected(slot), 5);

    assert_eq!(tracker.observe(SlotId::new(2), 0), SequenceVerdict::InOrder);
    tracker.reset();
    assert_eq!(tracker.expected(slot), 0);
}

#[test]
fn tracker_follows_sequence_wraparound() {
    let mut tracker = SequenceTracker::new();
    let slot = SlotId::HOST;

    let midway = u32::MAX / 2;
    assert_eq!(
        tracker.observe(slot, midway),
        SequenceVerdict::Gap { missing: midway }
    );
    assert_eq!(
        tracker.observe(slot, u32::MAX - 1),
        SequenceVerdict::Gap {
            missing: u32::MAX - 2 - midway
        }
    );
    assert_eq!(tracker.observe(slot, u32::MAX), SequenceVerdict::InOrder);
    assert_eq!(tracker.observe(slot, 0), SequenceVerdict::InOrder);
    assert_eq!(tracker.observe(slot, u32::MAX), SequenceVerdict::Duplicate);
    assert_eq!(tracker.observe(slot, 3), SequenceVerdict::Gap { missing: 2 });
    assert_eq!(tracker.expected(slot), 4);
}
