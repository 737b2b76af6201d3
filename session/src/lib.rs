#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-participant driver of the Convoy simulation.
//!
//! A [`Session`] owns the world, the deterministic streams, the command queue
//! and the snapshot buffer of one participant, and drives them from a
//! [`SimLoop`]. Adapters call [`Session::issue`] for local input,
//! [`Session::receive_bytes`] for frames from the transport and
//! [`Session::step`] once per rendered frame. Everything received is buffered
//! and consumed at tick boundaries.

pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod gate;
pub mod input;
pub mod link;
pub mod mode;

use std::{collections::BTreeMap, time::Duration};

use convoy_core::{
    wire::{
        self, CommandBatch, MoveInput, PositionSync, SequencedCommand, SpawnEntry, SpawnManifest,
        StateHashReport, WireMessage,
    },
    Command, CommandId, CommandKind, EntityId, Event, Role, SaveState, SlotId, Snapshot,
    StateDigest, Tick,
};
use convoy_system_command_queue::{
    CommandQueue, QueuedCommand, RelayOutbox, SequenceTracker, SequenceVerdict,
};
use convoy_system_determinism::Determinism;
use convoy_system_sim_loop::{LoopHooks, SimLoop, StepReport};
use convoy_system_snapshot_buffer::SnapshotBuffer;
use convoy_system_state_surface::{self as surface, SurfaceError};
use convoy_world::{self as world, query, World};
use glam::Vec3;
use thiserror::Error;

use crate::{
    config::{ConfigError, SessionConfig},
    diagnostics::{Diagnostics, Divergence},
    gate::ExecutionGate,
    input::InputLatch,
    link::{Delivery, SessionLink},
    mode::{LinkHealth, MirrorState, Mode},
};

/// Local digests kept around for late authority reports.
const RETAINED_DIGESTS: usize = 8;

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A save state could not be produced or restored.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    /// The operation is reserved to authorities.
    #[error("{role:?} participants cannot {action}")]
    NotAuthority {
        /// Role of the local participant.
        role: Role,
        /// Rejected operation.
        action: &'static str,
    },
}

/// Messages received since the last tick boundary.
#[derive(Debug, Default)]
struct Inbox {
    snapshots: Vec<Snapshot>,
    manifests: Vec<SpawnManifest>,
    syncs: Vec<PositionSync>,
    batches: Vec<CommandBatch>,
    hashes: Vec<StateHashReport>,
}

/// A single participant of a Convoy session.
#[derive(Debug)]
pub struct Session<L> {
    sim_loop: SimLoop,
    runtime: Runtime<L>,
}

impl<L: SessionLink> Session<L> {
    /// Creates a session whose role and slot come from `link`.
    pub fn new(config: SessionConfig, seed: u64, link: L) -> Result<Self, SessionError> {
        config.validate()?;
        let loop_config = config.loop_config()?;
        let role = link.role();
        let local_slot = link.local_slot();

        let mut snapshots = SnapshotBuffer::new(config.snapshot_capacity);
        if let Some(distance) = config.discontinuity_distance {
            snapshots = snapshots.with_discontinuity_distance(distance);
        }
        log::info!("session for {local_slot} starting as {role:?} with seed {seed}");

        Ok(Self {
            sim_loop: SimLoop::new(loop_config),
            runtime: Runtime {
                gate: ExecutionGate::new(role, config.guest_prediction),
                world: World::with_seat_policy(config.seat_policy),
                determinism: Determinism::new(seed),
                config,
                link,
                role,
                local_slot,
                mode: Mode::LocalAuthority,
                queue: CommandQueue::new(),
                outbox: RelayOutbox::new(),
                relays: SequenceTracker::new(),
                submissions: SequenceTracker::new(),
                latch: InputLatch::new(),
                snapshots,
                inbox: Inbox::default(),
                issued: 0,
                remote_inputs: BTreeMap::new(),
                local_digests: BTreeMap::new(),
                remote_digests: BTreeMap::new(),
                diagnostics: Diagnostics::default(),
                events: Vec::new(),
                now: Duration::ZERO,
            },
        })
    }

    /// Role of the local participant.
    #[must_use]
    pub fn role(&self) -> Role {
        self.runtime.role
    }

    /// Seat number of the local participant.
    #[must_use]
    pub fn local_slot(&self) -> SlotId {
        self.runtime.local_slot
    }

    /// Next tick the scheduler will execute.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.sim_loop.tick()
    }

    /// Current execution mode.
    #[must_use]
    pub fn mode(&self) -> &Mode {
        &self.runtime.mode
    }

    /// Freshness of the snapshot stream.
    #[must_use]
    pub fn link_health(&self) -> LinkHealth {
        self.runtime.mode.health()
    }

    /// Execution gate applied to gated commands.
    #[must_use]
    pub fn gate(&self) -> &ExecutionGate {
        &self.runtime.gate
    }

    /// Toggles client-side prediction for guests.
    pub fn set_guest_prediction(&mut self, enabled: bool) {
        self.runtime.gate.set_guest_prediction(enabled);
    }

    /// Read access to the local world.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.runtime.world
    }

    /// Configuration the session runs with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.runtime.config
    }

    /// Synchronization counters.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.runtime.diagnostics
    }

    /// Transport the session sends through.
    #[must_use]
    pub fn link(&self) -> &L {
        &self.runtime.link
    }

    /// Number of commands awaiting the next tick.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.runtime.queue.pending_count()
    }

    /// Takes every event produced since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.runtime.events)
    }

    /// Issues a command from local input.
    ///
    /// Returns the minted identifier, or `None` when a mirror latched a move
    /// for upstream forwarding instead.
    pub fn issue(&mut self, target: EntityId, kind: CommandKind) -> Option<CommandId> {
        self.runtime.issue(target, kind)
    }

    /// Buffers a decoded message from `from` until the next tick boundary.
    pub fn receive(&mut self, from: SlotId, message: WireMessage) {
        self.runtime.receive(from, message);
    }

    /// Decodes and buffers a frame; undecodable frames are logged and dropped.
    pub fn receive_bytes(&mut self, from: SlotId, bytes: &[u8]) {
        match wire::decode(bytes) {
            Ok(message) => self.runtime.receive(from, message),
            Err(error) => {
                log::warn!("dropping frame from {from}: {error}");
                self.runtime.diagnostics.messages_dropped += 1;
            }
        }
    }

    /// Buffers every delivered frame in order.
    pub fn receive_deliveries<I>(&mut self, deliveries: I)
    where
        I: IntoIterator<Item = Delivery>,
    {
        for delivery in deliveries {
            self.receive_bytes(delivery.from, &delivery.bytes);
        }
    }

    /// Advances the session clock to `now`, running every due tick and one
    /// render update.
    pub fn step(&mut self, now: Duration) -> StepReport {
        self.runtime.now = now;
        if let Some(tick) = self.runtime.absorb_snapshots(now) {
            self.sim_loop.restore_tick(tick);
        }
        self.sim_loop.step(now, &mut self.runtime)
    }

    /// Spawns `count` units at random arena positions.
    ///
    /// Hosts broadcast the resulting manifest. Guests learn about units only
    /// from their authority.
    pub fn spawn_units(&mut self, count: usize) -> Result<Vec<EntityId>, SessionError> {
        if !self.runtime.role.is_authority() {
            return Err(SessionError::NotAuthority {
                role: self.runtime.role,
                action: "spawn units",
            });
        }
        Ok(self.runtime.spawn_units(count))
    }

    /// Captures the complete session state.
    #[must_use]
    pub fn save_state(&self) -> SaveState {
        surface::capture(
            &self.runtime.world,
            self.sim_loop.tick(),
            &self.runtime.determinism,
        )
    }

    /// Captures and encodes the complete session state.
    pub fn save_bytes(&self) -> Result<Vec<u8>, SessionError> {
        Ok(surface::encode(&self.save_state())?)
    }

    /// SHA-256 digest of the encoded session state.
    pub fn state_digest(&self) -> Result<StateDigest, SessionError> {
        Ok(surface::digest(&self.save_bytes()?))
    }

    /// Replaces the session state, re-baselining the clock at `now`.
    ///
    /// Pending commands and relays are discarded. On error nothing changes.
    pub fn load_state(&mut self, state: SaveState, now: Duration) -> Result<(), SessionError> {
        let restored = surface::restore(
            state,
            &mut self.runtime.determinism,
            self.runtime.config.seat_policy,
        )?;
        self.runtime.reset_transient();
        self.runtime.world = restored.world;
        self.sim_loop.restore_tick(restored.tick);
        self.sim_loop.resync(now);
        Ok(())
    }

    /// Decodes and loads a state produced by [`Session::save_bytes`].
    pub fn load_bytes(&mut self, bytes: &[u8], now: Duration) -> Result<(), SessionError> {
        let state = surface::decode(bytes)?;
        self.load_state(state, now)
    }
}

#[derive(Debug)]
struct Runtime<L> {
    config: SessionConfig,
    link: L,
    role: Role,
    local_slot: SlotId,
    gate: ExecutionGate,
    mode: Mode,
    world: World,
    determinism: Determinism,
    queue: CommandQueue,
    outbox: RelayOutbox,
    relays: SequenceTracker,
    submissions: SequenceTracker,
    latch: InputLatch,
    snapshots: SnapshotBuffer,
    inbox: Inbox,
    issued: u32,
    remote_inputs: BTreeMap<SlotId, u32>,
    local_digests: BTreeMap<Tick, StateDigest>,
    remote_digests: BTreeMap<Tick, StateDigest>,
    diagnostics: Diagnostics,
    events: Vec<Event>,
    now: Duration,
}

impl<L: SessionLink> Runtime<L> {
    fn issue(&mut self, target: EntityId, kind: CommandKind) -> Option<CommandId> {
        if self.mode.is_mirror() {
            if let CommandKind::Move { keys } = kind {
                self.latch.press(target, keys);
                return None;
            }
        }

        let command = self.mint(target, kind);
        let id = command.id;
        if self.role == Role::Guest && !command.kind.is_ui_only() {
            let submit = WireMessage::CmdSubmit(SequencedCommand {
                slot: self.local_slot,
                seq: command.sequence,
                command: command.clone(),
            });
            self.send_to_authority(&submit);
        }
        self.queue.enqueue(QueuedCommand::local(command));
        Some(id)
    }

    fn mint(&mut self, target: EntityId, kind: CommandKind) -> Command {
        let sequence = self.issued;
        self.issued = self.issued.wrapping_add(1);
        Command {
            id: self.determinism.ids().next_command_id(self.local_slot),
            target,
            kind,
            origin_slot: self.local_slot,
            sequence,
        }
    }

    fn receive(&mut self, from: SlotId, message: WireMessage) {
        let label = message.label();
        match (self.role, message) {
            (Role::Host, WireMessage::CmdSubmit(submitted)) => self.accept_submission(from, submitted),
            (Role::Host, WireMessage::MoveInput(input)) => self.accept_input(from, input),
            (Role::Guest, WireMessage::ServerSnapshot(snapshot)) => {
                self.inbox.snapshots.push(snapshot)
            }
            (Role::Guest, WireMessage::SpawnManifest(manifest)) => {
                self.inbox.manifests.push(manifest)
            }
            (Role::Guest, WireMessage::PositionSync(sync)) => self.inbox.syncs.push(sync),
            (Role::Guest, WireMessage::CmdBatch(batch)) => self.inbox.batches.push(batch),
            (Role::Guest, WireMessage::StateHash(report)) => self.inbox.hashes.push(report),
            (role, _) => {
                log::warn!("{role:?} participant dropped {label} from {from}");
                self.diagnostics.messages_dropped += 1;
            }
        }
    }

    fn accept_submission(&mut self, from: SlotId, submitted: SequencedCommand) {
        let SequencedCommand { slot, seq, command } = submitted;
        if slot != from || command.origin_slot != from {
            log::warn!(
                "dropping {} submitted by {from} on behalf of {}",
                command.id,
                command.origin_slot
            );
            self.diagnostics.messages_dropped += 1;
            return;
        }
        let verdict = self.submissions.observe(from, seq);
        if self.tally(verdict) {
            self.queue.enqueue(QueuedCommand::submitted(command));
        }
    }

    fn accept_input(&mut self, from: SlotId, input: MoveInput) {
        let counter = self.remote_inputs.entry(from).or_insert(0);
        let sequence = *counter;
        *counter = counter.wrapping_add(1);
        let command = Command {
            id: self.determinism.ids().next_command_id(self.local_slot),
            target: input.unit,
            kind: CommandKind::Move { keys: input.keys() },
            origin_slot: from,
            sequence,
        };
        self.queue.enqueue(QueuedCommand::submitted(command));
    }

    /// Counts a sequence verdict; returns whether the entry is accepted.
    fn tally(&mut self, verdict: SequenceVerdict) -> bool {
        match verdict {
            SequenceVerdict::InOrder => true,
            SequenceVerdict::Gap { missing } => {
                self.diagnostics.sequence_gaps += u64::from(missing);
                true
            }
            SequenceVerdict::Duplicate => {
                self.diagnostics.duplicates_dropped += 1;
                false
            }
        }
    }

    /// Pushes buffered snapshots; returns the tick to restore on mirror entry.
    fn absorb_snapshots(&mut self, now: Duration) -> Option<Tick> {
        let mut restore = None;
        for snapshot in std::mem::take(&mut self.inbox.snapshots) {
            if !self.mode.is_mirror() {
                log::info!(
                    "{} entering mirror mode at snapshot {}",
                    self.local_slot,
                    snapshot.tick
                );
                self.snapshots.reset();
                self.mode = Mode::Mirror(MirrorState::entered(snapshot.tick, now));
                restore = Some(snapshot.tick);
            } else if let Mode::Mirror(state) = &mut self.mode {
                if state.note_snapshot(now) {
                    log::info!("snapshot stream to {} recovered", self.local_slot);
                }
            }
            self.snapshots.push(snapshot);
        }
        self.diagnostics.link_health = self.mode.health();
        restore
    }

    fn absorb_inbox(&mut self, tick: Tick) {
        for manifest in std::mem::take(&mut self.inbox.manifests) {
            let _ = world::apply_manifest(&mut self.world, &manifest, &mut self.events);
        }

        for batch in std::mem::take(&mut self.inbox.batches) {
            log::debug!(
                "{} applying batch {} at {tick}",
                self.local_slot,
                batch.tick
            );
            for SequencedCommand { slot, seq, command } in batch.entries {
                let verdict = self.relays.observe(slot, seq);
                if self.tally(verdict) {
                    self.queue.enqueue(QueuedCommand::relayed(command));
                }
            }
        }

        for report in std::mem::take(&mut self.inbox.hashes) {
            if self.mode.is_mirror() {
                continue;
            }
            match self.local_digests.get(&report.tick).copied() {
                Some(local) => self.compare_digests(report.tick, local, report.digest),
                None => {
                    let _ = self.remote_digests.insert(report.tick, report.digest);
                }
            }
        }
    }

    fn apply_due_syncs(&mut self, tick: Tick) {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.inbox.syncs)
            .into_iter()
            .partition(|sync| sync.tick <= tick);
        self.inbox.syncs = later;
        for sync in due {
            let _ = world::apply_position_sync(&mut self.world, &sync);
        }
    }

    fn run_local_authority(&mut self, dt: Duration, tick: Tick) {
        world::advance(&mut self.world, dt, &mut self.events);
        if self.role == Role::Host {
            self.publish(tick);
        }
        self.apply_due_syncs(tick);
        if tick.falls_on(self.config.state_hash_interval_ticks) {
            self.sample_digest(tick);
        }
    }

    fn run_mirror(&mut self, tick: Tick) {
        let stale_after = self.config.stale_after_ticks;
        if let Mode::Mirror(state) = &mut self.mode {
            if state.note_tick(stale_after) {
                log::warn!(
                    "no snapshot for {} ticks; {} holds the last pose",
                    state.ticks_since_snapshot(),
                    self.local_slot
                );
            }
        }
        self.diagnostics.link_health = self.mode.health();
        self.apply_due_syncs(tick);

        if tick.falls_on(self.config.input_send_interval_ticks) {
            for input in self.latch.drain() {
                self.send_to_authority(&WireMessage::MoveInput(input));
            }
        }
    }

    fn publish(&mut self, tick: Tick) {
        if tick.falls_on(self.config.position_sync_interval_ticks) {
            let sync = PositionSync {
                tick,
                entries: query::position_entries(&self.world),
            };
            self.broadcast(&WireMessage::PositionSync(sync));
        }
        if let Some(interval) = self.config.snapshot_broadcast_interval_ticks {
            if tick.falls_on(interval) {
                let snapshot = Snapshot {
                    tick,
                    server_time_ms: tick.get().saturating_mul(self.config.fixed_dt_ms),
                    units: query::snapshot_units(&self.world),
                };
                self.broadcast(&WireMessage::ServerSnapshot(snapshot));
            }
        }
    }

    fn sample_digest(&mut self, tick: Tick) {
        let digest = surface::simulation_digest(tick, &self.world);
        self.diagnostics.last_digest = Some((tick, digest));
        match self.role {
            Role::Host => self.broadcast(&WireMessage::StateHash(StateHashReport { tick, digest })),
            Role::Guest => {
                if let Some(remote) = self.remote_digests.remove(&tick) {
                    self.compare_digests(tick, digest, remote);
                }
                let _ = self.local_digests.insert(tick, digest);
                while self.local_digests.len() > RETAINED_DIGESTS {
                    let _ = self.local_digests.pop_first();
                }
                self.remote_digests.retain(|reported, _| *reported > tick);
            }
            Role::Offline => {}
        }
    }

    fn compare_digests(&mut self, tick: Tick, local: StateDigest, remote: StateDigest) {
        if local == remote {
            self.diagnostics.hashes_matched += 1;
            return;
        }
        log::warn!("{} diverged at {tick}: local {local}, authority {remote}", self.local_slot);
        self.diagnostics.divergences.push(Divergence {
            tick,
            local,
            remote,
        });
    }

    fn relay(&mut self, tick: Tick) {
        if let Some(batch) = self.outbox.drain(tick) {
            self.broadcast(&WireMessage::CmdBatch(batch));
        }
    }

    fn spawn_units(&mut self, count: usize) -> Vec<EntityId> {
        let extent = self.config.arena_half_extent;
        let model_count = self.config.model_count;
        let entries: Vec<SpawnEntry> = (0..count)
            .map(|_| {
                let id = self.determinism.ids().next_entity_id();
                let rng = self.determinism.rng();
                let x = rng.next_range(-extent, extent);
                let z = rng.next_range(-extent, extent);
                let model_index = rng.next_below(model_count);
                SpawnEntry {
                    id,
                    owner_slot: self.local_slot,
                    model_index,
                    position: Vec3::new(x, 0.0, z),
                }
            })
            .collect();
        let ids = entries.iter().map(|entry| entry.id).collect();
        let manifest = SpawnManifest { entries };

        let _ = world::apply_manifest(&mut self.world, &manifest, &mut self.events);
        if self.role == Role::Host {
            self.broadcast(&WireMessage::SpawnManifest(manifest));
        }
        ids
    }

    fn reset_transient(&mut self) {
        let discarded = self.queue.flush(Tick::ZERO).commands.len();
        if discarded > 0 {
            log::debug!("discarded {discarded} pending commands on load");
        }
        let _ = self.outbox.drain(Tick::ZERO);
        self.latch.clear();
        self.inbox = Inbox::default();
        self.local_digests.clear();
        self.remote_digests.clear();
    }

    fn send_to_authority(&mut self, message: &WireMessage) {
        if let Err(error) = self.link.send_to_authority(message) {
            log::warn!("failed to send {}: {error}", message.label());
            self.diagnostics.send_failures += 1;
        }
    }

    fn broadcast(&mut self, message: &WireMessage) {
        if let Err(error) = self.link.broadcast(message) {
            log::warn!("failed to broadcast {}: {error}", message.label());
            self.diagnostics.send_failures += 1;
        }
    }
}

impl<L: SessionLink> LoopHooks for Runtime<L> {
    fn on_sim_tick(&mut self, dt: Duration, tick: Tick) {
        self.absorb_inbox(tick);

        let batch = self.queue.flush(tick);
        let outbox = (self.role == Role::Host).then_some(&mut self.outbox);
        let first_event = self.events.len();
        let report = dispatch::dispatch(
            batch,
            &self.gate,
            self.local_slot,
            &mut self.world,
            outbox,
            &mut self.events,
        );
        self.diagnostics.commands_gated += report.gated as u64;
        self.diagnostics.commands_rejected += self.events[first_event..]
            .iter()
            .filter(|event| matches!(event, Event::CommandRejected { .. }))
            .count() as u64;

        if self.mode.is_mirror() {
            self.run_mirror(tick);
        } else {
            self.run_local_authority(dt, tick);
        }

        if self.role == Role::Host {
            self.relay(tick);
        }
    }

    fn on_render(&mut self, alpha: f32) {
        if !self.mode.is_mirror() {
            world::apply_local_render(&mut self.world, alpha);
            return;
        }

        if let Some(latest) = self.snapshots.latest() {
            for unit in &latest.units {
                let _ =
                    world::ensure_passive(&mut self.world, unit.id, unit.pose, &mut self.events);
            }
        }

        let Some(pair) = self.snapshots.interpolation_pair() else {
            return;
        };
        let last_arrival = match &self.mode {
            Mode::Mirror(state) => state.last_arrival(),
            Mode::LocalAuthority => self.now,
        };
        let blend = pair.alpha_after(self.now.saturating_sub(last_arrival));
        for (id, target) in pair.blend_all(blend) {
            let _ = world::set_render_target(&mut self.world, id, target);
        }
    }
}
