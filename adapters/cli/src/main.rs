#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Headless runner that drives a Convoy host and its guests over an
//! in-process loopback link.

use std::{path::PathBuf, time::Duration};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use convoy_core::{CommandKind, EntityId, MoveKeys, Role, SlotId};
use convoy_session::{
    config::SessionConfig,
    link::{LoopbackHub, LoopbackLink},
    Session,
};
use convoy_world::query;
use glam::Vec3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless Convoy session runner", long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed shared by every participant
    #[arg(long, default_value_t = 1234)]
    seed: u64,

    /// Number of guests joining the host
    #[arg(long, default_value_t = 1)]
    guests: u8,

    /// Number of units the host spawns
    #[arg(long, default_value_t = 4)]
    units: usize,

    /// Simulation ticks to run on the host
    #[arg(long, default_value_t = 200)]
    ticks: u64,

    /// Render frame duration in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Let guests execute gated commands before the host confirms them
    #[arg(long)]
    guest_prediction: bool,

    /// Publish a snapshot every N ticks, switching guests to mirror mode
    #[arg(long)]
    snapshot_interval: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    ensure!(args.frame_ms > 0, "--frame-ms must be greater than zero");

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    config.guest_prediction |= args.guest_prediction;
    if args.snapshot_interval.is_some() {
        config.snapshot_broadcast_interval_ticks = args.snapshot_interval;
    }
    config.validate().context("invalid session configuration")?;

    let hub = LoopbackHub::new();
    let mut host = Session::new(
        config.clone(),
        args.seed,
        hub.connect(Role::Host, SlotId::HOST),
    )
    .context("failed to start host session")?;
    let mut guests = (1..=args.guests)
        .map(|slot| {
            Session::new(
                config.clone(),
                args.seed,
                hub.connect(Role::Guest, SlotId::new(slot)),
            )
            .with_context(|| format!("failed to start guest session {slot}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let units = host.spawn_units(args.units).context("host failed to spawn")?;
    script_input(&mut host, &mut guests, &units);

    let frame = Duration::from_millis(args.frame_ms);
    let mut now = Duration::ZERO;
    while host.tick().get() < args.ticks {
        now += frame;
        pump(&hub, &mut host, &mut guests, now);
    }

    report(&host);
    for guest in &guests {
        report(guest);
    }
    Ok(())
}

/// Each guest drives one unit; the host sends another around a closed loop.
fn script_input(
    host: &mut Session<LoopbackLink>,
    guests: &mut [Session<LoopbackLink>],
    units: &[EntityId],
) {
    let forward = MoveKeys {
        forward: true,
        left: true,
        ..MoveKeys::NONE
    };
    for (guest, unit) in guests.iter_mut().zip(units) {
        let _ = guest.issue(*unit, CommandKind::Select);
        let _ = guest.issue(*unit, CommandKind::Move { keys: forward });
    }

    if let Some(unit) = units.get(guests.len()) {
        let loop_waypoints = vec![
            Vec3::new(-10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, -10.0),
            Vec3::new(10.0, 0.0, 10.0),
            Vec3::new(-10.0, 0.0, 10.0),
        ];
        let _ = host.issue(
            *unit,
            CommandKind::SetPath {
                waypoints: loop_waypoints,
            },
        );
        let _ = host.issue(*unit, CommandKind::ClosePath);
    }
}

fn pump(
    hub: &LoopbackHub,
    host: &mut Session<LoopbackLink>,
    guests: &mut [Session<LoopbackLink>],
    now: Duration,
) {
    host.receive_deliveries(hub.drain(host.local_slot()));
    let _ = host.step(now);
    for guest in guests.iter_mut() {
        guest.receive_deliveries(hub.drain(guest.local_slot()));
        let _ = guest.step(now);
        let _ = guest.drain_events();
    }
    for event in host.drain_events() {
        log::debug!("host event: {event:?}");
    }
}

fn report(session: &Session<LoopbackLink>) {
    let diagnostics = session.diagnostics();
    let digest = session
        .state_digest()
        .map_or_else(|error| format!("unavailable ({error})"), |digest| digest.to_string());
    println!(
        "{} {:?} mode={} tick={} units={} hashes_matched={} divergences={} link={:?} state={}",
        session.local_slot(),
        session.role(),
        session.mode().label(),
        session.tick(),
        query::unit_count(session.world()),
        diagnostics.hashes_matched,
        diagnostics.divergences.len(),
        diagnostics.link_health,
        digest,
    );
}
