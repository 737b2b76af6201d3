//! Locally authoritative versus mirrored execution.

use std::time::Duration;

use convoy_core::Tick;

/// Freshness of the snapshot stream feeding a mirror.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinkHealth {
    /// Snapshots arrive on time.
    #[default]
    Live,
    /// No snapshot arrived for longer than the configured threshold.
    Stale,
}

/// Bookkeeping of a participant in [`Mode::Mirror`].
#[derive(Clone, Debug, PartialEq)]
pub struct MirrorState {
    entered_at: Tick,
    last_arrival: Duration,
    ticks_since_snapshot: u64,
    snapshots_received: u64,
    health: LinkHealth,
}

impl MirrorState {
    pub(crate) fn entered(tick: Tick, now: Duration) -> Self {
        Self {
            entered_at: tick,
            last_arrival: now,
            ticks_since_snapshot: 0,
            snapshots_received: 1,
            health: LinkHealth::Live,
        }
    }

    /// Tick of the snapshot that triggered the switch.
    #[must_use]
    pub const fn entered_at(&self) -> Tick {
        self.entered_at
    }

    /// Local time the latest snapshot arrived at.
    #[must_use]
    pub const fn last_arrival(&self) -> Duration {
        self.last_arrival
    }

    /// Ticks run since the latest snapshot arrived.
    #[must_use]
    pub const fn ticks_since_snapshot(&self) -> u64 {
        self.ticks_since_snapshot
    }

    /// Snapshots received since entering the mode.
    #[must_use]
    pub const fn snapshots_received(&self) -> u64 {
        self.snapshots_received
    }

    /// Freshness of the snapshot stream.
    #[must_use]
    pub const fn health(&self) -> LinkHealth {
        self.health
    }

    /// Records a snapshot arrival. Returns `true` when a stale link recovered.
    pub(crate) fn note_snapshot(&mut self, now: Duration) -> bool {
        self.last_arrival = now;
        self.ticks_since_snapshot = 0;
        self.snapshots_received += 1;
        let recovered = self.health == LinkHealth::Stale;
        self.health = LinkHealth::Live;
        recovered
    }

    /// Records a tick without local physics. Returns `true` when the link
    /// just turned stale. A zero threshold disables staleness.
    pub(crate) fn note_tick(&mut self, stale_after_ticks: u64) -> bool {
        self.ticks_since_snapshot = self.ticks_since_snapshot.saturating_add(1);
        if stale_after_ticks == 0 || self.health == LinkHealth::Stale {
            return false;
        }
        if self.ticks_since_snapshot >= stale_after_ticks {
            self.health = LinkHealth::Stale;
            return true;
        }
        false
    }
}

/// Execution mode of a session.
///
/// The switch to [`Mode::Mirror`] happens at most once per session.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Mode {
    /// The local world runs unit physics every tick.
    #[default]
    LocalAuthority,
    /// The local world follows snapshots from a remote authority.
    Mirror(MirrorState),
}

impl Mode {
    /// Reports whether the session mirrors a remote authority.
    #[must_use]
    pub const fn is_mirror(&self) -> bool {
        matches!(self, Self::Mirror(_))
    }

    /// Freshness of the snapshot stream; always live outside mirror mode.
    #[must_use]
    pub fn health(&self) -> LinkHealth {
        match self {
            Self::LocalAuthority => LinkHealth::Live,
            Self::Mirror(state) => state.health(),
        }
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::LocalAuthority => "local-authority",
            Self::Mirror(_) => "mirror",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_turns_stale_once_and_recovers() {
        let mut state = MirrorState::entered(Tick::new(5), Duration::ZERO);
        let transitions = (0..50).filter(|_| state.note_tick(40)).count();
        assert_eq!(transitions, 1);
        assert_eq!(state.health(), LinkHealth::Stale);

        assert!(state.note_snapshot(Duration::from_secs(3)));
        assert_eq!(state.health(), LinkHealth::Live);
        assert_eq!(state.ticks_since_snapshot(), 0);
        assert_eq!(state.entered_at(), Tick::new(5));
    }

    #[test]
    fn zero_threshold_never_goes_stale() {
        let mut state = MirrorState::entered(Tick::ZERO, Duration::ZERO);
        assert!((0..1_000).all(|_| !state.note_tick(0)));
        assert_eq!(Mode::Mirror(state).health(), LinkHealth::Live);
    }
}
