//! Session configuration loaded from TOML.

use std::{fs, io, path::Path, path::PathBuf, time::Duration};

use convoy_core::{SeatPolicy, POSITION_SYNC_INTERVAL_TICKS, STATE_HASH_INTERVAL_TICKS};
use convoy_system_sim_loop::{LoopConfig, LoopConfigError};
use convoy_system_snapshot_buffer::DEFAULT_CAPACITY;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading or validating a [`SessionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read session config {}", path.display())]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The file is not valid TOML or names unknown keys.
    #[error("failed to parse session config")]
    Parse(#[from] toml::de::Error),
    /// The timing values do not form a valid scheduler configuration.
    #[error(transparent)]
    Loop(#[from] LoopConfigError),
    /// A cadence that must fire was configured as zero.
    #[error("{field} must be greater than zero")]
    ZeroInterval {
        /// Name of the offending key.
        field: &'static str,
    },
    /// The spawn arena must have a positive extent.
    #[error("arena half extent {0} must be positive and finite")]
    InvalidArena(f32),
    /// Spawning needs at least one visual model to pick from.
    #[error("model_count must be greater than zero")]
    NoModels,
}

/// Tunable parameters of a session.
///
/// Every key is optional in the TOML file; missing keys keep their default.
/// A cadence of zero disables the corresponding broadcast.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Duration of one simulation tick in milliseconds.
    pub fixed_dt_ms: u64,
    /// Largest amount of wall-clock time a single frame may contribute.
    pub max_frame_ms: u64,
    /// Number of snapshots retained by a mirror.
    pub snapshot_capacity: usize,
    /// Distance above which a unit jumping between snapshots is snapped.
    pub discontinuity_distance: Option<f32>,
    /// Ticks between positional corrections published by a host.
    pub position_sync_interval_ticks: u64,
    /// Ticks between simulation digests.
    pub state_hash_interval_ticks: u64,
    /// Ticks between latched input messages sent by a mirror.
    pub input_send_interval_ticks: u64,
    /// Ticks between snapshots published by a host, if any.
    pub snapshot_broadcast_interval_ticks: Option<u64>,
    /// Ticks without a snapshot after which a mirror reports a stale link.
    pub stale_after_ticks: u64,
    /// Whether guests execute gated commands locally before the host does.
    pub guest_prediction: bool,
    /// Seat policy applied to spawned units.
    pub seat_policy: SeatPolicy,
    /// Units spawn inside `[-extent, extent]` on both ground axes.
    pub arena_half_extent: f32,
    /// Number of visual models a spawned unit picks from.
    pub model_count: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fixed_dt_ms: 50,
            max_frame_ms: 250,
            snapshot_capacity: DEFAULT_CAPACITY,
            discontinuity_distance: None,
            position_sync_interval_ticks: POSITION_SYNC_INTERVAL_TICKS,
            state_hash_interval_ticks: STATE_HASH_INTERVAL_TICKS,
            input_send_interval_ticks: 1,
            snapshot_broadcast_interval_ticks: None,
            stale_after_ticks: 40,
            guest_prediction: false,
            seat_policy: SeatPolicy::Fixed,
            arena_half_extent: 50.0,
            model_count: 4,
        }
    }
}

impl SessionConfig {
    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        log::debug!("loaded session config from {}", path.display());
        Ok(config)
    }

    /// Checks every value that would make a session unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let _ = self.loop_config()?;
        if self.input_send_interval_ticks == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "input_send_interval_ticks",
            });
        }
        if self.snapshot_broadcast_interval_ticks == Some(0) {
            return Err(ConfigError::ZeroInterval {
                field: "snapshot_broadcast_interval_ticks",
            });
        }
        if !(self.arena_half_extent.is_finite() && self.arena_half_extent > 0.0) {
            return Err(ConfigError::InvalidArena(self.arena_half_extent));
        }
        if self.model_count == 0 {
            return Err(ConfigError::NoModels);
        }
        Ok(())
    }

    /// Scheduler configuration derived from the timing values.
    pub fn loop_config(&self) -> Result<LoopConfig, ConfigError> {
        Ok(LoopConfig::new(
            Duration::from_millis(self.fixed_dt_ms),
            Duration::from_millis(self.max_frame_ms),
        )?)
    }
}
