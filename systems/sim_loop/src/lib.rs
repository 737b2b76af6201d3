#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Fixed-timestep scheduler decoupled from the render rate.
//!
//! Every call to [`SimLoop::step`] accumulates the wall-clock time elapsed
//! since the previous call (clamped to [`LoopConfig::max_frame_dt`]), emits
//! one [`LoopHooks::on_sim_tick`] per whole `fixed_dt` contained in the
//! accumulator and finishes with a single [`LoopHooks::on_render`] carrying
//! the leftover fraction. Time is tracked in integer nanoseconds so the
//! number of ticks over a duration never depends on how that duration was
//! split into frames.

use std::time::Duration;

use convoy_core::{Tick, FIXED_TIMESTEP};
use thiserror::Error;

/// Default upper bound on the time a single frame may contribute.
pub const DEFAULT_MAX_FRAME_DT: Duration = Duration::from_millis(250);

/// Invalid scheduler configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoopConfigError {
    /// The fixed timestep must be strictly positive.
    #[error("fixed timestep must be greater than zero")]
    ZeroTimestep,
    /// A frame clamp smaller than one tick would never let a tick run.
    #[error("max frame dt {max_frame_dt:?} is shorter than the fixed timestep {fixed_dt:?}")]
    FrameClampBelowTimestep {
        /// Requested fixed timestep.
        fixed_dt: Duration,
        /// Requested frame clamp.
        max_frame_dt: Duration,
    },
}

/// Validated scheduler configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopConfig {
    fixed_dt: Duration,
    max_frame_dt: Duration,
}

impl LoopConfig {
    /// Validates a timestep and frame clamp pair.
    pub fn new(fixed_dt: Duration, max_frame_dt: Duration) -> Result<Self, LoopConfigError> {
        if fixed_dt.is_zero() {
            return Err(LoopConfigError::ZeroTimestep);
        }
        if max_frame_dt < fixed_dt {
            return Err(LoopConfigError::FrameClampBelowTimestep {
                fixed_dt,
                max_frame_dt,
            });
        }
        Ok(Self {
            fixed_dt,
            max_frame_dt,
        })
    }

    /// Duration of one simulation tick.
    #[must_use]
    pub const fn fixed_dt(&self) -> Duration {
        self.fixed_dt
    }

    /// Largest amount of time a single frame may add to the accumulator.
    #[must_use]
    pub const fn max_frame_dt(&self) -> Duration {
        self.max_frame_dt
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            fixed_dt: FIXED_TIMESTEP,
            max_frame_dt: DEFAULT_MAX_FRAME_DT,
        }
    }
}

/// Observer driven by the scheduler.
pub trait LoopHooks {
    /// Runs one simulation tick of duration `dt`; `tick` is the tick executing.
    fn on_sim_tick(&mut self, dt: Duration, tick: Tick);

    /// Presents a frame; `alpha` is the leftover fraction of a tick in `[0, 1)`.
    fn on_render(&mut self, alpha: f32);
}

/// Summary of a single [`SimLoop::step`] call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    /// Number of ticks executed during the step.
    pub ticks: u32,
    /// Interpolation fraction handed to the render hook.
    pub alpha: f32,
    /// Wall-clock time discarded by the frame clamp.
    pub clamped: Duration,
}

/// Fixed-timestep scheduler.
#[derive(Clone, Debug)]
pub struct SimLoop {
    config: LoopConfig,
    tick: Tick,
    accumulator: Duration,
    last_time: Duration,
}

impl SimLoop {
    /// Creates a scheduler whose clock starts at the zero instant.
    #[must_use]
    pub fn new(config: LoopConfig) -> Self {
        Self::starting_at(config, Duration::ZERO)
    }

    /// Creates a scheduler whose clock starts at `now`.
    #[must_use]
    pub fn starting_at(config: LoopConfig, now: Duration) -> Self {
        Self {
            config,
            tick: Tick::ZERO,
            accumulator: Duration::ZERO,
            last_time: now,
        }
    }

    /// Configuration the scheduler runs with.
    #[must_use]
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Number of ticks executed so far.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Time accumulated towards the next tick.
    #[must_use]
    pub const fn accumulator(&self) -> Duration {
        self.accumulator
    }

    /// Advances the clock to `now`, running every tick that became due.
    pub fn step<H>(&mut self, now: Duration, hooks: &mut H) -> StepReport
    where
        H: LoopHooks + ?Sized,
    {
        let elapsed = now.saturating_sub(self.last_time);
        self.last_time = now;
        let admitted = elapsed.min(self.config.max_frame_dt);
        let clamped = elapsed - admitted;
        if !clamped.is_zero() {
            log::debug!("frame clamp discarded {clamped:?} at tick {}", self.tick);
        }
        self.accumulator += admitted;

        let fixed_dt = self.config.fixed_dt;
        let mut ticks = 0u32;
        while self.accumulator >= fixed_dt {
            hooks.on_sim_tick(fixed_dt, self.tick);
            self.tick = self.tick.next();
            self.accumulator -= fixed_dt;
            ticks += 1;
        }

        let alpha = (self.accumulator.as_secs_f64() / fixed_dt.as_secs_f64()) as f32;
        hooks.on_render(alpha);

        StepReport {
            ticks,
            alpha,
            clamped,
        }
    }

    /// Re-baselines the clock at `now` without running ticks.
    ///
    /// Used after a pause or a state load so the idle time is not replayed.
    pub fn resync(&mut self, now: Duration) {
        self.last_time = now;
        self.accumulator = Duration::ZERO;
    }

    /// Overwrites the tick counter during state restoration.
    ///
    /// Must only be called between steps.
    pub fn restore_tick(&mut self, tick: Tick) {
        log::debug!("tick counter restored from {} to {}", self.tick, tick);
        self.tick = tick;
    }
}
