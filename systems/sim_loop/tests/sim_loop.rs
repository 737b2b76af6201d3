use std::time::Duration;

use convoy_core::Tick;
use convoy_system_sim_loop::{LoopConfig, LoopConfigError, LoopHooks, SimLoop};
use proptest::prelude::*;

#[derive(Default)]
struct Recorder {
    ticks: Vec<(Duration, Tick)>,
    alphas: Vec<f32>,
}

impl LoopHooks for Recorder {
    fn on_sim_tick(&mut self, dt: Duration, tick: Tick) {
        self.ticks.push((dt, tick));
    }

    fn on_render(&mut self, alpha: f32) {
        self.alphas.push(alpha);
    }
}

fn config() -> LoopConfig {
    LoopConfig::new(Duration::from_millis(50), Duration::from_millis(250)).expect("valid config")
}

fn run(frames: &[u64]) -> Recorder {
    let mut sim = SimLoop::new(config());
    let mut recorder = Recorder::default();
    let mut now = Duration::ZERO;
    for frame in frames {
        now += Duration::from_millis(*frame);
        let _ = sim.step(now, &mut recorder);
    }
    recorder
}

#[test]
fn emits_whole_ticks_and_renders_once_per_step() {
    let mut sim = SimLoop::new(config());
    let mut recorder = Recorder::default();

    let report = sim.step(Duration::from_millis(120), &mut recorder);

    assert_eq!(report.ticks, 2);
    assert_eq!(sim.tick(), Tick::new(2));
    assert_eq!(recorder.alphas.len(), 1);
    assert!((report.alpha - 0.4).abs() < 1e-6);
    assert_eq!(
        recorder.ticks,
        vec![
            (Duration::from_millis(50), Tick::new(0)),
            (Duration::from_millis(50), Tick::new(1)),
        ]
    );
}

#[test]
fn slow_frame_is_clamped() {
    let mut sim = SimLoop::new(config());
    let mut recorder = Recorder::default();

    let report = sim.step(Duration::from_secs(10), &mut recorder);

    assert_eq!(report.ticks, 5, "only max_frame_dt worth of ticks may run");
    assert_eq!(report.clamped, Duration::from_millis(9_750));
    assert_eq!(sim.accumulator(), Duration::ZERO);
}

#[test]
fn alpha_stays_below_one() {
    let recorder = run(&[16, 17, 16, 17, 16, 17, 49, 1, 33]);
    for alpha in recorder.alphas {
        assert!((0.0..1.0).contains(&alpha), "alpha {alpha} out of range");
    }
}

#[test]
fn ticks_are_strictly_increasing() {
    let recorder = run(&[16; 120]);
    for (index, (_, tick)) in recorder.ticks.iter().enumerate() {
        assert_eq!(tick.get(), index as u64);
    }
    assert_eq!(recorder.ticks.len(), 16 * 120 / 50);
}

#[test]
fn restore_tick_continues_from_restored_value() {
    let mut sim = SimLoop::new(config());
    let mut recorder = Recorder::default();
    let _ = sim.step(Duration::from_millis(100), &mut recorder);

    sim.restore_tick(Tick::new(500));
    let _ = sim.step(Duration::from_millis(150), &mut recorder);

    assert_eq!(recorder.ticks.last().map(|(_, tick)| *tick), Some(Tick::new(500)));
    assert_eq!(sim.tick(), Tick::new(501));
}

#[test]
fn resync_skips_idle_time() {
    let mut sim = SimLoop::new(config());
    let mut recorder = Recorder::default();
    let _ = sim.step(Duration::from_millis(70), &mut recorder);

    sim.resync(Duration::from_secs(60));
    let report = sim.step(Duration::from_millis(60_040), &mut recorder);

    assert_eq!(report.ticks, 0);
    assert_eq!(sim.tick(), Tick::new(1));
}

#[test]
fn frame_clamp_below_timestep_is_rejected() {
    let error = LoopConfig::new(Duration::from_millis(50), Duration::from_millis(10))
        .expect_err("clamp below timestep");
    assert!(matches!(error, LoopConfigError::FrameClampBelowTimestep { .. }));
}

proptest! {
    #[test]
    fn tick_count_is_independent_of_frame_partition(
        frames in proptest::collection::vec(0u64..=250, 1..200)
    ) {
        let total: u64 = frames.iter().sum();
        let recorder = run(&frames);

        prop_assert_eq!(recorder.ticks.len() as u64, total / 50);
        prop_assert!(recorder
            .ticks
            .iter()
            .all(|(dt, _)| *dt == Duration::from_millis(50)));
    }

    #[test]
    fn same_duration_split_differently_yields_same_ticks(
        frames in proptest::collection::vec(1u64..=250, 1..100)
    ) {
        let total: u64 = frames.iter().sum();
        let mut even = vec![total / frames.len() as u64; frames.len()];
        let remainder = total - even.iter().sum::<u64>();
        even[0] += remainder;
        prop_assume!(even[0] <= 250);

        prop_assert_eq!(run(&frames).ticks, run(&even).ticks);
    }
}
