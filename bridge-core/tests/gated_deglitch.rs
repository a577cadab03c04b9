//! Gated windows against a glitchy 30 kHz input.

use bridge_core::config::{Config, Mode};
use bridge_core::counter::{EdgeCounter, FreqResult, GateAlarm};

const TAU_MS: u32 = 50;
const GLITCH_COUNT: usize = 10;

#[derive(Default)]
struct LatchedAlarm {
    deadline_us: Option<u64>,
}

impl GateAlarm for LatchedAlarm {
    fn schedule(&mut self, deadline_us: u64) {
        self.deadline_us = Some(deadline_us);
    }

    fn cancel(&mut self) {
        self.deadline_us = None;
    }
}

/// Edge times for ~30 kHz (33/33/34 us pattern), with glitch edges injected
/// one microsecond after every hundredth legitimate edge.
fn edge_stream() -> Vec<u64> {
    let mut edges = Vec::new();
    let mut index = 1u64;
    loop {
        let timestamp = index * 100 / 3;
        if timestamp >= u64::from(TAU_MS) * 1_000 {
            break;
        }
        edges.push(timestamp);
        if index % 100 == 0 && index <= 100 * GLITCH_COUNT as u64 {
            edges.push(timestamp + 1);
        }
        index += 1;
    }
    edges
}

fn run_window(min_interval_frac: Option<f32>) -> FreqResult {
    let mut counter = EdgeCounter::new(&Config::default(), LatchedAlarm::default());
    if let Some(frac) = min_interval_frac {
        counter.set_min_interval_frac(frac);
    }

    counter.start_window(Mode::Gated, TAU_MS, 0);
    let deadline = counter.alarm().deadline_us.expect("gate deadline armed");
    assert_eq!(deadline, u64::from(TAU_MS) * 1_000);

    for timestamp in edge_stream() {
        assert!(
            counter.on_freq_edge(timestamp).is_none(),
            "gated windows emit only on the deadline"
        );
    }
    counter.on_gate_timeout(deadline).expect("deadline emits")
}

#[test]
fn glitches_are_rejected_and_accounted() {
    let result = run_window(None);

    // Default quarter-period deadband at 30 kHz is 8 us; the injected
    // +1 us edges all fall inside it.
    assert_eq!(result.glitch_count, GLITCH_COUNT as u32);
    assert_eq!(result.raw_pulses, result.pulses + result.glitch_count);
    assert!(result.pulses >= 1_490 && result.pulses <= 1_500);
    assert!(result.timeout);
    assert_eq!(result.tau_ms, TAU_MS);
    assert!(result.f_hz > 29_000.0 && result.f_hz < 31_000.0);
}

#[test]
fn deadband_widens_monotonically_with_the_fraction() {
    let mut previous: Option<FreqResult> = None;
    for frac in [0.05f32, 0.25, 0.6, 0.95] {
        let result = run_window(Some(frac));
        if let Some(earlier) = previous {
            assert!(
                result.pulses <= earlier.pulses,
                "wider deadband must not keep more edges"
            );
            assert!(
                result.glitch_count >= earlier.glitch_count,
                "wider deadband must not reject fewer edges"
            );
        }
        previous = Some(result);
    }
}

#[test]
fn window_without_pulses_is_silently_discarded() {
    let mut counter = EdgeCounter::new(&Config::default(), LatchedAlarm::default());
    counter.start_window(Mode::Gated, TAU_MS, 0);
    assert!(counter.on_gate_timeout(u64::from(TAU_MS) * 1_000).is_none());
    assert!(!counter.is_active());
}
