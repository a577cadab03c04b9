//! Two-mode edge counter turning pin edges into frequency estimates.
//!
//! The counter runs one measurement window at a time. In gated mode the
//! window is a fixed time slice and the pulse count varies; in reciprocal
//! mode a target pulse count is fixed up front and the elapsed time is
//! measured, which keeps resolution high at low input frequencies. Edges
//! closer together than a fraction of the last measured period are treated
//! as glitches and discarded. An external sync input can force windows open
//! and closed regardless of mode.
//!
//! The struct itself is lock-free and single-threaded; the embedding wraps
//! it in its own critical section and feeds timestamps from the interrupt
//! path. No float math runs on the per-edge path — floats appear only when
//! a window is emitted.

use crate::config::{Config, Mode};

/// Floor for the reciprocal-mode pulse target.
pub const MIN_RECIP_EDGES: u32 = 64;
/// Frequency estimate assumed before the first window completes.
pub const DEFAULT_FREQ_ESTIMATE_HZ: f32 = 30_000.0;
/// Upper clamp for the running frequency estimate.
pub const MAX_FREQ_HZ: f32 = 1_000_000.0;
/// Lower clamp for the running frequency estimate.
pub const MIN_FREQ_HZ: f32 = 1.0;
/// Deglitch fraction substituted for non-positive configured values.
pub const DEFAULT_MIN_INTERVAL_FRAC: f32 = 0.25;

/// One-shot deadline used to close gated windows.
///
/// The counter schedules at most one deadline at a time; scheduling replaces
/// any armed deadline. The embedding fires [`EdgeCounter::on_gate_timeout`]
/// when the deadline elapses.
pub trait GateAlarm {
    /// Arms (or re-arms) the deadline at an absolute microsecond timestamp.
    fn schedule(&mut self, deadline_us: u64);

    /// Disarms any pending deadline.
    fn cancel(&mut self);
}

/// Alarm that performs no scheduling, for embeddings that poll.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopAlarm;

impl NoopAlarm {
    /// Creates a new no-op alarm.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl GateAlarm for NoopAlarm {
    fn schedule(&mut self, _: u64) {}

    fn cancel(&mut self) {}
}

/// Completed measurement window.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FreqResult {
    /// Mode the window ran under.
    pub mode: Mode,
    /// Edges kept after deglitching.
    pub pulses: u32,
    /// Total edges seen, including discarded ones.
    pub raw_pulses: u32,
    /// Edges rejected for violating the minimum interval.
    pub glitch_count: u32,
    /// Deglitch deadband in effect for the *next* window.
    pub min_interval_us: u32,
    /// Observed window length, rounded to milliseconds.
    pub tau_ms: u32,
    /// Window open timestamp.
    pub start_us: u64,
    /// Window close timestamp; always greater than `start_us`.
    pub end_us: u64,
    /// Corrected frequency in hertz.
    pub f_hz: f32,
    /// `round(f_hz * 1e4)` carried for float-free consumers.
    pub f_hz_x1e4: i32,
    /// Window was forced by the external sync input.
    pub sync_active: bool,
    /// Window was closed by the gate deadline (or an explicit stop).
    pub timeout: bool,
}

/// Edge counter state machine. See the module docs for the big picture.
pub struct EdgeCounter<A: GateAlarm> {
    alarm: A,
    mode: Mode,
    active: bool,
    window_open: bool,
    sync_forced: bool,
    tau_ms: u32,
    pulses: u32,
    raw_edges: u32,
    glitch_count: u32,
    target_edges: u32,
    min_interval_us: u32,
    min_interval_frac: f32,
    freq_estimate_hz: f32,
    timebase_ppm: f32,
    start_us: u64,
    end_us: u64,
    // 0 means "no edge accepted yet in this window".
    last_edge_us: u64,
}

fn clamp_freq(value: f32) -> f32 {
    if value < MIN_FREQ_HZ {
        MIN_FREQ_HZ
    } else if value > MAX_FREQ_HZ {
        MAX_FREQ_HZ
    } else {
        value
    }
}

impl<A: GateAlarm> EdgeCounter<A> {
    /// Creates an idle counter seeded from the configuration.
    pub fn new(config: &Config, alarm: A) -> Self {
        let mut counter = Self {
            alarm,
            mode: config.mode,
            active: false,
            window_open: false,
            sync_forced: false,
            tau_ms: config.tau_ms,
            pulses: 0,
            raw_edges: 0,
            glitch_count: 0,
            target_edges: 0,
            min_interval_us: 1,
            min_interval_frac: if config.min_interval_frac > 0.0 {
                config.min_interval_frac
            } else {
                DEFAULT_MIN_INTERVAL_FRAC
            },
            freq_estimate_hz: DEFAULT_FREQ_ESTIMATE_HZ,
            timebase_ppm: config.timebase_ppm,
            start_us: 0,
            end_us: 0,
            last_edge_us: 0,
        };
        counter.update_min_interval();
        counter
    }

    /// Arms a new measurement window starting now.
    ///
    /// A `tau_ms` of zero reuses the previous window length. Any armed gate
    /// deadline is cancelled first; gated windows schedule a fresh one.
    pub fn start_window(&mut self, mode: Mode, tau_ms: u32, now_us: u64) {
        let tau_ms = if tau_ms == 0 { self.tau_ms } else { tau_ms };

        self.alarm.cancel();
        self.mode = mode;
        self.tau_ms = tau_ms;
        self.pulses = 0;
        self.raw_edges = 0;
        self.glitch_count = 0;
        self.last_edge_us = 0;
        self.sync_forced = false;
        self.active = true;
        // Gated windows open immediately; reciprocal windows open on the
        // first accepted edge so dead time is not measured.
        self.window_open = mode == Mode::Gated;
        self.start_us = if self.window_open { now_us } else { 0 };
        self.end_us = self.start_us;

        match mode {
            Mode::Reciprocal => self.compute_target_edges(tau_ms),
            Mode::Gated => {
                self.alarm.schedule(now_us + u64::from(tau_ms) * 1_000);
            }
        }
    }

    /// Closes any in-flight window as a timeout and returns to idle.
    pub fn stop(&mut self) -> Option<FreqResult> {
        let result = self.emit(true);
        self.reset_window();
        result
    }

    /// Handles a rising edge on the frequency input.
    ///
    /// Returns a result when this edge completed a reciprocal window.
    pub fn on_freq_edge(&mut self, timestamp_us: u64) -> Option<FreqResult> {
        if !self.active {
            return None;
        }

        self.raw_edges += 1;
        if self.last_edge_us != 0 {
            let delta = timestamp_us.wrapping_sub(self.last_edge_us);
            if delta < u64::from(self.min_interval_us) {
                self.glitch_count += 1;
                return None;
            }
        }

        self.last_edge_us = timestamp_us;
        if !self.window_open {
            self.window_open = true;
            self.start_us = timestamp_us;
        }
        self.end_us = timestamp_us;
        self.pulses += 1;

        if self.mode == Mode::Reciprocal && self.pulses >= self.target_edges {
            return self.emit(false);
        }
        None
    }

    /// Handles a level change on the sync input.
    ///
    /// A rising edge forces a fresh window in the current mode; a falling
    /// edge closes the in-flight window and emits it.
    pub fn on_sync_edge(&mut self, level_high: bool, now_us: u64) -> Option<FreqResult> {
        if level_high {
            let mode = self.mode;
            let tau_ms = self.tau_ms;
            self.start_window(mode, tau_ms, now_us);
            self.sync_forced = true;
            None
        } else {
            if !self.active {
                return None;
            }
            self.end_us = now_us;
            self.emit(false)
        }
    }

    /// Fires the gated-window deadline.
    pub fn on_gate_timeout(&mut self, now_us: u64) -> Option<FreqResult> {
        if self.active && self.mode == Mode::Gated {
            self.end_us = now_us;
            return self.emit(true);
        }
        None
    }

    /// Installs the latest PPS timebase correction.
    pub fn update_timebase_ppm(&mut self, ppm: f32) {
        self.timebase_ppm = ppm;
    }

    /// Running frequency estimate from the last completed window.
    #[must_use]
    pub fn last_frequency(&self) -> f32 {
        self.freq_estimate_hz
    }

    /// Reconfigures the deglitch fraction and recomputes the deadband.
    pub fn set_min_interval_frac(&mut self, frac: f32) {
        self.min_interval_frac = frac;
        self.update_min_interval();
    }

    /// Deglitch deadband currently in effect.
    #[must_use]
    pub fn min_interval_us(&self) -> u32 {
        self.min_interval_us
    }

    /// Reciprocal stop criterion for the armed window.
    #[must_use]
    pub fn target_edges(&self) -> u32 {
        self.target_edges
    }

    /// Returns `true` while a window is armed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Accesses the owned gate alarm.
    pub fn alarm(&self) -> &A {
        &self.alarm
    }

    fn update_min_interval(&mut self) {
        let freq = clamp_freq(self.freq_estimate_hz);
        let frac = if self.min_interval_frac > 0.0 {
            self.min_interval_frac
        } else {
            DEFAULT_MIN_INTERVAL_FRAC
        };
        let base_period_us = 1e6 / freq;
        let min_interval = (base_period_us * frac) as u32;
        self.min_interval_us = min_interval.max(1);
    }

    fn compute_target_edges(&mut self, tau_ms: u32) {
        let freq = clamp_freq(self.freq_estimate_hz);
        let expected_edges = freq * tau_ms as f32 / 1000.0;
        let edges = (expected_edges + 0.5) as u32;
        self.target_edges = edges.max(MIN_RECIP_EDGES);
    }

    fn reset_window(&mut self) {
        self.active = false;
        self.window_open = false;
        self.sync_forced = false;
        self.pulses = 0;
        self.raw_edges = 0;
        self.target_edges = 0;
        self.glitch_count = 0;
        self.start_us = 0;
        self.end_us = 0;
        self.last_edge_us = 0;
        self.alarm.cancel();
    }

    /// Closes the current window and produces its result. Windows that never
    /// opened or never saw an accepted edge are silently discarded.
    fn emit(&mut self, timeout: bool) -> Option<FreqResult> {
        if !self.window_open {
            self.reset_window();
            return None;
        }

        let start_us = self.start_us;
        let mut end_us = self.end_us;
        if end_us <= start_us {
            end_us = start_us + 1;
        }
        let elapsed_us = end_us - start_us;
        let pulses = self.pulses;

        if pulses == 0 {
            self.reset_window();
            return None;
        }

        let mut f_hz = pulses as f32 * 1e6 / elapsed_us as f32;
        f_hz *= 1.0 + self.timebase_ppm * 1e-6;
        self.freq_estimate_hz = clamp_freq(f_hz);
        self.update_min_interval();

        let result = FreqResult {
            mode: self.mode,
            pulses,
            raw_pulses: self.raw_edges,
            glitch_count: self.glitch_count,
            min_interval_us: self.min_interval_us,
            tau_ms: libm::roundf(elapsed_us as f32 / 1000.0) as u32,
            start_us,
            end_us,
            f_hz,
            f_hz_x1e4: libm::roundf(f_hz * 1e4) as i32,
            sync_active: self.sync_forced,
            timeout,
        };
        self.reset_window();
        Some(result)
    }
}
