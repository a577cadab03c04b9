//! Measurement fusion: frequency result + ADC reading + PPS status.
//!
//! The worker feeds every completed window through [`FramePipeline::process`],
//! which binds exactly one ADC acquisition to the window, stamps the PPS
//! correction and lock state, and assembles the frame that goes to the host.
//! A failed ADC read reuses the last good voltage so the frame still carries
//! the fresh frequency; the timeout flag makes the substitution visible.

use crate::adc::AdcReader;
use crate::config::{flags, Config};
use crate::counter::FreqResult;
use crate::frame::Frame;
use crate::pps::PpsStatus;

/// Assembles frames from completed measurement windows.
pub struct FramePipeline {
    adc_gain: u8,
    adc_timeout_ms: u32,
    last_diode_uv: i32,
}

impl FramePipeline {
    /// Creates a pipeline seeded from the configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            adc_gain: config.adc_gain,
            adc_timeout_ms: config.adc_timeout_ms(),
            last_diode_uv: 0,
        }
    }

    /// Last voltage acquired successfully, in microvolts.
    #[must_use]
    pub fn last_diode_microvolts(&self) -> i32 {
        self.last_diode_uv
    }

    /// Fuses one frequency result with a companion ADC reading and the
    /// current PPS status into a frame.
    pub fn process<A: AdcReader>(
        &mut self,
        freq: &FreqResult,
        adc: &mut A,
        pps: PpsStatus,
    ) -> Frame {
        let mut frame_flags = 0u8;
        if freq.sync_active {
            frame_flags |= flags::SYNC_ACTIVE;
        }

        let mut adc_flags = 0u8;
        if let Some(microvolts) = adc.read_microvolts(self.adc_timeout_ms, &mut adc_flags) {
            self.last_diode_uv = microvolts;
        }
        frame_flags |= adc_flags;
        frame_flags |= pps.flags;

        Frame {
            ts_ms: (freq.end_us / 1_000) as u32,
            f_hz: freq.f_hz,
            f_hz_x1e4: freq.f_hz_x1e4,
            tau_ms: freq.tau_ms as u16,
            diode_uv: self.last_diode_uv,
            adc_gain: self.adc_gain,
            flags: frame_flags,
            ppm_corr: pps.correction_ppm,
            ppm_corr_x1e2: libm::roundf(pps.correction_ppm * 100.0) as i16,
            mode: freq.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn freq_result() -> FreqResult {
        FreqResult {
            mode: Mode::Reciprocal,
            pulses: 1_000,
            raw_pulses: 1_000,
            glitch_count: 0,
            min_interval_us: 25,
            tau_ms: 100,
            start_us: 1_500_000,
            end_us: 1_599_900,
            f_hz: 10_001.0,
            f_hz_x1e4: 100_010_000,
            sync_active: false,
            timeout: false,
        }
    }

    struct ScriptedAdc {
        responses: std::vec::Vec<(Option<i32>, u8)>,
    }

    impl AdcReader for ScriptedAdc {
        fn read_microvolts(&mut self, _timeout_ms: u32, flags_out: &mut u8) -> Option<i32> {
            let (value, bits) = self.responses.remove(0);
            *flags_out = bits;
            value
        }
    }

    #[test]
    fn frame_carries_reading_and_scaled_mirrors() {
        let mut pipeline = FramePipeline::new(&Config::default());
        let mut adc = ScriptedAdc {
            responses: std::vec![(Some(-12_345), 0)],
        };

        let frame = pipeline.process(
            &freq_result(),
            &mut adc,
            PpsStatus {
                correction_ppm: -0.424,
                flags: flags::PPS_LOCKED,
            },
        );

        assert_eq!(frame.ts_ms, 1_599);
        assert_eq!(frame.diode_uv, -12_345);
        assert_eq!(frame.adc_gain, 16);
        assert_eq!(frame.flags, flags::PPS_LOCKED);
        assert_eq!(frame.ppm_corr_x1e2, -42);
        assert_eq!(frame.tau_ms, 100);
        assert_eq!(frame.mode, Mode::Reciprocal);
        assert_eq!(pipeline.last_diode_microvolts(), -12_345);
    }

    #[test]
    fn adc_timeout_reuses_last_good_reading() {
        let mut pipeline = FramePipeline::new(&Config::default());
        let mut adc = ScriptedAdc {
            responses: std::vec![
                (Some(7_000), 0),
                (None, flags::ADC_TIMEOUT),
            ],
        };
        let pps = PpsStatus {
            correction_ppm: 0.0,
            flags: 0,
        };

        let first = pipeline.process(&freq_result(), &mut adc, pps);
        assert_eq!(first.diode_uv, 7_000);
        assert_eq!(first.flags, 0);

        let second = pipeline.process(&freq_result(), &mut adc, pps);
        assert_eq!(second.diode_uv, 7_000);
        assert_eq!(second.flags, flags::ADC_TIMEOUT);
    }

    #[test]
    fn flag_sources_are_ored_together() {
        let mut pipeline = FramePipeline::new(&Config::default());
        let mut adc = ScriptedAdc {
            responses: std::vec![(Some(123), flags::ADC_SATURATED)],
        };

        let frame = pipeline.process(
            &FreqResult {
                sync_active: true,
                ..freq_result()
            },
            &mut adc,
            PpsStatus {
                correction_ppm: 1.5,
                flags: flags::PPS_LOCKED,
            },
        );

        assert_eq!(
            frame.flags,
            flags::SYNC_ACTIVE | flags::ADC_SATURATED | flags::PPS_LOCKED
        );
        assert_eq!(frame.ppm_corr_x1e2, 150);
    }
}
