//! ADS1220 front-end logic that does not touch hardware.
//!
//! The SPI transfer itself lives in the firmware crate; everything that can
//! be reasoned about on the host is here: register-image construction from a
//! gain/rate/rejection configuration, 24-bit code handling, the microvolt
//! conversion against the internal 2.048 V reference, the saturation
//! threshold, and the running exponential average applied to readings.

use crate::config::{flags, Config};

/// Internal reference voltage in microvolts.
pub const VREF_MICROVOLTS: i64 = 2_048_000;
/// Full-scale magnitude of the 24-bit two's-complement code.
pub const FULL_SCALE: i64 = 1 << 23;
/// Code magnitude at which a conversion is reported saturated.
pub const SATURATION_CODE: i32 = 0x7F_FFF0;

/// Front-end settings applied to the converter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcConfig {
    /// Programmable gain, powers of two in 1..=128.
    pub gain: u8,
    /// Conversion rate in samples per second.
    pub rate_sps: u16,
    /// Enable the simultaneous 50/60 Hz rejection filter.
    pub mains_reject: bool,
    /// Exponential-average window; 1 disables filtering.
    pub average_window: u32,
}

impl AdcConfig {
    /// Extracts the converter settings from the firmware configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            gain: config.adc_gain,
            rate_sps: config.adc_rate_sps,
            mains_reject: config.adc_mains_reject,
            average_window: if config.avg_window > 0 {
                config.avg_window
            } else {
                8
            },
        }
    }
}

/// Gain field for configuration register 0. Unknown values fall back to 16x.
#[must_use]
pub fn gain_bits(gain: u8) -> u8 {
    match gain {
        1 => 0x00,
        2 => 0x01,
        4 => 0x02,
        8 => 0x03,
        16 => 0x04,
        32 => 0x05,
        64 => 0x06,
        128 => 0x07,
        _ => 0x04,
    }
}

/// Data-rate field for configuration register 1 (normal mode).
#[must_use]
pub fn rate_bits(rate_sps: u16) -> u8 {
    match rate_sps {
        0..=20 => 0x00,
        21..=45 => 0x01,
        46..=90 => 0x02,
        91..=175 => 0x03,
        176..=330 => 0x04,
        331..=600 => 0x05,
        601..=1000 => 0x06,
        _ => 0x07,
    }
}

/// Builds the four-register configuration image: AIN0/AIN1 differential
/// input, continuous conversion, internal reference, IDACs off.
#[must_use]
pub fn register_image(config: &AdcConfig) -> [u8; 4] {
    let mut reg0 = gain_bits(config.gain) << 1;
    if config.gain <= 1 {
        // PGA must be bypassed at unity gain.
        reg0 |= 0x01;
    }

    let mut reg1 = 0x04;
    reg1 |= rate_bits(config.rate_sps) << 5;

    let mut reg2 = 0x10;
    if config.mains_reject {
        reg2 |= 0x08;
    }

    [reg0, reg1, reg2, 0x00]
}

/// Sign-extends a raw 24-bit conversion code.
#[must_use]
pub const fn sign_extend_24(code: u32) -> i32 {
    ((code << 8) as i32) >> 8
}

/// Converts a conversion code to microvolts at the given gain.
#[must_use]
pub fn code_to_microvolts(code: i32, gain: u8) -> i32 {
    let gain = i64::from(gain.max(1));
    (i64::from(code) * VREF_MICROVOLTS / (gain * FULL_SCALE)) as i32
}

/// Returns `true` when the code magnitude is pinned near full scale.
#[must_use]
pub const fn is_saturated(code: i32) -> bool {
    code >= SATURATION_CODE || code <= -SATURATION_CODE
}

/// Running exponential average over microvolt readings.
///
/// `filtered += (sample - filtered) / window`; the first sample seeds the
/// filter so startup does not slew from zero.
pub struct EmaFilter {
    window: u32,
    state: Option<i32>,
}

impl EmaFilter {
    /// Creates a filter with the given window; windows below 2 pass samples
    /// through unchanged.
    #[must_use]
    pub const fn new(window: u32) -> Self {
        Self {
            window,
            state: None,
        }
    }

    /// Feeds one sample and returns the filtered value.
    pub fn apply(&mut self, sample: i32) -> i32 {
        if self.window <= 1 {
            return sample;
        }
        let next = match self.state {
            None => sample,
            Some(previous) => previous + (sample - previous) / self.window as i32,
        };
        self.state = Some(next);
        next
    }

    /// Discards filter history, e.g. after a configuration change.
    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Seam between the measurement pipeline and the converter driver.
///
/// One call produces at most one reading. Implementations clear the
/// [`flags::ADC_TIMEOUT`] and [`flags::ADC_SATURATED`] bits in `flags`, then
/// set them as observed: `None` with the timeout bit when data-ready never
/// asserted, `Some` with the saturation bit when the code was pinned.
pub trait AdcReader {
    /// Acquires one reading in microvolts within `timeout_ms`.
    fn read_microvolts(&mut self, timeout_ms: u32, flags: &mut u8) -> Option<i32>;
}

/// Clears the ADC-owned bits from a flag byte; drivers call this on entry.
#[must_use]
pub fn clear_adc_flags(bits: u8) -> u8 {
    bits & !(flags::ADC_TIMEOUT | flags::ADC_SATURATED)
}
