//! Firmware configuration and shared wire-level constants.
//!
//! One `Config` value describes a complete bridge personality: measurement
//! mode and window length, deglitch tuning, ADC front-end settings, stream
//! format, queue sizing, and the pin map. The defaults mirror the reference
//! board; deployments override individual fields at construction time.

/// Sentinel marking a GPIO assignment as not populated on this board.
pub const GPIO_UNUSED: u32 = u32::MAX;

/// USB vendor identifier presented on the CDC interface.
pub const USB_VENDOR_ID: u16 = 0x2E8A;
/// USB product identifier presented on the CDC interface.
pub const USB_PRODUCT_ID: u16 = 0x000A;

/// Status bits carried in every measurement frame.
pub mod flags {
    /// Window was forced by the external sync input.
    pub const SYNC_ACTIVE: u8 = 0x01;
    /// ADC data-ready did not assert before the read deadline.
    pub const ADC_TIMEOUT: u8 = 0x02;
    /// Timebase is disciplined against the PPS reference.
    pub const PPS_LOCKED: u8 = 0x04;
    /// ADC conversion code is at (or pinned near) full scale.
    pub const ADC_SATURATED: u8 = 0x08;
}

/// Frequency-measurement strategy for a window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Fixed time window, variable pulse count.
    Gated = 0,
    /// Fixed target pulse count, variable measured window.
    Reciprocal = 1,
}

impl Mode {
    /// Compact discriminant used in the binary frame encoding.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a frame discriminant back into a mode.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Mode::Gated),
            1 => Some(Mode::Reciprocal),
            _ => None,
        }
    }

    /// Label used by the CSV stream encoding.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Mode::Gated => "GATED",
            Mode::Reciprocal => "RECIP",
        }
    }
}

/// Serialization selected for the outgoing frame stream.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamFormat {
    Binary,
    Csv,
}

/// Complete firmware configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Config {
    /// Measurement mode armed after every emission.
    pub mode: Mode,
    /// Nominal window length in milliseconds.
    pub tau_ms: u32,
    /// Deglitch deadband as a fraction of the last measured period.
    pub min_interval_frac: f32,
    /// Initial timebase correction before PPS discipline takes over.
    pub timebase_ppm: f32,
    /// ADC programmable-gain setting (1..=128, powers of two).
    pub adc_gain: u8,
    /// ADC conversion rate in samples per second.
    pub adc_rate_sps: u16,
    /// Enable the ADC's 50/60 Hz rejection filter.
    pub adc_mains_reject: bool,
    /// Exponential-average window for ADC readings (1 disables).
    pub avg_window: u32,
    /// Stream binary frames instead of CSV lines.
    pub binary_frames: bool,
    /// Requested depth for the result and frame queues.
    pub queue_length: u32,
    /// External synchronization input, or [`GPIO_UNUSED`].
    pub sync_gpio: u32,
    /// PPS reference input, or [`GPIO_UNUSED`].
    pub pps_gpio: u32,
    /// Frequency input pin.
    pub freq_gpio: u32,
    /// ADC SPI chip select.
    pub spi_cs_gpio: u32,
    /// ADC data-ready line.
    pub spi_drdy_gpio: u32,
    /// ADC SPI clock.
    pub spi_sck_gpio: u32,
    /// ADC SPI MOSI.
    pub spi_mosi_gpio: u32,
    /// ADC SPI MISO.
    pub spi_miso_gpio: u32,
    /// Calibration EEPROM bus pin, or [`GPIO_UNUSED`].
    pub unio_gpio: u32,
    /// Calibration EEPROM bit rate in bits per second.
    pub unio_bitrate_bps: u32,
    /// Deadline for a single ADC reading in milliseconds (0 = default).
    pub adc_timeout_ms: u32,
    /// Emit deglitch statistics alongside each frame.
    pub debug_deglitch_stats: bool,
}

/// Fallback ADC read deadline applied when the configured value is zero.
pub const DEFAULT_ADC_TIMEOUT_MS: u32 = 200;

impl Config {
    /// Stream format selected by [`Config::binary_frames`].
    #[must_use]
    pub const fn stream_format(&self) -> StreamFormat {
        if self.binary_frames {
            StreamFormat::Binary
        } else {
            StreamFormat::Csv
        }
    }

    /// ADC read deadline with the zero-means-default rule applied.
    #[must_use]
    pub const fn adc_timeout_ms(&self) -> u32 {
        if self.adc_timeout_ms == 0 {
            DEFAULT_ADC_TIMEOUT_MS
        } else {
            self.adc_timeout_ms
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Reciprocal,
            tau_ms: 100,
            min_interval_frac: 0.25,
            timebase_ppm: 0.0,
            adc_gain: 16,
            adc_rate_sps: 20,
            adc_mains_reject: true,
            avg_window: 8,
            binary_frames: false,
            queue_length: 8,
            sync_gpio: 3,
            pps_gpio: 21,
            freq_gpio: 2,
            spi_cs_gpio: 17,
            spi_drdy_gpio: 20,
            spi_sck_gpio: 18,
            spi_mosi_gpio: 19,
            spi_miso_gpio: 16,
            unio_gpio: 22,
            unio_bitrate_bps: 19_200,
            adc_timeout_ms: 200,
            debug_deglitch_stats: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_reciprocal_csv() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Reciprocal);
        assert_eq!(config.stream_format(), StreamFormat::Csv);
        assert_eq!(config.tau_ms, 100);
        assert_eq!(config.queue_length, 8);
    }

    #[test]
    fn zero_adc_timeout_falls_back() {
        let config = Config {
            adc_timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.adc_timeout_ms(), DEFAULT_ADC_TIMEOUT_MS);
    }

    #[test]
    fn mode_discriminants_round_trip() {
        for mode in [Mode::Gated, Mode::Reciprocal] {
            assert_eq!(Mode::from_u8(mode.as_u8()), Some(mode));
        }
        assert_eq!(Mode::from_u8(2), None);
    }
}
