#![allow(dead_code)]

//! ADS1220 delta-sigma converter driver.
//!
//! The register layout, code conversion, and averaging live in
//! `bridge_core::adc`; this module owns the SPI transfers and the DRDY
//! deadline. The converter free-runs in continuous mode; one
//! [`AdcReader::read_microvolts`] call waits for the next conversion and
//! returns it filtered.

use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::{PIN_16, PIN_17, PIN_18, PIN_19, PIN_20, SPI0};
use embassy_rp::spi::{Blocking, Config as SpiConfig, Spi};
use embassy_time::{block_for, Duration, Instant};

use bridge_core::adc::{
    clear_adc_flags, code_to_microvolts, is_saturated, register_image, sign_extend_24, AdcConfig,
    AdcReader, EmaFilter,
};
use bridge_core::config::{flags, Config};

const CMD_RESET: u8 = 0x06;
const CMD_START: u8 = 0x08;
const CMD_RDATA: u8 = 0x10;
const CMD_WREG: u8 = 0x40;

const SPI_FREQUENCY_HZ: u32 = 1_000_000;

/// Blocking ADS1220 driver bound to SPI0 and the DRDY line.
pub struct Ads1220<'d> {
    spi: Spi<'d, SPI0, Blocking>,
    cs: Output<'d>,
    drdy: Input<'d>,
    filter: EmaFilter,
    gain: u8,
}

impl<'d> Ads1220<'d> {
    /// Brings up the converter: reset, configuration registers, continuous
    /// conversion start.
    pub fn new(
        spi: embassy_rp::Peri<'d, SPI0>,
        sck: embassy_rp::Peri<'d, PIN_18>,
        mosi: embassy_rp::Peri<'d, PIN_19>,
        miso: embassy_rp::Peri<'d, PIN_16>,
        cs: embassy_rp::Peri<'d, PIN_17>,
        drdy: embassy_rp::Peri<'d, PIN_20>,
        config: &Config,
    ) -> Self {
        let mut spi_config = SpiConfig::default();
        spi_config.frequency = SPI_FREQUENCY_HZ;

        let adc_config = AdcConfig::from_config(config);
        let mut driver = Self {
            spi: Spi::new_blocking(spi, sck, mosi, miso, spi_config),
            cs: Output::new(cs, Level::High),
            drdy: Input::new(drdy, Pull::Up),
            filter: EmaFilter::new(adc_config.average_window),
            gain: adc_config.gain,
        };

        block_for(Duration::from_millis(2));
        driver.write_command(CMD_RESET);
        block_for(Duration::from_millis(2));
        driver.write_registers(&register_image(&adc_config));
        driver.write_command(CMD_START);
        driver
    }

    /// Applies new front-end settings and restarts the average filter.
    pub fn apply_config(&mut self, adc_config: &AdcConfig) {
        self.gain = adc_config.gain;
        self.filter = EmaFilter::new(adc_config.average_window);
        self.write_registers(&register_image(adc_config));
    }

    fn write_command(&mut self, command: u8) {
        self.cs.set_low();
        let _ = self.spi.blocking_write(&[command]);
        self.cs.set_high();
    }

    fn write_registers(&mut self, registers: &[u8; 4]) {
        self.cs.set_low();
        let _ = self.spi.blocking_write(&[CMD_WREG | 0x03]);
        let _ = self.spi.blocking_write(registers);
        self.cs.set_high();
    }

    fn read_code(&mut self) -> i32 {
        let mut rx = [0u8; 3];
        self.cs.set_low();
        let _ = self.spi.blocking_write(&[CMD_RDATA]);
        let _ = self.spi.blocking_transfer(&mut rx, &[0xFF; 3]);
        self.cs.set_high();

        let raw = (u32::from(rx[0]) << 16) | (u32::from(rx[1]) << 8) | u32::from(rx[2]);
        sign_extend_24(raw)
    }
}

impl AdcReader for Ads1220<'_> {
    fn read_microvolts(&mut self, timeout_ms: u32, flags_out: &mut u8) -> Option<i32> {
        *flags_out = clear_adc_flags(*flags_out);

        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms.max(1)));
        while self.drdy.is_high() {
            if Instant::now() >= deadline {
                *flags_out |= flags::ADC_TIMEOUT;
                return None;
            }
            cortex_m::asm::nop();
        }

        let code = self.read_code();
        if is_saturated(code) {
            *flags_out |= flags::ADC_SATURATED;
        }
        Some(self.filter.apply(code_to_microvolts(code, self.gain)))
    }
}
