//! Bit-banged single-wire bus for the calibration EEPROM.
//!
//! The transducer head carries a UNI/O EEPROM on one open-drain line.
//! Manchester-coded bits are driven and sampled with half-bit busy waits;
//! a read transaction is start header, device address, read command, the
//! two address bytes, then data bytes with per-byte acknowledge handshakes.
//! Device addresses are scanned because heads ship with different parts.

use embassy_rp::gpio::{Flex, Pull};
use embassy_rp::peripherals::PIN_22;
use embassy_time::{block_for, Duration};

use bridge_core::eeprom::{EepromAccess, EepromError, EepromImage, EEPROM_SIZE};

const STANDBY_PULSE_US: u64 = 600;
const HEADER_LOW_US: u64 = 10;
const MIN_HALF_BIT_US: u64 = 5;
const MAX_HALF_BIT_US: u64 = 200;
const START_HEADER: u8 = 0x55;
const CMD_READ: u8 = 0x03;
const DEVICE_ADDR_FIRST: u8 = 0xA0;
const DEVICE_ADDR_LAST: u8 = 0xAE;
const DEFAULT_BITRATE_BPS: u32 = 20_000;

/// Result of sampling one Manchester bit period.
#[derive(Copy, Clone, Eq, PartialEq)]
enum BitRead {
    Zero,
    One,
    /// Line stayed high: nobody is driving it.
    Idle,
    /// Line stayed low: a transfer went off the rails.
    Error,
}

/// Bit-banged UNI/O master on the calibration bus pin.
pub struct UnioEeprom<'d> {
    pin: Flex<'d>,
    half_bit: Duration,
}

impl<'d> UnioEeprom<'d> {
    pub fn new(pin: embassy_rp::Peri<'d, PIN_22>, bitrate_bps: u32) -> Self {
        let bitrate = if bitrate_bps == 0 {
            DEFAULT_BITRATE_BPS
        } else {
            bitrate_bps
        };
        let period_us = u64::from((1_000_000 + bitrate / 2) / bitrate);
        let half_us = (period_us / 2).clamp(MIN_HALF_BIT_US, MAX_HALF_BIT_US);

        let mut pin = Flex::new(pin);
        pin.set_pull(Pull::Up);
        pin.set_high();
        pin.set_as_input();

        Self {
            pin,
            half_bit: Duration::from_micros(half_us),
        }
    }

    fn drive(&mut self, high: bool) {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.pin.set_as_output();
    }

    fn release(&mut self) {
        self.pin.set_as_input();
    }

    fn standby(&mut self) {
        self.release();
        block_for(Duration::from_micros(STANDBY_PULSE_US));
    }

    fn tx_bit(&mut self, bit: bool) {
        self.drive(bit);
        block_for(self.half_bit);
        self.drive(!bit);
        block_for(self.half_bit);
    }

    fn tx_byte(&mut self, value: u8) {
        for bit in (0..8).rev() {
            self.tx_bit(value & (1 << bit) != 0);
        }
        self.release();
    }

    fn rx_bit(&mut self) -> BitRead {
        self.release();
        block_for(self.half_bit);
        let first = self.pin.is_high();
        block_for(self.half_bit);
        let second = self.pin.is_high();

        match (first, second) {
            (false, true) => BitRead::Zero,
            (true, false) => BitRead::One,
            (true, true) => BitRead::Idle,
            (false, false) => BitRead::Error,
        }
    }

    fn rx_byte(&mut self) -> Result<u8, EepromError> {
        let mut value = 0u8;
        for bit in (0..8).rev() {
            match self.rx_bit() {
                BitRead::One => value |= 1 << bit,
                BitRead::Zero => {}
                BitRead::Idle => return Err(EepromError::NoDevice),
                BitRead::Error => return Err(EepromError::Io),
            }
        }
        Ok(value)
    }

    /// Waits for the slave's acknowledge bit and answers with SAK.
    fn expect_ack(&mut self) -> Result<(), EepromError> {
        match self.rx_bit() {
            BitRead::One => {
                self.tx_bit(false);
                self.release();
                Ok(())
            }
            BitRead::Idle => Err(EepromError::NoDevice),
            _ => Err(EepromError::Io),
        }
    }

    /// Sends our acknowledge (`more` selects MAK/NoMAK) and checks the
    /// slave's response.
    fn send_ack(&mut self, more: bool) -> Result<(), EepromError> {
        self.tx_bit(more);
        self.release();
        match self.rx_bit() {
            BitRead::Zero => Ok(()),
            BitRead::Idle => Err(EepromError::NoDevice),
            _ => Err(EepromError::Io),
        }
    }

    fn try_read_from(
        &mut self,
        device: u8,
        addr: u16,
        buf: &mut [u8],
    ) -> Result<(), EepromError> {
        self.standby();
        self.drive(false);
        block_for(Duration::from_micros(HEADER_LOW_US));
        self.tx_byte(START_HEADER);

        self.tx_byte(device);
        self.expect_ack()?;
        self.tx_byte(CMD_READ);
        self.expect_ack()?;
        self.tx_byte((addr >> 8) as u8);
        self.expect_ack()?;
        self.tx_byte(addr as u8);
        self.expect_ack()?;

        let last = buf.len() - 1;
        for (index, slot) in buf.iter_mut().enumerate() {
            *slot = self.rx_byte()?;
            self.send_ack(index < last)?;
        }

        self.standby();
        Ok(())
    }
}

impl EepromAccess for UnioEeprom<'_> {
    fn read(&mut self, addr: u16, len: usize) -> Result<EepromImage, EepromError> {
        if len == 0 {
            return Err(EepromError::Io);
        }
        let len = len.min(EEPROM_SIZE);
        let mut buf = [0u8; EEPROM_SIZE];

        let mut device = DEVICE_ADDR_FIRST;
        while device <= DEVICE_ADDR_LAST {
            match self.try_read_from(device, addr, &mut buf[..len]) {
                Ok(()) => return Ok(EepromImage::new(device, addr, &buf[..len])),
                Err(EepromError::Io) => {
                    self.standby();
                    return Err(EepromError::Io);
                }
                Err(EepromError::NoDevice) => self.standby(),
            }
            device += 2;
        }
        Err(EepromError::NoDevice)
    }
}
