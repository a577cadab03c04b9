//! Measurement frame type and the two stream encodings.
//!
//! A [`Frame`] is one fused measurement record: timestamp, corrected
//! frequency, companion ADC voltage, PPS correction, and status flags. The
//! binary encoding is a fixed 24-byte record (`0x55 0xAA` preamble, 19-byte
//! little-endian payload, CRC-16/CCITT trailer); the text encoding is one
//! CRLF-terminated CSV line. Both carry the scaled integer mirrors
//! (`f_hz_x1e4`, `ppm_corr_x1e2`) so host tooling can stay float-free.

use core::fmt::Write as _;

use heapless::String;

use crate::config::Mode;

/// Two-byte preamble opening every binary frame.
pub const FRAME_HEADER: [u8; 2] = [0x55, 0xAA];
/// Packed payload length in bytes.
pub const FRAME_PAYLOAD_LEN: usize = 19;
/// Total binary frame length: preamble, length byte, payload, CRC.
pub const BINARY_FRAME_LEN: usize = FRAME_HEADER.len() + 1 + FRAME_PAYLOAD_LEN + 2;
/// Upper bound for an encoded CSV line.
pub const MAX_CSV_LEN: usize = 160;

/// One fused measurement record streamed to the host.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    /// Window end timestamp in milliseconds since boot.
    pub ts_ms: u32,
    /// Corrected frequency in hertz.
    pub f_hz: f32,
    /// `round(f_hz * 1e4)`, the integer mirror carried on the wire.
    pub f_hz_x1e4: i32,
    /// Observed window length in milliseconds.
    pub tau_ms: u16,
    /// Diode/thermocouple voltage in microvolts.
    pub diode_uv: i32,
    /// ADC gain the voltage was captured with.
    pub adc_gain: u8,
    /// Status bits, see [`crate::config::flags`].
    pub flags: u8,
    /// Timebase correction in parts per million.
    pub ppm_corr: f32,
    /// `round(ppm_corr * 100)`, the integer mirror carried on the wire.
    pub ppm_corr_x1e2: i16,
    /// Measurement mode the window ran under.
    pub mode: Mode,
}

/// Reasons a byte buffer failed to decode into a [`Frame`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameDecodeError {
    /// Buffer shorter than a complete binary frame.
    Truncated,
    /// Preamble bytes did not match.
    Header,
    /// Length byte disagreed with the fixed payload size.
    PayloadLength,
    /// CRC trailer did not match the payload.
    Crc,
    /// Mode discriminant outside the known set.
    Mode,
}

/// CRC-16/CCITT: init `0xFFFF`, polynomial `0x1021`, no reflection, no
/// final xor. Shared with the host-side decoder.
#[must_use]
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

impl Frame {
    /// Encodes the frame into its fixed-size binary representation.
    #[must_use]
    pub fn encode_binary(&self) -> [u8; BINARY_FRAME_LEN] {
        let mut payload = [0u8; FRAME_PAYLOAD_LEN];
        payload[0..4].copy_from_slice(&self.ts_ms.to_le_bytes());
        payload[4..8].copy_from_slice(&self.f_hz_x1e4.to_le_bytes());
        payload[8..10].copy_from_slice(&self.tau_ms.to_le_bytes());
        payload[10..14].copy_from_slice(&self.diode_uv.to_le_bytes());
        payload[14] = self.adc_gain;
        payload[15] = self.flags;
        payload[16..18].copy_from_slice(&self.ppm_corr_x1e2.to_le_bytes());
        payload[18] = self.mode.as_u8();

        let mut out = [0u8; BINARY_FRAME_LEN];
        out[0..2].copy_from_slice(&FRAME_HEADER);
        out[2] = FRAME_PAYLOAD_LEN as u8;
        out[3..3 + FRAME_PAYLOAD_LEN].copy_from_slice(&payload);
        let crc = crc16_ccitt(&payload);
        out[3 + FRAME_PAYLOAD_LEN..].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decodes a binary frame, validating preamble, length, and CRC.
    ///
    /// The float fields are reconstructed from their integer mirrors, so
    /// they round-trip only to the mirror's resolution.
    pub fn decode_binary(bytes: &[u8]) -> Result<Self, FrameDecodeError> {
        if bytes.len() < BINARY_FRAME_LEN {
            return Err(FrameDecodeError::Truncated);
        }
        if bytes[0..2] != FRAME_HEADER {
            return Err(FrameDecodeError::Header);
        }
        if bytes[2] as usize != FRAME_PAYLOAD_LEN {
            return Err(FrameDecodeError::PayloadLength);
        }

        let payload = &bytes[3..3 + FRAME_PAYLOAD_LEN];
        let stored = u16::from_le_bytes([bytes[3 + FRAME_PAYLOAD_LEN], bytes[4 + FRAME_PAYLOAD_LEN]]);
        if crc16_ccitt(payload) != stored {
            return Err(FrameDecodeError::Crc);
        }

        let f_hz_x1e4 = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let ppm_corr_x1e2 = i16::from_le_bytes([payload[16], payload[17]]);
        let mode = Mode::from_u8(payload[18]).ok_or(FrameDecodeError::Mode)?;

        Ok(Self {
            ts_ms: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            f_hz: f_hz_x1e4 as f32 / 1e4,
            f_hz_x1e4,
            tau_ms: u16::from_le_bytes([payload[8], payload[9]]),
            diode_uv: i32::from_le_bytes([payload[10], payload[11], payload[12], payload[13]]),
            adc_gain: payload[14],
            flags: payload[15],
            ppm_corr: f32::from(ppm_corr_x1e2) / 100.0,
            ppm_corr_x1e2,
            mode,
        })
    }

    /// Encodes the frame as one CRLF-terminated CSV line.
    pub fn encode_csv(&self) -> Result<String<MAX_CSV_LEN>, core::fmt::Error> {
        let mut line = String::new();
        write!(
            line,
            "{},{:.4},{},{:.1},{},{},{:.2},{}\r\n",
            self.ts_ms,
            self.f_hz,
            self.tau_ms,
            self.diode_uv as f32,
            self.adc_gain,
            self.flags,
            self.ppm_corr,
            self.mode.label(),
        )?;
        Ok(line)
    }
}
