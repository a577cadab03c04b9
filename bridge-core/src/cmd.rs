//! Host command surface carried over the CDC control channel.
//!
//! Commands are single `\n`-terminated lines with a case-sensitive keyword
//! prefix and optional decimal arguments. Every response — success or error —
//! ends with an `END` line so the host can frame replies without timeouts.
//! Output goes through the [`LineSink`] seam; the firmware routes it to the
//! CDC writer, tests capture it in a buffer.

use core::fmt::Write as _;

use heapless::String;
use winnow::ascii::{dec_uint, space1};
use winnow::combinator::{alt, opt, preceded};
use winnow::prelude::*;
use winnow::PResult;

use crate::config::Config;
use crate::eeprom::{EepromAccess, EepromError, EEPROM_SIZE};

/// Hex bytes emitted per dump line.
const DUMP_BYTES_PER_LINE: usize = 32;

/// Parsed host command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostCommand {
    /// Dump a window of the calibration EEPROM.
    EepromDump {
        /// First byte address; defaults to zero.
        addr: u16,
        /// Requested length; zero means "whole part".
        len: usize,
    },
    /// Parse the calibration block on-device (not supported).
    EepromParse,
    /// Report device identity and transport mode.
    InfoDev,
}

fn dump_args(input: &mut &str) -> PResult<(Option<u32>, Option<u32>)> {
    let addr = opt(preceded(space1, dec_uint::<_, u32, _>)).parse_next(input)?;
    let len = opt(preceded(space1, dec_uint::<_, u32, _>)).parse_next(input)?;
    Ok((addr, len))
}

fn command(input: &mut &str) -> PResult<HostCommand> {
    alt((
        preceded("EEPROM.DUMP", dump_args).map(|(addr, len)| HostCommand::EepromDump {
            addr: (addr.unwrap_or(0) & 0xFFFF) as u16,
            len: len.unwrap_or(0) as usize,
        }),
        "EEPROM.PARSE".value(HostCommand::EepromParse),
        "INFO.DEV".value(HostCommand::InfoDev),
    ))
    .parse_next(input)
}

/// Parses one command line. Unknown keywords yield `None`; malformed
/// arguments after a known keyword fall back to the command's defaults,
/// matching the lenient host protocol.
#[must_use]
pub fn parse_line(line: &str) -> Option<HostCommand> {
    let mut input = line;
    command.parse_next(&mut input).ok()
}

/// Destination for response lines; the terminator is the sink's concern.
pub trait LineSink {
    /// Emits one response line (without its terminator).
    fn write_line(&mut self, line: &str);
}

/// Executes host commands against the EEPROM bus and device identity.
pub struct CommandExecutor<E: EepromAccess> {
    eeprom: E,
    unio_gpio: u32,
    unio_bitrate_bps: u32,
    binary_frames: bool,
    last_read: Option<(u8, usize)>,
}

impl<E: EepromAccess> CommandExecutor<E> {
    /// Creates an executor owning the EEPROM bus handle.
    pub fn new(config: &Config, eeprom: E) -> Self {
        Self {
            eeprom,
            unio_gpio: config.unio_gpio,
            unio_bitrate_bps: config.unio_bitrate_bps,
            binary_frames: config.binary_frames,
            last_read: None,
        }
    }

    /// Parses and executes one command line, writing the response to `sink`.
    pub fn execute<S: LineSink>(&mut self, line: &str, sink: &mut S) {
        match parse_line(line) {
            Some(HostCommand::EepromDump { addr, len }) => self.dump(addr, len, sink),
            Some(HostCommand::EepromParse) => {
                sink.write_line("ERR UNSUPPORTED");
                sink.write_line("END");
            }
            Some(HostCommand::InfoDev) => self.info(sink),
            None => {
                sink.write_line("ERR UNKNOWN_CMD");
                sink.write_line("END");
            }
        }
    }

    fn dump<S: LineSink>(&mut self, addr: u16, len: usize, sink: &mut S) {
        if usize::from(addr) >= EEPROM_SIZE {
            sink.write_line("ERR BAD_ADDR");
            sink.write_line("END");
            return;
        }

        let mut len = if len == 0 || len > EEPROM_SIZE {
            EEPROM_SIZE
        } else {
            len
        };
        let remaining = EEPROM_SIZE - usize::from(addr);
        if len > remaining {
            len = remaining;
        }

        match self.eeprom.read(addr, len) {
            Ok(image) => {
                self.last_read = Some((image.device_address, image.len()));

                let mut header: String<64> = String::new();
                let _ = write!(
                    header,
                    "OK DEV=0x{:02X} START=0x{:04X} LEN={}",
                    image.device_address,
                    image.start_addr,
                    image.len(),
                );
                sink.write_line(&header);

                for chunk in image.bytes().chunks(DUMP_BYTES_PER_LINE) {
                    let mut row: String<64> = String::new();
                    for byte in chunk {
                        let _ = write!(row, "{byte:02X}");
                    }
                    sink.write_line(&row);
                }
                sink.write_line("END");
            }
            Err(EepromError::NoDevice) => {
                self.last_read = None;
                sink.write_line("ERR UNIO_NO_DEVICE");
                sink.write_line("END");
            }
            Err(EepromError::Io) => {
                self.last_read = None;
                sink.write_line("ERR EEPROM_IO");
                sink.write_line("END");
            }
        }
    }

    fn info<S: LineSink>(&mut self, sink: &mut S) {
        let mut line: String<160> = String::new();
        let _ = write!(
            line,
            "OK FW=resonant_bridge VER=unio gpio={} bitrate={} mode={}",
            self.unio_gpio,
            self.unio_bitrate_bps,
            if self.binary_frames { "binary" } else { "csv" },
        );
        if let Some((device, len)) = self.last_read {
            let _ = write!(line, " last_dev=0x{device:02X} last_len={len}");
        }
        sink.write_line(&line);
        sink.write_line("END");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eeprom::EepromImage;
    use std::string::{String as StdString, ToString as _};
    use std::vec::Vec;

    #[derive(Default)]
    struct CaptureSink {
        lines: Vec<StdString>,
    }

    impl LineSink for CaptureSink {
        fn write_line(&mut self, line: &str) {
            self.lines.push(line.to_string());
        }
    }

    struct FakeEeprom {
        result: Result<(), EepromError>,
    }

    impl EepromAccess for FakeEeprom {
        fn read(&mut self, addr: u16, len: usize) -> Result<EepromImage, EepromError> {
            self.result?;
            let data: Vec<u8> = (0..len).map(|index| (index & 0xFF) as u8).collect();
            Ok(EepromImage::new(0xA0, addr, &data))
        }
    }

    fn executor(result: Result<(), EepromError>) -> CommandExecutor<FakeEeprom> {
        CommandExecutor::new(&Config::default(), FakeEeprom { result })
    }

    #[test]
    fn parses_dump_argument_forms() {
        assert_eq!(
            parse_line("EEPROM.DUMP"),
            Some(HostCommand::EepromDump { addr: 0, len: 0 })
        );
        assert_eq!(
            parse_line("EEPROM.DUMP 16"),
            Some(HostCommand::EepromDump { addr: 16, len: 0 })
        );
        assert_eq!(
            parse_line("EEPROM.DUMP 16 64"),
            Some(HostCommand::EepromDump { addr: 16, len: 64 })
        );
        // Junk after the keyword degrades to the defaults, not an error.
        assert_eq!(
            parse_line("EEPROM.DUMP garbage"),
            Some(HostCommand::EepromDump { addr: 0, len: 0 })
        );
    }

    #[test]
    fn keyword_matching_is_case_sensitive() {
        assert_eq!(parse_line("eeprom.dump"), None);
        assert_eq!(parse_line("INFO.DEV"), Some(HostCommand::InfoDev));
        assert_eq!(parse_line("EEPROM.PARSE"), Some(HostCommand::EepromParse));
        assert_eq!(parse_line("RESET"), None);
    }

    #[test]
    fn unknown_command_reports_and_terminates() {
        let mut sink = CaptureSink::default();
        executor(Ok(())).execute("BOGUS", &mut sink);
        assert_eq!(sink.lines, ["ERR UNKNOWN_CMD", "END"]);
    }

    #[test]
    fn parse_command_is_unsupported() {
        let mut sink = CaptureSink::default();
        executor(Ok(())).execute("EEPROM.PARSE", &mut sink);
        assert_eq!(sink.lines, ["ERR UNSUPPORTED", "END"]);
    }

    #[test]
    fn dump_emits_header_hex_rows_and_end() {
        let mut sink = CaptureSink::default();
        executor(Ok(())).execute("EEPROM.DUMP 0 40", &mut sink);

        assert_eq!(sink.lines[0], "OK DEV=0xA0 START=0x0000 LEN=40");
        // 40 bytes: one full 32-byte row plus an 8-byte remainder.
        assert_eq!(sink.lines[1].len(), 64);
        assert!(sink.lines[1].starts_with("000102"));
        assert_eq!(sink.lines[2].len(), 16);
        assert_eq!(sink.lines[3], "END");
    }

    #[test]
    fn dump_rejects_out_of_range_address() {
        let mut sink = CaptureSink::default();
        executor(Ok(())).execute("EEPROM.DUMP 512", &mut sink);
        assert_eq!(sink.lines, ["ERR BAD_ADDR", "END"]);
    }

    #[test]
    fn dump_clamps_length_to_the_part() {
        let mut sink = CaptureSink::default();
        executor(Ok(())).execute("EEPROM.DUMP 496 600", &mut sink);
        // Only 16 bytes remain past address 496.
        assert_eq!(sink.lines[0], "OK DEV=0xA0 START=0x01F0 LEN=16");
        assert_eq!(sink.lines.last().map(StdString::as_str), Some("END"));
    }

    #[test]
    fn bus_errors_map_to_protocol_errors() {
        let mut sink = CaptureSink::default();
        executor(Err(EepromError::NoDevice)).execute("EEPROM.DUMP", &mut sink);
        assert_eq!(sink.lines, ["ERR UNIO_NO_DEVICE", "END"]);

        let mut sink = CaptureSink::default();
        executor(Err(EepromError::Io)).execute("EEPROM.DUMP", &mut sink);
        assert_eq!(sink.lines, ["ERR EEPROM_IO", "END"]);
    }

    #[test]
    fn info_reports_identity_and_last_read() {
        let mut runner = executor(Ok(()));

        let mut sink = CaptureSink::default();
        runner.execute("INFO.DEV", &mut sink);
        assert_eq!(
            sink.lines[0],
            "OK FW=resonant_bridge VER=unio gpio=22 bitrate=19200 mode=csv"
        );
        assert_eq!(sink.lines[1], "END");

        let mut sink = CaptureSink::default();
        runner.execute("EEPROM.DUMP 0 8", &mut sink);
        assert_eq!(sink.lines.last().map(StdString::as_str), Some("END"));

        let mut sink = CaptureSink::default();
        runner.execute("INFO.DEV", &mut sink);
        assert!(sink.lines[0].ends_with("last_dev=0xA0 last_len=8"));
    }
}
