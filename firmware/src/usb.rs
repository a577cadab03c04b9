//! USB CDC transport helpers for the host link.
//!
//! One CDC-ACM interface carries both directions: the measurement frame
//! stream going out and command lines coming in. Writes run against a short
//! capacity deadline so a stalled host can never back-pressure the
//! measurement path — frames and responses are dropped instead.

use embassy_time::{with_timeout, Duration};
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::{Builder, Config as UsbConfig, UsbDevice};
use heapless::{String, Vec};

use bridge_core::cmd::LineSink;
use bridge_core::config::{StreamFormat, USB_PRODUCT_ID, USB_VENDOR_ID};
use bridge_core::frame::Frame;

/// CDC bulk endpoint packet size.
pub const MAX_PACKET_SIZE: usize = 64;
/// Longest accepted command line, excluding the terminator.
pub const MAX_LINE_LEN: usize = 128;
/// Capacity for a buffered command response (a full EEPROM dump fits).
pub const RESPONSE_CAPACITY: usize = 1_280;
/// Deadline for one outgoing packet before the payload is dropped.
const WRITE_DEADLINE: Duration = Duration::from_millis(100);

pub type UsbDriver = embassy_rp::usb::Driver<'static, embassy_rp::peripherals::USB>;
pub type BridgeUsbDevice = UsbDevice<'static, UsbDriver>;

/// Split CDC interface handed to the I/O task.
pub struct CdcHandle {
    pub sender: Sender<'static, UsbDriver>,
    pub receiver: Receiver<'static, UsbDriver>,
}

/// Descriptor and class storage that must outlive the USB device.
pub struct UsbStorage {
    config_descriptor: [u8; 256],
    bos_descriptor: [u8; 256],
    msos_descriptor: [u8; 64],
    control_buf: [u8; 64],
    state: State<'static>,
}

impl UsbStorage {
    pub fn new() -> Self {
        Self {
            config_descriptor: [0; 256],
            bos_descriptor: [0; 256],
            msos_descriptor: [0; 64],
            control_buf: [0; 64],
            state: State::new(),
        }
    }
}

/// Builds the USB device with a single CDC-ACM interface.
pub fn build(driver: UsbDriver, storage: &'static mut UsbStorage) -> (BridgeUsbDevice, CdcHandle) {
    let mut config = UsbConfig::new(USB_VENDOR_ID, USB_PRODUCT_ID);
    config.manufacturer = Some("BSL Instruments");
    config.product = Some("Resonant Sensor Bridge");
    config.serial_number = Some("0001");
    config.max_power = 100;
    config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        config,
        &mut storage.config_descriptor,
        &mut storage.bos_descriptor,
        &mut storage.msos_descriptor,
        &mut storage.control_buf,
    );
    let class = CdcAcmClass::new(&mut builder, &mut storage.state, MAX_PACKET_SIZE as u16);
    let (sender, receiver) = class.split();
    let device = builder.build();

    (device, CdcHandle { sender, receiver })
}

/// Accumulates command bytes until a newline completes the line.
///
/// Carriage returns are ignored, blank lines produce nothing, and overflow
/// discards the line in progress so a runaway host cannot wedge the parser.
pub struct LineAccumulator {
    buf: Vec<u8, MAX_LINE_LEN>,
}

impl LineAccumulator {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Drops any partially accumulated line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Feeds one byte; returns a completed line when `byte` terminates one.
    pub fn feed(&mut self, byte: u8) -> Option<String<MAX_LINE_LEN>> {
        match byte {
            b'\r' => None,
            b'\n' => {
                if self.buf.is_empty() {
                    return None;
                }
                let mut line = String::new();
                if let Ok(text) = core::str::from_utf8(&self.buf) {
                    let _ = line.push_str(text);
                }
                self.buf.clear();
                if line.is_empty() {
                    None
                } else {
                    Some(line)
                }
            }
            _ => {
                if self.buf.push(byte).is_err() {
                    self.buf.clear();
                }
                None
            }
        }
    }
}

/// Collects command-response lines for one chunked CDC write.
pub struct ResponseBuffer {
    bytes: Vec<u8, RESPONSE_CAPACITY>,
}

impl ResponseBuffer {
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl LineSink for ResponseBuffer {
    fn write_line(&mut self, line: &str) {
        // A response that exceeds the buffer is truncated; END still goes
        // out as long as capacity allows.
        let _ = self.bytes.extend_from_slice(line.as_bytes());
        let _ = self.bytes.push(b'\n');
    }
}

/// Writes a buffer as CDC packets, giving each one the capacity deadline.
/// Returns `false` when the host stopped draining and the rest was dropped.
pub async fn write_all(sender: &mut Sender<'static, UsbDriver>, bytes: &[u8]) -> bool {
    for chunk in bytes.chunks(MAX_PACKET_SIZE) {
        match with_timeout(WRITE_DEADLINE, sender.write_packet(chunk)).await {
            Ok(Ok(())) => {}
            _ => return false,
        }
    }
    true
}

/// Encodes and sends one measurement frame in the configured stream format.
pub async fn send_frame(
    sender: &mut Sender<'static, UsbDriver>,
    format: StreamFormat,
    frame: &Frame,
) -> bool {
    match format {
        StreamFormat::Binary => write_all(sender, &frame.encode_binary()).await,
        StreamFormat::Csv => match frame.encode_csv() {
            Ok(line) => write_all(sender, line.as_bytes()).await,
            Err(_) => false,
        },
    }
}
