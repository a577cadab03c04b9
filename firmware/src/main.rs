#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(target_os = "none", allow(static_mut_refs))]

#[cfg(target_os = "none")]
mod adc;
#[cfg(target_os = "none")]
mod panic;
#[cfg(target_os = "none")]
mod unio;
#[cfg(target_os = "none")]
mod usb;

#[cfg(target_os = "none")]
use core::cell::RefCell;
#[cfg(target_os = "none")]
use core::mem::MaybeUninit;

#[cfg(target_os = "none")]
use critical_section::Mutex;
#[cfg(target_os = "none")]
use defmt_rtt as _;
#[cfg(target_os = "none")]
use embassy_executor::{Executor, Spawner};
#[cfg(target_os = "none")]
use embassy_futures::select::{select, Either};
#[cfg(target_os = "none")]
use embassy_rp::gpio::{Input, Pull};
#[cfg(target_os = "none")]
use embassy_rp::multicore::{spawn_core1, Stack};
#[cfg(target_os = "none")]
use embassy_rp::peripherals::USB;
#[cfg(target_os = "none")]
use embassy_rp::usb::Driver;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::signal::Signal;
#[cfg(target_os = "none")]
use embassy_time::{Instant, Ticker, Timer};
#[cfg(target_os = "none")]
use portable_atomic::{AtomicU64, Ordering};

#[cfg(target_os = "none")]
use bridge_core::cmd::CommandExecutor;
#[cfg(target_os = "none")]
use bridge_core::config::{flags, Config, GPIO_UNUSED};
#[cfg(target_os = "none")]
use bridge_core::counter::{EdgeCounter, FreqResult, GateAlarm};
#[cfg(target_os = "none")]
use bridge_core::frame::Frame;
#[cfg(target_os = "none")]
use bridge_core::pipeline::FramePipeline;
#[cfg(target_os = "none")]
use bridge_core::pps::PpsDiscipline;
#[cfg(target_os = "none")]
use bridge_core::queue::DropOldestQueue;

#[cfg(target_os = "none")]
embassy_rp::bind_interrupts!(struct UsbIrqs {
    USBCTRL_IRQ => embassy_rp::usb::InterruptHandler<USB>;
});

/// Hard cap on the result queue backing store.
#[cfg(target_os = "none")]
const FREQ_QUEUE_CAP: usize = 32;
/// Hard cap on the frame queue backing store.
#[cfg(target_os = "none")]
const FRAME_QUEUE_CAP: usize = 64;
/// Sentinel meaning "no gate deadline armed".
#[cfg(target_os = "none")]
const NO_DEADLINE: u64 = u64::MAX;

#[cfg(target_os = "none")]
static COUNTER: Mutex<RefCell<Option<EdgeCounter<GateHandle>>>> = Mutex::new(RefCell::new(None));
#[cfg(target_os = "none")]
static PPS: Mutex<RefCell<PpsDiscipline>> = Mutex::new(RefCell::new(PpsDiscipline::new(0)));
#[cfg(target_os = "none")]
static FREQ_RESULTS: Mutex<RefCell<DropOldestQueue<FreqResult, FREQ_QUEUE_CAP>>> =
    Mutex::new(RefCell::new(DropOldestQueue::new(8)));
#[cfg(target_os = "none")]
static FRAMES: Mutex<RefCell<DropOldestQueue<Frame, FRAME_QUEUE_CAP>>> =
    Mutex::new(RefCell::new(DropOldestQueue::new(16)));
#[cfg(target_os = "none")]
static FREQ_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();
#[cfg(target_os = "none")]
static GATE_DEADLINE: AtomicU64 = AtomicU64::new(NO_DEADLINE);
#[cfg(target_os = "none")]
static GATE_EVENT: Signal<CriticalSectionRawMutex, ()> = Signal::new();

#[cfg(target_os = "none")]
static mut CORE1_STACK: Stack<8192> = Stack::new();
#[cfg(target_os = "none")]
static mut EXECUTOR1: MaybeUninit<Executor> = MaybeUninit::uninit();
#[cfg(target_os = "none")]
static mut USB_STORAGE: MaybeUninit<usb::UsbStorage> = MaybeUninit::uninit();

/// Monotonic microseconds since boot, shared timebase for every subsystem.
#[cfg(target_os = "none")]
fn now_us() -> u64 {
    Instant::now().as_micros()
}

/// Gate deadline handle given to the edge counter. Scheduling parks the
/// absolute deadline in an atomic and nudges the gate task.
#[cfg(target_os = "none")]
struct GateHandle;

#[cfg(target_os = "none")]
impl GateAlarm for GateHandle {
    fn schedule(&mut self, deadline_us: u64) {
        GATE_DEADLINE.store(deadline_us, Ordering::Release);
        GATE_EVENT.signal(());
    }

    fn cancel(&mut self) {
        GATE_DEADLINE.store(NO_DEADLINE, Ordering::Release);
        GATE_EVENT.signal(());
    }
}

/// Runs a closure on the shared edge counter under its critical section.
#[cfg(target_os = "none")]
fn with_counter<R>(f: impl FnOnce(&mut EdgeCounter<GateHandle>) -> R) -> R {
    critical_section::with(|cs| {
        let mut slot = COUNTER.borrow_ref_mut(cs);
        let counter = slot
            .as_mut()
            .expect("edge counter installed before tasks start");
        f(counter)
    })
}

/// Routes an emitted window into the result queue and wakes the worker.
#[cfg(target_os = "none")]
fn queue_freq_result(result: FreqResult) {
    critical_section::with(|cs| {
        if FREQ_RESULTS.borrow_ref_mut(cs).push(result).is_some() {
            defmt::warn!("freq queue full, oldest window dropped");
        }
    });
    FREQ_READY.signal(());
}

#[cfg(target_os = "none")]
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    let config = Config::default();

    defmt::info!(
        "bridge up: mode={} tau_ms={} stream={}",
        config.mode,
        config.tau_ms,
        config.stream_format()
    );

    critical_section::with(|cs| {
        COUNTER
            .borrow_ref_mut(cs)
            .replace(EdgeCounter::new(&config, GateHandle));
        // Seed the staleness clock so a missing PPS reads as stale, not
        // locked-at-zero.
        *PPS.borrow_ref_mut(cs) = PpsDiscipline::new(now_us());

        // Queue depths come from the configured length, falling back to the
        // per-queue defaults when the value is zero or past the backing cap.
        let requested = config.queue_length as usize;
        let freq_depth = if requested == 0 || requested > FREQ_QUEUE_CAP {
            8
        } else {
            requested
        };
        let frame_depth = if requested == 0 || requested > FRAME_QUEUE_CAP {
            16
        } else {
            requested
        };
        FREQ_RESULTS.borrow_ref_mut(cs).set_depth(freq_depth);
        FRAMES.borrow_ref_mut(cs).set_depth(frame_depth);
    });

    // Pin assignments mirror the configuration's pin map for the reference
    // board layout.
    let freq_pin = Input::new(p.PIN_2, Pull::Down);
    let sync_pin = Input::new(p.PIN_3, Pull::Down);
    let pps_pin = Input::new(p.PIN_21, Pull::Down);

    let ads1220 = adc::Ads1220::new(
        p.SPI0, p.PIN_18, p.PIN_19, p.PIN_16, p.PIN_17, p.PIN_20, &config,
    );
    let eeprom = unio::UnioEeprom::new(p.PIN_22, config.unio_bitrate_bps);

    spawn_core1(
        p.CORE1,
        unsafe { &mut *core::ptr::addr_of_mut!(CORE1_STACK) },
        move || {
            let executor1 = unsafe { EXECUTOR1.write(Executor::new()) };
            executor1.run(|spawner| {
                spawner
                    .spawn(worker_task(ads1220, config))
                    .expect("failed to spawn measurement worker");
            });
        },
    );

    let usb_driver = Driver::new(p.USB, UsbIrqs);
    let storage = unsafe { USB_STORAGE.write(usb::UsbStorage::new()) };
    let (usb_device, cdc) = usb::build(usb_driver, storage);

    spawner
        .spawn(usb_task(usb_device))
        .expect("failed to spawn USB device task");
    spawner
        .spawn(io_task(cdc, eeprom, config))
        .expect("failed to spawn host I/O task");
    spawner
        .spawn(gate_task())
        .expect("failed to spawn gate deadline task");
    spawner
        .spawn(housekeeping_task(config))
        .expect("failed to spawn housekeeping task");

    spawner
        .spawn(freq_edge_task(freq_pin))
        .expect("failed to spawn frequency edge task");
    if config.sync_gpio != GPIO_UNUSED {
        spawner
            .spawn(sync_edge_task(sync_pin))
            .expect("failed to spawn sync edge task");
    }
    if config.pps_gpio != GPIO_UNUSED {
        spawner
            .spawn(pps_edge_task(pps_pin))
            .expect("failed to spawn PPS edge task");
    }

    // Let the ADC settle and the USB stack enumerate before the first window.
    Timer::after_millis(200).await;
    with_counter(|counter| counter.start_window(config.mode, config.tau_ms, now_us()));

    core::future::pending::<()>().await;
}

#[cfg(not(target_os = "none"))]
fn main() {}

/// Frequency-input edges. Each rising edge is stamped and fed to the
/// counter; completed reciprocal windows are queued for the worker.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn freq_edge_task(mut pin: Input<'static>) -> ! {
    loop {
        pin.wait_for_rising_edge().await;
        let timestamp = now_us();
        if let Some(result) = with_counter(|counter| counter.on_freq_edge(timestamp)) {
            queue_freq_result(result);
        }
    }
}

/// Sync-input level changes: rising forces a window, falling closes it.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn sync_edge_task(mut pin: Input<'static>) -> ! {
    loop {
        pin.wait_for_any_edge().await;
        let timestamp = now_us();
        let level_high = pin.is_high();
        if let Some(result) = with_counter(|counter| counter.on_sync_edge(level_high, timestamp)) {
            queue_freq_result(result);
        }
    }
}

/// PPS reference edges feed the disciplining filter.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn pps_edge_task(mut pin: Input<'static>) -> ! {
    loop {
        pin.wait_for_rising_edge().await;
        let timestamp = now_us();
        critical_section::with(|cs| PPS.borrow_ref_mut(cs).on_edge(timestamp));
    }
}

/// Fires the gated-window deadline the counter armed through [`GateHandle`].
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn gate_task() -> ! {
    loop {
        let armed = GATE_DEADLINE.load(Ordering::Acquire);
        if armed == NO_DEADLINE {
            GATE_EVENT.wait().await;
            continue;
        }

        match select(Timer::at(Instant::from_micros(armed)), GATE_EVENT.wait()).await {
            Either::First(()) => {
                // Only fire if the deadline was not re-armed or cancelled
                // while the timer ran.
                if GATE_DEADLINE
                    .compare_exchange(armed, NO_DEADLINE, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let emitted = with_counter(|counter| counter.on_gate_timeout(now_us()));
                    if let Some(result) = emitted {
                        queue_freq_result(result);
                    }
                }
            }
            Either::Second(()) => {}
        }
    }
}

/// PPS staleness tick and correction feed, independent of the host link.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn housekeeping_task(config: Config) -> ! {
    let mut ticker = Ticker::every(embassy_time::Duration::from_millis(250));
    loop {
        ticker.next().await;
        if config.pps_gpio == GPIO_UNUSED {
            continue;
        }
        let correction = critical_section::with(|cs| {
            let mut pps = PPS.borrow_ref_mut(cs);
            pps.tick(now_us());
            pps.correction_ppm()
        });
        with_counter(|counter| counter.update_timebase_ppm(correction));
    }
}

/// Measurement worker on core 1: binds one ADC reading to each completed
/// window, assembles the frame, and rearms the next window.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn worker_task(mut ads1220: adc::Ads1220<'static>, config: Config) -> ! {
    let mut pipeline = FramePipeline::new(&config);
    loop {
        let freq = loop {
            let popped = critical_section::with(|cs| FREQ_RESULTS.borrow_ref_mut(cs).pop());
            match popped {
                Some(result) => break result,
                None => FREQ_READY.wait().await,
            }
        };

        let pps = critical_section::with(|cs| PPS.borrow_ref(cs).snapshot());
        let frame = pipeline.process(&freq, &mut ads1220, pps);

        if config.debug_deglitch_stats {
            if frame.flags & flags::ADC_TIMEOUT != 0 {
                defmt::debug!("ads1220: DRDY timeout, reusing last reading");
            }
            if freq.timeout {
                defmt::debug!("window closed by deadline, pulses={}", freq.pulses);
            }
            defmt::debug!(
                "window raw={} kept={} dropped={} min_interval_us={}",
                freq.raw_pulses,
                freq.pulses,
                freq.glitch_count,
                freq.min_interval_us
            );
        }

        critical_section::with(|cs| {
            if FRAMES.borrow_ref_mut(cs).push(frame).is_some() {
                defmt::warn!("frame queue full, oldest frame dropped");
            }
        });

        with_counter(|counter| counter.start_window(config.mode, config.tau_ms, now_us()));
    }
}

/// Runs the USB device state machine.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn usb_task(mut device: usb::BridgeUsbDevice) -> ! {
    device.run().await
}

/// Host-facing I/O: drains the frame queue to the CDC stream and services
/// command lines.
#[cfg(target_os = "none")]
#[embassy_executor::task]
async fn io_task(
    cdc: usb::CdcHandle,
    eeprom: unio::UnioEeprom<'static>,
    config: Config,
) -> ! {
    let usb::CdcHandle {
        mut sender,
        mut receiver,
    } = cdc;
    let mut executor = CommandExecutor::new(&config, eeprom);
    let mut lines = usb::LineAccumulator::new();
    let format = config.stream_format();
    let mut ingress = [0u8; usb::MAX_PACKET_SIZE];
    let mut ticker = Ticker::every(embassy_time::Duration::from_millis(2));

    loop {
        embassy_futures::join::join(receiver.wait_connection(), sender.wait_connection()).await;
        defmt::info!("usb: host connected ({})", format);
        lines.clear();

        loop {
            match select(receiver.read_packet(&mut ingress), ticker.next()).await {
                Either::First(Ok(count)) => {
                    for &byte in &ingress[..count] {
                        if let Some(line) = lines.feed(byte) {
                            let mut response = usb::ResponseBuffer::new();
                            executor.execute(&line, &mut response);
                            if !usb::write_all(&mut sender, response.as_bytes()).await {
                                defmt::warn!("usb: response dropped on backpressure");
                            }
                        }
                    }
                }
                Either::First(Err(_)) => {
                    defmt::warn!("usb: host link lost");
                    break;
                }
                Either::Second(()) => {
                    while let Some(frame) =
                        critical_section::with(|cs| FRAMES.borrow_ref_mut(cs).pop())
                    {
                        if !usb::send_frame(&mut sender, format, &frame).await {
                            defmt::warn!("usb: frame dropped on backpressure");
                            break;
                        }
                    }
                }
            }
        }
    }
}
