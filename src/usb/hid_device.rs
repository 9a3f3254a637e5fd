//! USB HID composite device - keyboard + mouse.
//!
//! Builds the two HID interfaces on any `embassy-usb` driver and bridges
//! the synchronous [`UsbHid`] sink used by the central to the async
//! endpoint writers through a bounded report channel.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_usb::class::hid::{Config as HidConfig, HidWriter, State};
use embassy_usb::driver::Driver;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

use super::UsbHid;
use crate::config;
use crate::error::Error;
use crate::hid::keyboard::{KEYBOARD_REPORT_DESCRIPTOR, KEYBOARD_REPORT_SIZE};
use crate::hid::mouse::{MOUSE_REPORT_DESCRIPTOR, MOUSE_REPORT_SIZE};
use crate::hid::{HidReport, KeyboardReport, MouseReport};

/// Reports waiting for the USB writer.
pub type ReportChannel = Channel<CriticalSectionRawMutex, HidReport, { config::REPORT_QUEUE_DEPTH }>;

static KB_STATE: StaticCell<State> = StaticCell::new();
static MOUSE_STATE: StaticCell<State> = StaticCell::new();
static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 128]> = StaticCell::new();
static USB_BUS_HANDLER: StaticCell<BusStateHandler> = StaticCell::new();

static CONFIGURED: AtomicBool = AtomicBool::new(false);
static SUSPENDED: AtomicBool = AtomicBool::new(false);

struct BusStateHandler;

impl embassy_usb::Handler for BusStateHandler {
    fn configured(&mut self, configured: bool) {
        CONFIGURED.store(configured, Ordering::Release);
        info!("USB configured: {}", configured);
    }

    fn suspended(&mut self, suspended: bool) {
        SUSPENDED.store(suspended, Ordering::Release);
        debug!("USB suspended: {}", suspended);
    }
}

/// Whether the host has configured the device and the bus is awake.
pub fn bus_active() -> bool {
    CONFIGURED.load(Ordering::Acquire) && !SUSPENDED.load(Ordering::Acquire)
}

/// Build result containing the USB device runner and the two HID writers.
pub struct UsbHidDevice<D: Driver<'static>> {
    pub device: UsbDevice<'static, D>,
    pub keyboard_writer: HidWriter<'static, D, 8>,
    pub mouse_writer: HidWriter<'static, D, 8>,
}

/// Creates the composite HID device on `driver`.
///
/// Must be called exactly once; all static buffers are consumed here.
pub fn init<D: Driver<'static>>(driver: D) -> UsbHidDevice<D> {
    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = 100; // mA
    usb_config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 128]),
    );
    builder.handler(USB_BUS_HANDLER.init(BusStateHandler));

    let keyboard_writer = HidWriter::new(
        &mut builder,
        KB_STATE.init(State::new()),
        HidConfig {
            report_descriptor: KEYBOARD_REPORT_DESCRIPTOR,
            request_handler: None,
            poll_ms: config::USB_HID_POLL_MS,
            max_packet_size: 8,
        },
    );
    let mouse_writer = HidWriter::new(
        &mut builder,
        MOUSE_STATE.init(State::new()),
        HidConfig {
            report_descriptor: MOUSE_REPORT_DESCRIPTOR,
            request_handler: None,
            poll_ms: config::USB_HID_POLL_MS,
            max_packet_size: 8,
        },
    );

    let device = builder.build();
    info!("USB HID composite device initialised (keyboard + mouse)");

    UsbHidDevice {
        device,
        keyboard_writer,
        mouse_writer,
    }
}

/// Runs enumeration and endpoint servicing. Spawn as a dedicated task.
pub async fn run_usb_device<D: Driver<'static>>(mut device: UsbDevice<'static, D>) -> ! {
    info!("USB device task started");
    device.run().await
}

/// [`UsbHid`] backed by a [`ReportChannel`]; [`hid_writer_task`] drains it.
pub struct ChannelUsb {
    channel: &'static ReportChannel,
}

impl ChannelUsb {
    pub const fn new(channel: &'static ReportChannel) -> Self {
        Self { channel }
    }

    fn push(&self, report: HidReport) -> Result<(), Error> {
        self.channel.try_send(report).map_err(|_| Error::Usb)
    }
}

impl UsbHid for ChannelUsb {
    fn ready(&self) -> bool {
        bus_active() && !self.channel.is_full()
    }

    fn submit_mouse(&mut self, report: &MouseReport) -> Result<(), Error> {
        self.push(HidReport::Mouse(*report))
    }

    fn submit_keyboard(&mut self, report: &KeyboardReport) -> Result<(), Error> {
        self.push(HidReport::Keyboard(*report))
    }
}

/// Forwards queued reports to the matching HID endpoint.
pub async fn hid_writer_task<D: Driver<'static>>(
    mut keyboard: HidWriter<'static, D, 8>,
    mut mouse: HidWriter<'static, D, 8>,
    reports: &'static ReportChannel,
) -> ! {
    info!("HID writer task started - waiting for reports");

    let mut buf = [0u8; 8];
    loop {
        match reports.receive().await {
            HidReport::Keyboard(kb) => {
                let n = kb.serialize(&mut buf[..KEYBOARD_REPORT_SIZE]);
                if keyboard.write(&buf[..n]).await.is_err() {
                    warn!("USB keyboard write failed");
                }
            }
            HidReport::Mouse(m) => {
                let n = m.serialize(&mut buf[..MOUSE_REPORT_SIZE]);
                if mouse.write(&buf[..n]).await.is_err() {
                    warn!("USB mouse write failed");
                }
            }
        }
    }
}
