//! USB side of the bridge.
//!
//! The core only needs [`UsbHid`]: a non-blocking sink for mouse and
//! keyboard reports. With the `embedded` feature, [`hid_device`] provides
//! an `embassy-usb` composite device (keyboard + mouse interfaces) and a
//! channel-backed implementation of the trait.

#[cfg(feature = "embedded")]
pub mod hid_device;

use crate::error::Error;
use crate::hid::{HidReport, KeyboardReport, MouseReport};

/// What happened to a report handed to [`UsbHid::deliver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    Sent,
    /// The device was busy; the report was discarded.
    Dropped,
}

/// USB HID device collaborator.
///
/// Every method runs on the BLE event context and must return promptly;
/// implementations queue or drop, never wait for the bus.
pub trait UsbHid {
    /// Whether the device can take another report right now.
    fn ready(&self) -> bool;

    fn submit_mouse(&mut self, report: &MouseReport) -> Result<(), Error>;

    fn submit_keyboard(&mut self, report: &KeyboardReport) -> Result<(), Error>;

    /// Mouse reports are only sent when the device is ready and are dropped
    /// otherwise. Keyboard reports are always submitted so key releases are
    /// never lost.
    fn deliver(&mut self, report: &HidReport) -> Result<Delivery, Error> {
        match report {
            HidReport::Mouse(m) => {
                if !self.ready() {
                    return Ok(Delivery::Dropped);
                }
                self.submit_mouse(m)?;
            }
            HidReport::Keyboard(kb) => self.submit_keyboard(kb)?,
        }
        Ok(Delivery::Sent)
    }
}
