//! BLE HID-over-GATT to USB HID bridge.
//!
//! Connects as a BLE central to a HID peripheral (a mouse by default),
//! discovers and caches its GATT database, subscribes to its input reports,
//! and re-emits every notification as a USB HID report.
//!
//! The core is host-testable: the BLE host stack and the USB device are
//! reached through the [`ble::BleHost`] and [`usb::UsbHid`] traits. The
//! `embedded` feature adds the `embassy-usb` device and the channel pump
//! that ties the core to a firmware's tasks.
//!
//! Usage: `cargo test` on the host, `--features embedded` for firmware.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod error;
pub mod gatt;
pub mod hid;
pub mod usb;

pub use ble::central::{Central, LinkState};
pub use config::Config;
pub use error::{Error, HostError};
pub use gatt::AttributeCache;
