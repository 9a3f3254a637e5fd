//! Unified error type for hogp2usb.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data, and
//! the whole enum stays `Copy` so it can be stored in link state and
//! handed back from completion paths.

use core::fmt;

/// Raw status code reported by the BLE host stack (HCI / ATT / host error).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostError(pub u16);

impl HostError {
    /// The host stack has no room for another request right now.
    pub const BUSY: HostError = HostError(0x0F);
    /// ATT "Invalid Attribute Value Length".
    pub const INVALID_LENGTH: HostError = HostError(0x0D);
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host status {:#06x}", self.0)
    }
}

/// Attribute-cache failures (subset of [`Error`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CacheError {
    /// A fixed-capacity pool is full. Existing state is untouched.
    ResourceExhausted,
    /// No peer / service / characteristic / descriptor matches the lookup.
    NotFound,
    /// The handle range of a new object overlaps an existing one.
    Conflict,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::ResourceExhausted => f.write_str("attribute pool exhausted"),
            CacheError::NotFound => f.write_str("attribute not found"),
            CacheError::Conflict => f.write_str("overlapping attribute handles"),
        }
    }
}

/// Top-level error type used across the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Attribute cache
    /// Pool full - operation rejected.
    ResourceExhausted,
    /// Handle / UUID lookup failed.
    NotFound,
    /// Overlapping handle ranges during insertion.
    Conflict,

    // BLE
    /// A GATT discovery phase reported a non-success status.
    DiscoveryFailed(HostError),
    /// A CCCD write was rejected.
    SubscriptionFailed(HostError),
    /// Encryption could not be started or did not come up.
    SecurityFailed(HostError),
    /// Scan / connect / terminate request failed.
    LinkFailed(HostError),
    /// The link went down.
    Disconnected { reason: u16 },

    // USB
    /// The USB HID side rejected a report.
    Usb,
}

impl Error {
    /// Whether the error must tear down the connection it occurred on.
    ///
    /// Lookups and exhaustion outside of discovery are handled locally by
    /// the caller; everything else terminates the link.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ResourceExhausted | Error::NotFound | Error::Usb
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ResourceExhausted => f.write_str("resource exhausted"),
            Error::NotFound => f.write_str("not found"),
            Error::Conflict => f.write_str("handle conflict"),
            Error::DiscoveryFailed(e) => write!(f, "discovery failed: {}", e),
            Error::SubscriptionFailed(e) => write!(f, "subscription failed: {}", e),
            Error::SecurityFailed(e) => write!(f, "security failed: {}", e),
            Error::LinkFailed(e) => write!(f, "link failed: {}", e),
            Error::Disconnected { reason } => write!(f, "disconnected (reason {:#04x})", reason),
            Error::Usb => f.write_str("usb report rejected"),
        }
    }
}

// Convenience conversions

impl From<CacheError> for Error {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::ResourceExhausted => Error::ResourceExhausted,
            CacheError::NotFound => Error::NotFound,
            CacheError::Conflict => Error::Conflict,
        }
    }
}
