//! GATT client side: attribute types, the per-connection attribute cache,
//! and the paginated discovery procedure that fills it.
//!
//! Ownership is tree-shaped and peer-scoped:
//!
//! ```text
//! Peer ─┬─ Service (start..=end) ─┬─ Characteristic (decl, value) ── Descriptor
//!       │                         └─ Characteristic ...
//!       └─ Service ...
//! ```
//!
//! Every level is kept in ascending handle order as attributes arrive.

pub mod cache;
pub mod discovery;
mod pool;
pub mod uuid;

use bitflags::bitflags;

pub use cache::{AttributeCache, CacheLimits, Characteristic, Descriptor, Peer, Position, Service};
pub use discovery::{Discovered, GattClient, Phase};
pub use uuid::Uuid;

/// ATT attribute handle.
pub type Handle = u16;

/// Inclusive attribute handle range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    pub start: Handle,
    pub end: Handle,
}

impl HandleRange {
    pub const fn new(start: Handle, end: Handle) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.start <= handle && handle <= self.end
    }

    pub fn overlaps(&self, other: &HandleRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// A range whose end does not lie past its start holds nothing beyond
    /// the declaration itself.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CharProps: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CharProps {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "CharProps({=u8:#x})", self.bits())
    }
}

/// A primary service as reported by service discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceDef {
    pub range: HandleRange,
    pub uuid: Uuid,
}

/// A characteristic declaration as reported by characteristic discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicDef {
    pub decl_handle: Handle,
    pub value_handle: Handle,
    pub properties: CharProps,
    pub uuid: Uuid,
}

/// A descriptor as reported by descriptor discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescriptorDef {
    pub handle: Handle,
    pub uuid: Uuid,
}
