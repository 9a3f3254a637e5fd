//! Advertising-data (AD structure) parsing.
//!
//! Each AD structure is `[len, type, payload...]` where `len` counts the
//! type byte and payload. A zero length or a length running past the end of
//! the buffer ends parsing; everything before it is still reported.

use heapless::{String, Vec};

/// AD type: Flags.
pub const AD_FLAGS: u8 = 0x01;
/// AD type: Incomplete List of 16-bit Service UUIDs.
pub const AD_UUID16_INCOMPLETE: u8 = 0x02;
/// AD type: Complete List of 16-bit Service UUIDs.
pub const AD_UUID16_COMPLETE: u8 = 0x03;
/// AD type: Shortened Local Name.
pub const AD_NAME_SHORT: u8 = 0x08;
/// AD type: Complete Local Name.
pub const AD_NAME_COMPLETE: u8 = 0x09;
/// AD type: Tx Power Level.
pub const AD_TX_POWER: u8 = 0x0A;
/// AD type: Appearance.
pub const AD_APPEARANCE: u8 = 0x19;

/// Longest local name kept (longer names are truncated).
pub const MAX_NAME_LEN: usize = 32;
/// Most 16-bit service UUIDs kept from one report.
pub const MAX_UUID16: usize = 8;

const HID_SERVICE_UUID16: u16 = 0x1812;

/// Iterator over the AD structures of one advertising report, yielding
/// `(ad_type, payload)`.
pub struct AdStructures<'a> {
    data: &'a [u8],
}

impl<'a> AdStructures<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, rest) = self.data.split_first()?;
        let len = len as usize;
        if len == 0 || len > rest.len() {
            self.data = &[];
            return None;
        }
        let (structure, tail) = rest.split_at(len);
        self.data = tail;
        Some((structure[0], &structure[1..]))
    }
}

/// Fields of interest from one advertising report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvFields {
    pub flags: Option<u8>,
    /// Local name, complete or shortened (see `name_complete`).
    pub name: Option<String<MAX_NAME_LEN>>,
    pub name_complete: bool,
    pub uuids16: Vec<u16, MAX_UUID16>,
    pub tx_power: Option<i8>,
    pub appearance: Option<u16>,
}

impl AdvFields {
    pub fn parse(data: &[u8]) -> Self {
        let mut fields = Self::default();
        for (ad_type, payload) in AdStructures::new(data) {
            match ad_type {
                AD_FLAGS => fields.flags = payload.first().copied(),
                AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE => {
                    for chunk in payload.chunks_exact(2) {
                        let uuid = u16::from_le_bytes([chunk[0], chunk[1]]);
                        if fields.uuids16.push(uuid).is_err() {
                            break;
                        }
                    }
                }
                AD_NAME_SHORT | AD_NAME_COMPLETE => {
                    // A complete name wins over a shortened one.
                    if fields.name.is_none() || ad_type == AD_NAME_COMPLETE {
                        fields.name = Some(name_from_bytes(payload));
                        fields.name_complete = ad_type == AD_NAME_COMPLETE;
                    }
                }
                AD_TX_POWER => fields.tx_power = payload.first().map(|&b| b as i8),
                AD_APPEARANCE if payload.len() >= 2 => {
                    fields.appearance = Some(u16::from_le_bytes([payload[0], payload[1]]))
                }
                _ => {}
            }
        }
        fields
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn advertises_uuid16(&self, uuid: u16) -> bool {
        self.uuids16.contains(&uuid)
    }
}

fn name_from_bytes(bytes: &[u8]) -> String<MAX_NAME_LEN> {
    let mut name = String::new();
    for &b in bytes {
        if name.push(b as char).is_err() {
            break;
        }
    }
    name
}

/// Check if raw advertisement data lists the HID Service UUID (0x1812).
pub fn contains_hid_service_uuid(data: &[u8]) -> bool {
    AdStructures::new(data)
        .filter(|(t, _)| matches!(*t, AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE))
        .flat_map(|(_, p)| p.chunks_exact(2))
        .any(|c| u16::from_le_bytes([c[0], c[1]]) == HID_SERVICE_UUID16)
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> Option<String<MAX_NAME_LEN>> {
    AdvFields::parse(data).name
}
