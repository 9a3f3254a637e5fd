//! Per-connection GATT attribute cache.
//!
//! Four fixed-capacity pools (peers, services, characteristics,
//! descriptors) shared by every connection. Each peer owns a sorted
//! singly-linked chain of services, each service a chain of
//! characteristics, each characteristic a chain of descriptors; the links
//! are slot indices into the pools.
//!
//! Insertion keeps every chain sorted by handle no matter what order the
//! discovery results arrive in, and rejects overlapping ranges. A failed
//! insertion never modifies the cache.

use super::discovery::Phase;
use super::pool::{Pool, SlotId};
use super::{CharProps, CharacteristicDef, DescriptorDef, Handle, HandleRange, ServiceDef, Uuid};
use crate::ble::ConnHandle;
use crate::config;
use crate::error::CacheError;

/// Runtime pool maximums. Each is clamped to the cache's compile-time capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CacheLimits {
    pub peers: usize,
    pub services: usize,
    pub characteristics: usize,
    pub descriptors: usize,
}

impl CacheLimits {
    /// Every pool at the cache's compiled capacity.
    pub const FULL: CacheLimits = CacheLimits {
        peers: usize::MAX,
        services: usize::MAX,
        characteristics: usize::MAX,
        descriptors: usize::MAX,
    };

    /// The configured pool sizes.
    pub const fn new() -> Self {
        Self {
            peers: config::MAX_PEERS,
            services: config::MAX_SERVICES,
            characteristics: config::MAX_CHARACTERISTICS,
            descriptors: config::MAX_DESCRIPTORS,
        }
    }
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::new()
    }
}

/// Live entry counts per pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CacheUsage {
    pub peers: usize,
    pub services: usize,
    pub characteristics: usize,
    pub descriptors: usize,
}

/// One connected peripheral.
pub struct Peer {
    conn: ConnHandle,
    services: Option<SlotId>,
    pub(crate) phase: Phase,
}

impl Peer {
    pub fn conn(&self) -> ConnHandle {
        self.conn
    }

    /// Where the discovery procedure for this peer currently stands.
    pub fn discovery_phase(&self) -> Phase {
        self.phase
    }
}

pub struct Service {
    def: ServiceDef,
    next: Option<SlotId>,
    characteristics: Option<SlotId>,
}

impl Service {
    pub fn range(&self) -> HandleRange {
        self.def.range
    }

    pub fn start_handle(&self) -> Handle {
        self.def.range.start
    }

    pub fn end_handle(&self) -> Handle {
        self.def.range.end
    }

    pub fn uuid(&self) -> Uuid {
        self.def.uuid
    }
}

pub struct Characteristic {
    def: CharacteristicDef,
    next: Option<SlotId>,
    descriptors: Option<SlotId>,
}

impl Characteristic {
    pub fn decl_handle(&self) -> Handle {
        self.def.decl_handle
    }

    pub fn value_handle(&self) -> Handle {
        self.def.value_handle
    }

    pub fn properties(&self) -> CharProps {
        self.def.properties
    }

    pub fn uuid(&self) -> Uuid {
        self.def.uuid
    }
}

pub struct Descriptor {
    def: DescriptorDef,
    next: Option<SlotId>,
}

impl Descriptor {
    pub fn handle(&self) -> Handle {
        self.def.handle
    }

    pub fn uuid(&self) -> Uuid {
        self.def.uuid
    }
}

/// Result of a handle lookup inside one sibling chain.
///
/// `prev` is the last sibling with a lower handle, i.e. the insertion
/// point for `exact` when it is absent.
pub struct Position<'a, T> {
    pub exact: Option<&'a T>,
    pub prev: Option<&'a T>,
}

trait Linked {
    fn next_sibling(&self) -> Option<SlotId>;
}

impl Linked for Service {
    fn next_sibling(&self) -> Option<SlotId> {
        self.next
    }
}

impl Linked for Characteristic {
    fn next_sibling(&self) -> Option<SlotId> {
        self.next
    }
}

impl Linked for Descriptor {
    fn next_sibling(&self) -> Option<SlotId> {
        self.next
    }
}

/// Walks a sibling chain from `cursor`.
struct Chain<'a, T, const N: usize> {
    pool: &'a Pool<T, N>,
    cursor: Option<SlotId>,
}

impl<'a, T: Linked, const N: usize> Iterator for Chain<'a, T, N> {
    type Item = (SlotId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let item = self.pool.get(id)?;
        self.cursor = item.next_sibling();
        Some((id, item))
    }
}

/// Finds `key` in a sorted chain; returns `(exact, prev)`.
fn locate<T: Linked, const N: usize>(
    pool: &Pool<T, N>,
    head: Option<SlotId>,
    key: Handle,
    key_of: impl Fn(&T) -> Handle,
) -> (Option<SlotId>, Option<SlotId>) {
    let mut prev = None;
    for (id, item) in (Chain { pool, cursor: head }) {
        let k = key_of(item);
        if k == key {
            return (Some(id), prev);
        }
        if k > key {
            break;
        }
        prev = Some(id);
    }
    (None, prev)
}

pub struct AttributeCache<
    const P: usize = { config::MAX_PEERS },
    const S: usize = { config::MAX_SERVICES },
    const C: usize = { config::MAX_CHARACTERISTICS },
    const D: usize = { config::MAX_DESCRIPTORS },
> {
    peers: Pool<Peer, P>,
    services: Pool<Service, S>,
    characteristics: Pool<Characteristic, C>,
    descriptors: Pool<Descriptor, D>,
}

impl<const P: usize, const S: usize, const C: usize, const D: usize> Default
    for AttributeCache<P, S, C, D>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const P: usize, const S: usize, const C: usize, const D: usize> AttributeCache<P, S, C, D> {
    /// Cache with every pool sized to its full capacity.
    pub const fn new() -> Self {
        Self {
            peers: Pool::new(),
            services: Pool::new(),
            characteristics: Pool::new(),
            descriptors: Pool::new(),
        }
    }

    pub const fn with_limits(limits: CacheLimits) -> Self {
        Self {
            peers: Pool::with_limit(limits.peers),
            services: Pool::with_limit(limits.services),
            characteristics: Pool::with_limit(limits.characteristics),
            descriptors: Pool::with_limit(limits.descriptors),
        }
    }

    pub fn usage(&self) -> CacheUsage {
        CacheUsage {
            peers: self.peers.len(),
            services: self.services.len(),
            characteristics: self.characteristics.len(),
            descriptors: self.descriptors.len(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        CacheLimits {
            peers: self.peers.limit(),
            services: self.services.limit(),
            characteristics: self.characteristics.limit(),
            descriptors: self.descriptors.limit(),
        }
    }

    // Peers

    fn peer_id(&self, conn: ConnHandle) -> Option<SlotId> {
        self.peers
            .iter()
            .find(|(_, p)| p.conn == conn)
            .map(|(id, _)| id)
    }

    pub fn peer(&self, conn: ConnHandle) -> Option<&Peer> {
        self.peer_id(conn).and_then(|id| self.peers.get(id))
    }

    pub(crate) fn peer_mut(&mut self, conn: ConnHandle) -> Option<&mut Peer> {
        let id = self.peer_id(conn)?;
        self.peers.get_mut(id)
    }

    /// Starts tracking a new connection.
    pub fn add_peer(&mut self, conn: ConnHandle) -> Result<(), CacheError> {
        if self.peer_id(conn).is_some() {
            return Err(CacheError::Conflict);
        }
        self.peers.insert(Peer {
            conn,
            services: None,
            phase: Phase::Idle,
        })?;
        Ok(())
    }

    /// Frees the peer slot and every attribute it owns.
    pub fn delete_peer(&mut self, conn: ConnHandle) -> Result<(), CacheError> {
        let id = self.peer_id(conn).ok_or(CacheError::NotFound)?;
        let peer = self.peers.remove(id).ok_or(CacheError::NotFound)?;

        let mut next_svc = peer.services;
        while let Some(sid) = next_svc {
            let Some(svc) = self.services.remove(sid) else {
                break;
            };
            next_svc = svc.next;

            let mut next_chr = svc.characteristics;
            while let Some(cid) = next_chr {
                let Some(chr) = self.characteristics.remove(cid) else {
                    break;
                };
                next_chr = chr.next;

                let mut next_dsc = chr.descriptors;
                while let Some(did) = next_dsc {
                    let Some(dsc) = self.descriptors.remove(did) else {
                        break;
                    };
                    next_dsc = dsc.next;
                }
            }
        }
        Ok(())
    }

    /// Visits every live peer in pool-slot order.
    pub fn traverse_all(&self, mut visit: impl FnMut(&Peer)) {
        for (_, peer) in self.peers.iter() {
            visit(peer);
        }
    }

    // Services

    pub fn services(&self, conn: ConnHandle) -> impl Iterator<Item = &Service> + '_ {
        let head = self.peer(conn).and_then(|p| p.services);
        Chain {
            pool: &self.services,
            cursor: head,
        }
        .map(|(_, s)| s)
    }

    pub fn add_service(&mut self, conn: ConnHandle, def: ServiceDef) -> Result<(), CacheError> {
        if def.range.start > def.range.end {
            return Err(CacheError::Conflict);
        }
        let pid = self.peer_id(conn).ok_or(CacheError::NotFound)?;
        let head = self.peers.get(pid).and_then(|p| p.services);

        let (exact, prev) = locate(&self.services, head, def.range.start, |s| s.def.range.start);
        if let Some(id) = exact {
            // Re-delivery of an identical result is harmless.
            return match self.services.get(id) {
                Some(s) if s.def == def => Ok(()),
                _ => Err(CacheError::Conflict),
            };
        }

        let next = match prev {
            Some(p) => self.services.get(p).and_then(|s| s.next),
            None => head,
        };
        for neighbour in [prev, next].into_iter().flatten() {
            if let Some(s) = self.services.get(neighbour) {
                if s.def.range.overlaps(&def.range) {
                    return Err(CacheError::Conflict);
                }
            }
        }

        let id = self.services.insert(Service {
            def,
            next,
            characteristics: None,
        })?;
        match prev {
            Some(p) => {
                if let Some(s) = self.services.get_mut(p) {
                    s.next = Some(id);
                }
            }
            None => {
                if let Some(peer) = self.peers.get_mut(pid) {
                    peer.services = Some(id);
                }
            }
        }
        Ok(())
    }

    fn service_id(&self, conn: ConnHandle, start: Handle) -> Option<SlotId> {
        let head = self.peer(conn)?.services;
        locate(&self.services, head, start, |s| s.def.range.start).0
    }

    /// Looks up a service by its start handle.
    pub fn find_service(&self, conn: ConnHandle, start: Handle) -> Position<'_, Service> {
        let head = self.peer(conn).and_then(|p| p.services);
        let (exact, prev) = locate(&self.services, head, start, |s| s.def.range.start);
        Position {
            exact: exact.and_then(|id| self.services.get(id)),
            prev: prev.and_then(|id| self.services.get(id)),
        }
    }

    /// The service whose range contains `handle`.
    pub fn find_service_by_range(&self, conn: ConnHandle, handle: Handle) -> Option<&Service> {
        self.services(conn).find(|s| s.def.range.contains(handle))
    }

    pub fn find_service_by_uuid(&self, conn: ConnHandle, uuid: Uuid) -> Result<&Service, CacheError> {
        self.services(conn)
            .find(|s| s.def.uuid == uuid)
            .ok_or(CacheError::NotFound)
    }

    // Characteristics

    pub fn characteristics(&self, svc: &Service) -> impl Iterator<Item = &Characteristic> + '_ {
        Chain {
            pool: &self.characteristics,
            cursor: svc.characteristics,
        }
        .map(|(_, c)| c)
    }

    /// Last handle belonging to `chr`: one below the next characteristic's
    /// declaration, or the end of the service.
    pub fn characteristic_end_handle(&self, svc: &Service, chr: &Characteristic) -> Handle {
        chr.next
            .and_then(|n| self.characteristics.get(n))
            .map_or(svc.def.range.end, |n| n.def.decl_handle.saturating_sub(1))
    }

    pub fn add_characteristic(
        &mut self,
        conn: ConnHandle,
        service_start: Handle,
        def: CharacteristicDef,
    ) -> Result<(), CacheError> {
        let sid = self
            .service_id(conn, service_start)
            .ok_or(CacheError::NotFound)?;
        let (range, head) = match self.services.get(sid) {
            Some(s) => (s.def.range, s.characteristics),
            None => return Err(CacheError::NotFound),
        };
        if def.value_handle <= def.decl_handle
            || def.decl_handle <= range.start
            || def.value_handle > range.end
        {
            return Err(CacheError::Conflict);
        }

        let (exact, prev) = locate(&self.characteristics, head, def.value_handle, |c| {
            c.def.value_handle
        });
        if let Some(id) = exact {
            return match self.characteristics.get(id) {
                Some(c) if c.def == def => Ok(()),
                _ => Err(CacheError::Conflict),
            };
        }

        let next = match prev {
            Some(p) => self.characteristics.get(p).and_then(|c| c.next),
            None => head,
        };
        if let Some(p) = prev.and_then(|p| self.characteristics.get(p)) {
            let prev_last = self.last_descriptor_handle(p).unwrap_or(p.def.value_handle);
            if prev_last >= def.decl_handle {
                return Err(CacheError::Conflict);
            }
        }
        if let Some(n) = next.and_then(|n| self.characteristics.get(n)) {
            if n.def.decl_handle <= def.value_handle {
                return Err(CacheError::Conflict);
            }
        }

        let id = self.characteristics.insert(Characteristic {
            def,
            next,
            descriptors: None,
        })?;
        match prev {
            Some(p) => {
                if let Some(c) = self.characteristics.get_mut(p) {
                    c.next = Some(id);
                }
            }
            None => {
                if let Some(s) = self.services.get_mut(sid) {
                    s.characteristics = Some(id);
                }
            }
        }
        Ok(())
    }

    /// Looks up a characteristic by value handle under the service starting
    /// at `service_start`.
    pub fn find_characteristic(
        &self,
        conn: ConnHandle,
        service_start: Handle,
        value_handle: Handle,
    ) -> Position<'_, Characteristic> {
        let head = self
            .service_id(conn, service_start)
            .and_then(|sid| self.services.get(sid))
            .and_then(|s| s.characteristics);
        let (exact, prev) = locate(&self.characteristics, head, value_handle, |c| {
            c.def.value_handle
        });
        Position {
            exact: exact.and_then(|id| self.characteristics.get(id)),
            prev: prev.and_then(|id| self.characteristics.get(id)),
        }
    }

    fn characteristic_ids(&self, conn: ConnHandle, value_handle: Handle) -> Option<(SlotId, SlotId)> {
        let head = self.peer(conn)?.services;
        for (sid, svc) in (Chain {
            pool: &self.services,
            cursor: head,
        }) {
            let (exact, _) = locate(&self.characteristics, svc.characteristics, value_handle, |c| {
                c.def.value_handle
            });
            if let Some(cid) = exact {
                return Some((sid, cid));
            }
        }
        None
    }

    /// Finds a characteristic by value handle across every service.
    pub fn characteristic_by_value(
        &self,
        conn: ConnHandle,
        value_handle: Handle,
    ) -> Option<(&Service, &Characteristic)> {
        let (sid, cid) = self.characteristic_ids(conn, value_handle)?;
        Some((self.services.get(sid)?, self.characteristics.get(cid)?))
    }

    /// Every characteristic of type `chr_uuid` inside services of type
    /// `svc_uuid`, in ascending handle order.
    pub fn characteristics_by_uuid(
        &self,
        conn: ConnHandle,
        svc_uuid: Uuid,
        chr_uuid: Uuid,
    ) -> impl Iterator<Item = &Characteristic> + '_ {
        self.services(conn)
            .filter(move |s| s.def.uuid == svc_uuid)
            .flat_map(move |s| self.characteristics(s))
            .filter(move |c| c.def.uuid == chr_uuid)
    }

    pub fn find_characteristic_by_uuid(
        &self,
        conn: ConnHandle,
        svc_uuid: Uuid,
        chr_uuid: Uuid,
    ) -> Result<&Characteristic, CacheError> {
        self.characteristics_by_uuid(conn, svc_uuid, chr_uuid)
            .next()
            .ok_or(CacheError::NotFound)
    }

    // Descriptors

    pub fn descriptors(&self, chr: &Characteristic) -> impl Iterator<Item = &Descriptor> + '_ {
        Chain {
            pool: &self.descriptors,
            cursor: chr.descriptors,
        }
        .map(|(_, d)| d)
    }

    fn last_descriptor_handle(&self, chr: &Characteristic) -> Option<Handle> {
        self.descriptors(chr).last().map(|d| d.def.handle)
    }

    pub fn add_descriptor(
        &mut self,
        conn: ConnHandle,
        chr_value_handle: Handle,
        def: DescriptorDef,
    ) -> Result<(), CacheError> {
        let (sid, cid) = self
            .characteristic_ids(conn, chr_value_handle)
            .ok_or(CacheError::NotFound)?;
        let (Some(svc), Some(chr)) = (self.services.get(sid), self.characteristics.get(cid)) else {
            return Err(CacheError::NotFound);
        };
        let end = self.characteristic_end_handle(svc, chr);
        if def.handle <= chr.def.value_handle || def.handle > end {
            return Err(CacheError::Conflict);
        }

        let head = chr.descriptors;
        let (exact, prev) = locate(&self.descriptors, head, def.handle, |d| d.def.handle);
        if let Some(id) = exact {
            return match self.descriptors.get(id) {
                Some(d) if d.def == def => Ok(()),
                _ => Err(CacheError::Conflict),
            };
        }
        let next = match prev {
            Some(p) => self.descriptors.get(p).and_then(|d| d.next),
            None => head,
        };

        let id = self.descriptors.insert(Descriptor { def, next })?;
        match prev {
            Some(p) => {
                if let Some(d) = self.descriptors.get_mut(p) {
                    d.next = Some(id);
                }
            }
            None => {
                if let Some(c) = self.characteristics.get_mut(cid) {
                    c.descriptors = Some(id);
                }
            }
        }
        Ok(())
    }

    /// Looks up a descriptor by handle under the characteristic with value
    /// handle `chr_value_handle`.
    pub fn find_descriptor(
        &self,
        conn: ConnHandle,
        chr_value_handle: Handle,
        handle: Handle,
    ) -> Position<'_, Descriptor> {
        let head = self
            .characteristic_ids(conn, chr_value_handle)
            .and_then(|(_, cid)| self.characteristics.get(cid))
            .and_then(|c| c.descriptors);
        let (exact, prev) = locate(&self.descriptors, head, handle, |d| d.def.handle);
        Position {
            exact: exact.and_then(|id| self.descriptors.get(id)),
            prev: prev.and_then(|id| self.descriptors.get(id)),
        }
    }

    pub fn find_descriptor_by_uuid(
        &self,
        conn: ConnHandle,
        svc_uuid: Uuid,
        chr_uuid: Uuid,
        dsc_uuid: Uuid,
    ) -> Result<&Descriptor, CacheError> {
        self.characteristics_by_uuid(conn, svc_uuid, chr_uuid)
            .flat_map(|c| self.descriptors(c))
            .find(|d| d.def.uuid == dsc_uuid)
            .ok_or(CacheError::NotFound)
    }
}
