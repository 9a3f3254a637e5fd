//! Paginated GATT discovery.
//!
//! Discovery runs in three passes driven by host completions:
//!
//! 1. all primary services,
//! 2. characteristics of each non-empty service, ascending,
//! 3. descriptors of each characteristic with room for any, ascending.
//!
//! Results of a pass may arrive in any order and in several batches; they
//! are inserted into the [`AttributeCache`] as they come. The pass cursor
//! lives in the [`Peer`](super::Peer) so nothing else has to remember where
//! discovery stands.
//!
//! [`start`] and [`on_result`] return `Some(result)` exactly once per
//! discovery attempt; every other call returns `None`.

use super::{AttributeCache, CharacteristicDef, DescriptorDef, Handle, HandleRange, ServiceDef};
use crate::ble::ConnHandle;
use crate::error::{Error, HostError};

/// Discovery requests the host stack must be able to start.
///
/// Each call only initiates the procedure; results come back later as
/// [`Discovered`] items followed by one [`Discovered::Done`].
pub trait GattClient {
    fn discover_all_services(&mut self, conn: ConnHandle) -> Result<(), HostError>;
    fn discover_characteristics(&mut self, conn: ConnHandle, range: HandleRange) -> Result<(), HostError>;
    fn discover_descriptors(&mut self, conn: ConnHandle, range: HandleRange) -> Result<(), HostError>;
}

/// Discovery cursor for one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Idle,
    Services,
    /// Expanding the service that starts at `service_start`.
    Characteristics { service_start: Handle },
    /// Expanding the characteristic whose value handle is `chr_value`.
    Descriptors { chr_value: Handle },
    Complete,
    Failed,
}

impl Phase {
    pub fn in_progress(self) -> bool {
        matches!(
            self,
            Phase::Services | Phase::Characteristics { .. } | Phase::Descriptors { .. }
        )
    }
}

/// One discovery result delivered by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Discovered {
    Service(ServiceDef),
    Characteristic(CharacteristicDef),
    Descriptor(DescriptorDef),
    /// The current procedure finished, successfully or not.
    Done(Result<(), HostError>),
}

/// Starts full discovery on `conn`.
pub fn start<G, const P: usize, const S: usize, const C: usize, const D: usize>(
    cache: &mut AttributeCache<P, S, C, D>,
    client: &mut G,
    conn: ConnHandle,
) -> Option<Result<(), Error>>
where
    G: GattClient + ?Sized,
{
    let Some(peer) = cache.peer_mut(conn) else {
        warn!("discovery: no peer for conn {}", conn);
        return Some(Err(Error::NotFound));
    };
    if peer.phase.in_progress() {
        warn!("discovery: already running on conn {}", conn);
        return Some(Err(Error::Conflict));
    }
    peer.phase = Phase::Services;

    debug!("discovery: services on conn {}", conn);
    match client.discover_all_services(conn) {
        Ok(()) => None,
        Err(e) => fail(cache, conn, Error::DiscoveryFailed(e)),
    }
}

/// Feeds one host result into the discovery of `conn`.
///
/// Results for peers that are not discovering (finished, failed, or gone)
/// are dropped.
pub fn on_result<G, const P: usize, const S: usize, const C: usize, const D: usize>(
    cache: &mut AttributeCache<P, S, C, D>,
    client: &mut G,
    conn: ConnHandle,
    item: Discovered,
) -> Option<Result<(), Error>>
where
    G: GattClient + ?Sized,
{
    let phase = cache.peer(conn)?.phase;
    if !phase.in_progress() {
        trace!("discovery: late result on conn {} ignored", conn);
        return None;
    }

    let inserted = match (phase, item) {
        (_, Discovered::Done(Err(e))) => return fail(cache, conn, Error::DiscoveryFailed(e)),
        (Phase::Services, Discovered::Done(Ok(()))) => {
            return next_characteristics(cache, client, conn, None)
        }
        (Phase::Characteristics { service_start }, Discovered::Done(Ok(()))) => {
            return next_characteristics(cache, client, conn, Some(service_start))
        }
        (Phase::Descriptors { chr_value }, Discovered::Done(Ok(()))) => {
            return next_descriptors(cache, client, conn, Some(chr_value))
        }
        (Phase::Services, Discovered::Service(def)) => cache.add_service(conn, def),
        (Phase::Characteristics { service_start }, Discovered::Characteristic(def)) => {
            cache.add_characteristic(conn, service_start, def)
        }
        (Phase::Descriptors { chr_value }, Discovered::Descriptor(def)) => {
            cache.add_descriptor(conn, chr_value, def)
        }
        _ => {
            warn!("discovery: result does not belong to phase {}", phase);
            return fail(cache, conn, Error::Conflict);
        }
    };

    match inserted {
        Ok(()) => None,
        Err(e) => fail(cache, conn, e.into()),
    }
}

fn next_characteristics<G, const P: usize, const S: usize, const C: usize, const D: usize>(
    cache: &mut AttributeCache<P, S, C, D>,
    client: &mut G,
    conn: ConnHandle,
    after: Option<Handle>,
) -> Option<Result<(), Error>>
where
    G: GattClient + ?Sized,
{
    let target = cache
        .services(conn)
        .filter(|s| after.map_or(true, |a| s.start_handle() > a))
        .find(|s| !s.range().is_empty())
        .map(|s| s.range());

    let Some(range) = target else {
        return next_descriptors(cache, client, conn, None);
    };
    if let Some(peer) = cache.peer_mut(conn) {
        peer.phase = Phase::Characteristics {
            service_start: range.start,
        };
    }
    debug!("discovery: characteristics {}..={} on conn {}", range.start, range.end, conn);
    match client.discover_characteristics(conn, range) {
        Ok(()) => None,
        Err(e) => fail(cache, conn, Error::DiscoveryFailed(e)),
    }
}

fn next_descriptors<G, const P: usize, const S: usize, const C: usize, const D: usize>(
    cache: &mut AttributeCache<P, S, C, D>,
    client: &mut G,
    conn: ConnHandle,
    after: Option<Handle>,
) -> Option<Result<(), Error>>
where
    G: GattClient + ?Sized,
{
    let mut target = None;
    'outer: for svc in cache.services(conn) {
        for chr in cache.characteristics(svc) {
            let value = chr.value_handle();
            if after.is_some_and(|a| value <= a) {
                continue;
            }
            let end = cache.characteristic_end_handle(svc, chr);
            if end > value {
                target = Some((value, end));
                break 'outer;
            }
        }
    }

    let Some((value, end)) = target else {
        if let Some(peer) = cache.peer_mut(conn) {
            peer.phase = Phase::Complete;
        }
        info!("discovery: complete on conn {}", conn);
        return Some(Ok(()));
    };
    if let Some(peer) = cache.peer_mut(conn) {
        peer.phase = Phase::Descriptors { chr_value: value };
    }
    debug!("discovery: descriptors {}..={} on conn {}", value + 1, end, conn);
    match client.discover_descriptors(conn, HandleRange::new(value + 1, end)) {
        Ok(()) => None,
        Err(e) => fail(cache, conn, Error::DiscoveryFailed(e)),
    }
}

fn fail<const P: usize, const S: usize, const C: usize, const D: usize>(
    cache: &mut AttributeCache<P, S, C, D>,
    conn: ConnHandle,
    err: Error,
) -> Option<Result<(), Error>> {
    if let Some(peer) = cache.peer_mut(conn) {
        peer.phase = Phase::Failed;
    }
    error!("discovery: failed on conn {}: {}", conn, err);
    Some(Err(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::uuid::{CCCD, HID_REPORT, HID_SERVICE};
    use crate::gatt::CharProps;
    use std::vec::Vec;

    const CONN: ConnHandle = 3;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Request {
        Services,
        Characteristics(HandleRange),
        Descriptors(HandleRange),
    }

    #[derive(Default)]
    struct FakeClient {
        requests: Vec<Request>,
        refuse_descriptors: Option<HostError>,
    }

    impl GattClient for FakeClient {
        fn discover_all_services(&mut self, _conn: ConnHandle) -> Result<(), HostError> {
            self.requests.push(Request::Services);
            Ok(())
        }

        fn discover_characteristics(&mut self, _conn: ConnHandle, range: HandleRange) -> Result<(), HostError> {
            self.requests.push(Request::Characteristics(range));
            Ok(())
        }

        fn discover_descriptors(&mut self, _conn: ConnHandle, range: HandleRange) -> Result<(), HostError> {
            if let Some(e) = self.refuse_descriptors {
                return Err(e);
            }
            self.requests.push(Request::Descriptors(range));
            Ok(())
        }
    }

    /// Three HID services of seven handles each:
    /// `svc, decl, value, cccd, decl, value, cccd`.
    fn peripheral() -> (Vec<ServiceDef>, Vec<CharacteristicDef>, Vec<DescriptorDef>) {
        let mut services = Vec::new();
        let mut chrs = Vec::new();
        let mut dscs = Vec::new();
        for s in 0..3u16 {
            let base = 1 + s * 7;
            services.push(ServiceDef {
                range: HandleRange::new(base, base + 6),
                uuid: HID_SERVICE,
            });
            for c in 0..2u16 {
                let decl = base + 1 + c * 3;
                chrs.push(CharacteristicDef {
                    decl_handle: decl,
                    value_handle: decl + 1,
                    properties: CharProps::READ | CharProps::NOTIFY,
                    uuid: HID_REPORT,
                });
                dscs.push(DescriptorDef {
                    handle: decl + 2,
                    uuid: CCCD,
                });
            }
        }
        (services, chrs, dscs)
    }

    /// Answers one request the way a host would: results in reverse
    /// handle order, split into single-item batches, then completion.
    fn answer(req: Request) -> Vec<Discovered> {
        let (services, chrs, dscs) = peripheral();
        let mut items: Vec<Discovered> = match req {
            Request::Services => services.into_iter().map(Discovered::Service).collect(),
            Request::Characteristics(r) => chrs
                .into_iter()
                .filter(|c| r.contains(c.decl_handle))
                .map(Discovered::Characteristic)
                .collect(),
            Request::Descriptors(r) => dscs
                .into_iter()
                .filter(|d| r.contains(d.handle))
                .map(Discovered::Descriptor)
                .collect(),
        };
        items.reverse();
        items.push(Discovered::Done(Ok(())));
        items
    }

    /// Serves every outstanding request until the client goes quiet.
    fn drive<const S: usize>(
        cache: &mut AttributeCache<1, S, 8, 8>,
        client: &mut FakeClient,
    ) -> Vec<Result<(), Error>> {
        let mut completions = Vec::new();
        let mut served = 0;
        while served < client.requests.len() {
            let req = client.requests[served];
            served += 1;
            for item in answer(req) {
                if let Some(r) = on_result(cache, client, CONN, item) {
                    completions.push(r);
                }
            }
        }
        completions
    }

    #[test]
    fn full_discovery_completes_exactly_once() {
        let mut cache: AttributeCache<1, 4, 8, 8> = AttributeCache::new();
        let mut client = FakeClient::default();
        cache.add_peer(CONN).unwrap();

        assert_eq!(start(&mut cache, &mut client, CONN), None);
        assert_eq!(drive(&mut cache, &mut client), [Ok(())]);
        assert_eq!(cache.peer(CONN).unwrap().discovery_phase(), Phase::Complete);

        let usage = cache.usage();
        assert_eq!((usage.services, usage.characteristics, usage.descriptors), (3, 6, 6));

        let mut handles = Vec::new();
        for svc in cache.services(CONN) {
            handles.push(svc.start_handle());
            for chr in cache.characteristics(svc) {
                handles.push(chr.value_handle());
                for dsc in cache.descriptors(chr) {
                    handles.push(dsc.handle());
                }
            }
        }
        assert!(handles.windows(2).all(|w| w[0] < w[1]), "{:?}", handles);

        // One service pass, three characteristic passes, six descriptor passes.
        assert_eq!(client.requests.len(), 10);
        assert_eq!(client.requests[1], Request::Characteristics(HandleRange::new(1, 7)));
        assert_eq!(client.requests[4], Request::Descriptors(HandleRange::new(4, 4)));
    }

    #[test]
    fn host_failure_aborts_with_single_completion() {
        let mut cache: AttributeCache<1, 4, 8, 8> = AttributeCache::new();
        let mut client = FakeClient::default();
        cache.add_peer(CONN).unwrap();

        assert_eq!(start(&mut cache, &mut client, CONN), None);
        for item in answer(Request::Services) {
            assert_eq!(on_result(&mut cache, &mut client, CONN, item), None);
        }

        let status = HostError(0x0E);
        assert_eq!(
            on_result(&mut cache, &mut client, CONN, Discovered::Done(Err(status))),
            Some(Err(Error::DiscoveryFailed(status)))
        );
        assert_eq!(cache.peer(CONN).unwrap().discovery_phase(), Phase::Failed);

        // Stragglers from the aborted procedure change nothing.
        for item in answer(Request::Characteristics(HandleRange::new(1, 7))) {
            assert_eq!(on_result(&mut cache, &mut client, CONN, item), None);
        }
        assert_eq!(cache.usage().characteristics, 0);
    }

    #[test]
    fn refused_request_fails_immediately() {
        let mut cache: AttributeCache<1, 4, 8, 8> = AttributeCache::new();
        let mut client = FakeClient {
            refuse_descriptors: Some(HostError::BUSY),
            ..FakeClient::default()
        };
        cache.add_peer(CONN).unwrap();

        assert_eq!(start(&mut cache, &mut client, CONN), None);
        assert_eq!(
            drive(&mut cache, &mut client),
            [Err(Error::DiscoveryFailed(HostError::BUSY))]
        );
        assert_eq!(cache.usage().characteristics, 6);
        assert_eq!(cache.usage().descriptors, 0);
    }

    #[test]
    fn cache_exhaustion_aborts_discovery() {
        let mut cache: AttributeCache<1, 2, 8, 8> = AttributeCache::new();
        let mut client = FakeClient::default();
        cache.add_peer(CONN).unwrap();
        start(&mut cache, &mut client, CONN);
        assert_eq!(drive(&mut cache, &mut client), [Err(Error::ResourceExhausted)]);
        assert_eq!(client.requests, [Request::Services]);
    }

    #[test]
    fn empty_ranges_are_not_expanded() {
        let mut cache: AttributeCache<1, 4, 8, 8> = AttributeCache::new();
        let mut client = FakeClient::default();
        cache.add_peer(CONN).unwrap();
        start(&mut cache, &mut client, CONN);

        let lone = ServiceDef {
            range: HandleRange::new(1, 1),
            uuid: HID_SERVICE,
        };
        let svc = ServiceDef {
            range: HandleRange::new(2, 4),
            uuid: HID_SERVICE,
        };
        on_result(&mut cache, &mut client, CONN, Discovered::Service(lone));
        on_result(&mut cache, &mut client, CONN, Discovered::Service(svc));
        on_result(&mut cache, &mut client, CONN, Discovered::Done(Ok(())));
        assert_eq!(
            client.requests.last(),
            Some(&Request::Characteristics(HandleRange::new(2, 4)))
        );

        // Value handle at the service end leaves no room for descriptors.
        let chr = CharacteristicDef {
            decl_handle: 3,
            value_handle: 4,
            properties: CharProps::NOTIFY,
            uuid: HID_REPORT,
        };
        on_result(&mut cache, &mut client, CONN, Discovered::Characteristic(chr));
        assert_eq!(
            on_result(&mut cache, &mut client, CONN, Discovered::Done(Ok(()))),
            Some(Ok(()))
        );
        assert_eq!(client.requests.len(), 2);
    }

    #[test]
    fn start_requires_peer_and_idle_cursor() {
        let mut cache: AttributeCache<1, 4, 8, 8> = AttributeCache::new();
        let mut client = FakeClient::default();
        assert_eq!(start(&mut cache, &mut client, CONN), Some(Err(Error::NotFound)));

        cache.add_peer(CONN).unwrap();
        assert_eq!(start(&mut cache, &mut client, CONN), None);
        assert_eq!(start(&mut cache, &mut client, CONN), Some(Err(Error::Conflict)));
        assert_eq!(cache.peer(CONN).unwrap().discovery_phase(), Phase::Services);
    }
}
