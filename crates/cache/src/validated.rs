//! Current validated objects, grouped per trust anchor.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rtr::Serial;
use tracing::{debug, info};

use crate::history::SerialStore;
use crate::payload::{Payload, RouteOrigin, RouterCertificate, TrustAnchorId};
use crate::query::{Paging, SearchTerm, SortBy, Sorting, ValidatedObjects};
use crate::snapshot::Snapshot;

/// Everything one validation run accepted under a single trust anchor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnouncementSet {
    pub route_origins: BTreeSet<RouteOrigin>,
    pub router_certificates: Vec<RouterCertificate>,
}

impl AnnouncementSet {
    pub fn new(
        route_origins: impl IntoIterator<Item = RouteOrigin>,
        router_certificates: Vec<RouterCertificate>,
    ) -> Self {
        Self {
            route_origins: route_origins.into_iter().collect(),
            router_certificates,
        }
    }

    fn payloads(&self) -> impl Iterator<Item = Payload> + '_ {
        self.route_origins
            .iter()
            .copied()
            .map(Payload::from)
            .chain(
                self.router_certificates
                    .iter()
                    .flat_map(|cert| cert.router_keys())
                    .map(Payload::from),
            )
    }

    fn router_key_count(&self) -> usize {
        self.router_certificates
            .iter()
            .map(|cert| cert.asns.len())
            .sum()
    }
}

/// ROA prefix attributed to the trust anchor that validated it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRoaPrefix {
    pub trust_anchor: TrustAnchorId,
    pub origin: RouteOrigin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRouterCertificate {
    pub trust_anchor: TrustAnchorId,
    pub certificate: RouterCertificate,
}

type Entries = BTreeMap<TrustAnchorId, Arc<AnnouncementSet>>;

/// Immutable view of the cache at one instant.
#[derive(Clone, Debug, Default)]
pub struct ValidatedSnapshot {
    entries: Arc<Entries>,
}

impl ValidatedSnapshot {
    pub fn trust_anchors(&self) -> impl Iterator<Item = &TrustAnchorId> {
        self.entries.keys()
    }

    pub fn get(&self, trust_anchor: &TrustAnchorId) -> Option<&AnnouncementSet> {
        self.entries.get(trust_anchor).map(Arc::as_ref)
    }

    /// Deduplicated union over all trust anchors, as served to routers.
    pub fn payloads(&self) -> Snapshot {
        self.entries
            .values()
            .flat_map(|set| set.payloads())
            .collect()
    }

    pub fn roa_prefixes(&self) -> impl Iterator<Item = ValidatedRoaPrefix> + '_ {
        self.entries.iter().flat_map(|(trust_anchor, set)| {
            set.route_origins.iter().map(move |origin| ValidatedRoaPrefix {
                trust_anchor: trust_anchor.clone(),
                origin: *origin,
            })
        })
    }

    pub fn router_certificates(&self) -> impl Iterator<Item = ValidatedRouterCertificate> + '_ {
        self.entries.iter().flat_map(|(trust_anchor, set)| {
            set.router_certificates
                .iter()
                .map(move |certificate| ValidatedRouterCertificate {
                    trust_anchor: trust_anchor.clone(),
                    certificate: certificate.clone(),
                })
        })
    }

    pub fn count_roa_prefixes(&self, search: Option<&SearchTerm>) -> usize {
        self.roa_prefixes()
            .filter(|roa| matches_search(search, roa))
            .count()
    }

    pub fn find_roa_prefixes(
        &self,
        search: Option<&SearchTerm>,
        sorting: Sorting,
        paging: Paging,
    ) -> ValidatedObjects<ValidatedRoaPrefix> {
        let mut matched: Vec<ValidatedRoaPrefix> = self
            .roa_prefixes()
            .filter(|roa| matches_search(search, roa))
            .collect();
        matched.sort_by(|a, b| sorting.apply(compare_roa(sorting.by, a, b)));
        ValidatedObjects {
            total_count: matched.len(),
            objects: paging.page(matched),
        }
    }

    pub fn find_router_certificates(
        &self,
        paging: Paging,
    ) -> ValidatedObjects<ValidatedRouterCertificate> {
        let all: Vec<ValidatedRouterCertificate> = self.router_certificates().collect();
        ValidatedObjects {
            total_count: all.len(),
            objects: paging.page(all),
        }
    }
}

fn matches_search(search: Option<&SearchTerm>, roa: &ValidatedRoaPrefix) -> bool {
    match search {
        Some(term) => term.matches(
            roa.trust_anchor.as_str(),
            roa.origin.asn,
            &roa.origin.prefix,
        ),
        None => true,
    }
}

fn compare_roa(by: SortBy, a: &ValidatedRoaPrefix, b: &ValidatedRoaPrefix) -> Ordering {
    let primary = match by {
        SortBy::TrustAnchor => a.trust_anchor.cmp(&b.trust_anchor),
        SortBy::Asn => a.origin.asn.cmp(&b.origin.asn),
        SortBy::Prefix => a.origin.prefix.cmp(&b.origin.prefix),
        SortBy::MaxLength => a.origin.max_len.cmp(&b.origin.max_len),
    };
    primary
        .then_with(|| a.trust_anchor.cmp(&b.trust_anchor))
        .then_with(|| a.origin.cmp(&b.origin))
}

/// Process-wide cache of validated objects. Each write swaps in a new
/// map and publishes the resulting union to the serial store while still
/// holding the writer lock, so publications follow update order.
pub struct ValidatedCache {
    entries: RwLock<Arc<Entries>>,
    writer: Mutex<()>,
    store: Arc<SerialStore>,
}

impl ValidatedCache {
    pub fn new(store: Arc<SerialStore>) -> Self {
        Self {
            entries: RwLock::new(Arc::new(Entries::new())),
            writer: Mutex::new(()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<SerialStore> {
        &self.store
    }

    /// Replace everything `trust_anchor` contributes and publish the union.
    pub fn update(&self, trust_anchor: TrustAnchorId, set: AnnouncementSet) -> Serial {
        let _writer = self.writer.lock();
        let roa_prefixes = set.route_origins.len();
        let router_keys = set.router_key_count();
        let mut entries = Entries::clone(&self.entries.read());
        entries.insert(trust_anchor.clone(), Arc::new(set));
        let serial = self.swap_and_publish(entries);
        info!(
            trust_anchor = %trust_anchor,
            roa_prefixes,
            router_keys,
            %serial,
            "updated trust anchor"
        );
        serial
    }

    /// Drop the contribution of `trust_anchor`. Returns `None` and publishes
    /// nothing when the trust anchor is unknown.
    pub fn remove(&self, trust_anchor: &TrustAnchorId) -> Option<Serial> {
        let _writer = self.writer.lock();
        let mut entries = Entries::clone(&self.entries.read());
        if entries.remove(trust_anchor).is_none() {
            debug!(trust_anchor = %trust_anchor, "remove of unknown trust anchor ignored");
            return None;
        }
        let serial = self.swap_and_publish(entries);
        info!(trust_anchor = %trust_anchor, %serial, "removed trust anchor");
        Some(serial)
    }

    pub fn current_snapshot(&self) -> ValidatedSnapshot {
        ValidatedSnapshot {
            entries: self.entries.read().clone(),
        }
    }

    fn swap_and_publish(&self, entries: Entries) -> Serial {
        let entries = Arc::new(entries);
        *self.entries.write() = entries.clone();
        let union = ValidatedSnapshot { entries }.payloads();
        self.store.publish(union)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Asn, Prefix};
    use crate::query::SortDirection;
    use rtr::SKI_LEN;

    fn origin(asn: u32, prefix: &str, max_len: u8) -> RouteOrigin {
        let prefix: Prefix = prefix.parse().expect("prefix");
        RouteOrigin::new(Asn(asn), prefix, max_len).expect("origin")
    }

    fn cache() -> ValidatedCache {
        ValidatedCache::new(Arc::new(SerialStore::with_session(10, 1, Serial(0))))
    }

    #[test]
    fn update_replaces_whole_trust_anchor() {
        let cache = cache();
        let ta = TrustAnchorId::from("ripe");
        cache.update(
            ta.clone(),
            AnnouncementSet::new([origin(1, "10.0.0.0/8", 8), origin(2, "11.0.0.0/8", 8)], vec![]),
        );
        let serial = cache.update(
            ta.clone(),
            AnnouncementSet::new([origin(3, "12.0.0.0/8", 8)], vec![]),
        );
        assert_eq!(serial, Serial(2));
        let snapshot = cache.current_snapshot();
        assert_eq!(snapshot.get(&ta).map(|set| set.route_origins.len()), Some(1));
        assert_eq!(cache.store().current_snapshot().len(), 1);
    }

    #[test]
    fn union_deduplicates_across_trust_anchors() {
        let cache = cache();
        let shared = origin(64496, "192.0.2.0/24", 24);
        cache.update("a".into(), AnnouncementSet::new([shared], vec![]));
        cache.update("b".into(), AnnouncementSet::new([shared], vec![]));
        assert_eq!(cache.current_snapshot().roa_prefixes().count(), 2);
        assert_eq!(cache.store().current_snapshot().len(), 1);

        cache.remove(&"a".into()).expect("published");
        assert_eq!(cache.store().current_snapshot().len(), 1);
        let diff = cache.store().diff_from(Serial(2)).expect("diff");
        assert!(diff.is_empty());
    }

    #[test]
    fn remove_unknown_trust_anchor_is_noop() {
        let cache = cache();
        assert_eq!(cache.remove(&"missing".into()), None);
        assert!(!cache.store().is_ready());
    }

    #[test]
    fn router_certificates_expand_to_keys() {
        let cache = cache();
        let cert = RouterCertificate {
            asns: vec![Asn(1), Asn(2), Asn(3)],
            ski: [1; SKI_LEN],
            spki: vec![0xAB; 8],
        };
        cache.update("ta".into(), AnnouncementSet::new([], vec![cert]));
        assert_eq!(cache.store().current_snapshot().len(), 3);
        assert_eq!(
            cache
                .current_snapshot()
                .find_router_certificates(Paging::default())
                .total_count,
            1
        );
    }

    #[test]
    fn finds_sorts_and_pages_roa_prefixes() {
        let cache = cache();
        cache.update(
            "arin".into(),
            AnnouncementSet::new(
                [origin(300, "10.0.0.0/8", 16), origin(100, "10.1.0.0/16", 16)],
                vec![],
            ),
        );
        cache.update(
            "ripe".into(),
            AnnouncementSet::new([origin(200, "192.0.2.0/24", 24)], vec![]),
        );
        let snapshot = cache.current_snapshot();

        let by_asn = snapshot.find_roa_prefixes(
            None,
            Sorting::new(SortBy::Asn, SortDirection::Descending),
            Paging::new(0, 2),
        );
        assert_eq!(by_asn.total_count, 3);
        let asns: Vec<u32> = by_asn.objects.iter().map(|roa| roa.origin.asn.0).collect();
        assert_eq!(asns, vec![300, 200]);

        let covering = SearchTerm::parse("10.1.2.0/24");
        let found = snapshot.find_roa_prefixes(Some(&covering), Sorting::default(), Paging::default());
        assert_eq!(found.total_count, 2);
        assert_eq!(snapshot.count_roa_prefixes(Some(&SearchTerm::parse("rip"))), 1);
        assert_eq!(snapshot.count_roa_prefixes(Some(&SearchTerm::parse("AS100"))), 1);
    }
}
