use std::collections::BTreeSet;

use rtr::Serial;

use crate::payload::Payload;

/// Complete set of announcements valid at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    payloads: BTreeSet<Payload>,
}

impl Snapshot {
    pub fn new(payloads: BTreeSet<Payload>) -> Self {
        Self { payloads }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn contains(&self, payload: &Payload) -> bool {
        self.payloads.contains(payload)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Payload> {
        self.payloads.iter()
    }

    /// Snapshot obtained by applying `diff` to this one.
    #[must_use]
    pub fn apply(&self, diff: &Diff) -> Snapshot {
        let mut payloads = self.payloads.clone();
        for payload in &diff.withdrawn {
            payloads.remove(payload);
        }
        for payload in &diff.announced {
            payloads.insert(payload.clone());
        }
        Snapshot { payloads }
    }
}

impl FromIterator<Payload> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Payload>>(iter: I) -> Self {
        Self {
            payloads: iter.into_iter().collect(),
        }
    }
}

/// Changes between two chronologically adjacent snapshots, tagged with
/// the serial it leads to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta {
    serial: Serial,
    announced: BTreeSet<Payload>,
    withdrawn: BTreeSet<Payload>,
}

impl Delta {
    pub fn between(serial: Serial, older: &Snapshot, newer: &Snapshot) -> Self {
        Self {
            serial,
            announced: newer
                .payloads
                .difference(&older.payloads)
                .cloned()
                .collect(),
            withdrawn: older
                .payloads
                .difference(&newer.payloads)
                .cloned()
                .collect(),
        }
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn announced(&self) -> &BTreeSet<Payload> {
        &self.announced
    }

    pub fn withdrawn(&self) -> &BTreeSet<Payload> {
        &self.withdrawn
    }
}

/// Net change from a client serial up to `to_serial`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diff {
    pub to_serial: Serial,
    pub announced: BTreeSet<Payload>,
    pub withdrawn: BTreeSet<Payload>,
}

impl Diff {
    pub fn empty(to_serial: Serial) -> Self {
        Self {
            to_serial,
            announced: BTreeSet::new(),
            withdrawn: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.announced.is_empty() && self.withdrawn.is_empty()
    }

    /// Fold the next delta in. An announcement added and later withdrawn
    /// cancels out; one withdrawn and later re-added is left unchanged.
    pub fn push(&mut self, delta: &Delta) {
        for payload in &delta.withdrawn {
            if !self.announced.remove(payload) {
                self.withdrawn.insert(payload.clone());
            }
        }
        for payload in &delta.announced {
            if !self.withdrawn.remove(payload) {
                self.announced.insert(payload.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Asn, Prefix, RouteOrigin};

    fn origin(asn: u32, prefix: &str) -> Payload {
        let prefix: Prefix = prefix.parse().expect("prefix");
        let max_len = prefix.length();
        Payload::RouteOrigin(RouteOrigin::new(Asn(asn), prefix, max_len).expect("origin"))
    }

    #[test]
    fn delta_is_symmetric_difference() {
        let older: Snapshot = [origin(1, "10.0.0.0/8"), origin(2, "10.0.0.0/8")]
            .into_iter()
            .collect();
        let newer: Snapshot = [origin(2, "10.0.0.0/8"), origin(3, "10.0.0.0/8")]
            .into_iter()
            .collect();
        let delta = Delta::between(Serial(2), &older, &newer);
        assert_eq!(delta.serial(), Serial(2));
        assert_eq!(
            delta.announced().iter().collect::<Vec<_>>(),
            vec![&origin(3, "10.0.0.0/8")]
        );
        assert_eq!(
            delta.withdrawn().iter().collect::<Vec<_>>(),
            vec![&origin(1, "10.0.0.0/8")]
        );
    }

    #[test]
    fn announce_then_withdraw_cancels() {
        let a = Snapshot::default();
        let b: Snapshot = [origin(1, "10.0.0.0/8")].into_iter().collect();
        let mut diff = Diff::empty(Serial(3));
        diff.push(&Delta::between(Serial(2), &a, &b));
        diff.push(&Delta::between(Serial(3), &b, &a));
        assert!(diff.is_empty());
    }

    #[test]
    fn withdraw_then_reannounce_is_unchanged() {
        let a: Snapshot = [origin(1, "10.0.0.0/8")].into_iter().collect();
        let b = Snapshot::default();
        let mut diff = Diff::empty(Serial(3));
        diff.push(&Delta::between(Serial(2), &a, &b));
        diff.push(&Delta::between(Serial(3), &b, &a));
        assert!(diff.is_empty());
    }

    #[test]
    fn apply_reproduces_newer_snapshot() {
        let a: Snapshot = [origin(1, "10.0.0.0/8"), origin(2, "192.0.2.0/24")]
            .into_iter()
            .collect();
        let b: Snapshot = [origin(2, "192.0.2.0/24"), origin(3, "2001:db8::/32")]
            .into_iter()
            .collect();
        let mut diff = Diff::empty(Serial(1));
        diff.push(&Delta::between(Serial(1), &a, &b));
        assert_eq!(a.apply(&diff), b);
    }
}
