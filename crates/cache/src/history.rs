//! Serial-numbered version history of published snapshots.
//!
//! The store keeps the current snapshot plus a bounded window of deltas.
//! Each publication builds a new immutable [`StoreView`] and swaps it in,
//! so readers clone an `Arc` and never hold a lock while diffing.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::{RngCore, rngs::OsRng};
use rtr::Serial;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::SerialUnknown;
use crate::snapshot::{Delta, Diff, Snapshot};

const EVENT_CHANNEL_SIZE: usize = 64;

/// Notifications delivered to every subscribed session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    SerialAdvanced { session_id: u16, serial: Serial },
    Reset { session_id: u16, serial: Serial },
}

/// Consistent view of the store at one serial.
#[derive(Debug)]
pub struct StoreView {
    session_id: u16,
    serial: Serial,
    ready: bool,
    snapshot: Arc<Snapshot>,
    deltas: VecDeque<Arc<Delta>>,
}

impl StoreView {
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    /// False until the first snapshot has been published.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// Serial of the oldest client state still reachable by deltas.
    pub fn oldest_serial(&self) -> Option<Serial> {
        self.deltas
            .front()
            .map(|delta| Serial(delta.serial().value().wrapping_sub(1)))
    }

    /// Net change from `serial` (exclusive) to the current serial.
    ///
    /// Fails unless `serial` strictly precedes the current serial and is
    /// no older than the oldest retained delta.
    pub fn diff_from(&self, serial: Serial) -> Result<Diff, SerialUnknown> {
        if !serial.precedes(self.serial) {
            return Err(SerialUnknown(serial));
        }
        let distance = serial.distance_to(self.serial) as usize;
        if distance > self.deltas.len() {
            return Err(SerialUnknown(serial));
        }
        let start = self.deltas.len() - distance;
        let mut diff = Diff::empty(self.serial);
        for delta in self.deltas.range(start..) {
            diff.push(delta);
        }
        Ok(diff)
    }
}

/// Publishes snapshots under increasing serials and answers diff queries.
pub struct SerialStore {
    view: RwLock<Arc<StoreView>>,
    writer: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
    history_depth: usize,
}

impl SerialStore {
    /// Fresh store with a random session id, starting at serial 0.
    pub fn new(history_depth: usize) -> Self {
        Self::with_session(history_depth, random_session_id(), Serial(0))
    }

    /// Store whose first publication will be assigned `serial.next()`.
    pub fn with_session(history_depth: usize, session_id: u16, serial: Serial) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            view: RwLock::new(Arc::new(StoreView {
                session_id,
                serial,
                ready: false,
                snapshot: Arc::new(Snapshot::default()),
                deltas: VecDeque::new(),
            })),
            writer: Mutex::new(()),
            events,
            history_depth,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn view(&self) -> Arc<StoreView> {
        self.view.read().clone()
    }

    pub fn current_serial(&self) -> Serial {
        self.view.read().serial
    }

    pub fn current_session_id(&self) -> u16 {
        self.view.read().session_id
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.view.read().snapshot.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.view.read().ready
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    pub fn diff_from(&self, serial: Serial) -> Result<Diff, SerialUnknown> {
        self.view().diff_from(serial)
    }

    /// Make `snapshot` current under the next serial and return that serial.
    pub fn publish(&self, snapshot: Snapshot) -> Serial {
        let _writer = self.writer.lock();
        let current = self.view();
        let serial = current.serial.next();

        let mut deltas = current.deltas.clone();
        let (announced, withdrawn) = if current.ready {
            let delta = Delta::between(serial, &current.snapshot, &snapshot);
            let counts = (delta.announced().len(), delta.withdrawn().len());
            deltas.push_back(Arc::new(delta));
            while deltas.len() > self.history_depth {
                deltas.pop_front();
            }
            counts
        } else {
            (snapshot.len(), 0)
        };

        let session_id = current.session_id;
        *self.view.write() = Arc::new(StoreView {
            session_id,
            serial,
            ready: true,
            snapshot: Arc::new(snapshot),
            deltas,
        });
        info!(
            session_id,
            %serial,
            announced,
            withdrawn,
            "published serial"
        );
        let _ = self
            .events
            .send(StoreEvent::SerialAdvanced { session_id, serial });
        serial
    }

    /// Drop all history and start a new session. The current serial and
    /// snapshot stay, but no earlier serial can be diffed against anymore.
    pub fn force_reset(&self) -> u16 {
        let _writer = self.writer.lock();
        let current = self.view();
        let mut session_id = random_session_id();
        while session_id == current.session_id {
            session_id = random_session_id();
        }
        let serial = current.serial;
        *self.view.write() = Arc::new(StoreView {
            session_id,
            serial,
            ready: current.ready,
            snapshot: current.snapshot.clone(),
            deltas: VecDeque::new(),
        });
        info!(
            old_session_id = current.session_id,
            session_id,
            %serial,
            "history reset"
        );
        let _ = self.events.send(StoreEvent::Reset { session_id, serial });
        session_id
    }
}

fn random_session_id() -> u16 {
    let session_id = OsRng.next_u32() as u16;
    debug!(session_id, "generated session id");
    session_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Asn, Payload, Prefix, RouteOrigin};

    fn origin(asn: u32, prefix: &str) -> Payload {
        let prefix: Prefix = prefix.parse().expect("prefix");
        let max_len = prefix.length();
        Payload::RouteOrigin(RouteOrigin::new(Asn(asn), prefix, max_len).expect("origin"))
    }

    fn snapshot(payloads: &[Payload]) -> Snapshot {
        payloads.iter().cloned().collect()
    }

    #[test]
    fn not_ready_until_first_publish() {
        let store = SerialStore::with_session(4, 0x1234, Serial(4));
        assert!(!store.is_ready());
        assert_eq!(store.publish(snapshot(&[origin(1, "10.0.0.0/8")])), Serial(5));
        assert!(store.is_ready());
        assert_eq!(store.current_session_id(), 0x1234);
    }

    #[test]
    fn diff_between_consecutive_publications() {
        let store = SerialStore::with_session(4, 1, Serial(0));
        let s1 = snapshot(&[origin(1, "10.0.0.0/8"), origin(2, "192.0.2.0/24")]);
        let s2 = snapshot(&[origin(2, "192.0.2.0/24"), origin(3, "2001:db8::/32")]);
        let first = store.publish(s1);
        let second = store.publish(s2);
        let diff = store.diff_from(first).expect("diff");
        assert_eq!(diff.to_serial, second);
        assert_eq!(diff.announced.len(), 1);
        assert!(diff.announced.contains(&origin(3, "2001:db8::/32")));
        assert_eq!(diff.withdrawn.len(), 1);
        assert!(diff.withdrawn.contains(&origin(1, "10.0.0.0/8")));
    }

    #[test]
    fn current_serial_is_not_diffable() {
        let store = SerialStore::with_session(4, 1, Serial(0));
        let serial = store.publish(snapshot(&[origin(1, "10.0.0.0/8")]));
        assert_eq!(store.diff_from(serial), Err(SerialUnknown(serial)));
        assert_eq!(
            store.diff_from(serial.next()),
            Err(SerialUnknown(serial.next()))
        );
    }

    #[test]
    fn evicts_beyond_history_depth() {
        let store = SerialStore::with_session(2, 1, Serial(0));
        store.publish(snapshot(&[origin(1, "10.0.0.0/8")]));
        store.publish(snapshot(&[origin(2, "10.0.0.0/8")]));
        store.publish(snapshot(&[origin(3, "10.0.0.0/8")]));
        store.publish(snapshot(&[origin(4, "10.0.0.0/8")]));
        assert_eq!(store.current_serial(), Serial(4));
        assert_eq!(store.view().oldest_serial(), Some(Serial(2)));
        assert!(store.diff_from(Serial(2)).is_ok());
        assert_eq!(store.diff_from(Serial(1)), Err(SerialUnknown(Serial(1))));
    }

    #[test]
    fn diffs_across_serial_wraparound() {
        let store = SerialStore::with_session(8, 1, Serial(u32::MAX - 1));
        let before = store.publish(snapshot(&[origin(1, "10.0.0.0/8")]));
        assert_eq!(before, Serial(u32::MAX));
        store.publish(snapshot(&[origin(2, "10.0.0.0/8")]));
        let after = store.publish(snapshot(&[origin(3, "10.0.0.0/8")]));
        assert_eq!(after, Serial(1));
        let diff = store.diff_from(before).expect("diff across wrap");
        assert_eq!(diff.to_serial, Serial(1));
        assert!(diff.announced.contains(&origin(3, "10.0.0.0/8")));
        assert!(diff.withdrawn.contains(&origin(1, "10.0.0.0/8")));
        assert!(!diff.announced.contains(&origin(2, "10.0.0.0/8")));
    }

    #[test]
    fn force_reset_clears_history_and_changes_session() {
        let store = SerialStore::with_session(4, 7, Serial(0));
        let first = store.publish(snapshot(&[origin(1, "10.0.0.0/8")]));
        let current = store.publish(snapshot(&[origin(2, "10.0.0.0/8")]));
        let mut events = store.subscribe();
        let session_id = store.force_reset();
        assert_ne!(session_id, 7);
        assert_eq!(store.current_serial(), current);
        assert_eq!(store.diff_from(first), Err(SerialUnknown(first)));
        assert_eq!(
            events.try_recv().expect("reset event"),
            StoreEvent::Reset {
                session_id,
                serial: current
            }
        );
    }

    #[test]
    fn publish_notifies_subscribers() {
        let store = SerialStore::with_session(4, 9, Serial(10));
        let mut events = store.subscribe();
        store.publish(Snapshot::default());
        assert_eq!(
            events.try_recv().expect("event"),
            StoreEvent::SerialAdvanced {
                session_id: 9,
                serial: Serial(11)
            }
        );
    }
}
