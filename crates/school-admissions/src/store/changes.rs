use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 64;

/// Backend tables whose row changes are announced on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Schools,
    Profiles,
    Applications,
}

impl ChangeTable {
    /// Whether a row change in this table can move an owner's verification status.
    pub const fn affects_school_status(self) -> bool {
        matches!(self, ChangeTable::Schools | ChangeTable::Profiles)
    }
}

/// A single row change. `sequence` is assigned by the bus and strictly increases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub sequence: u64,
    pub table: ChangeTable,
    pub record_id: String,
}

/// Fan-out of push notifications from the backend's change feed.
///
/// Publishers must call [`ChangeBus::publish`] only after the write it describes is
/// visible to readers: a reader that samples [`ChangeBus::latest_sequence`] before
/// querying is guaranteed to observe every change up to that sequence.
#[derive(Clone)]
pub struct ChangeBus {
    inner: Arc<ChangeBusInner>,
}

struct ChangeBusInner {
    sender: broadcast::Sender<ChangeEvent>,
    sequence: AtomicU64,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(ChangeBusInner {
                sender,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn publish(&self, table: ChangeTable, record_id: impl Into<String>) -> ChangeEvent {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let event = ChangeEvent {
            sequence,
            table,
            record_id: record_id.into(),
        };

        // No subscribers is not an error: nobody is watching yet.
        let receivers = self.inner.sender.send(event.clone()).unwrap_or(0);
        debug!(sequence, ?table, receivers, "change published");
        event
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.sender.subscribe()
    }

    pub fn latest_sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequences_increase_per_publish() {
        let bus = ChangeBus::default();
        let mut rx = bus.subscribe();

        let first = bus.publish(ChangeTable::Schools, "s1");
        let second = bus.publish(ChangeTable::Applications, "a1");

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(bus.latest_sequence(), 2);
        assert_eq!(rx.recv().await.expect("first event"), first);
        assert_eq!(rx.recv().await.expect("second event"), second);
    }

    #[test]
    fn publishing_without_subscribers_still_advances() {
        let bus = ChangeBus::new(4);
        bus.publish(ChangeTable::Profiles, "u1");
        assert_eq!(bus.latest_sequence(), 1);
    }

    #[test]
    fn only_school_and_profile_rows_affect_status() {
        assert!(ChangeTable::Schools.affects_school_status());
        assert!(ChangeTable::Profiles.affects_school_status());
        assert!(!ChangeTable::Applications.affects_school_status());
    }
}
