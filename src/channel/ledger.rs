//! Client-side projection of the notification inbox.
//!
//! Server snapshots replace the projection wholesale. Local "mark read" edits
//! are applied optimistically and stand until the next snapshot, which is the
//! authority. Snapshots that carry a version older than the last applied one
//! are discarded so a delayed frame cannot undo newer state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::channel::proto::{NotificationRecord, NotificationSnapshot};

/// Current contents of the ledger.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LedgerView {
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: u64,
    pub snapshot_received: bool,
    pub version: Option<u64>,
}

impl LedgerView {
    fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|n| !n.read).count() as u64;
    }
}

/// Shared notification ledger. Clones observe and mutate the same state.
#[derive(Clone, Debug)]
pub struct NotificationLedger {
    view: Arc<watch::Sender<LedgerView>>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        let (view, _) = watch::channel(LedgerView::default());
        Self {
            view: Arc::new(view),
        }
    }

    /// Replaces local state with `snapshot`.
    ///
    /// Returns `false` when the snapshot was dropped as out of order.
    pub fn apply_snapshot(&self, snapshot: NotificationSnapshot) -> bool {
        self.view.send_if_modified(|view| {
            if let (Some(incoming), Some(current)) = (snapshot.version, view.version) {
                if incoming < current {
                    debug!(
                        event = "stale_snapshot_dropped",
                        incoming, current, "ignoring out-of-order notification snapshot"
                    );
                    return false;
                }
            }

            view.notifications = snapshot.notifications;
            view.recount();
            if view.unread_count != snapshot.unread_count {
                warn!(
                    event = "unread_count_mismatch",
                    reported = snapshot.unread_count,
                    derived = view.unread_count,
                    "server unread count disagrees with its records"
                );
            }
            view.version = snapshot.version.or(view.version);
            view.snapshot_received = true;
            true
        })
    }

    /// Forgets the last applied version so the next snapshot applies
    /// unconditionally. Called when a new session opens: version counters
    /// only order snapshots within one server session.
    pub fn reset_version(&self) {
        self.view.send_if_modified(|view| {
            view.version = None;
            false
        });
    }

    /// Marks one record read. Returns `true` if the unread count changed.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut changed = false;
        self.view.send_if_modified(|view| {
            if let Some(record) = view
                .notifications
                .iter_mut()
                .find(|record| record.id == id && !record.read)
            {
                record.read = true;
                view.unread_count = view.unread_count.saturating_sub(1);
                changed = true;
            }
            changed
        });
        changed
    }

    /// Marks every record read. Returns how many records changed.
    pub fn mark_all_read(&self) -> usize {
        let mut changed = 0;
        self.view.send_if_modified(|view| {
            for record in view.notifications.iter_mut().filter(|r| !r.read) {
                record.read = true;
                changed += 1;
            }
            let touched = changed > 0 || view.unread_count != 0;
            view.unread_count = 0;
            touched
        });
        changed
    }

    pub fn view(&self) -> LedgerView {
        self.view.borrow().clone()
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.view.borrow().notifications.clone()
    }

    pub fn unread_count(&self) -> u64 {
        self.view.borrow().unread_count
    }

    pub fn has_snapshot(&self) -> bool {
        self.view.borrow().snapshot_received
    }

    /// Receiver that wakes on every ledger change.
    pub fn watch(&self) -> watch::Receiver<LedgerView> {
        self.view.subscribe()
    }
}

impl Default for NotificationLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::proto::NotificationCategory;

    fn record(id: &str, read: bool) -> NotificationRecord {
        NotificationRecord {
            read,
            ..NotificationRecord::unread(id, NotificationCategory::Lead)
        }
    }

    fn snapshot(records: Vec<NotificationRecord>, version: Option<u64>) -> NotificationSnapshot {
        let unread_count = records.iter().filter(|r| !r.read).count() as u64;
        NotificationSnapshot {
            notifications: records,
            unread_count,
            version,
        }
    }

    #[test]
    fn snapshot_replaces_state_wholesale() {
        let ledger = NotificationLedger::new();
        assert!(!ledger.has_snapshot());

        ledger.apply_snapshot(snapshot(vec![record("N1", false), record("N2", false)], None));
        assert_eq!(ledger.unread_count(), 2);

        ledger.apply_snapshot(snapshot(vec![record("N3", true)], None));
        let view = ledger.view();
        assert_eq!(view.notifications.len(), 1);
        assert_eq!(view.notifications[0].id, "N3");
        assert_eq!(view.unread_count, 0);
        assert!(view.snapshot_received);
    }

    #[test]
    fn mark_read_is_idempotent_and_floored() {
        let ledger = NotificationLedger::new();
        ledger.apply_snapshot(snapshot(vec![record("N1", false), record("N2", false)], None));

        assert!(ledger.mark_read("N1"));
        assert_eq!(ledger.unread_count(), 1);
        assert!(!ledger.mark_read("N1"));
        assert_eq!(ledger.unread_count(), 1);
        assert!(!ledger.mark_read("missing"));
        assert_eq!(ledger.unread_count(), 1);

        assert!(ledger.mark_read("N2"));
        assert!(!ledger.mark_read("N2"));
        assert_eq!(ledger.unread_count(), 0);
    }

    #[test]
    fn mark_all_read_zeroes_the_counter() {
        let ledger = NotificationLedger::new();
        ledger.apply_snapshot(snapshot(
            vec![record("N1", false), record("N2", true), record("N3", false)],
            None,
        ));
        assert_eq!(ledger.mark_all_read(), 2);
        assert_eq!(ledger.unread_count(), 0);
        assert!(ledger.notifications().iter().all(|r| r.read));
        assert_eq!(ledger.mark_all_read(), 0);
    }

    #[test]
    fn snapshot_overrides_optimistic_edit() {
        let ledger = NotificationLedger::new();
        ledger.apply_snapshot(snapshot(vec![record("N1", false)], None));
        ledger.mark_read("N1");
        assert_eq!(ledger.unread_count(), 0);

        ledger.apply_snapshot(snapshot(vec![record("N1", false)], None));
        assert_eq!(ledger.unread_count(), 1);
        assert!(!ledger.notifications()[0].read);
    }

    #[test]
    fn older_versioned_snapshot_is_dropped() {
        let ledger = NotificationLedger::new();
        assert!(ledger.apply_snapshot(snapshot(vec![record("N1", false)], Some(5))));
        ledger.mark_read("N1");

        assert!(!ledger.apply_snapshot(snapshot(vec![record("N1", false)], Some(4))));
        assert_eq!(ledger.unread_count(), 0);
        assert_eq!(ledger.view().version, Some(5));

        assert!(ledger.apply_snapshot(snapshot(vec![record("N1", true)], Some(6))));
        assert_eq!(ledger.view().version, Some(6));
    }

    #[test]
    fn reset_version_lets_a_lower_version_apply() {
        let ledger = NotificationLedger::new();
        assert!(ledger.apply_snapshot(snapshot(vec![record("OLD", false)], Some(42))));
        let mut rx = ledger.watch();
        rx.mark_unchanged();

        ledger.reset_version();
        assert!(!rx.has_changed().expect("sender alive"));
        assert_eq!(ledger.notifications()[0].id, "OLD");

        assert!(ledger.apply_snapshot(snapshot(vec![record("NEW", false)], Some(1))));
        assert_eq!(ledger.notifications()[0].id, "NEW");
        assert_eq!(ledger.view().version, Some(1));
    }

    #[test]
    fn unread_count_is_derived_from_records() {
        let ledger = NotificationLedger::new();
        ledger.apply_snapshot(NotificationSnapshot {
            notifications: vec![record("N1", false)],
            unread_count: 7,
            version: None,
        });
        assert_eq!(ledger.unread_count(), 1);
    }

    #[tokio::test]
    async fn watchers_see_optimistic_edits() {
        let ledger = NotificationLedger::new();
        let mut rx = ledger.watch();
        ledger.apply_snapshot(snapshot(vec![record("N1", false)], None));
        rx.changed().await.expect("snapshot change");
        let _ = rx.borrow_and_update();

        ledger.mark_read("N1");
        rx.changed().await.expect("edit change");
        assert_eq!(rx.borrow().unread_count, 0);
    }
}
