//! Server-side notification inbox.

use std::collections::VecDeque;

use crate::channel::proto::{NotificationRecord, NotificationSnapshot};

/// Bounded, versioned list of notifications, newest first.
///
/// Every mutation that changes a record bumps the version, so clients can
/// discard snapshots that arrive out of order.
#[derive(Debug)]
pub struct NotificationInbox {
    records: VecDeque<NotificationRecord>,
    capacity: usize,
    version: u64,
}

impl NotificationInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            version: 0,
        }
    }

    /// Adds `record` at the front, replacing any record with the same id.
    pub fn push(&mut self, record: NotificationRecord) {
        self.records.retain(|existing| existing.id != record.id);
        self.records.push_front(record);
        self.records.truncate(self.capacity);
        self.version += 1;
    }

    /// Returns `true` if an unread record was marked read.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(record) = self
            .records
            .iter_mut()
            .find(|record| record.id == id && !record.read)
        else {
            return false;
        };
        record.read = true;
        self.version += 1;
        true
    }

    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for record in self.records.iter_mut().filter(|record| !record.read) {
            record.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.version += 1;
        }
        changed
    }

    pub fn unread_count(&self) -> u64 {
        self.records.iter().filter(|record| !record.read).count() as u64
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            notifications: self.records.iter().cloned().collect(),
            unread_count: self.unread_count(),
            version: Some(self.version),
        }
    }
}
