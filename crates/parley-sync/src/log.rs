use chrono::{DateTime, Utc};
use parley_core::{MessageAuthor, MessageRecord};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Local(u64),
    Server(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub key: EntryKey,
    pub origin: MessageOrigin,
    pub author: MessageAuthor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub delivery: Delivery,
}

/// Ordered conversation transcript. Optimistic sends enter as pending local
/// entries and are later swapped in place for their server records; remote
/// messages are deduplicated by server id. Confirmed entries are never
/// removed or reordered except by a full snapshot replacement.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    server_ids: HashSet<u64>,
    next_local_id: u64,
}

impl MessageLog {
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append_optimistic(&mut self, content: &str, now: DateTime<Utc>) -> u64 {
        self.next_local_id += 1;
        let local_id = self.next_local_id;
        self.entries.push(LogEntry {
            key: EntryKey::Local(local_id),
            origin: MessageOrigin::Local,
            author: MessageAuthor::User,
            content: content.to_string(),
            timestamp: now,
            delivery: Delivery::Pending,
        });
        local_id
    }

    /// Swaps the optimistic entry for its confirmed server record, keeping
    /// its position. Returns false when the entry is gone, which happens
    /// after a snapshot replacement or a conversation reset.
    pub fn reconcile(&mut self, local_id: u64, record: &MessageRecord) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.key == EntryKey::Local(local_id))
        else {
            return false;
        };
        entry.key = EntryKey::Server(record.id);
        entry.author = record.author;
        entry.content = record.content.clone();
        entry.timestamp = record.timestamp;
        entry.delivery = Delivery::Confirmed;
        self.server_ids.insert(record.id);
        true
    }

    /// Appends a server-authored record. Returns false for a server id the
    /// log already holds.
    pub fn append_remote(&mut self, record: &MessageRecord) -> bool {
        if !self.server_ids.insert(record.id) {
            return false;
        }
        self.entries.push(LogEntry {
            key: EntryKey::Server(record.id),
            origin: MessageOrigin::Remote,
            author: record.author,
            content: record.content.clone(),
            timestamp: record.timestamp,
            delivery: Delivery::Confirmed,
        });
        true
    }

    /// Replaces the whole transcript with an authoritative snapshot,
    /// dropping any pending or failed local entries.
    pub fn replace_all(&mut self, records: &[MessageRecord]) {
        self.entries.clear();
        self.server_ids.clear();
        for record in records {
            self.append_remote(record);
        }
    }

    pub fn mark_failed(&mut self, local_id: u64) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.key == EntryKey::Local(local_id))
        else {
            return false;
        };
        if entry.delivery != Delivery::Pending {
            return false;
        }
        entry.delivery = Delivery::Failed;
        true
    }

    /// Empties the transcript. The local id sequence keeps counting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.server_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2026-08-20T09:30:00Z".parse().expect("timestamp")
    }

    fn record(id: u64, author: MessageAuthor, content: &str) -> MessageRecord {
        MessageRecord {
            id,
            author,
            content: content.to_string(),
            timestamp: ts(),
        }
    }

    #[test]
    fn optimistic_appends_assign_sequential_local_ids() {
        let mut log = MessageLog::default();
        assert_eq!(log.append_optimistic("one", ts()), 1);
        assert_eq!(log.append_optimistic("two", ts()), 2);
        assert_eq!(log.append_optimistic("three", ts()), 3);
        assert!(log
            .entries()
            .iter()
            .all(|entry| entry.delivery == Delivery::Pending
                && entry.author == MessageAuthor::User
                && entry.origin == MessageOrigin::Local));
    }

    #[test]
    fn reconcile_replaces_pending_entry_in_place() {
        let mut log = MessageLog::default();
        log.append_remote(&record(10, MessageAuthor::Agent, "earlier"));
        let local_id = log.append_optimistic("hi there", ts());
        log.append_remote(&record(11, MessageAuthor::Agent, "later"));

        let confirmed = record(42, MessageAuthor::User, "hi there");
        assert!(log.reconcile(local_id, &confirmed));

        assert_eq!(log.len(), 3);
        let entry = &log.entries()[1];
        assert_eq!(entry.key, EntryKey::Server(42));
        assert_eq!(entry.delivery, Delivery::Confirmed);
        assert_eq!(entry.origin, MessageOrigin::Local);
        assert_eq!(entry.content, "hi there");
    }

    #[test]
    fn reconcile_of_vanished_entry_is_silent() {
        let mut log = MessageLog::default();
        let local_id = log.append_optimistic("hello", ts());
        log.replace_all(&[record(1, MessageAuthor::Agent, "fresh history")]);

        assert!(!log.reconcile(local_id, &record(42, MessageAuthor::User, "hello")));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].key, EntryKey::Server(1));
    }

    #[test]
    fn late_reconcile_upgrades_failed_entry() {
        let mut log = MessageLog::default();
        let local_id = log.append_optimistic("retry me", ts());
        assert!(log.mark_failed(local_id));

        assert!(log.reconcile(local_id, &record(7, MessageAuthor::User, "retry me")));
        assert_eq!(log.entries()[0].delivery, Delivery::Confirmed);
        assert_eq!(log.entries()[0].key, EntryKey::Server(7));
    }

    #[test]
    fn remote_appends_dedupe_by_server_id() {
        let mut log = MessageLog::default();
        assert!(log.append_remote(&record(5, MessageAuthor::Agent, "once")));
        assert!(!log.append_remote(&record(5, MessageAuthor::Agent, "once")));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn reconciled_id_blocks_remote_duplicate() {
        let mut log = MessageLog::default();
        let local_id = log.append_optimistic("hi", ts());
        log.reconcile(local_id, &record(42, MessageAuthor::User, "hi"));

        assert!(!log.append_remote(&record(42, MessageAuthor::User, "hi")));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn snapshot_replacement_resets_contents_and_dedupe() {
        let mut log = MessageLog::default();
        log.append_optimistic("pending", ts());
        log.append_remote(&record(1, MessageAuthor::Agent, "old"));

        log.replace_all(&[
            record(2, MessageAuthor::User, "kept"),
            record(3, MessageAuthor::Agent, "kept too"),
            record(2, MessageAuthor::User, "duplicate in snapshot"),
        ]);

        assert_eq!(log.len(), 2);
        assert!(!log.append_remote(&record(3, MessageAuthor::Agent, "kept too")));
        assert!(log.append_remote(&record(1, MessageAuthor::Agent, "old id usable again")));
    }

    #[test]
    fn mark_failed_only_downgrades_pending_entries() {
        let mut log = MessageLog::default();
        let first = log.append_optimistic("first", ts());
        let second = log.append_optimistic("second", ts());
        log.reconcile(second, &record(9, MessageAuthor::User, "second"));

        assert!(log.mark_failed(first));
        assert!(!log.mark_failed(first));
        assert!(!log.mark_failed(second));
        assert_eq!(log.entries()[0].delivery, Delivery::Failed);
        assert_eq!(log.entries()[1].delivery, Delivery::Confirmed);
    }

    #[test]
    fn clear_keeps_the_local_id_sequence() {
        let mut log = MessageLog::default();
        assert_eq!(log.append_optimistic("before", ts()), 1);
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.append_optimistic("after", ts()), 2);
    }
}
