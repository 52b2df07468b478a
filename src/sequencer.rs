//! Deduplication and page/sequence numbering of detail records.

use crate::record::{FieldValue, LogicalRecord};
use std::collections::HashSet;
use std::hash::Hash;

/// Highest sequence number on one page.
pub const MAX_SEQUENCE: u64 = 99;

/// Field names the sequencer reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceFields {
    /// Grouping key, a new group always opens a new page
    pub group: &'static str,
    /// Ordering inside a group
    pub order: &'static str,
    pub page: &'static str,
    pub sequence: &'static str,
}

/// Keeps the first item for each key, preserving input order.
pub fn deduplicate<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}

/// Sorts records by (group, order) and assigns page and sequence numbers.
///
/// The first record, every group change and every 100th record of a group
/// open a new page with sequence 1. Returns the number of pages used.
/// Re-running on already sequenced records yields the same numbers.
pub fn assign_sequence(records: &mut [LogicalRecord], fields: SequenceFields) -> u64 {
    records.sort_by(|a, b| {
        (a.value(fields.group), a.value(fields.order))
            .cmp(&(b.value(fields.group), b.value(fields.order)))
    });

    let mut page = 0;
    let mut sequence = 0;
    let mut previous_group: Option<FieldValue> = None;

    for record in records.iter_mut() {
        let group = record.value(fields.group).clone();
        if previous_group.as_ref() != Some(&group) {
            page += 1;
            sequence = 1;
            previous_group = Some(group);
        } else {
            sequence += 1;
            if sequence > MAX_SEQUENCE {
                page += 1;
                sequence = 1;
            }
        }
        record.set(fields.page, page);
        record.set(fields.sequence, sequence);
    }

    page
}
