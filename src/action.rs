//! One unit of throttled work and the queue that accumulates accepted units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// A single unit of work: when it happened and how many bytes it carried.
///
/// Records are created at admission-check time with `bytes = 0` for pure
/// rate limiting, or the transfer size for bandwidth limiting. They are
/// immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub bytes: u64,
}

impl ActionRecord {
    /// A zero-byte record, timestamped now.
    pub fn new() -> Self {
        Self::with_bytes(0)
    }

    /// A record of `bytes` bytes, timestamped now.
    pub fn with_bytes(bytes: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            bytes,
        }
    }

    /// A record with an explicit timestamp, useful for pre-seeding windows.
    pub fn at(timestamp: DateTime<Utc>, bytes: u64) -> Self {
        Self { timestamp, bytes }
    }
}

impl Default for ActionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// FIFO queue of [`ActionRecord`]s; insertion order is arrival order.
///
/// The oldest record is always at the front. Sliding windows evict from the
/// front record by record; fixed windows clear the whole queue on rollover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionQueue(VecDeque<ActionRecord>);

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, record: ActionRecord) {
        self.0.push_back(record);
    }

    pub fn dequeue(&mut self) -> Option<ActionRecord> {
        self.0.pop_front()
    }

    /// The oldest record, without dequeuing it.
    pub fn front(&self) -> Option<&ActionRecord> {
        self.0.front()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionRecord> {
        self.0.iter()
    }

    /// Sum of the byte sizes of every record in the queue, saturating.
    /// Refused oversized records stay enqueued, so the raw sum can exceed
    /// `u64::MAX`.
    pub fn total_bytes(&self) -> u64 {
        self.0
            .iter()
            .fold(0, |total, record| total.saturating_add(record.bytes))
    }

    /// True if `additional` more bytes would still fit under `max_bytes`.
    pub fn additional_bytes_allowed(&self, additional: u64, max_bytes: u64) -> bool {
        self.total_bytes()
            .checked_add(additional)
            .is_some_and(|total| total <= max_bytes)
    }

    /// Time between the oldest and newest record; zero when empty.
    pub fn span(&self) -> Duration {
        match (self.0.front(), self.0.back()) {
            (Some(first), Some(last)) => last
                .timestamp
                .signed_duration_since(first.timestamp)
                .to_std()
                .unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

impl FromIterator<ActionRecord> for ActionQueue {
    fn from_iter<I: IntoIterator<Item = ActionRecord>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn total_bytes_sums_all_records() {
        let mut queue = ActionQueue::new();
        queue.enqueue(ActionRecord::with_bytes(100));
        queue.enqueue(ActionRecord::with_bytes(250));
        queue.enqueue(ActionRecord::new());
        assert_eq!(queue.total_bytes(), 350);
    }

    #[test]
    fn span_is_zero_when_empty() {
        assert_eq!(ActionQueue::new().span(), Duration::ZERO);
    }

    #[test]
    fn span_covers_first_to_last() {
        let start = Utc::now();
        let mut queue = ActionQueue::new();
        queue.enqueue(ActionRecord::at(start, 0));
        queue.enqueue(ActionRecord::at(start + ChronoDuration::seconds(2), 0));
        queue.enqueue(ActionRecord::at(start + ChronoDuration::seconds(5), 0));
        assert_eq!(queue.span(), Duration::from_secs(5));
    }

    #[test]
    fn dequeue_is_fifo() {
        let start = Utc::now();
        let mut queue = ActionQueue::new();
        queue.enqueue(ActionRecord::at(start, 1));
        queue.enqueue(ActionRecord::at(start, 2));
        assert_eq!(queue.dequeue().map(|r| r.bytes), Some(1));
        assert_eq!(queue.dequeue().map(|r| r.bytes), Some(2));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn additional_bytes_allowed_respects_ceiling() {
        let mut queue = ActionQueue::new();
        queue.enqueue(ActionRecord::with_bytes(900));
        assert!(queue.additional_bytes_allowed(100, 1000));
        assert!(!queue.additional_bytes_allowed(101, 1000));
    }

    #[test]
    fn byte_totals_saturate_instead_of_overflowing() {
        let mut queue = ActionQueue::new();
        queue.enqueue(ActionRecord::with_bytes(u64::MAX));
        assert!(!queue.additional_bytes_allowed(1, 1000));

        queue.enqueue(ActionRecord::with_bytes(u64::MAX));
        assert_eq!(queue.total_bytes(), u64::MAX);
    }
}
