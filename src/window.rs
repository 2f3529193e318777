//! Window admission state machines.
//!
//! A [`Window`] accumulates the actions that were accepted for one key and
//! decides whether further work fits under the configured limit. Four
//! behaviours exist, the cross product of [`WindowKind`] (fixed epoch vs
//! continuously sliding) and [`LimiterKind`] (count of actions vs total
//! bytes). Windows serialize to a portable JSON record so they can live in
//! a shared store and be picked up by other process instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::action::{ActionQueue, ActionRecord};
use crate::error::{Result, ThrottlrError};
use crate::rules::Rule;

/// What a window counts against its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimiterKind {
    /// Counts actions; byte sizes are ignored.
    RateLimiter,
    /// Counts the cumulative byte size of actions.
    BandwidthLimiter,
}

/// How a window forgets old actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowKind {
    /// Clears the whole accumulator once the epoch elapses.
    Fixed,
    /// Continuously evicts records older than the time window.
    Sliding,
}

/// Admission-control state for one lookup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub throttler_name: String,
    pub limiter_kind: LimiterKind,
    pub window_kind: WindowKind,
    /// Action count ceiling for rate limiting, byte ceiling for bandwidth
    /// limiting.
    pub max_actions: u64,
    #[serde(with = "humantime_serde")]
    pub time_window: Duration,
    pub allowed_actions: ActionQueue,
    /// Epoch start; present only for fixed windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
}

impl Window {
    pub fn new(
        throttler_name: impl Into<String>,
        limiter_kind: LimiterKind,
        window_kind: WindowKind,
        max_actions: u64,
        time_window: Duration,
    ) -> Self {
        let window_start = match window_kind {
            WindowKind::Fixed => Some(Utc::now()),
            WindowKind::Sliding => None,
        };
        Self {
            throttler_name: throttler_name.into(),
            limiter_kind,
            window_kind,
            max_actions,
            time_window,
            allowed_actions: ActionQueue::new(),
            window_start,
        }
    }

    /// Decides whether `record` is admitted, mutating the window in place.
    ///
    /// A supplied rule overwrites `time_window` and `max_actions` on the
    /// window before evaluation. The override persists with the window, so
    /// the last evaluated rule keeps governing subsequent checks until a
    /// different rule (or none) is matched on a later call.
    pub fn is_allowed(&mut self, record: ActionRecord, rule: Option<&Rule>) -> bool {
        if let Some(rule) = rule {
            self.time_window = rule.time_window_override;
            self.max_actions = rule.max_override;
        }

        let now = Utc::now();

        match (self.window_kind, self.limiter_kind) {
            (WindowKind::Fixed, LimiterKind::RateLimiter) => self.admit_fixed_count(record, now),
            (WindowKind::Sliding, LimiterKind::RateLimiter) => {
                self.admit_sliding_count(record, now)
            }
            (WindowKind::Fixed, LimiterKind::BandwidthLimiter) => {
                self.admit_fixed_bytes(record, now)
            }
            (WindowKind::Sliding, LimiterKind::BandwidthLimiter) => {
                self.admit_sliding_bytes(record, now)
            }
        }
    }

    fn admit_fixed_count(&mut self, record: ActionRecord, now: DateTime<Utc>) -> bool {
        self.roll_over_if_elapsed(now);

        if (self.allowed_actions.len() as u64) < self.max_actions {
            self.allowed_actions.enqueue(record);
            return true;
        }

        false
    }

    fn admit_sliding_count(&mut self, record: ActionRecord, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);

        if (self.allowed_actions.len() as u64) < self.max_actions {
            self.slide_count(record);
            return true;
        }

        false
    }

    fn admit_fixed_bytes(&mut self, record: ActionRecord, now: DateTime<Utc>) -> bool {
        self.roll_over_if_elapsed(now);

        // A single action bigger than the whole ceiling still counts against
        // future capacity, but is itself refused.
        if record.bytes > self.max_actions {
            self.allowed_actions.enqueue(record);
            return false;
        }

        if self
            .allowed_actions
            .additional_bytes_allowed(record.bytes, self.max_actions)
        {
            self.allowed_actions.enqueue(record);
            return true;
        }

        false
    }

    fn admit_sliding_bytes(&mut self, record: ActionRecord, now: DateTime<Utc>) -> bool {
        self.evict_expired(now);

        // Same oversized-single-action handling as the fixed variant.
        if record.bytes > self.max_actions {
            self.slide_bytes(record);
            return false;
        }

        if self.allowed_actions.total_bytes() < self.max_actions {
            self.slide_bytes(record);
            return true;
        }

        false
    }

    /// Hard rollover for fixed windows: once the epoch has elapsed the whole
    /// accumulator is discarded, with no partial carry-over.
    fn roll_over_if_elapsed(&mut self, now: DateTime<Utc>) {
        let start = *self.window_start.get_or_insert(now);
        if exceeds(now, start, self.time_window) {
            self.window_start = Some(now);
            self.allowed_actions.clear();
        }
    }

    /// Sliding eviction: drop records older than the time window from the
    /// front of the queue.
    fn evict_expired(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.allowed_actions.front() {
            if exceeds(now, front.timestamp, self.time_window) {
                self.allowed_actions.dequeue();
            } else {
                break;
            }
        }
    }

    fn slide_count(&mut self, record: ActionRecord) {
        if self.allowed_actions.len() as u64 >= self.max_actions {
            self.allowed_actions.dequeue();
        }
        self.allowed_actions.enqueue(record);
    }

    fn slide_bytes(&mut self, record: ActionRecord) {
        if self.allowed_actions.total_bytes() >= self.max_actions {
            self.allowed_actions.dequeue();
        }
        self.allowed_actions.enqueue(record);
    }

    /// The configured ceiling, for `X-RateLimit-Limit`-style reporting.
    pub fn limit(&self) -> u64 {
        self.max_actions
    }

    /// Capacity left under the ceiling. Byte windows clamp at zero; count
    /// windows report the raw difference.
    pub fn remaining(&self) -> i64 {
        match self.limiter_kind {
            LimiterKind::RateLimiter => {
                self.max_actions as i64 - self.allowed_actions.len() as i64
            }
            LimiterKind::BandwidthLimiter => self
                .max_actions
                .saturating_sub(self.allowed_actions.total_bytes())
                as i64,
        }
    }

    /// Seconds until the oldest record ages out. The full window when the
    /// queue is empty; may be negative once already expired, so callers
    /// should clamp.
    pub fn reset(&self) -> i64 {
        match self.allowed_actions.front() {
            None => self.time_window.as_secs() as i64,
            Some(oldest) => {
                let elapsed = Utc::now()
                    .signed_duration_since(oldest.timestamp)
                    .num_seconds();
                self.time_window.as_secs() as i64 - elapsed
            }
        }
    }

    /// True if this window was produced by the given running configuration.
    ///
    /// A stored window whose ceiling, time window, or owning throttler name
    /// differs from the current configuration is stale and must be
    /// discarded, not upgraded in place.
    pub fn matches_configuration(
        &self,
        throttler_name: &str,
        max_actions: u64,
        time_window: Duration,
    ) -> bool {
        self.max_actions == max_actions
            && self.time_window == time_window
            && self.throttler_name == throttler_name
    }

    /// Canonical JSON encoding, round-trippable via [`Window::decode`].
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a window previously produced by [`Window::encode`].
    ///
    /// Empty or malformed payloads are errors; a silently defaulted window
    /// would grant fresh capacity.
    pub fn decode(payload: &str) -> Result<Window> {
        if payload.trim().is_empty() {
            return Err(ThrottlrError::EmptyWindowPayload);
        }
        Ok(serde_json::from_str(payload)?)
    }
}

/// True once more than `window` has passed between `from` and `now`.
fn exceeds(now: DateTime<Utc>, from: DateTime<Utc>, window: Duration) -> bool {
    let delta = chrono::Duration::from_std(window)
        .unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX));
    now.signed_duration_since(from) > delta
}
