/// Shared liveness state: the timestamp of the last heartbeat and the
/// staleness threshold it is judged against.
///
/// Written by the reporter task, read by the exporter. A single atomic is
/// enough since there is exactly one writer.
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Sentinel for "no heartbeat recorded yet".
const NEVER: i64 = 0;

/// Serializable view of the liveness state, served by the exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub alive: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub age_ms: Option<i64>,
    pub stale_after_ms: u64,
}

#[derive(Debug)]
pub struct Status {
    last_update_ms: AtomicI64,
    stale_after: Duration,
}

impl Status {
    /// Create a status that has never been updated.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            last_update_ms: AtomicI64::new(NEVER),
            stale_after,
        }
    }

    /// Record a heartbeat taken at `timestamp_ms` (Unix milliseconds).
    pub fn record(&self, timestamp_ms: i64) {
        self.last_update_ms.store(timestamp_ms, Ordering::Release);
    }

    /// Last recorded heartbeat in Unix milliseconds, or `None` if none yet.
    pub fn last_update(&self) -> Option<i64> {
        match self.last_update_ms.load(Ordering::Acquire) {
            NEVER => None,
            ts => Some(ts),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive_at(now_ms())
    }

    /// `now_ms - last_update < stale_after`. Never alive before the first record.
    pub fn is_alive_at(&self, now_ms: i64) -> bool {
        match self.last_update() {
            Some(last) => {
                let age = i128::from(now_ms) - i128::from(last);
                age < self.stale_after.as_millis() as i128
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot_at(now_ms())
    }

    pub fn snapshot_at(&self, now_ms: i64) -> StatusSnapshot {
        let last = self.last_update();
        StatusSnapshot {
            alive: self.is_alive_at(now_ms),
            last_update: last.and_then(|ts| Utc.timestamp_millis_opt(ts).single()),
            age_ms: last.map(|ts| now_ms.saturating_sub(ts)),
            stale_after_ms: self.stale_after.as_millis() as u64,
        }
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
