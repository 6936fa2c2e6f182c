//! Refresh decisions and requeue scheduling
//!
//! The decision uses a double buffer while the advertised next check uses a
//! single one, so one missed wake-up still refreshes before expiry.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Safety margin subtracted from an expiration to trigger early refresh
pub const REFRESH_BUFFER_SECS: i64 = 60;

/// Requeue delay when a definition has nothing to watch over
pub const IDLE_REQUEUE: Duration = Duration::from_secs(3600);

/// Shortest requeue delay handed back to the controller
pub const MIN_REQUEUE: Duration = Duration::from_secs(1);

fn buffer() -> TimeDelta {
    TimeDelta::seconds(REFRESH_BUFFER_SECS)
}

/// What to do about one target's credentials
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Credentials are good; look again at `next_check`
    Fresh {
        /// When the target should next be evaluated
        next_check: DateTime<Utc>,
    },
    /// Credentials are missing, expired or about to expire
    NeedsRefresh,
}

/// Decide whether a target with last-known expiration `expiration` needs new
/// credentials at `now`
pub fn evaluate(expiration: Option<DateTime<Utc>>, now: DateTime<Utc>) -> RefreshDecision {
    match expiration {
        Some(e) if now <= e - buffer() * 2 => RefreshDecision::Fresh {
            next_check: next_check(e),
        },
        _ => RefreshDecision::NeedsRefresh,
    }
}

/// When a target whose credentials expire at `expiration` should be checked again
pub fn next_check(expiration: DateTime<Utc>) -> DateTime<Utc> {
    expiration - buffer()
}

/// Tracks the earliest next check across all targets of one definition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequeueSchedule {
    earliest: Option<DateTime<Utc>>,
}

impl RequeueSchedule {
    /// Record a target's next check
    pub fn observe(&mut self, at: DateTime<Utc>) {
        self.earliest = Some(match self.earliest {
            Some(current) => current.min(at),
            None => at,
        });
    }

    /// Earliest next check recorded so far
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.earliest
    }

    /// Delay from `now` until the next pass
    pub fn requeue_after(&self, now: DateTime<Utc>) -> Duration {
        match self.earliest {
            None => IDLE_REQUEUE,
            Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO).max(MIN_REQUEUE),
        }
    }
}
