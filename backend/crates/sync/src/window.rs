//! Window calculation for incremental runs.
//!
//! Pure functions: given the persisted cursor and the current time, decide which
//! `[from, to)` range a run fetches.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The half-open time range `[from, to)` one run attempts to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    pub fn span(&self) -> Duration {
        self.to - self.from
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", format_cursor(self.from), format_cursor(self.to))
    }
}

/// Compute the next window.
///
/// * no cursor (or an unparsable one): `[now - backfill, now)`
/// * cursor `C`: `[C - overlap, max(now, C))`
///
/// The end never falls behind the cursor, so committing `to` cannot move the
/// cursor backwards even when the local clock lags the one that wrote it.
pub fn compute_window(
    cursor_value: Option<&str>,
    now: DateTime<Utc>,
    overlap: Duration,
    backfill: Duration,
) -> SyncWindow {
    match cursor_value.and_then(parse_cursor) {
        Some(cursor) => {
            let to = now.max(cursor);
            let mut from = rewind(cursor, overlap);
            if from >= to {
                // Zero overlap with a cursor equal to now.
                from = rewind(to, Duration::microseconds(1));
            }
            SyncWindow { from, to }
        }
        None => SyncWindow {
            from: rewind(now, backfill),
            to: now,
        },
    }
}

/// `at - by`, saturating at the earliest representable instant.
fn rewind(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(by).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn parse_cursor(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_cursor(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
