//! Trading session utilities.
//!
//! A session is the span between two daily reset instants at a fixed UTC
//! hour. VWAP accumulators reset whenever the session key of a tick differs
//! from the previous one.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a trading session by the UTC date on which it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(NaiveDate);

impl SessionKey {
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session containing `dt` when sessions roll over at `reset_hour_utc`.
///
/// Hours above 23 are treated as 0.
#[must_use]
pub fn session_key_at(dt: DateTime<Utc>, reset_hour_utc: u32) -> SessionKey {
    let reset = if reset_hour_utc > 23 { 0 } else { reset_hour_utc };
    let date = if dt.hour() < reset {
        (dt - Duration::days(1)).date_naive()
    } else {
        dt.date_naive()
    };
    SessionKey(date)
}
