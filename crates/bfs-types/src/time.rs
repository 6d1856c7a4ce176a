use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A UTC wall-clock timestamp wrapping `chrono::DateTime<Utc>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcTime {
    inner: DateTime<Utc>,
}

impl UtcTime {
    pub fn now() -> Self {
        Self { inner: Utc::now() }
    }

    pub fn from_chrono(dt: DateTime<Utc>) -> Self {
        Self { inner: dt }
    }

    pub fn as_chrono(&self) -> &DateTime<Utc> {
        &self.inner
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.inner.timestamp_millis()
    }

    /// Time elapsed since this timestamp, saturating at zero for future times.
    pub fn elapsed(&self) -> std::time::Duration {
        (Utc::now() - self.inner).to_std().unwrap_or_default()
    }

    /// Shift the timestamp back by `d`. Used to fabricate stale heartbeats.
    pub fn minus(&self, d: std::time::Duration) -> Self {
        let delta = chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            inner: self.inner - delta,
        }
    }
}

impl fmt::Debug for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UtcTime({})", self.inner.to_rfc3339())
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.to_rfc3339())
    }
}

impl Default for UtcTime {
    fn default() -> Self {
        Self {
            inner: DateTime::<Utc>::default(),
        }
    }
}

impl From<DateTime<Utc>> for UtcTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self { inner: dt }
    }
}
