use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rakshanet_common::{RakshaNetError, Timestamped};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named look-back window, always relative to the current instant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum TimeWindow {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

impl TimeWindow {
    pub const WINDOWS: [TimeWindow; 8] = [
        TimeWindow::All,
        TimeWindow::Hour,
        TimeWindow::SixHours,
        TimeWindow::Day,
        TimeWindow::Week,
        TimeWindow::Month,
        TimeWindow::Quarter,
        TimeWindow::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::All => "all",
            TimeWindow::Hour => "1h",
            TimeWindow::SixHours => "6h",
            TimeWindow::Day => "24h",
            TimeWindow::Week => "7d",
            TimeWindow::Month => "30d",
            TimeWindow::Quarter => "90d",
            TimeWindow::Year => "1y",
        }
    }

    /// `None` for [`TimeWindow::All`]. A year is 365 days.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            TimeWindow::All => None,
            TimeWindow::Hour => Some(Duration::hours(1)),
            TimeWindow::SixHours => Some(Duration::hours(6)),
            TimeWindow::Day => Some(Duration::hours(24)),
            TimeWindow::Week => Some(Duration::days(7)),
            TimeWindow::Month => Some(Duration::days(30)),
            TimeWindow::Quarter => Some(Duration::days(90)),
            TimeWindow::Year => Some(Duration::days(365)),
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration().map(|d| now - d)
    }

    /// Whether the instant lies inside the window. `All` admits everything,
    /// including a missing timestamp.
    pub fn contains(&self, ts: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self.cutoff(now) {
            None => true,
            Some(cutoff) => ts.is_some_and(|ts| ts >= cutoff),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = RakshaNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::WINDOWS
            .into_iter()
            .find(|w| w.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                RakshaNetError::Validation(format!(
                    "unknown time window '{s}' (expected one of all, 1h, 6h, 24h, 7d, 30d, 90d, 1y)"
                ))
            })
    }
}

/// Keep the items whose timestamp is at or after `now - window`.
///
/// Items with unparseable timestamps are excluded from every bounded window.
/// Input order is preserved.
pub fn filter_by_window<E: Timestamped>(
    events: Vec<E>,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Vec<E> {
    if window == TimeWindow::All {
        return events;
    }
    events
        .into_iter()
        .filter(|e| window.contains(e.timestamp(), now))
        .collect()
}
