//! Dashboard counters and event triage derived from raw event lists.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use rakshanet_common::{
    sort_newest_first, DashboardStats, RakshaNetError, SosEvent, SosType, Timestamped,
};
use schemars::JsonSchema;
use serde::Serialize;

/// Events listed in [`DashboardStats::recent_events`].
pub const RECENT_EVENTS: usize = 10;

/// Compute headline counters from an event list.
///
/// Day and month boundaries are UTC. Events without a parseable timestamp
/// are only eligible for the recent list.
pub fn summarize(events: &[SosEvent], now: DateTime<Utc>) -> DashboardStats {
    let today = now.date_naive();
    let today_start = today.and_time(NaiveTime::MIN).and_utc();
    let week_start = today_start - Duration::days(7);
    let month_start = today
        .with_day(1)
        .unwrap_or(today)
        .and_time(NaiveTime::MIN)
        .and_utc();
    let active_since = now - Duration::hours(24);

    let since = |start: DateTime<Utc>| {
        events
            .iter()
            .filter(|e| e.timestamp().is_some_and(|ts| ts >= start))
            .count() as u64
    };

    let active_users: HashSet<&str> = events
        .iter()
        .filter(|e| e.timestamp().is_some_and(|ts| ts >= active_since))
        .filter_map(|e| e.user_id.as_deref())
        .collect();

    let mut recent_events = events.to_vec();
    sort_newest_first(&mut recent_events);
    recent_events.truncate(RECENT_EVENTS);

    DashboardStats {
        today_count: since(today_start),
        week_count: since(week_start),
        month_count: since(month_start),
        active_users_count: active_users.len() as u64,
        recent_events,
    }
}

/// Which SOS types to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    Only(SosType),
}

impl TypeFilter {
    pub fn matches(&self, event: &SosEvent) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(t) => event.sos_type == *t,
        }
    }

    pub fn apply(&self, events: Vec<SosEvent>) -> Vec<SosEvent> {
        match self {
            TypeFilter::All => events,
            TypeFilter::Only(_) => events.into_iter().filter(|e| self.matches(e)).collect(),
        }
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeFilter::All => f.write_str("all"),
            TypeFilter::Only(t) => f.write_str(t.as_str()),
        }
    }
}

impl FromStr for TypeFilter {
    type Err = RakshaNetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        if needle.eq_ignore_ascii_case("all") || needle.is_empty() {
            return Ok(TypeFilter::All);
        }
        SosType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(needle))
            .map(TypeFilter::Only)
            .ok_or_else(|| RakshaNetError::Validation(format!("unknown SOS type '{s}'")))
    }
}

/// Events per SOS type. Every type is present, zero if unseen.
pub fn type_counts(events: &[SosEvent]) -> BTreeMap<SosType, usize> {
    let mut counts: BTreeMap<SosType, usize> = SosType::ALL.iter().map(|t| (*t, 0)).collect();
    for event in events {
        *counts.entry(event.sos_type).or_default() += 1;
    }
    counts
}

/// Urgency by recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    High,
    Medium,
    Low,
}

impl EventPriority {
    /// Under 5 minutes old is high, under 30 medium, everything else
    /// (including an unparseable timestamp) low.
    pub fn of<E: Timestamped>(event: &E, now: DateTime<Utc>) -> Self {
        match event.timestamp() {
            Some(ts) if now - ts < Duration::minutes(5) => EventPriority::High,
            Some(ts) if now - ts < Duration::minutes(30) => EventPriority::Medium,
            _ => EventPriority::Low,
        }
    }
}
