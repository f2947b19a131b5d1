use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::record::{self, Record, USER_ID_KEYS};
use crate::time::parse_timestamp;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Returns `None` unless both values are finite and inside WGS84 bounds.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

/// Anything that can be placed on the map.
pub trait Geolocated {
    fn coordinates(&self) -> Option<Coordinates>;
}

/// Anything that carries an upstream timestamp string.
pub trait Timestamped {
    fn timestamp_str(&self) -> &str;

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.timestamp_str())
    }
}

/// Newest first. Records with unparseable timestamps go last, in input order.
pub fn sort_newest_first<T: Timestamped>(items: &mut [T]) {
    items.sort_by_cached_key(|item| std::cmp::Reverse(item.timestamp()));
}

// --- Enums ---

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SosType {
    Voice,
    Motion,
    Button,
    Sms,
    Call,
    #[default]
    Unknown,
}

impl SosType {
    pub const ALL: [SosType; 6] = [
        SosType::Voice,
        SosType::Motion,
        SosType::Button,
        SosType::Sms,
        SosType::Call,
        SosType::Unknown,
    ];

    /// Case-insensitive; anything unrecognized is `Unknown`.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "voice" => SosType::Voice,
            "motion" => SosType::Motion,
            "button" => SosType::Button,
            "sms" => SosType::Sms,
            "call" => SosType::Call,
            _ => SosType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SosType::Voice => "voice",
            SosType::Motion => "motion",
            SosType::Button => "button",
            SosType::Sms => "sms",
            SosType::Call => "call",
            SosType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SosType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SosType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|r| SosType::from_raw(&r)).unwrap_or_default())
    }
}

// --- Records ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EmergencyContact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub relationship: String,
}

/// A periodic position report from a field device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub id: String,
    /// Upstream collection or endpoint the sample was read from.
    pub source_name: String,
    pub user_id: String,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: String,
}

impl LocationSample {
    /// Build a sample from a raw upstream record. Returns `None` when the
    /// record has no usable coordinates under either naming convention.
    pub fn from_record(fallback_id: &str, record: &Record, source_name: &str) -> Option<Self> {
        let coords = record::coordinates(record)?;
        Some(Self {
            id: record::string_field(record, &["id"]).unwrap_or_else(|| fallback_id.to_string()),
            source_name: source_name.to_string(),
            user_id: record::string_field(record, USER_ID_KEYS).unwrap_or_default(),
            lat: coords.lat,
            lng: coords.lng,
            timestamp: record::timestamp(record),
        })
    }
}

impl Geolocated for LocationSample {
    fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::new(self.lat, self.lng)
    }
}

impl Timestamped for LocationSample {
    fn timestamp_str(&self) -> &str {
        &self.timestamp
    }
}

/// An emergency trigger raised by a device.
///
/// Deserialization goes through [`SosEvent::from_record`], so both the
/// upstream shapes and this type's own serialized form are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SosEvent {
    pub id: String,
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub sos_type: SosType,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub timestamp: String,
    pub address: Option<String>,
    pub contacts: Vec<EmergencyContact>,
}

impl SosEvent {
    pub fn from_record(fallback_id: &str, record: &Record) -> Self {
        let coords = record::coordinates(record);
        let contacts = ["contacts", "emergencyContacts"]
            .iter()
            .find_map(|key| record.get(*key)?.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: record::string_field(record, &["id"]).unwrap_or_else(|| fallback_id.to_string()),
            user_id: record::string_field(record, USER_ID_KEYS),
            sos_type: record::string_field(record, &["type", "sosType"])
                .map(|raw| SosType::from_raw(&raw))
                .unwrap_or_default(),
            lat: coords.map(|c| c.lat),
            lng: coords.map(|c| c.lng),
            timestamp: record::timestamp(record),
            address: record::string_field(record, &["address"]),
            contacts,
        }
    }
}

impl<'de> Deserialize<'de> for SosEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = Record::deserialize(deserializer)?;
        Ok(SosEvent::from_record("", &record))
    }
}

impl Geolocated for SosEvent {
    fn coordinates(&self) -> Option<Coordinates> {
        Coordinates::new(self.lat?, self.lng?)
    }
}

impl Timestamped for SosEvent {
    fn timestamp_str(&self) -> &str {
        &self.timestamp
    }
}

/// Headline counters for the operator dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(rename = "todaySOSCount", alias = "todayCount", default)]
    pub today_count: u64,
    #[serde(rename = "weekSOSCount", alias = "weekCount", default)]
    pub week_count: u64,
    #[serde(rename = "monthSOSCount", alias = "monthCount", default)]
    pub month_count: u64,
    #[serde(default)]
    pub active_users_count: u64,
    #[serde(default)]
    pub recent_events: Vec<SosEvent>,
}

/// A point on the density map: either a location report or an SOS event.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapPoint {
    Location(LocationSample),
    Sos(SosEvent),
}

impl MapPoint {
    pub fn id(&self) -> &str {
        match self {
            MapPoint::Location(l) => &l.id,
            MapPoint::Sos(e) => &e.id,
        }
    }
}

impl Geolocated for MapPoint {
    fn coordinates(&self) -> Option<Coordinates> {
        match self {
            MapPoint::Location(l) => l.coordinates(),
            MapPoint::Sos(e) => e.coordinates(),
        }
    }
}

impl Timestamped for MapPoint {
    fn timestamp_str(&self) -> &str {
        match self {
            MapPoint::Location(l) => &l.timestamp,
            MapPoint::Sos(e) => &e.timestamp,
        }
    }
}

impl From<LocationSample> for MapPoint {
    fn from(sample: LocationSample) -> Self {
        MapPoint::Location(sample)
    }
}

impl From<SosEvent> for MapPoint {
    fn from(event: SosEvent) -> Self {
        MapPoint::Sos(event)
    }
}
