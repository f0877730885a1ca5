//! Core domain types for machsight
//!
//! These types are the client-side view of the monitoring backend's data:
//! machines, sensor measurements, machine events, chat exchanges, analysis
//! results, and the backend's own health report.
//!
//! All wire timestamps are ISO-8601 strings. The backend is not strict about
//! timezones (it emits naive local timestamps), so parsing is lenient: RFC 3339
//! first, then a naive timestamp assumed to be UTC, and the Unix epoch as the
//! last resort so a single bad record never poisons a whole response.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Parse an ISO-8601-ish timestamp leniently.
///
/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]`, and the SQLite-style
/// space-separated variant. Anything else maps to the Unix epoch, which sorts
/// to the old end of every timestamp-ordered bucket.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return ts.with_timezone(&Utc);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return naive.and_utc();
        }
    }
    DateTime::UNIX_EPOCH
}

pub(crate) fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(parse_timestamp(&s))
}

pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

// ============================================
// Machines
// ============================================

/// A monitored machine as reported by the backend.
///
/// Immutable once fetched; a full machine-list refresh replaces the cached set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    /// Backend-assigned identifier
    pub id: i64,
    /// Display name ("CNC-1")
    pub name: String,
    /// Machine category ("cnc_mill", "robot_arm", ...)
    #[serde(rename = "type")]
    pub machine_type: String,
    /// Physical location, if recorded
    #[serde(default)]
    pub location: Option<String>,
    /// When the machine was registered (epoch if the backend omits it)
    #[serde(default = "epoch", deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
}

// ============================================
// Measurements
// ============================================

/// A single numeric telemetry sample from one of a machine's sensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub id: i64,
    pub machine_id: i64,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Sensor kind ("temperature", "vibration", ...)
    pub sensor_type: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

// ============================================
// Events
// ============================================

/// Severity of a machine event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum EventLevel {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl EventLevel {
    /// Parse a level string. Case-insensitive; unknown strings are `Info`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "WARNING" => EventLevel::Warning,
            "ERROR" => EventLevel::Error,
            "CRITICAL" => EventLevel::Critical,
            _ => EventLevel::Info,
        }
    }

    /// Wire/display form of this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "INFO",
            EventLevel::Warning => "WARNING",
            EventLevel::Error => "ERROR",
            EventLevel::Critical => "CRITICAL",
        }
    }

    /// Error and Critical are counted together for alerting.
    pub fn is_alerting(&self) -> bool {
        matches!(self, EventLevel::Error | EventLevel::Critical)
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EventLevel::parse(&s))
    }
}

/// A discrete event (warning, fault, state change) attached to a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineEvent {
    pub id: i64,
    pub machine_id: i64,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

// ============================================
// Chat
// ============================================

/// Author of a chat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
            ChatRole::System => "System",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in the append-only chat log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Document references cited by the assistant
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ChatMessage {
    /// A user-authored entry stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            sources: Vec::new(),
        }
    }
}

// ============================================
// Analysis
// ============================================

/// Result of an on-demand anomaly analysis. Only the latest is retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub machine_id: i64,
    pub anomalies_detected: i64,
    pub summary: String,
    /// Per-anomaly detail objects, passed through unmodified
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
    #[serde(default = "epoch", deserialize_with = "de_timestamp")]
    pub timestamp: DateTime<Utc>,
}

// ============================================
// Health
// ============================================

/// The backend's self-reported health. Only the latest is retained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub timestamp: DateTime<Utc>,
    /// Row counts per backend table
    pub db_stats: HashMap<String, i64>,
}

// ============================================
// Reports
// ============================================

/// A stored report row from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    #[serde(default)]
    pub machine_id: Option<i64>,
    #[serde(default)]
    pub report_type: String,
    #[serde(default)]
    pub report_text: String,
    #[serde(default = "epoch", deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
}
