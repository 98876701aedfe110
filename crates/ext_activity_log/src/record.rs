//! Activity records as observed from other extensions.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of activity reported by the host instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    ApiCall,
    ApiEvent,
    ContentScript,
    UserScript,
}

impl ActivityType {
    pub const ALL: [ActivityType; 4] = [
        ActivityType::ApiCall,
        ActivityType::ApiEvent,
        ActivityType::ContentScript,
        ActivityType::UserScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiCall => "api_call",
            Self::ApiEvent => "api_event",
            Self::ContentScript => "content_script",
            Self::UserScript => "user_script",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown activity type: {s}"))
    }
}

/// Extension context an activity originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewType {
    Background,
    Popup,
    Sidebar,
    Tab,
    DevtoolsPage,
    DevtoolsPanel,
}

impl ViewType {
    pub const ALL: [ViewType; 6] = [
        ViewType::Background,
        ViewType::Popup,
        ViewType::Sidebar,
        ViewType::Tab,
        ViewType::DevtoolsPage,
        ViewType::DevtoolsPanel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Popup => "popup",
            Self::Sidebar => "sidebar",
            Self::Tab => "tab",
            Self::DevtoolsPage => "devtools_page",
            Self::DevtoolsPanel => "devtools_panel",
        }
    }
}

impl fmt::Display for ViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|view| view.as_str() == s)
            .ok_or_else(|| format!("unknown view type: {s}"))
    }
}

/// Timestamp as delivered by a source: epoch milliseconds, or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl RawTimestamp {
    /// Normalize to epoch milliseconds. `None` when the value is not a time.
    pub fn to_epoch_millis(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::Fractional(ms) if ms.is_finite() => Some(ms.trunc() as i64),
            Self::Fractional(_) => None,
            Self::Text(text) => parse_timestamp_text(text),
        }
    }
}

impl From<i64> for RawTimestamp {
    fn from(ms: i64) -> Self {
        Self::Millis(ms)
    }
}

fn parse_timestamp_text(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(ms) = text.parse::<f64>() {
        return ms.is_finite().then(|| ms.trunc() as i64);
    }
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// An activity event before timestamp normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub time_stamp: RawTimestamp,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_type: Option<ViewType>,
    #[serde(default)]
    pub data: Value,
}

impl ActivityEvent {
    /// Build the stored record, using `fallback_ms` when the timestamp
    /// cannot be normalized.
    pub fn into_record(self, fallback_ms: i64) -> LogRecord {
        let time_stamp = self.time_stamp.to_epoch_millis().unwrap_or(fallback_ms);
        // Content scripts never carry a view type.
        let view_type = match self.kind {
            ActivityType::ContentScript => None,
            _ => self.view_type,
        };
        LogRecord {
            id: self.id,
            time_stamp,
            kind: self.kind,
            name: self.name,
            view_type,
            data: self.data,
        }
    }
}

/// One observed activity, immutable once appended to a log buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Source extension id
    pub id: String,
    /// Epoch milliseconds
    pub time_stamp: i64,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    /// API name, or script URL for injected scripts
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_type: Option<ViewType>,
    /// Argument/result snapshot
    #[serde(default)]
    pub data: Value,
}

impl LogRecord {
    /// Tab the activity happened in, if the payload names one.
    pub fn tab_id(&self) -> Option<i64> {
        self.data.get("tabId").and_then(Value::as_i64)
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
