//! Addresses, channel names and file names used by the activity log.
//!
//! Read from an `[activity_log]` table of a TOML manifest, or built from
//! defaults when no manifest is present.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ActivityError;

pub const DEFAULT_MONITOR_ADDRESS: &str = "activity-monitor";
pub const DEFAULT_VIEWER_ADDRESS: &str = "activity-viewer";
pub const DEFAULT_REALTIME_CHANNEL: &str = "monitor-realtime-logs";
pub const DEFAULT_EXPORT_FILENAME: &str = "activitylogs.json";
pub const DEFAULT_VIEWER_PAGE: &str = "logs.html";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityLogConfig {
    /// `requestTo` value the message router answers to
    pub monitor_address: String,
    /// `requestTo` value stamped on pushes to viewer pages
    pub viewer_address: String,
    /// Channel name a viewer must connect with to receive live pushes
    pub realtime_channel: String,
    /// File name offered for downloads of the log buffer
    pub export_filename: String,
    /// Page opened for viewing a loaded log file
    pub viewer_page: String,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            monitor_address: DEFAULT_MONITOR_ADDRESS.to_string(),
            viewer_address: DEFAULT_VIEWER_ADDRESS.to_string(),
            realtime_channel: DEFAULT_REALTIME_CHANNEL.to_string(),
            export_filename: DEFAULT_EXPORT_FILENAME.to_string(),
            viewer_page: DEFAULT_VIEWER_PAGE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    activity_log: Option<ActivityLogConfig>,
}

impl ActivityLogConfig {
    /// Parse a TOML manifest. A missing `[activity_log]` table yields defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ActivityError> {
        let manifest: Manifest = toml::from_str(source)?;
        let config = manifest.activity_log.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ActivityError> {
        debug!(path = %path.display(), "Loading activity log config");
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ActivityError> {
        let fields = [
            ("monitor_address", &self.monitor_address),
            ("viewer_address", &self.viewer_address),
            ("realtime_channel", &self.realtime_channel),
            ("export_filename", &self.export_filename),
            ("viewer_page", &self.viewer_page),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ActivityError::config(format!("{name} must not be empty")));
            }
        }
        if self.monitor_address == self.viewer_address {
            return Err(ActivityError::config(
                "monitor_address and viewer_address must differ",
            ));
        }
        Ok(())
    }
}
