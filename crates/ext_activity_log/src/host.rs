//! Capabilities the activity log consumes from the hosting browser.
//!
//! Host notifications are delivered as [`HostEvent`] values on an unbounded
//! channel owned by the registry. Every subscription returns a
//! [`ListenerHandle`]; that exact handle is what [`ActivityHost::unsubscribe`]
//! expects back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ActivityError;
use crate::record::ActivityEvent;

pub type TabId = i64;
pub type DownloadId = u64;

/// Sending half handed to the host for a subscription.
pub type HostEventSender = mpsc::UnboundedSender<HostEvent>;

/// An installed add-on as reported by the host's management API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub id: String,
    /// "extension", "theme", "dictionary", ...
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

impl ExtensionInfo {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: String::new(),
        }
    }

    pub fn is_extension(&self) -> bool {
        self.kind == "extension"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Activity,
    Management,
    TabClose,
}

/// Ownership token for one host subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    pub id: u64,
    pub kind: ListenerKind,
}

/// Everything the host can tell the registry about.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Activity(ActivityEvent),
    Installed(ExtensionInfo),
    Uninstalled(ExtensionInfo),
    TabClosed(TabId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub filename: String,
    pub mime_type: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    InProgress,
    Interrupted,
    Complete,
}

/// A change notification from the host download subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDelta {
    pub id: DownloadId,
    #[serde(default)]
    pub state: Option<DownloadState>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Browser-side capabilities. Single-threaded, so futures are `?Send`.
#[async_trait(?Send)]
pub trait ActivityHost {
    /// Id of the extension running the monitor.
    fn self_id(&self) -> &str;

    async fn installed_extensions(&self) -> Result<Vec<ExtensionInfo>, ActivityError>;

    fn subscribe_activity(
        &self,
        extension_id: &str,
        sink: HostEventSender,
    ) -> Result<ListenerHandle, ActivityError>;

    /// Install/uninstall notifications.
    fn subscribe_management(&self, sink: HostEventSender) -> Result<ListenerHandle, ActivityError>;

    fn subscribe_tab_close(&self, sink: HostEventSender) -> Result<ListenerHandle, ActivityError>;

    fn unsubscribe(&self, handle: ListenerHandle);

    /// Stream of download deltas. Subscribe before starting the download.
    fn watch_downloads(&self) -> mpsc::UnboundedReceiver<DownloadDelta>;

    async fn download(&self, request: DownloadRequest) -> Result<DownloadId, ActivityError>;

    async fn open_tab(&self, url: &str) -> Result<TabId, ActivityError>;
}
