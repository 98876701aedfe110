//! Addressed request dispatch between viewer pages and the monitor.
//!
//! Every message names its recipient. A router only answers messages
//! addressed to it; anything else is left for another listener.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ActivityError;
use crate::host::TabId;
use crate::record::LogRecord;
use crate::registry::{to_value, LoadedFile, MonitorRegistry};

/// Wire envelope for requests and pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterMessage {
    pub request_to: String,
    pub request_type: String,
    #[serde(default)]
    pub request_params: Value,
}

impl RouterMessage {
    pub fn new(request_to: impl Into<String>, request_type: RequestType, params: Value) -> Self {
        Self {
            request_to: request_to.into(),
            request_type: request_type.to_string(),
            request_params: params,
        }
    }

    /// One-way push of a freshly recorded activity to a viewer.
    pub fn append_logs(viewer_address: &str, record: &LogRecord) -> Self {
        Self::new(
            viewer_address,
            RequestType::AppendLogs,
            json!({ "log": record }),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    GetMonitorStatus,
    StartMonitor,
    StopMonitor,
    ClearLogs,
    SendAllLogs,
    LoadLogs,
    GetLoadedLogs,
    SaveLogs,
    /// Monitor to viewer only.
    AppendLogs,
}

impl RequestType {
    pub const ALL: [RequestType; 9] = [
        RequestType::GetMonitorStatus,
        RequestType::StartMonitor,
        RequestType::StopMonitor,
        RequestType::ClearLogs,
        RequestType::SendAllLogs,
        RequestType::LoadLogs,
        RequestType::GetLoadedLogs,
        RequestType::SaveLogs,
        RequestType::AppendLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetMonitorStatus => "getMonitorStatus",
            Self::StartMonitor => "startMonitor",
            Self::StopMonitor => "stopMonitor",
            Self::ClearLogs => "clearLogs",
            Self::SendAllLogs => "sendAllLogs",
            Self::LoadLogs => "loadLogs",
            Self::GetLoadedLogs => "getLoadedLogs",
            Self::SaveLogs => "saveLogs",
            Self::AppendLogs => "appendLogs",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = ActivityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ActivityError::unknown_request_type(s))
    }
}

/// Settled outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "camelCase")]
pub enum Response {
    Resolved(Value),
    Rejected(String),
}

impl Response {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl From<Result<Value, ActivityError>> for Response {
    fn from(result: Result<Value, ActivityError>) -> Self {
        match result {
            Ok(value) => Self::Resolved(value),
            Err(e) => Self::Rejected(e.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct LoadLogsParams {
    file: LoadedFile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetLoadedLogsParams {
    tab_id: TabId,
}

/// Monitor-side router.
pub struct MessageRouter {
    address: String,
    registry: Rc<MonitorRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Rc<MonitorRegistry>) -> Self {
        Self {
            address: registry.config().monitor_address.clone(),
            registry,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Handle `msg` if it is addressed here. `None` means "not for me".
    pub async fn dispatch(&self, msg: &RouterMessage) -> Option<Response> {
        let result = self.route(msg).await?;
        if let Err(e) = &result {
            warn!(request_type = %msg.request_type, error = %e, "Request rejected");
        }
        Some(result.into())
    }

    /// Like [`dispatch`](Self::dispatch), keeping the typed error.
    pub async fn route(&self, msg: &RouterMessage) -> Option<Result<Value, ActivityError>> {
        if msg.request_to != self.address {
            return None;
        }
        debug!(request_type = %msg.request_type, "Dispatching request");
        Some(self.handle(msg).await)
    }

    async fn handle(&self, msg: &RouterMessage) -> Result<Value, ActivityError> {
        let registry = &self.registry;
        match msg.request_type.parse::<RequestType>()? {
            RequestType::GetMonitorStatus => Ok(Value::Bool(registry.get_monitor_status())),
            RequestType::StartMonitor => {
                registry.start_monitor().await?;
                Ok(Value::Null)
            }
            RequestType::StopMonitor => {
                registry.stop_monitor();
                Ok(Value::Null)
            }
            RequestType::ClearLogs => {
                registry.clear_logs();
                Ok(Value::Null)
            }
            RequestType::SendAllLogs => to_value(&registry.get_all_logs()),
            RequestType::LoadLogs => {
                let params: LoadLogsParams = serde_json::from_value(msg.request_params.clone())?;
                let tab_id = registry.load_logs(params.file).await?;
                Ok(json!(tab_id))
            }
            RequestType::GetLoadedLogs => {
                let params: GetLoadedLogsParams =
                    serde_json::from_value(msg.request_params.clone())?;
                to_value(&registry.get_loaded_logs(params.tab_id)?)
            }
            RequestType::SaveLogs => {
                let id = registry.save_logs().await?;
                Ok(json!(id))
            }
            // Viewer-bound push; the monitor has no handler for it.
            RequestType::AppendLogs => Err(ActivityError::unknown_request_type(
                msg.request_type.clone(),
            )),
        }
    }
}
