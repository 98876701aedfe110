//! # `runtime:activity_log` - Extension Activity Log
//!
//! Records the API calls, API events and injected scripts of other installed
//! extensions, streams them to live log viewers, and saves or loads them as
//! JSON files.
//!
//! ## Overview
//!
//! The [`MonitorRegistry`] is the process-wide owner of monitoring state. It
//! holds one host listener per watched extension, an append-only buffer of
//! [`LogRecord`]s, the live viewer connections, and log sets loaded from files
//! (keyed by the tab that shows them). Viewer pages talk to it through the
//! [`MessageRouter`], and render records with a [`LogViewer`] whose
//! [`FilterState`] is mirrored in the page URL.
//!
//! ```text
//! ActivityHost ──HostEvent──▶ MonitorRegistry ──appendLogs──▶ LogViewer(s)
//!                                   ▲
//!                 RouterMessage ────┘ MessageRouter
//! ```
//!
//! ## Operations
//!
//! | Operation | Returns | Purpose |
//! |-----------|---------|---------|
//! | `op_activity_log_info` | `ActivityLogInfo` | Extension metadata and registry status |
//! | `op_activity_log_request` | `Response \| null` | Route one addressed request |
//! | `op_activity_log_connect` | `number \| null` | Open a realtime viewer connection |
//! | `op_activity_log_next` | `RouterMessage \| null` | Await the next push (async) |
//! | `op_activity_log_disconnect` | `()` | Close a viewer connection |
//! | `op_activity_log_pump` | `number` | Dispatch queued host events |
//! | `op_activity_log_filter_parse` | `FilterState` | Filter from a URL query |
//! | `op_activity_log_filter_serialize` | `string` | URL query for a filter |
//!
//! ## Error Handling
//!
//! All fallible operations use [`ActivityError`]:
//!
//! | Code | Error | Description |
//! |------|-------|-------------|
//! | 9901 | AlreadyRunning | `startMonitor` while already monitoring |
//! | 9902 | UnknownRequestType | Router has no handler for the request |
//! | 9903 | NotFound | No loaded logs for the tab |
//! | 9904 | Parse | Malformed log file |
//! | 9905 | Save | Download failed |
//! | 9906 | Host | Host capability failure |
//! | 9907 | InvalidParams | Malformed request parameters |
//! | 9908 | Config | Unreadable or invalid configuration |
//!
//! Requests routed through `op_activity_log_request` never throw; failures
//! come back as a rejected [`Response`].
//!
//! ## TypeScript Usage
//!
//! ```typescript
//! import { request, connect, next } from "runtime:activity_log";
//!
//! await request({ requestTo: "activity-monitor", requestType: "startMonitor" });
//! const conn = connect("monitor-realtime-logs");
//! for (let msg = await next(conn); msg; msg = await next(conn)) {
//!   render(msg.requestParams.log);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use deno_core::{op2, Extension, OpState};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

pub mod config;
pub mod error;
pub mod filter;
pub mod host;
pub mod persistence;
pub mod record;
pub mod registry;
pub mod router;
pub mod viewer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ActivityLogConfig;
pub use error::{ActivityError, ActivityErrorCode};
pub use filter::change::FilterOptions;
pub use filter::{
    ExcludeFilter, FilterEvent, FilterOption, FilterOutcome, FilterPatch, FilterState,
    FilterValue, QueryParams, TimeRange,
};
pub use host::{
    ActivityHost, DownloadDelta, DownloadId, DownloadRequest, DownloadState, ExtensionInfo,
    HostEvent, HostEventSender, ListenerHandle, ListenerKind, TabId,
};
pub use record::{ActivityEvent, ActivityType, LogRecord, RawTimestamp, ViewType};
pub use registry::{
    ConnectionId, LoadedFile, MonitorRegistry, RegistryStatus, SharedRegistry, ViewerHandle,
};
pub use router::{MessageRouter, RequestType, Response, RouterMessage};
pub use viewer::{LogViewer, ViewSource};

// ============================================================================
// State Management
// ============================================================================

/// State stored in OpState for activity log operations
pub struct ActivityLogState {
    pub registry: SharedRegistry,
    pub router: Rc<MessageRouter>,
    /// Receivers of open viewer connections. `None` while an
    /// `op_activity_log_next` call is awaiting on it.
    viewers: HashMap<ConnectionId, Option<mpsc::UnboundedReceiver<RouterMessage>>>,
}

impl ActivityLogState {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            router: Rc::new(MessageRouter::new(registry.clone())),
            registry,
            viewers: HashMap::new(),
        }
    }

    fn connect(&mut self, channel: &str) -> Option<ConnectionId> {
        let handle = self.registry.on_viewer_connect(channel)?;
        self.viewers.insert(handle.id, Some(handle.receiver));
        Some(handle.id)
    }

    fn take_receiver(
        &mut self,
        id: ConnectionId,
    ) -> Option<mpsc::UnboundedReceiver<RouterMessage>> {
        self.viewers.get_mut(&id).and_then(Option::take)
    }

    /// Put a receiver back unless the connection was closed meanwhile.
    fn restore_receiver(&mut self, id: ConnectionId, rx: mpsc::UnboundedReceiver<RouterMessage>) {
        if let Some(slot) = self.viewers.get_mut(&id) {
            *slot = Some(rx);
        }
    }

    fn disconnect(&mut self, id: ConnectionId) {
        self.viewers.remove(&id);
        self.registry.on_viewer_disconnect(id);
    }
}

#[derive(Debug, Serialize)]
pub struct ActivityLogInfo {
    name: &'static str,
    version: &'static str,
    status: RegistryStatus,
}

// ============================================================================
// Operations
// ============================================================================

#[op2]
#[serde]
fn op_activity_log_info(state: &mut OpState) -> ActivityLogInfo {
    let log_state = state.borrow::<ActivityLogState>();
    ActivityLogInfo {
        name: "ext_activity_log",
        version: env!("CARGO_PKG_VERSION"),
        status: log_state.registry.status(),
    }
}

/// Route one request. `null` when it is addressed to someone else.
#[op2(async)]
#[serde]
async fn op_activity_log_request(
    state: Rc<RefCell<OpState>>,
    #[serde] message: RouterMessage,
) -> Option<Response> {
    let router = {
        let s = state.borrow();
        s.borrow::<ActivityLogState>().router.clone()
    };
    router.dispatch(&message).await
}

#[op2]
#[serde]
fn op_activity_log_connect(state: &mut OpState, #[string] channel: String) -> Option<u64> {
    state.borrow_mut::<ActivityLogState>().connect(&channel)
}

/// Wait for the next push on a connection. `null` once it is closed.
#[op2(async)]
#[serde]
async fn op_activity_log_next(
    state: Rc<RefCell<OpState>>,
    #[bigint] connection_id: u64,
) -> Result<Option<RouterMessage>, ActivityError> {
    // Take receiver temporarily
    let mut receiver = {
        let mut s = state.borrow_mut();
        s.borrow_mut::<ActivityLogState>()
            .take_receiver(connection_id)
            .ok_or_else(|| {
                ActivityError::not_found(format!("no idle viewer connection {connection_id}"))
            })?
    };

    let result = receiver.recv().await;

    {
        let mut s = state.borrow_mut();
        s.borrow_mut::<ActivityLogState>()
            .restore_receiver(connection_id, receiver);
    }

    Ok(result)
}

#[op2(fast)]
fn op_activity_log_disconnect(state: &mut OpState, #[bigint] connection_id: u64) {
    state
        .borrow_mut::<ActivityLogState>()
        .disconnect(connection_id);
}

/// Dispatch every queued host event; returns how many were handled.
#[op2(fast)]
fn op_activity_log_pump(state: &mut OpState) -> u32 {
    let handled = state.borrow::<ActivityLogState>().registry.drain_events();
    u32::try_from(handled).unwrap_or(u32::MAX)
}

#[op2]
#[serde]
fn op_activity_log_filter_parse(#[string] query: String) -> FilterState {
    filter::query::deserialize(&QueryParams::parse(&query))
}

#[op2]
#[string]
fn op_activity_log_filter_serialize(
    #[string] current: String,
    #[serde] filter: FilterState,
) -> String {
    filter::query::serialize(&QueryParams::parse(&current), &filter).to_query_string()
}

// ============================================================================
// Extension Registration
// ============================================================================

deno_core::extension!(
    runtime_activity_log,
    ops = [
        op_activity_log_info,
        op_activity_log_request,
        op_activity_log_connect,
        op_activity_log_next,
        op_activity_log_disconnect,
        op_activity_log_pump,
        op_activity_log_filter_parse,
        op_activity_log_filter_serialize,
    ],
);

/// Build the activity log extension
pub fn activity_log_extension() -> Extension {
    runtime_activity_log::init()
}

/// Initialize activity log state in OpState - must be called after creating JsRuntime
pub fn init_activity_log_state(op_state: &mut OpState, registry: SharedRegistry) {
    debug!(address = %registry.config().monitor_address, "Activity log state installed");
    op_state.put(ActivityLogState::new(registry));
}

/// Tear down the registry held in OpState, if any.
pub fn shutdown_activity_log(op_state: &mut OpState) {
    if let Some(log_state) = op_state.try_take::<ActivityLogState>() {
        log_state.registry.teardown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{activity, MockHost};

    fn state() -> ActivityLogState {
        let host = Rc::new(MockHost::new("monitor@self"));
        let registry = MonitorRegistry::new(host, ActivityLogConfig::default()).unwrap();
        ActivityLogState::new(Rc::new(registry))
    }

    #[test]
    fn test_connection_receiver_is_lent_and_returned() {
        let mut log_state = state();
        assert_eq!(log_state.connect("wrong-channel"), None);

        let id = log_state.connect("monitor-realtime-logs").unwrap();
        let mut rx = log_state.take_receiver(id).unwrap();
        assert!(log_state.take_receiver(id).is_none());

        log_state.registry.record_activity(activity("ext1", 1));
        assert_eq!(rx.try_recv().unwrap().request_type, "appendLogs");

        log_state.restore_receiver(id, rx);
        assert!(log_state.take_receiver(id).is_some());
    }

    #[test]
    fn test_disconnect_drops_receiver() {
        let mut log_state = state();
        let id = log_state.connect("monitor-realtime-logs").unwrap();
        let rx = log_state.take_receiver(id).unwrap();

        log_state.disconnect(id);
        log_state.restore_receiver(id, rx);
        assert!(log_state.take_receiver(id).is_none());
        assert_eq!(log_state.registry.connection_count(), 0);
    }

    #[test]
    fn test_info_serialization() {
        let log_state = state();
        let info = ActivityLogInfo {
            name: "ext_activity_log",
            version: env!("CARGO_PKG_VERSION"),
            status: log_state.registry.status(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"]["monitoring"], false);
        assert_eq!(json["status"]["logCount"], 0);
    }
}
