//! Process-wide monitor state: watch set, log buffer, viewer connections and
//! per-tab loaded log sets.
//!
//! The registry is single-threaded. State sits behind a `RefCell` and no
//! borrow is held across an `.await`, so each handler runs to completion
//! before the next host event is dispatched.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ActivityLogConfig;
use crate::error::ActivityError;
use crate::filter::query::{QueryParams, PARAM_FILE};
use crate::host::{
    ActivityHost, DownloadId, ExtensionInfo, HostEvent, HostEventSender, ListenerHandle, TabId,
};
use crate::persistence;
use crate::record::{now_millis, ActivityEvent, LogRecord};
use crate::router::RouterMessage;

pub type ConnectionId = u64;

/// Receiving end of a live viewer connection.
#[derive(Debug)]
pub struct ViewerHandle {
    pub id: ConnectionId,
    pub receiver: mpsc::UnboundedReceiver<RouterMessage>,
}

/// A file picked for inspection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, Serialize)]
pub struct LoadedFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub monitoring: bool,
    pub watched: Vec<String>,
    pub log_count: usize,
    pub connections: usize,
    pub loaded_tabs: usize,
}

#[derive(Default)]
struct RegistryState {
    watched: HashMap<String, ListenerHandle>,
    management: Option<ListenerHandle>,
    tab_close: Option<ListenerHandle>,
    logs: Vec<LogRecord>,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<RouterMessage>>,
    next_connection_id: ConnectionId,
    loaded: HashMap<TabId, Vec<LogRecord>>,
}

pub struct MonitorRegistry {
    host: Rc<dyn ActivityHost>,
    config: ActivityLogConfig,
    events_tx: HostEventSender,
    events_rx: RefCell<Option<mpsc::UnboundedReceiver<HostEvent>>>,
    shutdown: CancellationToken,
    state: RefCell<RegistryState>,
}

impl MonitorRegistry {
    /// Create the registry and subscribe to tab-close notifications.
    pub fn new(
        host: Rc<dyn ActivityHost>,
        config: ActivityLogConfig,
    ) -> Result<Self, ActivityError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tab_close = host.subscribe_tab_close(events_tx.clone())?;
        debug!(host = host.self_id(), "Activity registry created");

        Ok(Self {
            host,
            config,
            events_tx,
            events_rx: RefCell::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
            state: RefCell::new(RegistryState {
                tab_close: Some(tab_close),
                next_connection_id: 1,
                ..Default::default()
            }),
        })
    }

    pub fn config(&self) -> &ActivityLogConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------------

    pub async fn start_monitor(&self) -> Result<(), ActivityError> {
        if self.get_monitor_status() {
            return Err(ActivityError::already_running(
                "extensions are already being watched",
            ));
        }

        let extensions = self.host.installed_extensions().await?;

        // Another start may have completed while enumeration was pending.
        if self.get_monitor_status() {
            return Err(ActivityError::already_running(
                "monitor started concurrently",
            ));
        }

        let management = self.host.subscribe_management(self.events_tx.clone())?;
        let stale = self.state.borrow_mut().management.replace(management);
        if let Some(stale) = stale {
            self.host.unsubscribe(stale);
        }

        let mut added = Vec::new();
        for ext in &extensions {
            match self.watch(ext) {
                Ok(true) => added.push(ext.id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(extension = %ext.id, error = %e, "Start failed, releasing listeners");
                    self.abort_start(&added);
                    return Err(e);
                }
            }
        }

        info!(
            watched = self.state.borrow().watched.len(),
            installed = extensions.len(),
            "Activity monitor started"
        );
        Ok(())
    }

    /// Undo a partial start: the listeners it added and the management
    /// subscription.
    fn abort_start(&self, added: &[String]) {
        let (handles, management) = {
            let mut state = self.state.borrow_mut();
            let handles: Vec<ListenerHandle> = added
                .iter()
                .filter_map(|id| state.watched.remove(id))
                .collect();
            (handles, state.management.take())
        };
        for handle in handles {
            self.host.unsubscribe(handle);
        }
        if let Some(management) = management {
            self.host.unsubscribe(management);
        }
    }

    /// Idempotent.
    pub fn stop_monitor(&self) {
        let (handles, management) = {
            let mut state = self.state.borrow_mut();
            let handles: Vec<ListenerHandle> =
                state.watched.drain().map(|(_, handle)| handle).collect();
            (handles, state.management.take())
        };

        if handles.is_empty() && management.is_none() {
            trace!("stop_monitor called while stopped");
            return;
        }

        for handle in &handles {
            self.host.unsubscribe(*handle);
        }
        if let Some(management) = management {
            self.host.unsubscribe(management);
        }
        info!(unwatched = handles.len(), "Activity monitor stopped");
    }

    pub fn get_monitor_status(&self) -> bool {
        !self.state.borrow().watched.is_empty()
    }

    pub fn watched_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.borrow().watched.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn on_extension_installed(&self, ext: &ExtensionInfo) -> Result<(), ActivityError> {
        if self.state.borrow().management.is_none() {
            trace!(extension = %ext.id, "Install notification while stopped");
            return Ok(());
        }
        self.watch(ext).map(|_| ())
    }

    pub fn on_extension_uninstalled(&self, ext: &ExtensionInfo) {
        let removed = self.state.borrow_mut().watched.remove(&ext.id);
        if let Some(handle) = removed {
            self.host.unsubscribe(handle);
            debug!(extension = %ext.id, "Stopped watching uninstalled extension");
        }
    }

    /// Returns whether a new listener was added.
    fn watch(&self, ext: &ExtensionInfo) -> Result<bool, ActivityError> {
        if !ext.is_extension() || ext.id == self.host.self_id() {
            trace!(extension = %ext.id, kind = %ext.kind, "Not watching");
            return Ok(false);
        }
        if self.state.borrow().watched.contains_key(&ext.id) {
            return Ok(false);
        }
        let handle = self
            .host
            .subscribe_activity(&ext.id, self.events_tx.clone())?;
        self.state.borrow_mut().watched.insert(ext.id.clone(), handle);
        debug!(extension = %ext.id, "Watching extension");
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Log buffer
    // ------------------------------------------------------------------------

    /// Append one event and push it to every live viewer.
    pub fn record_activity(&self, event: ActivityEvent) -> LogRecord {
        if event.time_stamp.to_epoch_millis().is_none() {
            warn!(extension = %event.id, timestamp = ?event.time_stamp, "Unparsable timestamp, using arrival time");
        }
        let record = event.into_record(now_millis());
        let message = RouterMessage::append_logs(&self.config.viewer_address, &record);

        let mut state = self.state.borrow_mut();
        state.logs.push(record.clone());
        state
            .connections
            .retain(|id, tx| match tx.send(message.clone()) {
                Ok(()) => true,
                Err(_) => {
                    debug!(connection = id, "Dropping closed viewer connection");
                    false
                }
            });
        trace!(
            extension = %record.id,
            name = %record.name,
            total = state.logs.len(),
            "Recorded activity"
        );
        record
    }

    pub fn clear_logs(&self) {
        let cleared = std::mem::take(&mut self.state.borrow_mut().logs);
        debug!(cleared = cleared.len(), "Cleared activity logs");
    }

    /// Snapshot copy of the buffer.
    pub fn get_all_logs(&self) -> Vec<LogRecord> {
        self.state.borrow().logs.clone()
    }

    pub fn log_count(&self) -> usize {
        self.state.borrow().logs.len()
    }

    pub async fn save_logs(&self) -> Result<DownloadId, ActivityError> {
        let logs = self.get_all_logs();
        persistence::export_all(self.host.as_ref(), &logs, &self.config.export_filename).await
    }

    /// Parse `file`, open a viewer tab for it and keep its records under
    /// that tab's id, apart from the live buffer.
    pub async fn load_logs(&self, file: LoadedFile) -> Result<TabId, ActivityError> {
        let logs = persistence::import_file(&file.content)?;
        let url = self.loaded_view_url(&file.name);
        let tab_id = self.host.open_tab(&url).await?;
        info!(tab_id, file = %file.name, records = logs.len(), "Loaded activity log file");
        self.state.borrow_mut().loaded.insert(tab_id, logs);
        Ok(tab_id)
    }

    pub fn get_loaded_logs(&self, tab_id: TabId) -> Result<Vec<LogRecord>, ActivityError> {
        self.state
            .borrow()
            .loaded
            .get(&tab_id)
            .cloned()
            .ok_or_else(|| ActivityError::not_found(format!("no loaded logs for tab {tab_id}")))
    }

    fn loaded_view_url(&self, file_name: &str) -> String {
        let mut params = QueryParams::new();
        params.set(PARAM_FILE, file_name);
        format!("{}?{}", self.config.viewer_page, params.to_query_string())
    }

    // ------------------------------------------------------------------------
    // Viewer connections
    // ------------------------------------------------------------------------

    /// Accept a viewer only when it names the realtime channel.
    pub fn on_viewer_connect(&self, channel: &str) -> Option<ViewerHandle> {
        if channel != self.config.realtime_channel {
            debug!(channel, "Ignoring connection on foreign channel");
            return None;
        }
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.borrow_mut();
        let id = state.next_connection_id;
        state.next_connection_id += 1;
        state.connections.insert(id, tx);
        debug!(connection = id, "Viewer connected");
        Some(ViewerHandle { id, receiver })
    }

    pub fn on_viewer_disconnect(&self, id: ConnectionId) {
        if self.state.borrow_mut().connections.remove(&id).is_some() {
            debug!(connection = id, "Viewer disconnected");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.borrow().connections.len()
    }

    pub fn on_tab_closed(&self, tab_id: TabId) {
        if self.state.borrow_mut().loaded.remove(&tab_id).is_some() {
            debug!(tab_id, "Released loaded logs for closed tab");
        }
    }

    // ------------------------------------------------------------------------
    // Host events
    // ------------------------------------------------------------------------

    pub fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::Activity(activity) => {
                self.record_activity(activity);
            }
            HostEvent::Installed(ext) => {
                if let Err(e) = self.on_extension_installed(&ext) {
                    warn!(extension = %ext.id, error = %e, "Failed to watch installed extension");
                }
            }
            HostEvent::Uninstalled(ext) => self.on_extension_uninstalled(&ext),
            HostEvent::TabClosed(tab_id) => self.on_tab_closed(tab_id),
        }
    }

    /// Dispatch every event already queued. Returns how many were handled.
    pub fn drain_events(&self) -> usize {
        let mut rx = self.events_rx.borrow_mut();
        let Some(rx) = rx.as_mut() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(event) = rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Dispatch host events in delivery order until [`teardown`](Self::teardown).
    pub async fn run_event_loop(&self) -> Result<(), ActivityError> {
        let mut rx = self
            .events_rx
            .borrow_mut()
            .take()
            .ok_or_else(|| ActivityError::host("event loop already running"))?;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }

        *self.events_rx.borrow_mut() = Some(rx);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn status(&self) -> RegistryStatus {
        let state = self.state.borrow();
        let mut watched: Vec<String> = state.watched.keys().cloned().collect();
        watched.sort();
        RegistryStatus {
            monitoring: !watched.is_empty(),
            watched,
            log_count: state.logs.len(),
            connections: state.connections.len(),
            loaded_tabs: state.loaded.len(),
        }
    }

    /// Remove every host listener and drop all viewer and loaded state.
    pub fn teardown(&self) {
        self.stop_monitor();
        self.shutdown.cancel();
        let tab_close = {
            let mut state = self.state.borrow_mut();
            state.connections.clear();
            state.loaded.clear();
            state.tab_close.take()
        };
        if let Some(handle) = tab_close {
            self.host.unsubscribe(handle);
        }
        info!("Activity registry torn down");
    }
}

/// Shared handle used by the router and the runtime ops.
pub type SharedRegistry = Rc<MonitorRegistry>;

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result<Value, ActivityError> {
    serde_json::to_value(value).map_err(|e| ActivityError::host(e.to_string()))
}
