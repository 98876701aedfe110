//! In-memory [`ActivityHost`] used by unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::ActivityError;
use crate::host::{
    ActivityHost, DownloadDelta, DownloadId, DownloadRequest, DownloadState, ExtensionInfo,
    HostEvent, HostEventSender, ListenerHandle, ListenerKind, TabId,
};
use crate::record::{ActivityEvent, ActivityType, RawTimestamp, ViewType};

/// A background `api_call` from `id` at `ts`.
pub fn activity(id: &str, ts: i64) -> ActivityEvent {
    ActivityEvent {
        id: id.to_string(),
        time_stamp: RawTimestamp::Millis(ts),
        kind: ActivityType::ApiCall,
        name: "tabs.query".to_string(),
        view_type: Some(ViewType::Background),
        data: json!({"args": [{"active": true}]}),
    }
}

struct Listener {
    kind: ListenerKind,
    target: Option<String>,
    sink: HostEventSender,
}

pub struct MockHost {
    self_id: String,
    installed: RefCell<Vec<ExtensionInfo>>,
    next_handle: Cell<u64>,
    listeners: RefCell<HashMap<u64, Listener>>,
    unknown_unsubscribes: RefCell<Vec<ListenerHandle>>,
    download_watchers: RefCell<Vec<mpsc::UnboundedSender<DownloadDelta>>>,
    download_outcome: RefCell<Option<DownloadDelta>>,
    downloads: RefCell<Vec<DownloadRequest>>,
    opened_tabs: RefCell<Vec<String>>,
    next_tab: Cell<TabId>,
    failing_activity: RefCell<Option<String>>,
}

impl MockHost {
    pub fn new(self_id: &str) -> Self {
        Self {
            self_id: self_id.to_string(),
            installed: RefCell::new(Vec::new()),
            next_handle: Cell::new(1),
            listeners: RefCell::new(HashMap::new()),
            unknown_unsubscribes: RefCell::new(Vec::new()),
            download_watchers: RefCell::new(Vec::new()),
            download_outcome: RefCell::new(None),
            downloads: RefCell::new(Vec::new()),
            opened_tabs: RefCell::new(Vec::new()),
            next_tab: Cell::new(100),
            failing_activity: RefCell::new(None),
        }
    }

    pub fn add_installed(&self, ext: ExtensionInfo) {
        self.installed.borrow_mut().push(ext);
    }

    /// Install `ext` and notify management listeners.
    pub fn install(&self, ext: ExtensionInfo) {
        self.add_installed(ext.clone());
        self.notify(ListenerKind::Management, None, HostEvent::Installed(ext));
    }

    pub fn uninstall(&self, ext: ExtensionInfo) {
        self.installed.borrow_mut().retain(|e| e.id != ext.id);
        self.notify(ListenerKind::Management, None, HostEvent::Uninstalled(ext));
    }

    /// Deliver an activity to listeners registered for `extension_id`.
    pub fn emit(&self, extension_id: &str, event: ActivityEvent) {
        self.notify(
            ListenerKind::Activity,
            Some(extension_id),
            HostEvent::Activity(event),
        );
    }

    pub fn close_tab(&self, tab_id: TabId) {
        self.notify(ListenerKind::TabClose, None, HostEvent::TabClosed(tab_id));
    }

    /// Make `subscribe_activity` fail for `extension_id`.
    pub fn fail_activity_for(&self, extension_id: Option<&str>) {
        *self.failing_activity.borrow_mut() = extension_id.map(str::to_string);
    }

    /// Terminal delta sent for the next download; its `id` is replaced.
    pub fn set_download_outcome(&self, delta: DownloadDelta) {
        *self.download_outcome.borrow_mut() = Some(delta);
    }

    pub fn downloads(&self) -> Vec<DownloadRequest> {
        self.downloads.borrow().clone()
    }

    pub fn opened_tabs(&self) -> Vec<String> {
        self.opened_tabs.borrow().clone()
    }

    pub fn listener_count(&self, kind: ListenerKind) -> usize {
        self.listeners
            .borrow()
            .values()
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Handles passed to `unsubscribe` that were never issued or were
    /// already released.
    pub fn unknown_unsubscribes(&self) -> Vec<ListenerHandle> {
        self.unknown_unsubscribes.borrow().clone()
    }

    fn notify(&self, kind: ListenerKind, target: Option<&str>, event: HostEvent) {
        for listener in self.listeners.borrow().values() {
            if listener.kind == kind && listener.target.as_deref() == target {
                let _ = listener.sink.send(event.clone());
            }
        }
    }

    fn register(
        &self,
        kind: ListenerKind,
        target: Option<String>,
        sink: HostEventSender,
    ) -> ListenerHandle {
        let id = self.next_handle.get();
        self.next_handle.set(id + 1);
        self.listeners
            .borrow_mut()
            .insert(id, Listener { kind, target, sink });
        ListenerHandle { id, kind }
    }

    fn broadcast_download(&self, delta: DownloadDelta) {
        self.download_watchers
            .borrow_mut()
            .retain(|tx| tx.send(delta.clone()).is_ok());
    }
}

#[async_trait(?Send)]
impl ActivityHost for MockHost {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn installed_extensions(&self) -> Result<Vec<ExtensionInfo>, ActivityError> {
        // Enumeration is asynchronous on a real host.
        tokio::task::yield_now().await;
        Ok(self.installed.borrow().clone())
    }

    fn subscribe_activity(
        &self,
        extension_id: &str,
        sink: HostEventSender,
    ) -> Result<ListenerHandle, ActivityError> {
        if self.failing_activity.borrow().as_deref() == Some(extension_id) {
            return Err(ActivityError::host(format!("cannot observe {extension_id}")));
        }
        Ok(self.register(ListenerKind::Activity, Some(extension_id.to_string()), sink))
    }

    fn subscribe_management(&self, sink: HostEventSender) -> Result<ListenerHandle, ActivityError> {
        Ok(self.register(ListenerKind::Management, None, sink))
    }

    fn subscribe_tab_close(&self, sink: HostEventSender) -> Result<ListenerHandle, ActivityError> {
        Ok(self.register(ListenerKind::TabClose, None, sink))
    }

    fn unsubscribe(&self, handle: ListenerHandle) {
        let removed = self.listeners.borrow_mut().remove(&handle.id);
        if removed.is_none() {
            self.unknown_unsubscribes.borrow_mut().push(handle);
        }
    }

    fn watch_downloads(&self) -> mpsc::UnboundedReceiver<DownloadDelta> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.download_watchers.borrow_mut().push(tx);
        rx
    }

    async fn download(&self, request: DownloadRequest) -> Result<DownloadId, ActivityError> {
        self.downloads.borrow_mut().push(request);
        let id = self.downloads.borrow().len() as DownloadId;

        // An unrelated download finishing first must not settle the export.
        self.broadcast_download(DownloadDelta {
            id: id + 1000,
            state: Some(DownloadState::Complete),
            error: None,
        });
        self.broadcast_download(DownloadDelta {
            id,
            state: Some(DownloadState::InProgress),
            error: None,
        });
        let outcome = self.download_outcome.borrow().clone();
        if let Some(mut outcome) = outcome {
            outcome.id = id;
            self.broadcast_download(outcome);
        }
        Ok(id)
    }

    async fn open_tab(&self, url: &str) -> Result<TabId, ActivityError> {
        self.opened_tabs.borrow_mut().push(url.to_string());
        let tab_id = self.next_tab.get();
        self.next_tab.set(tab_id + 1);
        Ok(tab_id)
    }
}
