//! Viewer-side model of a log page: rows, filter controls and notices.
//!
//! A viewer is either live (fed by `appendLogs` pushes) or showing a loaded
//! file, which is marked by the `file` URL parameter.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::filter::change::FilterOptions;
use crate::filter::query::{self, QueryParams, PARAM_FILE};
use crate::filter::{FilterEvent, FilterOption, FilterOutcome, FilterPatch, FilterState};
use crate::record::LogRecord;
use crate::router::{RequestType, Response, RouterMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSource {
    Live,
    Loaded { file: String },
}

#[derive(Debug, Clone)]
struct Row {
    record: LogRecord,
    visible: bool,
}

#[derive(Deserialize)]
struct AppendLogsParams {
    log: LogRecord,
}

#[derive(Debug)]
pub struct LogViewer {
    address: String,
    source: ViewSource,
    filter: FilterState,
    options: FilterOptions,
    rows: Vec<Row>,
    notice: Option<String>,
}

impl LogViewer {
    /// Build a viewer with its filter restored from the page URL.
    pub fn new(address: impl Into<String>, params: &QueryParams) -> Self {
        let source = match params.get(PARAM_FILE) {
            Some(file) => ViewSource::Loaded {
                file: file.to_string(),
            },
            None => ViewSource::Live,
        };
        Self {
            address: address.into(),
            source,
            filter: query::deserialize(params),
            options: FilterOptions::default(),
            rows: Vec::new(),
            notice: None,
        }
    }

    pub fn source(&self) -> &ViewSource {
        &self.source
    }

    pub fn is_live(&self) -> bool {
        self.source == ViewSource::Live
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// Take a pushed message. Returns false when it was not for this viewer.
    pub fn receive(&mut self, msg: &RouterMessage) -> bool {
        if msg.request_to != self.address || !self.is_live() {
            trace!(to = %msg.request_to, "Viewer dropped message");
            return false;
        }
        if msg.request_type != RequestType::AppendLogs.as_str() {
            trace!(request_type = %msg.request_type, "Viewer ignored request");
            return false;
        }
        match serde_json::from_value::<AppendLogsParams>(msg.request_params.clone()) {
            Ok(params) => {
                self.append(params.log);
                true
            }
            Err(e) => {
                debug!(error = %e, "Malformed appendLogs push");
                false
            }
        }
    }

    /// Add one row. Returns the filter options it introduced.
    pub fn append(&mut self, record: LogRecord) -> Vec<FilterOption> {
        let discovered = self.options.discover(&record);
        for option in &discovered {
            self.options.insert(option.clone());
        }
        let visible = self.filter.evaluate(&record);
        self.rows.push(Row { record, visible });
        discovered
    }

    /// Replace all rows, e.g. after `sendAllLogs` or `getLoadedLogs`.
    pub fn replace_rows(&mut self, records: Vec<LogRecord>) {
        self.clear();
        for record in records {
            self.append(record);
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.options.clear();
    }

    pub fn apply(&mut self, event: FilterEvent) -> FilterOutcome {
        match event {
            FilterEvent::OptionDiscovered { option } => {
                self.options.insert(option);
                FilterOutcome::OptionsUpdated
            }
            FilterEvent::Changed { value } => {
                self.filter.set_filter(FilterPatch::from(value));
                for row in &mut self.rows {
                    row.visible = self.filter.evaluate(&row.record);
                }
                let (visible, total) = self.counter();
                debug!(visible, total, "Refiltered rows");
                FilterOutcome::Refiltered { visible, total }
            }
        }
    }

    /// `(visible, total)` row counts.
    pub fn counter(&self) -> (usize, usize) {
        let visible = self.rows.iter().filter(|row| row.visible).count();
        (visible, self.rows.len())
    }

    pub fn counter_text(&self) -> String {
        let (visible, total) = self.counter();
        format!("{visible}/{total}")
    }

    /// Full record behind row `index`, visible or not.
    pub fn detail(&self, index: usize) -> Option<&LogRecord> {
        self.rows.get(index).map(|row| &row.record)
    }

    pub fn visible_records(&self) -> impl Iterator<Item = &LogRecord> {
        self.rows.iter().filter(|row| row.visible).map(|row| &row.record)
    }

    /// Page URL parameters for the current filter.
    pub fn query(&self, current: &QueryParams) -> QueryParams {
        query::serialize(current, &self.filter)
    }

    /// Settle a request made by this viewer. Rejections are kept as the
    /// notice until the next success.
    pub fn handle_response(&mut self, response: Response) -> Option<Value> {
        match response {
            Response::Resolved(value) => {
                self.notice = None;
                Some(value)
            }
            Response::Rejected(message) => {
                self.notice = Some(message);
                None
            }
        }
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }
}
