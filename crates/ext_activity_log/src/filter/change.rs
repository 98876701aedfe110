//! Change events emitted by a viewer's filter controls.
//!
//! Each control owns one filter key. Discovering a value not seen before
//! only adds a checkbox option; a user edit replaces that key's value and
//! forces every rendered row to be re-evaluated.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{ExcludeFilter, FilterPatch, TimeRange};
use crate::record::{ActivityType, LogRecord, ViewType};

/// New value for exactly one filter key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "camelCase")]
pub enum FilterValue {
    Id(ExcludeFilter<String>),
    ViewType(ExcludeFilter<Option<ViewType>>),
    #[serde(rename = "type")]
    Type(ExcludeFilter<ActivityType>),
    Name(ExcludeFilter<String>),
    Keyword(String),
    TimeStamp(Option<TimeRange>),
    TabId(Option<i64>),
}

impl From<FilterValue> for FilterPatch {
    fn from(value: FilterValue) -> Self {
        let mut patch = FilterPatch::default();
        match value {
            FilterValue::Id(v) => patch.id = Some(v),
            FilterValue::ViewType(v) => patch.view_type = Some(v),
            FilterValue::Type(v) => patch.kind = Some(v),
            FilterValue::Name(v) => patch.name = Some(v),
            FilterValue::Keyword(v) => patch.keyword = Some(v),
            FilterValue::TimeStamp(v) => patch.time_stamp = Some(v),
            FilterValue::TabId(v) => patch.tab_id = Some(v),
        }
        patch
    }
}

/// A checkbox option for one of the exclude filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "camelCase")]
pub enum FilterOption {
    Id(String),
    ViewType(Option<ViewType>),
    #[serde(rename = "type")]
    Type(ActivityType),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum FilterEvent {
    /// A value showed up that has no checkbox yet.
    OptionDiscovered { option: FilterOption },
    /// The user edited one filter.
    Changed { value: FilterValue },
}

/// What a viewer did in response to a [`FilterEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Only the available options changed; rows were left alone.
    OptionsUpdated,
    /// Every row was re-evaluated.
    Refiltered { visible: usize, total: usize },
}

/// Checkbox options known to a viewer, per exclude filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    pub id: BTreeSet<String>,
    pub view_type: BTreeSet<Option<ViewType>>,
    pub kind: BTreeSet<ActivityType>,
    pub name: BTreeSet<String>,
}

impl FilterOptions {
    /// Options `record` would add, without registering them.
    pub fn discover(&self, record: &LogRecord) -> Vec<FilterOption> {
        let mut found = Vec::new();
        if !self.id.contains(&record.id) {
            found.push(FilterOption::Id(record.id.clone()));
        }
        if !self.view_type.contains(&record.view_type) {
            found.push(FilterOption::ViewType(record.view_type));
        }
        if !self.kind.contains(&record.kind) {
            found.push(FilterOption::Type(record.kind));
        }
        // Script URLs are not offered as name options.
        if record.kind != ActivityType::ContentScript && !self.name.contains(&record.name) {
            found.push(FilterOption::Name(record.name.clone()));
        }
        found
    }

    /// Returns false when the option was already known.
    pub fn insert(&mut self, option: FilterOption) -> bool {
        match option {
            FilterOption::Id(v) => self.id.insert(v),
            FilterOption::ViewType(v) => self.view_type.insert(v),
            FilterOption::Type(v) => self.kind.insert(v),
            FilterOption::Name(v) => self.name.insert(v),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_becomes_single_key_patch() {
        let patch: FilterPatch = FilterValue::TabId(None).into();
        assert_eq!(
            patch,
            FilterPatch {
                tab_id: Some(None),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_discover_skips_known_options_and_script_names() {
        let mut options = FilterOptions::default();
        let record = LogRecord {
            id: "a".into(),
            time_stamp: 0,
            kind: ActivityType::ContentScript,
            name: "moz-extension://a/inject.js".into(),
            view_type: None,
            data: json!(null),
        };
        let found = options.discover(&record);
        assert_eq!(
            found,
            vec![
                FilterOption::Id("a".into()),
                FilterOption::ViewType(None),
                FilterOption::Type(ActivityType::ContentScript),
            ]
        );
        for option in found {
            assert!(options.insert(option));
        }
        assert!(options.discover(&record).is_empty());
    }

    #[test]
    fn test_event_wire_shape() {
        let event: FilterEvent = serde_json::from_value(json!({
            "event": "changed",
            "value": {"key": "type", "value": {"exclude": ["api_call"]}}
        }))
        .unwrap();
        assert_eq!(
            event,
            FilterEvent::Changed {
                value: FilterValue::Type(ExcludeFilter::excluding([ActivityType::ApiCall]))
            }
        );
    }
}
