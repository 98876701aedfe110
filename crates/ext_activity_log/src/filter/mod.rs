//! Viewer-side filtering of activity records.
//!
//! A [`FilterState`] is a conjunction of seven predicates. Records pass when
//! they survive all of them:
//!
//! | Predicate | Excludes when |
//! |-----------|---------------|
//! | `id` | source extension id is in the exclude set |
//! | `viewType` | view type is in the exclude set (not for `content_script`) |
//! | `type` | activity type is in the exclude set |
//! | `name` | API name / script URL is in the exclude set (not for `content_script`) |
//! | `keyword` | JSON text of `data` does not contain the keyword |
//! | `timeStamp` | `ts < start` or `ts > stop` (bounds inclusive) |
//! | `tabId` | `data.tabId` differs from the pinned tab |
//!
//! Filter state is mirrored in the viewer page URL, see [`query`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::record::{ActivityType, LogRecord, ViewType};

pub mod change;
pub mod query;

pub use change::{FilterEvent, FilterOption, FilterOutcome, FilterValue};
pub use query::QueryParams;

/// Values whose records are hidden. Absence means shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: Deserialize<'de> + Ord"
))]
pub struct ExcludeFilter<T: Ord> {
    #[serde(default)]
    pub exclude: BTreeSet<T>,
}

impl<T: Ord> Default for ExcludeFilter<T> {
    fn default() -> Self {
        Self {
            exclude: BTreeSet::new(),
        }
    }
}

impl<T: Ord> ExcludeFilter<T> {
    pub fn excluding(values: impl IntoIterator<Item = T>) -> Self {
        Self {
            exclude: values.into_iter().collect(),
        }
    }

    pub fn allows(&self, value: &T) -> bool {
        !self.exclude.contains(value)
    }

    pub fn is_empty(&self) -> bool {
        self.exclude.is_empty()
    }
}

/// Inclusive timestamp window; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub stop: Option<i64>,
}

impl TimeRange {
    pub fn contains(&self, ts: i64) -> bool {
        if self.start.is_some_and(|start| ts < start) {
            return false;
        }
        if self.stop.is_some_and(|stop| ts > stop) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    #[serde(default)]
    pub id: ExcludeFilter<String>,
    #[serde(default)]
    pub view_type: ExcludeFilter<Option<ViewType>>,
    #[serde(default, rename = "type")]
    pub kind: ExcludeFilter<ActivityType>,
    #[serde(default)]
    pub name: ExcludeFilter<String>,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub time_stamp: Option<TimeRange>,
    #[serde(default)]
    pub tab_id: Option<i64>,
}

/// Per-key replacement for [`FilterState::set_filter`].
///
/// `time_stamp` and `tab_id` are doubly optional: the outer `None` leaves the
/// key untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPatch {
    pub id: Option<ExcludeFilter<String>>,
    pub view_type: Option<ExcludeFilter<Option<ViewType>>>,
    pub kind: Option<ExcludeFilter<ActivityType>>,
    pub name: Option<ExcludeFilter<String>>,
    pub keyword: Option<String>,
    pub time_stamp: Option<Option<TimeRange>>,
    pub tab_id: Option<Option<i64>>,
}

impl FilterState {
    /// Whether `record` passes every predicate.
    pub fn evaluate(&self, record: &LogRecord) -> bool {
        let injected = record.kind == ActivityType::ContentScript;

        if !self.id.allows(&record.id) {
            return false;
        }
        if !injected && !self.view_type.allows(&record.view_type) {
            return false;
        }
        if !self.kind.allows(&record.kind) {
            return false;
        }
        if !injected && !self.name.allows(&record.name) {
            return false;
        }
        if !self.keyword.is_empty() {
            let text = serde_json::to_string(&record.data).unwrap_or_default();
            if !text.contains(&self.keyword) {
                return false;
            }
        }
        if let Some(range) = &self.time_stamp {
            if !range.contains(record.time_stamp) {
                return false;
            }
        }
        if let Some(tab_id) = self.tab_id {
            if record.tab_id() != Some(tab_id) {
                return false;
            }
        }
        true
    }

    /// Replace each provided key wholesale. Exclude sets are never unioned.
    pub fn set_filter(&mut self, patch: FilterPatch) {
        if let Some(id) = patch.id {
            self.id = id;
        }
        if let Some(view_type) = patch.view_type {
            self.view_type = view_type;
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(keyword) = patch.keyword {
            self.keyword = keyword;
        }
        if let Some(time_stamp) = patch.time_stamp {
            self.time_stamp = time_stamp;
        }
        if let Some(tab_id) = patch.tab_id {
            self.tab_id = tab_id;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, kind: ActivityType, view_type: Option<ViewType>) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            time_stamp: 1_000,
            kind,
            name: "tabs.create".to_string(),
            view_type,
            data: json!({"args": [{"url": "https://example.com"}]}),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = FilterState::default();
        assert!(filter.is_empty());
        for kind in ActivityType::ALL {
            assert!(filter.evaluate(&record("x", kind, Some(ViewType::Popup))));
            assert!(filter.evaluate(&record("x", kind, None)));
        }
    }

    #[test]
    fn test_id_exclusion() {
        let mut filter = FilterState::default();
        filter.id = ExcludeFilter::excluding(["a".to_string()]);
        let logs = [
            record("a", ActivityType::ApiCall, Some(ViewType::Background)),
            record("b", ActivityType::ApiCall, Some(ViewType::Background)),
        ];
        assert!(!filter.evaluate(&logs[0]));
        assert!(filter.evaluate(&logs[1]));
    }

    #[test]
    fn test_content_script_bypasses_view_type_and_name() {
        let mut filter = FilterState::default();
        filter.view_type = ExcludeFilter::excluding([None, Some(ViewType::Tab)]);
        filter.name = ExcludeFilter::excluding(["tabs.create".to_string()]);

        let injected = record("x", ActivityType::ContentScript, None);
        assert!(filter.evaluate(&injected));

        let call = record("x", ActivityType::ApiCall, Some(ViewType::Tab));
        assert!(!filter.evaluate(&call));

        let user_script = record("x", ActivityType::UserScript, None);
        assert!(!filter.evaluate(&user_script));
    }

    #[test]
    fn test_type_exclusion_applies_to_content_scripts() {
        let mut filter = FilterState::default();
        filter.kind = ExcludeFilter::excluding([ActivityType::ContentScript]);
        assert!(!filter.evaluate(&record("x", ActivityType::ContentScript, None)));
        assert!(filter.evaluate(&record("x", ActivityType::ApiEvent, None)));
    }

    #[test]
    fn test_keyword_substring() {
        let mut filter = FilterState::default();
        filter.keyword = "matched@data".to_string();

        let mut hit = record("x", ActivityType::ApiCall, None);
        hit.data = json!({"args": ["user matched@data here"]});
        let miss = record("x", ActivityType::ApiCall, None);

        assert!(filter.evaluate(&hit));
        assert!(!filter.evaluate(&miss));
    }

    #[test]
    fn test_keyword_matches_source_key_order() {
        let mut filter = FilterState::default();
        filter.keyword = r#""https://a.test","method""#.to_string();

        let mut r = record("x", ActivityType::ApiCall, None);
        r.data = serde_json::from_str(r#"{"url":"https://a.test","method":"GET"}"#).unwrap();
        assert!(filter.evaluate(&r));

        r.data = serde_json::from_str(r#"{"method":"GET","url":"https://a.test"}"#).unwrap();
        assert!(!filter.evaluate(&r));
    }

    #[test]
    fn test_time_range_bounds_are_inclusive() {
        let mut filter = FilterState::default();
        filter.time_stamp = Some(TimeRange {
            start: Some(1_000),
            stop: Some(2_000),
        });
        let mut r = record("x", ActivityType::ApiCall, None);
        for (ts, expected) in [(999, false), (1_000, true), (2_000, true), (2_001, false)] {
            r.time_stamp = ts;
            assert_eq!(filter.evaluate(&r), expected, "ts {ts}");
        }

        filter.time_stamp = Some(TimeRange {
            start: None,
            stop: Some(1_500),
        });
        r.time_stamp = i64::MIN;
        assert!(filter.evaluate(&r));
    }

    #[test]
    fn test_tab_pin() {
        let mut filter = FilterState::default();
        filter.tab_id = Some(4);
        let mut r = record("x", ActivityType::ContentScript, None);
        r.data = json!({"tabId": 4});
        assert!(filter.evaluate(&r));
        r.data = json!({"tabId": 5});
        assert!(!filter.evaluate(&r));
        r.data = json!({});
        assert!(!filter.evaluate(&r));
    }

    #[test]
    fn test_set_filter_replaces_instead_of_merging() {
        let mut filter = FilterState::default();
        filter.id = ExcludeFilter::excluding(["a".to_string(), "b".to_string()]);
        filter.keyword = "kept".to_string();

        filter.set_filter(FilterPatch {
            id: Some(ExcludeFilter::excluding(["c".to_string()])),
            ..Default::default()
        });

        assert_eq!(filter.id, ExcludeFilter::excluding(["c".to_string()]));
        assert_eq!(filter.keyword, "kept");
    }

    #[test]
    fn test_set_filter_clears_nullable_keys() {
        let mut filter = FilterState {
            tab_id: Some(3),
            time_stamp: Some(TimeRange::default()),
            ..Default::default()
        };
        filter.set_filter(FilterPatch {
            tab_id: Some(None),
            ..Default::default()
        });
        assert_eq!(filter.tab_id, None);
        assert!(filter.time_stamp.is_some());
    }
}
