//! URL query encoding of [`FilterState`] for shareable, reload-safe views.
//!
//! ```text
//! id=["ext1@x"]&viewType=["undefined","popup"]&type=[]&name=[]
//!     &timeStamp=["1700000000000",null]&keyword=cookie&tabId=12
//! ```
//!
//! Exclude sets are JSON arrays. `viewType` uses the `"undefined"` sentinel
//! for records without a view type. Unrelated parameters are preserved.

use serde_json::Value;
use tracing::trace;
use url::form_urlencoded;

use super::{ExcludeFilter, FilterState, TimeRange};
use crate::record::{ActivityType, ViewType};

pub const PARAM_ID: &str = "id";
pub const PARAM_VIEW_TYPE: &str = "viewType";
pub const PARAM_TYPE: &str = "type";
pub const PARAM_NAME: &str = "name";
pub const PARAM_TIME_STAMP: &str = "timeStamp";
pub const PARAM_KEYWORD: &str = "keyword";
pub const PARAM_TAB_ID: &str = "tabId";
/// Names the file a loaded (non-live) view was opened from.
pub const PARAM_FILE: &str = "file";

const UNDEFINED_VIEW_TYPE: &str = "undefined";

/// Ordered query-string parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a query string, with or without the leading `?`.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            pairs: form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, keeping its position when it already exists.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.pairs.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
            self.pairs.retain({
                let mut seen = false;
                move |(k, _)| {
                    if k != key {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                }
            });
        } else {
            self.pairs.push((key.to_string(), value));
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.pairs.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encode as `application/x-www-form-urlencoded`, without a leading `?`.
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

/// Write `filter` into a copy of `current`.
pub fn serialize(current: &QueryParams, filter: &FilterState) -> QueryParams {
    let mut params = current.clone();

    params.set(PARAM_ID, encode_set(filter.id.exclude.iter().map(String::as_str)));
    params.set(
        PARAM_VIEW_TYPE,
        encode_set(filter.view_type.exclude.iter().map(|view| match view {
            Some(view) => view.as_str(),
            None => UNDEFINED_VIEW_TYPE,
        })),
    );
    params.set(PARAM_TYPE, encode_set(filter.kind.exclude.iter().map(|k| k.as_str())));
    params.set(PARAM_NAME, encode_set(filter.name.exclude.iter().map(String::as_str)));

    match &filter.time_stamp {
        Some(range) => {
            let bounds = [range.start, range.stop].map(|b| match b {
                Some(ms) => Value::String(ms.to_string()),
                None => Value::Null,
            });
            params.set(PARAM_TIME_STAMP, Value::Array(bounds.to_vec()).to_string());
        }
        None => params.remove(PARAM_TIME_STAMP),
    }

    params.set(PARAM_KEYWORD, filter.keyword.clone());

    match filter.tab_id {
        Some(tab_id) => params.set(PARAM_TAB_ID, tab_id.to_string()),
        None => params.remove(PARAM_TAB_ID),
    }

    params
}

/// Read a [`FilterState`] back. Absent or unparsable keys take defaults.
pub fn deserialize(params: &QueryParams) -> FilterState {
    FilterState {
        id: ExcludeFilter::excluding(decode_set(params, PARAM_ID)),
        view_type: ExcludeFilter::excluding(decode_view_types(params)),
        kind: ExcludeFilter::excluding(
            decode_set(params, PARAM_TYPE)
                .into_iter()
                .filter_map(|s| s.parse::<ActivityType>().ok()),
        ),
        name: ExcludeFilter::excluding(decode_set(params, PARAM_NAME)),
        keyword: params.get(PARAM_KEYWORD).unwrap_or_default().to_string(),
        time_stamp: params.get(PARAM_TIME_STAMP).and_then(decode_time_range),
        tab_id: params
            .get(PARAM_TAB_ID)
            .and_then(|raw| raw.trim().parse::<i64>().ok()),
    }
}

fn encode_set<'a>(values: impl Iterator<Item = &'a str>) -> String {
    Value::Array(values.map(|v| Value::String(v.to_string())).collect()).to_string()
}

fn decode_array(params: &QueryParams, key: &str) -> Vec<Value> {
    let Some(raw) = params.get(key) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(values) => values,
        Err(e) => {
            trace!(key, error = %e, "Ignoring malformed filter parameter");
            Vec::new()
        }
    }
}

fn decode_set(params: &QueryParams, key: &str) -> Vec<String> {
    decode_array(params, key)
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn decode_view_types(params: &QueryParams) -> Vec<Option<ViewType>> {
    decode_array(params, PARAM_VIEW_TYPE)
        .into_iter()
        .filter_map(|v| match v {
            Value::Null => Some(None),
            Value::String(s) if s == UNDEFINED_VIEW_TYPE => Some(None),
            Value::String(s) => s.parse::<ViewType>().ok().map(Some),
            _ => None,
        })
        .collect()
}

fn decode_time_range(raw: &str) -> Option<TimeRange> {
    let bounds: Vec<Value> = serde_json::from_str(raw).ok()?;
    let [start, stop] = bounds.as_slice() else {
        return None;
    };
    Some(TimeRange {
        start: decode_bound(start),
        stop: decode_bound(stop),
    })
}

fn decode_bound(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}
