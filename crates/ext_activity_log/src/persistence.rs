//! Export of the log buffer as a download, and import of saved files.
//!
//! The file format is a UTF-8 JSON array of [`LogRecord`] objects, the same
//! shape in both directions.

use tracing::{debug, warn};

use crate::error::ActivityError;
use crate::host::{ActivityHost, DownloadId, DownloadRequest, DownloadState};
use crate::record::{ActivityEvent, LogRecord};

pub const EXPORT_MIME_TYPE: &str = "application/json";

pub fn to_json(logs: &[LogRecord]) -> Result<String, ActivityError> {
    serde_json::to_string(logs).map_err(|e| ActivityError::save(e.to_string()))
}

/// Offer `logs` as a download and wait for the host to report a terminal
/// state for it. No timeout is applied; downloads may wait on the user.
pub async fn export_all(
    host: &dyn ActivityHost,
    logs: &[LogRecord],
    filename: &str,
) -> Result<DownloadId, ActivityError> {
    let body = to_json(logs)?;
    // Subscribe first so a fast completion is not missed.
    let mut changes = host.watch_downloads();

    let id = host
        .download(DownloadRequest {
            filename: filename.to_string(),
            mime_type: EXPORT_MIME_TYPE.to_string(),
            body,
        })
        .await
        .map_err(|e| ActivityError::save(e.to_string()))?;

    debug!(download_id = id, records = logs.len(), filename, "Export started");

    while let Some(delta) = changes.recv().await {
        if delta.id != id {
            continue;
        }
        if let Some(error) = delta.error {
            warn!(download_id = id, %error, "Export failed");
            return Err(ActivityError::save(error));
        }
        if delta.state == Some(DownloadState::Complete) {
            debug!(download_id = id, "Export complete");
            return Ok(id);
        }
    }

    Err(ActivityError::save(
        "download watcher closed before completion",
    ))
}

/// Parse a saved file. Timestamps are normalized like live events; a record
/// whose timestamp is not a time makes the whole file invalid.
pub fn import_file(text: &str) -> Result<Vec<LogRecord>, ActivityError> {
    let events: Vec<ActivityEvent> =
        serde_json::from_str(text).map_err(|e| ActivityError::parse(e.to_string()))?;

    events
        .into_iter()
        .enumerate()
        .map(|(index, event)| {
            let ts = event.time_stamp.to_epoch_millis().ok_or_else(|| {
                ActivityError::parse(format!("record {index}: invalid timeStamp"))
            })?;
            Ok(event.into_record(ts))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DownloadDelta;
    use crate::record::{ActivityType, ViewType};
    use crate::testing::MockHost;
    use serde_json::json;

    fn sample() -> Vec<LogRecord> {
        vec![LogRecord {
            id: "ext@example".into(),
            time_stamp: 1_700_000_000_000,
            kind: ActivityType::ApiCall,
            name: "storage.local.get".into(),
            view_type: Some(ViewType::Background),
            data: json!({"args": ["key"], "result": {"key": 1}}),
        }]
    }

    #[test]
    fn test_import_reads_export_output() {
        let logs = sample();
        let text = to_json(&logs).unwrap();
        assert_eq!(import_file(&text).unwrap(), logs);
    }

    #[test]
    fn test_import_rejects_non_json_and_wrong_shape() {
        for text in ["not json", r#"{"id":"x"}"#, r#"[{"id":"x"}]"#, "[1,2]"] {
            let err = import_file(text).unwrap_err();
            assert_eq!(err.code(), 9904, "{text}");
        }
    }

    #[test]
    fn test_import_rejects_bad_timestamp() {
        let text = r#"[{"id":"x","timeStamp":"never","type":"api_call","name":"n"}]"#;
        let err = import_file(text).unwrap_err();
        assert!(err.to_string().contains("record 0"));
    }

    #[test]
    fn test_export_keeps_data_key_order() {
        let text = r#"[{"id":"a","timeStamp":1,"type":"api_call","name":"n","data":{"url":"u","method":"GET"}}]"#;
        let logs = import_file(text).unwrap();
        assert_eq!(to_json(&logs).unwrap(), text);
    }

    #[test]
    fn test_import_empty_array() {
        assert!(import_file("[]").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_resolves_on_matching_completion() {
        let host = MockHost::new("monitor@self");
        host.set_download_outcome(DownloadDelta {
            id: 0,
            state: Some(DownloadState::Complete),
            error: None,
        });

        let id = export_all(&host, &sample(), "activitylogs.json").await.unwrap();

        let downloads = host.downloads();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].filename, "activitylogs.json");
        assert_eq!(import_file(&downloads[0].body).unwrap(), sample());
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_export_rejects_with_download_error() {
        let host = MockHost::new("monitor@self");
        host.set_download_outcome(DownloadDelta {
            id: 0,
            state: Some(DownloadState::Interrupted),
            error: Some("FILE_NO_SPACE".into()),
        });

        let err = export_all(&host, &sample(), "activitylogs.json")
            .await
            .unwrap_err();
        assert_eq!(err.code(), 9905);
        assert!(err.to_string().contains("FILE_NO_SPACE"));
    }
}
