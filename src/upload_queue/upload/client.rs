//! HTTP forwarding of parsed clock entries.

use super::retry::UploadFailure;
use crate::error::BridgeError;
use crate::models::ClockEntry;
use crate::upload_queue::types::{UploadItem, UploadTarget};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const PAYLOAD_SOURCE: &str = "hikibridge";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload<'a> {
    pub source: &'static str,
    pub file_name: &'a str,
    pub file_hash: &'a str,
    pub records: &'a [ClockEntry],
}

impl<'a> From<&'a UploadItem> for UploadPayload<'a> {
    fn from(item: &'a UploadItem) -> Self {
        Self {
            source: PAYLOAD_SOURCE,
            file_name: &item.file_name,
            file_hash: &item.file_hash,
            records: &item.entries,
        }
    }
}

/// Shared HTTP client for all uploads
#[derive(Debug, Clone)]
pub struct Uploader {
    client: reqwest::Client,
}

impl Uploader {
    pub fn new(timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hikibridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// POST the item's records; any 2xx counts as delivered
    pub async fn upload(
        &self,
        item: &UploadItem,
        target: &UploadTarget,
    ) -> Result<(), UploadFailure> {
        let payload = UploadPayload::from(item);

        let response = self
            .client
            .post(&target.endpoint)
            .header("Authorization", format!("Bearer {}", target.api_key))
            .header("X-API-Key", &target.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| UploadFailure::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            debug!(file = %item.file_name, %status, "Endpoint accepted records");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(UploadFailure::from_status(status, &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use crate::upload_queue::upload::ErrorType;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn sample_item() -> UploadItem {
        let timestamp = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        UploadItem::new(
            PathBuf::from("/exports/day1.csv"),
            "day1.csv".to_string(),
            "abc123".to_string(),
            vec![ClockEntry {
                terminal_id: "T1".to_string(),
                employee_id: "E7".to_string(),
                timestamp,
                event_type: EventType::CheckIn,
                source_row: 2,
            }],
            0,
        )
    }

    #[test]
    fn test_payload_shape() {
        let item = sample_item();
        let json = serde_json::to_value(UploadPayload::from(&item)).unwrap();

        assert_eq!(json["source"], "hikibridge");
        assert_eq!(json["fileName"], "day1.csv");
        assert_eq!(json["fileHash"], "abc123");
        assert_eq!(json["records"][0]["terminalId"], "T1");
        assert_eq!(json["records"][0]["employeeId"], "E7");
        assert_eq!(json["records"][0]["timestamp"], "2024-03-01T08:00:00");
        assert_eq!(json["records"][0]["eventType"], "check_in");
        assert!(json["records"][0].get("sourceRow").is_none());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_not_retried() {
        let uploader = Uploader::new(Duration::from_secs(1)).unwrap();
        let target = UploadTarget {
            endpoint: "not a url".to_string(),
            api_key: "k".to_string(),
        };

        let failure = uploader.upload(&sample_item(), &target).await.unwrap_err();
        assert_eq!(failure.error_type, ErrorType::Client);
    }
}
