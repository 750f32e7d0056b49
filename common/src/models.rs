// Core data models for scan scheduling

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// An endpoint that is eligible for a scan, as projected from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCandidate {
    pub endpoint_id: String,
    pub org_id: String,
    pub name: String,
    pub provider: String,
    pub region: Option<String>,
    /// `None` means the endpoint has never been scanned
    pub last_scanned_at: Option<DateTime<Utc>>,
}

impl ScanCandidate {
    /// Eligibility rule: never scanned, or last scanned more than `threshold` ago.
    pub fn is_due(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.last_scanned_at {
            None => true,
            Some(scanned_at) => now - scanned_at > threshold,
        }
    }

    /// Oldest-scanned-first ordering with never-scanned endpoints first.
    ///
    /// Ties are broken on `endpoint_id` so the order is total.
    pub fn staleness_order(a: &ScanCandidate, b: &ScanCandidate) -> Ordering {
        // Option orders None before Some, which is exactly "nulls first"
        a.last_scanned_at
            .cmp(&b.last_scanned_at)
            .then_with(|| a.endpoint_id.cmp(&b.endpoint_id))
    }
}

/// Message body handed to the scan queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJobMessage {
    pub org_id: String,
    pub endpoint_id: String,
    /// Issuance time of this message, not the endpoint's last scan time
    pub timestamp: DateTime<Utc>,
}

impl ScanJobMessage {
    pub fn for_candidate(candidate: &ScanCandidate, issued_at: DateTime<Utc>) -> Self {
        Self {
            org_id: candidate.org_id.clone(),
            endpoint_id: candidate.endpoint_id.clone(),
            timestamp: issued_at,
        }
    }

    /// Serialize to the JSON wire body
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Identifier assigned by the queue transport to an accepted message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Counters for one detect-then-dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Candidates returned by the detector
    pub found: usize,
    /// Candidates whose message the transport accepted
    pub queued: usize,
    /// Candidates whose publish failed
    pub skipped: usize,
    /// Candidates left untouched because shutdown was requested mid-cycle
    pub not_attempted: usize,
    /// The cycle aborted because the store was unavailable
    pub store_failed: bool,
}

impl CycleSummary {
    pub fn store_failure() -> Self {
        Self {
            store_failed: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(id: &str, last_scanned_at: Option<DateTime<Utc>>) -> ScanCandidate {
        ScanCandidate {
            endpoint_id: id.to_string(),
            org_id: "org-1".to_string(),
            name: format!("bucket-{}", id),
            provider: "aws".to_string(),
            region: Some("us-east-1".to_string()),
            last_scanned_at,
        }
    }

    #[test]
    fn test_never_scanned_is_due() {
        let now = Utc::now();
        assert!(candidate("E1", None).is_due(now, Duration::hours(24)));
    }

    #[test]
    fn test_recently_scanned_is_not_due() {
        let now = Utc::now();
        let c = candidate("E3", Some(now - Duration::hours(1)));
        assert!(!c.is_due(now, Duration::hours(24)));
    }

    #[test]
    fn test_exactly_at_threshold_is_not_due() {
        let now = Utc::now();
        let c = candidate("E4", Some(now - Duration::hours(24)));
        assert!(!c.is_due(now, Duration::hours(24)));
    }

    #[test]
    fn test_staleness_order_nulls_first_then_oldest() {
        let now = Utc::now();
        let mut list = vec![
            candidate("B", Some(now - Duration::hours(30))),
            candidate("C", None),
            candidate("A", Some(now - Duration::hours(48))),
        ];
        list.sort_by(ScanCandidate::staleness_order);
        let ids: Vec<&str> = list.iter().map(|c| c.endpoint_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_message_json_shape() {
        let issued = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let message = ScanJobMessage::for_candidate(&candidate("E1", None), issued);
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert_eq!(value["org_id"], "org-1");
        assert_eq!(value["endpoint_id"], "E1");
        let ts = value["timestamp"].as_str().unwrap();
        assert!(ts.starts_with("2024-05-01T12:30:00"));
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_message_timestamp_is_issue_time_not_scan_time() {
        let scanned = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let issued = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let message = ScanJobMessage::for_candidate(&candidate("E2", Some(scanned)), issued);
        assert_eq!(message.timestamp, issued);
    }
}
