use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::JobId;

/// A file-processing job. The serialized JSON form of this struct is the
/// canonical wire payload stored in every Redis list.
///
/// The record is immutable by reference and mutable by version: a retry
/// re-encodes a copy with `retries` incremented, while the original byte
/// sequence stays untouched for exact-removal from the processing list.
/// Fields this version does not know about are preserved across a
/// decode/encode cycle via `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque to the core; carried for the processor.
    pub filepath: String,
    pub filesize: u64,
    /// Priority tag from the configured set. Owns the job's priority list at
    /// enqueue and on retry, and routes reaper rescues.
    pub priority: String,
    /// Number of prior failed attempts. Incremented before requeue.
    pub retries: u32,
    /// RFC3339 with nanosecond precision.
    pub creation_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Unknown fields from the encoded form, kept for forward compatibility.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Job {
    pub fn new(filepath: String, filesize: u64, priority: String) -> Self {
        Self {
            id: JobId::new(),
            filepath,
            filesize,
            priority,
            retries: 0,
            creation_time: Utc::now(),
            trace_id: None,
            span_id: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_field() {
        let mut job = Job::new("/data/in/report.pdf".into(), 48_213, "high".into());
        job.retries = 2;
        job.trace_id = Some("0af7651916cd43dd8448eb211c80319c".into());
        job.span_id = Some("b7ad6b7169203331".into());

        let encoded = job.to_json().unwrap();
        let decoded = Job::from_json(&encoded).unwrap();
        assert_eq!(job, decoded);
    }

    #[test]
    fn test_unknown_fields_survive_decode_encode() {
        let payload = r#"{
            "id": "7f1b6e9e-64cf-4f3a-9c12-0b8a33e9d001",
            "filepath": "/data/in/a.csv",
            "filesize": 10,
            "priority": "low",
            "retries": 0,
            "creation_time": "2026-08-01T09:30:00.000000001Z",
            "shard_hint": "eu-west-1",
            "owner": {"team": "ingest"}
        }"#;

        let job = Job::from_json(payload).unwrap();
        assert_eq!(job.extra.get("shard_hint").unwrap(), "eu-west-1");

        let re_encoded = job.to_json().unwrap();
        let value: Value = serde_json::from_str(&re_encoded).unwrap();
        assert_eq!(value["shard_hint"], "eu-west-1");
        assert_eq!(value["owner"]["team"], "ingest");
    }

    #[test]
    fn test_optional_trace_fields_omitted_when_absent() {
        let job = Job::new("/data/in/b.bin".into(), 1, "low".into());
        let encoded = job.to_json().unwrap();
        assert!(!encoded.contains("trace_id"));
        assert!(!encoded.contains("span_id"));
    }

    #[test]
    fn test_creation_time_is_rfc3339() {
        let job = Job::new("/data/in/c.txt".into(), 0, "high".into());
        let value: Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();
        let ts = value["creation_time"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
