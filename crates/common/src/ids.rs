use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Typed wrapper for job UUIDs. Serialized as the textual UUID so the
/// canonical JSON payload carries a plain string id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<JobId> for Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Identity of a single worker task: `{hostname}-{pid}-{index}`.
///
/// Assigned once at worker spawn and stable for the worker's lifetime —
/// every processing-list and heartbeat key derives from it, so it is never
/// re-derived mid-run. Opaque to Redis; uniqueness across hosts is a
/// precondition of the key layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Build the id for worker task `index` in this process.
    pub fn for_task(index: u32) -> Self {
        let hostname = gethostname::gethostname()
            .into_string()
            .unwrap_or_else(|_| "unknown-host".into());
        Self::from_parts(&hostname, std::process::id(), index)
    }

    pub fn from_parts(hostname: &str, pid: u32, index: u32) -> Self {
        Self(format!("{}-{}-{}", hostname, pid, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_format() {
        let id = WorkerId::from_parts("build-03", 4211, 7);
        assert_eq!(id.as_str(), "build-03-4211-7");
    }

    #[test]
    fn test_worker_id_for_task_distinct_per_index() {
        let a = WorkerId::for_task(0);
        let b = WorkerId::for_task(1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
