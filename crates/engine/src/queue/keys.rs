use conveyor_common::config::WorkerConfig;
use conveyor_common::WorkerId;

/// Placeholder substituted with a worker id in per-worker key patterns.
pub const WORKER_ID_PLACEHOLDER: &str = "{worker_id}";

/// Rendered Redis key layout. Built once from validated configuration;
/// every component derives its keys from here instead of formatting ad hoc.
#[derive(Clone, Debug)]
pub struct KeySet {
    /// (priority, list key) in configured claim order, highest first.
    queues: Vec<(String, String)>,
    pub completed_list: String,
    pub dead_letter_list: String,
    processing_list_pattern: String,
    heartbeat_key_pattern: String,
}

impl KeySet {
    /// Requires a validated config: every priority present in `queues`,
    /// each pattern containing the placeholder exactly once.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let queues = config
            .priorities
            .iter()
            .filter_map(|p| config.queues.get(p).map(|key| (p.clone(), key.clone())))
            .collect();

        Self {
            queues,
            completed_list: config.completed_list.clone(),
            dead_letter_list: config.dead_letter_list.clone(),
            processing_list_pattern: config.processing_list_pattern.clone(),
            heartbeat_key_pattern: config.heartbeat_key_pattern.clone(),
        }
    }

    /// Priority lists in claim order.
    pub fn queues(&self) -> &[(String, String)] {
        &self.queues
    }

    /// The list key owning jobs of `priority`, if the priority is known.
    pub fn queue_for(&self, priority: &str) -> Option<&str> {
        self.queues
            .iter()
            .find(|(p, _)| p == priority)
            .map(|(_, key)| key.as_str())
    }

    pub fn processing_list(&self, worker: &WorkerId) -> String {
        self.processing_list_pattern
            .replace(WORKER_ID_PLACEHOLDER, worker.as_str())
    }

    pub fn heartbeat_key(&self, worker: &WorkerId) -> String {
        self.heartbeat_key_pattern
            .replace(WORKER_ID_PLACEHOLDER, worker.as_str())
    }

    /// Heartbeat key for a worker id recovered from a processing-list key.
    pub fn heartbeat_key_for(&self, worker_id: &str) -> String {
        self.heartbeat_key_pattern
            .replace(WORKER_ID_PLACEHOLDER, worker_id)
    }

    /// SCAN pattern matching every worker's processing list.
    pub fn processing_scan_pattern(&self) -> String {
        self.processing_list_pattern
            .replace(WORKER_ID_PLACEHOLDER, "*")
    }

    /// Recover the worker id embedded in a processing-list key, or `None`
    /// when the key does not match the configured pattern.
    pub fn worker_id_from_processing_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        let (prefix, suffix) = self.processing_list_pattern.split_once(WORKER_ID_PLACEHOLDER)?;
        let id = key.strip_prefix(prefix)?.strip_suffix(suffix)?;
        (!id.is_empty()).then_some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_set() -> KeySet {
        KeySet::from_config(&WorkerConfig::default())
    }

    #[test]
    fn test_queue_order_follows_priorities() {
        let keys = key_set();
        let order: Vec<&str> = keys.queues().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(order, vec!["high", "low"]);
        assert_eq!(keys.queue_for("high"), Some("jobqueue:high_priority"));
        assert_eq!(keys.queue_for("archive"), None);
    }

    #[test]
    fn test_per_worker_keys_render_placeholder() {
        let keys = key_set();
        let worker = WorkerId::from_parts("node-a", 100, 2);
        assert_eq!(
            keys.processing_list(&worker),
            "jobqueue:worker:node-a-100-2:processing"
        );
        assert_eq!(
            keys.heartbeat_key(&worker),
            "jobqueue:processing:worker:node-a-100-2"
        );
    }

    #[test]
    fn test_worker_id_round_trips_through_key() {
        let keys = key_set();
        let worker = WorkerId::from_parts("node-b", 7, 0);
        let list_key = keys.processing_list(&worker);
        assert_eq!(
            keys.worker_id_from_processing_key(&list_key),
            Some(worker.as_str())
        );
    }

    #[test]
    fn test_foreign_keys_do_not_parse() {
        let keys = key_set();
        assert_eq!(keys.worker_id_from_processing_key("jobqueue:completed"), None);
        assert_eq!(
            keys.worker_id_from_processing_key("jobqueue:worker::processing"),
            None
        );
    }

    #[test]
    fn test_scan_pattern_wildcards_worker_id() {
        assert_eq!(
            key_set().processing_scan_pattern(),
            "jobqueue:worker:*:processing"
        );
    }
}
