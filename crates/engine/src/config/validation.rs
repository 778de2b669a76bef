use conveyor_common::config::ConveyorConfig;

use super::loader::ConfigError;
use crate::queue::WORKER_ID_PLACEHOLDER;

/// Validate the complete configuration.
///
/// Collects every violation rather than stopping at the first, so a broken
/// deployment surfaces all of its mistakes in one startup error.
pub fn validate(config: &ConveyorConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_redis(config, &mut errors);
    validate_worker(config, &mut errors);
    validate_producer(config, &mut errors);
    validate_breaker(config, &mut errors);
    validate_reaper(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

fn validate_redis(config: &ConveyorConfig, errors: &mut Vec<String>) {
    let r = &config.redis;

    if r.addr.is_empty() {
        errors.push("redis.addr must not be empty".into());
    }
    if r.pool_size_multiplier == 0 {
        errors.push("redis.pool_size_multiplier must be > 0".into());
    }
    if r.dial_timeout_ms == 0 {
        errors.push("redis.dial_timeout_ms must be > 0".into());
    }
    if r.read_timeout_ms == 0 {
        errors.push("redis.read_timeout_ms must be > 0".into());
    }
    if r.write_timeout_ms == 0 {
        errors.push("redis.write_timeout_ms must be > 0".into());
    }
}

fn validate_worker(config: &ConveyorConfig, errors: &mut Vec<String>) {
    let w = &config.worker;

    if w.count == 0 {
        errors.push("worker.count must be >= 1".into());
    }
    if w.heartbeat_ttl_seconds < 5 {
        errors.push("worker.heartbeat_ttl_seconds must be >= 5".into());
    }
    if w.backoff_base_ms == 0 {
        errors.push("worker.backoff_base_ms must be > 0".into());
    }
    if w.backoff_max_ms < w.backoff_base_ms {
        errors.push("worker.backoff_max_ms must be >= backoff_base_ms".into());
    }
    if w.priorities.is_empty() {
        errors.push("worker.priorities must not be empty".into());
    }
    for priority in &w.priorities {
        if !w.queues.contains_key(priority) {
            errors.push(format!(
                "worker.queues is missing an entry for priority '{}'",
                priority
            ));
        }
    }
    validate_pattern(&w.processing_list_pattern, "worker.processing_list_pattern", errors);
    validate_pattern(&w.heartbeat_key_pattern, "worker.heartbeat_key_pattern", errors);
    if w.completed_list.is_empty() {
        errors.push("worker.completed_list must not be empty".into());
    }
    if w.dead_letter_list.is_empty() {
        errors.push("worker.dead_letter_list must not be empty".into());
    }
    if w.per_queue_timeout_ms == 0 {
        errors.push("worker.per_queue_timeout_ms must be > 0".into());
    }
    // The reaper must never see a heartbeat expire while its worker is
    // merely blocked in a claim.
    if w.per_queue_timeout_ms > w.heartbeat_ttl_seconds * 1000 / 2 {
        errors.push("worker.per_queue_timeout_ms must be <= heartbeat_ttl / 2".into());
    }
    if w.grace_deadline_seconds == 0 {
        errors.push("worker.grace_deadline_seconds must be > 0".into());
    }
}

fn validate_pattern(pattern: &str, name: &str, errors: &mut Vec<String>) {
    if pattern.matches(WORKER_ID_PLACEHOLDER).count() != 1 {
        errors.push(format!(
            "{} must contain the {} placeholder exactly once",
            name, WORKER_ID_PLACEHOLDER
        ));
    }
}

fn validate_producer(config: &ConveyorConfig, errors: &mut Vec<String>) {
    let p = &config.producer;

    if !config.worker.priorities.contains(&p.default_priority) {
        errors.push(format!(
            "producer.default_priority '{}' is not in worker.priorities",
            p.default_priority
        ));
    }
    if p.rate_limit_per_sec > 0 && p.rate_limit_key.is_empty() {
        errors.push("producer.rate_limit_key must not be empty when rate limiting".into());
    }
}

fn validate_breaker(config: &ConveyorConfig, errors: &mut Vec<String>) {
    let b = &config.breaker;

    if !(b.failure_threshold > 0.0 && b.failure_threshold < 1.0) {
        errors.push("breaker.failure_threshold must be in (0, 1)".into());
    }
    if b.window_seconds == 0 {
        errors.push("breaker.window_seconds must be > 0".into());
    }
    if b.cooldown_seconds == 0 {
        errors.push("breaker.cooldown_seconds must be > 0".into());
    }
    if b.min_samples == 0 {
        errors.push("breaker.min_samples must be >= 1".into());
    }
}

fn validate_reaper(config: &ConveyorConfig, errors: &mut Vec<String>) {
    let r = &config.reaper;

    if r.interval_seconds == 0 {
        errors.push("reaper.interval_seconds must be > 0".into());
    }
    if r.max_rescue_per_pass == 0 {
        errors.push("reaper.max_rescue_per_pass must be >= 1".into());
    }
    if r.scan_page_size == 0 {
        errors.push("reaper.scan_page_size must be >= 1".into());
    }
    if r.pass_budget_ms == 0 {
        errors.push("reaper.pass_budget_ms must be > 0".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&ConveyorConfig::default()).is_ok());
    }

    #[test]
    fn test_every_violation_is_reported_at_once() {
        let mut config = ConveyorConfig::default();
        config.worker.count = 0;
        config.worker.heartbeat_ttl_seconds = 2;
        config.worker.processing_list_pattern = "jobqueue:processing".into();
        config.breaker.failure_threshold = 1.5;
        config.reaper.scan_page_size = 0;

        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("worker.count"));
        assert!(err.contains("worker.heartbeat_ttl_seconds"));
        assert!(err.contains("worker.processing_list_pattern"));
        assert!(err.contains("breaker.failure_threshold"));
        assert!(err.contains("reaper.scan_page_size"));
    }

    #[test]
    fn test_per_queue_timeout_bound_by_heartbeat() {
        let mut config = ConveyorConfig::default();
        config.worker.heartbeat_ttl_seconds = 5;
        config.worker.per_queue_timeout_ms = 2500;
        assert!(validate(&config).is_ok());

        config.worker.per_queue_timeout_ms = 2501;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("per_queue_timeout_ms"));
    }

    #[test]
    fn test_queues_must_cover_priorities() {
        let mut config = ConveyorConfig::default();
        config.worker.priorities.push("archive".into());
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("archive"));
    }

    #[test]
    fn test_default_priority_must_be_known() {
        let mut config = ConveyorConfig::default();
        config.producer.default_priority = "bulk".into();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("producer.default_priority"));
    }

    #[test]
    fn test_placeholder_must_appear_exactly_once() {
        let mut config = ConveyorConfig::default();
        config.worker.heartbeat_key_pattern =
            "jobqueue:{worker_id}:hb:{worker_id}".into();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("worker.heartbeat_key_pattern"));
    }
}
