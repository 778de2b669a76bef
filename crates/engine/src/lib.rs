pub mod breaker;
pub mod config;
pub mod producer;
pub mod queue;
pub mod reaper;
pub mod shutdown;
pub mod worker;
