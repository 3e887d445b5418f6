// Library for the binary and integration tests

pub mod collector;
pub mod compaction;
pub mod config;
pub mod docker_repo;
pub mod event_watcher;
pub mod jobs;
pub mod metric_repo;
pub mod models;
pub mod routes;
pub mod scheduler;
pub mod version;
