//! Highway ETL: seeds route segments, points and concurrencies into SQLite.

pub mod concurrency_pass;
pub mod config;
pub mod persistence;
pub mod pipeline;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineError, StateReport};
