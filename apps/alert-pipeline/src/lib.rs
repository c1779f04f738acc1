pub mod config;
pub mod debounce;
pub mod feed;
pub mod http;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod settings;
pub mod telemetry;
pub mod thresholds;
