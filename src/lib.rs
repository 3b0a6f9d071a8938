pub mod app;
pub mod cache;
pub mod collapse;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod range;
pub mod series;
pub mod state;
pub mod stats;
pub mod storage;

pub use app::router;
pub use cache::{StatsCache, ViewOutcome};
pub use config::{CacheConfig, Product, ServerConfig};
pub use errors::{AppError, StatsError};
pub use fetch::{HttpFetcher, SeriesFetcher};
pub use metrics::MetricTable;
pub use state::AppState;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
