pub mod api;
pub mod config;
pub mod crawler;
pub mod error;
pub mod frontier;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;
pub mod text;

pub use api::{create_router, AppState};
pub use config::Config;
pub use crawler::{Crawler, HttpFetcher, PageFetcher};
pub use error::{Result, WebseekError};
pub use frontier::{normalize_url, CrawlItem, Frontier};
pub use indexer::Indexer;
pub use models::*;
pub use query::{QueryEngine, ScoringStrategy, SearchOutcome};
pub use store::{
    IndexStore, MemoryIndexStore, MemoryPageStore, MemoryQueueStore, PageStore, QueueStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
