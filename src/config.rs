use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WebseekError};

/// Top-level configuration, loaded from a YAML file.
///
/// Sections map one-to-one onto the subsystems: `redis` backs the frontier
/// queue store, `mongo` the raw document store, `db`/`index` the postings
/// store, `query` the query engine, `search` the HTTP API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy_url: String,
    pub proxy_enabled: bool,
    pub max_depth: i64,
    pub workers: usize,
    pub redis: RedisConfig,
    pub db: PostgresConfig,
    pub mongo: MongoConfig,
    pub index: IndexerConfig,
    pub query: QueryEngineConfig,
    pub search: SearchApiConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    pub url_queue: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub ssl: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub db_name: String,
    pub crawler_coll: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub db_url: String,
    pub pool_size: usize,
    pub workers: usize,
    pub batch_size: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryEngineConfig {
    pub term_cache_size: usize,
    pub posting_cache_size: usize,
    pub document_cache_size: usize,
    pub idf_cache_size: usize,
    pub max_workers: usize,
    pub batch_size: usize,
    /// Refresh interval for global statistics, in seconds
    pub cache_refresh_time: u64,
    pub stemmer_lang: String,
    /// Scoring strategy: bm25, tfidf, cosine or hybrid
    pub scoring: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchApiConfig {
    pub warm_cache: bool,
    pub http_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_url: String::new(),
            proxy_enabled: false,
            max_depth: 1,
            workers: 3,
            redis: RedisConfig::default(),
            db: PostgresConfig::default(),
            mongo: MongoConfig::default(),
            index: IndexerConfig::default(),
            query: QueryEngineConfig::default(),
            search: SearchApiConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost:6379".to_string(),
            port: 6379,
            user: String::new(),
            password: String::new(),
            ssl: false,
            url_queue: "url_queue".to_string(),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5433,
            user: "admin".to_string(),
            password: "secret".to_string(),
            db_name: "inverted_index_db".to_string(),
            ssl: false,
        }
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            db_name: "search_engine".to_string(),
            crawler_coll: "raw_pages".to_string(),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            db_url: String::new(),
            pool_size: 8,
            workers: 3,
            batch_size: 50,
        }
    }
}

impl Default for QueryEngineConfig {
    fn default() -> Self {
        Self {
            term_cache_size: 10_000,
            posting_cache_size: 5_000,
            document_cache_size: 20_000,
            idf_cache_size: 10_000,
            max_workers: num_cpus::get() * 2,
            batch_size: 1_000,
            cache_refresh_time: 300,
            stemmer_lang: "english".to_string(),
            scoring: "bm25".to_string(),
        }
    }
}

impl Default for SearchApiConfig {
    fn default() -> Self {
        Self {
            warm_cache: false,
            http_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&raw)
            .map_err(|e| WebseekError::Config(format!("cannot parse {:?}: {}", path.as_ref(), e)))
    }

    /// Refresh interval for the global statistics cache
    pub fn cache_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.query.cache_refresh_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.index.batch_size, 50);
        assert_eq!(cfg.query.term_cache_size, 10_000);
        assert_eq!(cfg.query.scoring, "bm25");
        assert_eq!(cfg.cache_refresh_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
workers: 5
index:
  batch_size: 10
query:
  posting_cache_size: 64
search:
  warm_cache: true
  http_addr: "0.0.0.0:9000"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.workers, 5);
        assert_eq!(cfg.index.batch_size, 10);
        assert_eq!(cfg.query.posting_cache_size, 64);
        // untouched sections keep their defaults
        assert_eq!(cfg.query.term_cache_size, 10_000);
        assert!(cfg.search.warm_cache);
        assert_eq!(cfg.search.http_addr, "0.0.0.0:9000");
    }
}
