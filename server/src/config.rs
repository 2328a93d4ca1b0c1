use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use session_tracker_lib::aggregation::DEFAULT_WINDOW_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AggregationMode {
    /// Evaluate the trigger right after the counter increment, inside the ingest call
    Inline,
    /// Evaluate the trigger from store update notifications
    ChangeFeed,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "server", about = "Live session tracking server", long_about = None)]
pub struct ServerConfig {
    #[arg(long, env = "TRACKER_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// SQLite url, defaults to data/database.db under the project root
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Keep everything in memory, nothing survives a restart
    #[arg(long, env = "TRACKER_IN_MEMORY", conflicts_with = "database_url")]
    pub in_memory: bool,

    /// Recompute distance and speed every this many samples, over this many samples
    #[arg(long, env = "TRACKER_WINDOW_SIZE", default_value_t = DEFAULT_WINDOW_SIZE as u64, value_parser = clap::value_parser!(u64).range(2..))]
    pub window_size: u64,

    /// Upper bound for handing one message to one subscriber
    #[arg(long, env = "TRACKER_DELIVERY_TIMEOUT_MS", default_value_t = 2000)]
    pub delivery_timeout_ms: u64,

    /// Messages queued per websocket before publishing to it starts waiting
    #[arg(long, env = "TRACKER_OUTBOX_CAPACITY", default_value_t = 64, value_parser = clap::value_parser!(u64).range(1..))]
    pub outbox_capacity: u64,

    #[arg(long, env = "TRACKER_AGGREGATION_MODE", value_enum, default_value_t = AggregationMode::Inline)]
    pub aggregation_mode: AggregationMode,

    #[arg(long, env = "TRACKER_LOG_DIR", default_value = "server/log")]
    pub log_dir: PathBuf,
}

impl ServerConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_url: None,
            in_memory: false,
            window_size: DEFAULT_WINDOW_SIZE as u64,
            delivery_timeout_ms: 2000,
            outbox_capacity: 64,
            aggregation_mode: AggregationMode::Inline,
            log_dir: PathBuf::from("server/log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        let config = ServerConfig::try_parse_from([
            "server",
            "--bind", "127.0.0.1:8080",
            "--window-size", "100",
            "--aggregation-mode", "change-feed",
        ])
        .unwrap();

        assert_eq!(config.bind, SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(config.window_size, 100);
        assert_eq!(config.aggregation_mode, AggregationMode::ChangeFeed);
    }

    #[test]
    fn window_must_hold_a_pair() {
        assert!(ServerConfig::try_parse_from(["server", "--window-size", "1"]).is_err());
    }

    #[test]
    fn memory_and_database_url_conflict() {
        assert!(ServerConfig::try_parse_from(["server", "--in-memory", "--database-url", "sqlite::memory:"]).is_err());
    }
}
