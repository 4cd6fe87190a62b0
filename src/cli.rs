use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "bookmark-cache",
    about = "Keep article content for recent bookmarks cached for offline reading"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run sync and background downloads until interrupted
    Run(CommonArgs),

    /// Print a bookmark's cached content, downloading it if needed
    Show {
        /// Bookmark id
        bookmark_id: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run one eviction sweep over the cache and exit
    Prune(CommonArgs),
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Run(common) | Command::Prune(common) => common,
            Command::Show { common, .. } => common,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory holding cached content
    #[arg(long, env = "BOOKMARK_CACHE_DIR", default_value = "~/.bookmark-cache")]
    pub cache_dir: String,

    /// Base URL of the bookmark API
    #[arg(long, env = "BOOKMARK_CACHE_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token for the bookmark API.
    /// Prefer the environment variable; flags are visible in process listings.
    #[arg(long, env = "BOOKMARK_CACHE_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// JSON file with the local bookmark list (default: <cache-dir>/bookmarks.json)
    #[arg(long, env = "BOOKMARK_CACHE_BOOKMARKS_FILE")]
    pub bookmarks_file: Option<String>,

    /// URL probed for connectivity (default: --api-url)
    #[arg(long, env = "BOOKMARK_CACHE_PROBE_URL")]
    pub probe_url: Option<String>,

    /// Seconds between connectivity probes
    #[arg(long, env = "BOOKMARK_CACHE_PROBE_INTERVAL_SECS", default_value_t = 30)]
    pub probe_interval_secs: u64,

    /// Seconds between checks of the bookmarks file
    #[arg(long, env = "BOOKMARK_CACHE_WATCH_INTERVAL_SECS", default_value_t = 5)]
    pub watch_interval_secs: u64,

    /// Maximum concurrent downloads
    #[arg(long, env = "BOOKMARK_CACHE_CONCURRENCY", default_value_t = 3)]
    pub concurrency: usize,

    /// Maximum queued downloads; further tasks are dropped
    #[arg(long, env = "BOOKMARK_CACHE_QUEUE_CAPACITY", default_value_t = 100)]
    pub queue_capacity: usize,

    /// Only bookmarks updated within this many days are downloaded
    #[arg(long, env = "BOOKMARK_CACHE_RECENT_DAYS", default_value_t = 3)]
    pub recent_days: u32,

    /// Cache size limit in GiB
    #[arg(long, env = "BOOKMARK_CACHE_MAX_CACHE_GB", default_value_t = 5)]
    pub max_cache_gb: u64,

    /// Cached content older than this many days is evicted
    #[arg(long, env = "BOOKMARK_CACHE_RETENTION_DAYS", default_value_t = 30)]
    pub retention_days: u32,

    /// Seconds between eviction sweeps
    #[arg(long, env = "BOOKMARK_CACHE_EVICT_INTERVAL_SECS", default_value_t = 21600)]
    pub evict_interval_secs: u64,

    /// Max retries per content request (0 = no retries)
    #[arg(long, env = "BOOKMARK_CACHE_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, env = "BOOKMARK_CACHE_RETRY_DELAY_SECS", default_value_t = 2)]
    pub retry_delay_secs: u64,

    /// Log level
    #[arg(long, value_enum, env = "BOOKMARK_CACHE_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["bookmark-cache", "run"]).unwrap();
        let common = cli.command.common();
        assert!(matches!(cli.command, Command::Run(_)));
        assert_eq!(common.cache_dir, "~/.bookmark-cache");
        assert_eq!(common.concurrency, 3);
        assert_eq!(common.queue_capacity, 100);
        assert_eq!(common.recent_days, 3);
        assert_eq!(common.log_level, LogLevel::Info);
    }

    #[test]
    fn test_show_takes_id_and_flags() {
        let cli = Cli::try_parse_from([
            "bookmark-cache",
            "show",
            "bm_42",
            "--api-url",
            "https://api.example.com",
            "--max-retries",
            "0",
        ])
        .unwrap();
        match &cli.command {
            Command::Show {
                bookmark_id,
                common,
            } => {
                assert_eq!(bookmark_id, "bm_42");
                assert_eq!(common.api_url.as_deref(), Some("https://api.example.com"));
                assert_eq!(common.max_retries, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_show_requires_id() {
        assert!(Cli::try_parse_from(["bookmark-cache", "show"]).is_err());
    }

    #[test]
    fn test_log_level_values() {
        let cli = Cli::try_parse_from(["bookmark-cache", "prune", "--log-level", "warn"]).unwrap();
        assert_eq!(cli.command.common().log_level, LogLevel::Warn);
        assert!(Cli::try_parse_from(["bookmark-cache", "prune", "--log-level", "loud"]).is_err());
    }
}
