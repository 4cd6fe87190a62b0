use std::path::PathBuf;
use std::time::Duration;

use crate::cli::CommonArgs;
use crate::download::evict::EvictionPolicy;
use crate::download::SchedulerConfig;
use crate::retry::RetryConfig;
use crate::types::LogLevel;

const BOOKMARKS_FILENAME: &str = "bookmarks.json";
const GIB: u64 = 1024 * 1024 * 1024;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Application configuration, resolved from CLI flags and environment.
///
/// Component settings are grouped into the sub-configs each component takes,
/// so nothing below `main` depends on clap.
pub struct Config {
    pub cache_dir: PathBuf,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub bookmarks_file: PathBuf,
    pub probe_url: Option<String>,

    pub probe_interval: Duration,
    pub watch_interval: Duration,
    pub evict_interval: Duration,

    pub scheduler: SchedulerConfig,
    pub eviction: EvictionPolicy,
    pub retry: RetryConfig,

    pub log_level: LogLevel,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("cache_dir", &self.cache_dir)
            .field("api_url", &self.api_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("bookmarks_file", &self.bookmarks_file)
            .field("scheduler", &self.scheduler)
            .field("eviction", &self.eviction)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Config {
    pub fn from_cli(cli: &CommonArgs) -> anyhow::Result<Self> {
        if cli.concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }
        if cli.queue_capacity == 0 {
            anyhow::bail!("--queue-capacity must be at least 1");
        }
        for (flag, secs) in [
            ("--probe-interval-secs", cli.probe_interval_secs),
            ("--watch-interval-secs", cli.watch_interval_secs),
            ("--evict-interval-secs", cli.evict_interval_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{} must be greater than 0", flag);
            }
        }

        let cache_dir = expand_tilde(&cli.cache_dir);
        let bookmarks_file = cli
            .bookmarks_file
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(|| cache_dir.join(BOOKMARKS_FILENAME));
        let api_url = non_empty(&cli.api_url).map(|u| u.trim_end_matches('/').to_string());
        let probe_url = non_empty(&cli.probe_url).or_else(|| api_url.clone());

        Ok(Self {
            cache_dir,
            api_url,
            api_token: non_empty(&cli.api_token),
            bookmarks_file,
            probe_url,
            probe_interval: Duration::from_secs(cli.probe_interval_secs),
            watch_interval: Duration::from_secs(cli.watch_interval_secs),
            evict_interval: Duration::from_secs(cli.evict_interval_secs),
            scheduler: SchedulerConfig {
                max_concurrency: cli.concurrency,
                queue_capacity: cli.queue_capacity,
                recent_window: chrono::Duration::days(i64::from(cli.recent_days)),
            },
            eviction: EvictionPolicy {
                max_bytes: cli.max_cache_gb.saturating_mul(GIB),
                retention: chrono::Duration::days(i64::from(cli.retention_days)),
            },
            retry: RetryConfig {
                max_retries: cli.max_retries,
                base_delay: Duration::from_secs(cli.retry_delay_secs),
                max_delay: MAX_RETRY_DELAY.max(Duration::from_secs(cli.retry_delay_secs)),
            },
            log_level: cli.log_level,
        })
    }

    /// The API base URL, required by commands that talk to the server.
    pub fn require_api_url(&self) -> anyhow::Result<&str> {
        self.api_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No API URL configured; pass --api-url or set BOOKMARK_CACHE_API_URL")
        })
    }
}
