//! Runtime settings.
//!
//! Defaults here are the conservative free-tier numbers; `BOOKFETCH_*`
//! environment variables override them and CLI flags override both.
//! Account tier (`elevated`) widens the request budget and the worker
//! pool without touching the per-field overrides.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::record::SourceId;

/// Free-tier request budget per provider per window.
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Elevated-tier request budget per provider per window.
pub const ELEVATED_RATE_LIMIT: u32 = 300;

/// Free-tier concurrent download worker count.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Elevated-tier concurrent download worker count.
pub const ELEVATED_CONCURRENCY: usize = 10;

/// Times a failed task is re-enqueued before being abandoned.
pub const DEFAULT_RETRY_CEILING: u32 = 2;

/// Per-attempt request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Period during which a failed mirror is demoted.
pub const DEFAULT_MIRROR_COOLDOWN: Duration = Duration::from_secs(3600);

/// Largest file accepted for download.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Whether the account tier unlocks the wider budget and pool.
    pub elevated: bool,
    /// Request budget per provider per window (free tier).
    pub rate_limit: u32,
    /// Request budget per provider per window (elevated tier).
    pub elevated_rate_limit: u32,
    /// Explicit worker pool size; `None` derives from tier.
    pub concurrency: Option<usize>,
    /// Failed-task re-enqueue ceiling.
    pub retry_ceiling: u32,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Failed-mirror demotion period.
    pub mirror_cooldown: Duration,
    /// Largest file accepted for download.
    pub max_file_size: u64,
    /// Provider order used to settle merge field conflicts.
    pub provider_priority: Vec<SourceId>,
    /// Root directory for downloaded artifacts and the dedup cache.
    pub output_dir: PathBuf,
    /// Archive catalog base URL.
    pub archive_url: String,
    /// Mirror-index catalog base URL.
    pub mirror_index_url: String,
    /// Package catalog base URL.
    pub package_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            elevated: false,
            rate_limit: DEFAULT_RATE_LIMIT,
            elevated_rate_limit: ELEVATED_RATE_LIMIT,
            concurrency: None,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            timeout: DEFAULT_TIMEOUT,
            mirror_cooldown: DEFAULT_MIRROR_COOLDOWN,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            provider_priority: vec![
                SourceId::Package,
                SourceId::Archive,
                SourceId::MirrorIndex,
            ],
            output_dir: PathBuf::from("downloads"),
            archive_url: "https://annas-archive.org".to_string(),
            mirror_index_url: "https://libgen.is".to_string(),
            package_url: "https://z-lib.gs".to_string(),
        }
    }
}

impl Settings {
    /// Builds settings from defaults plus `BOOKFETCH_*` environment
    /// overrides. Malformed values are warned about and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.elevated = env_bool("BOOKFETCH_ELEVATED").unwrap_or(settings.elevated);
        if let Some(v) = env_parse::<u32>("BOOKFETCH_RATE_LIMIT") {
            settings.rate_limit = v;
        }
        if let Some(v) = env_parse::<u32>("BOOKFETCH_ELEVATED_RATE_LIMIT") {
            settings.elevated_rate_limit = v;
        }
        if let Some(v) = env_parse::<usize>("BOOKFETCH_CONCURRENCY") {
            settings.concurrency = Some(v.max(1));
        }
        if let Some(v) = env_parse::<u32>("BOOKFETCH_RETRY_CEILING") {
            settings.retry_ceiling = v;
        }
        if let Some(v) = env_parse::<u64>("BOOKFETCH_TIMEOUT_SECS") {
            settings.timeout = Duration::from_secs(v.max(1));
        }
        if let Some(v) = env_parse::<u64>("BOOKFETCH_MIRROR_COOLDOWN_SECS") {
            settings.mirror_cooldown = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("BOOKFETCH_MAX_FILE_SIZE_MB") {
            settings.max_file_size = v * 1024 * 1024;
        }
        if let Some(order) = env_priority("BOOKFETCH_PROVIDER_PRIORITY") {
            settings.provider_priority = order;
        }
        if let Ok(dir) = env::var("BOOKFETCH_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                settings.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = env::var("BOOKFETCH_ARCHIVE_URL") {
            settings.archive_url = url;
        }
        if let Ok(url) = env::var("BOOKFETCH_MIRROR_INDEX_URL") {
            settings.mirror_index_url = url;
        }
        if let Ok(url) = env::var("BOOKFETCH_PACKAGE_URL") {
            settings.package_url = url;
        }
        settings
    }

    /// Request budget for the active tier.
    #[must_use]
    pub fn effective_rate_limit(&self) -> u32 {
        if self.elevated {
            self.elevated_rate_limit
        } else {
            self.rate_limit
        }
    }

    /// Worker pool size for the active tier.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(if self.elevated {
            ELEVATED_CONCURRENCY
        } else {
            DEFAULT_CONCURRENCY
        })
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!(key, value = other, "ignoring malformed boolean");
            None
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %value, "ignoring malformed value");
            None
        }
    }
}

/// Parses a comma-separated provider list; unknown names are skipped
/// with a warning so a typo cannot silently drop the whole order.
fn env_priority(key: &str) -> Option<Vec<SourceId>> {
    let value = env::var(key).ok()?;
    let order: Vec<SourceId> = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(source) => Some(source),
            Err(_) => {
                warn!(key, provider = s, "ignoring unknown provider in priority order");
                None
            }
        })
        .collect();
    if order.is_empty() { None } else { Some(order) }
}
