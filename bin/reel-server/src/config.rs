//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use reel_core::{CoreConfig, PageLimits, PreviewConfig, StorageLayout};

/// Runtime configuration for reel-server.
///
/// Every field has a default so the server starts without any environment
/// variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx SQLite URL; the file is created when missing.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    pub upload_dir: String,
    pub output_dir: String,

    /// Executor submission-queue capacity.
    pub queue_capacity: usize,

    /// Concurrently running commands; `0` disables the cap.
    pub max_concurrent_tasks: usize,

    pub cleanup_interval_secs: u64,
    pub file_ttl_hours: u64,
    pub task_ttl_hours: u64,

    /// Largest accepted upload body.
    pub max_upload_size_mb: usize,

    pub default_page_size: u32,
    pub max_page_size: u32,

    /// Comma separated CORS allow-list; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Bearer token required on `/v1` when set.
    pub api_token: Option<String>,

    /// Mount Swagger UI at `/swagger-ui`.
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("REEL_BIND", "0.0.0.0:3000"),
            database_url: env_or("REEL_DATABASE_URL", "sqlite://reel.db"),
            log_level: env_or("REEL_LOG", "info"),
            log_json: env_flag("REEL_LOG_JSON", false),
            upload_dir: env_or("REEL_UPLOAD_DIR", "./uploads"),
            output_dir: env_or("REEL_OUTPUT_DIR", "./outputs"),
            queue_capacity: parse_env("REEL_QUEUE_CAPACITY", 64),
            max_concurrent_tasks: parse_env("REEL_MAX_CONCURRENT_TASKS", 4),
            cleanup_interval_secs: parse_env("REEL_CLEANUP_INTERVAL_SECS", 3600),
            file_ttl_hours: parse_env("REEL_FILE_TTL_HOURS", 24),
            task_ttl_hours: parse_env("REEL_TASK_TTL_HOURS", 24),
            max_upload_size_mb: parse_env("REEL_MAX_UPLOAD_SIZE_MB", 1024),
            default_page_size: parse_env("REEL_DEFAULT_PAGE_SIZE", 20),
            max_page_size: parse_env("REEL_MAX_PAGE_SIZE", 50),
            cors_allowed_origins: std::env::var("REEL_CORS_ORIGINS").ok(),
            api_token: std::env::var("REEL_API_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            enable_swagger: env_flag("REEL_ENABLE_SWAGGER", true),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }

    /// The subset handed to reel-core.
    pub fn core(&self) -> CoreConfig {
        CoreConfig {
            layout: StorageLayout::new(&self.upload_dir, &self.output_dir),
            queue_capacity: self.queue_capacity,
            max_concurrent_tasks: self.max_concurrent_tasks,
            task_ttl: hours(self.task_ttl_hours),
            file_ttl: hours(self.file_ttl_hours),
            page_limits: PageLimits {
                default: self.default_page_size,
                max: self.max_page_size,
            },
            preview: PreviewConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            database_url: "sqlite://reel.db".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            upload_dir: "./uploads".to_owned(),
            output_dir: "./outputs".to_owned(),
            queue_capacity: 64,
            max_concurrent_tasks: 4,
            cleanup_interval_secs: 3600,
            file_ttl_hours: 24,
            task_ttl_hours: 24,
            max_upload_size_mb: 1024,
            default_page_size: 20,
            max_page_size: 50,
            cors_allowed_origins: None,
            api_token: None,
            enable_swagger: true,
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn core_config_carries_limits_and_ttls() {
        let cfg = Config {
            task_ttl_hours: 2,
            max_page_size: 10,
            upload_dir: "/data/up".into(),
            ..Config::default()
        };
        let core = cfg.core();
        assert_eq!(core.task_ttl, Duration::from_secs(7200));
        assert_eq!(core.page_limits.clamp(Some(99)), 10);
        assert_eq!(core.layout.upload_dir(), std::path::Path::new("/data/up"));
    }

    #[test]
    fn upload_cap_is_in_bytes() {
        let cfg = Config {
            max_upload_size_mb: 2,
            ..Config::default()
        };
        assert_eq!(cfg.max_upload_bytes(), 2 * 1024 * 1024);
    }
}
