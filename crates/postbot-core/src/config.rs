use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_MEDIA_BYTES: usize = 50 * 1024 * 1024; // 50 MiB
pub const DEFAULT_SYNC_POLL_MS: u64 = 500;
pub const DEFAULT_CHANGE_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_CAPTION_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Top-level config (postbot.toml + POSTBOT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostbotConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub caption: CaptionConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a writer waits for another process's write lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Due-item scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound for a single media payload accepted by `schedule_post`.
    #[serde(default = "default_max_media_bytes")]
    pub max_media_bytes: usize,
    /// When set, posts left in `processing` longer than this are marked
    /// failed at the start of a tick. Unset keeps them untouched.
    #[serde(default)]
    pub stale_processing_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            max_media_bytes: DEFAULT_MAX_MEDIA_BYTES,
            stale_processing_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Change-log polling cadence; picks up writes from other processes.
    #[serde(default = "default_sync_poll_ms")]
    pub poll_interval_ms: u64,
    /// Age after which change-log entries are trimmed. 0 keeps them forever.
    #[serde(default = "default_change_retention_secs")]
    pub change_retention_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_SYNC_POLL_MS,
            change_retention_secs: DEFAULT_CHANGE_RETENTION_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionProviderKind {
    /// Google Gemini `generateContent` with the media inlined.
    Gemini,
    /// Fixed caption from `static_caption`; no network.
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    #[serde(default = "default_caption_provider")]
    pub provider: CaptionProviderKind,
    /// Falls back to the GEMINI_API_KEY env var when unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_caption_model")]
    pub model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_caption_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub static_caption: Option<String>,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            provider: default_caption_provider(),
            api_key: None,
            model: default_caption_model(),
            base_url: default_gemini_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_caption_timeout_secs(),
            static_caption: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherMode {
    /// Log and succeed after `delay_ms`.
    Simulated,
    /// POST the post to `webhook_url` with the credential as bearer token.
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_publisher_mode")]
    pub mode: PublisherMode,
    #[serde(default = "default_publish_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            mode: default_publisher_mode(),
            delay_ms: default_publish_delay_ms(),
            webhook_url: None,
            timeout_secs: default_publish_timeout_secs(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.postbot/postbot.db", home)
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_max_media_bytes() -> usize {
    DEFAULT_MAX_MEDIA_BYTES
}
fn default_sync_poll_ms() -> u64 {
    DEFAULT_SYNC_POLL_MS
}
fn default_change_retention_secs() -> u64 {
    DEFAULT_CHANGE_RETENTION_SECS
}
fn default_caption_provider() -> CaptionProviderKind {
    CaptionProviderKind::Gemini
}
fn default_caption_model() -> String {
    DEFAULT_CAPTION_MODEL.to_string()
}
fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}
fn default_temperature() -> f32 {
    0.9
}
fn default_caption_timeout_secs() -> u64 {
    60
}
fn default_publisher_mode() -> PublisherMode {
    PublisherMode::Simulated
}
fn default_publish_delay_ms() -> u64 {
    1_500
}
fn default_publish_timeout_secs() -> u64 {
    30
}

impl PostbotConfig {
    /// Load config from a TOML file with POSTBOT_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `POSTBOT_SCHEDULER__TICK_INTERVAL_SECS=5`. A missing file is not an
    /// error: every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(PostbotConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("POSTBOT_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.postbot/postbot.toml", home)
}
