use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumMessage};

use crate::errors::{CalibanError, Result};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 环境变量前缀，例如 CBN__SERVER__PORT=9999
pub const ENV_PREFIX: &str = "CBN";

/// Cookie SameSite 策略
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    EnumIter,
    AsRefStr,
    EnumMessage,
)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum SameSitePolicy {
    #[strum(message = "Only same-site requests carry the session cookie")]
    Strict,
    #[default]
    #[strum(message = "Default, top-level navigation carries the session cookie")]
    Lax,
    #[strum(message = "Cross-site tracking, requires the Secure attribute")]
    None,
}

impl std::fmt::Display for SameSitePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for SameSitePolicy {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lax" => Ok(Self::Lax),
            "none" => Ok(Self::None),
            _ => Err(format!(
                "Invalid SameSite policy: '{}'. Valid: Strict, Lax, None",
                s
            )),
        }
    }
}

/// 静态配置（从 TOML 加载，启动时使用）
///
/// - server: 服务器地址、端口、CPU 数量
/// - storage: 会话存储后端
/// - tracking: 会话归因参数
/// - cookie: 会话 Cookie 属性
/// - logging: 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub cookie: CookieConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// 优先级：ENV > config.toml > 默认值
    /// ENV 前缀：CBN，分隔符：__
    pub fn load(path: Option<&str>) -> Self {
        use config::{Config, Environment, File};

        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let builder = Config::builder()
            // 1. 从 TOML 文件加载（可选）
            .add_source(File::with_name(path).required(false))
            // 2. 从环境变量覆盖，列表用逗号分隔
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tracking.append_params")
                    .with_list_parse_key("tracking.ignore_params")
                    .with_list_parse_key("tracking.first_attribution_params")
                    .with_list_parse_key("tracking.campaign_start_params")
                    .try_parsing(true),
            );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<StaticConfig>() {
                Ok(config) => {
                    if std::path::Path::new(path).exists() {
                        eprintln!("[INFO] Configuration loaded from: {}", path);
                    }
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] Failed to deserialize config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to build config: {}", e);
                Self::default()
            }
        }
    }

    /// 启动前校验，缺失存储配置属于致命错误
    pub fn validate(&self) -> Result<()> {
        match self.storage.storage_type.as_str() {
            "memory" => {}
            "redis" => {
                if self.storage.redis.url.trim().is_empty() {
                    return Err(CalibanError::configuration(
                        "storage.type is 'redis' but storage.redis.url is empty",
                    ));
                }
            }
            other => {
                return Err(CalibanError::configuration(format!(
                    "Unknown storage type '{}'. Valid: memory, redis",
                    other
                )));
            }
        }

        if self.tracking.session_key.trim().is_empty() {
            return Err(CalibanError::configuration(
                "tracking.session_key must not be empty",
            ));
        }
        if self.tracking.cache_key.trim().is_empty() {
            return Err(CalibanError::configuration(
                "tracking.cache_key must not be empty",
            ));
        }

        Ok(())
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        let sample_config = Self::default();
        toml::to_string_pretty(&sample_config)
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CalibanError::serialization(e.to_string()))?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: usize,
    /// 可信代理（IP 或 CIDR），为空时自动识别私有地址
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

/// 会话存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    #[serde(default = "default_storage_type")]
    pub storage_type: String,
    /// 单次存储调用的超时时间
    #[serde(default = "default_storage_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

/// 内存存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_capacity")]
    pub max_capacity: u64,
}

/// 会话归因配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// 会话 Cookie 与 URL 参数名
    #[serde(default = "default_session_key")]
    pub session_key: String,
    /// 存储上下文（复合键前缀）
    #[serde(default = "default_cache_key")]
    pub cache_key: String,
    /// 会话过期秒数，0 表示永不过期
    #[serde(default = "default_cache_expiration")]
    pub cache_expiration: u64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub append_params: Vec<String>,
    #[serde(default)]
    pub ignore_params: Vec<String>,
    #[serde(default = "default_first_attribution_params")]
    pub first_attribution_params: Vec<String>,
    #[serde(default = "default_campaign_start_params")]
    pub campaign_start_params: Vec<String>,
}

/// 会话 Cookie 配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CookieConfig {
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: SameSitePolicy,
    #[serde(default)]
    pub domain: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

// ============================================================
// Default value functions for static config
// ============================================================

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_cpu_count() -> usize {
    num_cpus::get()
}

fn default_storage_type() -> String {
    "memory".to_string()
}

fn default_storage_timeout_ms() -> u64 {
    2000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_key_prefix() -> String {
    "caliban:".to_string()
}

fn default_memory_capacity() -> u64 {
    100_000
}

fn default_session_key() -> String {
    "_cbnsid".to_string()
}

fn default_cache_key() -> String {
    "cbn".to_string()
}

fn default_cache_expiration() -> u64 {
    2 * 60 * 60
}

fn default_first_attribution_params() -> Vec<String> {
    vec!["gclid".to_string(), "msclkid".to_string()]
}

fn default_campaign_start_params() -> Vec<String> {
    vec![
        "utm_campaign".to_string(),
        "gclid".to_string(),
        "msclkid".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

// ============================================================
// Default implementations
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            cpu_count: default_cpu_count(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: default_storage_type(),
            timeout_ms: default_storage_timeout_ms(),
            redis: RedisConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_memory_capacity(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            session_key: default_session_key(),
            cache_key: default_cache_key(),
            cache_expiration: default_cache_expiration(),
            debug: false,
            append_params: Vec::new(),
            ignore_params: Vec::new(),
            first_attribution_params: default_first_attribution_params(),
            campaign_start_params: default_campaign_start_params(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}
