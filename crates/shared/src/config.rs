//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 重试配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// 结果缓存配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// 缓存条目存活时间，0 表示永不过期
    pub ttl_secs: u64,
    /// 最多缓存的结果条数
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_entries: 1024,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }
}

/// 执行管道配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识日志来源
    pub service_name: String,
    /// 日志级别（如 "info", "debug"），RUST_LOG 优先
    pub log_level: String,
    /// 是否启用 JSON 格式日志
    pub json_logs: bool,
    /// 是否安装 Prometheus recorder；宿主进程已有 recorder 时关闭
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    /// 注入服务名（配置文件中通常不写服务名）
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub pipeline: PipelineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（FILTER_ 前缀，如 FILTER_PIPELINE__RETRY__MAX_RETRIES -> pipeline.retry.max_retries）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("FILTER_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), service_name, &env)
    }

    /// 从指定目录加载配置
    pub fn load_from(config_dir: &Path, service_name: &str, env: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 双下划线分隔嵌套层级，字段名本身含有单下划线
            .add_source(
                Environment::with_prefix("FILTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.retry.max_retries, 2);
        assert!(config.pipeline.cache.enabled);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_cache_ttl_zero_means_no_expiry() {
        let cache = CacheConfig {
            ttl_secs: 0,
            ..CacheConfig::default()
        };
        assert_eq!(cache.ttl(), None);
        assert_eq!(cache.max_entries, 1024);
        assert_eq!(CacheConfig::default().ttl(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path(), "filter-engine", "test").unwrap();

        assert_eq!(config.service_name, "filter-engine");
        assert_eq!(config.environment, "test");
        assert_eq!(config.pipeline.retry.initial_delay_ms, 100);
    }

    #[test]
    fn test_load_layers_override_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[pipeline.retry]\nmax_retries = 5\ninitial_delay_ms = 10\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("production.toml"),
            "[pipeline.retry]\nmax_retries = 1\n\n[observability]\njson_logs = true\n",
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path(), "filter-engine", "production").unwrap();

        assert!(config.is_production());
        assert_eq!(config.pipeline.retry.max_retries, 1);
        assert_eq!(config.pipeline.retry.initial_delay_ms, 10);
        assert!(config.observability.json_logs);
        assert!(config.observability.metrics_enabled);
    }
}
