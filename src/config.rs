use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{InfraResult, Result, TokenError};
use crate::store::{DEFAULT_TTL, StoreOptions};

/// 覆盖 TTL 的环境变量（秒）
pub const ENV_TTL_SECONDS: &str = "TOKEN_STORE_TTL_SECONDS";
/// 覆盖 Redis 地址列表的环境变量（逗号分隔）
pub const ENV_REDIS_ADDRS: &str = "TOKEN_STORE_REDIS_ADDRS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    File,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenStoreConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendType,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// 未设置时按后端取默认值：Redis 开启，文件关闭
    pub refresh_on_verify: Option<bool>,
    pub operation_timeout_ms: Option<u64>,
    pub file: Option<FileStoreConfig>,
    pub redis: Option<RedisStoreConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileStoreConfig {
    pub cache_dir: PathBuf,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RedisStoreConfig {
    pub addrs: Vec<String>, // 多于一个地址时使用集群模式
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    pub prefix: Option<String>,
}

fn default_backend() -> BackendType {
    BackendType::File
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl TokenStoreConfig {
    pub fn load_from_file(path: &str) -> InfraResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read token store config {path}"))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid token store config {path}"))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TokenStoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 用进程环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ttl) = lookup(ENV_TTL_SECONDS).and_then(|v| v.trim().parse::<u64>().ok()) {
            self.ttl_secs = ttl;
        }
        if let Some(addrs) = lookup(ENV_REDIS_ADDRS) {
            let addrs: Vec<String> = addrs
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !addrs.is_empty() {
                self.redis.get_or_insert_with(RedisStoreConfig::default).addrs = addrs;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.backend {
            BackendType::File if self.file.is_none() => Err(TokenError::configuration(
                "backend \"file\" requires a [file] section",
            )),
            BackendType::Redis => match &self.redis {
                Some(redis) if !redis.addrs.is_empty() => Ok(()),
                _ => Err(TokenError::configuration(
                    "backend \"redis\" requires at least one address in [redis].addrs",
                )),
            },
            BackendType::File => Ok(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        if self.ttl_secs == 0 {
            DEFAULT_TTL
        } else {
            Duration::from_secs(self.ttl_secs)
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        let refresh = self
            .refresh_on_verify
            .unwrap_or(self.backend == BackendType::Redis);
        StoreOptions::new(self.ttl())
            .refresh_on_verify(refresh)
            .operation_timeout(self.operation_timeout_ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const REDIS_CONFIG: &str = r#"
backend = "redis"
ttl_secs = 60
operation_timeout_ms = 2000

[redis]
addrs = ["10.0.0.1:6379", "10.0.0.2:6379"]
password = "secret"
prefix = "tenant-a"
"#;

    #[test]
    fn parses_redis_config() {
        let config = TokenStoreConfig::from_toml_str(REDIS_CONFIG).unwrap();
        assert_eq!(config.backend, BackendType::Redis);
        let redis = config.redis.as_ref().unwrap();
        assert_eq!(redis.addrs.len(), 2);
        assert_eq!(redis.db, 0);
        assert_eq!(redis.prefix.as_deref(), Some("tenant-a"));

        let options = config.store_options();
        assert_eq!(options.ttl, Duration::from_secs(60));
        assert!(options.refresh_on_verify);
        assert_eq!(options.operation_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn file_backend_defaults() {
        let config = TokenStoreConfig::from_toml_str(
            r#"
[file]
cache_dir = "/tmp/tokens"
"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendType::File);
        assert_eq!(config.ttl(), DEFAULT_TTL);
        assert_eq!(config.file.as_ref().unwrap().sweep_interval_secs, 60);
        assert!(!config.store_options().refresh_on_verify);
    }

    #[test]
    fn missing_backend_section_is_rejected() {
        let err = TokenStoreConfig::from_toml_str(r#"backend = "redis""#).unwrap_err();
        assert!(matches!(err, TokenError::Configuration(_)));
        let err = TokenStoreConfig::from_toml_str(r#"backend = "file""#).unwrap_err();
        assert!(matches!(err, TokenError::Configuration(_)));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = TokenStoreConfig::from_toml_str(REDIS_CONFIG).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_TTL_SECONDS, "120"),
            (ENV_REDIS_ADDRS, " 127.0.0.1:6379 ,"),
        ]);
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.ttl(), Duration::from_secs(120));
        assert_eq!(config.redis.unwrap().addrs, vec!["127.0.0.1:6379"]);
    }

    #[test]
    fn unparsable_ttl_override_is_ignored() {
        let mut config = TokenStoreConfig::from_toml_str(REDIS_CONFIG).unwrap();
        config.apply_overrides(|key| (key == ENV_TTL_SECONDS).then(|| "soon".to_string()));
        assert_eq!(config.ttl_secs, 60);
    }
}
