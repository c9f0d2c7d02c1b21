//! 令牌存储工厂
//!
//! 根据配置构建后端，调用方只拿到 `Arc<dyn TokenStore>`

use std::sync::Arc;

use tracing::info;

use super::TokenStore;
use crate::config::{BackendType, TokenStoreConfig};
use crate::error::{Result, TokenError};

/// 令牌存储工厂
pub struct TokenStoreFactory;

impl TokenStoreFactory {
    /// 从配置创建存储后端
    pub async fn create(config: &TokenStoreConfig) -> Result<Arc<dyn TokenStore>> {
        config.validate()?;
        info!(backend = ?config.backend, ttl_secs = config.ttl().as_secs(), "Creating token store");

        match config.backend {
            BackendType::File => Self::create_file(config).await,
            BackendType::Redis => Self::create_redis(config).await,
        }
    }

    /// 读取环境变量覆盖后再创建
    ///
    /// - `TOKEN_STORE_TTL_SECONDS`: TTL（秒）
    /// - `TOKEN_STORE_REDIS_ADDRS`: Redis 地址，逗号分隔，多个地址即集群模式
    pub async fn create_with_env(mut config: TokenStoreConfig) -> Result<Arc<dyn TokenStore>> {
        config.apply_env_overrides();
        Self::create(&config).await
    }

    #[cfg(feature = "file")]
    async fn create_file(config: &TokenStoreConfig) -> Result<Arc<dyn TokenStore>> {
        use std::time::Duration;

        use super::FileTokenStore;

        let file = config
            .file
            .as_ref()
            .ok_or_else(|| TokenError::configuration("missing [file] section"))?;
        let store = FileTokenStore::with_options(
            &file.cache_dir,
            config.store_options(),
            Duration::from_secs(file.sweep_interval_secs),
        )
        .await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "file"))]
    async fn create_file(_config: &TokenStoreConfig) -> Result<Arc<dyn TokenStore>> {
        Err(TokenError::configuration(
            "file backend is not enabled (feature \"file\")",
        ))
    }

    #[cfg(feature = "redis")]
    async fn create_redis(config: &TokenStoreConfig) -> Result<Arc<dyn TokenStore>> {
        use super::RedisTokenStore;
        use super::connection::{RedisConnectOptions, RedisConnection};

        let redis = config
            .redis
            .as_ref()
            .ok_or_else(|| TokenError::configuration("missing [redis] section"))?;
        let connect = RedisConnectOptions {
            addrs: redis.addrs.clone(),
            username: redis.username.clone().filter(|s| !s.is_empty()),
            password: redis.password.clone().filter(|s| !s.is_empty()),
            db: redis.db,
        };
        let conn = RedisConnection::connect(&connect).await?;
        let store =
            RedisTokenStore::from_connection(conn, config.store_options(), redis.prefix.clone());
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "redis"))]
    async fn create_redis(_config: &TokenStoreConfig) -> Result<Arc<dyn TokenStore>> {
        Err(TokenError::configuration(
            "redis backend is not enabled (feature \"redis\")",
        ))
    }
}

#[cfg(all(test, feature = "file"))]
mod tests {
    use super::*;
    use crate::token::TokenRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_file_store_from_config() {
        let dir = TempDir::new().unwrap();
        let config = TokenStoreConfig::from_toml_str(&format!(
            "ttl_secs = 60\n[file]\ncache_dir = {:?}\n",
            dir.path().join("tokens").display().to_string()
        ))
        .unwrap();

        let store = TokenStoreFactory::create(&config).await.unwrap();
        store.save(&TokenRecord::new("abc", "u1", "alice")).await.unwrap();

        let mut probe = TokenRecord::lookup("abc");
        assert!(store.verify(&mut probe).await.unwrap());
        assert_eq!(probe.name, "alice");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_connecting() {
        let mut config = TokenStoreConfig::from_toml_str(
            "backend = \"redis\"\n[redis]\naddrs = [\"127.0.0.1:6379\"]\n",
        )
        .unwrap();
        config.redis = None;
        let err = TokenStoreFactory::create(&config).await.err().unwrap();
        assert!(matches!(err, TokenError::Configuration(_)));
    }
}
