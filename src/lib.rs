//! Flare Token Store
//!
//! 会话/认证令牌的持久化层：保存、校验、按主体查找和撤销。
//! 提供本地文件与 Redis（单机/集群）两种后端，TTL 由存储统一控制。

pub mod config;
pub mod error;
pub mod metrics;
pub mod store;
pub mod token;

// Re-exports
pub use config::{BackendType, FileStoreConfig, RedisStoreConfig, TokenStoreConfig};
pub use error::{ErrorCategory, ErrorCode, InfraResult, Result, TokenError};
pub use metrics::{MeteredTokenStore, OperationMetrics, StoreMetrics, StoreOperation};
pub use store::{DEFAULT_TTL, RevokeKeys, StoreOptions, TokenStore, TokenStoreFactory};
pub use token::{Token, TokenRecord};

#[cfg(feature = "file")]
pub use store::FileTokenStore;
#[cfg(feature = "redis")]
pub use store::RedisTokenStore;
#[cfg(feature = "redis")]
pub use store::connection::{RedisConnectOptions, RedisConnection};
