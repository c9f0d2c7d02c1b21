//! 错误类型转换实现
//!
//! 提供各种错误类型之间的转换

use super::TokenError;
use std::io;

impl From<io::Error> for TokenError {
    fn from(err: io::Error) -> Self {
        TokenError::io(err.to_string())
    }
}

impl From<serde_json::Error> for TokenError {
    fn from(err: serde_json::Error) -> Self {
        TokenError::serialization(format!("JSON 序列化错误: {}", err))
    }
}

impl From<toml::de::Error> for TokenError {
    fn from(err: toml::de::Error) -> Self {
        TokenError::configuration(format!("TOML 解析错误: {}", err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for TokenError {
    fn from(err: redis::RedisError) -> Self {
        // 连接类与超时类错误可重试，其余（如 WRONGTYPE）直接上抛
        let retryable = err.is_timeout()
            || err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_cluster_error();
        TokenError::backend(format!("Redis 错误: {}", err), retryable)
    }
}
