//! 令牌存储统一错误类型

use std::time::Duration;

use thiserror::Error;

use super::code::ErrorCode;

/// 令牌存储统一错误类型
///
/// 校验不匹配不是错误：`verify` 对存在但内容不匹配的令牌返回 `Ok(false)`，
/// 只有结构损坏的存储内容才会产生 [`TokenError::Serialization`]。
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// 按主体或令牌查找时任一索引缺失
    #[error("令牌不存在: {0}")]
    NotFound(String),

    /// 主键冲突（另一条记录已占用该令牌值）
    #[error("令牌已存在: {0}")]
    AlreadyExists(String),

    /// 令牌值或主体标识无法作为存储键
    #[error("非法的令牌键 {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// 载荷编码/解码失败
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 文件系统 IO 错误
    #[error("IO 错误: {0}")]
    Io(String),

    /// 存储后端（Redis）错误
    #[error("存储后端错误: {message}")]
    Backend { message: String, retryable: bool },

    /// 操作超过截止时间
    #[error("操作超时: {0:?}")]
    Timeout(Duration),

    /// 构造参数无效
    #[error("配置错误: {0}")]
    Configuration(String),
}

impl TokenError {
    /// 创建未找到错误
    pub fn not_found(key: impl Into<String>) -> Self {
        TokenError::NotFound(key.into())
    }

    /// 创建主键冲突错误
    pub fn already_exists(key: impl Into<String>) -> Self {
        TokenError::AlreadyExists(key.into())
    }

    /// 创建非法键错误
    pub fn invalid_key(key: impl Into<String>, reason: &'static str) -> Self {
        TokenError::InvalidKey {
            key: key.into(),
            reason,
        }
    }

    /// 创建序列化错误
    pub fn serialization(reason: impl Into<String>) -> Self {
        TokenError::Serialization(reason.into())
    }

    /// 创建 IO 错误
    pub fn io(reason: impl Into<String>) -> Self {
        TokenError::Io(reason.into())
    }

    /// 创建后端错误
    pub fn backend(reason: impl Into<String>, retryable: bool) -> Self {
        TokenError::Backend {
            message: reason.into(),
            retryable,
        }
    }

    /// 创建配置错误
    pub fn configuration(reason: impl Into<String>) -> Self {
        TokenError::Configuration(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            TokenError::NotFound(_) => ErrorCode::TokenNotFound,
            TokenError::AlreadyExists(_) => ErrorCode::TokenAlreadyExists,
            TokenError::InvalidKey { .. } => ErrorCode::TokenKeyInvalid,
            TokenError::Serialization(_) => ErrorCode::SerializationError,
            TokenError::Io(_) => ErrorCode::StorageIoError,
            TokenError::Backend {
                retryable: true, ..
            } => ErrorCode::StorageUnavailable,
            TokenError::Backend { .. } => ErrorCode::StorageError,
            TokenError::Timeout(_) => ErrorCode::OperationTimeout,
            TokenError::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }

    /// 是否为未找到错误（调用方据此走"重新签发"分支）
    pub fn is_not_found(&self) -> bool {
        matches!(self, TokenError::NotFound(_))
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, TokenError>;
