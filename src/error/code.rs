//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 令牌相关错误
/// - 2000-2999: 序列化相关错误
/// - 3000-3999: 存储相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 令牌相关错误 (1000-1999)
    // ============================================================
    TokenNotFound = 1000,
    TokenAlreadyExists = 1001,
    TokenKeyInvalid = 1002,

    // ============================================================
    // 序列化相关错误 (2000-2999)
    // ============================================================
    SerializationError = 2000,
    DeserializationError = 2001,

    // ============================================================
    // 存储相关错误 (3000-3999)
    // ============================================================
    StorageIoError = 3000,
    StorageUnavailable = 3001,
    StorageError = 3002,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    OperationTimeout = 9000,
    ConfigurationError = 9001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::TokenNotFound),
            1001 => Some(ErrorCode::TokenAlreadyExists),
            1002 => Some(ErrorCode::TokenKeyInvalid),
            2000 => Some(ErrorCode::SerializationError),
            2001 => Some(ErrorCode::DeserializationError),
            3000 => Some(ErrorCode::StorageIoError),
            3001 => Some(ErrorCode::StorageUnavailable),
            3002 => Some(ErrorCode::StorageError),
            9000 => Some(ErrorCode::OperationTimeout),
            9001 => Some(ErrorCode::ConfigurationError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::TokenNotFound => "TOKEN_NOT_FOUND",
            ErrorCode::TokenAlreadyExists => "TOKEN_ALREADY_EXISTS",
            ErrorCode::TokenKeyInvalid => "TOKEN_KEY_INVALID",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::StorageIoError => "STORAGE_IO_ERROR",
            ErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Token,
            2000..=2999 => ErrorCategory::Serialization,
            3000..=3999 => ErrorCategory::Storage,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::StorageUnavailable | ErrorCode::OperationTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Token,
    Serialization,
    Storage,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Token => write!(f, "TOKEN"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::Storage => write!(f, "STORAGE"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_u32() {
        for code in [
            ErrorCode::TokenNotFound,
            ErrorCode::TokenAlreadyExists,
            ErrorCode::SerializationError,
            ErrorCode::StorageUnavailable,
            ErrorCode::OperationTimeout,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(42), None);
    }

    #[test]
    fn category_follows_code_range() {
        assert_eq!(ErrorCode::TokenNotFound.category(), ErrorCategory::Token);
        assert_eq!(ErrorCode::DeserializationError.category(), ErrorCategory::Serialization);
        assert_eq!(ErrorCode::StorageIoError.category(), ErrorCategory::Storage);
        assert_eq!(ErrorCode::ConfigurationError.category(), ErrorCategory::General);
        assert_eq!(ErrorCode::TokenKeyInvalid.to_string(), "TOKEN_KEY_INVALID");
    }
}
