//! 令牌存储错误处理模块
//!
//! 提供统一的错误类型、错误代码分类和错误转换

pub mod code;
pub mod conversions;
pub mod token_error;

// 重新导出公共类型
pub use code::{ErrorCategory, ErrorCode};
pub use token_error::{Result, TokenError};

/// 基础设施层（配置加载等）默认使用的结果类型
pub type InfraResult<T> = anyhow::Result<T>;
