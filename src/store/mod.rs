//! 令牌存储抽象和实现

#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "file")]
pub mod sweeper;

#[cfg(feature = "redis")]
pub mod connection;
#[cfg(feature = "redis")]
pub mod redis;

pub mod factory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, TokenError};
use crate::token::Token;

#[cfg(feature = "file")]
pub use self::file::FileTokenStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisTokenStore;
pub use factory::TokenStoreFactory;

/// 未指定时的默认 TTL（1 小时）
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// 令牌存储接口
///
/// 文件与 Redis 两个后端都实现这个 trait，调用方只依赖 `Arc<dyn TokenStore>`。
/// 一个令牌有效，当且仅当它被保存过、未过期且未被撤销。
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 保存令牌，同时建立主键（令牌 → 载荷）和二级索引（主体 → 令牌）
    async fn save(&self, token: &dyn Token) -> Result<()>;

    /// 校验令牌
    ///
    /// `token` 至少需要携带令牌值。
    /// * `Ok(false)` - 令牌不存在、已过期或内容校验不通过
    /// * `Ok(true)` - 校验通过，`token` 已被覆盖为存储中的记录
    /// * `Err` - 存储内容无法解析或底层 IO 失败
    async fn verify(&self, token: &mut dyn Token) -> Result<bool>;

    /// 按主体标识取回当前令牌，任一索引缺失时返回 [`TokenError::NotFound`]
    async fn get(&self, subject_id: &str, token: &mut dyn Token) -> Result<()>;

    /// 撤销令牌，删除给出的键能找到的所有条目
    ///
    /// 撤销不存在的令牌不是错误。只给令牌值时，Redis 后端的主体索引会保留到
    /// TTL 到期，但它指向的令牌已不存在，`get` 返回 [`TokenError::NotFound`]。
    /// 需要同时清理两个索引时请用 [`RevokeKeys::both`]。
    async fn revoke(&self, keys: RevokeKeys<'_>) -> Result<()>;
}

#[async_trait]
impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    async fn save(&self, token: &dyn Token) -> Result<()> {
        (**self).save(token).await
    }

    async fn verify(&self, token: &mut dyn Token) -> Result<bool> {
        (**self).verify(token).await
    }

    async fn get(&self, subject_id: &str, token: &mut dyn Token) -> Result<()> {
        (**self).get(subject_id, token).await
    }

    async fn revoke(&self, keys: RevokeKeys<'_>) -> Result<()> {
        (**self).revoke(keys).await
    }
}

/// 撤销时使用的键
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevokeKeys<'a> {
    pub token_value: Option<&'a str>,
    pub subject_id: Option<&'a str>,
}

impl<'a> RevokeKeys<'a> {
    /// 只按令牌值撤销
    ///
    /// 主键被删除；Redis 后端无法从令牌值得知主体，主体索引留到 TTL 到期。
    pub fn token(token_value: &'a str) -> Self {
        Self {
            token_value: Some(token_value),
            subject_id: None,
        }
    }

    /// 按主体撤销（删除主体索引可达的令牌）
    pub fn subject(subject_id: &'a str) -> Self {
        Self {
            token_value: None,
            subject_id: Some(subject_id),
        }
    }

    /// 同时给出令牌值和主体
    pub fn both(token_value: &'a str, subject_id: &'a str) -> Self {
        Self {
            token_value: Some(token_value),
            subject_id: Some(subject_id),
        }
    }

    /// 从令牌记录中取出非空的键
    pub fn from_token(token: &'a dyn Token) -> Self {
        let non_empty = |s: &'a str| (!s.is_empty()).then_some(s);
        Self {
            token_value: non_empty(token.token_value()),
            subject_id: non_empty(token.subject_id()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.token_value.is_none() && self.subject_id.is_none()
    }
}

/// 后端通用选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// 全局 TTL
    pub ttl: Duration,
    /// 校验成功后是否顺延 TTL
    pub refresh_on_verify: bool,
    /// 单次操作截止时间，`None` 表示不限制
    pub operation_timeout: Option<Duration>,
}

impl StoreOptions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: if ttl.is_zero() { DEFAULT_TTL } else { ttl },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn refresh_on_verify(mut self, enabled: bool) -> Self {
        self.refresh_on_verify = enabled;
        self
    }

    #[must_use]
    pub fn operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            refresh_on_verify: false,
            operation_timeout: None,
        }
    }
}

/// 检查令牌值/主体标识能否作为文件名片段或 Redis 键
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TokenError::invalid_key(key, "key is empty"));
    }
    if key.contains(['/', '\\']) {
        return Err(TokenError::invalid_key(key, "contains a path separator"));
    }
    if key.contains('\0') {
        return Err(TokenError::invalid_key(key, "contains a NUL byte"));
    }
    if key == "." || key == ".." {
        return Err(TokenError::invalid_key(key, "is a relative path component"));
    }
    Ok(())
}

/// 在可选截止时间内执行一次存储操作
pub(crate) async fn with_deadline<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TokenError::Timeout(limit))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenRecord;

    #[test]
    fn revoke_keys_skip_empty_fields() {
        let record = TokenRecord::lookup("abc");
        let keys = RevokeKeys::from_token(&record);
        assert_eq!(keys, RevokeKeys::token("abc"));
        assert!(RevokeKeys::from_token(&TokenRecord::empty()).is_empty());
    }

    #[test]
    fn zero_ttl_falls_back_to_default() {
        assert_eq!(StoreOptions::new(Duration::ZERO).ttl, DEFAULT_TTL);
        assert_eq!(
            StoreOptions::new(Duration::from_secs(60)).ttl,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn keys_that_escape_the_namespace_are_rejected() {
        assert!(validate_key("abc123").is_ok());
        assert!(validate_key("user_1").is_ok());
        for bad in ["", "../etc", "a\\b", "a\0b", ".."] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn deadline_turns_slow_operations_into_timeouts() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, TokenError>(())
        };
        let err = with_deadline(Some(Duration::from_millis(10)), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Timeout(_)));
        assert!(err.is_retryable());

        let fast = with_deadline(None, async { Ok::<_, TokenError>(7) }).await;
        assert_eq!(fast.unwrap(), 7);
    }
}
