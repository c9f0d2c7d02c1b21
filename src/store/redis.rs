//! Redis 令牌存储
//!
//! 每个令牌两个键，都带有存储的 TTL：
//! - `[prefix:]<token_value>` → 载荷
//! - `[prefix:]<subject_id>` → 令牌值
//!
//! 集群模式下两个键通常落在不同的 slot 上，跨 slot 的事务/脚本不可用，
//! 双写退化为先主键、后索引的两次独立写入；这是拓扑本身带来的较弱保证。
//!
//! 两类键共享同一个键空间。以主体标识作为令牌值校验时读到的是索引值，
//! `verify` 识别出这种情况后返回 `Ok(false)`。
//!
//! 只按令牌值撤销时载荷对存储不透明，无法得知主体，主体索引会保留到 TTL 到期；
//! 其间 `get` 在第二次查找时未命中，返回 `NotFound`。

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use tracing::{debug, info, warn};

use super::connection::{RedisConnectOptions, RedisConnection};
use super::{RevokeKeys, StoreOptions, TokenStore, validate_key, with_deadline};
use crate::error::{Result, TokenError};
use crate::token::Token;

/// 主键不存在时才写入，并在同一原子步骤内写入主体索引
static SAVE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[3]) then
    redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
",
    )
});

/// 仅当主体索引仍指向给定令牌时才删除（单键，集群模式同样可用）
static COMPARE_AND_DELETE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
",
    )
});

/// 基于 Redis 的令牌存储
pub struct RedisTokenStore {
    conn: RedisConnection,
    options: StoreOptions,
    prefix: Option<String>,
}

impl RedisTokenStore {
    /// 连接 Redis 并创建存储，TTL 刷新默认开启
    pub async fn connect(connect: &RedisConnectOptions, ttl: Duration) -> Result<Self> {
        let options = StoreOptions::new(ttl).refresh_on_verify(true);
        let conn = RedisConnection::connect(connect).await?;
        Ok(Self::from_connection(conn, options, None))
    }

    /// 使用已建立的连接创建存储
    pub fn from_connection(
        conn: RedisConnection,
        options: StoreOptions,
        prefix: Option<String>,
    ) -> Self {
        let prefix = prefix.filter(|prefix| !prefix.is_empty());
        info!(
            cluster = conn.is_cluster(),
            ttl_secs = options.ttl.as_secs(),
            prefix = prefix.as_deref().unwrap_or(""),
            refresh_on_verify = options.refresh_on_verify,
            "Initialized redis token store"
        );
        Self {
            conn,
            options,
            prefix,
        }
    }

    /// 设置键前缀（多租户命名空间）
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.options.ttl
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn key(&self, raw: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{raw}"),
            None => raw.to_string(),
        }
    }

    fn ttl_secs(&self) -> u64 {
        self.options.ttl.as_secs().max(1)
    }

    async fn save_inner(&self, token: &dyn Token) -> Result<()> {
        let token_value = token.token_value();
        let subject_id = token.subject_id();
        validate_key(token_value)?;
        validate_key(subject_id)?;

        let payload = token.encode()?;
        let token_key = self.key(token_value);
        let subject_key = self.key(subject_id);
        let ttl = self.ttl_secs();
        let mut conn = self.conn.clone();

        let stored = if conn.is_cluster() {
            let primary: Option<String> = redis::cmd("SET")
                .arg(&token_key)
                .arg(&payload)
                .arg("NX")
                .arg("EX")
                .arg(ttl)
                .query_async(&mut conn)
                .await?;
            if primary.is_some() {
                redis::cmd("SET")
                    .arg(&subject_key)
                    .arg(token_value)
                    .arg("EX")
                    .arg(ttl)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
            primary.is_some()
        } else {
            let created: i64 = SAVE_SCRIPT
                .key(&token_key)
                .key(&subject_key)
                .arg(&payload)
                .arg(token_value)
                .arg(ttl)
                .invoke_async(&mut conn)
                .await?;
            created == 1
        };

        if !stored {
            debug!(token = token_value, "Rejected save for an existing token value");
            return Err(TokenError::already_exists(token_value));
        }

        debug!(token = token_value, subject = subject_id, "Saved token");
        Ok(())
    }

    async fn verify_inner(&self, token: &mut dyn Token) -> Result<bool> {
        if validate_key(token.token_value()).is_err() {
            return Ok(false);
        }

        let token_key = self.key(token.token_value());
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&token_key)
            .query_async(&mut conn)
            .await?;
        let Some(payload) = payload else {
            return Ok(false);
        };

        let ok = match token.verify(&payload) {
            Ok(ok) => ok,
            // 令牌值与某个主体标识相同时，读到的是主体索引而不是载荷
            Err(err) => {
                let is_index = match index_target(&payload) {
                    Some(target) => self.exists(&mut conn, target).await?,
                    None => false,
                };
                if !is_index {
                    return Err(err);
                }
                debug!(key = %token_key, "Token key holds a subject index entry");
                return Ok(false);
            }
        };
        if ok && self.options.refresh_on_verify {
            self.refresh(&mut conn, &token_key, token.subject_id()).await;
        }
        Ok(ok)
    }

    async fn exists(&self, conn: &mut RedisConnection, raw: &str) -> Result<bool> {
        let count: i64 = redis::cmd("EXISTS")
            .arg(self.key(raw))
            .query_async(conn)
            .await?;
        Ok(count > 0)
    }

    /// 顺延两个键的 TTL，失败只记录日志
    async fn refresh(&self, conn: &mut RedisConnection, token_key: &str, subject_id: &str) {
        let ttl = self.ttl_secs() as i64;
        let subject_key = validate_key(subject_id).ok().map(|_| self.key(subject_id));

        let result = if conn.is_cluster() {
            let mut result: redis::RedisResult<()> = redis::cmd("EXPIRE")
                .arg(token_key)
                .arg(ttl)
                .query_async(conn)
                .await;
            if let (true, Some(subject_key)) = (result.is_ok(), &subject_key) {
                result = redis::cmd("EXPIRE")
                    .arg(subject_key)
                    .arg(ttl)
                    .query_async(conn)
                    .await;
            }
            result
        } else {
            let mut pipe = redis::pipe();
            pipe.expire(token_key, ttl).ignore();
            if let Some(subject_key) = &subject_key {
                pipe.expire(subject_key, ttl).ignore();
            }
            pipe.query_async::<()>(conn).await
        };

        if let Err(err) = result {
            warn!(key = token_key, error = %err, "Failed to refresh token ttl");
        }
    }

    async fn get_inner(&self, subject_id: &str, token: &mut dyn Token) -> Result<()> {
        if validate_key(subject_id).is_err() {
            return Err(TokenError::not_found(subject_id));
        }

        let mut conn = self.conn.clone();
        let token_value: Option<String> = redis::cmd("GET")
            .arg(self.key(subject_id))
            .query_async(&mut conn)
            .await?;
        let Some(token_value) = token_value.filter(|value| validate_key(value).is_ok()) else {
            return Err(TokenError::not_found(subject_id));
        };

        let payload: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.key(&token_value))
            .query_async(&mut conn)
            .await?;
        let Some(payload) = payload else {
            return Err(TokenError::not_found(subject_id));
        };

        token.decode(&payload)?;
        if token.subject_id() != subject_id {
            warn!(
                subject = subject_id,
                token = %token_value,
                "Subject index points at a token owned by another subject"
            );
            return Err(TokenError::not_found(subject_id));
        }
        Ok(())
    }

    async fn revoke_inner(&self, keys: RevokeKeys<'_>) -> Result<()> {
        let token_value = keys.token_value.filter(|key| validate_key(key).is_ok());
        let subject_id = keys.subject_id.filter(|key| validate_key(key).is_ok());
        let mut conn = self.conn.clone();

        // 只有主体时，先从索引解析出当前令牌
        let resolved;
        let token_value = match (token_value, subject_id) {
            (Some(token_value), _) => Some(token_value),
            (None, Some(subject_id)) => {
                resolved = redis::cmd("GET")
                    .arg(self.key(subject_id))
                    .query_async::<Option<String>>(&mut conn)
                    .await?;
                resolved.as_deref().filter(|key| validate_key(key).is_ok())
            }
            (None, None) => return Ok(()),
        };

        if let Some(token_value) = token_value {
            redis::cmd("DEL")
                .arg(self.key(token_value))
                .query_async::<()>(&mut conn)
                .await?;
        }

        if let Some(subject_id) = subject_id {
            let subject_key = self.key(subject_id);
            match token_value {
                Some(token_value) => {
                    let _: i64 = COMPARE_AND_DELETE
                        .key(&subject_key)
                        .arg(token_value)
                        .invoke_async(&mut conn)
                        .await?;
                }
                // 索引已指向一个不可用的值，直接清掉
                None => {
                    redis::cmd("DEL")
                        .arg(&subject_key)
                        .query_async::<()>(&mut conn)
                        .await?;
                }
            }
        }

        debug!(
            token = token_value.unwrap_or(""),
            subject = subject_id.unwrap_or(""),
            "Revoked token"
        );
        Ok(())
    }
}

/// 值形如一个合法的令牌键时返回它（主体索引的值就是令牌值）
fn index_target(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload)
        .ok()
        .filter(|value| validate_key(value).is_ok())
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn save(&self, token: &dyn Token) -> Result<()> {
        with_deadline(self.options.operation_timeout, self.save_inner(token)).await
    }

    async fn verify(&self, token: &mut dyn Token) -> Result<bool> {
        with_deadline(self.options.operation_timeout, self.verify_inner(token)).await
    }

    async fn get(&self, subject_id: &str, token: &mut dyn Token) -> Result<()> {
        with_deadline(
            self.options.operation_timeout,
            self.get_inner(subject_id, token),
        )
        .await
    }

    async fn revoke(&self, keys: RevokeKeys<'_>) -> Result<()> {
        with_deadline(self.options.operation_timeout, self.revoke_inner(keys)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_plain_key_values_look_like_index_entries() {
        assert_eq!(index_target(b"3f2a9c"), Some("3f2a9c"));
        assert_eq!(index_target(b""), None);
        assert_eq!(index_target(b"a/b"), None);
        assert_eq!(index_target(&[0xff, 0xfe]), None);
    }
}
