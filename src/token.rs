use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TokenError};

/// 令牌能力接口
///
/// 存储层只把令牌当作带两个身份投影（令牌值、主体标识）的不透明记录，
/// 载荷格式与签名完全由实现方决定。
pub trait Token: Send + Sync {
    /// 本次签发凭证的唯一值（主键）
    fn token_value(&self) -> &str;

    /// 令牌所属主体标识（二级索引）
    fn subject_id(&self) -> &str;

    /// 描述性名称，对存储层不透明
    fn display_name(&self) -> &str;

    /// 将完整记录编码为字节
    fn encode(&self) -> Result<Vec<u8>>;

    /// 校验存储的载荷
    ///
    /// 载荷可解析但令牌值不同时返回 `Ok(false)`；令牌值一致时用存储的状态
    /// 覆盖自身并返回 `Ok(true)`；载荷无法解析时返回错误。
    fn verify(&mut self, payload: &[u8]) -> Result<bool>;

    /// 无条件地用载荷覆盖自身（按主体查找时使用）
    fn decode(&mut self, payload: &[u8]) -> Result<()>;
}

/// JSON 编码的令牌记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub subject_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl TokenRecord {
    /// 使用已有令牌值构造记录
    pub fn new(
        token: impl Into<String>,
        subject_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            subject_id: subject_id.into(),
            name: name.into(),
            issued_at: Utc::now(),
        }
    }

    /// 为主体签发一个随机令牌值
    pub fn issue(subject_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().simple().to_string(), subject_id, name)
    }

    /// 只携带令牌值的查询记录，用于 `verify`
    pub fn lookup(token: impl Into<String>) -> Self {
        Self::new(token, "", "")
    }

    /// 空记录，用于 `get` 填充
    pub fn empty() -> Self {
        Self::lookup("")
    }
}

impl Token for TokenRecord {
    fn token_value(&self) -> &str {
        &self.token
    }

    fn subject_id(&self) -> &str {
        &self.subject_id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn verify(&mut self, payload: &[u8]) -> Result<bool> {
        let stored: TokenRecord = serde_json::from_slice(payload)?;
        if stored.token != self.token {
            return Ok(false);
        }
        *self = stored;
        Ok(true)
    }

    fn decode(&mut self, payload: &[u8]) -> Result<()> {
        *self = serde_json::from_slice(payload).map_err(|err| {
            TokenError::serialization(format!("failed to decode token record: {err}"))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_recovers_stored_fields() {
        let saved = TokenRecord::new("abc", "u1", "alice");
        let payload = saved.encode().unwrap();

        let mut probe = TokenRecord::lookup("abc");
        assert!(probe.verify(&payload).unwrap());
        assert_eq!(probe, saved);
    }

    #[test]
    fn verify_mismatch_is_not_an_error() {
        let payload = TokenRecord::new("abc", "u1", "alice").encode().unwrap();
        let mut probe = TokenRecord::lookup("other");
        assert!(!probe.verify(&payload).unwrap());
        assert_eq!(probe.subject_id, "");
    }

    #[test]
    fn verify_rejects_garbage_payload() {
        let mut probe = TokenRecord::lookup("abc");
        let err = probe.verify(b"not json").unwrap_err();
        assert!(matches!(err, TokenError::Serialization(_)));
    }

    #[test]
    fn issued_tokens_are_unique() {
        let a = TokenRecord::issue("u1", "alice");
        let b = TokenRecord::issue("u1", "alice");
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 32);
    }

    #[test]
    fn payload_without_optional_fields_decodes() {
        let mut record = TokenRecord::empty();
        record
            .decode(br#"{"token":"xyz","subject_id":"u2"}"#)
            .unwrap();
        assert_eq!(record.token, "xyz");
        assert_eq!(record.name, "");
    }
}
