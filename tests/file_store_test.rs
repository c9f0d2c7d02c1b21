//! 文件存储集成测试
//!
//! 通过 `Arc<dyn TokenStore>` 走完整的签发、校验、查找、撤销和过期流程。

#![cfg(feature = "file")]

use std::sync::Arc;
use std::time::Duration;

use flare_token_store::{
    FileTokenStore, MeteredTokenStore, RevokeKeys, StoreOperation, StoreOptions, TokenError,
    TokenRecord, TokenStore, TokenStoreConfig, TokenStoreFactory,
};
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_test::assert_ok;

/// 测试用的短 TTL
const SHORT_TTL: Duration = Duration::from_millis(400);

async fn short_lived_store(dir: &TempDir) -> Arc<dyn TokenStore> {
    let store = FileTokenStore::with_options(
        dir.path().join("tokens"),
        StoreOptions::new(SHORT_TTL),
        Duration::from_millis(50),
    )
    .await
    .expect("create file store");
    Arc::new(store)
}

#[tokio::test]
async fn test_token_lifecycle() {
    let dir = TempDir::new().unwrap();
    let store = short_lived_store(&dir).await;

    let issued = TokenRecord::issue("user-42", "alice");
    store.save(&issued).await.unwrap();

    // 校验：只带令牌值的探针被填充为完整记录
    let mut probe = TokenRecord::lookup(issued.token.clone());
    assert!(store.verify(&mut probe).await.unwrap());
    assert_eq!(probe, issued);

    // 按主体取回
    let mut current = TokenRecord::empty();
    store.get("user-42", &mut current).await.unwrap();
    assert_eq!(current.token, issued.token);

    // 撤销后不可见，重复撤销不报错
    store.revoke(RevokeKeys::from_token(&issued)).await.unwrap();
    store.revoke(RevokeKeys::from_token(&issued)).await.unwrap();

    let mut probe = TokenRecord::lookup(issued.token.clone());
    assert!(!store.verify(&mut probe).await.unwrap());
    let err = store.get("user-42", &mut TokenRecord::empty()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_tokens_expire_after_ttl() {
    let dir = TempDir::new().unwrap();
    let store = short_lived_store(&dir).await;

    store
        .save(&TokenRecord::new("short", "user-1", "bob"))
        .await
        .unwrap();
    assert!(store.verify(&mut TokenRecord::lookup("short")).await.unwrap());

    sleep(SHORT_TTL + Duration::from_millis(300)).await;

    assert!(!store.verify(&mut TokenRecord::lookup("short")).await.unwrap());
    let err = store.get("user-1", &mut TokenRecord::empty()).await.unwrap_err();
    assert!(matches!(err, TokenError::NotFound(_)));
}

#[tokio::test]
async fn test_unknown_and_revoked_lookups() {
    let dir = TempDir::new().unwrap();
    let store = short_lived_store(&dir).await;

    assert!(!store.verify(&mut TokenRecord::lookup("never-saved")).await.unwrap());
    assert!(store.get("nobody", &mut TokenRecord::empty()).await.unwrap_err().is_not_found());

    // 撤销从未保存的令牌不是错误
    assert_ok!(store.revoke(RevokeKeys::both("ghost", "nobody")).await);
    assert_ok!(store.revoke(RevokeKeys::default()).await);
}

#[tokio::test]
async fn test_independent_subjects_do_not_interfere() {
    let dir = TempDir::new().unwrap();
    let store = short_lived_store(&dir).await;

    let alice = TokenRecord::issue("alice", "Alice");
    let bob = TokenRecord::issue("bob", "Bob");
    store.save(&alice).await.unwrap();
    store.save(&bob).await.unwrap();

    store.revoke(RevokeKeys::subject("alice")).await.unwrap();

    assert!(!store.verify(&mut TokenRecord::lookup(alice.token.clone())).await.unwrap());
    let mut probe = TokenRecord::lookup(bob.token.clone());
    assert!(store.verify(&mut probe).await.unwrap());
    assert_eq!(probe.name, "Bob");
}

#[tokio::test]
async fn test_factory_builds_metered_file_store() {
    let dir = TempDir::new().unwrap();
    let config = TokenStoreConfig::from_toml_str(&format!(
        r#"
backend = "file"
ttl_secs = 30

[file]
cache_dir = "{}"
sweep_interval_secs = 1
"#,
        dir.path().display()
    ))
    .unwrap();

    let store = TokenStoreFactory::create(&config).await.unwrap();
    let metered = MeteredTokenStore::new(store);

    let token = TokenRecord::issue("user-7", "carol");
    metered.save(&token).await.unwrap();
    assert!(metered.verify(&mut TokenRecord::lookup(token.token.clone())).await.unwrap());
    assert!(!metered.verify(&mut TokenRecord::lookup("missing")).await.unwrap());

    let verify = metered.metrics().get(StoreOperation::Verify).await;
    assert_eq!((verify.total, verify.hits, verify.misses), (2, 1, 1));
}

#[tokio::test]
async fn test_revoke_by_token_value() {
    let dir = TempDir::new().unwrap();
    let store = short_lived_store(&dir).await;

    store.save(&TokenRecord::new("abc", "u1", "alice")).await.unwrap();
    assert!(store.verify(&mut TokenRecord::lookup("abc")).await.unwrap());

    store.revoke(RevokeKeys::token("abc")).await.unwrap();
    assert!(!store.verify(&mut TokenRecord::lookup("abc")).await.unwrap());
}

#[tokio::test]
async fn test_keys_containing_underscores() {
    let dir = TempDir::new().unwrap();
    let store = short_lived_store(&dir).await;

    store.save(&TokenRecord::new("abc", "user", "a")).await.unwrap();
    store.save(&TokenRecord::new("x_abc", "user_1", "b")).await.unwrap();

    let mut probe = TokenRecord::lookup("abc");
    assert!(store.verify(&mut probe).await.unwrap());
    assert_eq!(probe.subject_id, "user");

    let mut current = TokenRecord::empty();
    store.get("user", &mut current).await.unwrap();
    assert_eq!(current.token, "abc");

    store.revoke(RevokeKeys::token("abc")).await.unwrap();
    store.revoke(RevokeKeys::subject("user")).await.unwrap();

    let mut probe = TokenRecord::lookup("x_abc");
    assert!(store.verify(&mut probe).await.unwrap());
    assert_eq!(probe.subject_id, "user_1");
    store.get("user_1", &mut current).await.unwrap();
    assert_eq!(current.token, "x_abc");
}
