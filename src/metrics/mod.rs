//! 令牌存储指标
//!
//! [`MeteredTokenStore`] 包装任意后端，按操作统计调用次数、命中与失败以及耗时。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::store::{RevokeKeys, TokenStore};
use crate::token::Token;

/// 只保留最近的耗时样本数
const MAX_DURATION_SAMPLES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Save,
    Verify,
    Get,
    Revoke,
}

impl StoreOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOperation::Save => "save",
            StoreOperation::Verify => "verify",
            StoreOperation::Get => "get",
            StoreOperation::Revoke => "revoke",
        }
    }
}

/// 调用结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    Failed,
}

/// 单个操作的指标
#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    pub total: u64,
    pub hits: u64,
    /// 校验不通过或按主体未找到
    pub misses: u64,
    pub failures: u64,
    pub duration_ms: Vec<u64>,
}

impl OperationMetrics {
    pub fn average_duration_ms(&self) -> Option<f64> {
        if self.duration_ms.is_empty() {
            return None;
        }
        let sum: u64 = self.duration_ms.iter().sum();
        Some(sum as f64 / self.duration_ms.len() as f64)
    }
}

/// 指标收集器
#[derive(Clone, Default)]
pub struct StoreMetrics {
    operations: Arc<RwLock<HashMap<StoreOperation, OperationMetrics>>>,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, operation: StoreOperation, outcome: Outcome, duration: Duration) {
        let mut operations = self.operations.write().await;
        let metrics = operations.entry(operation).or_default();
        metrics.total += 1;
        match outcome {
            Outcome::Hit => metrics.hits += 1,
            Outcome::Miss => metrics.misses += 1,
            Outcome::Failed => metrics.failures += 1,
        }

        metrics.duration_ms.push(duration.as_millis() as u64);
        if metrics.duration_ms.len() > MAX_DURATION_SAMPLES {
            metrics.duration_ms.remove(0);
        }
    }

    pub async fn get(&self, operation: StoreOperation) -> OperationMetrics {
        self.operations
            .read()
            .await
            .get(&operation)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<StoreOperation, OperationMetrics> {
        self.operations.read().await.clone()
    }
}

/// 带指标统计的存储包装
pub struct MeteredTokenStore<S> {
    inner: S,
    metrics: StoreMetrics,
}

impl<S: TokenStore> MeteredTokenStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_metrics(inner, StoreMetrics::new())
    }

    /// 多个存储共享同一个收集器
    pub fn with_metrics(inner: S, metrics: StoreMetrics) -> Self {
        Self { inner, metrics }
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.metrics.clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: TokenStore> TokenStore for MeteredTokenStore<S> {
    async fn save(&self, token: &dyn Token) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.save(token).await;
        let outcome = if result.is_ok() { Outcome::Hit } else { Outcome::Failed };
        self.metrics
            .record(StoreOperation::Save, outcome, start.elapsed())
            .await;
        result
    }

    async fn verify(&self, token: &mut dyn Token) -> Result<bool> {
        let start = Instant::now();
        let result = self.inner.verify(token).await;
        let outcome = match &result {
            Ok(true) => Outcome::Hit,
            Ok(false) => Outcome::Miss,
            Err(_) => Outcome::Failed,
        };
        self.metrics
            .record(StoreOperation::Verify, outcome, start.elapsed())
            .await;
        result
    }

    async fn get(&self, subject_id: &str, token: &mut dyn Token) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.get(subject_id, token).await;
        let outcome = match &result {
            Ok(()) => Outcome::Hit,
            Err(err) if err.is_not_found() => Outcome::Miss,
            Err(_) => Outcome::Failed,
        };
        self.metrics
            .record(StoreOperation::Get, outcome, start.elapsed())
            .await;
        result
    }

    async fn revoke(&self, keys: RevokeKeys<'_>) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.revoke(keys).await;
        let outcome = if result.is_ok() { Outcome::Hit } else { Outcome::Failed };
        self.metrics
            .record(StoreOperation::Revoke, outcome, start.elapsed())
            .await;
        result
    }
}
