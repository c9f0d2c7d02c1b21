//! 文件存储的后台过期清理任务
//!
//! 文件系统没有原生 TTL，清理任务按固定间隔扫描缓存目录，
//! 删除修改时间早于 TTL 的 `*.token` 文件以及残留的临时文件。

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 默认清理间隔（1 分钟）
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) const TOKEN_EXTENSION: &str = ".token";
pub(crate) const TEMP_MARKER: &str = ".tmp-";

/// 单次清理的统计结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// 判断修改时间是否已超过 TTL
///
/// 修改时间在未来（时钟回拨）时视为未过期。
pub(crate) fn is_expired(modified: SystemTime, ttl: Duration) -> bool {
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > ttl)
        .unwrap_or(false)
}

/// 过期清理器
#[derive(Debug, Clone)]
pub struct ExpirySweeper {
    dir: PathBuf,
    ttl: Duration,
    period: Duration,
}

impl ExpirySweeper {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, period: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            period: if period.is_zero() {
                DEFAULT_SWEEP_INTERVAL
            } else {
                period
            },
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 在当前 tokio 运行时中启动清理循环
    pub fn spawn(self) -> SweepHandle {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.run(cancel.clone()));
        SweepHandle {
            cancel,
            handle: Some(handle),
        }
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            dir = %self.dir.display(),
            ttl_secs = self.ttl.as_secs(),
            interval_ms = self.period.as_millis() as u64,
            "Starting token expiry sweeper"
        );

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep_once().await;
                    if report.removed > 0 || report.failed > 0 {
                        debug!(
                            scanned = report.scanned,
                            removed = report.removed,
                            failed = report.failed,
                            "Token sweep finished"
                        );
                    }
                }
            }
        }

        info!(dir = %self.dir.display(), "Token expiry sweeper stopped");
    }

    /// 执行一次清理
    ///
    /// 单个文件的 stat/删除失败只记录日志，不影响其余文件。
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "Failed to scan token directory");
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %self.dir.display(), error = %err, "Failed to read directory entry");
                    report.failed += 1;
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let is_token = name.ends_with(TOKEN_EXTENSION);
            let is_temp = name.starts_with('.') && name.contains(TEMP_MARKER);
            if !is_token && !is_temp {
                continue;
            }
            report.scanned += 1;

            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    debug!(file = name, error = %err, "Failed to stat token file");
                    report.failed += 1;
                    continue;
                }
            };
            if !is_expired(modified, self.ttl) {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => report.removed += 1,
                // 并发的 revoke 已经删掉了
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(file = name, error = %err, "Failed to remove expired token file");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// 清理任务句柄，drop 时发出停止信号
#[derive(Debug)]
pub struct SweepHandle {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// 停止清理任务并等待其退出
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Token expiry sweeper terminated abnormally");
            }
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
