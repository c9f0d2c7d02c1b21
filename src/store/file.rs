//! 文件系统令牌存储
//!
//! 每个令牌一个文件：`<cache_dir>/<subject_id>_<token_value>.token`。
//! 文件名同时携带两个键，因此一次写入就建立了主键和二级索引；
//! 文件修改时间作为过期时钟，由后台清理任务和读取时的检查共同保证过期。
//!
//! `_` 只作为两个键之间的分隔符出现：键内的 `%`、`_` 以及开头的 `.`
//! 会被转义为 `%25`、`%5F`、`%2E`，查找时按完整的键比较，而不是按前后缀匹配。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::sweeper::{
    DEFAULT_SWEEP_INTERVAL, ExpirySweeper, SweepHandle, SweepReport, TEMP_MARKER, TOKEN_EXTENSION,
    is_expired,
};
use super::{RevokeKeys, StoreOptions, TokenStore, validate_key, with_deadline};
use crate::error::{Result, TokenError};
use crate::token::Token;

/// 一个匹配到的令牌文件
#[derive(Debug, Clone)]
struct TokenFile {
    path: PathBuf,
    subject_id: String,
    token_value: String,
    modified: SystemTime,
}

/// 基于文件系统的令牌存储
pub struct FileTokenStore {
    cache_dir: PathBuf,
    options: StoreOptions,
    sweeper: ExpirySweeper,
    sweep_handle: Mutex<SweepHandle>,
}

impl FileTokenStore {
    /// 创建文件存储并启动后台清理任务（需要在 tokio 运行时中调用）
    pub async fn new(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        Self::with_options(cache_dir, StoreOptions::new(ttl), DEFAULT_SWEEP_INTERVAL).await
    }

    /// 使用完整选项创建文件存储
    pub async fn with_options(
        cache_dir: impl Into<PathBuf>,
        options: StoreOptions,
        sweep_interval: Duration,
    ) -> Result<Self> {
        let cache_dir = cache_dir.into();

        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o755);
        builder.create(&cache_dir).await.map_err(|err| {
            TokenError::io(format!(
                "failed to create token directory {}: {err}",
                cache_dir.display()
            ))
        })?;

        let sweeper = ExpirySweeper::new(&cache_dir, options.ttl, sweep_interval);
        let sweep_handle = sweeper.clone().spawn();

        info!(
            cache_dir = %cache_dir.display(),
            ttl_secs = options.ttl.as_secs(),
            refresh_on_verify = options.refresh_on_verify,
            "Initialized file token store"
        );

        Ok(Self {
            cache_dir,
            options,
            sweeper,
            sweep_handle: Mutex::new(sweep_handle),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn ttl(&self) -> Duration {
        self.options.ttl
    }

    /// 立即执行一次过期清理
    pub async fn sweep_now(&self) -> SweepReport {
        self.sweeper.sweep_once().await
    }

    /// 停止后台清理任务
    pub async fn shutdown(&self) {
        self.sweep_handle.lock().await.shutdown().await;
    }

    fn file_name(subject_id: &str, token_value: &str) -> String {
        format!(
            "{}_{}{TOKEN_EXTENSION}",
            escape_key(subject_id),
            escape_key(token_value)
        )
    }

    /// 扫描缓存目录，返回键满足 `matches(subject, token)` 的令牌文件（含已过期的）
    async fn scan<F>(&self, matches: F) -> Result<Vec<TokenFile>>
    where
        F: Fn(&str, &str) -> bool,
    {
        let mut entries = tokio::fs::read_dir(&self.cache_dir).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            let Some((subject_id, token_value)) = parse_file_name(name) else {
                continue;
            };
            if !matches(&subject_id, &token_value) {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                // 扫描期间被删除
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            found.push(TokenFile {
                path: entry.path(),
                subject_id,
                token_value,
                modified,
            });
        }

        Ok(found)
    }

    /// 过滤掉已过期的文件，并顺手删除它们
    async fn live(&self, files: Vec<TokenFile>) -> Vec<TokenFile> {
        let mut live = Vec::with_capacity(files.len());
        for file in files {
            if is_expired(file.modified, self.options.ttl) {
                remove_quietly(&file.path).await;
            } else {
                live.push(file);
            }
        }
        live
    }

    async fn files_by_token(&self, token_value: &str) -> Result<Vec<TokenFile>> {
        self.scan(|_, token| token == token_value).await
    }

    async fn files_by_subject(&self, subject_id: &str) -> Result<Vec<TokenFile>> {
        self.scan(|subject, _| subject == subject_id).await
    }

    /// 读取文件内容，文件已被并发删除时返回 `None`
    async fn read_payload(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// 写入临时文件后原子地 rename 到目标位置，避免并发读到半个文件
    async fn write_atomic(&self, file_name: &str, payload: &[u8]) -> Result<()> {
        let target = self.cache_dir.join(file_name);
        let temp = self
            .cache_dir
            .join(format!(".{file_name}{TEMP_MARKER}{}", Uuid::new_v4().simple()));

        let written = async {
            let mut opts = tokio::fs::OpenOptions::new();
            opts.write(true).create_new(true);
            #[cfg(unix)]
            opts.mode(0o644);
            let mut file = opts.open(&temp).await?;
            file.write_all(payload).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &target).await
        }
        .await;

        if let Err(err) = written {
            remove_quietly(&temp).await;
            return Err(TokenError::io(format!(
                "failed to write token file {}: {err}",
                target.display()
            )));
        }
        Ok(())
    }

    /// 把文件修改时间设为当前时间，即顺延 TTL
    async fn touch(path: PathBuf) {
        let result = tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&path)?
                .set_modified(SystemTime::now())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "Failed to refresh token file mtime"),
            Err(err) => warn!(error = %err, "Token mtime refresh task failed"),
        }
    }

    async fn save_inner(&self, token: &dyn Token) -> Result<()> {
        let token_value = token.token_value();
        let subject_id = token.subject_id();
        validate_key(token_value)?;
        validate_key(subject_id)?;

        // 不覆盖属于其他主体的同名令牌（非原子检查，尽力而为）
        let existing = self.live(self.files_by_token(token_value).await?).await;
        if existing.iter().any(|file| file.subject_id != subject_id) {
            return Err(TokenError::already_exists(token_value));
        }

        let payload = token.encode()?;
        self.write_atomic(&Self::file_name(subject_id, token_value), &payload)
            .await?;

        debug!(token = token_value, subject = subject_id, "Saved token file");
        Ok(())
    }

    async fn verify_inner(&self, token: &mut dyn Token) -> Result<bool> {
        if validate_key(token.token_value()).is_err() {
            return Ok(false);
        }

        let files = self.live(self.files_by_token(token.token_value()).await?).await;
        let Some(file) = files.into_iter().next() else {
            return Ok(false);
        };
        let Some(payload) = Self::read_payload(&file.path).await? else {
            return Ok(false);
        };

        let ok = token.verify(&payload)?;
        if ok && self.options.refresh_on_verify {
            Self::touch(file.path).await;
        }
        Ok(ok)
    }

    async fn get_inner(&self, subject_id: &str, token: &mut dyn Token) -> Result<()> {
        if validate_key(subject_id).is_err() {
            return Err(TokenError::not_found(subject_id));
        }

        let mut files = self.live(self.files_by_subject(subject_id).await?).await;
        files.sort_by(|a, b| b.modified.cmp(&a.modified));

        for file in files {
            let Some(payload) = Self::read_payload(&file.path).await? else {
                continue;
            };
            token.decode(&payload)?;
            if token.subject_id() == subject_id && token.token_value() == file.token_value {
                return Ok(());
            }
            warn!(
                file = %file.path.display(),
                subject = subject_id,
                "Token file content does not match its name"
            );
        }

        Err(TokenError::not_found(subject_id))
    }

    async fn revoke_inner(&self, keys: RevokeKeys<'_>) -> Result<()> {
        let token_value = keys.token_value.filter(|key| validate_key(key).is_ok());
        let subject_id = keys.subject_id.filter(|key| validate_key(key).is_ok());

        let mut targets: Vec<PathBuf> = Vec::new();
        match (token_value, subject_id) {
            (Some(token_value), Some(subject_id)) => {
                let exact = self.cache_dir.join(Self::file_name(subject_id, token_value));
                let by_token = self.files_by_token(token_value).await?;
                targets.extend(by_token.into_iter().map(|file| file.path));
                if !targets.contains(&exact) {
                    targets.push(exact);
                }
            }
            (Some(token_value), None) => {
                let by_token = self.files_by_token(token_value).await?;
                targets.extend(by_token.into_iter().map(|file| file.path));
            }
            (None, Some(subject_id)) => {
                let by_subject = self.files_by_subject(subject_id).await?;
                targets.extend(by_subject.into_iter().map(|file| file.path));
            }
            (None, None) => return Ok(()),
        }

        let mut first_error = None;
        for path in targets {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(file = %path.display(), "Revoked token file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "Failed to revoke token file");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// 转义文件名中的一个键
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for (i, ch) in key.char_indices() {
        match ch {
            '%' => escaped.push_str("%25"),
            '_' => escaped.push_str("%5F"),
            '.' if i == 0 => escaped.push_str("%2E"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// `escape_key` 的逆操作，遇到未知的转义序列返回 `None`
fn unescape_key(raw: &str) -> Option<String> {
    let mut key = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('%') {
        key.push_str(&rest[..pos]);
        let ch = match rest.get(pos + 1..pos + 3)? {
            "25" => '%',
            "5F" => '_',
            "2E" => '.',
            _ => return None,
        };
        key.push(ch);
        rest = &rest[pos + 3..];
    }
    key.push_str(rest);
    Some(key)
}

/// 从文件名解析出 `(subject_id, token_value)`
fn parse_file_name(name: &str) -> Option<(String, String)> {
    let stem = name.strip_suffix(TOKEN_EXTENSION)?;
    let (subject, token) = stem.split_once('_')?;
    if subject.is_empty() || token.is_empty() || token.contains('_') {
        return None;
    }
    Some((unescape_key(subject)?, unescape_key(token)?))
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            debug!(file = %path.display(), error = %err, "Failed to remove token file");
        }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
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
