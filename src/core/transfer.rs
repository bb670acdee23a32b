//! 传输工作池 - 以有限并发执行逐文件同步任务

use crate::core::cache::RemoteDirectoryCache;
use crate::core::comparator::needs_upload;
use crate::core::engine::SyncSummary;
use crate::core::ensurer::DirectoryEnsurer;
use crate::core::error::SyncError;
use crate::core::events::{EventSink, SyncEvent};
use crate::core::file_state::LocalFileDescriptor;
use crate::core::paths;
use crate::storage::RemoteSession;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    uploaded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    directories_created: AtomicU64,
    bytes_transferred: AtomicU64,
}

/// 单个文件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Uploaded(u64),
    Skipped,
}

/// 工作池运行结果
#[derive(Debug, Clone)]
pub struct PoolResult {
    pub summary: SyncSummary,
    /// 导致中止的会话级错误
    pub fatal: Option<String>,
    pub cancelled: bool,
}

/// 单个任务共享的上下文
struct TaskContext {
    session: Arc<dyn RemoteSession>,
    cache: Arc<RemoteDirectoryCache>,
    events: EventSink,
    stats: Arc<TransferStats>,
    remote_base: String,
    cancel: CancellationToken,
}

pub struct TransferWorkerPool {
    session: Arc<dyn RemoteSession>,
    cache: Arc<RemoteDirectoryCache>,
    remote_base: String,
    max_concurrent: usize,
    events: EventSink,
    cancel: CancellationToken,
}

impl TransferWorkerPool {
    pub fn new(
        session: Arc<dyn RemoteSession>,
        cache: Arc<RemoteDirectoryCache>,
        remote_base: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            session,
            cache,
            remote_base: remote_base.into(),
            max_concurrent: max_concurrent.max(1),
            events: EventSink::none(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 处理所有文件，等待全部任务结束后返回
    pub async fn run(&self, files: Vec<LocalFileDescriptor>) -> PoolResult {
        let total = files.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let stats = Arc::new(TransferStats::default());
        let errors = Arc::new(RwLock::new(Vec::<String>::new()));
        let fatal = Arc::new(RwLock::new(None::<String>));
        let context = Arc::new(TaskContext {
            session: self.session.clone(),
            cache: self.cache.clone(),
            events: self.events.clone(),
            stats: stats.clone(),
            remote_base: self.remote_base.clone(),
            cancel: self.cancel.clone(),
        });

        debug!(
            "开始传输 {} 个文件，并发数 {}",
            total, self.max_concurrent
        );

        let mut handles = Vec::new();

        for file in files {
            if self.cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            let context = context.clone();
            let errors = errors.clone();
            let fatal = fatal.clone();
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                if cancel.is_cancelled() {
                    return;
                }

                let path = file.relative_path.clone();
                // 取消优先，被中断的上传不计入失败
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = Self::sync_file(&context, &file) => Some(result),
                };

                match result {
                    None => debug!("任务已放弃: {}", path),
                    Some(Ok(FileOutcome::Uploaded(bytes))) => {
                        context.stats.uploaded.fetch_add(1, Ordering::Relaxed);
                        context
                            .stats
                            .bytes_transferred
                            .fetch_add(bytes, Ordering::Relaxed);
                    }
                    Some(Ok(FileOutcome::Skipped)) => {
                        context.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(Err(e)) => {
                        context.stats.failed.fetch_add(1, Ordering::Relaxed);
                        context
                            .events
                            .emit(SyncEvent::Failed {
                                path: path.clone(),
                                error: e.to_string(),
                            })
                            .await;
                        errors.write().await.push(format!("{}: {}", path, e));

                        if e.is_session_fatal() {
                            error!("会话已失效，放弃剩余文件: {}", e);
                            fatal.write().await.get_or_insert_with(|| e.to_string());
                            cancel.cancel();
                        } else {
                            warn!("文件同步失败: {} - {}", path, e);
                        }
                    }
                }
            });

            handles.push(handle);
        }

        // 等待所有任务完成
        for handle in handles {
            if let Err(e) = handle.await {
                error!("传输任务异常退出: {}", e);
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        let uploaded = stats.uploaded.load(Ordering::Relaxed);
        let skipped = stats.skipped.load(Ordering::Relaxed);
        let failed = stats.failed.load(Ordering::Relaxed);
        let fatal = fatal.read().await.clone();

        let summary = SyncSummary {
            files_considered: total,
            files_uploaded: uploaded,
            files_skipped: skipped,
            files_failed: failed,
            files_not_attempted: total.saturating_sub(uploaded + skipped + failed),
            directories_created: stats.directories_created.load(Ordering::Relaxed),
            bytes_transferred: stats.bytes_transferred.load(Ordering::Relaxed),
            errors: errors.read().await.clone(),
            duration_ms: 0,
        };

        PoolResult {
            cancelled: fatal.is_none() && self.cancel.is_cancelled(),
            summary,
            fatal,
        }
    }

    /// 同步单个文件
    async fn sync_file(
        context: &TaskContext,
        file: &LocalFileDescriptor,
    ) -> Result<FileOutcome, SyncError> {
        let session = context.session.as_ref();
        let remote_path = paths::remote_target(&context.remote_base, &file.relative_path)?;
        let ensurer = DirectoryEnsurer::new(
            session,
            &context.cache,
            &context.events,
            &context.stats.directories_created,
        );

        let meta = session
            .stat(&remote_path)
            .await
            .map_err(|source| SyncError::Transfer {
                path: remote_path.clone(),
                source,
            })?;

        let remote_modified = match &meta {
            None => {
                ensurer
                    .ensure_parent_chain(&remote_path)
                    .await
                    .map_err(|e| SyncError::DirectoryCreation {
                        path: e.path,
                        source: e.source,
                    })?;
                None
            }
            Some(meta) if meta.is_dir => {
                return Err(SyncError::TargetIsDirectory(remote_path));
            }
            Some(meta) => {
                ensurer.mark_parent_chain(&remote_path);
                meta.modified
            }
        };

        if !needs_upload(file, meta.is_some(), remote_modified) {
            debug!("文件已是最新，跳过: {}", file.relative_path);
            context
                .events
                .emit(SyncEvent::Skipped {
                    path: file.relative_path.clone(),
                })
                .await;
            return Ok(FileOutcome::Skipped);
        }

        let bytes = session
            .upload(&file.local_path, &remote_path, &context.cancel)
            .await
            .map_err(|source| SyncError::Transfer {
                path: remote_path.clone(),
                source,
            })?;

        info!("已上传: {} ({} 字节)", file.relative_path, bytes);
        context
            .events
            .emit(SyncEvent::Uploaded {
                path: file.relative_path.clone(),
                remote_path,
                bytes,
            })
            .await;

        Ok(FileOutcome::Uploaded(bytes))
    }
}
