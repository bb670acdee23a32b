//! 远程目录保证：上传前确保目标文件的所有祖先目录存在

use super::cache::RemoteDirectoryCache;
use super::events::{EventSink, SyncEvent};
use super::paths::{combine, parent_segments};
use crate::storage::{RemoteError, RemoteSession};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// 目录创建失败
#[derive(Debug)]
pub struct EnsureError {
    pub path: String,
    pub source: RemoteError,
}

pub struct DirectoryEnsurer<'a> {
    session: &'a dyn RemoteSession,
    cache: &'a RemoteDirectoryCache,
    events: &'a EventSink,
    created: &'a AtomicU64,
}

impl<'a> DirectoryEnsurer<'a> {
    pub fn new(
        session: &'a dyn RemoteSession,
        cache: &'a RemoteDirectoryCache,
        events: &'a EventSink,
        created: &'a AtomicU64,
    ) -> Self {
        Self {
            session,
            cache,
            events,
            created,
        }
    }

    /// 确保 `remote_file` 的父目录链存在
    ///
    /// 从最深的目录向上找到第一个已存在的目录（锚点）：锚点及其祖先
    /// 不再检查，直接记入缓存；锚点以下的目录自上而下依次创建。
    pub async fn ensure_parent_chain(&self, remote_file: &str) -> Result<(), EnsureError> {
        let segments = parent_segments(remote_file);
        if segments.is_empty() {
            return Ok(());
        }

        let mut anchor = segments.len();
        while anchor > 0 {
            let path = combine(&segments, anchor);
            if self.cache.contains(&path) {
                break;
            }
            let exists = self
                .session
                .stat(&path)
                .await
                .map_err(|source| EnsureError {
                    path: path.clone(),
                    source,
                })?
                .is_some();
            if exists {
                break;
            }
            anchor -= 1;
        }

        // 目录存在则其祖先必然存在
        for depth in 1..=anchor {
            self.cache.mark_existing(&combine(&segments, depth));
        }

        for depth in anchor + 1..=segments.len() {
            let path = combine(&segments, depth);
            let created = self
                .cache
                .ensure_with(&path, || self.session.create_dir(&path))
                .await
                .map_err(|source| EnsureError {
                    path: path.clone(),
                    source,
                })?;

            if created {
                debug!("已创建远程目录: {}", path);
                self.created.fetch_add(1, Ordering::Relaxed);
                self.events
                    .emit(SyncEvent::DirectoryCreated { path: path.clone() })
                    .await;
            }
        }

        Ok(())
    }

    /// 远程文件已存在时，其父目录链也必然存在
    pub fn mark_parent_chain(&self, remote_file: &str) {
        let segments = parent_segments(remote_file);
        for depth in 1..=segments.len() {
            self.cache.mark_existing(&combine(&segments, depth));
        }
    }
}
