//! 远程目录缓存
//!
//! 记录本次会话中已确认存在的远程目录。只增不减，随会话结束丢弃。
//! 缓存中存在说明目录已被创建或观察到存在；不存在不代表远程没有该目录。

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// 目录路径统一去掉末尾分隔符（根目录保留 `/`）
fn cache_key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 并发安全的远程目录集合
#[derive(Default)]
pub struct RemoteDirectoryCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl RemoteDirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, path: &str) -> Arc<OnceCell<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(cache_key(path))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// 目录是否已确认存在
    pub fn contains(&self, path: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&cache_key(path))
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// 标记目录已存在（重复调用无副作用）
    pub fn mark_existing(&self, path: &str) {
        let _ = self.cell(path).set(());
    }

    /// 确保目录存在：同一路径同一时刻只有一个调用者执行 `create`，
    /// 其余调用者等待其结果。`create` 失败时不做标记，后续调用者可重试。
    ///
    /// 返回 `true` 表示本次调用实际执行了 `create`。
    pub async fn ensure_with<F, Fut, E>(&self, path: &str, create: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let cell = self.cell(path);
        let mut created = false;
        cell.get_or_try_init(|| {
            created = true;
            create()
        })
        .await?;
        Ok(created)
    }

    /// 已确认存在的目录数
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn mark_is_idempotent_and_ignores_trailing_separator() {
        let cache = RemoteDirectoryCache::new();
        assert!(!cache.contains("/srv/app"));

        cache.mark_existing("/srv/app/");
        cache.mark_existing("/srv/app");

        assert!(cache.contains("/srv/app"));
        assert!(cache.contains("/srv/app/"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_create_is_not_marked() {
        let cache = RemoteDirectoryCache::new();
        let result = cache
            .ensure_with("/srv/locked", || async { Err::<(), _>("permission denied") })
            .await;

        assert_eq!(result, Err("permission denied"));
        assert!(!cache.contains("/srv/locked"));

        let created = cache
            .ensure_with("/srv/locked", || async { Ok::<(), &str>(()) })
            .await
            .unwrap();
        assert!(created);
        assert!(cache.contains("/srv/locked"));
    }

    #[tokio::test]
    async fn concurrent_ensure_runs_create_once() {
        let cache = Arc::new(RemoteDirectoryCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .ensure_with("/srv/app/bin", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<(), String>(())
                    })
                    .await
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                created += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(created, 1);
        assert!(cache.contains("/srv/app/bin/"));
    }

    #[tokio::test]
    async fn concurrent_marks_are_not_lost() {
        let cache = Arc::new(RemoteDirectoryCache::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.mark_existing(&format!("/srv/app/{}", i % 8));
                cache.mark_existing(&format!("/srv/app/{}", i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len(), 32);
    }
}
