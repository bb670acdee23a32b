//! 构建期间的输出目录变更跟踪

use crate::core::file_state::LocalFileDescriptor;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 本次运行中发生变化的路径集合
#[derive(Clone, Default)]
pub struct ChangeSet {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: PathBuf) {
        self.paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path);
    }

    pub fn remove(&self, path: &Path) {
        self.paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    pub fn len(&self) -> usize {
        self.paths.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按文件系统事件更新集合
    fn apply(&self, event: Event) {
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                self.remove(&event.paths[0]);
                self.insert(event.paths[1].clone());
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                for path in &event.paths {
                    self.remove(path);
                }
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths {
                    self.insert(path);
                }
            }
            _ => {}
        }
    }

    /// 生成不可变快照：仅保留根目录下仍然存在的普通文件，按相对路径排序
    ///
    /// 新建目录在监听生效前写入的文件不会产生事件，目录一律展开。
    pub fn snapshot(&self, root: &Path) -> Vec<LocalFileDescriptor> {
        let tracked: Vec<PathBuf> = self
            .paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();

        let mut candidates = BTreeSet::new();
        for path in tracked {
            if path.is_dir() {
                candidates.extend(
                    WalkDir::new(&path)
                        .follow_links(true)
                        .into_iter()
                        .filter_map(Result::ok)
                        .filter(|entry| entry.file_type().is_file())
                        .map(|entry| entry.into_path()),
                );
            } else if path.is_file() {
                candidates.insert(path);
            }
        }

        let mut files: Vec<LocalFileDescriptor> = candidates
            .iter()
            .filter_map(|path| match LocalFileDescriptor::from_path(root, path) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    debug!("忽略变更路径 {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files
    }
}

/// 递归监听目录，把变更记入 `ChangeSet`
pub struct ChangeTracker {
    root: PathBuf,
    changes: ChangeSet,
    settle: Duration,
    _watcher: RecommendedWatcher,
}

impl ChangeTracker {
    pub fn start(root: &Path, settle: Duration) -> notify::Result<Self> {
        let changes = ChangeSet::new();
        let sink = changes.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => sink.apply(event),
            Err(e) => warn!("文件监听错误: {}", e),
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            root: root.to_path_buf(),
            changes,
            settle,
            _watcher: watcher,
        })
    }

    /// 等待事件稳定后停止监听并返回变更文件
    pub async fn finish(self) -> Vec<LocalFileDescriptor> {
        tokio::time::sleep(self.settle).await;
        let files = self.changes.snapshot(&self.root);
        debug!("监听结束: {} 个变更路径, {} 个文件", self.changes.len(), files.len());
        files
    }
}
