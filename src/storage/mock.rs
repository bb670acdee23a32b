//! 测试用内存会话：记录每一条远程命令，并强制"父目录必须存在"

use super::{RemoteError, RemoteMeta, RemoteSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(crate) struct MockSession {
    dirs: Mutex<HashSet<String>>,
    files: Mutex<HashMap<String, (u64, DateTime<Utc>)>>,
    /// 按发生顺序记录的命令，如 "mkdir /a"、"upload /a/x.txt"
    log: Mutex<Vec<String>>,
    failing_dirs: Mutex<HashSet<String>>,
    lose_session_on_upload: AtomicBool,
    delay: Option<Duration>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每条命令前休眠，放大并发竞争窗口
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 预置远程目录（连同所有祖先目录）
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut dirs = self.dirs.lock().unwrap();
            let mut current = normalize(path);
            while current != "/" {
                dirs.insert(current.clone());
                current = parent_of(&current);
            }
        }
        self
    }

    /// 预置远程文件，父目录一并预置
    pub fn with_file(self, path: &str, size: u64, modified: DateTime<Utc>) -> Self {
        let session = self.with_dir(&parent_of(path));
        session
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), (size, modified));
        session
    }

    pub fn fail_create(&self, path: &str) {
        self.failing_dirs.lock().unwrap().insert(normalize(path));
    }

    pub fn lose_session_on_upload(&self) {
        self.lose_session_on_upload.store(true, Ordering::SeqCst);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn mkdir_count(&self, path: &str) -> usize {
        let entry = format!("mkdir {}", normalize(path));
        self.log().iter().filter(|l| **l == entry).count()
    }

    pub fn stat_count(&self) -> usize {
        self.log().iter().filter(|l| l.starts_with("stat ")).count()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|l| l.strip_prefix("upload ").map(str::to_string))
            .collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        let path = normalize(path);
        path == "/" || self.dirs.lock().unwrap().contains(&path)
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn stat(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError> {
        self.pause().await;
        let path = normalize(path);
        self.log.lock().unwrap().push(format!("stat {}", path));

        if self.has_dir(&path) {
            return Ok(Some(RemoteMeta {
                size: 0,
                modified: None,
                is_dir: true,
            }));
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&path)
            .map(|(size, modified)| RemoteMeta {
                size: *size,
                modified: Some(*modified),
                is_dir: false,
            }))
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        self.pause().await;
        let path = normalize(path);
        self.log.lock().unwrap().push(format!("mkdir {}", path));

        if self.failing_dirs.lock().unwrap().contains(&path) {
            return Err(RemoteError::Operation(format!("{}: permission denied", path)));
        }
        if !self.has_dir(&parent_of(&path)) {
            return Err(RemoteError::Operation(format!("{}: parent missing", path)));
        }
        self.dirs.lock().unwrap().insert(path);
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError> {
        self.pause().await;
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled(remote.to_string()));
        }
        if self.lose_session_on_upload.load(Ordering::SeqCst) {
            return Err(RemoteError::SessionLost("connection reset".to_string()));
        }
        let data = tokio::fs::read(local).await?;
        if !self.has_dir(&parent_of(remote)) {
            return Err(RemoteError::Operation(format!("{}: parent missing", remote)));
        }
        self.log.lock().unwrap().push(format!("upload {}", remote));
        self.files
            .lock()
            .unwrap()
            .insert(remote.to_string(), (data.len() as u64, Utc::now()));
        Ok(data.len() as u64)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.log.lock().unwrap().push("close".to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
