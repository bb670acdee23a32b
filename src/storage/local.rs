use super::{RemoteError, RemoteMeta, RemoteSession, UPLOAD_CHUNK_SIZE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// 本地目录目标：远程路径映射到 `base_path` 之下
pub struct LocalDirSession {
    base_path: PathBuf,
    name: String,
}

impl LocalDirSession {
    pub fn new(path: &Path) -> Result<Self, RemoteError> {
        if !path.is_dir() {
            return Err(RemoteError::Connection(format!(
                "目标目录不存在: {}",
                path.display()
            )));
        }
        let name = format!("local:{}", path.display());
        Ok(Self {
            base_path: path.to_path_buf(),
            name,
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 写入时使用的临时文件，与目标位于同一目录
    fn temp_path(full_path: &Path) -> PathBuf {
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        full_path.with_file_name(format!(".{}.publish-tmp", file_name))
    }

    /// 分块复制，每块之前检查取消
    async fn copy_chunks(
        source: &mut fs::File,
        target: &mut fs::File,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError> {
        let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(RemoteError::Cancelled(remote.to_string()));
            }
            let read = source.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            target
                .write_all(&buffer[..read])
                .await
                .map_err(|e| RemoteError::Operation(format!("{}: {}", remote, e)))?;
            total += read as u64;
        }
        target
            .flush()
            .await
            .map_err(|e| RemoteError::Operation(format!("{}: {}", remote, e)))?;
        Ok(total)
    }
}

#[async_trait]
impl RemoteSession for LocalDirSession {
    async fn stat(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => Ok(Some(RemoteMeta {
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                is_dir: metadata.is_dir(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RemoteError::Operation(format!("{}: {}", path, e))),
        }
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        let full_path = self.resolve_path(path);

        match fs::create_dir(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && full_path.is_dir() => Ok(()),
            Err(e) => Err(RemoteError::Operation(format!("{}: {}", path, e))),
        }
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError> {
        let full_path = self.resolve_path(remote);
        let mut source = fs::File::open(local).await?;

        // 先写临时文件，再原子重命名
        let temp_path = Self::temp_path(&full_path);
        let mut target = fs::File::create(&temp_path)
            .await
            .map_err(|e| RemoteError::Operation(format!("{}: {}", remote, e)))?;

        let result = Self::copy_chunks(&mut source, &mut target, remote, cancel).await;
        drop(target);

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        fs::rename(&temp_path, &full_path)
            .await
            .map_err(|e| RemoteError::Operation(format!("{}: {}", remote, e)))?;

        Ok(bytes)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
