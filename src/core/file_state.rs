//! 本地文件描述 - 每次同步中只读

use crate::core::paths::{self, PathError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("读取文件元数据失败 {path}: {source}")]
    Metadata {
        path: String,
        source: std::io::Error,
    },
    #[error("不是普通文件: {0}")]
    NotAFile(String),
}

/// 待同步的本地文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileDescriptor {
    /// 本地绝对路径
    pub local_path: PathBuf,
    /// 相对本地根目录的路径，使用 `/` 分隔
    pub relative_path: String,
    /// 本地最后修改时间（UTC）
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl LocalFileDescriptor {
    /// 读取文件元数据并计算相对路径
    pub fn from_path(local_root: &Path, local_path: &Path) -> Result<Self, DescriptorError> {
        let relative_path = paths::resolve(local_root, local_path)?;
        let metadata = std::fs::metadata(local_path).map_err(|source| DescriptorError::Metadata {
            path: local_path.display().to_string(),
            source,
        })?;

        if !metadata.is_file() {
            return Err(DescriptorError::NotAFile(local_path.display().to_string()));
        }

        // 部分平台不提供修改时间，按最早时间处理
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Ok(Self {
            local_path: local_path.to_path_buf(),
            relative_path,
            modified,
            size: metadata.len(),
        })
    }
}
