use crate::core::engine::SyncSummary;
use crate::core::paths::PathError;
use crate::storage::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 会话无法建立或认证失败，整个同步中止
    #[error("无法建立远程会话: {0}")]
    Connection(#[source] RemoteError),
    #[error("路径错误: {0}")]
    Path(#[from] PathError),
    #[error("创建远程目录失败 {path}: {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: RemoteError,
    },
    #[error("传输失败 {path}: {source}")]
    Transfer {
        path: String,
        #[source]
        source: RemoteError,
    },
    #[error("远程路径是一个目录: {0}")]
    TargetIsDirectory(String),
    /// 会话在同步过程中失效，剩余文件未处理
    #[error("同步中止: {reason}")]
    Aborted { reason: String, summary: SyncSummary },
    #[error("同步已取消")]
    Cancelled { summary: SyncSummary },
}

impl SyncError {
    /// 错误是否意味着共享会话已不可用
    pub fn is_session_fatal(&self) -> bool {
        match self {
            SyncError::Connection(_) | SyncError::Aborted { .. } => true,
            SyncError::DirectoryCreation { source, .. } | SyncError::Transfer { source, .. } => {
                source.is_session_fatal()
            }
            _ => false,
        }
    }

    /// 中止或取消时已完成部分的统计
    pub fn partial_summary(&self) -> Option<&SyncSummary> {
        match self {
            SyncError::Aborted { summary, .. } | SyncError::Cancelled { summary } => Some(summary),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_error_fatality_follows_source() {
        let lost = SyncError::Transfer {
            path: "/srv/app/a.dll".into(),
            source: RemoteError::SessionLost("reset".into()),
        };
        assert!(lost.is_session_fatal());

        let denied = SyncError::DirectoryCreation {
            path: "/srv/app/".into(),
            source: RemoteError::Operation("permission denied".into()),
        };
        assert!(!denied.is_session_fatal());
        assert!(!SyncError::TargetIsDirectory("/srv/app/bin".into()).is_session_fatal());
    }
}
