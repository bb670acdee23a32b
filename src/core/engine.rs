use crate::config::TransferConfig;
use crate::core::cache::RemoteDirectoryCache;
use crate::core::error::SyncError;
use crate::core::events::EventSink;
use crate::core::file_state::LocalFileDescriptor;
use crate::core::paths;
use crate::core::transfer::TransferWorkerPool;
use crate::storage::{open_session, RemoteSession, TargetConfig};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 同步报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub files_considered: u64,
    pub files_uploaded: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    /// 因会话失效或取消而未处理的文件
    pub files_not_attempted: u64,
    pub directories_created: u64,
    pub bytes_transferred: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.files_failed == 0 && self.files_not_attempted == 0
    }
}

/// 同步引擎
pub struct SyncEngine {
    config: TransferConfig,
    events: EventSink,
    cancel: CancellationToken,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::with_config(TransferConfig::default())
    }

    pub fn with_config(config: TransferConfig) -> Self {
        Self {
            config,
            events: EventSink::none(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// 取消同步：未开始的文件不再处理，进行中的文件被放弃
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 供外部（如 Ctrl-C 处理）共享的取消令牌
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 打开一个远程会话并同步所有文件
    pub async fn sync(
        &self,
        target: &TargetConfig,
        remote_base: &str,
        files: Vec<LocalFileDescriptor>,
    ) -> Result<SyncSummary, SyncError> {
        let remote_base = paths::normalize_base(remote_base)?;

        if files.is_empty() {
            info!("没有需要同步的文件");
            return Ok(SyncSummary::default());
        }

        let session = open_session(target).await.map_err(|e| {
            error!("连接远程失败: {}", e);
            SyncError::Connection(e)
        })?;

        self.sync_with_session(session, &remote_base, files).await
    }

    /// 在已打开的会话上同步，结束时关闭会话
    pub async fn sync_with_session(
        &self,
        session: Arc<dyn RemoteSession>,
        remote_base: &str,
        files: Vec<LocalFileDescriptor>,
    ) -> Result<SyncSummary, SyncError> {
        let start = Instant::now();

        let remote_base = match paths::normalize_base(remote_base) {
            Ok(base) => base,
            Err(e) => {
                Self::close_session(session.as_ref()).await;
                return Err(e.into());
            }
        };

        if files.is_empty() {
            Self::close_session(session.as_ref()).await;
            return Ok(SyncSummary::default());
        }

        let concurrency = self.config.effective_concurrency();
        info!(
            "开始同步: {} 个文件 -> {}:{} (并发 {})",
            files.len(),
            session.name(),
            remote_base,
            concurrency
        );

        let cache = Arc::new(RemoteDirectoryCache::new());
        let pool = TransferWorkerPool::new(session.clone(), cache, remote_base, concurrency)
            .with_events(self.events.clone())
            .with_cancel(self.cancel.clone());

        let result = pool.run(files).await;

        // 所有任务结束后才关闭会话
        Self::close_session(session.as_ref()).await;

        let mut summary = result.summary;
        summary.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "同步结束: 上传 {}，跳过 {}，失败 {}，未处理 {}，新建目录 {}，{} 字节，耗时 {}ms",
            summary.files_uploaded,
            summary.files_skipped,
            summary.files_failed,
            summary.files_not_attempted,
            summary.directories_created,
            summary.bytes_transferred,
            summary.duration_ms
        );

        if let Some(reason) = result.fatal {
            return Err(SyncError::Aborted { reason, summary });
        }
        if result.cancelled {
            return Err(SyncError::Cancelled { summary });
        }
        Ok(summary)
    }

    async fn close_session(session: &dyn RemoteSession) {
        if let Err(e) = session.close().await {
            warn!("关闭远程会话失败: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::SyncEvent;
    use crate::storage::mock::MockSession;
    use crate::storage::ConnectionConfig;
    use chrono::Duration;
    use std::path::Path;
    use tokio::sync::mpsc;

    fn write_file(root: &Path, relative: &str, content: &[u8]) -> LocalFileDescriptor {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        LocalFileDescriptor::from_path(root, &path).unwrap()
    }

    fn engine(max_concurrent: usize) -> SyncEngine {
        SyncEngine::with_config(TransferConfig {
            max_concurrent_transfers: max_concurrent,
            ..TransferConfig::default()
        })
    }

    #[tokio::test]
    async fn uploads_new_file_and_creates_parent() {
        let build = tempfile::tempdir().unwrap();
        let file = write_file(build.path(), "bin/app.dll", b"binary");
        let session = Arc::new(MockSession::new().with_dir("/srv/app"));

        let summary = engine(4)
            .sync_with_session(session.clone(), "/srv/app", vec![file])
            .await
            .unwrap();

        assert_eq!(summary.files_considered, 1);
        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(summary.files_skipped, 0);
        assert_eq!(summary.directories_created, 1);
        assert_eq!(summary.bytes_transferred, 6);
        assert!(session.has_dir("/srv/app/bin"));
        assert!(session.has_file("/srv/app/bin/app.dll"));
        assert_eq!(session.log().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn up_to_date_file_is_skipped() {
        let build = tempfile::tempdir().unwrap();
        let file = write_file(build.path(), "bin/app.dll", b"binary");
        let session = Arc::new(MockSession::new().with_file(
            "/srv/app/bin/app.dll",
            6,
            file.modified,
        ));

        let summary = engine(4)
            .sync_with_session(session.clone(), "/srv/app/", vec![file])
            .await
            .unwrap();

        assert_eq!(summary.files_uploaded, 0);
        assert_eq!(summary.files_skipped, 1);
        assert!(session.uploads().is_empty());
    }

    #[tokio::test]
    async fn shared_prefixes_are_created_once_in_order() {
        let build = tempfile::tempdir().unwrap();
        let files = vec![
            write_file(build.path(), "a/b/c/x.txt", b"x"),
            write_file(build.path(), "a/b/d/y.txt", b"y"),
        ];
        let session = Arc::new(
            MockSession::new()
                .with_dir("/srv/app")
                .with_delay(std::time::Duration::from_millis(2)),
        );

        let summary = engine(8)
            .sync_with_session(session.clone(), "/srv/app", files)
            .await
            .unwrap();

        assert_eq!(summary.files_uploaded, 2);
        assert_eq!(summary.directories_created, 4);
        for dir in ["/srv/app/a", "/srv/app/a/b", "/srv/app/a/b/c", "/srv/app/a/b/d"] {
            assert_eq!(session.mkdir_count(dir), 1, "{}", dir);
        }

        let log = session.log();
        let position = |entry: &str| log.iter().position(|l| l == entry).unwrap();
        assert!(position("mkdir /srv/app/a/b") < position("mkdir /srv/app/a/b/c"));
        assert!(position("mkdir /srv/app/a/b") < position("mkdir /srv/app/a/b/d"));
        assert!(position("mkdir /srv/app/a/b/c") < position("upload /srv/app/a/b/c/x.txt"));
        assert!(position("mkdir /srv/app/a/b/d") < position("upload /srv/app/a/b/d/y.txt"));
    }

    #[tokio::test]
    async fn many_files_under_parallelism_create_each_directory_once() {
        let build = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        for dir in ["x", "x/y", "x/y/z", "w"] {
            for i in 0..5 {
                files.push(write_file(build.path(), &format!("{}/f{}.txt", dir, i), b"data"));
            }
        }
        let session = Arc::new(
            MockSession::new()
                .with_dir("/deploy")
                .with_delay(std::time::Duration::from_millis(1)),
        );

        let summary = engine(16)
            .sync_with_session(session.clone(), "/deploy", files)
            .await
            .unwrap();

        assert_eq!(summary.files_uploaded, 20);
        assert_eq!(summary.files_failed, 0);
        for dir in ["/deploy/x", "/deploy/x/y", "/deploy/x/y/z", "/deploy/w"] {
            assert_eq!(session.mkdir_count(dir), 1, "{}", dir);
        }
        assert_eq!(summary.directories_created, 4);
    }

    #[tokio::test]
    async fn empty_file_list_opens_no_session() {
        // 无认证方式的配置一旦连接就会失败
        let target = TargetConfig::Sftp(ConnectionConfig::new("example.invalid", 22, "deploy"));

        let summary = engine(2).sync(&target, "/srv/app", Vec::new()).await.unwrap();

        assert_eq!(summary.files_considered, 0);
        assert_eq!(summary.files_uploaded, 0);
    }

    #[tokio::test]
    async fn connection_failure_is_fatal() {
        let build = tempfile::tempdir().unwrap();
        let file = write_file(build.path(), "bin/app.dll", b"binary");
        let target = TargetConfig::Sftp(ConnectionConfig::new("example.invalid", 22, "deploy"));

        let err = engine(2).sync(&target, "/srv/app", vec![file]).await.unwrap_err();

        assert!(matches!(err, SyncError::Connection(_)));
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn empty_base_is_rejected() {
        let build = tempfile::tempdir().unwrap();
        let file = write_file(build.path(), "a.txt", b"a");
        let session = Arc::new(MockSession::new());

        let err = engine(1)
            .sync_with_session(session.clone(), "  ", vec![file])
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Path(paths::PathError::EmptyBase)));
        assert_eq!(session.log(), vec!["close"]);
    }

    #[tokio::test]
    async fn session_loss_aborts_with_partial_summary() {
        let build = tempfile::tempdir().unwrap();
        let files: Vec<_> = (0..5)
            .map(|i| write_file(build.path(), &format!("lib/m{}.dll", i), b"m"))
            .collect();
        let session = Arc::new(MockSession::new().with_dir("/srv/app/lib"));
        session.lose_session_on_upload();

        let err = engine(1)
            .sync_with_session(session.clone(), "/srv/app", files)
            .await
            .unwrap_err();

        match err {
            SyncError::Aborted { summary, .. } => {
                assert_eq!(summary.files_considered, 5);
                assert_eq!(summary.files_failed, 1);
                assert_eq!(summary.files_not_attempted, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(session.log().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn external_cancel_reports_cancelled() {
        let build = tempfile::tempdir().unwrap();
        let file = write_file(build.path(), "a.txt", b"a");
        let session = Arc::new(MockSession::new().with_dir("/srv/app"));
        let engine = engine(1);
        engine.cancel();

        let err = engine
            .sync_with_session(session.clone(), "/srv/app", vec![file])
            .await
            .unwrap_err();

        let summary = err.partial_summary().cloned().unwrap();
        assert!(matches!(err, SyncError::Cancelled { .. }));
        assert_eq!(summary.files_not_attempted, 1);
        assert_eq!(session.log(), vec!["close"]);
    }

    #[tokio::test]
    async fn per_file_failure_is_recorded_not_raised() {
        let build = tempfile::tempdir().unwrap();
        let files = vec![
            write_file(build.path(), "denied/a.txt", b"a"),
            write_file(build.path(), "ok/b.txt", b"b"),
        ];
        let session = Arc::new(MockSession::new().with_dir("/srv/app"));
        session.fail_create("/srv/app/denied");

        let summary = engine(2)
            .sync_with_session(session, "/srv/app", files)
            .await
            .unwrap();

        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn events_describe_the_run() {
        let build = tempfile::tempdir().unwrap();
        let stale = write_file(build.path(), "app.dll", b"new");
        let session = Arc::new(MockSession::new().with_file(
            "/srv/app/app.dll",
            3,
            stale.modified - Duration::hours(1),
        ));
        let (tx, mut rx) = mpsc::channel(8);

        engine(1)
            .with_events(EventSink::new(tx))
            .sync_with_session(session, "/srv/app", vec![stale])
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(SyncEvent::Uploaded {
                path: "app.dll".to_string(),
                remote_path: "/srv/app/app.dll".to_string(),
                bytes: 3,
            })
        );
    }

    #[tokio::test]
    async fn syncs_to_local_directory_target() {
        let build = tempfile::tempdir().unwrap();
        let deploy = tempfile::tempdir().unwrap();
        let files = vec![
            write_file(build.path(), "bin/app.dll", b"app"),
            write_file(build.path(), "wwwroot/css/site.css", b"body{}"),
        ];
        let target = TargetConfig::LocalDir {
            root: deploy.path().to_path_buf(),
        };

        let summary = engine(2).sync(&target, "/", files).await.unwrap();

        assert_eq!(summary.files_uploaded, 2);
        assert_eq!(
            std::fs::read(deploy.path().join("wwwroot/css/site.css")).unwrap(),
            b"body{}"
        );

        // 第二次运行全部跳过
        let again = vec![
            LocalFileDescriptor::from_path(build.path(), &build.path().join("bin/app.dll")).unwrap(),
        ];
        let summary = engine(2).sync(&target, "/", again).await.unwrap();
        assert_eq!(summary.files_skipped, 1);
    }

    #[tokio::test]
    async fn rebuild_within_the_same_second_is_uploaded() {
        let build = tempfile::tempdir().unwrap();
        let deploy = tempfile::tempdir().unwrap();
        let target = TargetConfig::LocalDir {
            root: deploy.path().to_path_buf(),
        };

        let first = vec![write_file(build.path(), "app.dll", b"v1")];
        let summary = engine(1).sync(&target, "/", first).await.unwrap();
        assert_eq!(summary.files_uploaded, 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = vec![write_file(build.path(), "app.dll", b"v2")];
        let summary = engine(1).sync(&target, "/", second).await.unwrap();

        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(std::fs::read(deploy.path().join("app.dll")).unwrap(), b"v2");
    }
}
