pub mod local;
pub mod sftp;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use local::LocalDirSession;
pub use sftp::SftpSession;

// ============ 公共常量 ============

/// 建立 TCP 连接的超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 30;
/// 单个远程命令的超时（秒）- stat, mkdir, write 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// 上传时每次写入的块大小
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// 远程会话错误
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("连接失败: {0}")]
    Connection(String),
    #[error("认证失败: {0}")]
    Auth(String),
    #[error("会话已断开: {0}")]
    SessionLost(String),
    #[error("远程操作失败: {0}")]
    Operation(String),
    #[error("上传已取消: {0}")]
    Cancelled(String),
    #[error("读取本地文件失败: {0}")]
    LocalIo(#[from] std::io::Error),
}

impl RemoteError {
    /// 会话本身已不可用，后续命令都会失败
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, RemoteError::SessionLost(_))
    }
}

/// 远程路径元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    pub size: u64,
    /// 最后修改时间，服务器未提供时为 None
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

/// 认证方式，按声明顺序依次尝试
#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => write!(f, "Password(***)"),
            AuthMethod::PrivateKey { path, .. } => {
                f.debug_struct("PrivateKey").field("path", path).finish()
            }
        }
    }
}

/// SSH 连接配置
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_methods: Vec<AuthMethod>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth_methods: Vec::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth_methods.push(AuthMethod::Password(password.into()));
        self
    }

    pub fn with_private_key(mut self, path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.auth_methods.push(AuthMethod::PrivateKey {
            path: path.into(),
            passphrase,
        });
        self
    }

    /// 检查配置是否可用于建立会话
    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.host.trim().is_empty() {
            return Err(RemoteError::Connection("主机地址不能为空".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(RemoteError::Auth("用户名不能为空".to_string()));
        }
        if self.auth_methods.is_empty() {
            return Err(RemoteError::Auth("至少需要提供密码或私钥之一".to_string()));
        }
        Ok(())
    }

    /// 用于日志的目标描述
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// 同步目标
#[derive(Debug, Clone)]
pub enum TargetConfig {
    /// 通过 SFTP 上传到远程主机
    Sftp(ConnectionConfig),
    /// 写入本地（或挂载的）目录，远程路径映射到 root 之下
    LocalDir { root: PathBuf },
}

/// 远程目录会话抽象
///
/// 路径一律使用 `/` 分隔的绝对路径。实现必须允许多个任务同时调用，
/// 如果底层连接不支持并发，由实现自行串行化。
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// 获取路径元数据，不存在时返回 None
    async fn stat(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError>;

    /// 检查路径是否存在
    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 创建单级目录（父目录必须已存在），目录已存在时视为成功
    async fn create_dir(&self, path: &str) -> Result<(), RemoteError>;

    /// 将本地文件流式写入远程路径，覆盖已有内容，返回写入字节数
    ///
    /// 每写完一块检查一次 `cancel`，取消后返回 `RemoteError::Cancelled`。
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError>;

    /// 关闭会话
    async fn close(&self) -> Result<(), RemoteError>;

    /// 获取会话名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据目标配置打开会话
pub async fn open_session(target: &TargetConfig) -> Result<Arc<dyn RemoteSession>, RemoteError> {
    match target {
        TargetConfig::Sftp(config) => {
            tracing::info!("连接 SFTP: {}", config.display_target());
            Ok(Arc::new(SftpSession::connect(config).await?) as Arc<dyn RemoteSession>)
        }
        TargetConfig::LocalDir { root } => {
            tracing::info!("使用本地目录作为目标: {}", root.display());
            Ok(Arc::new(LocalDirSession::new(root)?) as Arc<dyn RemoteSession>)
        }
    }
}
