//! SFTP 会话 - 基于 ssh2 (libssh2)
//!
//! libssh2 的会话不保证可以被多个线程同时使用，这里把 SFTP 通道放在一把
//! `std::sync::Mutex` 之后，每条远程命令都在 `spawn_blocking` 中持锁执行。
//! 上传按块加锁，多个上传可以在块粒度上交错进行。

use super::{
    AuthMethod, ConnectionConfig, RemoteError, RemoteMeta, RemoteSession, CONNECT_TIMEOUT_SECS,
    OP_TIMEOUT_SECS, UPLOAD_CHUNK_SIZE,
};
use async_trait::async_trait;
use chrono::DateTime;
use ssh2::{ErrorCode, Session, Sftp};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// libssh2 中表示底层连接已不可用的错误码
const SOCKET_ERROR_CODES: [i32; 6] = [
    -1,  // LIBSSH2_ERROR_SOCKET_NONE
    -7,  // LIBSSH2_ERROR_SOCKET_SEND
    -9,  // LIBSSH2_ERROR_TIMEOUT
    -13, // LIBSSH2_ERROR_SOCKET_DISCONNECT
    -30, // LIBSSH2_ERROR_SOCKET_TIMEOUT
    -43, // LIBSSH2_ERROR_SOCKET_RECV
];

/// SFTP 状态码：文件不存在 / 路径不存在
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_SUCH_PATH: i32 = 10;

struct SftpChannel {
    session: Session,
    sftp: Sftp,
}

pub struct SftpSession {
    channel: Arc<Mutex<SftpChannel>>,
    name: String,
}

impl SftpSession {
    /// 建立连接、认证并打开 SFTP 子系统
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, RemoteError> {
        let config = config.clone();
        let name = format!("sftp://{}", config.display_target());

        let channel = tokio::task::spawn_blocking(move || -> Result<SftpChannel, RemoteError> {
            let session = connect_session(&config)?;
            let sftp = session
                .sftp()
                .map_err(|e| RemoteError::Connection(format!("无法启动 SFTP 子系统: {}", e)))?;
            Ok(SftpChannel { session, sftp })
        })
        .await
        .map_err(|e| RemoteError::Connection(format!("连接任务异常: {}", e)))??;

        debug!("SFTP 会话已建立: {}", name);

        Ok(Self {
            channel: Arc::new(Mutex::new(channel)),
            name,
        })
    }

    /// 在阻塞线程中持锁执行一条远程命令
    async fn run<T, F>(&self, f: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(&SftpChannel) -> Result<T, RemoteError> + Send + 'static,
    {
        let channel = self.channel.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&channel)?;
            f(&guard)
        })
        .await
        .map_err(|e| RemoteError::SessionLost(format!("后台任务异常: {}", e)))?
    }
}

/// 建立已认证的 SSH 会话（SFTP 与远程命令共用）
pub(crate) fn connect_session(config: &ConnectionConfig) -> Result<Session, RemoteError> {
    config.validate()?;

    let target = format!("{}:{}", config.host, config.port);
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| RemoteError::Connection(format!("无法解析 {}: {}", target, e)))?
        .next()
        .ok_or_else(|| RemoteError::Connection(format!("无法解析 {}", target)))?;

    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .map_err(|e| RemoteError::Connection(format!("{}: {}", target, e)))?;

    let mut session =
        Session::new().map_err(|e| RemoteError::Connection(format!("初始化会话失败: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| RemoteError::Connection(format!("{} 握手失败: {}", target, e)))?;
    session.set_timeout((OP_TIMEOUT_SECS * 1000) as u32);

    for method in &config.auth_methods {
        let result = match method {
            AuthMethod::Password(password) => session.userauth_password(&config.username, password),
            AuthMethod::PrivateKey { path, passphrase } => session.userauth_pubkey_file(
                &config.username,
                None,
                path,
                passphrase.as_deref(),
            ),
        };
        match result {
            Ok(()) if session.authenticated() => break,
            Ok(()) => {}
            Err(e) => debug!("认证方式 {:?} 失败: {}", method, e),
        }
    }

    if !session.authenticated() {
        return Err(RemoteError::Auth(format!(
            "{} 的所有认证方式均被拒绝",
            config.display_target()
        )));
    }

    Ok(session)
}

fn lock(channel: &Mutex<SftpChannel>) -> Result<MutexGuard<'_, SftpChannel>, RemoteError> {
    channel
        .lock()
        .map_err(|_| RemoteError::SessionLost("SFTP 通道锁已失效".to_string()))
}

/// 将 ssh2 错误区分为会话级错误与单次操作错误
fn classify(err: ssh2::Error, context: &str) -> RemoteError {
    match err.code() {
        ErrorCode::Session(code) if SOCKET_ERROR_CODES.contains(&code) => {
            RemoteError::SessionLost(format!("{}: {}", context, err))
        }
        _ => RemoteError::Operation(format!("{}: {}", context, err)),
    }
}

fn classify_io(err: io::Error, context: &str) -> RemoteError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::TimedOut => RemoteError::SessionLost(format!("{}: {}", context, err)),
        _ => RemoteError::Operation(format!("{}: {}", context, err)),
    }
}

fn is_not_found(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH)
    )
}

#[async_trait]
impl RemoteSession for SftpSession {
    async fn stat(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError> {
        let path = path.to_string();
        self.run(move |channel| match channel.sftp.stat(Path::new(&path)) {
            Ok(stat) => Ok(Some(RemoteMeta {
                size: stat.size.unwrap_or(0),
                modified: stat
                    .mtime
                    .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
                is_dir: stat.is_dir(),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(classify(e, &path)),
        })
        .await
    }

    async fn create_dir(&self, path: &str) -> Result<(), RemoteError> {
        let path = path.trim_end_matches('/').to_string();
        self.run(move |channel| {
            let dir = Path::new(&path);
            match channel.sftp.mkdir(dir, 0o755) {
                Ok(()) => Ok(()),
                Err(e) => {
                    // 目录可能已被其他进程抢先创建
                    match channel.sftp.stat(dir) {
                        Ok(stat) if stat.is_dir() => {
                            debug!("目录已存在，跳过创建: {}", path);
                            Ok(())
                        }
                        _ => Err(classify(e, &path)),
                    }
                }
            }
        })
        .await
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, RemoteError> {
        let channel = self.channel.clone();
        let local = local.to_path_buf();
        let remote = remote.to_string();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || -> Result<u64, RemoteError> {
            let mut source = std::fs::File::open(&local)?;
            let mut target = {
                let guard = lock(&channel)?;
                guard
                    .sftp
                    .create(Path::new(&remote))
                    .map_err(|e| classify(e, &remote))?
            };

            let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
            let mut total = 0u64;
            let result = loop {
                // 任务被放弃后不再继续写入
                if cancel.is_cancelled() {
                    debug!("上传已取消: {} ({} 字节已写入)", remote, total);
                    break Err(RemoteError::Cancelled(remote.clone()));
                }
                let read = match source.read(&mut buffer) {
                    Ok(0) => break Ok(total),
                    Ok(n) => n,
                    Err(e) => break Err(RemoteError::LocalIo(e)),
                };
                let _guard = lock(&channel)?;
                if let Err(e) = target.write_all(&buffer[..read]) {
                    break Err(classify_io(e, &remote));
                }
                total += read as u64;
            };

            // 关闭远程文件句柄同样是一条远程命令
            let _guard = lock(&channel)?;
            drop(target);
            result
        })
        .await
        .map_err(|e| RemoteError::SessionLost(format!("后台任务异常: {}", e)))?
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.run(|channel| {
            if let Err(e) = channel.session.disconnect(None, "publish finished", None) {
                warn!("断开 SSH 会话失败: {}", e);
            }
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
