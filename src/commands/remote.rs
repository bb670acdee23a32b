use crate::storage::sftp::connect_session;
use crate::storage::{ConnectionConfig, RemoteError};
use anyhow::{Context, Result};
use std::io::Read;
use tracing::{info, warn};

/// 远程命令执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommandOutput {
    pub output: String,
    pub exit_status: i32,
}

/// 在独立的 SSH 会话中执行命令
///
/// 空白命令直接跳过并返回 `None`。
pub async fn run_remote_command(
    config: &ConnectionConfig,
    command: &str,
) -> Result<Option<RemoteCommandOutput>> {
    let command = command.trim();
    if command.is_empty() {
        return Ok(None);
    }

    info!("执行远程命令: {}", command);
    let config = config.clone();
    let cmd = command.to_string();

    let result = tokio::task::spawn_blocking(move || execute(&config, &cmd))
        .await
        .context("远程命令任务异常退出")?
        .with_context(|| format!("远程命令执行失败: {}", command))?;

    if result.exit_status != 0 {
        warn!("远程命令退出码 {}: {}", result.exit_status, command);
    }
    Ok(Some(result))
}

fn execute(config: &ConnectionConfig, command: &str) -> Result<RemoteCommandOutput, RemoteError> {
    let session = connect_session(config)?;
    let op = |e: ssh2::Error| RemoteError::Operation(e.to_string());

    let mut channel = session.channel_session().map_err(op)?;
    // stderr 并入 stdout，单一读取不会因另一路缓冲区写满而阻塞
    channel
        .handle_extended_data(ssh2::ExtendedData::Merge)
        .map_err(op)?;
    channel.exec(command).map_err(op)?;

    let output = collect_output(&mut channel)?;

    channel.wait_close().map_err(op)?;
    let exit_status = channel.exit_status().map_err(op)?;

    let _ = session.disconnect(None, "bye", None);

    Ok(RemoteCommandOutput {
        output,
        exit_status,
    })
}

/// 读取全部输出，非 UTF-8 字节按替换字符处理
fn collect_output(mut reader: impl Read) -> Result<String, RemoteError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
