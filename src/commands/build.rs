use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

/// 构建命令：`<program> publish <args> -o <output_dir>`
#[derive(Debug, Clone)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
    pub output_dir: PathBuf,
}

impl BuildCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_dir: &Path) -> Self {
        Self {
            program: program.into(),
            args,
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// 完整参数列表
    pub fn arguments(&self) -> Vec<String> {
        let mut arguments = Vec::with_capacity(self.args.len() + 3);
        arguments.push("publish".to_string());
        arguments.extend(self.args.iter().cloned());
        arguments.push("-o".to_string());
        arguments.push(self.output_dir.display().to_string());
        arguments
    }
}

/// 运行构建，继承标准输入输出，返回进程退出码
pub async fn run_build(command: &BuildCommand) -> Result<i32> {
    let arguments = command.arguments();
    info!("开始构建: {} {}", command.program, arguments.join(" "));
    println!("Starting {} {}", command.program, arguments.join(" "));

    let status = Command::new(&command.program)
        .args(&arguments)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("无法启动构建程序: {}", command.program))?;

    // 被信号终止时没有退出码
    let code = status.code().unwrap_or(-1);
    if status.success() {
        info!("构建完成");
    } else {
        error!("构建失败，退出码 {}", code);
    }
    println!("{} process exited with code {}", command.program, code);

    Ok(code)
}
