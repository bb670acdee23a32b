use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use publish_ssh_lib::commands::build::{run_build, BuildCommand};
use publish_ssh_lib::commands::remote::run_remote_command;
use publish_ssh_lib::core::{ChangeTracker, EventSink, FileScanner, ScanConfig};
use publish_ssh_lib::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use publish_ssh_lib::{
    app_config_dir, ConnectionConfig, SyncEngine, SyncEvent, SyncSummary, TargetConfig,
    TransferConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

/// Publish build output to a remote server over SSH, uploading only what changed
#[derive(Parser, Debug)]
#[command(name = "publish-ssh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Remote host
    #[arg(long)]
    ssh_host: Option<String>,

    /// Remote SSH port
    #[arg(long, default_value_t = 22)]
    ssh_port: u16,

    /// SSH user name
    #[arg(long)]
    ssh_user: Option<String>,

    /// SSH password
    #[arg(long)]
    ssh_password: Option<String>,

    /// Private key file
    #[arg(long, value_name = "FILE")]
    ssh_keyfile: Option<PathBuf>,

    /// Remote base path
    #[arg(long)]
    ssh_path: Option<String>,

    /// Command to run on the remote host before uploading
    #[arg(long)]
    ssh_cmd_before: Option<String>,

    /// Command to run on the remote host after uploading
    #[arg(long)]
    ssh_cmd_after: Option<String>,

    /// Local output directory (a temporary directory when omitted)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Deploy into a local or mounted directory instead of over SSH
    #[arg(long, value_name = "DIR", conflicts_with = "ssh_host")]
    target_dir: Option<PathBuf>,

    /// Upload every file of the output directory, not only the files the build changed
    #[arg(long)]
    all: bool,

    /// Skip the build and upload the existing output directory
    #[arg(long, requires = "output")]
    no_build: bool,

    /// Maximum number of concurrent transfers
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Program used to build, invoked as `<program> publish <args> -o <dir>`
    #[arg(long, default_value = "dotnet")]
    build_program: String,

    /// Print debug output to the console
    #[arg(short, long)]
    verbose: bool,

    /// Arguments passed through to the build
    #[arg(last = true)]
    build_args: Vec<String>,
}

impl Cli {
    /// 解析同步目标与远程基础路径
    fn target(&self) -> Result<(TargetConfig, String), String> {
        if let Some(root) = &self.target_dir {
            let base = self.ssh_path.clone().unwrap_or_else(|| "/".to_string());
            return Ok((TargetConfig::LocalDir { root: root.clone() }, base));
        }

        let host = self.ssh_host.as_deref().ok_or("--ssh-host is required")?;
        let user = self.ssh_user.as_deref().ok_or("--ssh-user is required")?;
        let path = self.ssh_path.as_deref().ok_or("--ssh-path is required")?;
        if self.ssh_password.is_none() && self.ssh_keyfile.is_none() {
            return Err("either --ssh-password or --ssh-keyfile is required".to_string());
        }

        let mut config = ConnectionConfig::new(host, self.ssh_port, user);
        if let Some(keyfile) = &self.ssh_keyfile {
            config = config.with_private_key(keyfile, None);
        }
        if let Some(password) = &self.ssh_password {
            config = config.with_password(password);
        }
        Ok((TargetConfig::Sftp(config), path.to_string()))
    }
}

/// 初始化日志系统：文件日志按配置级别，控制台只输出警告（--verbose 时输出调试信息）
fn init_logging(verbose: bool) {
    let config = LogConfig::load(&app_config_dir());
    let console_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let level = config.tracing_level().max(console_level);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::from_level(console_level));

    // 文件日志创建失败时只保留控制台输出
    let file_layer = if config.enabled {
        SizeRotatingWriter::new(&get_log_dir(), config.max_size_mb)
            .ok()
            .map(|writer| {
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
            })
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_event(event: SyncEvent) {
    match event {
        SyncEvent::DirectoryCreated { path } => println!("Creating directory {}", path),
        SyncEvent::Uploaded { path, bytes, .. } => println!("Uploaded {} ({} bytes)", path, bytes),
        SyncEvent::Skipped { path } => println!("Skipped {} (up to date)", path),
        SyncEvent::Failed { path, error } => eprintln!("Failed {}: {}", path, error),
    }
}

fn print_summary(summary: &SyncSummary) {
    println!(
        "\n{} uploaded, {} skipped, {} failed, {} not attempted, {} directories created, {} bytes in {}ms",
        summary.files_uploaded,
        summary.files_skipped,
        summary.files_failed,
        summary.files_not_attempted,
        summary.directories_created,
        summary.bytes_transferred,
        summary.duration_ms
    );
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// 执行远程命令并打印输出
async fn remote_command(target: &TargetConfig, label: &str, command: Option<&str>) -> Result<()> {
    let (TargetConfig::Sftp(config), Some(command)) = (target, command) else {
        return Ok(());
    };
    if command.trim().is_empty() {
        return Ok(());
    }

    println!("Try to call {} command: {}", label, command);
    if let Some(result) = run_remote_command(config, command).await? {
        println!("{}", result.output);
    }
    Ok(())
}

async fn run(cli: Cli, target: TargetConfig, remote_base: String) -> Result<bool> {
    let config_dir = app_config_dir();
    let mut transfer_config = TransferConfig::load(&config_dir);
    if let Some(jobs) = cli.jobs {
        transfer_config.max_concurrent_transfers = jobs;
    }
    println!("Processor Count: {}", transfer_config.effective_concurrency());

    // 未指定输出目录时使用临时目录，结束后删除
    let (output_dir, temp_dir) = match &cli.output {
        Some(dir) => (absolute(dir)?, None),
        None => {
            let dir = std::env::temp_dir().join(format!("publish.{}", uuid::Uuid::new_v4()));
            (dir.clone(), Some(dir))
        }
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("无法创建输出目录: {}", output_dir.display()))?;
    let _cleanup = scopeguard::guard(temp_dir, |dir| {
        if let Some(dir) = dir {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("删除临时目录失败 {}: {}", dir.display(), e);
            }
        }
    });

    let scanner = FileScanner::new(ScanConfig {
        exclude_patterns: transfer_config.exclude_patterns.clone(),
    });

    let files = if cli.no_build {
        scanner.scan(&output_dir)?
    } else {
        let tracker = if cli.all {
            None
        } else {
            Some(ChangeTracker::start(
                &output_dir,
                Duration::from_millis(transfer_config.watch_settle_ms),
            )?)
        };

        let build = BuildCommand::new(&cli.build_program, cli.build_args.clone(), &output_dir);
        if run_build(&build).await? != 0 {
            return Ok(false);
        }

        match tracker {
            Some(tracker) => tracker
                .finish()
                .await
                .into_iter()
                .filter(|file| !scanner.should_exclude(&file.relative_path))
                .collect(),
            None => scanner.scan(&output_dir)?,
        }
    };

    if files.is_empty() {
        println!("No files needs to be uploaded!");
        return Ok(true);
    }

    let destination = match &target {
        TargetConfig::Sftp(config) => config.display_target(),
        TargetConfig::LocalDir { root } => root.display().to_string(),
    };
    println!("\nUploading {} files to {}{}", files.len(), destination, remote_base);

    remote_command(&target, "before", cli.ssh_cmd_before.as_deref()).await?;

    let (tx, mut rx) = mpsc::channel(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(event);
        }
    });

    let engine = SyncEngine::with_config(transfer_config).with_events(EventSink::new(tx));
    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消同步");
            cancel.cancel();
        }
    });

    let outcome = engine.sync(&target, &remote_base, files).await;
    // 关闭事件通道，等待输出完毕
    drop(engine);
    let _ = printer.await;

    let success = match outcome {
        Ok(summary) => {
            print_summary(&summary);
            summary.is_success()
        }
        Err(e) => {
            if let Some(summary) = e.partial_summary() {
                print_summary(summary);
            }
            error!("同步失败: {}", e);
            eprintln!("Error uploading files to server: {}", e);
            false
        }
    };

    if success {
        remote_command(&target, "after", cli.ssh_cmd_after.as_deref()).await?;
    }
    Ok(success)
}

#[tokio::main]
async fn main() -> ExitCode {
    let started = Instant::now();
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let (target, remote_base) = match cli.target() {
        Ok(target) => target,
        Err(message) => Cli::command()
            .error(ErrorKind::MissingRequiredArgument, message)
            .exit(),
    };

    info!("publish-ssh {} 启动", env!("CARGO_PKG_VERSION"));

    let code = match run(cli, target, remote_base).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("发布失败: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    };

    println!("\nPublished in {}s", started.elapsed().as_secs());
    code
}
