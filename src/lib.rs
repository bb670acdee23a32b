use std::fs;
use std::path::PathBuf;

pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod storage;

pub use crate::config::TransferConfig;
pub use crate::core::{LocalFileDescriptor, SyncEngine, SyncError, SyncEvent, SyncSummary};
pub use storage::{ConnectionConfig, TargetConfig};

/// 应用名，用于配置目录
pub const APP_NAME: &str = "publish-ssh";

/// 应用配置目录：默认位于系统配置目录下，
/// 可通过 config.json 中的 `data_path` 指向其他已存在的目录
pub fn app_config_dir() -> PathBuf {
    let default_config_dir = dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_NAME)));

    let config_file = default_config_dir.join("config.json");
    fs::read_to_string(&config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get("data_path")?.as_str().map(PathBuf::from))
        .filter(|p| p.is_dir())
        .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
        .unwrap_or(default_config_dir)
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            Some(PathBuf::from(xdg))
        } else {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }
}
