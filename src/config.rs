//! 应用配置模块

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 传输配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 最大并发传输数，0 表示按 CPU 数
    #[serde(default)]
    pub max_concurrent_transfers: usize,
    /// 排除规则（glob patterns）
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// 监听模式下变更稳定等待时间（毫秒）
    #[serde(default = "default_watch_settle_ms")]
    pub watch_settle_ms: u64,
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "*.tmp".to_string(),
        "*.publish-tmp".to_string(),
    ]
}

fn default_watch_settle_ms() -> u64 {
    500
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 0,
            exclude_patterns: default_exclude_patterns(),
            watch_settle_ms: default_watch_settle_ms(),
        }
    }
}

impl TransferConfig {
    /// 实际使用的并发数
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrent_transfers > 0 {
            return self.max_concurrent_transfers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    /// 从配置文件加载传输配置
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        if config_file.exists() {
            if let Ok(content) = fs::read_to_string(&config_file) {
                if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(transfer) = config.get("transfer") {
                        if let Ok(transfer) = serde_json::from_value::<TransferConfig>(transfer.clone()) {
                            return transfer;
                        }
                    }
                }
            }
        }
        Self::default()
    }
}
