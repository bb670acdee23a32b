//! 同步过程中产生的结构化事件，由调用方决定如何展示

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// 创建了远程目录
    DirectoryCreated { path: String },
    /// 文件已上传
    #[serde(rename_all = "camelCase")]
    Uploaded {
        path: String,
        remote_path: String,
        bytes: u64,
    },
    /// 远程文件已是最新
    Skipped { path: String },
    /// 单个文件失败
    Failed { path: String, error: String },
}

/// 事件发送端，没有接收方时静默丢弃
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SyncEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SyncEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}
