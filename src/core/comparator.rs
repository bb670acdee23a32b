use crate::core::file_state::LocalFileDescriptor;
use chrono::{DateTime, Utc};

/// 判断本地文件是否需要上传
///
/// - 远程不存在：需要上传
/// - 远程存在但没有修改时间：需要上传
/// - 否则仅当本地修改时间严格晚于远程时上传，时间相同视为已是最新
///
/// 按完整精度比较，同一秒内的重新构建也会被上传。
pub fn needs_upload(
    local: &LocalFileDescriptor,
    remote_exists: bool,
    remote_modified: Option<DateTime<Utc>>,
) -> bool {
    if !remote_exists {
        return true;
    }

    match remote_modified {
        Some(remote) => {
            let newer = local.modified > remote;
            tracing::debug!(
                "比较修改时间: {} (local={}, remote={}, newer={})",
                local.relative_path,
                local.modified,
                remote,
                newer
            );
            newer
        }
        None => true,
    }
}
