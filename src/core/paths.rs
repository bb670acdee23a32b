//! 本地路径到远程路径的换算

use std::path::{Component, Path};
use thiserror::Error;

/// 远程路径分隔符
pub const REMOTE_SEPARATOR: char = '/';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("{file} 不在本地根目录 {root} 之下")]
    NotUnderRoot { root: String, file: String },
    #[error("远程基础路径不能为空")]
    EmptyBase,
    #[error("无效的相对路径: {0}")]
    InvalidRelative(String),
}

/// 计算本地文件相对于本地根目录的远程相对路径
///
/// 只按本地平台的路径分隔符拆分，各段以 `/` 连接。
pub fn resolve(local_root: &Path, local_file: &Path) -> Result<String, PathError> {
    let not_under_root = || PathError::NotUnderRoot {
        root: local_root.display().to_string(),
        file: local_file.display().to_string(),
    };

    let relative = local_file
        .strip_prefix(local_root)
        .map_err(|_| not_under_root())?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(not_under_root()),
        }
    }

    if parts.is_empty() {
        return Err(not_under_root());
    }
    Ok(parts.join("/"))
}

/// 保证基础路径以分隔符结尾
pub fn normalize_base(base: &str) -> Result<String, PathError> {
    let base = base.trim();
    if base.is_empty() {
        return Err(PathError::EmptyBase);
    }
    if base.ends_with(REMOTE_SEPARATOR) {
        Ok(base.to_string())
    } else {
        Ok(format!("{}{}", base, REMOTE_SEPARATOR))
    }
}

/// 拼接远程目标路径
pub fn remote_target(base: &str, relative: &str) -> Result<String, PathError> {
    let base = normalize_base(base)?;
    let relative = relative.trim_start_matches(REMOTE_SEPARATOR);

    if relative.is_empty() || relative.ends_with('/') {
        return Err(PathError::InvalidRelative(relative.to_string()));
    }
    let has_bad_component = Path::new(relative)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if has_bad_component || relative.split('/').any(|s| s.is_empty() || s == "..") {
        return Err(PathError::InvalidRelative(relative.to_string()));
    }

    Ok(format!("{}{}", base, relative))
}

/// 远程文件的父目录段，从根到父目录依次排列
pub fn parent_segments(remote_path: &str) -> Vec<String> {
    let mut parts: Vec<String> = remote_path
        .split(REMOTE_SEPARATOR)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if !remote_path.ends_with(REMOTE_SEPARATOR) {
        parts.pop();
    }
    parts
}

/// 由前 `depth` 个段组成的目录路径，形如 `/a/b/`
pub fn combine(segments: &[String], depth: usize) -> String {
    let mut path = String::from(REMOTE_SEPARATOR);
    for segment in &segments[..depth] {
        path.push_str(segment);
        path.push(REMOTE_SEPARATOR);
    }
    path
}
