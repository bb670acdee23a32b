use crate::core::file_state::{DescriptorError, LocalFileDescriptor};
use crate::core::paths;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（glob patterns），匹配相对路径
    pub exclude_patterns: Vec<String>,
}

/// 本地构建输出扫描器
pub struct FileScanner {
    config: ScanConfig,
    /// 预编译的排除规则
    compiled: Vec<Regex>,
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        let compiled = config
            .exclude_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(&glob_to_regex(pattern)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("无效的排除规则 {}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { config, compiled }
    }

    /// 检查相对路径是否应该被排除
    pub fn should_exclude(&self, relative: &str) -> bool {
        let relative = relative.to_lowercase();
        let file_name = relative.rsplit('/').next().unwrap_or(&relative);
        self.compiled
            .iter()
            .any(|re| re.is_match(&relative) || re.is_match(file_name))
    }

    /// 递归扫描目录下所有普通文件，结果按相对路径排序
    pub fn scan(&self, root: &Path) -> Result<Vec<LocalFileDescriptor>, DescriptorError> {
        info!("开始扫描: {}", root.display());

        let mut files = Vec::new();
        let mut excluded_count = 0;

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("无法访问路径: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = paths::resolve(root, entry.path())?;
            if self.should_exclude(&relative) {
                debug!("排除文件: {}", relative);
                excluded_count += 1;
                continue;
            }

            files.push(LocalFileDescriptor::from_path(root, entry.path())?);
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        info!(
            "扫描完成: {} 个文件, {} 个被排除 (规则 {} 条)",
            files.len(),
            excluded_count,
            self.config.exclude_patterns.len()
        );
        Ok(files)
    }
}

/// 简单的 glob 转正则：`**` 跨目录，`*` 不跨目录，`?` 单个字符
fn glob_to_regex(pattern: &str) -> String {
    let pattern = pattern.to_lowercase();
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // "**/" 可以匹配零层目录
                if chars.peek() == Some(&'/') {
                    chars.next();
                    regex.push_str("(?:.*/)?");
                } else {
                    regex.push_str(".*");
                }
            }
            '*' => regex.push_str("[^/]*"),
            '?' => regex.push_str("[^/]"),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }

    regex.push('$');
    regex
}
