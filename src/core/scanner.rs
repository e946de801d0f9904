use crate::core::manifest::{FileRecord, Manifest, ManifestGatherer};
use crate::error::{GatherError, Side};
use crate::storage::{LocalTree, Storage};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（`**`、`*` 通配或精确文件名）
    pub exclude_patterns: Vec<String>,
}

/// 编译后的排除规则
#[derive(Debug)]
enum Pattern {
    /// `prefix/**/suffix` 形式
    Glob { prefix: String, suffix: String },
    Wildcard(Regex),
    Exact(String),
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let pattern = pattern.to_lowercase();

        if let Some((prefix, suffix)) = pattern.split_once("**") {
            return Pattern::Glob {
                prefix: prefix.trim_end_matches('/').to_string(),
                suffix: suffix.trim_start_matches('/').to_string(),
            };
        }

        if pattern.contains('*') {
            let regex_pattern = regex::escape(&pattern).replace("\\*", "[^/]*");
            if let Ok(re) = Regex::new(&format!("(^|/){}$", regex_pattern)) {
                return Pattern::Wildcard(re);
            }
            warn!("无效的排除规则，按精确匹配处理: {}", pattern);
        }

        Pattern::Exact(pattern)
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Glob { prefix, suffix } => {
                if prefix.is_empty() && suffix.is_empty() {
                    return true;
                }
                if !prefix.is_empty()
                    && path != prefix.as_str()
                    && !path.starts_with(&format!("{}/", prefix))
                {
                    return false;
                }
                suffix.is_empty() || path.ends_with(suffix.as_str())
            }
            Pattern::Wildcard(re) => re.is_match(path),
            Pattern::Exact(name) => path == name || path.ends_with(&format!("/{}", name)),
        }
    }
}

/// 文件扫描器：把存储列表转换为清单
pub struct FileScanner {
    patterns: Vec<Pattern>,
}

impl FileScanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            patterns: config
                .exclude_patterns
                .iter()
                .map(|p| Pattern::parse(p))
                .collect(),
        }
    }

    /// 检查路径是否应该被排除
    pub fn should_exclude(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.patterns.iter().any(|p| p.matches(&path))
    }

    /// 按键判断是否排除，规则作用于去掉首段（源目录名）后的路径
    ///
    /// 本地与远程共用同一个键，因此两侧的判断结果总是一致。
    pub fn should_exclude_key(&self, key: &str) -> bool {
        let relative = key.split_once('/').map_or(key, |(_, rest)| rest);
        self.should_exclude(relative)
    }

    /// 扫描存储，`key_of` 把存储内路径映射为键
    pub async fn scan_storage(
        &self,
        storage: &dyn Storage,
        key_of: impl Fn(&str) -> String,
    ) -> Result<Manifest> {
        info!("开始扫描存储: {}", storage.name());

        let files = storage.list_files(None).await?;
        debug!("list_files 返回 {} 个条目", files.len());

        let mut manifest = Manifest::new();
        let mut excluded_count = 0;
        let mut dir_count = 0;

        for file in files {
            if file.is_dir {
                dir_count += 1;
                continue;
            }

            let key = key_of(&file.path);
            if self.should_exclude_key(&key) {
                debug!("排除文件: {}", key);
                excluded_count += 1;
                continue;
            }

            let record = FileRecord::from(&file);
            manifest.insert(key, record);
        }

        info!(
            "扫描完成: {} ({} 个文件, {} 个目录, {} 个被排除)",
            storage.name(),
            manifest.len(),
            dir_count,
            excluded_count
        );

        Ok(manifest)
    }
}

/// 本地清单采集器，并发扫描所有源目录
pub struct LocalGatherer {
    tree: Arc<LocalTree>,
    scanner: Arc<FileScanner>,
}

impl LocalGatherer {
    pub fn new(tree: Arc<LocalTree>, scanner: Arc<FileScanner>) -> Self {
        Self { tree, scanner }
    }
}

#[async_trait]
impl ManifestGatherer for LocalGatherer {
    async fn gather(&self) -> Result<Manifest, GatherError> {
        let scans = self.tree.roots().iter().map(|root| {
            let label = root.label.as_str();
            async move {
                self.scanner
                    .scan_storage(&root.storage, |path| LocalTree::key_for(label, path))
                    .await
            }
        });

        // 任一目录失败则整体失败，不合并部分结果
        let manifests = futures::future::try_join_all(scans)
            .await
            .map_err(|e| GatherError::new(Side::Local, e))?;

        let mut combined = Manifest::new();
        for manifest in manifests {
            combined.extend(manifest);
        }
        Ok(combined)
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// 远程清单采集器，对象路径即为键
pub struct RemoteGatherer {
    storage: Arc<dyn Storage>,
    scanner: Arc<FileScanner>,
}

impl RemoteGatherer {
    pub fn new(storage: Arc<dyn Storage>, scanner: Arc<FileScanner>) -> Self {
        Self { storage, scanner }
    }
}

#[async_trait]
impl ManifestGatherer for RemoteGatherer {
    async fn gather(&self) -> Result<Manifest, GatherError> {
        self.scanner
            .scan_storage(self.storage.as_ref(), |path: &str| path.to_string())
            .await
            .map_err(|e| GatherError::new(Side::Remote, e))
    }

    fn name(&self) -> &str {
        self.storage.name()
    }
}
