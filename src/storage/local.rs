use super::{file_fingerprint, FileInfo, Storage};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    /// 备份源目录不会被自动创建，不存在时在扫描阶段报错
    pub fn new(path: impl AsRef<Path>) -> Self {
        let base_path = path.as_ref().to_path_buf();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        let base = prefix.map_or_else(|| self.base_path.clone(), |p| self.resolve_path(p));

        if !base.is_dir() {
            return Err(anyhow!("directory does not exist: {}", base.display()));
        }

        let base_path = self.base_path.clone();

        // 遍历和计算指纹都是阻塞操作，放到 spawn_blocking 中
        tokio::task::spawn_blocking(move || -> Result<Vec<FileInfo>> {
            let mut files = Vec::new();

            for entry in WalkDir::new(&base).follow_links(false) {
                let entry = entry?;
                let path = entry.path();
                let metadata = entry.metadata()?;

                let relative_path = path
                    .strip_prefix(&base_path)?
                    .to_str()
                    .ok_or_else(|| anyhow!("non UTF-8 path: {}", path.display()))?
                    .to_string();

                // 跳过根目录本身
                if relative_path.is_empty() {
                    continue;
                }

                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs() as i64);

                let is_dir = metadata.is_dir();
                let checksum = if metadata.is_file() {
                    Some(file_fingerprint(path)?)
                } else {
                    None
                };

                files.push(FileInfo {
                    path: Self::normalize_path(&relative_path),
                    size: if is_dir { 0 } else { metadata.len() },
                    modified_time: modified,
                    // 符号链接等非普通文件不参与同步
                    is_dir: is_dir || !metadata.is_file(),
                    checksum,
                });
            }

            Ok(files)
        })
        .await?
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = fs::read(self.resolve_path(path)).await?;
        Ok(data)
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let temp_path = full_path.with_extension("tmp");
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 一个备份源目录及其键前缀
pub struct LocalRoot {
    pub label: String,
    pub storage: LocalStorage,
}

/// 所有备份源目录
///
/// 键的形式为 `<目录名>/<相对路径>`，第一段用于找回所属目录。
pub struct LocalTree {
    roots: Vec<LocalRoot>,
}

impl LocalTree {
    /// 目录名（前缀）由调用方保证唯一，见 `BackupConfig::validate`
    pub fn new(roots: Vec<(String, PathBuf)>) -> Self {
        let roots = roots
            .into_iter()
            .map(|(label, path)| LocalRoot {
                label,
                storage: LocalStorage::new(path),
            })
            .collect();
        Self { roots }
    }

    pub fn roots(&self) -> &[LocalRoot] {
        &self.roots
    }

    /// 为某个源目录下的相对路径生成键
    pub fn key_for(label: &str, relative: &str) -> String {
        format!("{}/{}", label, relative.trim_start_matches('/'))
    }

    /// 把键解析回所属目录和相对路径
    pub fn resolve<'a>(&self, key: &'a str) -> Option<(&LocalStorage, &'a str)> {
        let (label, relative) = key.split_once('/')?;
        if relative.is_empty() {
            return None;
        }
        self.roots
            .iter()
            .find(|root| root.label == label)
            .map(|root| (&root.storage, relative))
    }

    /// 读取键对应的本地文件
    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let (storage, relative) = self
            .resolve(key)
            .ok_or_else(|| anyhow!("no local root for key {}", key))?;
        storage.read(relative).await
    }
}
