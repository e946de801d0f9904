//! 文件清单 - 一次运行中某一侧（本地/远程）的只读快照

use crate::error::GatherError;
use crate::storage::FileInfo;
use async_trait::async_trait;
use std::collections::HashMap;

/// 文件标识，本地与远程共用（形如 `root/sub/file.txt`）
pub type FileKey = String;

/// 单个文件的可比较元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// 内容指纹：本地为内容 MD5，远程为 ETag
    pub fingerprint: String,
    /// 仅用于报告，不参与比较
    pub size: u64,
}

impl FileRecord {
    pub fn new(fingerprint: impl Into<String>, size: u64) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            size,
        }
    }

    /// 同一个键的两条记录是否表示相同内容，只比较指纹
    pub fn same_content(&self, other: &FileRecord) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl From<&FileInfo> for FileRecord {
    fn from(info: &FileInfo) -> Self {
        Self {
            fingerprint: info.checksum.clone().unwrap_or_default(),
            size: info.size,
        }
    }
}

/// FileKey -> FileRecord 的映射，构建完成后只读
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: HashMap<FileKey, FileRecord>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FileRecord> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileKey, &FileRecord)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FileKey> {
        self.entries.keys()
    }

    /// 返回被替换的旧记录（键重复时）
    pub(crate) fn insert(&mut self, key: FileKey, record: FileRecord) -> Option<FileRecord> {
        self.entries.insert(key, record)
    }

    pub(crate) fn extend(&mut self, other: Manifest) {
        self.entries.extend(other.entries);
    }
}

impl FromIterator<(FileKey, FileRecord)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (FileKey, FileRecord)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// 清单采集器
///
/// 本地和远程各一个实例，会被并发调用，彼此之间不共享可变状态。
/// 失败时不返回部分结果。
#[async_trait]
pub trait ManifestGatherer: Send + Sync {
    async fn gather(&self) -> Result<Manifest, GatherError>;

    /// 用于日志
    fn name(&self) -> &str;
}
