pub mod local;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use local::{LocalStorage, LocalTree};
pub use s3::S3Storage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 相对存储根的路径，分隔符统一为 `/`
    pub path: String,
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
    /// 本地为内容 MD5，S3 为 ETag
    pub checksum: Option<String>,
}

/// 存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 递归列出所有文件
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除文件
    async fn delete(&self, path: &str) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建远程存储实例
pub fn create_remote_storage(config: &crate::config::RemoteConfig) -> Result<Arc<dyn Storage>> {
    tracing::info!(
        "初始化S3存储: endpoint={:?}, bucket={}, region={}",
        config.endpoint_url(),
        config.bucket,
        config.region
    );
    Ok(Arc::new(S3Storage::new(
        &config.bucket,
        &config.region,
        &config.access_key,
        &config.secret_key,
        config.endpoint_url(),
        config.prefix.clone(),
    )?) as Arc<dyn Storage>)
}

/// 计算内容指纹（与单段上传对象的 ETag 一致）
pub fn content_fingerprint(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// 流式计算文件指纹，不把整个文件读入内存
pub fn file_fingerprint(path: &std::path::Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    std::io::copy(&mut file, &mut context)?;
    Ok(format!("{:x}", context.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_fingerprint_matches_content_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(file_fingerprint(&path).unwrap(), content_fingerprint(&data));
        assert!(file_fingerprint(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_content_fingerprint_is_md5_hex() {
        assert_eq!(content_fingerprint(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_fingerprint(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
