//! 远程存储操作的实现

use crate::core::report::LogSink;
use crate::core::worker::RemoteStore;
use crate::storage::{LocalTree, Storage};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// 把本地文件写入远程存储，键即对象路径
pub struct TransferStore {
    local: Arc<LocalTree>,
    remote: Arc<dyn Storage>,
}

impl TransferStore {
    pub fn new(local: Arc<LocalTree>, remote: Arc<dyn Storage>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl RemoteStore for TransferStore {
    async fn put(&self, key: &str) -> Result<()> {
        let data = self.local.read(key).await?;
        debug!("上传: {} ({} 字节) -> {}", key, data.len(), self.remote.name());
        self.remote.write(key, data).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        debug!("删除: {} @ {}", key, self.remote.name());
        self.remote.delete(key).await
    }
}

/// 只记录将要执行的操作，不修改远程存储
pub struct DryRunStore {
    log: LogSink,
}

impl DryRunStore {
    pub fn new(log: LogSink) -> Self {
        Self { log }
    }
}

#[async_trait]
impl RemoteStore for DryRunStore {
    async fn put(&self, key: &str) -> Result<()> {
        self.log.info(format!("[dry-run] would upload {}", key));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.log.info(format!("[dry-run] would delete {}", key));
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::Reporter;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_put_copies_local_file_under_its_key() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/a.txt"), b"hello").unwrap();

        let tree = Arc::new(LocalTree::new(vec![(
            "docs".to_string(),
            src.path().to_path_buf(),
        )]));
        let remote: Arc<dyn Storage> = Arc::new(LocalStorage::new(dst.path()));
        let store = TransferStore::new(tree, remote);

        store.put("docs/sub/a.txt").await.unwrap();
        assert_eq!(
            std::fs::read(dst.path().join("docs/sub/a.txt")).unwrap(),
            b"hello"
        );

        store.remove("docs/sub/a.txt").await.unwrap();
        assert!(!dst.path().join("docs/sub/a.txt").exists());
    }

    #[tokio::test]
    async fn test_put_unknown_root_fails() {
        let dst = tempfile::tempdir().unwrap();
        let tree = Arc::new(LocalTree::new(vec![]));
        let remote: Arc<dyn Storage> = Arc::new(LocalStorage::new(dst.path()));

        let store = TransferStore::new(tree, remote);
        assert!(store.put("nowhere/a.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_dry_run_only_logs() {
        let (sink, reporter) = Reporter::spawn();
        let store = DryRunStore::new(sink.clone());

        assert!(store.is_dry_run());
        store.put("a").await.unwrap();
        store.remove("b").await.unwrap();
        drop(store);
        drop(sink);

        let report = reporter.finish().await;
        assert!(report.contains_message("would upload a"));
        assert!(report.contains_message("would delete b"));
    }
}
