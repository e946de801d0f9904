//! 把本地目录镜像到 S3 兼容的存储桶
//!
//! 每次运行并发采集本地和远程清单，上传缺失或内容不同的文件，
//! 删除本地已不存在的对象，最后输出完整报告。

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{BackupConfig, CliArgs, RemoteConfig};
pub use core::{SyncConfig, SyncEngine, SyncReport, SyncStatus};
pub use error::{ActionError, ConfigError, GatherError, Side};

use crate::core::{
    DryRunStore, FileScanner, LocalGatherer, RemoteGatherer, RemoteStore, Reporter, TransferStore,
};
use crate::storage::LocalTree;
use std::sync::Arc;

/// 按配置组装各组件并执行一次同步
pub async fn run_backup(config: &BackupConfig) -> anyhow::Result<SyncReport> {
    let tree = Arc::new(LocalTree::new(config.target_labels()?));
    let remote = storage::create_remote_storage(&config.remote)?;
    let scanner = Arc::new(FileScanner::new(&config.scan_config()));

    let (sink, reporter) = Reporter::spawn();

    let store: Arc<dyn RemoteStore> = if config.dry_run {
        tracing::info!("dry-run 模式，不会修改远程存储");
        Arc::new(DryRunStore::new(sink.clone()))
    } else {
        Arc::new(TransferStore::new(tree.clone(), remote.clone()))
    };

    let engine = SyncEngine::new(
        SyncConfig {
            pool: config.pool_config(),
        },
        Arc::new(LocalGatherer::new(tree, scanner.clone())),
        Arc::new(RemoteGatherer::new(remote, scanner)),
        store,
    );

    Ok(engine.run(sink, reporter).await)
}
