use crate::core::comparator::{plan_deletes, plan_uploads, DiffSummary, RemoteAction};
use crate::core::manifest::{Manifest, ManifestGatherer};
use crate::core::report::{LogSink, Report, Reporter};
use crate::core::worker::{ActionPool, ActionQueue, PoolConfig, PoolOutcome, RemoteStore};
use crate::error::{GatherError, Side};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

/// 同步配置
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub pool: PoolConfig,
}

/// 比较引擎：采集两侧清单，比较并提交动作
pub struct ReconcileEngine {
    local: Arc<dyn ManifestGatherer>,
    remote: Arc<dyn ManifestGatherer>,
    log: LogSink,
}

impl ReconcileEngine {
    pub fn new(
        local: Arc<dyn ManifestGatherer>,
        remote: Arc<dyn ManifestGatherer>,
        log: LogSink,
    ) -> Self {
        Self { local, remote, log }
    }

    /// 执行一次比较
    ///
    /// 只等待动作提交完成，不等待动作执行。任一侧采集失败时不做任何比较，
    /// 也不提交任何动作。
    pub async fn reconcile(&self, queue: &ActionQueue) -> Result<DiffSummary, GatherError> {
        let local_task = Self::spawn_gather(self.local.clone());
        let remote_task = Self::spawn_gather(self.remote.clone());

        // 固定先等本地，再等远程
        let local = match Self::join_gather(local_task, Side::Local).await {
            Ok(m) => m,
            Err(e) => {
                remote_task.abort();
                self.log.error(e.to_string());
                return Err(e);
            }
        };

        let remote = match Self::join_gather(remote_task, Side::Remote).await {
            Ok(m) => m,
            Err(e) => {
                self.log.error(e.to_string());
                return Err(e);
            }
        };

        self.log.info(format!(
            "gathered {} local files ({}) and {} remote files ({})",
            local.len(),
            self.local.name(),
            remote.len(),
            self.remote.name()
        ));

        // 两个比较任务共享同一对只读快照
        let local = Arc::new(local);
        let remote = Arc::new(remote);

        let upload_pass = tokio::spawn(Self::upload_pass(
            local.clone(),
            remote.clone(),
            queue.clone(),
            self.log.clone(),
        ));
        let delete_pass = tokio::spawn(Self::delete_pass(
            local,
            remote,
            queue.clone(),
            self.log.clone(),
        ));

        let (uploads, deletes) = tokio::join!(upload_pass, delete_pass);
        let summary = Self::merge_passes([uploads, deletes], &self.log);

        info!(
            "比较完成: {} 个上传, {} 个删除, {} 个未提交",
            summary.uploads, summary.deletes, summary.rejected
        );

        Ok(summary)
    }

    /// 合并两个比较任务的统计，异常退出的任务记入报告
    fn merge_passes(
        passes: [Result<DiffSummary, JoinError>; 2],
        log: &LogSink,
    ) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for pass in passes {
            match pass {
                Ok(s) => summary.merge(s),
                Err(e) => log.error(format!("diff pass failed: {}", e)),
            }
        }
        summary
    }

    fn spawn_gather(gatherer: Arc<dyn ManifestGatherer>) -> JoinHandle<Result<Manifest, GatherError>> {
        tokio::spawn(async move { gatherer.gather().await })
    }

    async fn join_gather(
        task: JoinHandle<Result<Manifest, GatherError>>,
        side: Side,
    ) -> Result<Manifest, GatherError> {
        match task.await {
            Ok(result) => result,
            Err(e) => Err(GatherError::new(
                side,
                anyhow::anyhow!("gather task failed: {}", e),
            )),
        }
    }

    async fn upload_pass(
        local: Arc<Manifest>,
        remote: Arc<Manifest>,
        queue: ActionQueue,
        log: LogSink,
    ) -> DiffSummary {
        let mut summary = DiffSummary::default();

        for key in plan_uploads(&local, &remote) {
            debug!("需要上传: {}", key);
            let size = local.get(key).map_or(0, |r| r.size);
            match queue.submit(RemoteAction::Upload(key.clone())).await {
                Ok(()) => {
                    summary.uploads += 1;
                    summary.upload_bytes += size;
                }
                Err(e) => {
                    summary.rejected += 1;
                    log.error(e.to_string());
                }
            }
        }

        summary
    }

    async fn delete_pass(
        local: Arc<Manifest>,
        remote: Arc<Manifest>,
        queue: ActionQueue,
        log: LogSink,
    ) -> DiffSummary {
        let mut summary = DiffSummary::default();

        for key in plan_deletes(&local, &remote) {
            debug!("需要删除: {}", key);
            match queue.submit(RemoteAction::Delete(key.clone())).await {
                Ok(()) => summary.deletes += 1,
                Err(e) => {
                    summary.rejected += 1;
                    log.error(e.to_string());
                }
            }
        }

        summary
    }
}

/// 同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    /// 有动作失败，但运行本身完成
    CompletedWithErrors,
    /// 清单采集失败，未执行任何动作
    Failed,
}

/// 同步报告
#[derive(Debug)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub planned: DiffSummary,
    pub outcome: PoolOutcome,
    pub error: Option<GatherError>,
    pub report: Report,
}

impl SyncReport {
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds()
    }

    /// 采集失败时返回错误
    pub fn into_result(self) -> Result<SyncReport, GatherError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report)?;
        writeln!(f)?;
        writeln!(
            f,
            "uploaded {}/{} ({} bytes planned), deleted {}/{}, failed {}, rejected {} in {}s",
            self.outcome.uploaded,
            self.planned.uploads,
            self.planned.upload_bytes,
            self.outcome.deleted,
            self.planned.deletes,
            self.outcome.failed,
            self.planned.rejected,
            self.duration_secs()
        )
    }
}

/// 同步引擎：驱动完整的一次运行
pub struct SyncEngine {
    config: SyncConfig,
    local: Arc<dyn ManifestGatherer>,
    remote: Arc<dyn ManifestGatherer>,
    store: Arc<dyn RemoteStore>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        local: Arc<dyn ManifestGatherer>,
        remote: Arc<dyn ManifestGatherer>,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        Self {
            config,
            local,
            remote,
            store,
        }
    }

    /// 运行同步：采集 -> 比较 -> 提交 -> 等待 worker 排空 -> 收集报告
    pub async fn run(&self, log: LogSink, reporter: Reporter) -> SyncReport {
        let started_at = Utc::now();
        info!(
            "开始同步: {} -> {} ({} 个 worker, 队列容量 {})",
            self.local.name(),
            self.remote.name(),
            self.config.pool.workers,
            self.config.pool.queue_capacity
        );

        let (queue, pool) = ActionPool::start(&self.config.pool, self.store.clone(), log.clone());
        let engine = ReconcileEngine::new(self.local.clone(), self.remote.clone(), log.clone());

        let result = engine.reconcile(&queue).await;

        // 比较任务已结束，关闭队列后等待剩余动作执行完
        let outcome = pool.shutdown(queue).await;

        let (status, planned, error) = match result {
            Ok(summary) if outcome.failed > 0 => (SyncStatus::CompletedWithErrors, summary, None),
            Ok(summary) => (SyncStatus::Completed, summary, None),
            Err(e) => (SyncStatus::Failed, DiffSummary::default(), Some(e)),
        };

        info!(
            "同步结束: 上传 {}, 删除 {}, 失败 {}",
            outcome.uploaded, outcome.deleted, outcome.failed
        );

        drop(engine);
        drop(log);
        let report = reporter.finish().await;

        SyncReport {
            started_at,
            ended_at: Utc::now(),
            status,
            planned,
            outcome,
            error,
            report,
        }
    }
}
