//! 远程动作 worker 池
//!
//! 有界队列提供背压：比较阶段提交过快时会在 `submit` 上等待。
//! 在途计数在提交时加一、处理完成后减一，归零即表示队列已排空。

use crate::core::comparator::RemoteAction;
use crate::core::report::LogSink;
use crate::error::ActionError;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 远程存储操作
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 把键对应的本地文件上传到远程
    async fn put(&self, key: &str) -> Result<()>;

    /// 删除键对应的远程对象
    async fn remove(&self, key: &str) -> Result<()>;

    /// 只记录不执行的实现返回 true，池不会把它的动作计为完成
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// worker 池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// worker 数量
    pub workers: usize,
    /// 队列容量
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 20,
        }
    }
}

/// 已提交但未处理完的动作计数
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// 等待计数归零
    pub async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // 先登记再检查，避免错过 notify_waiters
            notified.as_mut().enable();

            if self.current() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// 执行统计
#[derive(Debug, Default)]
struct PoolStats {
    uploaded: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
}

/// 执行结果快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub uploaded: u64,
    pub deleted: u64,
    pub failed: u64,
}

/// 提交端，可克隆给多个比较任务
#[derive(Debug, Clone)]
pub struct ActionQueue {
    tx: mpsc::Sender<RemoteAction>,
    in_flight: Arc<InFlight>,
}

impl ActionQueue {
    /// 提交动作，队列满时等待
    ///
    /// 先占位再计数，等待中被取消不会留下在途计数。
    pub async fn submit(&self, action: RemoteAction) -> Result<(), ActionError> {
        match self.tx.reserve().await {
            Ok(permit) => {
                self.in_flight.add();
                permit.send(action);
                Ok(())
            }
            Err(_) => Err(ActionError::QueueClosed {
                key: action.into_key(),
            }),
        }
    }
}

/// worker 池
pub struct ActionPool {
    workers: Vec<JoinHandle<()>>,
    in_flight: Arc<InFlight>,
    stats: Arc<PoolStats>,
}

impl ActionPool {
    /// 启动 worker，返回提交端和池
    pub fn start(
        config: &PoolConfig,
        store: Arc<dyn RemoteStore>,
        log: LogSink,
    ) -> (ActionQueue, ActionPool) {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let in_flight = Arc::new(InFlight::default());
        let stats = Arc::new(PoolStats::default());

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(Self::run_worker(
                    id,
                    rx.clone(),
                    store.clone(),
                    log.clone(),
                    in_flight.clone(),
                    stats.clone(),
                ))
            })
            .collect();

        debug!("已启动 {} 个 worker", workers);

        (
            ActionQueue {
                tx,
                in_flight: in_flight.clone(),
            },
            ActionPool {
                workers: handles,
                in_flight,
                stats,
            },
        )
    }

    async fn run_worker(
        id: usize,
        rx: Arc<Mutex<mpsc::Receiver<RemoteAction>>>,
        store: Arc<dyn RemoteStore>,
        log: LogSink,
        in_flight: Arc<InFlight>,
        stats: Arc<PoolStats>,
    ) {
        loop {
            // 锁只在取动作期间持有
            let next = rx.lock().await.recv().await;
            let Some(action) = next else {
                break;
            };

            debug!("worker {} 处理: {}", id, action);

            match Self::execute(store.as_ref(), &action).await {
                Ok(()) if store.is_dry_run() => {}
                Ok(()) => {
                    match action {
                        RemoteAction::Upload(ref key) => {
                            stats.uploaded.fetch_add(1, Ordering::Relaxed);
                            log.info(format!("uploaded {}", key));
                        }
                        RemoteAction::Delete(ref key) => {
                            stats.deleted.fetch_add(1, Ordering::Relaxed);
                            log.info(format!("deleted {}", key));
                        }
                    }
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    log.error(e.to_string());
                }
            }

            in_flight.done();
        }

        debug!("worker {} 退出", id);
    }

    async fn execute(store: &dyn RemoteStore, action: &RemoteAction) -> Result<(), ActionError> {
        match action {
            RemoteAction::Upload(key) => {
                store.put(key).await.map_err(|source| ActionError::Put {
                    key: key.clone(),
                    source,
                })
            }
            RemoteAction::Delete(key) => {
                store.remove(key).await.map_err(|source| ActionError::Remove {
                    key: key.clone(),
                    source,
                })
            }
        }
    }

    /// 当前在途动作数
    pub fn pending(&self) -> usize {
        self.in_flight.current()
    }

    /// 等待所有已提交的动作处理完成
    pub async fn wait_idle(&self) {
        self.in_flight.wait().await;
    }

    pub fn outcome(&self) -> PoolOutcome {
        PoolOutcome {
            uploaded: self.stats.uploaded.load(Ordering::Relaxed),
            deleted: self.stats.deleted.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// 关闭队列并等待 worker 退出
    ///
    /// 队列中剩余的动作会先被处理完。
    pub async fn shutdown(mut self, queue: ActionQueue) -> PoolOutcome {
        drop(queue);
        self.wait_idle().await;

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("worker 异常退出: {}", e);
            }
        }

        self.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::Reporter;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// 记录调用的测试替身，`fail` 中的键会失败
    #[derive(Default)]
    struct RecordingStore {
        puts: StdMutex<Vec<String>>,
        removes: StdMutex<Vec<String>>,
        fail: HashSet<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl RemoteStore for RecordingStore {
        async fn put(&self, key: &str) -> Result<()> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.puts.lock().unwrap().push(key.to_string());
            if self.fail.contains(key) {
                anyhow::bail!("injected failure");
            }
            Ok(())
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.removes.lock().unwrap().push(key.to_string());
            if self.fail.contains(key) {
                anyhow::bail!("injected failure");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_actions() {
        let store = Arc::new(RecordingStore {
            fail: ["b".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let (sink, reporter) = Reporter::spawn();
        let config = PoolConfig {
            workers: 2,
            queue_capacity: 1,
        };
        let (queue, pool) = ActionPool::start(&config, store.clone(), sink.clone());

        for key in ["a", "b", "c"] {
            queue.submit(RemoteAction::Upload(key.into())).await.unwrap();
        }
        queue.submit(RemoteAction::Delete("d".into())).await.unwrap();

        let outcome = pool.shutdown(queue).await;
        drop(sink);
        let report = reporter.finish().await;

        assert_eq!(
            outcome,
            PoolOutcome {
                uploaded: 2,
                deleted: 1,
                failed: 1
            }
        );

        let mut puts = store.puts.lock().unwrap().clone();
        puts.sort();
        assert_eq!(puts, vec!["a", "b", "c"]);
        assert_eq!(*store.removes.lock().unwrap(), vec!["d"]);

        // 每个动作恰好一条记录
        assert_eq!(report.len(), 4);
        assert!(report.contains_message("put b failed: injected failure"));
        assert!(report.contains_message("deleted d"));
    }

    struct NoopDryRun;

    #[async_trait]
    impl RemoteStore for NoopDryRun {
        async fn put(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        fn is_dry_run(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_dry_run_store_is_not_counted_as_done() {
        let (sink, reporter) = Reporter::spawn();
        let (queue, pool) =
            ActionPool::start(&PoolConfig::default(), Arc::new(NoopDryRun), sink.clone());

        queue.submit(RemoteAction::Upload("a".into())).await.unwrap();
        queue.submit(RemoteAction::Delete("b".into())).await.unwrap();

        let outcome = pool.shutdown(queue).await;
        drop(sink);
        let report = reporter.finish().await;

        assert_eq!(outcome, PoolOutcome::default());
        assert!(!report.contains_message("uploaded a"));
        assert!(!report.contains_message("deleted b"));
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_slow_actions() {
        let store = Arc::new(RecordingStore {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let (sink, _reporter) = Reporter::spawn();
        let config = PoolConfig {
            workers: 3,
            queue_capacity: 2,
        };
        let (queue, pool) = ActionPool::start(&config, store.clone(), sink);

        for i in 0..10 {
            queue
                .submit(RemoteAction::Upload(format!("f{}", i)))
                .await
                .unwrap();
        }

        pool.wait_idle().await;
        assert_eq!(pool.pending(), 0);
        assert_eq!(store.puts.lock().unwrap().len(), 10);

        pool.shutdown(queue).await;
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let store = Arc::new(RecordingStore {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let (sink, _reporter) = Reporter::spawn();
        let config = PoolConfig {
            workers: 1,
            queue_capacity: 1,
        };
        let (queue, pool) = ActionPool::start(&config, store, sink);

        // 第一个被 worker 取走，第二个占满队列
        queue.submit(RemoteAction::Upload("a".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.submit(RemoteAction::Upload("b".into())).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            queue.submit(RemoteAction::Upload("c".into())),
        )
        .await;
        assert!(blocked.is_err(), "submit should wait while the queue is full");

        pool.shutdown(queue).await;
    }

    #[tokio::test]
    async fn test_submit_after_workers_gone_is_rejected() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let queue = ActionQueue {
            tx,
            in_flight: Arc::new(InFlight::default()),
        };

        let err = queue
            .submit(RemoteAction::Delete("x".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::QueueClosed { ref key } if key == "x"));
        assert_eq!(queue.in_flight.current(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_wait_returns_immediately_when_idle() {
        let in_flight = InFlight::default();
        tokio::time::timeout(Duration::from_millis(100), in_flight.wait())
            .await
            .unwrap();

        in_flight.add();
        in_flight.add();
        in_flight.done();
        assert_eq!(in_flight.current(), 1);
        in_flight.done();
        in_flight.wait().await;
    }
}
