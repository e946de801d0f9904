//! 运行报告
//!
//! 各阶段通过 [`LogSink`] 提交日志条目，[`Reporter`] 是唯一的消费者，
//! 按到达顺序收集，收到结束信号后交出完整的 [`Report`]。

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// 报告中的一条记录，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.level,
            self.message
        )
    }
}

/// 日志入口，可被任意多个生产者克隆
///
/// 每条记录同时写入 tracing，报告端已结束时只写 tracing。
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<LogEntry>,
}

impl LogSink {
    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogEntry::new(LogLevel::Warn, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogEntry::new(LogLevel::Error, message));
    }

    pub fn emit(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => info!("{}", entry.message),
            LogLevel::Warn => warn!("{}", entry.message),
            LogLevel::Error => error!("{}", entry.message),
        }
        let _ = self.tx.send(entry);
    }
}

/// 收集到的全部记录
#[derive(Debug, Clone, Default)]
pub struct Report {
    entries: Vec<LogEntry>,
}

impl Report {
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn contains_message(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Report")?;
        writeln!(f, "-------------------------------")?;
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// 报告收集器
pub struct Reporter {
    done: oneshot::Sender<()>,
    handle: JoinHandle<Vec<LogEntry>>,
}

impl Reporter {
    /// 启动收集任务，返回日志入口和收集器
    pub fn spawn() -> (LogSink, Reporter) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::collect(rx, done_rx));

        (
            LogSink { tx },
            Reporter {
                done: done_tx,
                handle,
            },
        )
    }

    async fn collect(
        mut rx: mpsc::UnboundedReceiver<LogEntry>,
        mut done: oneshot::Receiver<()>,
    ) -> Vec<LogEntry> {
        let mut entries = Vec::new();

        loop {
            tokio::select! {
                biased;
                Some(entry) = rx.recv() => entries.push(entry),
                _ = &mut done => break,
            }
        }

        // 结束信号之前已入队的记录不能丢
        while let Ok(entry) = rx.try_recv() {
            entries.push(entry);
        }

        entries
    }

    /// 发出结束信号并取回报告
    ///
    /// 调用方须保证所有生产者（比较与 worker）都已结束，否则报告可能不完整。
    pub async fn finish(self) -> Report {
        let _ = self.done.send(());
        match self.handle.await {
            Ok(entries) => Report { entries },
            Err(e) => {
                error!("报告任务异常退出: {}", e);
                Report::default()
            }
        }
    }
}
