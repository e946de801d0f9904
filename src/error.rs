//! 错误类型
//!
//! 采集失败对整次运行是致命的；单个上传/删除失败只记录，不中断运行。

use crate::core::manifest::FileKey;
use std::fmt;
use thiserror::Error;

/// 清单来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// 清单采集失败
#[derive(Debug, Error)]
#[error("error returned while gathering {side} files: {source:#}")]
pub struct GatherError {
    pub side: Side,
    #[source]
    pub source: anyhow::Error,
}

impl GatherError {
    pub fn new(side: Side, source: impl Into<anyhow::Error>) -> Self {
        Self {
            side,
            source: source.into(),
        }
    }
}

/// 单个远程动作失败
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("put {key} failed: {source:#}")]
    Put {
        key: FileKey,
        #[source]
        source: anyhow::Error,
    },

    #[error("remove {key} failed: {source:#}")]
    Remove {
        key: FileKey,
        #[source]
        source: anyhow::Error,
    },

    /// 队列已关闭，动作未能提交
    #[error("action for {key} rejected: queue closed")]
    QueueClosed { key: FileKey },
}

impl ActionError {
    pub fn key(&self) -> &FileKey {
        match self {
            ActionError::Put { key, .. }
            | ActionError::Remove { key, .. }
            | ActionError::QueueClosed { key } => key,
        }
    }
}

/// 进程配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no target directories configured")]
    NoTargets,

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("{name} must be at least 1")]
    ZeroValue { name: &'static str },

    #[error("target directory has no usable name: {0}")]
    UnnamedTarget(String),

    /// 两个目录会产生相同的键前缀
    #[error("target directories {first} and {second} share the key prefix '{label}'")]
    DuplicateTarget {
        label: String,
        first: String,
        second: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
