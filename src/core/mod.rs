pub mod comparator;
pub mod engine;
pub mod manifest;
pub mod report;
pub mod scanner;
pub mod transfer;
pub mod worker;

pub use comparator::{plan_deletes, plan_uploads, DiffSummary, RemoteAction};
pub use engine::{ReconcileEngine, SyncConfig, SyncEngine, SyncReport, SyncStatus};
pub use manifest::{FileKey, FileRecord, Manifest, ManifestGatherer};
pub use report::{LogEntry, LogLevel, LogSink, Report, Reporter};
pub use scanner::{FileScanner, LocalGatherer, RemoteGatherer, ScanConfig};
pub use transfer::{DryRunStore, TransferStore};
pub use worker::{ActionPool, ActionQueue, InFlight, PoolConfig, PoolOutcome, RemoteStore};
