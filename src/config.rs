//! 应用配置模块
//!
//! 优先级：命令行 / 环境变量 > 配置文件 > 默认值。

use crate::core::{PoolConfig, ScanConfig};
use crate::error::ConfigError;
use crate::logging::LogConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Mirror local directories into an S3-compatible bucket
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "bucketsync",
    version,
    about = "Mirror local directories into an S3-compatible bucket",
    long_about = "Uploads local files that are missing or changed in the bucket and deletes \
                  objects whose local file no longer exists.\n\n\
                  Every option can also be set through a BUCKETSYNC_* environment variable \
                  or the JSON file given with --config.",
    after_help = "EXAMPLES:\n    \
        bucketsync --target-dirs ~/Documents,~/Pictures --s3-bucket backup \\\n        \
        --s3-access-key KEY --s3-secret-key SECRET\n    \
        bucketsync --config backup.json --dry-run"
)]
pub struct CliArgs {
    /// JSON config file
    #[arg(short, long, env = "BUCKETSYNC_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Local directories to back up (comma separated)
    #[arg(long, env = "BUCKETSYNC_TARGET_DIRS", value_delimiter = ',', value_name = "DIR")]
    pub target_dirs: Vec<PathBuf>,

    /// S3 endpoint, `host[:port]` or a full URL
    #[arg(long, env = "BUCKETSYNC_S3_ENDPOINT", value_name = "URL")]
    pub s3_endpoint: Option<String>,

    /// S3 region
    #[arg(long, env = "BUCKETSYNC_S3_REGION", value_name = "REGION")]
    pub s3_region: Option<String>,

    /// S3 access key
    #[arg(long, env = "BUCKETSYNC_S3_ACCESS_KEY", hide_env_values = true)]
    pub s3_access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "BUCKETSYNC_S3_SECRET_KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    /// Bucket name
    #[arg(long, env = "BUCKETSYNC_S3_BUCKET", value_name = "NAME")]
    pub s3_bucket: Option<String>,

    /// Object key prefix inside the bucket
    #[arg(long, env = "BUCKETSYNC_S3_PREFIX", value_name = "PREFIX")]
    pub s3_prefix: Option<String>,

    /// Number of workers performing actions against the bucket
    #[arg(short = 'w', long, env = "BUCKETSYNC_WORKERS", value_name = "NUM")]
    pub workers: Option<usize>,

    /// Pending action queue size
    #[arg(long, env = "BUCKETSYNC_QUEUE_CAPACITY", value_name = "NUM")]
    pub queue_capacity: Option<usize>,

    /// Exclude paths matching pattern (can be repeated or comma separated)
    #[arg(
        long = "exclude",
        env = "BUCKETSYNC_EXCLUDE",
        value_delimiter = ',',
        value_name = "PATTERN",
        action = clap::ArgAction::Append
    )]
    pub exclude_patterns: Vec<String>,

    /// Only report what would be uploaded and deleted
    #[arg(long, env = "BUCKETSYNC_DRY_RUN")]
    pub dry_run: bool,

    /// Directory for the rotating log file
    #[arg(long, env = "BUCKETSYNC_LOG_DIR", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, env = "BUCKETSYNC_LOG_LEVEL", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_workers() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    20
}

/// 远程存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default, skip_serializing)]
    pub secret_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: String::new(),
            prefix: None,
        }
    }
}

impl RemoteConfig {
    /// 没有协议的地址按明文 http 连接
    pub fn endpoint_url(&self) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        if endpoint.contains("://") {
            Some(endpoint.to_string())
        } else {
            Some(format!("http://{}", endpoint))
        }
    }
}

/// 备份配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    #[serde(default)]
    pub target_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            target_dirs: Vec::new(),
            remote: RemoteConfig::default(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            exclude_patterns: Vec::new(),
            dry_run: false,
            log_dir: None,
            log: LogConfig::default(),
        }
    }
}

impl BackupConfig {
    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// 合并配置文件与命令行参数并校验
    pub fn resolve(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(args);
        config.validate()?;
        Ok(config)
    }

    /// 用命令行参数覆盖
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if !args.target_dirs.is_empty() {
            self.target_dirs = args.target_dirs.clone();
        }
        if let Some(ref v) = args.s3_endpoint {
            self.remote.endpoint = Some(v.clone());
        }
        if let Some(ref v) = args.s3_region {
            self.remote.region = v.clone();
        }
        if let Some(ref v) = args.s3_access_key {
            self.remote.access_key = v.clone();
        }
        if let Some(ref v) = args.s3_secret_key {
            self.remote.secret_key = v.clone();
        }
        if let Some(ref v) = args.s3_bucket {
            self.remote.bucket = v.clone();
        }
        if let Some(ref v) = args.s3_prefix {
            self.remote.prefix = Some(v.clone());
        }
        if let Some(v) = args.workers {
            self.workers = v;
        }
        if let Some(v) = args.queue_capacity {
            self.queue_capacity = v;
        }
        // 命令行排除规则追加到配置文件之后
        self.exclude_patterns
            .extend(args.exclude_patterns.iter().cloned());
        if args.dry_run {
            self.dry_run = true;
        }
        if let Some(ref v) = args.log_dir {
            self.log_dir = Some(v.clone());
        }
        if let Some(ref v) = args.log_level {
            self.log.level = v.to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("s3 bucket"));
        }
        if self.remote.access_key.is_empty() {
            return Err(ConfigError::Missing("s3 access key"));
        }
        if self.remote.secret_key.is_empty() {
            return Err(ConfigError::Missing("s3 secret key"));
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroValue { name: "workers" });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue {
                name: "queue capacity",
            });
        }
        self.target_labels().map(|_| ())
    }

    /// 每个源目录的键前缀（目录名），前缀必须唯一
    pub fn target_labels(&self) -> Result<Vec<(String, PathBuf)>, ConfigError> {
        if self.target_dirs.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut labels: Vec<(String, PathBuf)> = Vec::with_capacity(self.target_dirs.len());
        for dir in &self.target_dirs {
            let label = dir
                .file_name()
                .and_then(|n| n.to_str())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ConfigError::UnnamedTarget(dir.display().to_string()))?
                .to_string();

            if let Some((_, first)) = labels.iter().find(|(l, _)| *l == label) {
                return Err(ConfigError::DuplicateTarget {
                    label,
                    first: first.display().to_string(),
                    second: dir.display().to_string(),
                });
            }
            labels.push((label, dir.clone()));
        }

        Ok(labels)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            exclude_patterns: self.exclude_patterns.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_args() -> CliArgs {
        CliArgs::parse_from([
            "bucketsync",
            "--target-dirs",
            "/home/me/Documents,/home/me/Pictures",
            "--s3-bucket",
            "backup",
            "--s3-access-key",
            "key",
            "--s3-secret-key",
            "secret",
        ])
    }

    #[test]
    fn test_cli_defaults() {
        let config = BackupConfig::resolve(&valid_args()).unwrap();

        assert_eq!(config.workers, 5);
        assert_eq!(config.queue_capacity, 20);
        assert_eq!(config.remote.region, "us-east-1");
        assert!(!config.dry_run);
        assert_eq!(
            config.target_labels().unwrap(),
            vec![
                ("Documents".to_string(), PathBuf::from("/home/me/Documents")),
                ("Pictures".to_string(), PathBuf::from("/home/me/Pictures")),
            ]
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backup.json");
        std::fs::write(
            &file,
            r#"{
                "targetDirs": ["/srv/music"],
                "remote": { "bucket": "from-file", "accessKey": "k", "secretKey": "s", "endpoint": "minio:9000" },
                "workers": 2,
                "excludePatterns": ["*.tmp"],
                "log": { "level": "debug" }
            }"#,
        )
        .unwrap();

        let args = CliArgs::parse_from([
            "bucketsync",
            "--config",
            file.to_str().unwrap(),
            "--s3-bucket",
            "from-cli",
            "--exclude",
            ".DS_Store",
        ]);
        let config = BackupConfig::resolve(&args).unwrap();

        assert_eq!(config.remote.bucket, "from-cli");
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 20);
        assert_eq!(config.exclude_patterns, vec!["*.tmp", ".DS_Store"]);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.target_dirs, vec![PathBuf::from("/srv/music")]);
        assert_eq!(
            config.remote.endpoint_url().as_deref(),
            Some("http://minio:9000")
        );
    }

    #[test]
    fn test_every_flag_has_env_fallback() {
        use clap::CommandFactory;

        let command = CliArgs::command();
        for arg in command.get_arguments() {
            if matches!(arg.get_id().as_str(), "help" | "version") {
                continue;
            }
            let env = arg
                .get_env()
                .unwrap_or_else(|| panic!("--{} has no env fallback", arg.get_id()));
            assert!(env.to_string_lossy().starts_with("BUCKETSYNC_"));
        }

        let exclude = command
            .get_arguments()
            .find(|a| a.get_id() == "exclude_patterns")
            .unwrap();
        assert_eq!(exclude.get_env().unwrap(), "BUCKETSYNC_EXCLUDE");
    }

    #[test]
    fn test_exclude_accepts_comma_list() {
        let args = CliArgs::parse_from([
            "bucketsync",
            "--exclude",
            "*.tmp,.git/**",
            "--exclude",
            "a",
        ]);
        assert_eq!(args.exclude_patterns, vec!["*.tmp", ".git/**", "a"]);
    }

    #[test]
    fn test_endpoint_url_keeps_scheme() {
        let remote = RemoteConfig {
            endpoint: Some("https://s3.example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(
            remote.endpoint_url().as_deref(),
            Some("https://s3.example.com")
        );
        assert_eq!(RemoteConfig::default().endpoint_url(), None);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = BackupConfig::resolve(&valid_args()).unwrap();

        config.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue { name: "workers" })
        ));
        config.workers = 1;

        config.queue_capacity = 0;
        assert!(config.validate().is_err());
        config.queue_capacity = 1;

        config.target_dirs = vec![PathBuf::from("/a/photos"), PathBuf::from("/b/photos")];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateTarget { ref label, .. }) if label == "photos"
        ));

        config.target_dirs.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoTargets)));

        config.remote.bucket.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("s3 bucket"))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let args = CliArgs {
            config: Some(PathBuf::from("/definitely/not/here.json")),
            ..Default::default()
        };
        assert!(matches!(
            BackupConfig::resolve(&args),
            Err(ConfigError::Read { .. })
        ));
    }
}
