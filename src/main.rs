use anyhow::Context;
use bucketsync_lib::{logging, run_backup, BackupConfig, CliArgs};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = BackupConfig::resolve(&args).context("invalid configuration")?;

    logging::init(&config.log, config.log_dir.as_deref());

    let report = run_backup(&config).await?;

    // 报告在所有动作完成后统一输出到 stdout
    println!("{}", report);

    report.into_result()?;
    Ok(())
}
