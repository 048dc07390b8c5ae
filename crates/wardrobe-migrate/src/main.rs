//! Wardrobe migration tool - moves the local JSON store to a remote store.
//!
//! Exit codes: 0 when every entity migrated, 2 for a partial run, 1 when the
//! run failed or could not start.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wardrobe_core::config::MigrationConfig;
use wardrobe_core::{
    HttpGateway, LocalLayout, MigrationOptions, MigrationOrchestrator, RemoteGateway,
    RemoteSettings, RunOutcome, SqliteGateway,
};

#[derive(Parser, Debug)]
#[command(name = "wardrobe-migrate")]
#[command(about = "Migrate local wardrobe items and outfits to a remote store")]
#[command(group(ArgGroup::new("remote").required(true).args(["sqlite_remote", "http_remote"])))]
struct Args {
    /// Directory holding `images/metadata.json` and `images/outfit_metadata.json`
    #[arg(long, default_value = ".")]
    data_root: PathBuf,

    /// Owner recorded on every migrated entity
    #[arg(long)]
    owner_id: String,

    /// Migrate into a SQLite database
    #[arg(long, requires = "asset_dir")]
    sqlite_remote: Option<PathBuf>,

    /// Asset directory used with --sqlite-remote
    #[arg(long)]
    asset_dir: Option<PathBuf>,

    /// Migrate to the hosted service configured by WARDROBE_REMOTE_URL / WARDROBE_REMOTE_KEY
    #[arg(long)]
    http_remote: bool,

    /// Items migrated at the same time
    #[arg(long, default_value_t = MigrationConfig::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Skip the pre-migration backup
    #[arg(long, conflicts_with = "require_backup")]
    no_backup: bool,

    /// Abort when the backup is incomplete
    #[arg(long)]
    require_backup: bool,

    /// Report path (defaults to <data-root>/migration_report.txt)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn options(&self, layout: &LocalLayout) -> MigrationOptions {
        let report = self
            .report
            .clone()
            .unwrap_or_else(|| layout.default_report_path());
        MigrationOptions::new(self.owner_id.trim(), report)
            .with_concurrency(self.concurrency)
            .with_backup(!self.no_backup)
            .with_required_backup(self.require_backup)
    }

    fn gateway(&self) -> Result<Arc<dyn RemoteGateway>> {
        if let Some(db_path) = &self.sqlite_remote {
            let asset_dir = self
                .asset_dir
                .as_ref()
                .context("--asset-dir is required with --sqlite-remote")?;
            let gateway = SqliteGateway::open(db_path, asset_dir)
                .with_context(|| format!("Failed to open {}", db_path.display()))?;
            return Ok(Arc::new(gateway));
        }
        if self.http_remote {
            let settings = RemoteSettings::from_env()?;
            return Ok(Arc::new(HttpGateway::new(&settings)?));
        }
        bail!("no remote selected")
    }
}

fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Completed => 0,
        RunOutcome::Partial { .. } => 2,
        RunOutcome::Failed { .. } => 1,
    }
}

fn confirm(owner_id: &str, input: &mut impl BufRead, output: &mut impl Write) -> Result<bool> {
    write!(
        output,
        "Migrate local data to owner {}? (yes/no): ",
        owner_id
    )?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    if args.owner_id.trim().is_empty() {
        bail!("--owner-id must not be empty");
    }

    let layout = LocalLayout::new(&args.data_root);
    info!("Data root: {}", layout.root().display());

    if !args.yes && !confirm(&args.owner_id, &mut io::stdin().lock(), &mut io::stdout())? {
        println!("Migration cancelled");
        return Ok(ExitCode::FAILURE);
    }

    let gateway = args.gateway()?;
    let options = args.options(&layout);
    let report_path = options.report_path.clone();
    let orchestrator = MigrationOrchestrator::new(gateway, layout, options);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight entities");
            cancel.cancel();
        }
    });

    let report = orchestrator.run().await?;
    println!(
        "Migration {}: {}/{} items, {}/{} outfits, {} referential gaps",
        report.outcome.label(),
        report.items.migrated,
        report.items.total,
        report.outfits.migrated,
        report.outfits.total,
        report.referential_gaps
    );
    println!("Report: {}", report_path.display());

    Ok(ExitCode::from(exit_code(&report.outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wardrobe_core::MigrationState;

    #[test]
    fn test_requires_a_remote() {
        assert!(Args::try_parse_from(["wardrobe-migrate", "--owner-id", "u1"]).is_err());
        assert!(Args::try_parse_from([
            "wardrobe-migrate",
            "--owner-id",
            "u1",
            "--http-remote",
            "--sqlite-remote",
            "r.db",
            "--asset-dir",
            "assets",
        ])
        .is_err());
        assert!(Args::try_parse_from([
            "wardrobe-migrate",
            "--owner-id",
            "u1",
            "--sqlite-remote",
            "r.db"
        ])
        .is_err());
    }

    #[test]
    fn test_options_from_args() {
        let args = Args::try_parse_from([
            "wardrobe-migrate",
            "--owner-id",
            "u1",
            "--http-remote",
            "--no-backup",
            "--concurrency",
            "0",
        ])
        .unwrap();
        let layout = LocalLayout::new("/data");
        let options = args.options(&layout);
        assert!(!options.create_backup);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.report_path, layout.default_report_path());
    }

    #[test]
    fn test_sqlite_gateway_from_args() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("remote.db");
        let assets = temp_dir.path().join("assets");
        let args = Args::try_parse_from([
            "wardrobe-migrate",
            "--owner-id",
            "u1",
            "--sqlite-remote",
            db.to_str().unwrap(),
            "--asset-dir",
            assets.to_str().unwrap(),
        ])
        .unwrap();
        assert!(args.gateway().is_ok());
        assert!(db.exists());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&RunOutcome::Completed), 0);
        assert_eq!(exit_code(&RunOutcome::Partial { issues: vec![] }), 2);
        assert_eq!(
            exit_code(&RunOutcome::Failed {
                state: MigrationState::Backup,
                reason: "x".into()
            }),
            1
        );
    }

    #[test]
    fn test_confirmation() {
        let mut output = Vec::new();
        assert!(confirm("u1", &mut "yes\n".as_bytes(), &mut output).unwrap());
        assert!(!confirm("u1", &mut "no\n".as_bytes(), &mut output).unwrap());
        assert!(String::from_utf8(output).unwrap().contains("owner u1"));
    }
}
