use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use daystate::storage::parse_month;
use daystate::{
    DayState, DayStateConfig, FsDocumentStore, MonthlyDayStateFile, PersistentDayStore, is_deleted,
    is_hidden, merge_day_states,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "daystate-tool")]
#[command(about = "Maintenance tooling for monthly day-state files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a per-day summary of one month file
    Inspect {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        month: String,
        #[arg(long, default_value = "LOGS")]
        log_data_root: String,
    },
    /// Merge two copies of the same month file day by day
    MergeCopies {
        #[arg(long)]
        local: PathBuf,
        #[arg(long)]
        remote: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Rewrite every reference to a renamed document
    Rename {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
        #[arg(long, default_value = "LOGS")]
        log_data_root: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect {
            root,
            month,
            log_data_root,
        } => inspect(&root, &log_data_root, &month).await,
        Command::MergeCopies { local, remote, out } => merge_copies(&local, &remote, &out).await,
        Command::Rename {
            root,
            old,
            new,
            log_data_root,
        } => rename(&root, &log_data_root, &old, &new).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("daystate=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_store(root: &Path, log_data_root: &str) -> PersistentDayStore {
    PersistentDayStore::new(
        Arc::new(FsDocumentStore::new(root)),
        DayStateConfig::new(log_data_root),
    )
}

async fn inspect(root: &Path, log_data_root: &str, month_key: &str) -> Result<()> {
    let store = open_store(root, log_data_root);
    let month = store
        .load_month(month_key)
        .await
        .with_context(|| format!("Failed to load month '{}'", month_key))?;

    println!(
        "Month {} (version {}, last updated {})",
        month_key,
        month.metadata.version,
        month.metadata.last_updated.to_rfc3339()
    );
    if month.days.is_empty() {
        println!("  no days recorded");
    }
    for (date_key, day) in &month.days {
        let hidden_active = day.hidden_routines.iter().filter(|e| is_hidden(e)).count();
        let deleted_active = day.deleted_instances.iter().filter(|e| is_deleted(e)).count();
        println!(
            "  {}: hidden {}/{} active, deleted {}/{} active, duplicates {}, slot overrides {}, orders {}",
            date_key,
            hidden_active,
            day.hidden_routines.len(),
            deleted_active,
            day.deleted_instances.len(),
            day.duplicated_instances.len(),
            day.slot_overrides.len(),
            day.orders.len()
        );
    }
    Ok(())
}

async fn read_month_file(path: &Path) -> Result<MonthlyDayStateFile> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    Ok(parse_month(&raw, &DayStateConfig::default().format_version))
}

async fn merge_copies(local: &Path, remote: &Path, out: &Path) -> Result<()> {
    let local_month = read_month_file(local).await?;
    let remote_month = read_month_file(remote).await?;
    let remote_updated_at = Some(remote_month.last_updated_millis());

    let mut merged = MonthlyDayStateFile::with_version(local_month.metadata.version.clone());
    let mut conflicts = 0;
    let empty = DayState::default();
    let dates = local_month
        .days
        .keys()
        .chain(remote_month.days.keys())
        .cloned()
        .collect::<BTreeSet<_>>();
    for date_key in dates {
        let outcome = merge_day_states(
            local_month.days.get(&date_key).unwrap_or(&empty),
            remote_month.days.get(&date_key).unwrap_or(&empty),
            remote_updated_at,
        );
        conflicts += outcome.conflict_count;
        merged.days.insert(date_key, outcome.state);
    }

    let text = serde_json::to_string_pretty(&merged).context("Failed to serialize merged month")?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create parent directory '{}'", parent.display()))?;
    }
    fs::write(out, text)
        .await
        .with_context(|| format!("Failed to write '{}'", out.display()))?;

    println!(
        "Merged {} day(s) into {} ({} conflict(s) resolved)",
        merged.days.len(),
        out.display(),
        conflicts
    );
    Ok(())
}

async fn rename(root: &Path, log_data_root: &str, old: &str, new: &str) -> Result<()> {
    if old.is_empty() || new.is_empty() {
        return Err(anyhow!("Both --old and --new must be non-empty"));
    }
    let store = open_store(root, log_data_root);
    let rewritten = store
        .rename_task_path(old, new)
        .await
        .with_context(|| format!("Failed to rename '{}' to '{}'", old, new))?;
    println!("Rewrote {} month file(s)", rewritten);
    Ok(())
}
