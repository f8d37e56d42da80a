//! crewsheet CLI: run entry points, inspect jobs, serve continuations.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use crewsheet::checkpoint::CheckpointStore;
use crewsheet::clock::{Clock, SystemClock};
use crewsheet::config::Config;
use crewsheet::dispatch::Dispatcher;
use crewsheet::jobs::report::ConsoleNotifier;
use crewsheet::jobs::{Callback, Invocation};
use crewsheet::model::JobKey;
use crewsheet::runner::RunOutcome;
use crewsheet::session::Session;
use crewsheet::store::drive::{FolderTree, find_folder, folder_tree};
use crewsheet::store::{SheetRef, TabularStore};
use crewsheet::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "crewsheet", about = "Roster, availability and timesheet bookkeeping")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an entry point once, as a user would from the menu
    Run {
        /// Callback name (e.g. generateTimesheet)
        callback: String,
        /// Spreadsheet id of the active sheet
        #[arg(long, requires = "sheet")]
        spreadsheet: Option<String>,
        /// Name of the active sheet
        #[arg(long, requires = "spreadsheet")]
        sheet: Option<String>,
        /// Year for the yearly housekeeping jobs
        #[arg(long)]
        year: Option<i32>,
        /// Continue from the job's checkpoint
        #[arg(long)]
        resumed: bool,
    },
    /// Fire due continuations until interrupted
    Serve,
    /// Fire due continuations once and exit
    Tick,
    /// Show pending continuations, or one job's progress
    Status {
        #[arg(long, requires = "sheet")]
        spreadsheet: Option<String>,
        #[arg(long, requires = "spreadsheet")]
        sheet: Option<String>,
    },
    /// Sheet contents as JSON
    Sheet {
        #[command(subcommand)]
        action: SheetAction,
    },
    /// Print the folder tree under the main folder
    Tree,
}

#[derive(Subcommand)]
enum SheetAction {
    /// Print a sheet's grid
    Show {
        #[arg(long)]
        spreadsheet: String,
        #[arg(long)]
        sheet: String,
    },
    /// Replace a sheet's grid with a JSON array of rows
    Load {
        #[arg(long)]
        spreadsheet: String,
        #[arg(long)]
        sheet: String,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "crewsheet".to_string(),
        log_level: config.log_level.clone(),
    })?;
    tracing::debug!(exporting = guard.is_exporting(), "telemetry ready");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Run {
            callback,
            spreadsheet,
            sheet,
            year,
            resumed,
        } => {
            let target = spreadsheet.zip(sheet).map(|(id, name)| SheetRef::new(id, name));
            cmd_run(&config, clock, &callback, target, year, resumed)
        }
        Command::Serve => cmd_serve(config, clock).await,
        Command::Tick => {
            let report = Dispatcher::new(config, clock).tick().await?;
            println!("fired {} task(s), {} failed", report.fired, report.failed);
            Ok(())
        }
        Command::Status { spreadsheet, sheet } => {
            let session = Session::open(&config, clock)?;
            match spreadsheet.zip(sheet) {
                Some((id, name)) => cmd_job_status(&session, &JobKey::new(id, name)),
                None => cmd_pending(&session),
            }
        }
        Command::Sheet { action } => {
            let session = Session::open(&config, clock)?;
            cmd_sheet(&session, action)
        }
        Command::Tree => {
            let session = Session::open(&config, clock)?;
            cmd_tree(&session)
        }
    }
}

fn cmd_run(
    config: &Config,
    clock: Arc<dyn Clock>,
    callback: &str,
    target: Option<SheetRef>,
    year: Option<i32>,
    resumed: bool,
) -> anyhow::Result<()> {
    let callback: Callback = callback.parse()?;
    let mut inv = Invocation::interactive(callback, target);
    inv.resumed = resumed;
    if let Some(year) = year {
        inv = inv.with_year(year);
    }

    let session = Session::open(config, clock)?;
    let result = session.run(&inv, &ConsoleNotifier);
    // Partial writes are kept even when the job fails.
    session.save()?;

    match result? {
        RunOutcome::Completed { processed } => {
            println!("{callback}: completed ({processed} item(s))");
        }
        RunOutcome::Suspended {
            processed,
            remaining,
        } => {
            println!(
                "{callback}: suspended after {processed} item(s), {remaining} left; \
                 run `crewsheet serve` to continue"
            );
        }
    }
    Ok(())
}

async fn cmd_serve(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(config, clock);

    let ctrl = dispatcher.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl.shutdown();
    });

    dispatcher.run().await?;
    Ok(())
}

fn cmd_pending(session: &Session) -> anyhow::Result<()> {
    let bridge = session.bridge();
    let tasks = bridge.pending()?;
    if tasks.is_empty() {
        println!("No pending continuations.");
        return Ok(());
    }

    println!("{:<36}  {:<30}  {:<20}  JOB", "HANDLE", "CALLBACK", "FIRES");
    println!("{}", "-".repeat(110));
    for task in &tasks {
        let job = bridge
            .job_for(task.handle)?
            .map(|k| k.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36}  {:<30}  {:<20}  {}",
            task.handle,
            task.callback,
            task.fire_at.format("%Y-%m-%d %H:%M:%S"),
            job
        );
    }
    println!("\n{} task(s)", tasks.len());
    Ok(())
}

fn cmd_job_status(session: &Session, key: &JobKey) -> anyhow::Result<()> {
    let checkpoints = CheckpointStore::new(session.kv(), session.clock());
    println!("Job:        {key}");
    println!("Status:     {:?}", checkpoints.status(key)?);
    println!("Armed:      {}", session.bridge().is_armed(key)?);
    for entry in session.kv().keys_with_prefix(&key.to_string())? {
        println!("  {entry}");
    }
    Ok(())
}

fn cmd_sheet(session: &Session, action: SheetAction) -> anyhow::Result<()> {
    match action {
        SheetAction::Show { spreadsheet, sheet } => {
            let grid = session
                .workspace()
                .read_grid(&SheetRef::new(spreadsheet, sheet))?;
            println!("{}", serde_json::to_string_pretty(&grid)?);
        }
        SheetAction::Load {
            spreadsheet,
            sheet,
            file,
        } => {
            let grid: Vec<Vec<String>> = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let rows = grid.len();
            session
                .workspace()
                .put_grid(&SheetRef::new(spreadsheet, sheet), grid)?;
            session.save()?;
            println!("loaded {rows} row(s) from {}", file.display());
        }
    }
    Ok(())
}

fn cmd_tree(session: &Session) -> anyhow::Result<()> {
    let main = &session.settings().folders.main;
    let Some(root) = find_folder(session.workspace(), main, None)? else {
        anyhow::bail!("folder {main:?} not found");
    };
    print_tree(&folder_tree(session.workspace(), &root)?, 0);
    Ok(())
}

fn print_tree(tree: &FolderTree, depth: usize) {
    println!("{}{}", "  ".repeat(depth), tree.name);
    for child in &tree.children {
        print_tree(child, depth + 1);
    }
}
