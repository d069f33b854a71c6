use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scribe_kernel::log::{store::encode, LogEntry};
use scribe_kernel::state::drift::DriftSeverity;
use scribe_kernel::{Database, StoreConfig};

/// Malformed snapshot written by `corrupt`.
const CORRUPTED_DOCUMENT: &str = r#"{"records": CORRUPTED_DATA}"#;

/// Scribe write-ahead logged record store
#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(about = "Write-ahead logged record store", long_about = None)]
struct Cli {
    /// Path to store config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding snapshot.json and transactions.log
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert or overwrite a record
    Upsert {
        key: String,
        name: String,
        address: String,
    },
    /// Print the current snapshot
    Show,
    /// Print the transaction log
    Log,
    /// Rebuild the snapshot from the transaction log
    Recover,
    /// Compare the snapshot with a replay of the log
    Verify,
    /// Overwrite the snapshot with a malformed document
    Corrupt,
    /// Run the corruption and recovery walkthrough
    Demo,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = match cli.config {
        Some(path) => StoreConfig::from_json_file(path)?,
        None => StoreConfig::in_dir(&cli.data_dir),
    };

    // ----------------------------
    // Dispatch
    // ----------------------------
    match cli.command {
        Command::Upsert { key, name, address } => {
            let mut db = Database::open(config)?;
            let transaction = db.upsert(key, name, address)?;
            println!("{}", encode(&transaction)?);
        }
        Command::Show => {
            let db = Database::open(config)?;
            println!("{}", serde_json::to_string_pretty(&db.read_snapshot()?)?);
        }
        Command::Log => print_log(&Database::open(config)?)?,
        Command::Recover => {
            let db = Database::open(config)?;
            let report = db.recover()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Verify => {
            let db = Database::open(config)?;
            let result = db.verify()?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.drift_report.highest_severity() > Some(DriftSeverity::Info) {
                bail!("snapshot has drifted from the transaction log");
            }
        }
        Command::Corrupt => corrupt(&config)?,
        Command::Demo => demo(config)?,
    }

    Ok(())
}

fn print_log(db: &Database) -> Result<()> {
    for entry in db.transactions()? {
        match entry {
            LogEntry::Transaction { transaction, .. } => println!("{}", encode(&transaction)?),
            LogEntry::Unknown { line, operation } => {
                println!("{}", serde_json::json!({ "line": line, "unknown_operation": operation }))
            }
            LogEntry::Malformed { line, reason } => {
                println!("{}", serde_json::json!({ "line": line, "malformed": reason }))
            }
        }
    }
    Ok(())
}

fn corrupt(config: &StoreConfig) -> Result<()> {
    fs::write(&config.snapshot_path, CORRUPTED_DOCUMENT)?;
    tracing::warn!(path = %config.snapshot_path.display(), "snapshot corrupted");
    Ok(())
}

fn demo(config: StoreConfig) -> Result<()> {
    let mut db = Database::open(config.clone())?;

    println!("\n1. Upserting records (each one is logged first)...");
    db.upsert("1", "John Doe", "john@example.com")?;
    db.upsert("2", "Jane Smith", "jane@example.com")?;
    db.upsert("1", "John D.", "john2@example.com")?;

    println!("\n2. Current snapshot:");
    println!("{}", serde_json::to_string_pretty(&db.read_snapshot()?)?);

    println!("\n3. Transaction log:");
    print_log(&db)?;

    println!("\n4. Corrupting the snapshot...");
    corrupt(&config)?;

    println!("\n5. Reading the corrupted snapshot...");
    match db.read_snapshot() {
        Ok(_) => bail!("corrupted snapshot was read without error"),
        Err(e) => println!("read failed: {e}"),
    }

    println!("\n6. Recovering from the transaction log...");
    let report = db.recover()?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    println!("\n7. Recovered snapshot:");
    println!("{}", serde_json::to_string_pretty(&db.read_snapshot()?)?);

    Ok(())
}
