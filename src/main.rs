use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use retail_vault_lib::config::ServerConfig;
use retail_vault_lib::export::{export_snapshot, ExportOptions};
use retail_vault_lib::import::{
    import_bulk, validate, write_import_report, ImportError, ValidationReport, ValidationTier,
};
use retail_vault_lib::progress::ProgressTracker;
use retail_vault_lib::store::SqliteRowStore;
use retail_vault_lib::topology::ExportSelection;

const EXIT_REJECTED: i32 = 2;
const CLI_CREATOR: &str = "retail-vault-cli";

#[derive(Debug, Parser)]
#[command(name = "retail-vault", about = "Retail store backup and restore", version)]
struct Cli {
    /// SQLite database path; overrides RETAIL_VAULT_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the backup API over HTTP.
    Serve {
        /// Listen address; overrides RETAIL_VAULT_BIND.
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },
    /// Write a snapshot of the whole store to a file.
    Export {
        #[arg(long)]
        out: PathBuf,
        /// Leave the WhatsApp messaging tables out.
        #[arg(long)]
        no_messaging: bool,
        /// Include login sessions.
        #[arg(long)]
        sessions: bool,
    },
    /// Check a snapshot file without touching the database.
    Validate {
        file: PathBuf,
        /// Skip checksum verification.
        #[arg(long)]
        light: bool,
        /// Emit the raw JSON report.
        #[arg(long)]
        json: bool,
    },
    /// Replace the store's contents with a snapshot file.
    Import {
        file: PathBuf,
        /// Administrator whose identity rows survive the wipe.
        #[arg(long)]
        admin: Option<String>,
        /// Emit the raw JSON outcome.
        #[arg(long)]
        json: bool,
    },
    /// Apply pending schema migrations.
    Migrate,
}

fn main() {
    let _log_guard = match retail_vault_lib::logging::init() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    match handle_cli(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")
}

fn handle_cli(cli: Cli) -> Result<i32> {
    let mut config = ServerConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            runtime()?.block_on(retail_vault_lib::run_server(config))?;
            Ok(0)
        }
        Commands::Export {
            out,
            no_messaging,
            sessions,
        } => handle_export(
            &config,
            &out,
            ExportSelection {
                include_messaging: !no_messaging,
                include_sessions: sessions,
            },
        ),
        Commands::Validate { file, light, json } => handle_validate(&file, light, json),
        Commands::Import { file, admin, json } => handle_import(&config, &file, admin, json),
        Commands::Migrate => {
            runtime()?.block_on(async {
                let pool = retail_vault_lib::open_database(&config.db_path).await?;
                pool.close().await;
                Result::<()>::Ok(())
            })?;
            println!("Migrations applied to {}", config.db_path.display());
            Ok(0)
        }
    }
}

fn read_document(file: &Path) -> Result<std::result::Result<Value, String>> {
    let bytes =
        std::fs::read(file).with_context(|| format!("read snapshot {}", file.display()))?;
    Ok(serde_json::from_slice(&bytes).map_err(|err| format!("snapshot is not valid JSON: {err}")))
}

fn print_report(report: &ValidationReport) {
    println!("valid: {}", report.valid);
    if let Some(summary) = &report.summary {
        println!(
            "format: {}  version: {}",
            summary.format.as_deref().unwrap_or("-"),
            summary.version.as_deref().unwrap_or("-")
        );
        println!(
            "created: {} by {}",
            summary.created_at.as_deref().unwrap_or("-"),
            summary.created_by.as_deref().unwrap_or("-")
        );
        println!("tables: {}  rows: {}", summary.table_count, summary.total_rows);
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
}

fn handle_validate(file: &Path, light: bool, emit_json: bool) -> Result<i32> {
    let tier = if light {
        ValidationTier::Light
    } else {
        ValidationTier::Full
    };
    let report = match read_document(file)? {
        Ok(document) => validate(&document, tier),
        Err(message) => ValidationReport {
            valid: false,
            errors: vec![message],
            ..ValidationReport::default()
        },
    };

    if emit_json {
        let serialized =
            serde_json::to_string_pretty(&report).context("serialize validation report")?;
        println!("{serialized}");
    } else {
        print_report(&report);
    }
    Ok(if report.valid { 0 } else { EXIT_REJECTED })
}

fn handle_export(config: &ServerConfig, out: &Path, selection: ExportSelection) -> Result<i32> {
    let opts = ExportOptions {
        selection,
        page_size: config.export_page_size,
        created_by: CLI_CREATOR.to_string(),
        reset_delay: config.progress_reset,
    };
    let outcome = runtime()?.block_on(async {
        let pool = retail_vault_lib::open_database(&config.db_path).await?;
        let store = SqliteRowStore::new(pool.clone());
        let result = export_snapshot(&store, &ProgressTracker::new(), &opts).await;
        pool.close().await;
        result.map_err(anyhow::Error::new)
    })?;

    if let Some(parent) = out.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output directory {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec(&outcome.snapshot).context("serialize snapshot")?;
    std::fs::write(out, bytes).with_context(|| format!("write snapshot {}", out.display()))?;

    println!(
        "Exported {} rows from {} tables to {}",
        outcome.snapshot.meta.total_rows,
        outcome.snapshot.meta.table_count,
        out.display()
    );
    for table in &outcome.skipped_tables {
        eprintln!("warning: {table} could not be read and was exported empty");
    }
    Ok(0)
}

fn handle_import(
    config: &ServerConfig,
    file: &Path,
    admin: Option<String>,
    emit_json: bool,
) -> Result<i32> {
    let document = match read_document(file)? {
        Ok(document) => document,
        Err(message) => {
            eprintln!("Error: {message}");
            return Ok(EXIT_REJECTED);
        }
    };
    let report = validate(&document, ValidationTier::Full);
    if !report.valid {
        print_report(&report);
        return Ok(EXIT_REJECTED);
    }

    let opts = retail_vault_lib::import::ImportOptions {
        batch_size: config.insert_batch_size,
        reset_delay: config.progress_reset,
        protected_id: admin,
    };
    let result = runtime()?.block_on(async {
        let pool = retail_vault_lib::open_database(&config.db_path).await?;
        let store = SqliteRowStore::new(pool.clone());
        let result = import_bulk(&store, &ProgressTracker::new(), &document, &opts).await;
        pool.close().await;
        Result::<_>::Ok(result)
    })?;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(ImportError::InvalidSnapshot { errors }) => {
            for error in errors {
                eprintln!("error: {error}");
            }
            return Ok(EXIT_REJECTED);
        }
        Err(err) => return Err(err).context("restore snapshot"),
    };

    let report_path = write_import_report(
        &config.reports_dir,
        file,
        opts.protected_id.as_deref(),
        &report,
        &outcome,
    )?;
    let failed = outcome.tables.iter().filter(|t| t.error.is_some()).count();

    if emit_json {
        let payload = json!({
            "outcome": outcome,
            "report": report_path,
        });
        let serialized =
            serde_json::to_string_pretty(&payload).context("serialize import outcome")?;
        println!("{serialized}");
    } else {
        for table in &outcome.tables {
            println!(
                "{:<28} {:>8}/{:<8} {:?}",
                table.table, table.inserted, table.expected, table.status
            );
        }
        println!(
            "circular references restored: {}  failed: {}",
            outcome.circular_restored, outcome.circular_failed
        );
        println!("Report written to {}", report_path.display());
    }
    Ok(if failed == 0 { 0 } else { 1 })
}
