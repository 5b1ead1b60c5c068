use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use land_parcel_import::{
    db, init_logging, open_store, ImportConfig, ImportSession, SessionState,
};

#[derive(Parser, Debug)]
#[command(name = "parcel-import", version, about = "Import land parcel XML/KML pairs into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile every attribute/geometry pair in the data directory
    Import(ImportArgs),
    /// Print totals from an existing store
    Stats {
        /// SQLite database path (overrides DATABASE_PATH)
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Directory holding the .xml/.kml pairs (overrides DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Rows per INSERT statement (overrides IMPORT_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// WAL checkpoint interval in pairs (overrides IMPORT_CHECKPOINT_EVERY)
    #[arg(long)]
    checkpoint_every: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Import(args) => run_import(args),
        Command::Stats { database } => run_stats(database),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_import(args: ImportArgs) -> Result<ExitCode> {
    let mut config = ImportConfig::from_env().context("Invalid environment configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = args.database {
        config.database_path = path;
    }
    if let Some(size) = args.batch_size {
        config.batch_size = size;
    }
    if let Some(every) = args.checkpoint_every {
        config.checkpoint_every = every;
    }
    config.json_logs |= args.json_logs;

    init_logging(config.json_logs);
    config.validate()?;

    println!("🗄️  Land Parcel Import - XML + KML → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📂 Data:     {}", config.data_dir.display());
    println!("💾 Database: {}", config.database_path.display());

    let mut session = ImportSession::new(config);
    let stats = match session.run() {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "Import aborted");
            eprintln!("❌ Import aborted: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", stats.summary());
    println!(
        "✓ Matches: {} exact, {} normalized",
        stats.exact_matches, stats.normalized_matches
    );
    if stats.duplicate_geometry_ids > 0 {
        println!("⚠️  Duplicate geometry ids: {}", stats.duplicate_geometry_ids);
    }
    if stats.skipped_placemarks > 0 {
        println!("⚠️  Placemarks without usable id or ring: {}", stats.skipped_placemarks);
    }
    if stats.orphan_geometry_files > 0 {
        println!("⚠️  Geometry files without attributes: {}", stats.orphan_geometry_files);
    }
    for report in session.reports().iter().filter(|r| r.is_error()) {
        println!(
            "   ✗ {}: {}",
            report.name,
            report.error.as_deref().unwrap_or_default()
        );
    }

    if session.state() == SessionState::Completed {
        println!("✅ Import completed");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn run_stats(database: Option<PathBuf>) -> Result<ExitCode> {
    let mut config = ImportConfig::from_env().context("Invalid environment configuration")?;
    if let Some(path) = database {
        config.database_path = path;
    }
    init_logging(config.json_logs);

    if !config.database_path.exists() {
        eprintln!("❌ Database not found at {}", config.database_path.display());
        eprintln!("   Run: parcel-import import");
        return Ok(ExitCode::FAILURE);
    }

    let conn = open_store(&config.database_path)?;
    let summary = db::summary_stats(&conn)?;

    println!("📊 {}", config.database_path.display());
    println!("   Parcels:   {}", summary.total_parcels);
    println!("   Area:      {:.2} m²", summary.total_area);
    println!("   Cities:    {}", summary.cities_count);
    println!("   Districts: {}", summary.districts_count);

    for city in db::stats_by_city(&conn)? {
        println!(
            "   {:<8} {:>8} parcels  {:>14.2} m²",
            city.city, city.parcel_count, city.total_area
        );
    }

    Ok(ExitCode::SUCCESS)
}
