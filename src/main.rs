use std::path::PathBuf;

use clap::Parser;
use table_archiver::{
    archive::{ArchiveOutcome, Archiver},
    config::{self, ArchiverConfig},
    db::{self, TableTarget},
    observability, storage,
};

const DEFAULT_CONFIG_PATH: &str = "table-archiver.toml";

/// CLI arguments for the table archiver
#[derive(Parser, Debug)]
#[command(version, about = "Archive aged table rows to durable storage", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Archive aged rows, then delete them from the source table
    Run {
        /// Fetch and stage the export without uploading or deleting
        #[arg(long)]
        dry_run: bool,
        /// Override archive.retention_days
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Validate the config and check database and staging access
    Check,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./table-archiver.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Run {
            dry_run,
            retention_days,
        } => {
            if !run_archive(&args.config, dry_run, retention_days).await {
                std::process::exit(1);
            }
        }
        Command::Check => {
            if !run_check(&args.config).await {
                std::process::exit(1);
            }
        }
        Command::Init { output, force } => run_init(output, force),
        Command::Schema { output } => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Command::Features => run_features(),
    }
}

fn load_config(path: &PathBuf) -> ArchiverConfig {
    match ArchiverConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &ArchiverConfig) -> observability::TracingGuard {
    match observability::init_tracing(&config.observability) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    }
}

/// Connect to the database and storage and build the archiver.
async fn build_archiver(config: &ArchiverConfig) -> Result<Archiver, String> {
    let source = db::connect(&config.database, TableTarget::from(&config.archive))
        .await
        .map_err(|e| format!("Failed to connect to {} database: {}", config.database.backend_name(), e))?;

    let store = match storage::create_archive_store(&config.storage).await {
        Ok(store) => store,
        Err(e) => {
            source.close().await;
            return Err(format!("Failed to initialize archive storage: {}", e));
        }
    };

    tracing::debug!(
        database = source.backend_name(),
        storage = store.backend_name(),
        "Connected to database and archive storage"
    );

    Ok(Archiver::new(
        source,
        store,
        config.archive.clone(),
        config.staging.clone(),
    ))
}

/// Run one archive pass. Returns `false` on failure, after the tracing guard
/// has been dropped so the log file is flushed.
async fn run_archive(config_path: &PathBuf, dry_run: bool, retention_days: Option<u32>) -> bool {
    let mut config = load_config(config_path);
    if dry_run {
        config.archive.dry_run = true;
    }
    if let Some(days) = retention_days {
        config.archive.retention_days = days;
    }
    if let Err(e) = config.archive.validate() {
        eprintln!("Invalid archive configuration: {}", e);
        std::process::exit(1);
    }

    let _tracing_guard = init_tracing(&config);
    tracing::info!(
        config_file = %config_path.display(),
        table = %config.archive.table,
        database = config.database.backend_name(),
        "Starting table archiver"
    );

    let archiver = match build_archiver(&config).await {
        Ok(archiver) => archiver,
        Err(e) => {
            tracing::error!(error = %e, "Archive run aborted");
            return false;
        }
    };

    let result = archiver.run(chrono::Utc::now()).await;
    archiver.close().await;

    match result {
        Ok(ArchiveOutcome::NothingToArchive { cutoff }) => {
            println!("No rows older than {} to archive", cutoff);
            true
        }
        Ok(ArchiveOutcome::DryRun { cutoff, rows, file }) => {
            println!("Dry run: {} rows older than {} would be archived", rows, cutoff);
            if let Some(file) = file {
                println!("Staged export kept at {}", file.display());
            }
            true
        }
        Ok(ArchiveOutcome::Archived(report)) => {
            println!(
                "Archived {} rows older than {} to {} ({} bytes); deleted {} rows",
                report.rows_exported,
                report.cutoff,
                report.location,
                report.bytes,
                report.rows_deleted
            );
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Archive run failed; no rows were deleted unless reported above");
            false
        }
    }
}

async fn run_check(config_path: &PathBuf) -> bool {
    let config = load_config(config_path);
    let _tracing_guard = init_tracing(&config);

    let archiver = match build_archiver(&config).await {
        Ok(archiver) => archiver,
        Err(e) => {
            eprintln!("Error: {}", e);
            return false;
        }
    };

    let result = archiver.check().await;
    archiver.close().await;

    match result {
        Ok(staging_dir) => {
            println!("Configuration OK: {}", config_path.display());
            println!("  database: {}", config.database.backend_name());
            println!("  table:    {}", config.archive.table);
            println!("  staging:  {}", staging_dir.display());
            true
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            false
        }
    }
}

/// Create a default configuration file.
fn run_init(output: Option<PathBuf>, force: bool) {
    let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, config::default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("Edit the [database], [archive] and [storage] sections, then run:");
    println!("  table-archiver --config {} check", output_path.display());
}

/// Export config JSON schema to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<PathBuf>) {
    let content = match ArchiverConfig::json_schema_string() {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to serialize config schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path.display(), e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path.display());
        }
        None => {
            println!("{}", content);
        }
    }
}

/// Print enabled compile-time features and build profile.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        (
            "database-sqlite",
            "Databases",
            cfg!(feature = "database-sqlite"),
        ),
        (
            "database-mysql",
            "Databases",
            cfg!(feature = "database-mysql"),
        ),
        (
            "database-postgres",
            "Databases",
            cfg!(feature = "database-postgres"),
        ),
        ("s3-storage", "Storage", cfg!(feature = "s3-storage")),
        ("json-schema", "Tooling", cfg!(feature = "json-schema")),
    ];

    println!("table-archiver v{}", version);
    println!();

    let mut current_category = "";
    for (name, category, enabled) in features {
        if *category != current_category {
            println!("{}:", category);
            current_category = category;
        }
        let marker = if *enabled { "+" } else { "-" };
        println!("  [{}] {}", marker, name);
    }
}
