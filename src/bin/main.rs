//! carto-sync CLI

use carto_sync::config::LogFormat;
use carto_sync::io::{read_csv, write_csv_to};
use carto_sync::{IfExists, SyncConfig, SyncPhase, TableSyncManager, normalize_name};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "carto-sync")]
#[command(author, version, about = "Move tables between CSV files and PostGIS")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a table or query to CSV
    Read {
        /// Table name or SQL query
        source: String,
        /// Schema of the table
        #[arg(short, long)]
        schema: Option<String>,
        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<i64>,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Upload a CSV file into a table
    Write {
        /// CSV file with a header row
        input: String,
        /// Destination table
        table: String,
        /// fail, replace or append
        #[arg(long, default_value = "fail")]
        if_exists: IfExists,
        /// Column holding WKT/WKB geometries
        #[arg(long)]
        geom_col: Option<String>,
        /// Byte ceiling per uploaded chunk
        #[arg(long)]
        max_upload_size: Option<u64>,
        /// Skip the remaining-quota check
        #[arg(long)]
        skip_quota_check: bool,
    },
    /// Check whether a table exists
    HasTable {
        table: String,
        #[arg(short, long)]
        schema: Option<String>,
    },
    /// Drop a table
    DeleteTable {
        table: String,
        #[arg(short, long)]
        schema: Option<String>,
    },
    /// Rename a table
    RenameTable {
        table: String,
        new_name: String,
        /// fail or replace
        #[arg(long, default_value = "fail")]
        if_exists: IfExists,
    },
    /// Create a table from a query, server-side
    CreateTableFromQuery {
        query: String,
        table: String,
        /// fail, replace or append
        #[arg(long, default_value = "fail")]
        if_exists: IfExists,
        /// Skip platform registration
        #[arg(long)]
        no_cartodbfy: bool,
    },
    /// Show row count and geometry type of a table
    Describe {
        table: String,
        #[arg(short, long)]
        schema: Option<String>,
    },
    /// Print the normalized form of table or column names
    Normalize {
        names: Vec<String>,
    },
    /// Generate sample config
    Init {
        #[arg(short, long, default_value = "carto-sync.toml")]
        output: String,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.quiet, cli.json);

    match run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult {
    // Offline commands first
    match &cli.command {
        Commands::Init { output } => return run_init(output),
        Commands::Normalize { names } => return run_normalize(names, cli.json),
        _ => {}
    }

    let mut config = load_config(cli.config.as_deref())?;
    let (json, quiet) = (cli.json, cli.quiet);

    match cli.command {
        Commands::Read {
            source,
            schema,
            limit,
            output,
        } => {
            let manager = TableSyncManager::connect(&config).await?;
            run_read(&manager, &source, schema.as_deref(), limit, output, quiet).await
        }
        Commands::Write {
            input,
            table,
            if_exists,
            geom_col,
            max_upload_size,
            skip_quota_check,
        } => {
            if max_upload_size.is_some() {
                config.upload.max_upload_size = max_upload_size;
            }
            config.upload.skip_quota_check |= skip_quota_check;
            config.validate()?;
            let manager = TableSyncManager::connect(&config).await?;
            run_write(
                manager,
                &input,
                &table,
                if_exists,
                geom_col.as_deref(),
                json,
                quiet,
            )
            .await
        }
        Commands::HasTable { table, schema } => {
            let manager = TableSyncManager::connect(&config).await?;
            let exists = manager.has_table(&table, schema.as_deref()).await?;
            if json {
                println!(r#"{{"table":{},"exists":{}}}"#, serde_json::to_string(&table)?, exists);
            } else if exists {
                println!("{} {} exists", style("✓").green(), table);
            } else {
                println!("{} {} does not exist", style("✗").red(), table);
            }
            Ok(())
        }
        Commands::DeleteTable { table, schema } => {
            let manager = TableSyncManager::connect(&config).await?;
            let existed = manager.delete_table(&table, schema.as_deref()).await?;
            if json {
                println!(r#"{{"table":{},"deleted":{}}}"#, serde_json::to_string(&table)?, existed);
            } else if !quiet {
                if existed {
                    println!("{} Dropped: {}", style("✓").green(), table);
                } else {
                    println!("{} Table {} did not exist", style("!").yellow(), table);
                }
            }
            Ok(())
        }
        Commands::RenameTable {
            table,
            new_name,
            if_exists,
        } => {
            let manager = TableSyncManager::connect(&config).await?;
            let renamed = manager.rename_table(&table, &new_name, if_exists).await?;
            if json {
                println!(r#"{{"table":{}}}"#, serde_json::to_string(&renamed)?);
            } else if !quiet {
                println!("{} Renamed {} → {}", style("✓").green(), table, renamed);
            }
            Ok(())
        }
        Commands::CreateTableFromQuery {
            query,
            table,
            if_exists,
            no_cartodbfy,
        } => {
            let manager = TableSyncManager::connect(&config).await?;
            let cartodbfy = manager.upload_config().cartodbfy && !no_cartodbfy;
            let created = manager
                .create_table_from_query(&query, &table, if_exists, cartodbfy)
                .await?;
            if json {
                println!(r#"{{"table":{}}}"#, serde_json::to_string(&created)?);
            } else if !quiet {
                println!("{} Table {} created", style("✓").green(), created);
            }
            Ok(())
        }
        Commands::Describe { table, schema } => {
            let manager = TableSyncManager::connect(&config).await?;
            let description = manager.describe_table(&table, schema.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&description)?);
            } else {
                println!("{}.{}", description.schema, style(&description.table).bold());
                println!("  Rows: {}", description.num_rows);
                println!(
                    "  Geometry: {}",
                    description.geom_type.map_or("none", |g| g.as_str())
                );
            }
            Ok(())
        }
        Commands::Init { .. } | Commands::Normalize { .. } => unreachable!(), // Handled above
    }
}

fn load_config(path: Option<&str>) -> Result<SyncConfig, Box<dyn std::error::Error>> {
    if let Some(p) = path {
        info!("Loading config from: {}", p);
        return Ok(SyncConfig::from_file(p)?);
    }

    for default in &["carto-sync.toml", ".carto-sync.toml"] {
        if std::path::Path::new(default).exists() {
            info!("Loading config from: {}", default);
            return Ok(SyncConfig::from_file(default)?);
        }
    }

    info!("Loading config from environment");
    Ok(SyncConfig::from_env()?)
}

async fn run_read(
    manager: &TableSyncManager,
    source: &str,
    schema: Option<&str>,
    limit: Option<i64>,
    output: Option<String>,
    quiet: bool,
) -> CliResult {
    let frame = manager.download(source, schema, limit, None).await?;

    match output {
        Some(path) => {
            let file = std::fs::File::create(&path)?;
            write_csv_to(&frame, file)?;
            if !quiet {
                eprintln!(
                    "{} Wrote {} rows to {}",
                    style("✓").green(),
                    frame.num_rows(),
                    path
                );
            }
        }
        None => write_csv_to(&frame, std::io::stdout().lock())?,
    }
    Ok(())
}

async fn run_write(
    manager: TableSyncManager,
    input: &str,
    table: &str,
    if_exists: IfExists,
    geom_col: Option<&str>,
    json: bool,
    quiet: bool,
) -> CliResult {
    let mut frame = read_csv(input)?;
    if let Some(column) = geom_col {
        frame.set_geometry(column)?;
    }

    let bar = if quiet || json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(1)
    };
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} chunks {msg}")?
            .progress_chars("=> "),
    );

    let progress = bar.clone();
    let manager = manager.with_progress(move |p| {
        progress.set_length(p.total_chunks as u64);
        match p.phase {
            SyncPhase::Preparing => progress.set_message(format!("preparing {}", p.table)),
            SyncPhase::Uploading => {
                progress.set_position(p.chunk as u64);
                progress.set_message(format!("{} rows ({})", p.rows, p.if_exists));
            }
            SyncPhase::Registering => progress.set_message("registering"),
            SyncPhase::Completed => progress.set_position(p.total_chunks as u64),
        }
    });

    let result = manager.upload(&frame, table, if_exists).await;
    bar.finish_and_clear();
    let uploaded = result?;

    if json {
        let snapshot = manager.metrics().snapshot();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "table": uploaded,
                "rows": frame.num_rows(),
                "metrics": snapshot,
            }))?
        );
    } else if !quiet {
        println!(
            "{} Uploaded {} rows to {}",
            style("✓").green(),
            frame.num_rows(),
            style(&uploaded).bold()
        );
        if uploaded != table {
            println!("  Table name normalized from '{}'", table);
        }
    }
    Ok(())
}

fn run_normalize(names: &[String], json: bool) -> CliResult {
    let normalized: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&normalized)?);
    } else {
        for name in &normalized {
            println!("{}", name);
        }
    }
    Ok(())
}

fn run_init(output: &str) -> CliResult {
    std::fs::write(output, SyncConfig::sample_toml())?;
    println!("✓ Created: {}", output);
    println!("\nEdit the file or use environment variables:");
    println!("  CARTO_BASE_URL, CARTO_API_KEY or DATABASE_URL");
    Ok(())
}

fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if quiet {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so CSV and JSON on stdout stay clean
    if json_output || LogFormat::Json == log_format_from_env() {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn log_format_from_env() -> LogFormat {
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
