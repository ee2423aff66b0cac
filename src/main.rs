use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use medallion::{init_tracing, CleanOptions, Lakehouse, SourceFormat};
use medallion_config::{load_from_file_path, ForecastConfig, RuntimeConfig};
use medallion_core::forecast::validate_history;
use medallion_core::quality::QualityRules;
use medallion_core::DimensionLookup;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Bronze → Silver → Gold pipelines over versioned Parquet tables
#[derive(Parser)]
#[command(name = "medallion")]
#[command(version)]
#[command(about = "Bronze → Silver → Gold pipelines over versioned Parquet tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for SourceFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Csv => SourceFormat::Csv,
            FormatArg::Json => SourceFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Append a raw CSV or JSON file to a Bronze table
    Ingest {
        /// File in the lakehouse files area (or a local path with --local)
        source: String,
        /// Bronze table to append to
        table: String,
        /// Source format (default: from the file extension)
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,
        /// Upload SOURCE from the local filesystem into the files area first
        #[arg(long)]
        local: bool,
    },
    /// Deduplicate, standardize and validate a Bronze table into Silver
    Clean {
        bronze: String,
        silver: String,
        /// Key column identifying a record (repeatable)
        #[arg(short, long = "key", value_name = "COLUMN", required = true)]
        keys: Vec<String>,
        /// Column whose greatest value wins among duplicates
        #[arg(long, value_name = "COLUMN")]
        order_by: Option<String>,
        /// Column to lowercase and trim (repeatable)
        #[arg(short, long = "standardize", value_name = "COLUMN")]
        standardize: Vec<String>,
        /// Column that must not contain nulls (repeatable)
        #[arg(short, long = "not-null", value_name = "COLUMN")]
        not_null: Vec<String>,
    },
    /// Join a Silver table with dimensions into a Gold fact table
    BuildFact {
        silver: String,
        output: String,
        /// Dimension lookup as TABLE:JOIN_COLUMN:KEY_COLUMN (repeatable)
        #[arg(short, long = "dim", value_name = "LOOKUP", value_parser = parse_lookup)]
        dims: Vec<DimensionLookup>,
        /// Measure column prefix (repeatable; default: amount, quantity)
        #[arg(short, long = "measure-prefix", value_name = "PREFIX")]
        measure_prefixes: Vec<String>,
    },
    /// Compact small files, or Z-order the table by the given columns
    Optimize {
        table: String,
        /// Z-order column (repeatable)
        #[arg(short, long = "z-order", value_name = "COLUMN")]
        z_order: Vec<String>,
    },
    /// Delete data files outside the retention window
    Vacuum {
        table: String,
        /// Retention in hours (default from config)
        #[arg(short, long, value_name = "HOURS")]
        retention_hours: Option<u64>,
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Show committed versions of a table, newest first
    History { table: String },
    /// Run declarative quality rules against a table
    Quality {
        table: String,
        /// TOML file with [[rules]] entries
        #[arg(short, long, value_name = "FILE")]
        rules: PathBuf,
        /// Exit with an error when any check fails
        #[arg(long)]
        strict: bool,
    },
    /// Validate and print a forecasting notebook configuration
    ForecastConfig {
        /// Forecast config TOML file
        file: PathBuf,
        /// Also check this table's history against the quality thresholds
        #[arg(long, value_name = "TABLE")]
        check_table: Option<String>,
    },
}

fn parse_lookup(value: &str) -> std::result::Result<DimensionLookup, String> {
    match value.split(':').collect::<Vec<_>>().as_slice() {
        [table, join, key] if !table.is_empty() && !join.is_empty() && !key.is_empty() => {
            Ok(DimensionLookup::new(*table, *join, *key))
        }
        _ => Err(format!(
            "expected TABLE:JOIN_COLUMN:KEY_COLUMN, got '{}'",
            value
        )),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = if let Some(config_path) = &cli.config {
        load_from_file_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    init_tracing(&config.log);
    tracing::debug!(backend = %config.storage.backend, "Configuration loaded");

    match cli.command {
        Commands::ForecastConfig { file, check_table } => {
            run_forecast_config(&config, &file, check_table.as_deref()).await
        }
        command => run_pipeline(&config, command).await,
    }
}

async fn run_pipeline(config: &RuntimeConfig, command: Commands) -> Result<()> {
    let lakehouse = Lakehouse::new(config).context("Failed to open lakehouse")?;

    match command {
        Commands::Ingest {
            source,
            table,
            format,
            local,
        } => {
            let format = match format {
                Some(format) => format.into(),
                None => SourceFormat::from_path(&source)?,
            };
            let source = if local {
                let contents = std::fs::read(&source)
                    .with_context(|| format!("Failed to read {}", source))?;
                let name = Path::new(&source)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| source.clone());
                lakehouse.upload_file(&name, contents).await?;
                name
            } else {
                source
            };
            let batch = lakehouse.ingest_to_bronze(&source, &table, format).await?;
            println!("{} rows → {}", batch.num_rows(), table);
        }
        Commands::Clean {
            bronze,
            silver,
            keys,
            order_by,
            standardize,
            not_null,
        } => {
            let mut options = CleanOptions::new(keys)
                .standardize(standardize)
                .require_not_null(not_null);
            if let Some(order_by) = order_by {
                options = options.order_by(order_by);
            }
            let batch = lakehouse.clean_to_silver(&bronze, &silver, &options).await?;
            println!("{} rows → {}", batch.num_rows(), silver);
        }
        Commands::BuildFact {
            silver,
            output,
            dims,
            measure_prefixes,
        } => {
            let lakehouse = if measure_prefixes.is_empty() {
                lakehouse
            } else {
                lakehouse.with_measure_prefixes(measure_prefixes)
            };
            let batch = lakehouse.build_fact_table(&silver, &dims, &output).await?;
            println!("{} rows → {}", batch.num_rows(), output);
        }
        Commands::Optimize { table, z_order } => {
            let columns: Vec<&str> = z_order.iter().map(String::as_str).collect();
            print_json(&lakehouse.optimize_table(&table, &columns).await?)?;
        }
        Commands::Vacuum {
            table,
            retention_hours,
            dry_run,
        } => {
            print_json(&lakehouse.vacuum_table(&table, retention_hours, dry_run).await?)?;
        }
        Commands::History { table } => {
            print_json(&lakehouse.history(&table).await?)?;
        }
        Commands::Quality {
            table,
            rules,
            strict,
        } => {
            let content = std::fs::read_to_string(&rules)
                .with_context(|| format!("Failed to read rules file: {}", rules.display()))?;
            let rules: QualityRules = toml::from_str(&content)
                .with_context(|| format!("Failed to parse rules file: {}", rules.display()))?;

            let report = lakehouse
                .run_quality_checks(&table, &rules.into_checks())
                .await?;
            println!("{}", report);
            if strict && !report.passed() {
                bail!("Quality checks failed for {}", table);
            }
        }
        Commands::ForecastConfig { file, check_table } => {
            run_forecast_config(config, &file, check_table.as_deref()).await?;
        }
    }

    Ok(())
}

async fn run_forecast_config(
    config: &RuntimeConfig,
    file: &Path,
    check_table: Option<&str>,
) -> Result<()> {
    let forecast = ForecastConfig::load(file)
        .with_context(|| format!("Invalid forecast config: {}", file.display()))?;
    println!("{}", forecast);

    if let Some(table) = check_table {
        let lakehouse = Lakehouse::new(config).context("Failed to open lakehouse")?;
        let history = lakehouse.read_table(table, None).await?;
        let profile = validate_history(&history, &forecast)?;
        println!(
            "{}: {} rows, {} series ({} with ≥{} periods), target nulls {:.1}%",
            table,
            profile.rows,
            profile.series_count,
            profile.eligible_series,
            forecast.min_history_periods,
            profile.target_null_ratio * 100.0
        );
    }
    Ok(())
}
