use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bgg_analytics::{
    flatten_payload, ingest_notification, ingest_object, pending_objects, run_aggregation,
    Catalog, DatasetStore, IngestReport, IngestionStamp, LocalObjectStore, ObjectRef,
    PipelineConfig, RecordKind, TableWriteReport, WriteMode, VERSION,
};

#[derive(Parser, Debug)]
#[command(name = "bgg-analytics")]
#[command(about = "Flatten BoardGameGeek XML payloads into partitioned analytics tables", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON config file (defaults apply to anything it leaves out)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Object store root holding raw payloads
    #[arg(long, global = true)]
    raw_root: Option<PathBuf>,

    /// Dataset root for flattened and analytics tables
    #[arg(long, global = true)]
    output_root: Option<PathBuf>,

    /// SQLite catalog file
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Ingestion date stamp (YYYY-MM-DD, default today)
    #[arg(long, global = true)]
    date: Option<String>,

    /// append | overwrite | overwrite_partitions
    #[arg(long, global = true)]
    write_mode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Flatten one XML file as a single record kind and print CSV
    Flatten {
        /// XML payload file
        input: PathBuf,

        /// details | classification | poll
        #[arg(short, long, default_value = "details")]
        kind: String,

        /// Write CSV here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ingest raw payloads from the object store (default: every payload for --date)
    Ingest {
        /// Object keys inside the raw bucket
        keys: Vec<String>,
    },

    /// Ingest the object named by an SNS-wrapped S3 notification
    Notify {
        /// Notification JSON file, or '-' for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Rebuild the analytics tables from the accumulated datasets
    Aggregate {
        /// Only aggregate rows ingested on --date
        #[arg(long)]
        only_date: bool,
    },

    /// List registered tables and their partitions
    Catalog,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let stamp = match &cli.date {
        Some(date) => IngestionStamp::parse(date)?,
        None => IngestionStamp::today(),
    };

    match cli.command {
        Commands::Flatten { input, kind, output } => run_flatten(&config, &input, &kind, output, &stamp),
        Commands::Ingest { keys } => run_ingest(&config, keys, &stamp),
        Commands::Notify { input } => run_notify(&config, &input, &stamp),
        Commands::Aggregate { only_date } => run_aggregate(&config, only_date.then_some(&stamp)),
        Commands::Catalog => run_catalog(&config),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(root) = &cli.raw_root {
        config.raw_root = root.clone();
    }
    if let Some(root) = &cli.output_root {
        config.output_root = root.clone();
    }
    if let Some(path) = &cli.catalog {
        config.catalog_path = path.clone();
    }
    if let Some(mode) = &cli.write_mode {
        config.write_mode = mode.parse::<WriteMode>()?;
    }

    Ok(config)
}

fn run_flatten(
    config: &PipelineConfig,
    input: &Path,
    kind: &str,
    output: Option<PathBuf>,
    stamp: &IngestionStamp,
) -> Result<()> {
    let kind: RecordKind = kind.parse()?;
    let xml_data = fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let table = flatten_payload(config, &xml_data, kind, stamp)?;

    match output {
        Some(path) => {
            let file = fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            table.write_csv(file)?;
            println!("✓ Wrote {} {} rows to {}", table.len(), kind, path.display());
        }
        None => table.write_csv(io::stdout().lock())?,
    }

    Ok(())
}

fn run_ingest(config: &PipelineConfig, keys: Vec<String>, stamp: &IngestionStamp) -> Result<()> {
    println!("📥 BGG Ingest - raw XML → flattened datasets");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let objects = LocalObjectStore::new(&config.raw_root);
    let datasets = DatasetStore::new(&config.output_root);
    let catalog = Catalog::open(&config.catalog_path)?;

    let pending = if keys.is_empty() {
        pending_objects(config, &objects, stamp)?
    } else {
        keys.iter()
            .map(|key| ObjectRef::new(&config.raw_bucket, key))
            .collect()
    };

    if pending.is_empty() {
        println!("⚠️  No payloads found for {}", stamp.date_string());
        return Ok(());
    }

    let mut total = 0;
    for object in &pending {
        let report = ingest_object(config, &objects, &datasets, &catalog, object, stamp)?;
        print_ingest(&report);
        total += report.total_rows();
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Ingested {} payloads ({} rows)", pending.len(), total);
    Ok(())
}

fn run_notify(config: &PipelineConfig, input: &str, stamp: &IngestionStamp) -> Result<()> {
    let json = if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read notification from stdin")?;
        buffer
    } else {
        fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };

    let objects = LocalObjectStore::new(&config.raw_root);
    let datasets = DatasetStore::new(&config.output_root);
    let catalog = Catalog::open(&config.catalog_path)?;

    let report = ingest_notification(config, &objects, &datasets, &catalog, &json, stamp)?;
    print_ingest(&report);
    Ok(())
}

fn run_aggregate(config: &PipelineConfig, date: Option<&IngestionStamp>) -> Result<()> {
    println!("📊 BGG Aggregate - flattened datasets → analytics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let datasets = DatasetStore::new(&config.output_root);
    let catalog = Catalog::open(&config.catalog_path)?;

    let report = run_aggregation(config, &datasets, &catalog, date)?;

    println!("\n📂 Input");
    println!("   details rows:        {}", report.details_read);
    println!("   classification rows: {}", report.classification_read);
    println!("\n💾 Output");
    print_table(&report.analytics);
    print_table(&report.analytics_by_classification);
    println!("\n✅ Aggregation complete");
    Ok(())
}

fn run_catalog(config: &PipelineConfig) -> Result<()> {
    let catalog = Catalog::open(&config.catalog_path)?;
    let tables = catalog.list_tables(&config.database)?;

    println!("🗂️  Catalog {} (bgg-analytics v{})", config.database, VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if tables.is_empty() {
        println!("(no tables registered)");
        return Ok(());
    }

    for table in tables {
        let partitions = catalog.list_partitions(&config.database, &table.name)?;
        println!(
            "\n📋 {} ({} columns, partitioned by {})",
            table.name,
            table.columns.len(),
            table.partition_keys.join(", ")
        );
        println!("   location: {}", table.location);
        println!("   updated:  {}", table.updated_at.format("%Y-%m-%d %H:%M:%S"));
        for partition in partitions {
            let values: Vec<String> = partition
                .values
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!("   • {}", values.join("/"));
        }
    }

    Ok(())
}

fn print_ingest(report: &IngestReport) {
    println!("\n📂 {} (date={})", report.source, report.date);
    for table in &report.tables {
        print_table(table);
    }
}

fn print_table(table: &TableWriteReport) {
    println!(
        "   ✓ {:<32} {:>6} rows  {} partitions ({} new)",
        table.table, table.rows, table.partitions, table.new_partitions
    );
}
