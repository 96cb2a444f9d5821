// LabelDB CLI - catalog ingestion and query tool
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

// Macro for conditional printing based on quiet flag
macro_rules! qprintln {
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

use labeldb::{
    ingest_file, init_logging_with_level, with_trace_id, CatalogConfig, CatalogService, CatalogStore,
    EntityId, HttpMetadataAuthority, Label, PgCatalogStore, RetryableStore,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "LabelDB - ranked autocomplete and keyword search over a titled catalog",
    long_about = None,
    after_help = "Examples:
  labeldb ingest arrivals.txt --history history.txt
  labeldb autocomplete port
  labeldb search \"half life, portal\"
  labeldb detail 42"
)]
struct Cli {
    /// Enable verbose logging (DEBUG level). Default is WARN level.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print results
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "LABELDB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate keys for an arrival file and commit it as one batch
    Ingest {
        /// File with one `externalId_rawTitle` entry per line
        file: PathBuf,

        /// Append the processed file here after a successful commit
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Ranked prefix completion
    Autocomplete {
        prefix: String,
    },

    /// Boolean keyword search: commas separate alternatives, spaces require all terms
    Search {
        query: String,

        /// Maximum number of results to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Resolve the detail record of an entity, enriching it if needed
    Detail {
        entity_id: i64,
    },
}

fn print_label(label: &Label) {
    println!(
        "{:>8}  {:<34} {:>10}  {}",
        label.entity_id(),
        label.search_key(),
        label.weight(),
        label.title()
    );
}

async fn open_store(config: &CatalogConfig) -> Result<Arc<dyn CatalogStore>> {
    let store = PgCatalogStore::connect(&config.store.database_url, config.store.max_connections)
        .await
        .context("failed to connect to the catalog store")?;
    Ok(Arc::new(RetryableStore::new(store)))
}

async fn open_service(config: &CatalogConfig, store: Arc<dyn CatalogStore>) -> Result<Arc<CatalogService>> {
    let authority = HttpMetadataAuthority::new(config.http_authority_config())
        .context("failed to build the metadata authority client")?;
    let service = CatalogService::load(store, Arc::new(authority), config.service_config())
        .await
        .context("failed to load the catalog")?;
    Ok(Arc::new(service))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI args first to get verbose flag
    let cli = Cli::parse();

    let config = CatalogConfig::load(cli.config.as_deref())?;
    let verbose = cli.verbose || config.logging.verbose;
    let quiet = cli.quiet || (config.logging.quiet && !cli.verbose);

    // Ignore error if already initialized
    let _ = init_logging_with_level(verbose, quiet);

    with_trace_id("labeldb-cli", async move {
        let store = open_store(&config).await?;

        match cli.command {
            Commands::Ingest { file, history } => {
                let mut options = config.ingestion_options();
                if history.is_some() {
                    options.history_file = history;
                }

                let report = ingest_file(store.as_ref(), &file, &options)
                    .await
                    .with_context(|| format!("ingestion of {} failed", file.display()))?;

                qprintln!(quiet, "Inserted {} entries", report.inserted);
                if !report.skipped_lines.is_empty() {
                    qprintln!(quiet, "Skipped malformed lines: {:?}", report.skipped_lines);
                }
                if !report.suppressed.is_empty() {
                    qprintln!(quiet, "Suppressed by one-entry-only list: {}", report.suppressed.len());
                }
                for failure in &report.failures {
                    eprintln!(
                        "line {}: {} ({}): {}",
                        failure.line_number, failure.external_id, failure.raw_title, failure.error
                    );
                }
            }

            Commands::Autocomplete { prefix } => {
                let service = open_service(&config, store).await?;
                let results = service.autocomplete(&prefix);
                if results.is_empty() {
                    qprintln!(quiet, "No completions for {prefix:?}");
                }
                for label in &results {
                    print_label(label);
                }
            }

            Commands::Search { query, limit } => {
                let service = open_service(&config, store).await?;
                let results = service.full_search(&query);
                qprintln!(quiet, "{} matches", results.len());
                for label in results.iter().take(limit) {
                    print_label(label);
                }
            }

            Commands::Detail { entity_id } => {
                let service = open_service(&config, store).await?;
                match service.get_detail(EntityId(entity_id)).await? {
                    Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                    None => qprintln!(quiet, "Entity {entity_id} not found"),
                }
            }
        }

        Ok::<(), anyhow::Error>(())
    })
    .await
}
