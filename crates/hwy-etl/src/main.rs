//! hwy-etl - seeds highway route segments from GIS sources into SQLite.
//!
//! Usage:
//!   hwy-etl seed MD --file data/md.geojson
//!   hwy-etl seed VA --url https://.../FeatureServer/0 --where "STATE_CODE=51"
//!   hwy-etl concurrencies MD
//!   hwy-etl summary MD
//!   hwy-etl summary

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hwy_core::{RouteRef, SourceSpec, StateCatalog};
use hwy_etl::persistence::{
    init_database, list_segments, list_states, load_concurrencies, load_state, StateRecord,
};
use hwy_etl::{Config, Pipeline, PipelineError, StateReport};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Seed highway route segments into SQLite")]
struct Args {
    /// SQLite database path (overrides HWY_DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,

    /// State catalog JSON (overrides HWY_STATE_CATALOG and the bundled catalog)
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, classify, assemble and store one state
    Seed {
        state: String,

        /// GeoJSON FeatureCollection to read instead of the catalog source
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        /// Feature-server layer URL to query instead of the catalog source
        #[arg(long)]
        url: Option<String>,

        /// Where-clause for --url
        #[arg(long = "where", requires = "url")]
        where_clause: Option<String>,
    },
    /// Re-run concurrency detection over a seeded state
    Concurrencies { state: String },
    /// Seed every catalog state that has a source
    RunAll,
    /// Print what is stored for a state, or list every seeded state
    Summary { state: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("hwy_etl=info".parse()?))
        .init();

    // Load configuration, command-line flags win
    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let catalog = match args.catalog.or_else(|| config.state_catalog.clone()) {
        Some(path) => StateCatalog::from_path(&path)
            .with_context(|| format!("Failed to load state catalog {}", path.display()))?,
        None => StateCatalog::bundled().context("Bundled state catalog is invalid")?,
    };

    // Open database
    let db = init_database(&config.database_path, config.db_max_connections).await?;
    let pipeline = Pipeline::new(db, catalog, &config);

    // Run command
    match args.command {
        Command::Seed {
            state,
            file,
            url,
            where_clause,
        } => {
            let source = match (file, url) {
                (Some(path), _) => Some(SourceSpec::GeojsonFile {
                    path: path.display().to_string(),
                }),
                (None, Some(url)) => Some(SourceSpec::FeatureServer { url, where_clause }),
                (None, None) => None,
            };
            let report = pipeline.seed_state(&state, source).await?;
            print_report(&report);
        }
        Command::Concurrencies { state } => {
            let count = pipeline.detect_concurrencies(&state).await?;
            println!("{}: {} concurrencies", state.to_ascii_uppercase(), count);
        }
        Command::RunAll => {
            let mut failed = Vec::new();
            for (state, outcome) in pipeline.run_all().await {
                match outcome {
                    Ok(report) => print_report(&report),
                    Err(PipelineError::NoSource(_)) => println!("{}: skipped (no source)", state),
                    Err(e) => {
                        println!("{}: failed: {}", state, e);
                        failed.push(state);
                    }
                }
            }
            if !failed.is_empty() {
                anyhow::bail!("{} state(s) failed: {}", failed.len(), failed.join(", "));
            }
        }
        Command::Summary { state: Some(state) } => {
            let profile = pipeline.profile(&state)?;
            summarize(&pipeline, &profile.identifier).await?;
        }
        Command::Summary { state: None } => {
            let states = list_states(pipeline.database().pool()).await?;
            if states.is_empty() {
                println!("No states seeded");
            }
            for record in &states {
                print_state(record);
            }
        }
    }

    Ok(())
}

fn print_report(report: &StateReport) {
    println!(
        "{}: {} features, {} kept, {} routes, {} segments, {} points, {} concurrencies",
        report.state,
        report.processed,
        report.retained,
        report.routes,
        report.segments,
        report.points,
        report.concurrencies
    );
}

fn print_state(record: &StateRecord) {
    let seeded_at = record
        .seeded_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    println!("{} ({}) seeded at {}", record.title, record.identifier, seeded_at);
}

async fn summarize(pipeline: &Pipeline, state: &str) -> Result<()> {
    let pool = pipeline.database().pool();
    let Some(record) = load_state(pool, state).await? else {
        println!("{}: not seeded", state);
        return Ok(());
    };
    print_state(&record);

    let mut routes: BTreeMap<(RouteRef, char), (usize, usize, f64)> = BTreeMap::new();
    for segment in list_segments(pool, state, None, None).await? {
        let entry = routes
            .entry((segment.route(), segment.direction.as_char()))
            .or_default();
        entry.0 += 1;
        entry.1 += segment.point_count;
        entry.2 += segment.length_m;
    }
    for ((route, direction), (segments, points, length_m)) in &routes {
        println!(
            "  {:<8} {}  {:>3} segments  {:>7} points  {:>9.1} km",
            route.to_string(),
            direction,
            segments,
            points,
            length_m / 1000.0
        );
    }

    for concurrency in load_concurrencies(pool, state).await? {
        println!(
            "  {} on {}: segments {}..{} over segment {} points {}..{}",
            concurrency.route1,
            concurrency.route2,
            concurrency.first_segment_id,
            concurrency.last_segment_id,
            concurrency.route2_segment_id,
            concurrency.start_point_index,
            concurrency.end_point_index
        );
    }
    Ok(())
}
