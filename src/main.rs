pub mod types;
pub mod config;
pub mod error;
pub mod crs;
pub mod tables;
pub mod data;
pub mod resolver;
pub mod store;
pub mod selection;
pub mod render;
pub mod forecast;
pub mod classifier;
pub mod server;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the map API
    Serve,
    /// Resolve one area for a year and write the highlight
    Select {
        /// Area name (exact or partial, per [matching] mode)
        area: String,
        /// Defaults to the latest year in the metrics table
        #[arg(short, long)]
        year: Option<i32>,
        /// trend | risk | risk_trend | final
        #[arg(short, long, default_value = "risk")]
        field: String,
        /// Narrow an ambiguous match to the area whose name equals the query
        #[arg(long)]
        prefer_exact: bool,
        #[arg(long, value_name = "FILE")]
        geojson: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        png: Option<PathBuf>,
    },
    /// List the areas reported for a year
    Areas {
        #[arg(short, long)]
        year: Option<i32>,
    },
    /// Load both tables and the classifier, and report what was found
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let app_config = config::AppConfig::load_from_file(&cli.config)?;
    let store = store::DataStore::load(app_config).context("Failed to load input data")?;

    match cli.command {
        Commands::Serve => {
            server::start_server(store).await?;
        }
        Commands::Select { area, year, field, prefer_exact, geojson, png } => {
            let field = types::LabelField::parse(&field)
                .ok_or_else(|| anyhow!("Unknown label field '{}'", field))?;
            let snapshot = store.snapshot();
            let year = match year {
                Some(y) => y,
                None => *snapshot
                    .metrics
                    .years()
                    .first()
                    .ok_or_else(|| anyhow!("Metrics table is empty"))?,
            };

            let mut selected =
                selection::select(&snapshot, &store.config().colors, &area, year, field)?;
            if prefer_exact {
                selected = selected.prefer_exact();
            }

            println!("{:?}: {}", selected.outcome, selected.candidates.join(", "));
            for feature in &selected.features {
                println!("[{}] {}", feature.fill_color, feature.tooltip.replace('\n', "; "));
            }

            if let Some(path) = geojson {
                render::write_geojson(&selected, &path)?;
            }
            if let Some(path) = png {
                render::write_png(snapshot.areas(), &selected, &store.config().map, &path)?;
            }
        }
        Commands::Areas { year } => {
            let snapshot = store.snapshot();
            let year = year.or_else(|| snapshot.metrics.years().first().copied());
            let names = match year {
                Some(y) => snapshot.metrics.areas_for_year(y),
                None => Vec::new(),
            };
            for name in names {
                println!("{}", name);
            }
        }
        Commands::Validate => {
            if classifier::load_classifier(store.config().input.classifier.as_deref())?.is_some() {
                println!("classifier artifact ok");
            }
            let snapshot = store.snapshot();
            if snapshot.areas().is_empty() || snapshot.metrics.is_empty() {
                tracing::warn!("One of the input tables loaded with no usable rows");
            }
            println!(
                "{} areas (name column '{}'), {} metric rows, years {:?}",
                snapshot.areas().len(),
                snapshot.areas().name_column(),
                snapshot.metrics.len(),
                snapshot.metrics.years()
            );
        }
    }

    Ok(())
}
