pub mod types;
pub mod config;
pub mod data;
pub mod processing;
pub mod render;
pub mod debounce;
pub mod session;
pub mod server;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the chart data for a city, optionally narrowed to one area
    Summary {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        city: String,
        #[arg(long)]
        area: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            tracing::info!("Serving with config: {:?}", config);

            let catalog = data::load_data(&app_config)?;
            server::start_server(app_config, catalog).await?;
        }
        Commands::Summary { config, city, area } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let catalog = Arc::new(data::load_data(&app_config)?);

            let mut session = session::Session::new(catalog, &app_config);
            session.select_city(Some(city.as_str()))?;
            let fit = match area {
                Some(area) => session.select_area(Some(area.as_str()))?,
                None => processing::compute_extent(session.scope()),
            };

            let report = serde_json::json!({
                "snapshot": session.snapshot(),
                "fit": fit,
            });
            let out = serde_json::to_string_pretty(&report)
                .context("Failed to serialize summary")?;
            println!("{}", out);
        }
    }

    Ok(())
}
