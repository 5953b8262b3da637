use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use squadra_map::config::{Config, DEFAULT_OUTPUT};
use squadra_map::map_server::{self, AppState};
use squadra_map::stats::MonthStats;
use squadra_map::sync::{self, SyncOptions, DEFAULT_TOUR_LIMIT};
use squadra_map::{storage, tiles, Coordinate};

#[derive(Debug, Parser)]
#[command(
    name = "squadra_map",
    about = "Sync Komoot tours and render a tile-exploration map"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch new tours from Komoot, update the state file and render the map
    Sync {
        /// State file (defaults to DATA_FILE or all_points.json)
        #[arg(short, long)]
        data_file: Option<PathBuf>,

        /// Output HTML page
        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Tile zoom level (defaults to TILE_ZOOM or 14)
        #[arg(short, long)]
        zoom: Option<u32>,

        /// Number of recent tours to request
        #[arg(short, long, default_value_t = DEFAULT_TOUR_LIMIT)]
        limit: u32,
    },

    /// Render the map from the saved state without contacting Komoot
    Render {
        #[arg(short, long)]
        data_file: Option<PathBuf>,

        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        #[arg(short, long)]
        zoom: Option<u32>,
    },

    /// Serve the rendered map and JSON endpoints locally
    Serve {
        #[arg(short, long)]
        data_file: Option<PathBuf>,

        #[arg(short, long, default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        #[arg(short, long)]
        zoom: Option<u32>,

        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },

    /// Print the tile containing a coordinate and its bounds
    Tile {
        #[arg(allow_negative_numbers = true)]
        lat: f64,

        #[arg(allow_negative_numbers = true)]
        lon: f64,

        #[arg(short, long, default_value_t = tiles::TILE_ZOOM)]
        zoom: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Sync {
            data_file,
            output,
            zoom,
            limit,
        } => {
            let opts = SyncOptions {
                data_file: data_file.unwrap_or_else(|| config.data_file.clone()),
                output,
                zoom: zoom.unwrap_or(config.tile_zoom),
                limit,
            };
            sync::run_sync(&config, &opts)
                .await
                .context("sync failed")?;
        }

        Commands::Render {
            data_file,
            output,
            zoom,
        } => {
            let data_file = data_file.unwrap_or_else(|| config.data_file.clone());
            let state = storage::load(&data_file)
                .with_context(|| format!("failed to load {}", data_file.display()))?;
            if state.traces.is_empty() {
                warn!(path = %data_file.display(), "no traces in state file, nothing to render");
                return Ok(());
            }
            let summary = sync::render_state(
                &state,
                &config,
                zoom.unwrap_or(config.tile_zoom),
                MonthStats::default(),
                &output,
            )
            .context("failed to render map")?;
            info!(
                tiles = summary.tiles,
                largest_cluster = summary.largest_cluster,
                "map rendered"
            );
        }

        Commands::Serve {
            data_file,
            output,
            zoom,
            addr,
        } => {
            let state = AppState::new(
                data_file.unwrap_or_else(|| config.data_file.clone()),
                output,
                zoom.unwrap_or(config.tile_zoom),
            );
            map_server::serve(state, addr)
                .await
                .context("map server failed")?;
        }

        Commands::Tile { lat, lon, zoom } => {
            let tile = tiles::coordinate_to_tile(Coordinate::new(lat, lon), zoom)?;
            let bounds = tiles::tile_to_bbox(tile, zoom)?;
            println!("tile {}/{}/{}", zoom, tile.x, tile.y);
            println!(
                "north-west {:.6}, {:.6}",
                bounds.north_west.lat, bounds.north_west.lon
            );
            println!(
                "south-east {:.6}, {:.6}",
                bounds.south_east.lat, bounds.south_east.lon
            );
        }
    }

    Ok(())
}
