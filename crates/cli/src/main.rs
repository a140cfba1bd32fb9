//! MCDA CLI: suitability pipeline service and offline stage commands

mod auth;
mod error;
mod server;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcda_algorithms::vector::DEFAULT_BUFFER_DISTANCE;
use mcda_cloud::{ArtifactStore, StoreConfig};
use mcda_core::io::{read_geotiff, read_vector_layer, write_geotiff, DataType, GeoTiffOptions};
use mcda_core::Raster;
use mcda_pipeline::stages::{buffer_dataset, mask_raster_file, overlay_rasters, rasterize_dataset};
use mcda_pipeline::{JsonLinesTransactionLog, McdaPipeline, PipelineConfig};

use crate::auth::{SharedVerifier, StaticTokenVerifier};
use crate::server::{AppState, ServerOptions};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "mcda")]
#[command(author, version, about = "Multi-criteria suitability analysis", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Show information about a raster or shapefile
    Info {
        /// Input GeoTIFF or .shp file
        input: PathBuf,
    },
    /// Buffer every feature of a shapefile
    Buffer {
        /// Input .shp file
        input: PathBuf,
        /// Output directory (defaults to the input's directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Buffer distance in layer units
        #[arg(short, long, default_value_t = DEFAULT_BUFFER_DISTANCE)]
        distance: f64,
    },
    /// Burn a shapefile onto the grid of a reference raster
    Rasterize {
        /// Input .shp file
        input: PathBuf,
        /// Reference GeoTIFF providing shape, transform and CRS
        reference: PathBuf,
    },
    /// Clip a raster to the geometries of a boundary shapefile
    Mask {
        /// Input GeoTIFF
        raster: PathBuf,
        /// Boundary .shp file
        boundary: PathBuf,
    },
    /// Weighted sum of aligned rasters
    Overlay {
        /// Output GeoTIFF
        output: PathBuf,
        /// Weighted input as PATH:WEIGHT, repeat for each layer
        #[arg(short, long = "input", required = true, value_parser = parse_weighted_input)]
        inputs: Vec<(PathBuf, f64)>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "MCDA_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Accepted bearer token (comma separated in the environment)
    #[arg(long = "api-token", env = "MCDA_API_TOKENS", value_delimiter = ',', hide_env_values = true)]
    api_tokens: Vec<String>,

    /// Maximum request body size in MiB
    #[arg(long, env = "MCDA_MAX_UPLOAD_MB", default_value_t = 512)]
    max_upload_mb: usize,

    /// Append artifact transaction records to this JSON lines file
    #[arg(long, env = "MCDA_TRANSACTION_LOG")]
    transaction_log: Option<PathBuf>,

    /// Origin allowed by CORS
    #[arg(long, env = "MCDA_CORS_ORIGIN", default_value = "http://localhost:8080")]
    cors_origin: String,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool, format: LogFormat) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match format {
        LogFormat::Text => builder.with_target(false).try_init(),
        LogFormat::Json => builder.with_target(true).json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_weighted_input(s: &str) -> Result<(PathBuf, f64), String> {
    let (path, weight) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PATH:WEIGHT, got '{}'", s))?;
    if path.is_empty() {
        return Err(format!("missing path in '{}'", s));
    }
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|_| format!("invalid weight '{}'", weight))?;
    if !weight.is_finite() {
        return Err(format!("weight must be finite, got {}", weight));
    }
    Ok((PathBuf::from(path), weight))
}

fn is_shapefile(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("shp"))
        .unwrap_or(false)
}

fn print_raster_info(input: &Path) -> Result<()> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> = read_geotiff(input, None).context("Failed to read raster")?;
    pb.finish_and_clear();

    let (rows, cols) = raster.shape();
    let bounds = raster.bounds();
    let stats = raster.statistics();

    println!("File: {}", input.display());
    println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
    println!("Cell size: {}", raster.transform().cell_size());
    println!(
        "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
        bounds.0, bounds.1, bounds.2, bounds.3
    );
    if let Some(crs) = raster.crs() {
        println!("CRS: {}", crs);
    }
    if let Some(nodata) = raster.nodata() {
        println!("NoData: {}", nodata);
    }
    println!("\nStatistics:");
    if let Some(min) = stats.min {
        println!("  Min: {:.4}", min);
    }
    if let Some(max) = stats.max {
        println!("  Max: {:.4}", max);
    }
    if let Some(mean) = stats.mean {
        println!("  Mean: {:.4}", mean);
    }
    println!(
        "  Valid cells: {} ({:.1}%)",
        stats.valid_count,
        100.0 * stats.valid_count as f64 / raster.len().max(1) as f64
    );
    Ok(())
}

fn print_layer_info(input: &Path) -> Result<()> {
    let pb = spinner("Reading shapefile...");
    let layer = read_vector_layer(input).context("Failed to read shapefile")?;
    pb.finish_and_clear();

    println!("File: {}", input.display());
    println!("Features: {}", layer.len());
    match &layer.crs {
        Some(crs) => println!("CRS: {}", crs),
        None => println!("CRS: none (no .prj)"),
    }
    if let Some(bounds) = layer.bounds() {
        println!(
            "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
            bounds.min().x,
            bounds.min().y,
            bounds.max().x,
            bounds.max().y
        );
    }
    if !layer.fields.is_empty() {
        println!("Fields: {}", layer.fields.join(", "));
    }
    Ok(())
}

// ─── Serve ──────────────────────────────────────────────────────────────

async fn serve(args: ServeArgs) -> Result<()> {
    let verifier = StaticTokenVerifier::new(args.api_tokens);
    if verifier.is_empty() {
        bail!("at least one --api-token (or MCDA_API_TOKENS) is required");
    }

    let store_config = StoreConfig::from_env().context("Invalid object store configuration")?;
    let store = ArtifactStore::new(&store_config).context("Failed to open object store")?;
    store
        .ensure_namespace()
        .await
        .with_context(|| format!("Failed to create bucket '{}'", store.bucket()))?;

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let mut pipeline = McdaPipeline::new(Arc::new(store), config);
    if let Some(path) = args.transaction_log {
        info!(path = %path.display(), "recording transactions");
        pipeline = pipeline.with_transaction_log(Arc::new(JsonLinesTransactionLog::new(path)));
    }

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let options = ServerOptions {
        max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
        cors_origin: args.cors_origin,
    };
    let verifier: SharedVerifier = Arc::new(verifier);
    let app = server::router(state, verifier, &options)?;

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!(addr = %args.bind, backend = ?store_config.backend, bucket = %store_config.bucket, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_format)?;

    match cli.command {
        Commands::Serve(args) => serve(args).await?,

        Commands::Info { input } => {
            if is_shapefile(&input) {
                print_layer_info(&input)?;
            } else {
                print_raster_info(&input)?;
            }
        }

        Commands::Buffer {
            input,
            output_dir,
            distance,
        } => {
            let out_dir = match output_dir {
                Some(dir) => dir,
                None => input
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            };
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;

            let start = Instant::now();
            let pb = spinner("Buffering features...");
            let files = buffer_dataset(&input, &out_dir, distance).context("Buffer failed")?;
            pb.finish_and_clear();

            let shp = files
                .iter()
                .find(|f| is_shapefile(f))
                .cloned()
                .unwrap_or_else(|| out_dir.clone());
            done("Buffered layer", &shp, start.elapsed());
        }

        Commands::Rasterize { input, reference } => {
            let start = Instant::now();
            let pb = spinner("Rasterizing...");
            let output = rasterize_dataset(&[input], &reference).context("Rasterize failed")?;
            pb.finish_and_clear();
            done("Rasterized layer", &output, start.elapsed());
        }

        Commands::Mask { raster, boundary } => {
            let start = Instant::now();
            let pb = spinner("Masking...");
            let output = mask_raster_file(&raster, &boundary).context("Mask failed")?;
            pb.finish_and_clear();
            done("Masked raster", &output, start.elapsed());
        }

        Commands::Overlay { output, inputs } => {
            let start = Instant::now();
            let pb = spinner("Reading rasters...");
            let mut rasters = Vec::with_capacity(inputs.len());
            let mut weights = Vec::with_capacity(inputs.len());
            for (path, weight) in &inputs {
                let raster: Raster<f64> = read_geotiff(path, None)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                rasters.push(raster);
                weights.push(*weight);
            }
            pb.set_message("Computing weighted overlay...");
            let result = overlay_rasters(rasters, &weights).context("Overlay failed")?;
            pb.finish_and_clear();

            write_geotiff(&result, &output, Some(GeoTiffOptions::with_data_type(DataType::Float64)))
                .context("Failed to write output")?;
            done("Weighted overlay", &output, start.elapsed());
        }
    }

    Ok(())
}
