use std::path::PathBuf;
use std::process;

use chrono::{DateTime, Utc};
use clap::Parser;
use playout_engine::{MissingSegmentPolicy, PlayoutConfig, PlayoutEngine, SegmentStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "playout",
    version,
    about = "Loop VOD HLS playlists as an always-on live stream"
)]
struct Args {
    /// Source playlists; the first is the structural reference
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output directory for the live tree (serve it with any web server)
    #[arg(short, long, env = "PLAYOUT_OUTPUT", default_value = "live")]
    output: PathBuf,

    /// Manifest filename for the master and per-layer playlists
    #[arg(long, env = "PLAYOUT_PLAYLIST_NAME", default_value = "hls.m3u8")]
    playlist_name: String,

    /// Per-layer folder template; `{}` is the layer index
    #[arg(long, env = "PLAYOUT_LAYER_DIR", default_value = "layer{}")]
    layer_dir: String,

    /// Segment name template; `{}` is the global sequence number
    #[arg(long, env = "PLAYOUT_SEGMENT_NAME", default_value = "hls_{}.ts")]
    segment_name: String,

    /// Live window length per layer
    #[arg(long, env = "PLAYOUT_MAX_SEGMENTS", default_value_t = 4)]
    max_segments: usize,

    /// Evicted segments kept on disk per layer for downstream caches
    #[arg(long, env = "PLAYOUT_MAX_STALE_SEGMENTS", default_value_t = 4)]
    max_stale_segments: usize,

    /// How published segments are materialized
    #[arg(
        long,
        value_enum,
        env = "PLAYOUT_STRATEGY",
        default_value = "relative-symlink"
    )]
    strategy: SegmentStrategy,

    /// What to do when a source segment file is absent
    #[arg(
        long,
        value_enum,
        env = "PLAYOUT_MISSING_SEGMENT",
        default_value = "ignore"
    )]
    missing_segment: MissingSegmentPolicy,

    /// Broadcast start instant, RFC 3339 (defaults to now). All runs
    /// configured with the same instant converge on the same position.
    #[arg(long, env = "PLAYOUT_START_TIME")]
    start_time: Option<DateTime<Utc>>,

    /// Maintain EXT-X-DISCONTINUITY-SEQUENCE across evictions
    #[arg(long, env = "PLAYOUT_DISCONTINUITY_SEQUENCE")]
    discontinuity_sequence: bool,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        error!("playout failed: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), playout_engine::PlayoutError> {
    let config = PlayoutConfig {
        sources: args.sources,
        output_dir: args.output,
        playlist_name: args.playlist_name,
        layer_dir_template: args.layer_dir,
        segment_name_template: args.segment_name,
        live_max_segments: args.max_segments,
        live_max_stale_segments: args.max_stale_segments,
        strategy: args.strategy,
        missing_segment: args.missing_segment,
        start_time: args.start_time.unwrap_or_else(Utc::now),
        track_discontinuity_sequence: args.discontinuity_sequence,
    };

    let mut engine = PlayoutEngine::new(config)?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received; finishing the current tick");
            signal_token.cancel();
        }
    });

    engine.run(token).await
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
