//! Loopcast: serve a static HLS playlist as a perpetually live stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use live_window::{run_ticker, LiveEngine, WindowFsm};
use playlist_source::{
    fetch_playlist, filter_variants, subset_by_duration, PlaylistInfo,
};
use raft_cluster::{ClusterConfig, ClusterManager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long startup waits for the cluster to elect a leader.
const LEADER_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "loopcast", version)]
#[command(about = "Serve a static HLS playlist as a perpetually live stream")]
struct Cli {
    /// URL of the static source playlist (media or master)
    playlist_url: String,

    /// HTTP server port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Number of segments in the sliding window
    #[arg(long, default_value_t = 6)]
    window_size: usize,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Require the source to be a master playlist
    #[arg(long)]
    master: bool,

    /// Comma-separated variant indices to serve (e.g. "0,2"); all if unset
    #[arg(long)]
    variants: Option<String>,

    /// Use roughly this many seconds of source content before looping
    #[arg(long)]
    loop_after_secs: Option<f64>,

    /// Enable cluster mode with replicated window state
    #[arg(long)]
    cluster: bool,

    /// Stable node identifier; defaults to the bind address
    #[arg(long)]
    node_id: Option<String>,

    /// Bind address for inter-node communication (host:port)
    #[arg(long)]
    raft_bind: Option<String>,

    /// Comma-separated peer addresses, including this node's own
    #[arg(long)]
    peers: Option<String>,

    /// Follower heartbeat timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    heartbeat_timeout_ms: u64,

    /// Candidate election timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    election_timeout_ms: u64,

    /// Interval between automatic state snapshots, in seconds
    #[arg(long, default_value_t = 120)]
    snapshot_interval_secs: u64,

    /// Applied log entries that force a snapshot
    #[arg(long, default_value_t = 8192)]
    snapshot_threshold: u64,

    /// Bound on waiting for a replicated command, in seconds
    #[arg(long, default_value_t = 5)]
    apply_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
            }),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "loopcast starting");

    if let Err(error) = run(cli).await {
        error!(error = format!("{error:#}"), "loopcast failed");
        std::process::exit(1);
    }

    info!("loopcast stopped");
}

async fn run(cli: Cli) -> Result<()> {
    if cli.window_size == 0 {
        bail!("window size must be at least 1");
    }

    info!(url = %cli.playlist_url, "fetching source playlist");
    let mut source = fetch_playlist(&cli.playlist_url)
        .await
        .context("fetch source playlist")?;

    if cli.master && !source.is_master() {
        bail!("--master set but the source URL is a media playlist");
    }

    match &source {
        PlaylistInfo::Master { variants } => info!(
            variants = variants.len(),
            target_duration = source.target_duration(),
            "parsed master playlist"
        ),
        PlaylistInfo::Media { segments, .. } => info!(
            segments = segments.len(),
            target_duration = source.target_duration(),
            "parsed media playlist"
        ),
    }

    if let Some(spec) = &cli.variants {
        let indices = parse_indices(spec)?;
        source = match source {
            PlaylistInfo::Master { variants } => PlaylistInfo::Master {
                variants: filter_variants(variants, &indices)?,
            },
            PlaylistInfo::Media { .. } => {
                bail!("--variants requires a master playlist source")
            }
        };
    }

    if let Some(max_secs) = cli.loop_after_secs {
        if max_secs <= 0.0 {
            bail!("--loop-after-secs must be positive");
        }
        source = apply_loop_after(source, max_secs);
    }

    let fsm = Arc::new(WindowFsm::new());

    let cluster = if cli.cluster {
        let bind = cli
            .raft_bind
            .clone()
            .context("--raft-bind is required in cluster mode")?;
        let peers = parse_peers(
            cli.peers
                .as_deref()
                .context("--peers is required in cluster mode")?,
        );
        let node_id = cli.node_id.clone().unwrap_or_else(|| bind.clone());

        info!(%node_id, %bind, peers = peers.len(), "initializing cluster mode");

        let mut config = ClusterConfig::new(node_id, bind, peers);
        config.heartbeat_timeout = Duration::from_millis(cli.heartbeat_timeout_ms);
        config.election_timeout = Duration::from_millis(cli.election_timeout_ms);
        config.snapshot_interval = Duration::from_secs(cli.snapshot_interval_secs);
        config.snapshot_threshold = cli.snapshot_threshold;
        config.apply_timeout = Duration::from_secs(cli.apply_timeout_secs);

        let manager = ClusterManager::start(config, fsm.clone()).await?;
        let leader = manager
            .wait_for_leader(LEADER_WAIT)
            .await
            .context("leader election failed")?;
        info!(
            is_leader = manager.is_leader(),
            leader_address = %leader,
            raft_state = manager.state(),
            "cluster initialized"
        );
        Some(manager)
    } else {
        None
    };

    let engine = Arc::new(
        LiveEngine::new(source, cli.window_size, fsm, cluster.clone())
            .await
            .context("create live engine")?,
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let ticker = tokio::spawn(run_ticker(engine.clone(), cancel.clone()));

    let addr = format!("0.0.0.0:{}", cli.port);
    info!(
        url = format!("http://localhost:{}/playlist.m3u8", cli.port),
        health = format!("http://localhost:{}/health", cli.port),
        cluster = engine.is_clustered(),
        "live HLS stream ready"
    );

    let served = match &cluster {
        Some(manager) => {
            tokio::select! {
                result = manifest_server::serve(&addr, engine.clone(), cancel.clone()) => {
                    result.map_err(Into::into)
                }
                message = manager.fatal() => Err(anyhow!("consensus failure: {message}")),
            }
        }
        None => manifest_server::serve(&addr, engine.clone(), cancel.clone())
            .await
            .map_err(Into::into),
    };

    cancel.cancel();
    let _ = ticker.await;
    if let Some(manager) = &cluster {
        manager.shutdown().await;
    }

    served
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt signal"),
                _ = terminate.recv() => info!("received terminate signal"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt signal");
        }
        cancel.cancel();
    });
}

/// Trims the source to roughly `max_secs` of content per variant.
fn apply_loop_after(source: PlaylistInfo, max_secs: f64) -> PlaylistInfo {
    match source {
        PlaylistInfo::Media {
            segments,
            target_duration,
        } => {
            let subset = subset_by_duration(&segments, max_secs);
            info!(
                original = segments.len(),
                included = subset.len(),
                max_secs,
                "applied loop-after to media playlist"
            );
            PlaylistInfo::Media {
                segments: subset,
                target_duration,
            }
        }
        PlaylistInfo::Master { variants } => PlaylistInfo::Master {
            variants: variants
                .into_iter()
                .enumerate()
                .map(|(index, mut variant)| {
                    let subset = subset_by_duration(&variant.segments, max_secs);
                    info!(
                        variant = index,
                        original = variant.segments.len(),
                        included = subset.len(),
                        max_secs,
                        "applied loop-after to variant"
                    );
                    variant.segments = subset;
                    variant
                })
                .collect(),
        },
    }
}

fn parse_indices(spec: &str) -> Result<Vec<usize>> {
    spec.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<usize>()
                .with_context(|| format!("invalid variant index {part:?}"))
        })
        .collect()
}

fn parse_peers(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_variant_index_lists() {
        assert_eq!(parse_indices("0,2,4").unwrap(), vec![0, 2, 4]);
        assert_eq!(parse_indices(" 1 , 3 ").unwrap(), vec![1, 3]);
        assert!(parse_indices("1,x").is_err());
    }

    #[test]
    fn parses_peer_lists() {
        assert_eq!(
            parse_peers("10.0.0.1:9000, 10.0.0.2:9000"),
            vec!["10.0.0.1:9000".to_string(), "10.0.0.2:9000".to_string()]
        );
    }
}
