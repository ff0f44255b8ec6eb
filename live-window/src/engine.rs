//! The engine facade tying the immutable model, the window FSM and the
//! optional cluster together.

use std::sync::Arc;
use std::time::Duration;

use playlist_source::{PlaylistInfo, Variant};
use raft_cluster::ClusterManager;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::EngineError;
use crate::fsm::WindowFsm;
use crate::manifest;

/// One live looping deployment: a fixed variant set plus the window state
/// that slides over it.
///
/// In clustered mode every state change goes through consensus and the
/// local FSM only observes committed commands; without a cluster, commands
/// apply directly. Manifest and stats reads are always served from local
/// state, so they keep working even when the cluster has no leader.
#[derive(Debug)]
pub struct LiveEngine {
    variants: Vec<Variant>,
    is_master: bool,
    window_size: usize,
    tick_secs: u64,
    fsm: Arc<WindowFsm>,
    cluster: Option<Arc<ClusterManager>>,
}

impl LiveEngine {
    /// Validates the model and initializes window state.
    ///
    /// A media playlist is wrapped as a single synthetic variant so the
    /// window layer is uniform. With a cluster attached, only the current
    /// leader submits the `Initialize` command; followers converge through
    /// replication.
    pub async fn new(
        info: PlaylistInfo,
        window_size: usize,
        fsm: Arc<WindowFsm>,
        cluster: Option<Arc<ClusterManager>>,
    ) -> Result<LiveEngine, EngineError> {
        if window_size == 0 {
            return Err(EngineError::InvalidWindowSize);
        }

        let (variants, is_master) = match info {
            PlaylistInfo::Master { variants } => (variants, true),
            PlaylistInfo::Media {
                segments,
                target_duration,
            } => {
                let wrapped = Variant {
                    bandwidth: 0,
                    resolution: None,
                    codecs: None,
                    playlist_url: String::new(),
                    segments,
                    target_duration,
                };
                (vec![wrapped], false)
            }
        };

        if variants.is_empty() {
            return Err(EngineError::NoVariants);
        }
        for (index, variant) in variants.iter().enumerate() {
            if variant.segments.is_empty() {
                return Err(EngineError::EmptySegments(index));
            }
            if window_size > variant.segments.len() {
                warn!(
                    variant = index,
                    window_size,
                    segments = variant.segments.len(),
                    "window size larger than variant, clamping"
                );
            }
        }

        let tick_secs = variants
            .iter()
            .map(|v| v.target_duration)
            .max()
            .unwrap_or(1);

        let totals: Vec<usize> = variants.iter().map(|v| v.segments.len()).collect();
        let initialize = Command::Initialize { totals };

        match &cluster {
            None => fsm.apply_command(&initialize)?,
            Some(manager) => {
                if manager.is_leader() {
                    manager.apply(initialize.encode()?).await?;
                    info!(variants = variants.len(), "initialized replicated window state");
                } else {
                    info!("skipping window state initialization (not leader)");
                }
            }
        }

        Ok(LiveEngine {
            variants,
            is_master,
            window_size,
            tick_secs,
            fsm,
            cluster,
        })
    }

    /// Whether the source was a master playlist.
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    pub fn is_clustered(&self) -> bool {
        self.cluster.is_some()
    }

    /// Cadence of the advancement tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    /// The root manifest: master when several variants exist, the single
    /// variant's media manifest otherwise.
    pub fn manifest(&self) -> Result<String, EngineError> {
        if self.variants.len() > 1 {
            Ok(self.master_manifest())
        } else {
            self.variant_manifest(0)
        }
    }

    /// The master manifest over all variants. Needs no window state.
    pub fn master_manifest(&self) -> String {
        manifest::master_manifest(&self.variants)
    }

    /// The media manifest for one variant's current window.
    pub fn variant_manifest(&self, index: usize) -> Result<String, EngineError> {
        if index >= self.variants.len() {
            return Err(EngineError::VariantOutOfRange {
                index,
                max: self.variants.len() - 1,
            });
        }

        let state = self.fsm.state();
        let position = state.position(index).ok_or(EngineError::NotInitialized)?;

        Ok(manifest::media_manifest(
            &self.variants[index],
            position,
            state.sequence(),
            self.window_size,
        ))
    }

    /// One advancement tick.
    ///
    /// Without a cluster this applies an all-variants advance directly. With
    /// one, only the leader turns the tick into a replicated command;
    /// everyone else stays silent and observes the log.
    pub async fn tick_advance(&self) -> Result<(), EngineError> {
        match &self.cluster {
            None => {
                self.fsm.apply_command(&Command::advance_all())?;
                Ok(())
            }
            Some(manager) => {
                if !manager.is_leader() {
                    debug!("not the leader, skipping advance");
                    return Ok(());
                }
                manager.apply(Command::advance_all().encode()?).await?;
                Ok(())
            }
        }
    }

    /// Current statistics for the health endpoint.
    pub fn stats(&self) -> EngineStats {
        let state = self.fsm.state();

        let mut stats = EngineStats {
            is_master: self.is_master,
            window_size: self.window_size.min(self.variants[0].segments.len()),
            sequence_number: state.sequence(),
            target_duration: self.tick_secs,
            variant_count: None,
            variants: None,
            total_segments: None,
            current_position: None,
            cluster_mode: None,
            is_leader: None,
            leader_address: None,
            raft_state: None,
        };

        if self.is_master {
            stats.variant_count = Some(self.variants.len());
            stats.variants = Some(
                self.variants
                    .iter()
                    .enumerate()
                    .map(|(index, variant)| VariantStats {
                        index,
                        bandwidth: variant.bandwidth,
                        resolution: variant.resolution.clone().unwrap_or_default(),
                        total_segments: variant.segments.len(),
                        position: state.position(index).unwrap_or(0),
                    })
                    .collect(),
            );
        } else {
            stats.total_segments = Some(self.variants[0].segments.len());
            stats.current_position = Some(state.position(0).unwrap_or(0));
        }

        if let Some(manager) = &self.cluster {
            stats.cluster_mode = Some(true);
            stats.is_leader = Some(manager.is_leader());
            stats.leader_address = Some(manager.leader_addr().unwrap_or_default());
            stats.raft_state = Some(manager.state().to_string());
        }

        stats
    }

    /// Leadership summary, present only in clustered deployments.
    pub fn cluster_status(&self) -> Option<ClusterStatus> {
        self.cluster.as_ref().map(|manager| ClusterStatus {
            cluster_enabled: true,
            is_leader: manager.is_leader(),
            leader_address: manager.leader_addr().unwrap_or_default(),
            raft_state: manager.state().to_string(),
        })
    }
}

/// Per-variant block of the health document.
#[derive(Debug, Clone, Serialize)]
pub struct VariantStats {
    pub index: usize,
    pub bandwidth: u64,
    pub resolution: String,
    pub total_segments: usize,
    pub position: usize,
}

/// The `stats` object of the health document.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub is_master: bool,
    pub window_size: usize,
    pub sequence_number: u64,
    pub target_duration: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<VariantStats>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_position: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_leader: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raft_state: Option<String>,
}

/// The `/cluster/status` document.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub cluster_enabled: bool,
    pub is_leader: bool,
    pub leader_address: String,
    pub raft_state: String,
}
