//! Source playlist model and one-time fetcher for Loopcast.
//!
//! This crate turns a static HLS playlist URL into an immutable in-memory
//! model that the live-window engine loops over:
//!
//! - **Media playlists** become a flat segment list plus a target duration.
//! - **Master playlists** become a list of variants, each carrying the
//!   segments of its own media playlist.
//!
//! All segment and variant URLs are resolved to absolute form here, so the
//! rest of the system can emit them verbatim. Fetching happens exactly once,
//! before the engine starts; everything produced by this crate is read-only
//! afterwards.

pub mod error;
pub mod fetch;
pub mod segment;
pub mod transform;
pub mod variant;

pub use error::SourceError;
pub use fetch::fetch_playlist;
pub use segment::Segment;
pub use transform::{filter_variants, subset_by_duration};
pub use variant::Variant;

/// Parsed source playlist, consumed exactly once at startup.
#[derive(Debug, Clone)]
pub enum PlaylistInfo {
    /// A single media playlist.
    Media {
        segments: Vec<Segment>,
        /// Maximum segment duration in whole seconds.
        target_duration: u64,
    },
    /// A master playlist with one or more variant streams.
    Master { variants: Vec<Variant> },
}

impl PlaylistInfo {
    /// Whether the source was a master playlist.
    pub fn is_master(&self) -> bool {
        matches!(self, PlaylistInfo::Master { .. })
    }

    /// The maximum target duration across the source (seconds).
    pub fn target_duration(&self) -> u64 {
        match self {
            PlaylistInfo::Media {
                target_duration, ..
            } => *target_duration,
            PlaylistInfo::Master { variants } => variants
                .iter()
                .map(|v| v.target_duration)
                .max()
                .unwrap_or(0),
        }
    }

    /// Total number of variants (a media playlist counts as one).
    pub fn variant_count(&self) -> usize {
        match self {
            PlaylistInfo::Media { .. } => 1,
            PlaylistInfo::Master { variants } => variants.len(),
        }
    }
}
