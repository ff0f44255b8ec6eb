/// A single HLS media segment from the source playlist.
///
/// Segments are never fetched; the URL is kept verbatim (already resolved to
/// absolute form) so generated manifests point players at the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Absolute segment URL, emitted as-is in generated manifests.
    pub url: String,

    /// Segment duration in seconds.
    pub duration: f64,

    /// Position of the segment in the source playlist (0-based).
    pub sequence: u64,

    /// Index of the variant this segment belongs to (0 for media playlists).
    pub variant_index: usize,
}
