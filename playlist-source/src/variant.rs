use crate::segment::Segment;

/// A single variant stream from an HLS master playlist.
///
/// Each variant typically represents one quality level (bitrate/resolution)
/// and carries the full segment list of its media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    /// Peak bitrate in bits per second.
    pub bandwidth: u64,

    /// Video resolution as "WxH", when the master playlist advertised one.
    pub resolution: Option<String>,

    /// RFC 6381 codec string, when advertised.
    pub codecs: Option<String>,

    /// Absolute URL of the variant's media playlist at the origin.
    pub playlist_url: String,

    /// All segments of the variant's media playlist, in source order.
    pub segments: Vec<Segment>,

    /// Maximum segment duration in whole seconds.
    pub target_duration: u64,
}
