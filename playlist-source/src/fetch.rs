//! One-shot fetching and parsing of the source playlist.

use std::time::Duration;

use hls_m3u8::tags::VariantStream as HlsVariantStream;
use hls_m3u8::{MasterPlaylist as HlsMasterPlaylist, MediaPlaylist as HlsMediaPlaylist};
use tracing::debug;
use url::Url;

use crate::error::SourceError;
use crate::segment::Segment;
use crate::variant::Variant;
use crate::PlaylistInfo;

/// Bound on the entire source fetch, per request.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches and parses an HLS playlist from a URL.
///
/// Master playlists are detected automatically; every referenced variant
/// media playlist is fetched as well. All URLs in the result are absolute.
pub async fn fetch_playlist(playlist_url: &str) -> Result<PlaylistInfo, SourceError> {
    let base = Url::parse(playlist_url)?;
    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;

    let body = get_text(&client, base.clone()).await?;

    if is_master_playlist(&body) {
        let heads = parse_master(&body)?;
        if heads.is_empty() {
            return Err(SourceError::NoVariants);
        }

        let mut variants = Vec::with_capacity(heads.len());
        for (index, head) in heads.into_iter().enumerate() {
            let media_url = base.join(&head.uri)?;
            debug!(variant = index, url = %media_url, "fetching variant media playlist");

            let media_body = get_text(&client, media_url.clone()).await?;
            let (segments, target_duration) = parse_media(&media_body, &media_url, index)?;

            variants.push(Variant {
                bandwidth: head.bandwidth,
                resolution: head.resolution,
                codecs: head.codecs,
                playlist_url: media_url.into(),
                segments,
                target_duration,
            });
        }

        Ok(PlaylistInfo::Master { variants })
    } else {
        let (segments, target_duration) = parse_media(&body, &base, 0)?;
        Ok(PlaylistInfo::Media {
            segments,
            target_duration,
        })
    }
}

async fn get_text(client: &reqwest::Client, url: Url) -> Result<String, SourceError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// A master playlist is the only kind that carries `#EXT-X-STREAM-INF`.
fn is_master_playlist(body: &str) -> bool {
    body.contains("#EXT-X-STREAM-INF")
}

/// Variant attributes lifted from one `#EXT-X-STREAM-INF` entry.
struct VariantHead {
    uri: String,
    bandwidth: u64,
    resolution: Option<String>,
    codecs: Option<String>,
}

fn parse_master(body: &str) -> Result<Vec<VariantHead>, SourceError> {
    let master =
        HlsMasterPlaylist::try_from(body).map_err(|e| SourceError::Parse(e.to_string()))?;

    let heads = master
        .variant_streams
        .iter()
        .filter_map(|vs| match vs {
            HlsVariantStream::ExtXStreamInf {
                uri, stream_data, ..
            } => Some(VariantHead {
                uri: uri.to_string(),
                bandwidth: stream_data.bandwidth(),
                resolution: vs.resolution().map(|r| r.to_string()),
                codecs: stream_data.codecs().map(ToString::to_string),
            }),
            // I-frame-only streams carry no playable segments.
            HlsVariantStream::ExtXIFrame { .. } => None,
        })
        .collect();

    Ok(heads)
}

fn parse_media(
    body: &str,
    base: &Url,
    variant_index: usize,
) -> Result<(Vec<Segment>, u64), SourceError> {
    let media = HlsMediaPlaylist::try_from(body).map_err(|e| SourceError::Parse(e.to_string()))?;

    let mut segments = Vec::new();
    for (i, (_key, seg)) in media.segments.iter().enumerate() {
        let url = base.join(seg.uri())?;
        segments.push(Segment {
            url: url.into(),
            duration: seg.duration.duration().as_secs_f64(),
            sequence: i as u64,
            variant_index,
        });
    }

    if segments.is_empty() {
        return Err(SourceError::NoSegments(variant_index));
    }

    let mut target_duration = media.target_duration.as_secs();
    if target_duration == 0 {
        // Derive from the longest segment when the source omits a usable tag.
        let max = segments.iter().map(|s| s.duration).fold(0.0, f64::max);
        target_duration = max as u64 + 1;
    }

    Ok((segments, target_duration))
}
