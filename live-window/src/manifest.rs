//! Deterministic HLS manifest generation.
//!
//! Both serializers are pure functions: equal inputs produce byte-identical
//! output, with no dependence on time, locks or iteration order. Lines end
//! in LF and the HLS version tag is fixed at 3.

use playlist_source::Variant;

/// Renders the media playlist for one variant's current window.
///
/// The window is the `window_size`-long run of segments starting at
/// `position`, wrapping modulo the variant length (and clamped to it). A
/// `#EXT-X-DISCONTINUITY` is inserted wherever a segment's origin sequence
/// drops below its predecessor's, which happens exactly at the wrap seam.
/// No `#EXT-X-ENDLIST` is ever emitted: the stream must look live forever.
pub fn media_manifest(
    variant: &Variant,
    position: usize,
    sequence: u64,
    window_size: usize,
) -> String {
    let total = variant.segments.len();
    let count = window_size.min(total);

    let mut manifest = format!(
        "#EXTM3U\n\
         #EXT-X-VERSION:3\n\
         #EXT-X-TARGETDURATION:{}\n\
         #EXT-X-MEDIA-SEQUENCE:{}\n",
        variant.target_duration, sequence
    );

    let mut previous: Option<u64> = None;
    for i in 0..count {
        let segment = &variant.segments[(position + i) % total];

        if let Some(prev) = previous {
            if segment.sequence < prev {
                manifest.push_str("#EXT-X-DISCONTINUITY\n");
            }
        }

        manifest.push_str(&format!("#EXTINF:{:.3},\n{}\n", segment.duration, segment.url));
        previous = Some(segment.sequence);
    }

    manifest
}

/// Renders the master playlist linking every variant's media endpoint.
///
/// Variants appear in definition order; the media URLs are relative so the
/// same manifest is valid on every node.
pub fn master_manifest(variants: &[Variant]) -> String {
    let mut manifest = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    for (index, variant) in variants.iter().enumerate() {
        manifest.push_str(&format!("#EXT-X-STREAM-INF:BANDWIDTH={}", variant.bandwidth));
        if let Some(resolution) = &variant.resolution {
            manifest.push_str(&format!(",RESOLUTION={resolution}"));
        }
        if let Some(codecs) = &variant.codecs {
            manifest.push_str(&format!(",CODECS=\"{codecs}\""));
        }
        manifest.push('\n');
        manifest.push_str(&format!("/variant/{index}/playlist.m3u8\n"));
    }

    manifest
}

#[cfg(test)]
mod tests {
    use playlist_source::Segment;

    use super::*;

    /// Five 1s segments, the fixture used throughout the wrap tests.
    fn five_segment_variant() -> Variant {
        variant_with_segments(5)
    }

    fn variant_with_segments(count: usize) -> Variant {
        Variant {
            bandwidth: 1280000,
            resolution: None,
            codecs: None,
            playlist_url: "https://origin.example/media.m3u8".to_string(),
            segments: (0..count)
                .map(|i| Segment {
                    url: format!("https://origin.example/seg{i}.ts"),
                    duration: 1.0,
                    sequence: i as u64,
                    variant_index: 0,
                })
                .collect(),
            target_duration: 1,
        }
    }

    #[test]
    fn initial_window_lists_the_first_segments() {
        let manifest = media_manifest(&five_segment_variant(), 0, 0, 3);
        assert_eq!(
            manifest,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-TARGETDURATION:1\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXTINF:1.000,\n\
             https://origin.example/seg0.ts\n\
             #EXTINF:1.000,\n\
             https://origin.example/seg1.ts\n\
             #EXTINF:1.000,\n\
             https://origin.example/seg2.ts\n"
        );
    }

    #[test]
    fn wrapped_window_marks_the_seam_with_one_discontinuity() {
        // After three advances the window is 3,4,0: the wrap sits between
        // the last and first source segments.
        let manifest = media_manifest(&five_segment_variant(), 3, 3, 3);
        assert_eq!(
            manifest,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-TARGETDURATION:1\n\
             #EXT-X-MEDIA-SEQUENCE:3\n\
             #EXTINF:1.000,\n\
             https://origin.example/seg3.ts\n\
             #EXTINF:1.000,\n\
             https://origin.example/seg4.ts\n\
             #EXT-X-DISCONTINUITY\n\
             #EXTINF:1.000,\n\
             https://origin.example/seg0.ts\n"
        );
        assert_eq!(manifest.matches("#EXT-X-DISCONTINUITY").count(), 1);
    }

    #[test]
    fn full_cycle_returns_to_a_clean_window() {
        // Five advances bring the window back to 0,1,2 with no seam.
        let manifest = media_manifest(&five_segment_variant(), 0, 5, 3);
        assert!(!manifest.contains("#EXT-X-DISCONTINUITY"));
        assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:5\n"));
        assert!(manifest.contains("seg0.ts"));
        assert!(manifest.contains("seg2.ts"));
        assert!(!manifest.contains("seg3.ts"));
    }

    #[test]
    fn discontinuity_appears_iff_the_window_straddles_the_wrap() {
        let variant = five_segment_variant();
        for position in 0..5 {
            let manifest = media_manifest(&variant, position, position as u64, 3);
            let discontinuities = manifest.matches("#EXT-X-DISCONTINUITY").count();
            // Window size 3 over 5 segments straddles the seam for start
            // positions 3 and 4.
            let expected = usize::from(position + 3 > 5);
            assert_eq!(discontinuities, expected, "position {position}");
        }
    }

    #[test]
    fn oversized_window_is_clamped_and_never_discontinuous() {
        let manifest = media_manifest(&five_segment_variant(), 2, 9, 10);
        // Exactly the five source segments, once each.
        assert_eq!(manifest.matches("#EXTINF:").count(), 5);
        assert!(!manifest.contains("#EXT-X-DISCONTINUITY"));
    }

    #[test]
    fn window_equal_to_variant_length_covers_the_whole_ring() {
        let manifest = media_manifest(&five_segment_variant(), 4, 4, 5);
        assert_eq!(manifest.matches("#EXTINF:").count(), 5);
        assert!(!manifest.contains("#EXT-X-DISCONTINUITY"));
        assert!(manifest.contains("seg4.ts"));
    }

    #[test]
    fn single_segment_variant_repeats_without_discontinuity() {
        let variant = variant_with_segments(1);
        for sequence in 0..4 {
            let manifest = media_manifest(&variant, 0, sequence, 3);
            assert_eq!(manifest.matches("#EXTINF:").count(), 1);
            assert!(!manifest.contains("#EXT-X-DISCONTINUITY"));
            assert!(manifest.contains(&format!("#EXT-X-MEDIA-SEQUENCE:{sequence}\n")));
        }
    }

    #[test]
    fn live_manifests_never_end() {
        let manifest = media_manifest(&five_segment_variant(), 0, 0, 5);
        assert!(!manifest.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn serializer_is_deterministic() {
        let variant = five_segment_variant();
        let a = media_manifest(&variant, 3, 7, 4);
        let b = media_manifest(&variant, 3, 7, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn master_manifest_lists_variants_in_order() {
        let mut low = variant_with_segments(5);
        low.resolution = Some("640x360".to_string());
        let mut high = variant_with_segments(5);
        high.bandwidth = 2560000;
        high.resolution = Some("1280x720".to_string());

        let manifest = master_manifest(&[low, high]);
        assert_eq!(
            manifest,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360\n\
             /variant/0/playlist.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720\n\
             /variant/1/playlist.m3u8\n"
        );
        assert!(!manifest.contains(".ts"));
    }

    #[test]
    fn master_manifest_quotes_codecs() {
        let mut variant = variant_with_segments(2);
        variant.codecs = Some("avc1.4d401f,mp4a.40.2".to_string());
        let manifest = master_manifest(&[variant]);
        assert!(manifest
            .contains("#EXT-X-STREAM-INF:BANDWIDTH=1280000,CODECS=\"avc1.4d401f,mp4a.40.2\"\n"));
    }
}
