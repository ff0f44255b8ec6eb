//! Optional source transforms applied between parsing and engine start.

use tracing::info;

use crate::error::SourceError;
use crate::segment::Segment;
use crate::variant::Variant;

/// Returns the prefix of `segments` that fits within `max_secs` of content.
///
/// Durations are summed front to back. A segment that would overshoot the
/// budget is still included when the overshoot is at most half the budget;
/// processing stops at the first exclusion. At least one segment is always
/// returned, and a zero budget returns everything.
pub fn subset_by_duration(segments: &[Segment], max_secs: f64) -> Vec<Segment> {
    if segments.is_empty() || max_secs == 0.0 {
        return segments.to_vec();
    }

    let mut total = 0.0;
    let mut result = Vec::new();

    for (i, seg) in segments.iter().enumerate() {
        if i == 0 {
            total += seg.duration;
            result.push(seg.clone());
            continue;
        }

        let new_total = total + seg.duration;
        if new_total <= max_secs {
            total = new_total;
            result.push(seg.clone());
        } else {
            let overshoot = new_total - max_secs;
            if overshoot <= max_secs * 0.5 {
                result.push(seg.clone());
            }
            break;
        }
    }

    result
}

/// Keeps only the variants named by `indices`, in the order given.
///
/// Surviving variants and their segments are re-indexed densely from 0 so
/// the rest of the system never sees gaps.
pub fn filter_variants(
    variants: Vec<Variant>,
    indices: &[usize],
) -> Result<Vec<Variant>, SourceError> {
    let mut selected = Vec::with_capacity(indices.len());

    for (new_index, &index) in indices.iter().enumerate() {
        let mut variant = variants
            .get(index)
            .cloned()
            .ok_or(SourceError::UnknownVariant(index))?;
        for seg in &mut variant.segments {
            seg.variant_index = new_index;
        }
        selected.push(variant);
    }

    info!(
        selected = selected.len(),
        available = variants.len(),
        "filtered variant set"
    );

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(sequence: u64, duration: f64) -> Segment {
        Segment {
            url: format!("https://origin.example/seg{sequence:03}.ts"),
            duration,
            sequence,
            variant_index: 0,
        }
    }

    fn variant(bandwidth: u64, variant_index: usize, count: usize) -> Variant {
        Variant {
            bandwidth,
            resolution: None,
            codecs: None,
            playlist_url: format!("https://origin.example/v{variant_index}.m3u8"),
            segments: (0..count)
                .map(|i| {
                    let mut s = seg(i as u64, 6.0);
                    s.variant_index = variant_index;
                    s
                })
                .collect(),
            target_duration: 6,
        }
    }

    #[test]
    fn subset_includes_segments_within_budget() {
        let segments: Vec<_> = (0..5).map(|i| seg(i, 2.0)).collect();
        let subset = subset_by_duration(&segments, 6.0);
        assert_eq!(subset.len(), 3);
        assert_eq!(subset[2].sequence, 2);
    }

    #[test]
    fn subset_allows_half_budget_overshoot() {
        // 4 + 4 = 8 overshoots a 6s budget by 2, which is within 50%.
        let segments = vec![seg(0, 4.0), seg(1, 4.0), seg(2, 4.0)];
        let subset = subset_by_duration(&segments, 6.0);
        assert_eq!(subset.len(), 2);
    }

    #[test]
    fn subset_stops_at_large_overshoot() {
        // 2 + 9 = 11 overshoots a 4s budget by 7, well past 50%.
        let segments = vec![seg(0, 2.0), seg(1, 9.0), seg(2, 1.0)];
        let subset = subset_by_duration(&segments, 4.0);
        assert_eq!(subset.len(), 1);
    }

    #[test]
    fn subset_always_keeps_first_segment() {
        let segments = vec![seg(0, 30.0), seg(1, 1.0)];
        let subset = subset_by_duration(&segments, 5.0);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].sequence, 0);
    }

    #[test]
    fn subset_zero_budget_returns_everything() {
        let segments: Vec<_> = (0..4).map(|i| seg(i, 2.0)).collect();
        assert_eq!(subset_by_duration(&segments, 0.0).len(), 4);
    }

    #[test]
    fn filter_reindexes_variants_and_segments() {
        let variants = vec![variant(100, 0, 2), variant(200, 1, 2), variant(300, 2, 2)];
        let kept = filter_variants(variants, &[2, 0]).unwrap();

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bandwidth, 300);
        assert_eq!(kept[0].segments[0].variant_index, 0);
        assert_eq!(kept[1].bandwidth, 100);
        assert_eq!(kept[1].segments[1].variant_index, 1);
    }

    #[test]
    fn filter_rejects_unknown_index() {
        let variants = vec![variant(100, 0, 1)];
        let err = filter_variants(variants, &[3]).unwrap_err();
        assert!(matches!(err, SourceError::UnknownVariant(3)));
    }
}
