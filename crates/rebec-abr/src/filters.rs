use crate::types::Representation;

/// Keep Representations whose bitrate does not exceed `bitrate_ceil`,
/// sorted ascending.
///
/// The lowest available Representation always survives: a throttle can never
/// empty a non-empty pool.
pub fn filter_by_bitrate(representations: &[Representation], bitrate_ceil: f64) -> Vec<Representation> {
    let mut sorted: Vec<Representation> = representations.to_vec();
    sorted.sort_by_key(|r| r.bitrate);
    let Some(lowest) = sorted.first().map(|r| f64::from(r.bitrate)) else {
        return sorted;
    };
    let ceil = bitrate_ceil.max(lowest);
    sorted.retain(|r| f64::from(r.bitrate) <= ceil);
    sorted
}

/// Keep Representations no wider than needed to fill `width_limit` pixels.
///
/// The ceiling is the smallest available width that still covers the limit;
/// Representations without width information are never filtered out.
pub fn filter_by_width(representations: &[Representation], width_limit: u32) -> Vec<Representation> {
    let mut widths: Vec<u32> = representations.iter().filter_map(|r| r.width).collect();
    widths.sort_unstable();
    let Some(max_width) = widths.into_iter().find(|w| *w >= width_limit) else {
        return representations.to_vec();
    };
    representations
        .iter()
        .filter(|r| r.width.is_none_or(|w| w <= max_width))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::types::Representation;

    fn pool() -> Vec<Representation> {
        vec![
            Representation::new("low", 100_000).with_resolution(640, 360),
            Representation::new("mid", 500_000).with_resolution(1280, 720),
            Representation::new("high", 2_000_000).with_resolution(1920, 1080),
        ]
    }

    #[rstest]
    #[case(0.0, vec![100_000])]
    #[case(100_000.0, vec![100_000])]
    #[case(600_000.0, vec![100_000, 500_000])]
    #[case(f64::INFINITY, vec![100_000, 500_000, 2_000_000])]
    fn bitrate_filter_keeps_pool_non_empty(
        #[case] ceil: f64,
        #[case] expected: Vec<u32>,
    ) {
        let kept: Vec<u32> = filter_by_bitrate(&pool(), ceil)
            .iter()
            .map(|r| r.bitrate)
            .collect();
        assert_eq!(kept, expected);
        assert!(!kept.is_empty());
    }

    #[test]
    fn bitrate_filter_sorts_ascending() {
        let mut reversed = pool();
        reversed.reverse();
        let kept: Vec<u32> = filter_by_bitrate(&reversed, f64::INFINITY)
            .iter()
            .map(|r| r.bitrate)
            .collect();
        assert_eq!(kept, vec![100_000, 500_000, 2_000_000]);
    }

    #[rstest]
    #[case(360, vec!["low"])]
    #[case(700, vec!["low", "mid"])] // 1280 is the smallest width covering 700
    #[case(1280, vec!["low", "mid"])]
    #[case(4000, vec!["low", "mid", "high"])] // nothing covers it: keep all
    fn width_filter_covers_limit(#[case] limit: u32, #[case] expected: Vec<&str>) {
        let kept: Vec<String> = filter_by_width(&pool(), limit)
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn width_filter_keeps_unsized_representations() {
        let mut reps = pool();
        reps.push(Representation::new("audio-ish", 64_000));
        let kept = filter_by_width(&reps, 360);
        assert!(kept.iter().any(|r| &*r.id == "audio-ish"));
    }

    #[test]
    fn empty_input_stays_empty() {
        assert!(filter_by_bitrate(&[], 1000.0).is_empty());
        assert!(filter_by_width(&[], 1000).is_empty());
    }
}
