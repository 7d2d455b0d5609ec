use crate::types::Representation;

/// Pick the highest-bitrate Representation not exceeding `wanted_bitrate`,
/// falling back to the lowest available when nothing fits.
///
/// Returns `None` only for an empty pool.
pub(crate) fn select_optimal_representation(
    representations: &[Representation],
    wanted_bitrate: f64,
) -> Option<Representation> {
    let best_under = representations
        .iter()
        .filter(|r| f64::from(r.bitrate) <= wanted_bitrate)
        .max_by_key(|r| r.bitrate);
    best_under
        .or_else(|| representations.iter().min_by_key(|r| r.bitrate))
        .cloned()
}
