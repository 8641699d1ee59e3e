//! Jensen-Shannon distance between discrete distributions.
//!
//! The distance is the square root of the Jensen-Shannon divergence computed with base-2
//! logarithms, so it is bounded in `[0, 1]`. Inputs are normalized before comparison, which
//! allows raw counts or volumes to be passed directly.

use std::collections::BTreeMap;

/// Contribution of one outcome to `KL(p || m)`.
fn kl_term(p: f64, m: f64) -> f64 {
    if p > 0.0 {
        p * (p / m).log2()
    } else {
        0.0
    }
}

/// Distance between two normalized, aligned mass vectors.
fn aligned<I>(masses: I) -> f64
where
    I: Iterator<Item = (f64, f64)>,
{
    let mut divergence = 0.0;
    for (p, q) in masses {
        let m = (p + q) / 2.0;
        divergence += 0.5 * kl_term(p, m) + 0.5 * kl_term(q, m);
    }
    divergence.clamp(0.0, 1.0).sqrt()
}

/// Distance when at least one side has no mass.
fn degenerate(p_total: f64, q_total: f64) -> Option<f64> {
    match (p_total > 0.0, q_total > 0.0) {
        (true, true) => None,
        (false, false) => Some(0.0),
        _ => Some(1.0),
    }
}

/// Jensen-Shannon distance between two dense distributions over the same index space.
///
/// Both sides are normalized by their own total. Two empty distributions are at distance 0;
/// an empty and a non-empty distribution are at distance 1.
///
/// # Panics
///
/// Panics if `p` and `q` have different lengths.
pub fn jensen_shannon_distance(p: &[f64], q: &[f64]) -> f64 {
    assert_eq!(p.len(), q.len(), "distributions are not aligned");
    let p_total: f64 = p.iter().sum();
    let q_total: f64 = q.iter().sum();
    if let Some(distance) = degenerate(p_total, q_total) {
        return distance;
    }
    aligned(
        p.iter()
            .zip(q)
            .map(|(&p, &q)| (p / p_total, q / q_total)),
    )
}

/// Jensen-Shannon distance between two sparse distributions.
///
/// The distributions are aligned over the union of their supports, treating absent keys as
/// zero mass.
pub fn jensen_shannon_distance_sparse<K: Ord>(p: &BTreeMap<K, f64>, q: &BTreeMap<K, f64>) -> f64 {
    let p_total: f64 = p.values().sum();
    let q_total: f64 = q.values().sum();
    if let Some(distance) = degenerate(p_total, q_total) {
        return distance;
    }
    let mut keys: Vec<&K> = p.keys().chain(q.keys()).collect();
    keys.sort();
    keys.dedup();
    aligned(keys.into_iter().map(|key| {
        let p = p.get(key).copied().unwrap_or(0.0);
        let q = q.get(key).copied().unwrap_or(0.0);
        (p / p_total, q / q_total)
    }))
}
