// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Weighted sampling without replacement for value-tree policies.

/// Draw up to `max_items` entries from `candidates`, each with probability
/// proportional to its weight among the entries not yet drawn.
///
/// For every output slot a uniform value in `[0, remaining_total)` is drawn and
/// the entry whose cumulative weight range contains it is taken out of the
/// candidate set. Sampling stops early once the remaining weight is zero.
pub fn sample_without_replacement<T: Copy>(
    mut candidates: Vec<(T, u64)>,
    max_items: usize,
    rng: &mut fastrand::Rng,
) -> Vec<T> {
    let mut total: u128 = candidates.iter().map(|(_, w)| u128::from(*w)).sum();
    let mut selected = Vec::with_capacity(max_items.min(candidates.len()));

    while selected.len() < max_items && total > 0 {
        let draw = random_below(rng, total);
        let mut cumulative: u128 = 0;
        let mut chosen = None;
        for (idx, (_, weight)) in candidates.iter().enumerate() {
            cumulative += u128::from(*weight);
            if draw < cumulative {
                chosen = Some(idx);
                break;
            }
        }
        let Some(idx) = chosen else { break };
        // `remove` (not swap_remove) keeps the remaining order deterministic for a given seed.
        let (item, weight) = candidates.remove(idx);
        total -= u128::from(weight);
        selected.push(item);
    }

    selected
}

/// Uniform value in `[0, bound)`; `bound` must be positive.
fn random_below(rng: &mut fastrand::Rng, bound: u128) -> u128 {
    match u64::try_from(bound) {
        Ok(b) => u128::from(rng.u64(0..b)),
        Err(_) => rng.u128(0..bound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_total_stops_early() {
        let mut rng = fastrand::Rng::with_seed(1);
        let out = sample_without_replacement(vec![(1u32, 0), (2, 0)], 2, &mut rng);
        assert!(out.is_empty());
    }

    #[test]
    fn test_without_replacement() {
        let mut rng = fastrand::Rng::with_seed(7);
        let out = sample_without_replacement(vec![(1u32, 5), (2, 5), (3, 5)], 10, &mut rng);
        assert_eq!(out.len(), 3);
        let mut sorted = out.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..200 {
            let out = sample_without_replacement(vec![(1u32, 0), (2, 3), (3, 1)], 2, &mut rng);
            assert!(!out.contains(&1));
        }
    }

    #[test]
    fn test_proportional() {
        let mut rng = fastrand::Rng::with_seed(3);
        let mut heavy = 0;
        for _ in 0..4000 {
            let out = sample_without_replacement(vec![(1u32, 9), (2, 1)], 1, &mut rng);
            if out[0] == 1 {
                heavy += 1;
            }
        }
        // Expected 3600; allow generous slack.
        assert!((3400..3800).contains(&heavy), "heavy = {}", heavy);
    }
}
