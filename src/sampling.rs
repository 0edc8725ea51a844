//! Negative sampling for implicit-feedback training.
//!
//! Implicit data has no observed negatives, so both trainers balance the
//! all-positive corpus with uniformly drawn (user, item) pairs that are not
//! in the positive set.

use rand::Rng;
use std::collections::HashSet;

/// Maximum redraw attempts per requested negative. Bounds the rejection
/// loop in near-dense matrices; exhausted draws are skipped.
pub const MAX_SAMPLE_ATTEMPTS: usize = 50;

/// One binary training sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSample {
    pub user_idx: usize,
    pub item_idx: usize,
    pub label: f32,
}

/// Draw `ratio` negatives per positive, rejecting collisions with the
/// positive set. Returned samples never overlap `positives`.
pub fn sample_negatives<R: Rng>(
    positives: &HashSet<(usize, usize)>,
    num_users: usize,
    num_items: usize,
    ratio: usize,
    rng: &mut R,
) -> Vec<TrainingSample> {
    if num_users == 0 || num_items == 0 {
        return Vec::new();
    }

    let wanted = positives.len() * ratio;
    let mut negatives = Vec::with_capacity(wanted);

    for _ in 0..wanted {
        let mut drawn = None;
        for _ in 0..MAX_SAMPLE_ATTEMPTS {
            let pair = (rng.gen_range(0..num_users), rng.gen_range(0..num_items));
            if !positives.contains(&pair) {
                drawn = Some(pair);
                break;
            }
        }
        if let Some((user_idx, item_idx)) = drawn {
            negatives.push(TrainingSample {
                user_idx,
                item_idx,
                label: 0.0,
            });
        }
    }

    negatives
}

/// Positives plus sampled negatives, ready to shuffle.
pub fn build_samples<R: Rng>(
    positives: &HashSet<(usize, usize)>,
    num_users: usize,
    num_items: usize,
    negative_ratio: usize,
    rng: &mut R,
) -> Vec<TrainingSample> {
    let mut samples: Vec<TrainingSample> = positives
        .iter()
        .map(|&(user_idx, item_idx)| TrainingSample {
            user_idx,
            item_idx,
            label: 1.0,
        })
        .collect();
    samples.extend(sample_negatives(
        positives,
        num_users,
        num_items,
        negative_ratio,
        rng,
    ));
    samples
}
