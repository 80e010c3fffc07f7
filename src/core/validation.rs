//! Stratified cross-validation folds and ranking metrics.

use crate::types::{ScoutError, ScoutResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Assign each sample to one of `k` folds, preserving class balance.
///
/// Indices of each class are shuffled with a seeded generator and dealt
/// round-robin, so every fold holds `floor(n_c / k)` or `ceil(n_c / k)`
/// members of class `c`. Returns the fold index of every sample.
pub fn stratified_folds(labels: &[bool], k: usize, seed: u64) -> ScoutResult<Vec<usize>> {
    if k < 2 {
        return Err(ScoutError::InvalidParameter(format!(
            "Cross-validation needs at least 2 folds, got {}",
            k
        )));
    }
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives < k {
        return Err(ScoutError::InsufficientData(format!(
            "{} positives cannot fill {} folds",
            positives, k
        )));
    }
    if negatives < k {
        return Err(ScoutError::InsufficientData(format!(
            "{} negatives cannot fill {} folds",
            negatives, k
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment = vec![0usize; labels.len()];
    // negatives continue the rotation where positives stopped
    let mut next = 0usize;
    for class in [true, false] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        members.shuffle(&mut rng);
        for i in members {
            assignment[i] = next % k;
            next += 1;
        }
    }
    Ok(assignment)
}

/// Area under the ROC curve (Mann-Whitney U, ties get average ranks)
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> ScoutResult<f64> {
    if scores.len() != labels.len() {
        return Err(ScoutError::InvalidParameter(format!(
            "{} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }
    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(ScoutError::InsufficientData(
            "ROC-AUC needs both classes".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 share their average
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }

    let rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|(_, l)| **l)
        .map(|(r, _)| r)
        .sum();
    let u = rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Ok(u / (n_pos as f64 * n_neg as f64))
}

/// Mean and population standard deviation
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
