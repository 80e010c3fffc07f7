//! Gradient-boosted tree classifier with stratified cross-validation.
//!
//! Trees are fit on the second-order expansion of the logistic loss with L1
//! and L2 leaf penalties. Models are explicit values: `ClassifierTrainer::train`
//! returns one, `score` consumes one, and nothing is cached globally.

use crate::core::sampling::TrainingTable;
use crate::core::schema::{FeatureSchema, FeatureVector};
use crate::core::validation::{mean_std, roc_auc, stratified_folds};
use crate::types::{ScoutError, ScoutResult};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Boosting hyper-parameters, conservative for tables of a few thousand rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum hessian sum in each child of a split
    pub min_child_weight: f64,
    /// Fraction of rows drawn for each tree
    pub subsample: f64,
    /// Fraction of features drawn for each tree
    pub colsample_bytree: f64,
    /// L1 penalty on leaf weights
    pub reg_alpha: f64,
    /// L2 penalty on leaf weights
    pub reg_lambda: f64,
    /// Minimum loss reduction to keep a split
    pub gamma: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            learning_rate: 0.05,
            max_depth: 3,
            min_child_weight: 5.0,
            subsample: 0.8,
            colsample_bytree: 0.8,
            reg_alpha: 0.1,
            reg_lambda: 1.0,
            gamma: 0.0,
            seed: 42,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> ScoutResult<()> {
        let fraction_ok = |v: f64| v > 0.0 && v <= 1.0;
        if self.n_estimators == 0 || self.max_depth == 0 {
            return Err(ScoutError::InvalidParameter(
                "n_estimators and max_depth must be positive".to_string(),
            ));
        }
        if !fraction_ok(self.learning_rate)
            || !fraction_ok(self.subsample)
            || !fraction_ok(self.colsample_bytree)
        {
            return Err(ScoutError::InvalidParameter(format!(
                "learning_rate, subsample and colsample_bytree must be in (0, 1], got {}, {}, {}",
                self.learning_rate, self.subsample, self.colsample_bytree
            )));
        }
        if self.min_child_weight < 0.0 || self.reg_alpha < 0.0 || self.reg_lambda < 0.0 || self.gamma < 0.0 {
            return Err(ScoutError::InvalidParameter(
                "Regularization parameters must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationParams {
    pub folds: usize,
    pub seed: u64,
}

impl Default for CrossValidationParams {
    fn default() -> Self {
        Self { folds: 5, seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// Rows with `value < threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: f64 },
}

/// One regression tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row[*feature] < *threshold { *left } else { *right };
                }
                Some(TreeNode::Leaf { value }) => return *value,
                None => return 0.0,
            }
        }
    }

    /// Children must come after their parent, which also rules out cycles
    fn validate(&self, n_features: usize) -> ScoutResult<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                let ok = *feature < n_features
                    && threshold.is_finite()
                    && *left > i
                    && *right > i
                    && *left < self.nodes.len()
                    && *right < self.nodes.len();
                if !ok {
                    return Err(ScoutError::InvalidParameter(format!(
                        "Malformed split at tree node {}",
                        i
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Additive tree ensemble on the log-odds scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedEnsemble {
    base_score: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl BoostedEnsemble {
    /// Fit on rows in a fixed feature layout. Returns the ensemble and the
    /// total split gain of every feature.
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        params: &BoostingParams,
        seed: u64,
    ) -> ScoutResult<(Self, Vec<f64>)> {
        params.validate()?;
        if rows.is_empty() || rows.len() != targets.len() {
            return Err(ScoutError::InsufficientData(format!(
                "Cannot fit {} rows against {} targets",
                rows.len(),
                targets.len()
            )));
        }
        let n_features = rows[0].len();
        if n_features == 0 || rows.iter().any(|r| r.len() != n_features) {
            return Err(ScoutError::InvalidParameter(
                "Training rows must share a non-empty feature layout".to_string(),
            ));
        }

        let prior = (targets.iter().sum::<f64>() / targets.len() as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (prior / (1.0 - prior)).ln();
        let mut margins = vec![base_score; rows.len()];
        let mut importance = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut rng = StdRng::seed_from_u64(seed);

        let n_rows = ((rows.len() as f64 * params.subsample).round() as usize).max(1);
        let n_cols = ((n_features as f64 * params.colsample_bytree).round() as usize).max(1);
        let mut all_rows: Vec<usize> = (0..rows.len()).collect();
        let mut all_cols: Vec<usize> = (0..n_features).collect();

        for _ in 0..params.n_estimators {
            let (grad, hess): (Vec<f64>, Vec<f64>) = margins
                .iter()
                .zip(targets)
                .map(|(m, y)| {
                    let p = sigmoid(*m);
                    (p - y, (p * (1.0 - p)).max(1e-16))
                })
                .unzip();

            all_rows.shuffle(&mut rng);
            all_cols.shuffle(&mut rng);
            let sample = all_rows[..n_rows].to_vec();
            let mut features = all_cols[..n_cols].to_vec();
            features.sort_unstable();

            let mut builder = TreeBuilder {
                rows,
                grad: &grad,
                hess: &hess,
                features: &features,
                params,
                nodes: Vec::new(),
                importance: &mut importance,
            };
            builder.build(sample, 0);
            let tree = RegressionTree {
                nodes: builder.nodes,
            };

            for (m, row) in margins.iter_mut().zip(rows) {
                *m += tree.predict(row);
            }
            trees.push(tree);
        }

        Ok((
            Self {
                base_score,
                trees,
                n_features,
            },
            importance,
        ))
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    pub fn predict_margin(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    /// Probability of the site class
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.predict_margin(row))
    }

    fn validate(&self) -> ScoutResult<()> {
        if !self.base_score.is_finite() {
            return Err(ScoutError::InvalidParameter("Non-finite base score".to_string()));
        }
        for tree in &self.trees {
            tree.validate(self.n_features)?;
        }
        Ok(())
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a BoostingParams,
    nodes: Vec<TreeNode>,
    importance: &'a mut [f64],
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, members: Vec<usize>, depth: usize) -> usize {
        let g: f64 = members.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = members.iter().map(|&i| self.hess[i]).sum();
        let id = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            value: self.leaf_value(g, h),
        });

        if depth >= self.params.max_depth
            || members.len() < 2
            || h < 2.0 * self.params.min_child_weight
        {
            return id;
        }

        if let Some(split) = self.best_split(&members, g, h) {
            let (left, right): (Vec<usize>, Vec<usize>) = members
                .into_iter()
                .partition(|&i| self.rows[i][split.feature] < split.threshold);
            self.importance[split.feature] += split.gain;
            let left_id = self.build(left, depth + 1);
            let right_id = self.build(right, depth + 1);
            self.nodes[id] = TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: left_id,
                right: right_id,
            };
        }
        id
    }

    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -soft_threshold(g, self.params.reg_alpha) / (h + self.params.reg_lambda)
            * self.params.learning_rate
    }

    fn structure_score(&self, g: f64, h: f64) -> f64 {
        let t = soft_threshold(g, self.params.reg_alpha);
        t * t / (h + self.params.reg_lambda)
    }

    /// Exact greedy search over every distinct value of the sampled features
    fn best_split(&self, members: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.structure_score(g, h);
        let mcw = self.params.min_child_weight;
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.features {
            let mut sorted: Vec<(f64, f64, f64)> = members
                .iter()
                .map(|&i| (self.rows[i][feature], self.grad[i], self.hess[i]))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut gl, mut hl) = (0.0, 0.0);
            for k in 0..sorted.len() - 1 {
                gl += sorted[k].1;
                hl += sorted[k].2;
                let (lo, hi) = (sorted[k].0, sorted[k + 1].0);
                if lo == hi {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < mcw || hr < mcw {
                    continue;
                }
                let gain = 0.5
                    * (self.structure_score(gl, hl) + self.structure_score(gr, hr) - parent)
                    - self.params.gamma;
                if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold <= lo {
                        threshold = hi;
                    }
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldCounts {
    pub positives: usize,
    pub negatives: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    /// Share of the total split gain
    pub importance: f64,
}

/// Cross-validation outcome of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub fold_auc: Vec<f64>,
    pub mean_auc: f64,
    /// Population standard deviation of the fold AUCs
    pub std_auc: f64,
    pub fold_counts: Vec<FoldCounts>,
    /// Sorted by decreasing importance
    pub feature_importance: Vec<FeatureImportance>,
}

/// A fitted classifier together with the schema it was trained on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    schema: FeatureSchema,
    ensemble: BoostedEnsemble,
    params: BoostingParams,
    metrics: ValidationMetrics,
    trained_at: DateTime<Utc>,
}

impl TrainedModel {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn ensemble(&self) -> &BoostedEnsemble {
        &self.ensemble
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn metrics(&self) -> &ValidationMetrics {
        &self.metrics
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn score(&self, vector: &FeatureVector) -> ScoutResult<f64> {
        score(self, vector)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ScoutResult<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        log::info!("Saved model to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> ScoutResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let model: TrainedModel = serde_json::from_reader(reader)?;
        if model.ensemble.n_features != model.schema.len() {
            return Err(ScoutError::InvalidParameter(format!(
                "Model ensemble expects {} features but its schema lists {}",
                model.ensemble.n_features,
                model.schema.len()
            )));
        }
        model.ensemble.validate()?;
        log::info!(
            "Loaded model from {} ({} features, {} trees)",
            path.as_ref().display(),
            model.schema.len(),
            model.ensemble.trees.len()
        );
        Ok(model)
    }
}

/// Probability that a location is a site; the vector's keys must equal the schema
pub fn score(model: &TrainedModel, vector: &FeatureVector) -> ScoutResult<f64> {
    let row = vector.to_ordered(&model.schema)?;
    Ok(model.ensemble.predict_proba(&row))
}

/// Score many vectors; fails on the first schema mismatch
pub fn score_batch(model: &TrainedModel, vectors: &[FeatureVector]) -> ScoutResult<Vec<f64>> {
    #[cfg(feature = "parallel")]
    let scores = vectors.par_iter().map(|v| score(model, v)).collect();

    #[cfg(not(feature = "parallel"))]
    let scores = vectors.iter().map(|v| score(model, v)).collect();

    scores
}

/// Classifier training processor
pub struct ClassifierTrainer {
    boosting: BoostingParams,
    cross_validation: CrossValidationParams,
}

impl ClassifierTrainer {
    pub fn new(boosting: BoostingParams, cross_validation: CrossValidationParams) -> Self {
        Self {
            boosting,
            cross_validation,
        }
    }

    pub fn standard() -> Self {
        Self::new(BoostingParams::default(), CrossValidationParams::default())
    }

    /// Cross-validate, then refit on the whole table
    pub fn train(&self, table: &TrainingTable) -> ScoutResult<TrainedModel> {
        self.boosting.validate()?;
        if table.is_empty() {
            return Err(ScoutError::InsufficientData("Training table is empty".to_string()));
        }
        let k = self.cross_validation.folds;
        log::info!(
            "Training on {} samples ({} positive) with {}-fold cross-validation",
            table.len(),
            table.positives(),
            k
        );

        let schema = table.schema().clone();
        let rows: Vec<Vec<f64>> = table
            .samples()
            .iter()
            .map(|s| s.vector.to_ordered(&schema))
            .collect::<ScoutResult<_>>()?;
        let labels: Vec<bool> = table.samples().iter().map(|s| s.label.is_positive()).collect();
        let targets: Vec<f64> = table.samples().iter().map(|s| s.label.target()).collect();

        let assignment = stratified_folds(&labels, k, self.cross_validation.seed)?;
        let fold_counts: Vec<FoldCounts> = (0..k)
            .map(|f| FoldCounts {
                positives: (0..labels.len()).filter(|&i| assignment[i] == f && labels[i]).count(),
                negatives: (0..labels.len()).filter(|&i| assignment[i] == f && !labels[i]).count(),
            })
            .collect();

        let run_fold = |fold: usize| -> ScoutResult<f64> {
            let (train_idx, test_idx): (Vec<usize>, Vec<usize>) =
                (0..rows.len()).partition(|&i| assignment[i] != fold);
            let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
            let train_targets: Vec<f64> = train_idx.iter().map(|&i| targets[i]).collect();
            let seed = self.boosting.seed.wrapping_add(fold as u64 + 1);
            let (ensemble, _) = BoostedEnsemble::fit(&train_rows, &train_targets, &self.boosting, seed)?;

            let scores: Vec<f64> = test_idx.iter().map(|&i| ensemble.predict_proba(&rows[i])).collect();
            let test_labels: Vec<bool> = test_idx.iter().map(|&i| labels[i]).collect();
            roc_auc(&scores, &test_labels)
        };

        #[cfg(feature = "parallel")]
        let fold_auc: Vec<f64> = (0..k).into_par_iter().map(run_fold).collect::<ScoutResult<_>>()?;

        #[cfg(not(feature = "parallel"))]
        let fold_auc: Vec<f64> = (0..k).map(run_fold).collect::<ScoutResult<_>>()?;

        for (fold, auc) in fold_auc.iter().enumerate() {
            log::info!(
                "Fold {}: AUC {:.4} ({} positive, {} negative)",
                fold + 1,
                auc,
                fold_counts[fold].positives,
                fold_counts[fold].negatives
            );
        }
        let (mean_auc, std_auc) = mean_std(&fold_auc);
        log::info!("Cross-validation AUC {:.4} ± {:.4}", mean_auc, std_auc);

        log::debug!("Refitting on the full table");
        let (ensemble, gains) = BoostedEnsemble::fit(&rows, &targets, &self.boosting, self.boosting.seed)?;
        let total: f64 = gains.iter().sum();
        let mut feature_importance: Vec<FeatureImportance> = schema
            .names()
            .iter()
            .zip(&gains)
            .map(|(name, gain)| FeatureImportance {
                feature: name.clone(),
                importance: if total > 0.0 { gain / total } else { 0.0 },
            })
            .collect();
        feature_importance.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.feature.cmp(&b.feature))
        });

        Ok(TrainedModel {
            schema,
            ensemble,
            params: self.boosting.clone(),
            metrics: ValidationMetrics {
                fold_auc,
                mean_auc,
                std_auc,
                fold_counts,
                feature_importance,
            },
            trained_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64, ((i * 7) % 11) as f64])
            .collect();
        let targets = (0..n).map(|i| if i >= n / 2 { 1.0 } else { 0.0 }).collect();
        (rows, targets)
    }

    #[test]
    fn test_fit_learns_threshold() {
        let (rows, targets) = separable(100);
        let params = BoostingParams {
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..Default::default()
        };
        let (model, gains) = BoostedEnsemble::fit(&rows, &targets, &params, 1).unwrap();
        assert!(model.predict_proba(&[90.0, 3.0]) > 0.8);
        assert!(model.predict_proba(&[10.0, 3.0]) < 0.2);
        assert!(gains[0] > gains[1]);
    }

    #[test]
    fn test_fit_is_deterministic_per_seed() {
        let (rows, targets) = separable(60);
        let params = BoostingParams::default();
        let (a, _) = BoostedEnsemble::fit(&rows, &targets, &params, 9).unwrap();
        let (b, _) = BoostedEnsemble::fit(&rows, &targets, &params, 9).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(0.05, 0.1), 0.0);
        assert!((soft_threshold(0.5, 0.1) - 0.4).abs() < 1e-12);
        assert!((soft_threshold(-0.5, 0.1) + 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_tree_validation_rejects_back_edges() {
        let tree = RegressionTree {
            nodes: vec![TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 0,
            }],
        };
        assert!(tree.validate(1).is_err());
    }

    #[test]
    fn test_invalid_params() {
        let params = BoostingParams {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
