//! # Pretrained Predictor
//!
//! The scoring models are gradient-boosted tree ensembles stored in LightGBM's
//! plain-text model dump (the output of `Booster.save_model`). This module reads
//! that dump into a [`GbdtModel`] and evaluates it. Training is out of scope; the
//! reader only understands what prediction needs.
//!
//! The rest of the crate talks to the model through the [`Predictor`] trait, a
//! callable over a samples × features matrix.

use ahash::{AHashMap, AHashSet};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// How the output columns of a predictor are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// One real-valued score per sample.
    Score,
    /// Positive-class probability of a two-class classifier.
    BinaryProbability,
    /// One probability per class.
    ClassProbabilities,
}

/// A trained model that maps a feature matrix to per-sample outputs.
pub trait Predictor: Send + Sync {
    /// Width of the feature matrix `predict` expects.
    fn num_features(&self) -> usize;
    /// Feature names in training order, when the artifact records them.
    fn feature_names(&self) -> Option<&[String]>;
    /// Number of output columns (1, or the number of classes).
    fn num_outputs(&self) -> usize;
    fn output_kind(&self) -> OutputKind;
    /// Returns a `[n_samples, num_outputs]` matrix. NaN marks a missing value.
    fn predict(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ModelError>;
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("There is no model file at '{0}'. Please check the status, omics type and artifact directory.")]
    NotFound(PathBuf),
    #[error("Failed to read model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The model file is missing the key '{key}' in {section}.")]
    MissingKey { section: String, key: &'static str },
    #[error("The model file has an invalid value for '{key}' in {section}: '{value}'.")]
    InvalidValue {
        section: String,
        key: &'static str,
        value: String,
    },
    #[error("Unsupported model objective '{0}'.")]
    UnsupportedObjective(String),
    #[error("Tree {tree} node {node} uses a categorical split, which is not supported for omics features.")]
    UnsupportedCategoricalSplit { tree: usize, node: usize },
    #[error("Tree {tree} is malformed: {reason}")]
    MalformedTree { tree: usize, reason: String },
    #[error("The model file contains no trees.")]
    NoTrees,
    #[error("The model has {trees} trees, which is not a multiple of {per_iteration} trees per iteration.")]
    TreeCountMismatch { trees: usize, per_iteration: usize },
    #[error("Prediction data has {found} feature columns, but the model was trained on {expected}.")]
    FeatureCountMismatch { found: usize, expected: usize },
    #[error("Internal error assembling the prediction matrix: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

// --- Decision-type bit layout of the LightGBM dump ---
const CATEGORICAL_MASK: u8 = 1;
const DEFAULT_LEFT_MASK: u8 = 2;
/// Values with magnitude at or below this are treated as zero by the `Zero` missing type.
const ZERO_THRESHOLD: f64 = 1e-35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision(decision: u8) -> Self {
        match (decision >> 2) & 3 {
            1 => Self::Zero,
            2 => Self::NaN,
            _ => Self::None,
        }
    }
}

/// Maps the raw ensemble sum to the model's output scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Objective {
    Identity,
    /// Regression trained on the square root of the label.
    SignedSquare,
    /// Binary classification.
    Sigmoid { scale: f64 },
    /// Cross-entropy regression on labels in `[0, 1]`.
    Logistic,
    Softmax,
    OneVsRestSigmoid { scale: f64 },
    Exponential,
}

impl Objective {
    fn parse(text: &str) -> Result<Self, ModelError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let (name, options) = match tokens.split_first() {
            Some((name, options)) => (*name, options),
            None => ("", &[][..]),
        };
        let params: AHashMap<&str, &str> =
            options.iter().filter_map(|t| t.split_once(':')).collect();
        let sqrt = options.contains(&"sqrt");
        let scale = match params.get("sigmoid") {
            Some(raw) => raw.parse::<f64>().map_err(|_| ModelError::InvalidValue {
                section: "header".to_string(),
                key: "objective",
                value: text.to_string(),
            })?,
            None => 1.0,
        };

        match name {
            "regression" | "regression_l1" | "huber" | "fair" | "quantile" | "mape" => {
                Ok(if sqrt { Self::SignedSquare } else { Self::Identity })
            }
            "lambdarank" | "rank_xendcg" => Ok(Self::Identity),
            "binary" => Ok(Self::Sigmoid { scale }),
            "cross_entropy" | "xentropy" => Ok(Self::Logistic),
            "multiclass" | "softmax" => Ok(Self::Softmax),
            "multiclassova" | "multiclass_ova" | "ova" | "ovr" => {
                Ok(Self::OneVsRestSigmoid { scale })
            }
            "poisson" | "gamma" | "tweedie" => Ok(Self::Exponential),
            _ => Err(ModelError::UnsupportedObjective(text.to_string())),
        }
    }

    pub fn output_kind(self) -> OutputKind {
        match self {
            Self::Sigmoid { .. } => OutputKind::BinaryProbability,
            Self::Softmax | Self::OneVsRestSigmoid { .. } => OutputKind::ClassProbabilities,
            Self::Identity | Self::SignedSquare | Self::Logistic | Self::Exponential => {
                OutputKind::Score
            }
        }
    }

    fn transform(self, raw: &mut [f64]) {
        match self {
            Self::Identity => {}
            Self::SignedSquare => {
                for v in raw.iter_mut() {
                    *v = v.signum() * *v * *v;
                }
            }
            Self::Logistic => {
                for v in raw.iter_mut() {
                    *v = 1.0 / (1.0 + (-*v).exp());
                }
            }
            Self::Sigmoid { scale } | Self::OneVsRestSigmoid { scale } => {
                for v in raw.iter_mut() {
                    *v = 1.0 / (1.0 + (-scale * *v).exp());
                }
            }
            Self::Softmax => {
                let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mut total = 0.0;
                for v in raw.iter_mut() {
                    *v = (*v - max).exp();
                    total += *v;
                }
                for v in raw.iter_mut() {
                    *v /= total;
                }
            }
            Self::Exponential => {
                for v in raw.iter_mut() {
                    *v = v.exp();
                }
            }
        }
    }
}

/// One regression tree in LightGBM's array layout. A negative child `c` refers
/// to leaf `!c`; a non-negative child is another internal node.
#[derive(Debug, Clone)]
struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision_type: Vec<u8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
}

impl Tree {
    fn evaluate(&self, row: ArrayView1<f64>) -> f64 {
        if self.split_feature.is_empty() {
            return self.leaf_value[0];
        }
        let mut node = 0usize;
        loop {
            let next = if self.goes_left(node, row[self.split_feature[node]]) {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
            if next < 0 {
                return self.leaf_value[!next as usize];
            }
            node = next as usize;
        }
    }

    fn goes_left(&self, node: usize, value: f64) -> bool {
        let decision = self.decision_type[node];
        let missing = MissingType::from_decision(decision);
        let value = if value.is_nan() && missing != MissingType::NaN {
            0.0
        } else {
            value
        };
        let is_zero = value >= -ZERO_THRESHOLD && value <= ZERO_THRESHOLD;
        if (missing == MissingType::Zero && is_zero) || (missing == MissingType::NaN && value.is_nan())
        {
            return decision & DEFAULT_LEFT_MASK != 0;
        }
        value <= self.threshold[node]
    }

    fn validate(&self, index: usize, num_features: usize) -> Result<(), ModelError> {
        let malformed = |reason: String| ModelError::MalformedTree {
            tree: index,
            reason,
        };
        let leaves = self.leaf_value.len();
        if leaves == 0 {
            return Err(malformed("no leaf values".to_string()));
        }
        let internal = leaves - 1;
        for (key, len) in [
            ("split_feature", self.split_feature.len()),
            ("threshold", self.threshold.len()),
            ("decision_type", self.decision_type.len()),
            ("left_child", self.left_child.len()),
            ("right_child", self.right_child.len()),
        ] {
            if len != internal {
                return Err(malformed(format!(
                    "{key} has {len} entries for {leaves} leaves"
                )));
            }
        }

        for node in 0..internal {
            if self.decision_type[node] & CATEGORICAL_MASK != 0 {
                return Err(ModelError::UnsupportedCategoricalSplit { tree: index, node });
            }
            if self.split_feature[node] >= num_features {
                return Err(malformed(format!(
                    "node {node} splits on feature {} of {num_features}",
                    self.split_feature[node]
                )));
            }
            for child in [self.left_child[node], self.right_child[node]] {
                let in_range = if child < 0 {
                    (!child as usize) < leaves
                } else {
                    // Nodes are numbered in split order, so a child always follows its parent.
                    (child as usize) < internal && child as usize > node
                };
                if !in_range {
                    return Err(malformed(format!("node {node} has invalid child {child}")));
                }
            }
        }
        Ok(())
    }
}

/// A boosted tree ensemble read from a LightGBM text dump.
#[derive(Debug, Clone)]
pub struct GbdtModel {
    objective: Objective,
    num_tree_per_iteration: usize,
    num_features: usize,
    feature_names: Option<Vec<String>>,
    average_output: bool,
    trees: Vec<Tree>,
}

/// `key=value` lines of one section of the dump, plus bare flag lines.
#[derive(Default)]
struct Section<'a> {
    name: String,
    values: AHashMap<&'a str, &'a str>,
    flags: AHashSet<&'a str>,
}

impl<'a> Section<'a> {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn get(&self, key: &'static str) -> Option<&'a str> {
        self.values.get(key).copied()
    }

    fn require(&self, key: &'static str) -> Result<&'a str, ModelError> {
        self.get(key).ok_or_else(|| ModelError::MissingKey {
            section: self.name.clone(),
            key,
        })
    }

    fn parse<T: FromStr>(&self, key: &'static str, raw: &str) -> Result<T, ModelError> {
        raw.trim().parse::<T>().map_err(|_| ModelError::InvalidValue {
            section: self.name.clone(),
            key,
            value: raw.to_string(),
        })
    }

    fn scalar<T: FromStr>(&self, key: &'static str) -> Result<T, ModelError> {
        self.parse(key, self.require(key)?)
    }

    /// Space-separated list; an absent key reads as an empty list.
    fn list<T: FromStr>(&self, key: &'static str) -> Result<Vec<T>, ModelError> {
        self.get(key)
            .unwrap_or_default()
            .split_whitespace()
            .map(|raw| self.parse(key, raw))
            .collect()
    }
}

fn split_sections(text: &str) -> (Section<'_>, Vec<Section<'_>>) {
    let mut header = Section::named("header".to_string());
    let mut trees: Vec<Section<'_>> = Vec::new();

    for line in text.lines().map(str::trim) {
        if line == "end of trees" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        if let Some(index) = line.strip_prefix("Tree=") {
            trees.push(Section::named(format!("tree {index}")));
            continue;
        }
        let section = trees.last_mut().unwrap_or(&mut header);
        match line.split_once('=') {
            Some((key, value)) => {
                section.values.insert(key.trim(), value);
            }
            None => {
                section.flags.insert(line);
            }
        }
    }
    (header, trees)
}

impl GbdtModel {
    /// Reads a LightGBM text model from disk.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.is_file() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let model = Self::from_text(&text)?;
        log::info!(
            "Loaded model '{}': {} trees, {} features, {} output(s)",
            path.display(),
            model.trees.len(),
            model.num_features,
            model.num_outputs()
        );
        Ok(model)
    }

    pub fn from_text(text: &str) -> Result<Self, ModelError> {
        let (header, tree_sections) = split_sections(text);

        let num_class: usize = match header.get("num_class") {
            Some(raw) => header.parse("num_class", raw)?,
            None => 1,
        };
        let num_tree_per_iteration: usize = match header.get("num_tree_per_iteration") {
            Some(raw) => header.parse("num_tree_per_iteration", raw)?,
            None => num_class,
        };
        if num_tree_per_iteration == 0 {
            return Err(ModelError::InvalidValue {
                section: header.name.clone(),
                key: "num_tree_per_iteration",
                value: "0".to_string(),
            });
        }
        let max_feature_idx: usize = header.scalar("max_feature_idx")?;
        let num_features = max_feature_idx + 1;
        let objective = Objective::parse(header.require("objective")?)?;

        let feature_names = match header.get("feature_names") {
            Some(raw) => {
                let names: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
                if names.len() != num_features {
                    return Err(ModelError::InvalidValue {
                        section: header.name.clone(),
                        key: "feature_names",
                        value: format!("{} names for {num_features} features", names.len()),
                    });
                }
                Some(names)
            }
            None => None,
        };
        let average_output = header.flags.contains("average_output")
            || header.get("average_output").is_some_and(|v| v.trim() == "1");

        let mut trees = Vec::with_capacity(tree_sections.len());
        for (index, section) in tree_sections.iter().enumerate() {
            let num_leaves: usize = section.scalar("num_leaves")?;
            let tree = Tree {
                split_feature: section.list("split_feature")?,
                threshold: section.list("threshold")?,
                decision_type: section.list("decision_type")?,
                left_child: section.list("left_child")?,
                right_child: section.list("right_child")?,
                leaf_value: section.list("leaf_value")?,
            };
            if tree.leaf_value.len() != num_leaves {
                return Err(ModelError::MalformedTree {
                    tree: index,
                    reason: format!(
                        "num_leaves={num_leaves} but {} leaf values",
                        tree.leaf_value.len()
                    ),
                });
            }
            tree.validate(index, num_features)?;
            trees.push(tree);
        }

        if trees.is_empty() {
            return Err(ModelError::NoTrees);
        }
        if trees.len() % num_tree_per_iteration != 0 {
            return Err(ModelError::TreeCountMismatch {
                trees: trees.len(),
                per_iteration: num_tree_per_iteration,
            });
        }

        Ok(Self {
            objective,
            num_tree_per_iteration,
            num_features,
            feature_names,
            average_output,
            trees,
        })
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    fn raw_scores(&self, row: ArrayView1<f64>) -> Vec<f64> {
        let mut raw = vec![0.0; self.num_tree_per_iteration];
        for (index, tree) in self.trees.iter().enumerate() {
            raw[index % self.num_tree_per_iteration] += tree.evaluate(row);
        }
        if self.average_output {
            let iterations = (self.trees.len() / self.num_tree_per_iteration) as f64;
            for v in &mut raw {
                *v /= iterations;
            }
        }
        raw
    }
}

impl Predictor for GbdtModel {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    fn num_outputs(&self) -> usize {
        self.num_tree_per_iteration
    }

    fn output_kind(&self) -> OutputKind {
        self.objective.output_kind()
    }

    fn predict(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        if features.ncols() != self.num_features {
            return Err(ModelError::FeatureCountMismatch {
                found: features.ncols(),
                expected: self.num_features,
            });
        }

        let outputs: Vec<f64> = (0..features.nrows())
            .into_par_iter()
            .flat_map_iter(|i| {
                let mut raw = self.raw_scores(features.row(i));
                self.objective.transform(&mut raw);
                raw
            })
            .collect();

        Ok(Array2::from_shape_vec(
            (features.nrows(), self.num_tree_per_iteration),
            outputs,
        )?)
    }
}
