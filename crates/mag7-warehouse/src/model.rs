//! Gradient-boosted tree inference over XGBoost's JSON model format.
//!
//! Only the `gbtree` booster with a single output group is supported; that is
//! what `XGBClassifier(objective="binary:logistic").save_model("*.json")` writes.

use crate::pipeline::MergedRow;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Feature order used when a model file carries no `feature_names`.
pub static DEFAULT_FEATURES: [&str; 3] = ["close", "p_e_ratio", "sma_50"];

/// Scores above this are a [`Signal::Buy`].
pub const THRESHOLD: f64 = 0.5;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Malformed model: {0}")]
    Malformed(String),

    #[error("Unsupported model: {0}")]
    Unsupported(String),

    #[error("Malformed feature set: {0}")]
    FeatureSet(String),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Malformed(err.to_string())
    }
}

/// How the summed margin is turned into a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// `binary:logistic`, `reg:logistic`: sigmoid of the margin.
    Logistic,
    /// `binary:logitraw`: the raw margin, with a logit base score.
    LogitRaw,
    /// `reg:*`: the raw margin.
    Identity,
}

impl Objective {
    fn parse(name: &str) -> Result<Self, ModelError> {
        match name {
            "binary:logistic" | "reg:logistic" => Ok(Self::Logistic),
            "binary:logitraw" => Ok(Self::LogitRaw),
            "reg:squarederror" | "reg:linear" | "reg:absoluteerror" | "reg:pseudohubererror" => {
                Ok(Self::Identity)
            }
            other => Err(ModelError::Unsupported(format!("objective \"{other}\""))),
        }
    }

    /// Base score (stored in output space) -> margin space.
    fn base_margin(self, base_score: f64) -> f64 {
        match self {
            Self::Logistic | Self::LogitRaw => {
                let p = base_score.clamp(1e-16, 1.0 - 1e-16);
                (p / (1.0 - p)).ln()
            }
            Self::Identity => base_score,
        }
    }

    fn transform(self, margin: f64) -> f64 {
        match self {
            Self::Logistic => 1.0 / (1.0 + (-margin).exp()),
            Self::LogitRaw | Self::Identity => margin,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<usize>,
    split_conditions: Vec<f32>,
    default_left: Vec<bool>,
}

impl Tree {
    fn from_raw(id: usize, raw: RawTree) -> Result<Self, ModelError> {
        let n = raw.left_children.len();
        if n == 0 {
            return Err(ModelError::Malformed(format!("tree {id} has no nodes")));
        }
        if [
            raw.right_children.len(),
            raw.split_indices.len(),
            raw.split_conditions.len(),
            raw.default_left.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err(ModelError::Malformed(format!(
                "tree {id} has node arrays of differing lengths"
            )));
        }

        // children always come after their parent, which also rules out cycles
        for node in 0..n {
            let (left, right) = (raw.left_children[node], raw.right_children[node]);
            if left < 0 {
                continue;
            }
            let valid = |child: i32| child > node as i32 && (child as usize) < n;
            if !(valid(left) && valid(right)) {
                return Err(ModelError::Malformed(format!(
                    "tree {id} node {node} has out-of-order children ({left}, {right})"
                )));
            }
        }

        Ok(Tree {
            left_children: raw.left_children,
            right_children: raw.right_children,
            split_indices: raw.split_indices,
            split_conditions: raw.split_conditions,
            default_left: raw.default_left,
        })
    }

    /// Largest feature index any split reads, if the tree splits at all.
    fn max_feature(&self) -> Option<usize> {
        (0..self.left_children.len())
            .filter(|&node| self.left_children[node] >= 0)
            .map(|node| self.split_indices[node])
            .max()
    }

    /// Walk from the root to a leaf and return the leaf value.
    ///
    /// A NaN feature is missing and follows the node's default direction.
    pub fn leaf(&self, features: &[f64]) -> f64 {
        let mut node = 0;
        loop {
            let left = self.left_children[node];
            if left < 0 {
                return self.split_conditions[node] as f64;
            }
            let value = features[self.split_indices[node]];
            let go_left = if value.is_nan() {
                self.default_left[node]
            } else {
                (value as f32) < self.split_conditions[node]
            };
            node = if go_left {
                left as usize
            } else {
                self.right_children[node] as usize
            };
        }
    }
}

#[derive(Debug, Clone)]
pub struct Booster {
    trees: Vec<Tree>,
    objective: Objective,
    base_margin: f64,
    feature_names: Vec<String>,
    num_features: usize,
}

impl Booster {
    /// Load an XGBoost `.json` model from `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let raw: Value = mag7_util::read_json(path).await.map_err(|e| ModelError::Load {
            path: path.display().to_string(),
            reason: format!("{e:#}"),
        })?;
        let booster = Self::from_value(raw)?;
        info!(
            "loaded {} trees from {} (features: {:?})",
            booster.trees.len(),
            path.display(),
            booster.feature_names
        );
        Ok(booster)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    fn from_value(value: Value) -> Result<Self, ModelError> {
        let file: ModelFile = serde_json::from_value(value)?;
        let learner = file.learner;

        let booster = &learner.gradient_booster;
        if booster.name != "gbtree" {
            return Err(ModelError::Unsupported(format!("booster \"{}\"", booster.name)));
        }
        let model = booster
            .model
            .as_ref()
            .ok_or_else(|| ModelError::Malformed("gbtree booster without a model".into()))?;

        let num_class = match &learner.learner_model_param.num_class {
            Some(n) => parse_number(n)? as i64,
            None => 0,
        };
        if num_class > 1 || model.tree_info.iter().any(|&group| group != 0) {
            return Err(ModelError::Unsupported(format!(
                "multi-class model ({num_class} classes)"
            )));
        }

        let objective = Objective::parse(&learner.objective.name)?;
        let base_score = parse_number(&learner.learner_model_param.base_score)?;

        let trees = model
            .trees
            .iter()
            .cloned()
            .enumerate()
            .map(|(id, raw)| Tree::from_raw(id, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let feature_names = if learner.feature_names.is_empty() {
            DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect()
        } else {
            learner.feature_names.clone()
        };

        for name in &feature_names {
            feature_column(name)?;
        }

        let used = trees.iter().filter_map(Tree::max_feature).max().map_or(0, |i| i + 1);
        if used > feature_names.len() {
            return Err(ModelError::FeatureSet(format!(
                "trees split on {used} features but the model names {}",
                feature_names.len()
            )));
        }

        debug!("objective: {objective:?}, base score: {base_score}");
        Ok(Booster {
            trees,
            objective,
            base_margin: objective.base_margin(base_score),
            num_features: feature_names.len(),
            feature_names,
        })
    }

    /// Names of the features the model expects, in column order.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Score one feature vector, ordered as [`Booster::feature_names`].
    pub fn predict_row(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.num_features {
            return Err(ModelError::FeatureSet(format!(
                "expected {} features, received {}",
                self.num_features,
                features.len()
            )));
        }
        let margin = self.base_margin
            + self
                .trees
                .iter()
                .map(|tree| tree.leaf(features))
                .sum::<f64>();
        Ok(self.objective.transform(margin))
    }

    /// Score a merged row and label it.
    pub fn score(&self, row: &MergedRow) -> Result<Prediction, ModelError> {
        let features = feature_vector(row, &self.feature_names)?;
        let score = self.predict_row(&features)?;
        debug!("[{}] {} features {features:?} scored {score}", row.ticker, row.date);
        Ok(Prediction {
            score,
            signal: Signal::from_score(score),
        })
    }
}

/// The `MergedRow` column a model feature name reads from.
fn feature_column(name: &str) -> Result<fn(&MergedRow) -> Option<f64>, ModelError> {
    let column: fn(&MergedRow) -> Option<f64> = match name {
        "close" => |row| row.close,
        "p_e_ratio" => |row| row.p_e_ratio,
        "sma_50" => |row| row.sma_50,
        "market_capitalization" => |row| row.market_capitalization,
        "revenue" => |row| row.revenue,
        "net_income" => |row| row.net_income,
        "total_liabilities" | "totalLiabilities" => |row| row.total_liabilities,
        "total_equity" | "totalEquity" => |row| row.total_equity,
        "share_capital" => |row| row.share_capital,
        "shares_outstanding" => |row| row.shares_outstanding,
        other => {
            return Err(ModelError::FeatureSet(format!(
                "unknown feature \"{other}\""
            )))
        }
    };
    Ok(column)
}

/// Pull the named features out of `row`; missing values become NaN.
pub fn feature_vector(row: &MergedRow, names: &[String]) -> Result<Vec<f64>, ModelError> {
    names
        .iter()
        .map(|name| Ok(feature_column(name)?(row).unwrap_or(f64::NAN)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub score: f64,
    pub signal: Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
}

impl Signal {
    pub fn from_score(score: f64) -> Self {
        if score > THRESHOLD {
            Signal::Buy
        } else {
            Signal::Sell
        }
    }

    /// The price-movement reading of the same label.
    pub fn movement(&self) -> &'static str {
        match self {
            Signal::Buy => "Up",
            Signal::Sell => "Down",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy => write!(f, "Buy"),
            Signal::Sell => write!(f, "Sell"),
        }
    }
}

/// XGBoost writes numbers as strings, e.g. `"5E-1"`, and since 2.1 vectors as `"[5E-1]"`.
fn parse_number(s: &str) -> Result<f64, ModelError> {
    let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
    let first = trimmed.split(',').next().unwrap_or_default().trim();
    first
        .parse::<f64>()
        .map_err(|e| ModelError::Malformed(format!("bad number \"{s}\": {e}")))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Deserialization
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// {
//      "learner": {
//          "feature_names": ["close", "p_e_ratio", "sma_50"],
//          "gradient_booster": {
//              "name": "gbtree",
//              "model": {
//                  "trees": [{ "left_children": [...], "split_conditions": [...], ... }],
//                  "tree_info": [0, 0, ...]
//              }
//          },
//          "learner_model_param": { "base_score": "5E-1", "num_class": "0", ... },
//          "objective": { "name": "binary:logistic", ... }
//      },
//      "version": [2, 0, 3]
// }
#[derive(Deserialize, Debug)]
struct ModelFile {
    learner: Learner,
}

#[derive(Deserialize, Debug)]
struct Learner {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: GradientBooster,
    learner_model_param: LearnerModelParam,
    objective: ObjectiveParam,
}

#[derive(Deserialize, Debug)]
struct GradientBooster {
    name: String,
    model: Option<GbTreeModel>,
}

#[derive(Deserialize, Debug)]
struct GbTreeModel {
    trees: Vec<RawTree>,
    #[serde(default)]
    tree_info: Vec<i32>,
}

#[derive(Deserialize, Debug)]
struct LearnerModelParam {
    base_score: String,
    num_class: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ObjectiveParam {
    name: String,
}

#[derive(Deserialize, Debug, Clone)]
struct RawTree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<usize>,
    split_conditions: Vec<f32>,
    #[serde(deserialize_with = "de_flags")]
    default_left: Vec<bool>,
}

/// `default_left` is `[0, 1, ...]` in older files and `[false, true, ...]` in newer ones.
fn de_flags<'de, D>(deserializer: D) -> Result<Vec<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<Value> = Deserialize::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|value| match value {
            Value::Bool(b) => Ok(b),
            Value::Number(num) => Ok(num.as_i64() != Some(0)),
            other => Err(de::Error::custom(format!("invalid default_left flag: {other}"))),
        })
        .collect()
}
