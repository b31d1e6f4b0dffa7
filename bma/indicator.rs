//! Feature indicators and their canonical ordering.
//!
//! The search space of `p` features holds the `2^p - 1` non-null indicators.
//! Model index `m` corresponds to the binary expansion of `m + 1` with feature
//! `i` stored at bit `i` (least significant feature first), so the first
//! models are `[1, 0, 0]`, `[0, 1, 0]`, `[1, 1, 0]`, `[0, 0, 1]`, ... This
//! order is part of the persisted format: a serialized fitted state is indexed
//! by it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Largest feature count whose search space can be indexed by `usize`.
pub const MAX_FEATURES: usize = usize::BITS as usize - 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("Indicator entries must be 0 or 1, found {value} at position {position}.")]
    InvalidEntry { position: usize, value: u8 },

    #[error("Exhaustive search over {found} features is not addressable; at most {max} are supported.")]
    TooManyFeatures { found: usize, max: usize },

    #[error("Model index {index} is out of range for a search space of {n_models} models.")]
    IndexOutOfRange { index: usize, n_models: usize },

    #[error("Indicator has length {found}, but the model was fitted on {expected} features.")]
    LengthMismatch { expected: usize, found: usize },
}

/// Binary vector selecting the active features of one candidate model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct FeatureIndicator(Vec<u8>);

impl FeatureIndicator {
    pub fn from_bits(bits: Vec<u8>) -> Result<Self, IndicatorError> {
        if let Some(position) = bits.iter().position(|&b| b > 1) {
            return Err(IndicatorError::InvalidEntry {
                position,
                value: bits[position],
            });
        }
        Ok(Self(bits))
    }

    pub fn from_mask(mask: &[bool]) -> Self {
        Self(mask.iter().map(|&active| u8::from(active)).collect())
    }

    pub fn zeros(n_features: usize) -> Self {
        Self(vec![0; n_features])
    }

    pub fn ones(n_features: usize) -> Self {
        Self(vec![1; n_features])
    }

    /// Number of models in the search space, excluding the null model.
    pub fn n_models(n_features: usize) -> Result<usize, IndicatorError> {
        check_feature_count(n_features)?;
        Ok((1usize << n_features) - 1)
    }

    /// All indicators of length `n_features` in canonical order.
    ///
    /// With `exclude_null` the all-zero indicator is omitted and the result has
    /// `2^n_features - 1` entries; position `m` then holds model index `m`.
    pub fn enumerate(n_features: usize, exclude_null: bool) -> Result<Vec<Self>, IndicatorError> {
        check_feature_count(n_features)?;
        let start = usize::from(exclude_null);
        let end = 1usize << n_features;
        Ok((start..end)
            .map(|code| Self::from_code(code, n_features))
            .collect())
    }

    /// Inverse of [`FeatureIndicator::model_index`].
    pub fn from_model_index(index: usize, n_features: usize) -> Result<Self, IndicatorError> {
        let n_models = Self::n_models(n_features)?;
        if index >= n_models {
            return Err(IndicatorError::IndexOutOfRange { index, n_models });
        }
        Ok(Self::from_code(index + 1, n_features))
    }

    /// Position of this indicator in the canonical non-null enumeration, or
    /// `None` for the null model.
    pub fn model_index(&self) -> Option<usize> {
        self.code().checked_sub(1)
    }

    /// Like [`FeatureIndicator::model_index`], but checks the indicator length
    /// against the fitted feature count first.
    pub fn model_index_for(&self, n_features: usize) -> Result<Option<usize>, IndicatorError> {
        if self.0.len() != n_features {
            return Err(IndicatorError::LengthMismatch {
                expected: n_features,
                found: self.0.len(),
            });
        }
        Ok(self.model_index())
    }

    pub fn n_features(&self) -> usize {
        self.0.len()
    }

    pub fn n_active(&self) -> usize {
        self.0.iter().filter(|&&b| b == 1).count()
    }

    pub fn is_active(&self, feature: usize) -> bool {
        self.0.get(feature) == Some(&1)
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn bits(&self) -> &[u8] {
        &self.0
    }

    /// Column indices of the active features, ascending.
    pub fn active_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| (b == 1).then_some(i))
            .collect()
    }

    fn from_code(code: usize, n_features: usize) -> Self {
        Self((0..n_features).map(|bit| ((code >> bit) & 1) as u8).collect())
    }

    fn code(&self) -> usize {
        self.0
            .iter()
            .enumerate()
            .fold(0usize, |acc, (bit, &b)| acc | (usize::from(b) << bit))
    }
}

fn check_feature_count(n_features: usize) -> Result<(), IndicatorError> {
    if n_features > MAX_FEATURES {
        return Err(IndicatorError::TooManyFeatures {
            found: n_features,
            max: MAX_FEATURES,
        });
    }
    Ok(())
}

impl TryFrom<Vec<u8>> for FeatureIndicator {
    type Error = IndicatorError;

    fn try_from(bits: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bits(bits)
    }
}

impl From<FeatureIndicator> for Vec<u8> {
    fn from(indicator: FeatureIndicator) -> Self {
        indicator.0
    }
}

impl fmt::Display for FeatureIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, bit) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{bit}")?;
        }
        f.write_str("]")
    }
}
