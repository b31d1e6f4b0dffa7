//! Hyperparameter grids and model priors.
//!
//! A [`PriorGrid`] is an ordered list of `(position, weight)` pairs where the
//! weight is the prior density of the hyperparameter sampled at that position.
//! The grid is integrated with Simpson's rule downstream, so weights are
//! densities rather than point masses.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{gamma_lr, ln_gamma};
use thiserror::Error;

/// Relative slack (as a fraction of the support width) used to decide
/// whether a grid position lies inside a truncated support. Log-spaced grids
/// land on their end points only up to rounding.
const SUPPORT_RELATIVE_SLACK: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriorError {
    #[error("A prior grid needs at least one point.")]
    EmptyGrid,

    #[error("Grid position {position} at index {index} must be finite and positive.")]
    InvalidPosition { index: usize, position: f64 },

    #[error("Grid positions must be strictly increasing, but index {index} does not exceed its predecessor.")]
    NonIncreasingPositions { index: usize },

    #[error("Prior weight {weight} at index {index} must be finite and non-negative.")]
    InvalidWeight { index: usize, weight: f64 },

    #[error("Prior support [{low}, {high}] is invalid: bounds must be finite with 0 <= low < high.")]
    InvalidSupport { low: f64, high: f64 },

    #[error("Gamma shape ({shape}) and scale ({scale}) must be finite and positive.")]
    InvalidGammaParameters { shape: f64, scale: f64 },

    #[error("The truncated gamma density has no mass on [{low}, {high}].")]
    EmptySupportMass { low: f64, high: f64 },

    #[error("Fixed inclusion probability must lie strictly between 0 and 1, got {0}.")]
    InvalidFixedAlpha(f64),

    #[error("Beta hyperprior parameters must be finite and positive (alpha = {alpha}, beta = {beta}).")]
    InvalidBetaParameters { alpha: f64, beta: f64 },
}

/// One grid point of a hyperparameter prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterPoint {
    pub position: f64,
    pub weight: f64,
}

/// An ordered, validated sequence of hyperparameter grid points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<HyperparameterPoint>", into = "Vec<HyperparameterPoint>")]
pub struct PriorGrid {
    points: Vec<HyperparameterPoint>,
}

impl PriorGrid {
    pub fn new(points: Vec<HyperparameterPoint>) -> Result<Self, PriorError> {
        if points.is_empty() {
            return Err(PriorError::EmptyGrid);
        }
        for (index, point) in points.iter().enumerate() {
            if !point.position.is_finite() || point.position <= 0.0 {
                return Err(PriorError::InvalidPosition {
                    index,
                    position: point.position,
                });
            }
            if !point.weight.is_finite() || point.weight < 0.0 {
                return Err(PriorError::InvalidWeight {
                    index,
                    weight: point.weight,
                });
            }
            if index > 0 && point.position <= points[index - 1].position {
                return Err(PriorError::NonIncreasingPositions { index });
            }
        }
        Ok(Self { points })
    }

    /// Pairs positions with weights element-wise.
    pub fn from_parts(
        positions: ArrayView1<f64>,
        weights: ArrayView1<f64>,
    ) -> Result<Self, PriorError> {
        let points = positions
            .iter()
            .zip(weights.iter())
            .map(|(&position, &weight)| HyperparameterPoint { position, weight })
            .collect();
        Self::new(points)
    }

    /// A degenerate prior that pins the hyperparameter to one value.
    pub fn single(position: f64) -> Result<Self, PriorError> {
        Self::new(vec![HyperparameterPoint {
            position,
            weight: 1.0,
        }])
    }

    /// Gamma density `x^(shape-1) exp(-x/scale)` truncated to `[low, high]`,
    /// normalized over that support and sampled at `positions`.
    ///
    /// Positions outside the support receive weight zero.
    pub fn gamma(
        positions: ArrayView1<f64>,
        low: f64,
        high: f64,
        shape: f64,
        scale: f64,
    ) -> Result<Self, PriorError> {
        validate_support(low, high)?;
        if !(shape.is_finite() && shape > 0.0 && scale.is_finite() && scale > 0.0) {
            return Err(PriorError::InvalidGammaParameters { shape, scale });
        }

        // Integral of the unnormalized density over [low, high]:
        // scale^shape * Gamma(shape) * (P(shape, high/scale) - P(shape, low/scale)).
        let upper = gamma_lr(shape, high / scale);
        let lower = if low == 0.0 {
            0.0
        } else {
            gamma_lr(shape, low / scale)
        };
        let mass = upper - lower;
        if !(mass > 0.0) {
            return Err(PriorError::EmptySupportMass { low, high });
        }
        let log_normalizer = shape * scale.ln() + ln_gamma(shape) + mass.ln();

        let weights = positions.mapv(|x| {
            if x > 0.0 && in_support(x, low, high) {
                ((shape - 1.0) * x.ln() - x / scale - log_normalizer).exp()
            } else {
                0.0
            }
        });
        Self::from_parts(positions, weights.view())
    }

    /// Uniform density on `[low, high]` sampled at `positions`.
    pub fn uniform(positions: ArrayView1<f64>, low: f64, high: f64) -> Result<Self, PriorError> {
        validate_support(low, high)?;
        let density = 1.0 / (high - low);
        let weights = positions.mapv(|x| if in_support(x, low, high) { density } else { 0.0 });
        Self::from_parts(positions, weights.view())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[HyperparameterPoint] {
        &self.points
    }

    pub fn positions(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.position).collect()
    }

    pub fn weights(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.weight).collect()
    }

    /// Natural log of every weight; zero weights map to `-inf`.
    pub fn log_weights(&self) -> Array1<f64> {
        self.points.iter().map(|p| p.weight.ln()).collect()
    }
}

impl TryFrom<Vec<HyperparameterPoint>> for PriorGrid {
    type Error = PriorError;

    fn try_from(points: Vec<HyperparameterPoint>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<PriorGrid> for Vec<HyperparameterPoint> {
    fn from(grid: PriorGrid) -> Self {
        grid.points
    }
}

fn validate_support(low: f64, high: f64) -> Result<(), PriorError> {
    if !(low.is_finite() && high.is_finite() && low >= 0.0 && low < high) {
        return Err(PriorError::InvalidSupport { low, high });
    }
    Ok(())
}

fn in_support(x: f64, low: f64, high: f64) -> bool {
    let slack = SUPPORT_RELATIVE_SLACK * (high - low);
    x >= low - slack && x <= high + slack
}

/// Prior over feature-inclusion indicators.
///
/// Each feature is included independently with probability `alpha`. The
/// probability is either fixed, or given a `Beta(alpha, beta)` hyperprior that
/// is integrated out analytically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SparsityPrior {
    Fixed(f64),
    BetaMarginalized { alpha: f64, beta: f64 },
}

impl SparsityPrior {
    pub fn fixed(alpha: f64) -> Result<Self, PriorError> {
        let prior = Self::Fixed(alpha);
        prior.validate()?;
        Ok(prior)
    }

    pub fn beta(alpha: f64, beta: f64) -> Result<Self, PriorError> {
        let prior = Self::BetaMarginalized { alpha, beta };
        prior.validate()?;
        Ok(prior)
    }

    pub fn validate(&self) -> Result<(), PriorError> {
        match *self {
            Self::Fixed(alpha) => {
                if !(alpha > 0.0 && alpha < 1.0) {
                    return Err(PriorError::InvalidFixedAlpha(alpha));
                }
            }
            Self::BetaMarginalized { alpha, beta } => {
                if !(alpha.is_finite() && alpha > 0.0 && beta.is_finite() && beta > 0.0) {
                    return Err(PriorError::InvalidBetaParameters { alpha, beta });
                }
            }
        }
        Ok(())
    }

    /// Log prior probability of one indicator with `n_in_use` active features
    /// out of `n_features`.
    ///
    /// - Fixed: `n_in_use * ln(alpha) + (n_features - n_in_use) * ln(1 - alpha)`.
    /// - Beta: `lnΓ(n_in_use + alpha) + lnΓ(n_features - n_in_use + beta) - lnΓ(n_features + alpha + beta)`.
    ///   The constant `-ln B(alpha, beta)` is shared by every indicator and is
    ///   left out; it cancels in every posterior quantity.
    pub fn log_model_prior(&self, n_features: usize, n_in_use: usize) -> f64 {
        let n_in_use_f = n_in_use as f64;
        let n_out_f = n_features.saturating_sub(n_in_use) as f64;
        match *self {
            Self::Fixed(alpha) => n_in_use_f * alpha.ln() + n_out_f * (-alpha).ln_1p(),
            Self::BetaMarginalized { alpha, beta } => {
                ln_gamma(n_in_use_f + alpha) + ln_gamma(n_out_f + beta)
                    - ln_gamma(n_features as f64 + alpha + beta)
            }
        }
    }
}
