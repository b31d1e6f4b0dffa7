//! # Conjugate Bayesian Linear Regression
//!
//! Closed-form fit of `y = X w + e` without intercept, under
//!
//! - `w ~ N(0, sigma_coef^2 I)`
//! - `e ~ N(0, sigma_noise^2 I)`
//!
//! for one fixed `(sigma_noise, sigma_coef)` pair. With the posterior precision
//! `A = X'X / sigma_noise^2 + I / sigma_coef^2` the posterior is
//! `w | y ~ N(A^-1 X'y / sigma_noise^2, A^-1)`, and the evidence is
//!
//! ```text
//! log p(y) = -n/2 ln(2 pi) - n ln(sigma_noise) - k ln(sigma_coef) - 1/2 ln|A|
//!            - (y'y - y'X mean) / (2 sigma_noise^2)
//! ```
//!
//! which follows from the matrix determinant lemma and the Woodbury identity
//! applied to `Cov(y) = sigma_noise^2 I + sigma_coef^2 X X'`. Only `X'X`, `X'y`,
//! `y'y` and `n` enter the computation, so the search engine precomputes them
//! once and hands restricted [`SufficientStatistics`] to every grid point.

use crate::types::Coefficients;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{FactorizeC, InverseC, SolveC, UPLO};
use std::f64::consts::PI;
use thiserror::Error;

/// Default absolute tolerance of the centering and scaling checks.
pub const DEFAULT_PREPROCESSING_TOLERANCE: f64 = 1e-8;

/// Input data that does not satisfy the standardization contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    #[error("The target must be centered, but its mean is {mean:.3e} (tolerance {tolerance:.1e}).")]
    TargetNotCentered { mean: f64, tolerance: f64 },

    #[error("Feature column {column} must be centered, but its mean is {mean:.3e} (tolerance {tolerance:.1e}).")]
    FeatureNotCentered {
        column: usize,
        mean: f64,
        tolerance: f64,
    },

    #[error("Feature column {column} must have unit scale, but its variance is {variance:.10} (tolerance {tolerance:.1e}).")]
    FeatureNotScaled {
        column: usize,
        variance: f64,
        tolerance: f64,
    },

    #[error("Non-finite values (NaN or Infinity) were found in the {0}.")]
    NonFiniteValues(&'static str),

    #[error("At least one sample is required to fit a model.")]
    NoSamples,
}

#[derive(Error, Debug)]
pub enum RegressionError {
    #[error(transparent)]
    Preprocessing(#[from] PreprocessingError),

    #[error("The design matrix has {rows} rows, but the target has {len} entries.")]
    ShapeMismatch { rows: usize, len: usize },

    #[error("sigma_noise ({sigma_noise}) and sigma_coef ({sigma_coef}) must be finite and positive.")]
    InvalidSigma { sigma_noise: f64, sigma_coef: f64 },

    #[error("Cholesky factorization of the posterior precision failed: {0}")]
    LinearSystemSolveFailed(#[from] ndarray_linalg::error::LinalgError),
}

/// Checks that the target has mean zero within `tolerance`.
pub fn validate_target_centralization(
    y: ArrayView1<f64>,
    tolerance: f64,
) -> Result<(), PreprocessingError> {
    if y.is_empty() {
        return Err(PreprocessingError::NoSamples);
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(PreprocessingError::NonFiniteValues("target"));
    }
    let mean = y.sum() / y.len() as f64;
    if mean.abs() > tolerance {
        return Err(PreprocessingError::TargetNotCentered { mean, tolerance });
    }
    Ok(())
}

/// Checks that every feature column has mean zero and population variance one
/// within `tolerance`.
pub fn validate_feature_standardization(
    x: ArrayView2<f64>,
    tolerance: f64,
) -> Result<(), PreprocessingError> {
    if x.nrows() == 0 {
        return Err(PreprocessingError::NoSamples);
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(PreprocessingError::NonFiniteValues("feature matrix"));
    }
    let n = x.nrows() as f64;
    for (column, values) in x.axis_iter(Axis(1)).enumerate() {
        let mean = values.sum() / n;
        if mean.abs() > tolerance {
            return Err(PreprocessingError::FeatureNotCentered {
                column,
                mean,
                tolerance,
            });
        }
        let variance = values.dot(&values) / n - mean * mean;
        if (variance - 1.0).abs() > tolerance {
            return Err(PreprocessingError::FeatureNotScaled {
                column,
                variance,
                tolerance,
            });
        }
    }
    Ok(())
}

/// `X'X`, `X'y`, `y'y` and the sample count of one data set.
#[derive(Debug, Clone, PartialEq)]
pub struct SufficientStatistics {
    gram: Array2<f64>,
    xty: Array1<f64>,
    yty: f64,
    n_samples: usize,
}

impl SufficientStatistics {
    pub fn from_data(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self, RegressionError> {
        if x.nrows() != y.len() {
            return Err(RegressionError::ShapeMismatch {
                rows: x.nrows(),
                len: y.len(),
            });
        }
        Ok(Self {
            gram: x.t().dot(&x),
            xty: x.t().dot(&y),
            yty: y.dot(&y),
            n_samples: y.len(),
        })
    }

    /// Statistics of the design restricted to the given columns.
    pub fn select(&self, columns: &[usize]) -> Self {
        Self {
            gram: self
                .gram
                .select(Axis(0), columns)
                .select(Axis(1), columns),
            xty: self.xty.select(Axis(0), columns),
            yty: self.yty,
            n_samples: self.n_samples,
        }
    }

    pub fn n_features(&self) -> usize {
        self.xty.len()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }
}

/// Result of one conjugate fit.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmodelFit {
    /// `log p(y | sigma_noise, sigma_coef, X)`.
    pub log_likelihood: f64,
    /// Posterior mean of the weights, one entry per design column.
    pub coefficient: Coefficients,
    pub posterior_covariance: Array2<f64>,
}

/// Bayesian linear regression at a fixed hyperparameter pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BayesianLinearRegression {
    sigma_noise: f64,
    sigma_coef: f64,
    tolerance: f64,
}

impl BayesianLinearRegression {
    pub fn new(sigma_noise: f64, sigma_coef: f64) -> Result<Self, RegressionError> {
        let valid = |s: f64| s.is_finite() && s > 0.0;
        if !(valid(sigma_noise) && valid(sigma_coef)) {
            return Err(RegressionError::InvalidSigma {
                sigma_noise,
                sigma_coef,
            });
        }
        Ok(Self {
            sigma_noise,
            sigma_coef,
            tolerance: DEFAULT_PREPROCESSING_TOLERANCE,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn sigma_noise(&self) -> f64 {
        self.sigma_noise
    }

    pub fn sigma_coef(&self) -> f64 {
        self.sigma_coef
    }

    /// Fits standardized data: `y` centered, every column of `x` centered with
    /// unit variance. Other inputs are rejected with a [`PreprocessingError`].
    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<SubmodelFit, RegressionError> {
        if x.nrows() != y.len() {
            return Err(RegressionError::ShapeMismatch {
                rows: x.nrows(),
                len: y.len(),
            });
        }
        validate_target_centralization(y, self.tolerance)?;
        validate_feature_standardization(x, self.tolerance)?;
        let statistics = SufficientStatistics::from_data(x, y)?;
        self.fit_statistics(&statistics)
    }

    /// Fits from precomputed statistics. No preprocessing checks are made.
    pub fn fit_statistics(
        &self,
        statistics: &SufficientStatistics,
    ) -> Result<SubmodelFit, RegressionError> {
        let n = statistics.n_samples as f64;
        let k = statistics.n_features();
        let noise_variance = self.sigma_noise * self.sigma_noise;
        let pure_noise = -0.5 * n * (2.0 * PI).ln() - n * self.sigma_noise.ln();

        if k == 0 {
            return Ok(SubmodelFit {
                log_likelihood: pure_noise - statistics.yty / (2.0 * noise_variance),
                coefficient: Coefficients::zeros(0),
                posterior_covariance: Array2::zeros((0, 0)),
            });
        }

        let mut precision = &statistics.gram / noise_variance;
        let prior_precision = 1.0 / (self.sigma_coef * self.sigma_coef);
        precision.diag_mut().mapv_inplace(|d| d + prior_precision);

        let factor = precision.factorizec(UPLO::Lower)?;
        let projected = &statistics.xty / noise_variance;
        let mean = factor.solvec(&projected)?;
        let posterior_covariance = factor.invc()?;

        // log|A| = 2 * sum(log(diag(L)))
        let log_det_precision = 2.0 * factor.factor.diag().mapv(f64::ln).sum();
        let residual = statistics.yty - statistics.xty.dot(&mean);

        let log_likelihood = pure_noise
            - k as f64 * self.sigma_coef.ln()
            - 0.5 * log_det_precision
            - residual / (2.0 * noise_variance);

        Ok(SubmodelFit {
            log_likelihood,
            coefficient: Coefficients::new(mean),
            posterior_covariance,
        })
    }
}
