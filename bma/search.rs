//! # Exhaustive Search and Model Averaging
//!
//! [`ExhaustiveLinearRegression`] enumerates every non-null feature subset,
//! fits each one as a conjugate linear model on the full
//! `(sigma_noise, sigma_coef)` grid, integrates the two noise scales out, and
//! averages the candidates by their posterior weight.
//!
//! For model `m` with grid surface `L_m(i, j)` and grid weights
//! `W(i, j) = w_noise(i) * w_coef(j)`:
//!
//! - `log p(y | m) = log ∫∫ exp(L_m) W`
//! - `coef_m = ∫∫ exp(L_m) W mean_m / p(y | m)`
//! - `log p(y) = logsumexp_m(log p(m) + log p(y | m))`
//! - `P(feature i) = sum over m containing i of p(m) p(y | m) / p(y)`
//! - `coef = sum_m p(m) p(y | m) coef_m / p(y)`
//!
//! All sums run in log space. Model records are stored in canonical indicator
//! order, see [`crate::indicator`].

use crate::indicator::{FeatureIndicator, IndicatorError};
use crate::integrate::{
    IntegrationError, integrate_log_values_in_square, log_sum_exp, signed_log_sum_exp,
    simpson_coefficients,
};
use crate::linear::{
    BayesianLinearRegression, DEFAULT_PREPROCESSING_TOLERANCE, PreprocessingError,
    RegressionError, SufficientStatistics, validate_feature_standardization,
    validate_target_centralization,
};
use crate::priors::{PriorError, PriorGrid, SparsityPrior};
use crate::progress::{NoopSearchProgress, SearchProgressObserver, SearchProgressStage};
use crate::types::{Coefficients, LogLikelihoodSurface};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Models fitted between two progress reports and cancellation checks.
const MODELS_PER_BATCH: usize = 256;

/// Largest feature count the search accepts. Every one of the `2^p - 1`
/// records is held in memory, so the bound sits far below what indexing
/// alone would allow.
pub const MAX_SEARCH_FEATURES: usize = 32;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Preprocessing(#[from] PreprocessingError),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Unknown prediction mode '{mode}'; valid modes are: {}.", .valid.join(", "))]
    InvalidMode {
        mode: String,
        valid: &'static [&'static str],
    },

    #[error("The estimator has not been fitted yet. Call `fit` first.")]
    NotFitted,

    #[error("The search was cancelled before all models were fitted.")]
    Cancelled,

    #[error("The feature matrix has no columns; at least one feature is required.")]
    NoFeatures,

    #[error("Exhaustive search over {found} features is too large; at most {max} are supported.")]
    TooManyFeatures { found: usize, max: usize },

    #[error("The records of {n_models} models cannot be allocated.")]
    SearchSpaceTooLarge { n_models: usize },

    #[error("Every model has zero marginal likelihood; check that the hyperparameter grids carry prior weight.")]
    ZeroEvidence,

    #[error("Integration failed: {0}")]
    Integration(#[from] IntegrationError),

    #[error("Regression failed: {0}")]
    Regression(RegressionError),

    #[error("Invalid prior: {0}")]
    Prior(#[from] PriorError),

    #[error("Invalid indicator: {0}")]
    Indicator(IndicatorError),
}

impl From<RegressionError> for SearchError {
    fn from(err: RegressionError) -> Self {
        match err {
            RegressionError::Preprocessing(inner) => Self::Preprocessing(inner),
            RegressionError::ShapeMismatch { rows, len } => Self::ShapeMismatch(format!(
                "the feature matrix has {rows} rows but the target has {len} entries"
            )),
            other => Self::Regression(other),
        }
    }
}

impl From<IndicatorError> for SearchError {
    fn from(err: IndicatorError) -> Self {
        match err {
            IndicatorError::TooManyFeatures { found, max } => Self::TooManyFeatures { found, max },
            IndicatorError::LengthMismatch { expected, found } => Self::ShapeMismatch(format!(
                "the indicator has {found} entries but the model was fitted on {expected} features"
            )),
            other => Self::Indicator(other),
        }
    }
}

/// How [`FittedState::predict`] turns the averaged fit into predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictMode {
    /// Use the coefficients of the single model picked by the inclusion
    /// threshold.
    Select,
    /// Use the model-averaged coefficients.
    Full,
}

impl PredictMode {
    pub const VALID: &'static [&'static str] = &["select", "full"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for PredictMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "select" => Ok(Self::Select),
            "full" => Ok(Self::Full),
            other => Err(SearchError::InvalidMode {
                mode: other.to_string(),
                valid: Self::VALID,
            }),
        }
    }
}

/// One candidate model after its noise scales have been integrated out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub indicator: FeatureIndicator,
    pub log_prior: f64,
    /// `log p(y | indicator)`, marginalized over both noise scales.
    pub log_likelihood: f64,
    /// Posterior-mean coefficients over all features, zero where inactive.
    pub coefficient: Coefficients,
    /// `log p(y | indicator, sigma_noise, sigma_coef)` on the grid, without the
    /// grid prior weights.
    pub log_likelihood_over_sigma: LogLikelihoodSurface,
}

impl ModelRecord {
    /// Unnormalized log posterior weight of this model.
    pub fn log_joint(&self) -> f64 {
        self.log_prior + self.log_likelihood
    }

    /// Coefficients of the active features only, in column order.
    pub fn active_coefficients(&self) -> Array1<f64> {
        self.coefficient
            .select(Axis(0), &self.indicator.active_indices())
    }
}

/// Everything learned by one exhaustive search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedState {
    pub n_features: usize,
    /// `log p(y)` summed over all models.
    pub log_likelihood: f64,
    pub feature_posteriors: Array1<f64>,
    /// Model-averaged coefficients.
    pub coefficient: Coefficients,
    /// Grid surface summed over models with their prior weights.
    pub log_likelihood_over_sigma: LogLikelihoodSurface,
    /// Indexed by canonical model index.
    pub models: Vec<ModelRecord>,
}

impl FittedState {
    /// Indicator of the features whose inclusion posterior is at least
    /// `threshold`.
    pub fn select_variables(&self, threshold: f64) -> FeatureIndicator {
        let mask: Vec<bool> = self
            .feature_posteriors
            .iter()
            .map(|&posterior| posterior >= threshold)
            .collect();
        FeatureIndicator::from_mask(&mask)
    }

    /// The record of `indicator`, or `None` for the null model.
    pub fn model_for(
        &self,
        indicator: &FeatureIndicator,
    ) -> Result<Option<&ModelRecord>, SearchError> {
        let Some(index) = indicator.model_index_for(self.n_features)? else {
            return Ok(None);
        };
        self.models.get(index).map(Some).ok_or_else(|| {
            SearchError::ShapeMismatch(format!(
                "model index {index} is missing from a state holding {} models",
                self.models.len()
            ))
        })
    }

    pub fn predict(
        &self,
        x: ArrayView2<f64>,
        mode: PredictMode,
        threshold: f64,
    ) -> Result<Array1<f64>, SearchError> {
        if x.ncols() != self.n_features {
            return Err(SearchError::ShapeMismatch(format!(
                "the feature matrix has {} columns but the model was fitted on {} features",
                x.ncols(),
                self.n_features
            )));
        }
        match mode {
            PredictMode::Full => Ok(x.dot(&*self.coefficient)),
            PredictMode::Select => {
                let indicator = self.select_variables(threshold);
                match self.model_for(&indicator)? {
                    Some(record) => Ok(x.dot(&*record.coefficient)),
                    None => {
                        log::debug!(
                            "No feature reaches posterior {threshold}; predicting with the null model."
                        );
                        Ok(Array1::zeros(x.nrows()))
                    }
                }
            }
        }
    }

    pub fn indicators(&self) -> Vec<FeatureIndicator> {
        self.models.iter().map(|m| m.indicator.clone()).collect()
    }

    pub fn log_priors(&self) -> Array1<f64> {
        self.models.iter().map(|m| m.log_prior).collect()
    }

    pub fn log_likelihoods(&self) -> Array1<f64> {
        self.models.iter().map(|m| m.log_likelihood).collect()
    }

    /// Structural checks for a state that did not come out of `fit`, such as
    /// one read back from disk.
    pub fn check_consistency(&self) -> Result<(), SearchError> {
        let n_models = FeatureIndicator::n_models(self.n_features)?;
        let mismatch = |what: &str, found: usize, expected: usize| {
            SearchError::ShapeMismatch(format!("{what} has {found} entries, expected {expected}"))
        };
        if self.models.len() != n_models {
            return Err(mismatch("the model list", self.models.len(), n_models));
        }
        if self.feature_posteriors.len() != self.n_features {
            return Err(mismatch(
                "the feature posterior vector",
                self.feature_posteriors.len(),
                self.n_features,
            ));
        }
        if self.coefficient.len() != self.n_features {
            return Err(mismatch("the coefficient vector", self.coefficient.len(), self.n_features));
        }
        for (index, record) in self.models.iter().enumerate() {
            if record.indicator.model_index_for(self.n_features)? != Some(index) {
                return Err(SearchError::ShapeMismatch(format!(
                    "model {index} holds indicator {} out of canonical order",
                    record.indicator
                )));
            }
            if record.coefficient.len() != self.n_features {
                return Err(mismatch(
                    "a model coefficient vector",
                    record.coefficient.len(),
                    self.n_features,
                ));
            }
        }
        Ok(())
    }
}

/// Exhaustive Bayesian model averaging over all feature subsets.
#[derive(Debug, Clone)]
pub struct ExhaustiveLinearRegression {
    sigma_noise_points: PriorGrid,
    sigma_coef_points: PriorGrid,
    alpha: SparsityPrior,
    tolerance: f64,
    parallel: bool,
    fitted: Option<FittedState>,
}

impl ExhaustiveLinearRegression {
    pub fn new(
        sigma_noise_points: PriorGrid,
        sigma_coef_points: PriorGrid,
        alpha: SparsityPrior,
    ) -> Self {
        Self {
            sigma_noise_points,
            sigma_coef_points,
            alpha,
            tolerance: DEFAULT_PREPROCESSING_TOLERANCE,
            parallel: true,
            fitted: None,
        }
    }

    /// Absolute tolerance of the centering and unit-scale checks.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn sigma_noise_points(&self) -> &PriorGrid {
        &self.sigma_noise_points
    }

    pub fn sigma_coef_points(&self) -> &PriorGrid {
        &self.sigma_coef_points
    }

    pub fn alpha(&self) -> SparsityPrior {
        self.alpha
    }

    pub fn fit(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<&FittedState, SearchError> {
        self.fit_with_observer(x, y, &mut NoopSearchProgress)
    }

    /// Fits every non-null feature subset of the standardized data `x`
    /// against the centered target `y`.
    ///
    /// A previous fit is discarded first, so a failed refit leaves the
    /// estimator unfitted.
    pub fn fit_with_observer<O>(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        observer: &mut O,
    ) -> Result<&FittedState, SearchError>
    where
        O: SearchProgressObserver + ?Sized,
    {
        self.fitted = None;

        if x.nrows() != y.len() {
            return Err(SearchError::ShapeMismatch(format!(
                "the feature matrix has {} rows but the target has {} entries",
                x.nrows(),
                y.len()
            )));
        }
        let n_features = x.ncols();
        if n_features == 0 {
            return Err(SearchError::NoFeatures);
        }
        if n_features > MAX_SEARCH_FEATURES {
            return Err(SearchError::TooManyFeatures {
                found: n_features,
                max: MAX_SEARCH_FEATURES,
            });
        }
        let n_models = FeatureIndicator::n_models(n_features)?;

        validate_target_centralization(y, self.tolerance)?;
        validate_feature_standardization(x, self.tolerance)?;
        self.alpha.validate()?;

        let context = GridContext::new(
            SufficientStatistics::from_data(x, y)?,
            &self.sigma_noise_points,
            &self.sigma_coef_points,
            self.alpha,
        )?;

        log::info!(
            "Searching {} models over {} features on a {}x{} noise-scale grid.",
            n_models,
            n_features,
            self.sigma_noise_points.len(),
            self.sigma_coef_points.len()
        );

        let stage = SearchProgressStage::SubmodelFitting;
        observer.on_stage_start(stage, n_models);
        let mut models: Vec<ModelRecord> = Vec::new();
        models
            .try_reserve_exact(n_models)
            .map_err(|_| SearchError::SearchSpaceTooLarge { n_models })?;
        let mut batch_start = 0;
        while batch_start < n_models {
            if observer.is_cancelled() {
                log::warn!("Search cancelled after {batch_start} of {n_models} models.");
                return Err(SearchError::Cancelled);
            }
            let batch_end = (batch_start + MODELS_PER_BATCH).min(n_models);
            let batch: Vec<ModelRecord> = if self.parallel {
                (batch_start..batch_end)
                    .into_par_iter()
                    .map(|index| context.fit_model(index))
                    .collect::<Result<_, _>>()?
            } else {
                (batch_start..batch_end)
                    .map(|index| context.fit_model(index))
                    .collect::<Result<_, _>>()?
            };
            for record in batch {
                models.push(record);
                observer.on_stage_advance(stage, models.len());
            }
            batch_start = batch_end;
        }
        observer.on_stage_finish(stage);

        let stage = SearchProgressStage::ModelAveraging;
        observer.on_stage_start(stage, n_models);
        let state = context.average_models(models)?;
        observer.on_stage_advance(stage, n_models);
        observer.on_stage_finish(stage);

        log::info!(
            "Search finished: log evidence {:.6}, feature posteriors {:.4}",
            state.log_likelihood,
            state.feature_posteriors
        );

        Ok(&*self.fitted.insert(state))
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fitted(&self) -> Result<&FittedState, SearchError> {
        self.fitted.as_ref().ok_or(SearchError::NotFitted)
    }

    pub fn into_fitted(self) -> Result<FittedState, SearchError> {
        self.fitted.ok_or(SearchError::NotFitted)
    }

    pub fn coef(&self) -> Result<ArrayView1<'_, f64>, SearchError> {
        Ok(self.fitted()?.coefficient.as_view())
    }

    pub fn feature_posteriors(&self) -> Result<ArrayView1<'_, f64>, SearchError> {
        Ok(self.fitted()?.feature_posteriors.view())
    }

    pub fn log_likelihood(&self) -> Result<f64, SearchError> {
        Ok(self.fitted()?.log_likelihood)
    }

    pub fn models(&self) -> Result<&[ModelRecord], SearchError> {
        Ok(&self.fitted()?.models)
    }

    pub fn indicators(&self) -> Result<Vec<FeatureIndicator>, SearchError> {
        Ok(self.fitted()?.indicators())
    }

    pub fn log_priors(&self) -> Result<Array1<f64>, SearchError> {
        Ok(self.fitted()?.log_priors())
    }

    pub fn log_likelihoods(&self) -> Result<Array1<f64>, SearchError> {
        Ok(self.fitted()?.log_likelihoods())
    }

    pub fn select_variables(&self, threshold: f64) -> Result<FeatureIndicator, SearchError> {
        Ok(self.fitted()?.select_variables(threshold))
    }

    pub fn predict(
        &self,
        x: ArrayView2<f64>,
        mode: PredictMode,
        threshold: f64,
    ) -> Result<Array1<f64>, SearchError> {
        self.fitted()?.predict(x, mode, threshold)
    }
}

/// Read-only inputs shared by every per-model fit of one search.
struct GridContext {
    statistics: SufficientStatistics,
    sigma_noise: Array1<f64>,
    sigma_coef: Array1<f64>,
    /// `w_noise(i) * w_coef(j)`.
    weights: Array2<f64>,
    alpha: SparsityPrior,
}

impl GridContext {
    fn new(
        statistics: SufficientStatistics,
        sigma_noise_points: &PriorGrid,
        sigma_coef_points: &PriorGrid,
        alpha: SparsityPrior,
    ) -> Result<Self, SearchError> {
        let sigma_noise = sigma_noise_points.positions();
        let sigma_coef = sigma_coef_points.positions();
        // Reject unusable grids before any model is fitted.
        simpson_coefficients(sigma_noise.view()).map_err(|e| on_axis(e, 0))?;
        simpson_coefficients(sigma_coef.view()).map_err(|e| on_axis(e, 1))?;

        let noise_weights = sigma_noise_points.weights();
        let coef_weights = sigma_coef_points.weights();
        let weights = Array2::from_shape_fn((sigma_noise.len(), sigma_coef.len()), |(i, j)| {
            noise_weights[i] * coef_weights[j]
        });
        Ok(Self {
            statistics,
            sigma_noise,
            sigma_coef,
            weights,
            alpha,
        })
    }

    fn n_features(&self) -> usize {
        self.statistics.n_features()
    }

    fn fit_model(&self, index: usize) -> Result<ModelRecord, SearchError> {
        let n_features = self.n_features();
        let indicator = FeatureIndicator::from_model_index(index, n_features)?;
        let active = indicator.active_indices();
        let restricted = self.statistics.select(&active);

        let grid_shape = (self.sigma_noise.len(), self.sigma_coef.len());
        let mut surface = Array2::<f64>::zeros(grid_shape);
        let mut mean_surfaces = Array3::<f64>::zeros((active.len(), grid_shape.0, grid_shape.1));
        for (i, &sigma_noise) in self.sigma_noise.iter().enumerate() {
            for (j, &sigma_coef) in self.sigma_coef.iter().enumerate() {
                let fit = BayesianLinearRegression::new(sigma_noise, sigma_coef)?
                    .fit_statistics(&restricted)?;
                surface[[i, j]] = fit.log_likelihood;
                mean_surfaces
                    .slice_mut(s![.., i, j])
                    .assign(&*fit.coefficient);
            }
        }

        let log_likelihood = integrate_log_values_in_square(
            surface.view(),
            self.sigma_noise.view(),
            self.sigma_coef.view(),
            Some(self.weights.view()),
        )?
        .expect_positive()?;

        let mut coefficient = Coefficients::zeros(n_features);
        // Zero evidence leaves nothing to normalize by.
        if log_likelihood.is_finite() {
            for (slot, &feature) in active.iter().enumerate() {
                let weighted = &self.weights * &mean_surfaces.index_axis(Axis(0), slot);
                let integral = integrate_log_values_in_square(
                    surface.view(),
                    self.sigma_noise.view(),
                    self.sigma_coef.view(),
                    Some(weighted.view()),
                )?;
                coefficient[feature] = integral.scaled_value(log_likelihood);
            }
        }

        Ok(ModelRecord {
            log_prior: self.alpha.log_model_prior(n_features, active.len()),
            indicator,
            log_likelihood,
            coefficient,
            log_likelihood_over_sigma: LogLikelihoodSurface::new(surface),
        })
    }

    fn average_models(&self, models: Vec<ModelRecord>) -> Result<FittedState, SearchError> {
        let n_features = self.n_features();
        let log_joint: Vec<f64> = models.iter().map(ModelRecord::log_joint).collect();
        let log_likelihood = log_sum_exp(log_joint.iter().copied());
        if !log_likelihood.is_finite() {
            return Err(SearchError::ZeroEvidence);
        }

        let feature_posteriors = Array1::from_shape_fn(n_features, |feature| {
            let log_inclusion = log_sum_exp(
                models
                    .iter()
                    .zip(&log_joint)
                    .filter(|(record, _)| record.indicator.is_active(feature))
                    .map(|(_, &lj)| lj),
            );
            // Rounding can push a dominant feature a hair above one.
            (log_inclusion - log_likelihood).exp().min(1.0)
        });

        let coefficient = Array1::from_shape_fn(n_features, |feature| {
            signed_log_sum_exp(
                models
                    .iter()
                    .zip(&log_joint)
                    .map(|(record, &lj)| (lj, record.coefficient[feature])),
            )
            .scaled_value(log_likelihood)
        });

        let grid_shape = (self.sigma_noise.len(), self.sigma_coef.len());
        let log_likelihood_over_sigma = Array2::from_shape_fn(grid_shape, |(i, j)| {
            log_sum_exp(
                models
                    .iter()
                    .map(|record| record.log_likelihood_over_sigma[[i, j]] + record.log_prior),
            )
        });

        Ok(FittedState {
            n_features,
            log_likelihood,
            feature_posteriors,
            coefficient: Coefficients::new(coefficient),
            log_likelihood_over_sigma: LogLikelihoodSurface::new(log_likelihood_over_sigma),
            models,
        })
    }
}

/// Tags a single-axis validation error with the grid axis it came from.
fn on_axis(err: IntegrationError, axis: usize) -> IntegrationError {
    match err {
        IntegrationError::DegenerateGrid { points, .. } => {
            IntegrationError::DegenerateGrid { axis, points }
        }
        IntegrationError::NonIncreasingGrid { index, .. } => {
            IntegrationError::NonIncreasingGrid { axis, index }
        }
        other => other,
    }
}
