//! The self-contained artifact of a finished search: configuration, the
//! standardization learned from the raw training data, and the fitted state.
//! Predictions made from a loaded artifact need neither the training data nor
//! a refit.

use crate::config::{ConfigError, SearchConfig};
use crate::progress::SearchProgressObserver;
use crate::scaler::{ScalerError, StandardScaler, TargetCentering};
use crate::search::{FittedState, PredictMode, SearchError};
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedSearch {
    pub feature_names: Vec<String>,
    pub config: SearchConfig,
    pub feature_scaler: StandardScaler,
    pub target_centering: TargetCentering,
    pub state: FittedState,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Input has {found} feature columns, but the model expects {expected}.")]
    MismatchedFeatureCount { found: usize, expected: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Standardization failed: {0}")]
    Scaling(#[from] ScalerError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

impl TrainedSearch {
    /// Standardizes raw training data, runs the configured search and bundles
    /// the result.
    pub fn fit<O>(
        config: SearchConfig,
        feature_names: Vec<String>,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        observer: &mut O,
    ) -> Result<Self, ModelError>
    where
        O: SearchProgressObserver + ?Sized,
    {
        if feature_names.len() != x.ncols() {
            return Err(ModelError::MismatchedFeatureCount {
                found: x.ncols(),
                expected: feature_names.len(),
            });
        }
        let feature_scaler = StandardScaler::fit(x)?;
        let target_centering = TargetCentering::fit(y)?;
        let z = feature_scaler.transform(x)?;
        let centered = target_centering.transform(y);

        let mut estimator = config.build_estimator()?;
        estimator.fit_with_observer(z.view(), centered.view(), observer)?;
        let state = estimator.into_fitted()?;

        Ok(Self {
            feature_names,
            config,
            feature_scaler,
            target_centering,
            state,
        })
    }

    /// Predicts on the original target scale from raw feature values whose
    /// columns follow `feature_names`.
    pub fn predict(
        &self,
        x: ArrayView2<f64>,
        mode: PredictMode,
        threshold: f64,
    ) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.feature_names.len() {
            return Err(ModelError::MismatchedFeatureCount {
                found: x.ncols(),
                expected: self.feature_names.len(),
            });
        }
        let z = self.feature_scaler.transform(x)?;
        let centered = self.state.predict(z.view(), mode, threshold)?;
        Ok(self.target_centering.inverse_transform(centered.view()))
    }

    /// Names of the features whose inclusion posterior reaches `threshold`.
    pub fn selected_features(&self, threshold: f64) -> Vec<&str> {
        let indicator = self.state.select_variables(threshold);
        indicator
            .active_indices()
            .into_iter()
            .map(|i| self.feature_names[i].as_str())
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        model.state.check_consistency()?;
        for found in [model.feature_names.len(), model.feature_scaler.n_features()] {
            if found != model.state.n_features {
                return Err(ModelError::MismatchedFeatureCount {
                    found,
                    expected: model.state.n_features,
                });
            }
        }
        Ok(model)
    }
}
