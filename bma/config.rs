//! TOML configuration of a search: the two noise-scale grids and the sparsity
//! prior.
//!
//! ```toml
//! tolerance = 1e-8
//! parallel = true
//!
//! [sigma_noise]
//! low = 0.01
//! high = 10.0
//! n_points = 51
//! spacing = "log"
//! family = { kind = "gamma", shape = 0.001, scale = 1000.0 }
//!
//! [sigma_coef]
//! low = 0.01
//! high = 10.0
//! n_points = 51
//! spacing = "log"
//! family = { kind = "uniform" }
//!
//! [alpha]
//! beta_marginalized = { alpha = 1.0, beta = 1.0 }
//! ```

use crate::linear::DEFAULT_PREPROCESSING_TOLERANCE;
use crate::priors::{PriorError, PriorGrid, SparsityPrior};
use crate::search::ExhaustiveLinearRegression;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write the configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse the configuration TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize the configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid {grid} grid: {reason}")]
    InvalidGrid { grid: &'static str, reason: String },

    #[error(transparent)]
    Prior(#[from] PriorError),
}

/// Prior density placed on a noise-scale grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridFamily {
    Gamma { shape: f64, scale: f64 },
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridSpacing {
    Linear,
    Log,
}

/// One hyperparameter axis: where the points lie and which density weighs
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    pub low: f64,
    pub high: f64,
    pub n_points: usize,
    pub spacing: GridSpacing,
    pub family: GridFamily,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            low: 1e-2,
            high: 1e1,
            n_points: 51,
            spacing: GridSpacing::Log,
            family: GridFamily::Gamma {
                shape: 1e-3,
                scale: 1e3,
            },
        }
    }
}

impl GridConfig {
    /// Grid coordinates, clamped into `[low, high]`.
    pub fn positions(&self) -> Array1<f64> {
        let positions = match self.spacing {
            GridSpacing::Linear => Array1::linspace(self.low, self.high, self.n_points),
            GridSpacing::Log => {
                Array1::logspace(10.0, self.low.log10(), self.high.log10(), self.n_points)
            }
        };
        // Log spacing can overshoot the bounds by a rounding error.
        positions.mapv(|x| x.max(self.low).min(self.high))
    }

    /// Builds the weighted grid. A single point pins the hyperparameter at
    /// `low` with unit weight.
    pub fn build(&self, grid: &'static str) -> Result<PriorGrid, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidGrid { grid, reason };
        if !(self.low.is_finite() && self.high.is_finite() && self.low > 0.0) {
            return Err(invalid(format!(
                "bounds must be finite and positive, got [{}, {}]",
                self.low, self.high
            )));
        }
        match self.n_points {
            0 | 2 => {
                return Err(invalid(format!(
                    "{} points cannot be integrated; use 1 or at least 3",
                    self.n_points
                )));
            }
            1 => return Ok(PriorGrid::single(self.low)?),
            _ => {}
        }
        if self.low >= self.high {
            return Err(invalid(format!(
                "low ({}) must be below high ({})",
                self.low, self.high
            )));
        }

        let positions = self.positions();
        let prior = match self.family {
            GridFamily::Gamma { shape, scale } => {
                PriorGrid::gamma(positions.view(), self.low, self.high, shape, scale)?
            }
            GridFamily::Uniform => PriorGrid::uniform(positions.view(), self.low, self.high)?,
        };
        Ok(prior)
    }
}

/// Everything needed to construct an [`ExhaustiveLinearRegression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub tolerance: f64,
    pub parallel: bool,
    pub alpha: SparsityPrior,
    pub sigma_noise: GridConfig,
    pub sigma_coef: GridConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_PREPROCESSING_TOLERANCE,
            parallel: true,
            alpha: SparsityPrior::Fixed(0.5),
            sigma_noise: GridConfig::default(),
            sigma_coef: GridConfig::default(),
        }
    }
}

impl SearchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.alpha.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn build_estimator(&self) -> Result<ExhaustiveLinearRegression, ConfigError> {
        self.alpha.validate()?;
        let sigma_noise = self.sigma_noise.build("sigma_noise")?;
        let sigma_coef = self.sigma_coef.build("sigma_coef")?;
        log::debug!(
            "Built {}-point sigma_noise and {}-point sigma_coef grids, alpha prior {:?}.",
            sigma_noise.len(),
            sigma_coef.len(),
            self.alpha
        );
        Ok(ExhaustiveLinearRegression::new(sigma_noise, sigma_coef, self.alpha)
            .with_tolerance(self.tolerance)
            .with_parallel(self.parallel))
    }
}
