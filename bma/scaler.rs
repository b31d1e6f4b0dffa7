//! Standardization of raw data into the form the search requires: centered
//! target, and feature columns with mean zero and population variance one.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScalerError {
    #[error("Cannot standardize an empty data set.")]
    EmptyData,

    #[error("Non-finite values (NaN or Infinity) were found in the {0}.")]
    NonFiniteValues(&'static str),

    #[error("Feature column {column} is constant and cannot be scaled to unit variance.")]
    ConstantColumn { column: usize },

    #[error("The scaler was fitted on {expected} columns, but the input has {found}.")]
    ColumnMismatch { expected: usize, found: usize },
}

/// Per-column centering and scaling learned from training features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    /// Population standard deviation of each column.
    pub scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, ScalerError> {
        if x.nrows() == 0 {
            return Err(ScalerError::EmptyData);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ScalerError::NonFiniteValues("feature matrix"));
        }
        let n = x.nrows() as f64;
        let mut mean = Array1::<f64>::zeros(x.ncols());
        let mut scale = Array1::<f64>::zeros(x.ncols());
        for (column, values) in x.axis_iter(Axis(1)).enumerate() {
            // Two passes keep the variance accurate for columns far from zero.
            let column_mean = values.sum() / n;
            let variance = values.iter().map(|v| (v - column_mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            if std <= f64::EPSILON * column_mean.abs().max(1.0) {
                return Err(ScalerError::ConstantColumn { column });
            }
            mean[column] = column_mean;
            scale[column] = std;
        }
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ScalerError> {
        self.check_columns(x.ncols())?;
        Ok((&x - &self.mean) / &self.scale)
    }

    pub fn inverse_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ScalerError> {
        self.check_columns(x.ncols())?;
        Ok(&x * &self.scale + &self.mean)
    }

    fn check_columns(&self, found: usize) -> Result<(), ScalerError> {
        if found != self.n_features() {
            return Err(ScalerError::ColumnMismatch {
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }
}

/// Removes the target mean before fitting and restores it on predictions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetCentering {
    pub mean: f64,
}

impl TargetCentering {
    pub fn fit(y: ArrayView1<f64>) -> Result<Self, ScalerError> {
        if y.is_empty() {
            return Err(ScalerError::EmptyData);
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ScalerError::NonFiniteValues("target"));
        }
        Ok(Self {
            mean: y.sum() / y.len() as f64,
        })
    }

    pub fn transform(&self, y: ArrayView1<f64>) -> Array1<f64> {
        y.mapv(|v| v - self.mean)
    }

    pub fn inverse_transform(&self, y: ArrayView1<f64>) -> Array1<f64> {
        y.mapv(|v| v + self.mean)
    }
}
