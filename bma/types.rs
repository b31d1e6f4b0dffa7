use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Coefficient vector of a linear model, indexed by feature.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.0
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Coefficients {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<Coefficients> for Array1<f64> {
    fn from(values: Coefficients) -> Self {
        values.0
    }
}

/// `log p(y | sigma_noise, sigma_coef, X)` evaluated on the hyperparameter grid.
///
/// Rows follow the `sigma_noise` grid and columns the `sigma_coef` grid. The
/// prior weights of the two grids are never folded into this surface.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLikelihoodSurface(pub Array2<f64>);

impl LogLikelihoodSurface {
    pub fn new(values: Array2<f64>) -> Self {
        Self(values)
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.0
    }

    pub fn as_view(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }
}

impl Deref for LogLikelihoodSurface {
    type Target = Array2<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array2<f64>> for LogLikelihoodSurface {
    fn from(values: Array2<f64>) -> Self {
        Self(values)
    }
}
