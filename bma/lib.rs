#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Exhaustive Bayesian model averaging over linear-regression feature subsets.
//!
//! Every non-null subset of the `p` input features is fitted as a conjugate
//! Gaussian linear model on a grid of `(sigma_noise, sigma_coef)` values, the
//! two hyperparameters are integrated out in log space, and the `2^p - 1`
//! candidates are averaged into feature-inclusion posteriors and a marginal
//! coefficient vector.

pub mod config;
pub mod data;
pub mod indicator;
pub mod integrate;
pub mod linear;
pub mod model;
pub mod priors;
pub mod progress;
pub mod scaler;
pub mod search;
pub mod types;

pub use indicator::FeatureIndicator;
pub use linear::{BayesianLinearRegression, SubmodelFit};
pub use priors::{HyperparameterPoint, PriorGrid, SparsityPrior};
pub use search::{ExhaustiveLinearRegression, FittedState, ModelRecord, PredictMode, SearchError};
