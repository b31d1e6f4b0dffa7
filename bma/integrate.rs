//! Log-Domain Composite Simpson Integration
//!
//! Marginal likelihoods evaluated on a hyperparameter grid routinely span
//! hundreds of orders of magnitude, so every integrand handled here is passed
//! in as natural logarithms and the result is returned the same way. No raw
//! value is ever exponentiated before summation: each quadrature sum is a
//! (signed) log-sum-exp over `log f + log |c * w|`, where `c` is the Simpson
//! coefficient of a grid point and `w` an optional weight.
//!
//! # Rules
//!
//! - Odd point counts use composite Simpson panels with the irregular-spacing
//!   weights, which reduce to the familiar `h/3 * (1, 4, 1)` on uniform grids.
//!   On strongly stretched grids a panel weight can be negative, which is one
//!   reason the sums are always carried out with sign tracking.
//! - Even point counts of at least four apply Simpson to the first `n - 1`
//!   points and a trapezoid to the last interval.
//! - An axis with exactly one point is a pass-through with coefficient one, so
//!   a single-point grid returns its value unchanged.
//! - Two-dimensional integrals use the tensor product of the two 1-D rules.

use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

/// Errors raised while validating or evaluating a quadrature.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("Shape mismatch on axis {axis}: the grid has {expected} points but the {what} have {found}.")]
    ShapeMismatch {
        what: &'static str,
        axis: usize,
        expected: usize,
        found: usize,
    },

    #[error("Axis {axis} has {points} grid points; integration needs a single point or at least three.")]
    DegenerateGrid { axis: usize, points: usize },

    #[error("Grid coordinates on axis {axis} must be finite and strictly increasing (violated at index {index}).")]
    NonIncreasingGrid { axis: usize, index: usize },

    #[error("Non-finite {what} value {value} at flat index {index}.")]
    NonFiniteValue {
        what: &'static str,
        index: usize,
        value: f64,
    },

    #[error("The integral was expected to be positive but evaluated to -exp({log_abs}).")]
    NegativeIntegral { log_abs: f64 },
}

/// A real number stored as `sign * exp(log_abs)`.
///
/// `sign` is `-1.0`, `0.0` or `1.0`; zero is represented with
/// `log_abs = -inf`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedLog {
    pub log_abs: f64,
    pub sign: f64,
}

impl SignedLog {
    pub const ZERO: Self = Self {
        log_abs: f64::NEG_INFINITY,
        sign: 0.0,
    };

    pub fn is_zero(&self) -> bool {
        self.sign == 0.0
    }

    /// The represented value in linear space.
    pub fn value(&self) -> f64 {
        self.scaled_value(0.0)
    }

    /// The represented value divided by `exp(log_scale)`.
    pub fn scaled_value(&self, log_scale: f64) -> f64 {
        if self.is_zero() {
            return 0.0;
        }
        self.sign * (self.log_abs - log_scale).exp()
    }

    /// Returns the log-magnitude of an integral whose integrand is known to be
    /// non-negative. A zero integral yields `-inf`.
    pub fn expect_positive(self) -> Result<f64, IntegrationError> {
        if self.sign < 0.0 {
            return Err(IntegrationError::NegativeIntegral {
                log_abs: self.log_abs,
            });
        }
        Ok(self.log_abs)
    }
}

/// Numerically stable `log(sum(exp(values)))`.
///
/// An empty input or one made only of `-inf` yields `-inf`.
pub fn log_sum_exp<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let values: Vec<f64> = values.into_iter().collect();
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    let total: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + total.ln()
}

/// Computes `log |sum(w * exp(l))|` together with the sign of the sum, for
/// terms given as `(l, w)` pairs.
///
/// Terms with `w == 0` or `l == -inf` contribute nothing and are dropped
/// before any logarithm is taken.
pub fn signed_log_sum_exp<I>(terms: I) -> SignedLog
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let scaled: Vec<(f64, f64)> = terms
        .into_iter()
        .filter(|&(log_value, weight)| weight != 0.0 && log_value != f64::NEG_INFINITY)
        .map(|(log_value, weight)| (log_value + weight.abs().ln(), weight.signum()))
        .collect();
    if scaled.is_empty() {
        return SignedLog::ZERO;
    }

    let max = scaled
        .iter()
        .map(|&(log_value, _)| log_value)
        .fold(f64::NEG_INFINITY, f64::max);
    let total: f64 = scaled
        .iter()
        .map(|&(log_value, sign)| sign * (log_value - max).exp())
        .sum();
    if total == 0.0 {
        return SignedLog::ZERO;
    }

    SignedLog {
        log_abs: max + total.abs().ln(),
        sign: total.signum(),
    }
}

/// Composite Simpson coefficients for a single strictly increasing axis.
pub fn simpson_coefficients(x: ArrayView1<f64>) -> Result<Array1<f64>, IntegrationError> {
    axis_coefficients(x, 0)
}

/// Integrates `exp(log_values) * weights` over a 1-D grid.
///
/// Without weights the integrand is `exp(log_values)`. Call
/// [`SignedLog::expect_positive`] on the result when the integrand is known to
/// be non-negative.
pub fn integrate_log_values_in_line(
    log_values: ArrayView1<f64>,
    x: ArrayView1<f64>,
    weights: Option<ArrayView1<f64>>,
) -> Result<SignedLog, IntegrationError> {
    check_axis_len("log-values", 0, x.len(), log_values.len())?;
    if let Some(weights) = weights.as_ref() {
        check_axis_len("weights", 0, x.len(), weights.len())?;
    }

    let coefficients = axis_coefficients(x, 0)?;
    check_finite_log_values(log_values.iter().copied())?;
    if let Some(weights) = weights.as_ref() {
        check_finite_weights(weights.iter().copied())?;
    }

    let terms = log_values
        .iter()
        .zip(coefficients.iter())
        .enumerate()
        .map(|(i, (&log_value, &coefficient))| {
            let weight = weights.as_ref().map_or(1.0, |w| w[i]);
            (log_value, coefficient * weight)
        });
    Ok(signed_log_sum_exp(terms))
}

/// Integrates `exp(log_values) * weights` over a 2-D rectilinear grid.
///
/// `log_values[[i, j]]` is the integrand at `(x1[i], x2[j])`.
pub fn integrate_log_values_in_square(
    log_values: ArrayView2<f64>,
    x1: ArrayView1<f64>,
    x2: ArrayView1<f64>,
    weights: Option<ArrayView2<f64>>,
) -> Result<SignedLog, IntegrationError> {
    let (rows, cols) = log_values.dim();
    check_axis_len("log-values", 0, x1.len(), rows)?;
    check_axis_len("log-values", 1, x2.len(), cols)?;
    if let Some(weights) = weights.as_ref() {
        check_axis_len("weights", 0, x1.len(), weights.nrows())?;
        check_axis_len("weights", 1, x2.len(), weights.ncols())?;
    }

    let c1 = axis_coefficients(x1, 0)?;
    let c2 = axis_coefficients(x2, 1)?;
    check_finite_log_values(log_values.iter().copied())?;
    if let Some(weights) = weights.as_ref() {
        check_finite_weights(weights.iter().copied())?;
    }

    let terms = log_values.indexed_iter().map(|((i, j), &log_value)| {
        let weight = weights.as_ref().map_or(1.0, |w| w[[i, j]]);
        (log_value, c1[i] * c2[j] * weight)
    });
    Ok(signed_log_sum_exp(terms))
}

fn check_axis_len(
    what: &'static str,
    axis: usize,
    expected: usize,
    found: usize,
) -> Result<(), IntegrationError> {
    if expected != found {
        return Err(IntegrationError::ShapeMismatch {
            what,
            axis,
            expected,
            found,
        });
    }
    Ok(())
}

fn check_finite_log_values<I>(values: I) -> Result<(), IntegrationError>
where
    I: IntoIterator<Item = f64>,
{
    // -inf is a legitimate log of zero; NaN and +inf are not.
    for (index, value) in values.into_iter().enumerate() {
        if value.is_nan() || value == f64::INFINITY {
            return Err(IntegrationError::NonFiniteValue {
                what: "log",
                index,
                value,
            });
        }
    }
    Ok(())
}

fn check_finite_weights<I>(values: I) -> Result<(), IntegrationError>
where
    I: IntoIterator<Item = f64>,
{
    for (index, value) in values.into_iter().enumerate() {
        if !value.is_finite() {
            return Err(IntegrationError::NonFiniteValue {
                what: "weight",
                index,
                value,
            });
        }
    }
    Ok(())
}

fn axis_coefficients(x: ArrayView1<f64>, axis: usize) -> Result<Array1<f64>, IntegrationError> {
    let n = x.len();
    if n == 0 || n == 2 {
        return Err(IntegrationError::DegenerateGrid { axis, points: n });
    }
    for (index, &value) in x.iter().enumerate() {
        let increasing = index == 0 || value > x[index - 1];
        if !value.is_finite() || !increasing {
            return Err(IntegrationError::NonIncreasingGrid { axis, index });
        }
    }
    if n == 1 {
        return Ok(Array1::ones(1));
    }

    let mut coefficients = Array1::<f64>::zeros(n);
    // Last index covered by Simpson panels; an even count leaves one interval.
    let simpson_end = if n % 2 == 1 { n - 1 } else { n - 2 };
    let mut i = 0;
    while i + 2 <= simpson_end {
        let h0 = x[i + 1] - x[i];
        let h1 = x[i + 2] - x[i + 1];
        let span = h0 + h1;
        coefficients[i] += span / 6.0 * (2.0 - h1 / h0);
        coefficients[i + 1] += span.powi(3) / (6.0 * h0 * h1);
        coefficients[i + 2] += span / 6.0 * (2.0 - h0 / h1);
        i += 2;
    }
    if n % 2 == 0 {
        let h = x[n - 1] - x[n - 2];
        coefficients[n - 2] += 0.5 * h;
        coefficients[n - 1] += 0.5 * h;
    }
    Ok(coefficients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array, Array2, array};

    #[test]
    fn test_uniform_simpson_weights() {
        let x = Array::linspace(0.0, 2.0, 5);
        let c = simpson_coefficients(x.view()).unwrap();
        let h = 0.5;
        let expected = array![h / 3.0, 4.0 * h / 3.0, 2.0 * h / 3.0, 4.0 * h / 3.0, h / 3.0];
        for (a, b) in c.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_quadratic_is_exact_on_uniform_grid() {
        // The point at x = 0 has log-value -inf and must be dropped, not evaluated.
        let x = Array::linspace(0.0, 2.0, 5);
        let log_values = x.mapv(|v: f64| (v * v).ln());
        let result = integrate_log_values_in_line(log_values.view(), x.view(), None)
            .unwrap()
            .expect_positive()
            .unwrap();
        assert_relative_eq!(result.exp(), 8.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_irregular_panel_with_negative_weight() {
        // h1 = 3 * h0 makes the first coefficient negative.
        let x = array![0.0, 0.5, 2.0];
        let c = simpson_coefficients(x.view()).unwrap();
        assert!(c[0] < 0.0);

        let log_values = x.mapv(|v: f64| (1.0 + v).ln());
        let result = integrate_log_values_in_line(log_values.view(), x.view(), None)
            .unwrap()
            .expect_positive()
            .unwrap();
        assert_relative_eq!(result.exp(), 4.0, epsilon = 1e-12);

        let log_values = x.mapv(|v: f64| (v * v).ln());
        let result = integrate_log_values_in_line(log_values.view(), x.view(), None).unwrap();
        assert_relative_eq!(result.value(), 8.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_even_point_count_uses_trapezoid_tail() {
        let x = Array::linspace(0.0, 3.0, 4);
        let log_values = x.mapv(|v: f64| (1.0 + v).ln());
        let result = integrate_log_values_in_line(log_values.view(), x.view(), None).unwrap();
        assert_relative_eq!(result.value(), 7.5, epsilon = 1e-12);
    }

    #[test]
    fn test_single_point_is_pass_through() {
        let x = array![0.7];
        let result = integrate_log_values_in_line(array![-12.5].view(), x.view(), None)
            .unwrap()
            .expect_positive()
            .unwrap();
        assert_eq!(result, -12.5);

        let grid = array![[-3.25]];
        let result = integrate_log_values_in_square(grid.view(), x.view(), array![4.0].view(), None)
            .unwrap()
            .expect_positive()
            .unwrap();
        assert_eq!(result, -3.25);
    }

    #[test]
    fn test_signed_weights() {
        let x = Array::linspace(0.0, 1.0, 5);
        let log_values = Array1::<f64>::zeros(5);

        let positive = integrate_log_values_in_line(log_values.view(), x.view(), Some(x.view()))
            .unwrap();
        assert_eq!(positive.sign, 1.0);
        assert_relative_eq!(positive.value(), 0.5, epsilon = 1e-12);

        let flipped = x.mapv(|v| -v);
        let negative =
            integrate_log_values_in_line(log_values.view(), x.view(), Some(flipped.view()))
                .unwrap();
        assert_eq!(negative.sign, -1.0);
        assert_relative_eq!(negative.value(), -0.5, epsilon = 1e-12);
        assert!(matches!(
            negative.expect_positive(),
            Err(IntegrationError::NegativeIntegral { .. })
        ));
    }

    #[test]
    fn test_separable_square_integral() {
        let x1 = Array::linspace(0.0, 1.0, 5);
        let x2 = Array::linspace(0.0, 2.0, 7);
        let log_values = Array2::from_shape_fn((5, 7), |(i, j)| {
            let value: f64 = x1[i] * x2[j] * x2[j];
            value.ln()
        });
        let result = integrate_log_values_in_square(log_values.view(), x1.view(), x2.view(), None)
            .unwrap()
            .expect_positive()
            .unwrap();
        assert_relative_eq!(result.exp(), 0.5 * 8.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_extreme_log_values_do_not_underflow() {
        let x1 = Array::linspace(0.0, 1.0, 3);
        let x2 = Array::linspace(0.0, 1.0, 3);
        let log_values = Array2::from_elem((3, 3), -1500.0);
        let result = integrate_log_values_in_square(log_values.view(), x1.view(), x2.view(), None)
            .unwrap()
            .expect_positive()
            .unwrap();
        assert_relative_eq!(result, -1500.0, epsilon = 1e-10);

        let log_values = Array2::from_elem((3, 3), 1500.0);
        let result = integrate_log_values_in_square(log_values.view(), x1.view(), x2.view(), None)
            .unwrap()
            .expect_positive()
            .unwrap();
        assert_relative_eq!(result, 1500.0, epsilon = 1e-10);
    }

    #[test]
    fn test_all_zero_integrand() {
        let x = Array::linspace(1.0, 2.0, 3);
        let log_values = Array1::from_elem(3, f64::NEG_INFINITY);
        let result = integrate_log_values_in_line(log_values.view(), x.view(), None).unwrap();
        assert!(result.is_zero());
        assert_eq!(result.expect_positive().unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_validation_errors() {
        let x = Array::linspace(0.0, 1.0, 3);
        let err = integrate_log_values_in_line(Array1::<f64>::zeros(4).view(), x.view(), None);
        assert!(matches!(err, Err(IntegrationError::ShapeMismatch { axis: 0, .. })));

        let x1 = Array::linspace(0.0, 1.0, 3);
        let x2 = Array::linspace(0.0, 1.0, 5);
        let err = integrate_log_values_in_square(
            Array2::<f64>::zeros((3, 4)).view(),
            x1.view(),
            x2.view(),
            None,
        );
        assert!(matches!(err, Err(IntegrationError::ShapeMismatch { axis: 1, .. })));

        let weights = Array2::<f64>::zeros((3, 4));
        let err = integrate_log_values_in_square(
            Array2::<f64>::zeros((3, 5)).view(),
            x1.view(),
            x2.view(),
            Some(weights.view()),
        );
        assert!(matches!(
            err,
            Err(IntegrationError::ShapeMismatch { what: "weights", .. })
        ));

        let two = array![0.0, 1.0];
        let err = integrate_log_values_in_line(Array1::<f64>::zeros(2).view(), two.view(), None);
        assert_eq!(err, Err(IntegrationError::DegenerateGrid { axis: 0, points: 2 }));

        let unordered = array![0.0, 2.0, 1.0];
        let err =
            integrate_log_values_in_line(Array1::<f64>::zeros(3).view(), unordered.view(), None);
        assert_eq!(err, Err(IntegrationError::NonIncreasingGrid { axis: 0, index: 2 }));

        let err = integrate_log_values_in_line(array![0.0, f64::NAN, 0.0].view(), x.view(), None);
        assert!(matches!(err, Err(IntegrationError::NonFiniteValue { index: 1, .. })));
    }

    #[test]
    fn test_log_sum_exp() {
        assert_relative_eq!(log_sum_exp([0.0, 0.0]), 2f64.ln(), epsilon = 1e-15);
        assert_relative_eq!(log_sum_exp([-1000.0, -1000.0]), -1000.0 + 2f64.ln(), epsilon = 1e-12);
        assert_eq!(log_sum_exp(Vec::new()), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp([f64::NEG_INFINITY, 3.0]), 3.0);

        let mixed = signed_log_sum_exp([(2f64.ln(), 1.0), (3f64.ln(), -1.0)]);
        assert_eq!(mixed.sign, -1.0);
        assert_relative_eq!(mixed.value(), -1.0, epsilon = 1e-14);
        assert!(signed_log_sum_exp([(1.0, 0.0)]).is_zero());
    }
}
