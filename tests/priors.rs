use approx::assert_relative_eq;
use exhaustive_bma::PriorGrid;
use exhaustive_bma::integrate::{integrate_log_values_in_line, simpson_coefficients};
use ndarray::{Array1, ArrayView1};

/// Plain trapezoid rule, kept separate from the crate's Simpson weights.
fn trapezoid(y: ArrayView1<f64>, x: ArrayView1<f64>) -> f64 {
    (1..x.len())
        .map(|i| 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]))
        .sum()
}

#[test]
fn gamma_grid_integrates_to_one_over_its_support() {
    let cases: [(f64, f64, f64, f64); 3] = [
        (2.0, 1.5, 0.0, 6.0),
        (3.5, 0.4, 0.2, 4.0),
        (1.0, 10.0, 1.0, 3.0),
    ];
    for &(shape, scale, low, high) in &cases {
        let positions = Array1::linspace(low.max(1e-9), high, 20_001);
        let grid = PriorGrid::gamma(positions.view(), low, high, shape, scale).unwrap();
        let mass = trapezoid(grid.weights().view(), positions.view());
        assert_relative_eq!(mass, 1.0, max_relative = 1e-4);
    }
}

#[test]
fn gamma_grid_is_proportional_to_the_density() {
    let (shape, scale) = (2.5, 0.8);
    let positions = Array1::linspace(0.1, 5.0, 11);
    let grid = PriorGrid::gamma(positions.view(), 0.0, 10.0, shape, scale).unwrap();
    let ratios: Vec<f64> = positions
        .iter()
        .zip(grid.weights().iter())
        .map(|(&x, &w)| w / (x.powf(shape - 1.0) * (-x / scale).exp()))
        .collect();
    for ratio in &ratios[1..] {
        assert_relative_eq!(*ratio, ratios[0], max_relative = 1e-12);
    }
}

#[test]
fn heavy_tailed_gamma_normalizes_on_a_log_grid() {
    // Shape near zero puts most mass near the lower bound; integrate in log x.
    let (shape, scale, low, high): (f64, f64, f64, f64) = (1e-3, 1e3, 1e-2, 1e1);
    let positions = Array1::logspace(10.0, low.log10(), high.log10(), 4001)
        .mapv(|x: f64| x.max(low).min(high));
    let grid = PriorGrid::gamma(positions.view(), low, high, shape, scale).unwrap();
    let log_x = positions.mapv(f64::ln);
    let integrand = &grid.weights() * &positions;
    let mass = trapezoid(integrand.view(), log_x.view());
    assert_relative_eq!(mass, 1.0, max_relative = 1e-5);
}

#[test]
fn uniform_grid_integrates_to_one() {
    let positions = Array1::linspace(0.5, 2.5, 9);
    let grid = PriorGrid::uniform(positions.view(), 0.5, 2.5).unwrap();
    assert!(grid.weights().iter().all(|&w| (w - 0.5).abs() < 1e-15));

    let coefficients = simpson_coefficients(positions.view()).unwrap();
    assert_relative_eq!(coefficients.dot(&grid.weights()), 1.0, epsilon = 1e-12);

    let log_integral = integrate_log_values_in_line(
        grid.log_weights().view(),
        positions.view(),
        None,
    )
    .unwrap()
    .expect_positive()
    .unwrap();
    assert_relative_eq!(log_integral, 0.0, epsilon = 1e-12);
}
