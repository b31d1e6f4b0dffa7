use approx::{assert_abs_diff_eq, assert_relative_eq};
use exhaustive_bma::indicator::FeatureIndicator;
use exhaustive_bma::integrate::log_sum_exp;
use exhaustive_bma::progress::{SearchProgressObserver, SearchProgressStage};
use exhaustive_bma::scaler::StandardScaler;
use exhaustive_bma::{
    BayesianLinearRegression, ExhaustiveLinearRegression, PredictMode, PriorGrid, SearchError,
    SparsityPrior,
};
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Standardized Gaussian design with a centered linear target.
fn synthetic_data(n: usize, weights: &[f64], noise: f64, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let raw = Array2::from_shape_fn((n, weights.len()), |_| normal.sample(&mut rng));
    let x = StandardScaler::fit(raw.view())
        .unwrap()
        .transform(raw.view())
        .unwrap();
    let signal = x.dot(&Array1::from(weights.to_vec()));
    let mut y = signal + Array1::from_shape_fn(n, |_| noise * normal.sample(&mut rng));
    let mean = y.mean().unwrap();
    y.mapv_inplace(|v| v - mean);
    (x, y)
}

fn uniform_grid(low: f64, high: f64, n_points: usize) -> PriorGrid {
    PriorGrid::uniform(Array1::linspace(low, high, n_points).view(), low, high).unwrap()
}

fn grid_search(alpha: SparsityPrior) -> ExhaustiveLinearRegression {
    ExhaustiveLinearRegression::new(uniform_grid(0.2, 3.0, 9), uniform_grid(0.2, 3.0, 9), alpha)
}

/// Two columns that are centered, unit scale and exactly orthogonal.
fn orthogonal_pair(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, 2), |(i, j)| {
        let bit = if j == 0 { i % 2 } else { (i / 2) % 2 };
        if bit == 0 { 1.0 } else { -1.0 }
    })
}

#[test]
fn single_point_grid_reproduces_closed_form_submodels() {
    let x = orthogonal_pair(40);
    let mut y = 0.9 * &x.column(0) - 0.3 * &x.column(1)
        + Array1::linspace(-1.0, 1.0, 40).mapv(|t: f64| 0.25 * (7.0 * t).cos());
    let mean = y.mean().unwrap();
    y.mapv_inplace(|v| v - mean);

    let (sigma_noise, sigma_coef) = (0.6, 1.3);
    let mut search = ExhaustiveLinearRegression::new(
        PriorGrid::single(sigma_noise).unwrap(),
        PriorGrid::single(sigma_coef).unwrap(),
        SparsityPrior::fixed(0.5).unwrap(),
    );
    let state = search.fit(x.view(), y.view()).unwrap();
    assert_eq!(state.models.len(), 3);

    let regression = BayesianLinearRegression::new(sigma_noise, sigma_coef).unwrap();
    for record in &state.models {
        let columns = record.indicator.active_indices();
        let sub_x = x.select(Axis(1), &columns);
        let direct = regression.fit(sub_x.view(), y.view()).unwrap();
        assert_relative_eq!(record.log_likelihood, direct.log_likelihood, max_relative = 1e-12);
        for (slot, &feature) in columns.iter().enumerate() {
            assert_relative_eq!(
                record.coefficient[feature],
                direct.coefficient[slot],
                max_relative = 1e-10
            );
        }
        assert_relative_eq!(record.log_prior, 2.0 * 0.5f64.ln(), epsilon = 1e-12);
    }
}

#[test]
fn averaged_quantities_are_consistent_with_records() {
    let (x, y) = synthetic_data(120, &[1.2, 0.0, -0.7, 0.0], 0.5, 7);
    let mut search = grid_search(SparsityPrior::fixed(0.3).unwrap());
    let state = search.fit(x.view(), y.view()).unwrap().clone();

    let log_joint: Vec<f64> = state.models.iter().map(|m| m.log_joint()).collect();
    assert_relative_eq!(
        state.log_likelihood,
        log_sum_exp(log_joint.iter().copied()),
        max_relative = 1e-12
    );

    for feature in 0..4 {
        let mut posterior = 0.0;
        let mut coefficient = 0.0;
        for (record, &lj) in state.models.iter().zip(&log_joint) {
            let weight = (lj - state.log_likelihood).exp();
            if record.indicator.is_active(feature) {
                posterior += weight;
            }
            coefficient += weight * record.coefficient[feature];
        }
        assert_relative_eq!(state.feature_posteriors[feature], posterior.min(1.0), epsilon = 1e-9);
        assert_relative_eq!(state.coefficient[feature], coefficient, epsilon = 1e-9);
    }

    assert!(state.feature_posteriors.iter().all(|&p| (0.0..=1.0).contains(&p)));
    assert!(state.feature_posteriors.sum() <= 4.0);

    for ((i, j), &value) in state.log_likelihood_over_sigma.indexed_iter() {
        let expected = log_sum_exp(
            state
                .models
                .iter()
                .map(|m| m.log_likelihood_over_sigma[[i, j]] + m.log_prior),
        );
        assert_relative_eq!(value, expected, max_relative = 1e-12);
    }

    assert_eq!(search.log_priors().unwrap().len(), 15);
    assert_eq!(search.log_likelihoods().unwrap().len(), 15);
    assert_eq!(search.indicators().unwrap(), FeatureIndicator::enumerate(4, true).unwrap());
}

#[test]
fn relevant_features_are_found() {
    let (x, y) = synthetic_data(300, &[1.5, 0.0, -0.8, 0.0], 0.5, 11);
    let mut search = grid_search(SparsityPrior::fixed(0.5).unwrap());
    search.fit(x.view(), y.view()).unwrap();

    let posteriors = search.feature_posteriors().unwrap();
    assert!(posteriors[0] > 0.99);
    assert!(posteriors[2] > 0.99);
    assert!(posteriors[1] < posteriors[0]);
    assert!(posteriors[3] < posteriors[2]);

    let coef = search.coef().unwrap();
    assert_abs_diff_eq!(coef[0], 1.5, epsilon = 0.15);
    assert_abs_diff_eq!(coef[2], -0.8, epsilon = 0.15);
}

#[test]
fn selection_thresholds() {
    let (x, y) = synthetic_data(60, &[1.0, 0.5, 0.0], 0.7, 3);
    let mut search = grid_search(SparsityPrior::fixed(0.5).unwrap());
    search.fit(x.view(), y.view()).unwrap();

    let none = search.select_variables(1.1).unwrap();
    assert!(none.is_null());
    let zeros = search.predict(x.view(), PredictMode::Select, 1.1).unwrap();
    assert!(zeros.iter().all(|&v| v == 0.0));

    let all = search.select_variables(0.0).unwrap();
    assert_eq!(all, FeatureIndicator::ones(3));
    let full_model = search.fitted().unwrap().model_for(&all).unwrap().unwrap();
    let selected = search.predict(x.view(), PredictMode::Select, 0.0).unwrap();
    let expected = x.dot(&*full_model.coefficient);
    for (a, b) in selected.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }

    let averaged = search.predict(x.view(), PredictMode::Full, 0.5).unwrap();
    let expected = x.dot(&search.coef().unwrap());
    for (a, b) in averaged.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }

    let wrong_width = Array2::<f64>::zeros((2, 5));
    assert!(matches!(
        search.predict(wrong_width.view(), PredictMode::Full, 0.5),
        Err(SearchError::ShapeMismatch(_))
    ));
    assert!(matches!(
        "best".parse::<PredictMode>(),
        Err(SearchError::InvalidMode { .. })
    ));
}

#[test]
fn beta_prior_depends_only_on_model_size() {
    let (x, y) = synthetic_data(50, &[0.8, 0.0, 0.4], 1.0, 5);
    let prior = SparsityPrior::beta(2.0, 3.0).unwrap();
    let mut search = grid_search(prior);
    let state = search.fit(x.view(), y.view()).unwrap();
    for record in &state.models {
        assert_relative_eq!(
            record.log_prior,
            prior.log_model_prior(3, record.indicator.n_active()),
            epsilon = 1e-12
        );
    }
    let singles: Vec<f64> = state
        .models
        .iter()
        .filter(|m| m.indicator.n_active() == 1)
        .map(|m| m.log_prior)
        .collect();
    assert_eq!(singles.len(), 3);
    assert!(singles.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn refit_is_deterministic_and_parallel_matches_sequential() {
    // 511 models spans more than one batch.
    let (x, y) = synthetic_data(40, &[0.9, 0.0, 0.0, -0.5, 0.0, 0.0, 0.3, 0.0, 0.0], 0.8, 21);
    let grid = || uniform_grid(0.5, 2.0, 3);
    let alpha = SparsityPrior::fixed(0.2).unwrap();

    let mut parallel = ExhaustiveLinearRegression::new(grid(), grid(), alpha);
    let first = parallel.fit(x.view(), y.view()).unwrap().clone();
    let second = parallel.fit(x.view(), y.view()).unwrap().clone();
    assert_eq!(first, second);

    let mut sequential =
        ExhaustiveLinearRegression::new(grid(), grid(), alpha).with_parallel(false);
    let third = sequential.fit(x.view(), y.view()).unwrap();
    assert_eq!(&first, third);
    assert_eq!(first.models.len(), 511);
}

#[derive(Default)]
struct RecordingObserver {
    events: Vec<(SearchProgressStage, &'static str, usize)>,
    cancel_after: Option<usize>,
    processed: usize,
}

impl SearchProgressObserver for RecordingObserver {
    fn on_stage_start(&mut self, stage: SearchProgressStage, total_models: usize) {
        self.events.push((stage, "start", total_models));
    }
    fn on_stage_advance(&mut self, stage: SearchProgressStage, processed_models: usize) {
        self.processed = processed_models;
        self.events.push((stage, "advance", processed_models));
    }
    fn on_stage_finish(&mut self, stage: SearchProgressStage) {
        self.events.push((stage, "finish", 0));
    }
    fn is_cancelled(&self) -> bool {
        self.cancel_after.is_some_and(|limit| self.processed >= limit)
    }
}

#[test]
fn observer_sees_every_model() {
    let (x, y) = synthetic_data(30, &[1.0, 0.0, 0.5], 0.5, 2);
    let mut search = grid_search(SparsityPrior::fixed(0.5).unwrap());
    let mut observer = RecordingObserver::default();
    search.fit_with_observer(x.view(), y.view(), &mut observer).unwrap();

    let fitting: Vec<_> = observer
        .events
        .iter()
        .filter(|e| e.0 == SearchProgressStage::SubmodelFitting)
        .collect();
    assert_eq!(fitting.first().map(|e| (e.1, e.2)), Some(("start", 7)));
    let advances: Vec<usize> = fitting.iter().filter(|e| e.1 == "advance").map(|e| e.2).collect();
    assert_eq!(advances, (1..=7).collect::<Vec<_>>());
    assert_eq!(fitting.last().map(|e| e.1), Some("finish"));
    assert_eq!(
        observer.events.last(),
        Some(&(SearchProgressStage::ModelAveraging, "finish", 0))
    );
}

#[test]
fn cancellation_stops_between_batches() {
    let (x, y) = synthetic_data(30, &[0.5; 9], 0.5, 4);
    let grid = || uniform_grid(0.5, 2.0, 3);
    let mut search =
        ExhaustiveLinearRegression::new(grid(), grid(), SparsityPrior::fixed(0.5).unwrap());
    let mut observer = RecordingObserver {
        cancel_after: Some(1),
        ..RecordingObserver::default()
    };
    let result = search.fit_with_observer(x.view(), y.view(), &mut observer);
    assert!(matches!(result, Err(SearchError::Cancelled)));
    assert!(!search.is_fitted());
    // The first batch completes before the flag is polled again.
    assert!(observer.processed > 0 && observer.processed < 511);

    let mut immediate = RecordingObserver {
        cancel_after: Some(0),
        ..RecordingObserver::default()
    };
    assert!(matches!(
        search.fit_with_observer(x.view(), y.view(), &mut immediate),
        Err(SearchError::Cancelled)
    ));
    assert_eq!(immediate.processed, 0);
}
