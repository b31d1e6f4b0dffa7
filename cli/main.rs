#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs;
use std::io::{BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::process;

use exhaustive_bma::config::SearchConfig;
use exhaustive_bma::data::{load_prediction_data, load_training_data};
use exhaustive_bma::model::TrainedSearch;
use exhaustive_bma::progress::{SearchProgressObserver, SearchProgressStage};
use exhaustive_bma::{PredictMode, SparsityPrior};

#[derive(Parser)]
#[command(
    name = "exhaustive-bma",
    about = "Exhaustive Bayesian model averaging for linear regression",
    long_about = "Fits every non-empty subset of the input features as a Bayesian linear \
                  regression, integrates out the noise and coefficient scales on a grid, and \
                  averages all subsets into feature-inclusion posteriors and coefficients."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search all feature subsets of a training table
    #[command(about = "Fit a model averaged over all feature subsets (outputs: model.toml)")]
    Fit(FitArgs),

    /// Apply a fitted model to new data
    #[command(about = "Predict with a fitted model (outputs: predictions.tsv)")]
    Predict(PredictArgs),
}

#[derive(Args)]
struct FitArgs {
    /// Path to a TSV file with a header row; every column except the target
    /// and `sample_id` is used as a feature
    training_data: PathBuf,

    /// Name of the target column
    #[arg(long)]
    target: String,

    /// Search configuration (TOML); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fixed prior inclusion probability of each feature
    #[arg(long, conflicts_with_all = ["beta_alpha", "beta_beta"])]
    alpha: Option<f64>,

    /// First shape parameter of a Beta prior on the inclusion probability
    #[arg(long, requires = "beta_beta")]
    beta_alpha: Option<f64>,

    /// Second shape parameter of a Beta prior on the inclusion probability
    #[arg(long, requires = "beta_alpha")]
    beta_beta: Option<f64>,

    /// Fit models one at a time instead of in parallel
    #[arg(long)]
    sequential: bool,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    output: PathBuf,
}

#[derive(Args)]
struct PredictArgs {
    /// Path to a TSV file containing the feature columns the model was fitted on
    test_data: PathBuf,

    /// Path to a fitted model file (.toml)
    #[arg(long)]
    model: PathBuf,

    /// `full` averages over all models; `select` uses the model of the features
    /// whose posterior reaches the threshold
    #[arg(long, default_value = "full")]
    mode: String,

    /// Inclusion posterior threshold for `select` mode
    #[arg(long, default_value = "0.5")]
    threshold: f64,

    /// Where to write the predictions
    #[arg(long, default_value = "predictions.tsv")]
    output: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fit(args) => fit_command(args),
        Commands::Predict(args) => predict_command(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn fit_command(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SearchConfig::load(path)?,
        None => SearchConfig::default(),
    };
    if let Some(alpha) = args.alpha {
        config.alpha = SparsityPrior::fixed(alpha)?;
    }
    if let (Some(alpha), Some(beta)) = (args.beta_alpha, args.beta_beta) {
        config.alpha = SparsityPrior::beta(alpha, beta)?;
    }
    if args.sequential {
        config.parallel = false;
    }

    let data = load_training_data(&args.training_data, &args.target)?;
    let mut progress = ProgressBarObserver::default();
    let model = TrainedSearch::fit(
        config,
        data.feature_names,
        data.x.view(),
        data.y.view(),
        &mut progress,
    )?;

    println!("Log marginal likelihood: {:.6}", model.state.log_likelihood);
    println!("{:<24} {:>12} {:>14}", "feature", "posterior", "coefficient");
    for (i, name) in model.feature_names.iter().enumerate() {
        // Report coefficients on the raw feature scale.
        let coefficient = model.state.coefficient[i] / model.feature_scaler.scale[i];
        println!(
            "{:<24} {:>12.6} {:>14.6e}",
            name, model.state.feature_posteriors[i], coefficient
        );
    }

    model.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

fn predict_command(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mode: PredictMode = args.mode.parse()?;
    let model = TrainedSearch::load(&args.model)?;
    let data = load_prediction_data(&args.test_data, &model.feature_names)?;
    let predictions = model.predict(data.x.view(), mode, args.threshold)?;

    if mode == PredictMode::Select {
        println!(
            "Selected features: [{}]",
            model.selected_features(args.threshold).join(", ")
        );
    }

    let mut writer = BufWriter::new(fs::File::create(&args.output)?);
    writeln!(writer, "sample_id\tprediction")?;
    for (id, value) in data.sample_ids.iter().zip(predictions.iter()) {
        writeln!(writer, "{id}\t{value}")?;
    }
    writer.flush()?;
    println!(
        "Wrote {} predictions to: {}",
        predictions.len(),
        args.output.display()
    );
    Ok(())
}

/// Draws the submodel fitting stage as a progress bar on stderr.
#[derive(Default)]
struct ProgressBarObserver {
    bar: Option<ProgressBar>,
}

impl SearchProgressObserver for ProgressBarObserver {
    fn on_stage_start(&mut self, stage: SearchProgressStage, total_models: usize) {
        if stage != SearchProgressStage::SubmodelFitting {
            return;
        }
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_models as u64), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} models ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_message(stage.to_string());
        self.bar = Some(bar);
    }

    fn on_stage_advance(&mut self, stage: SearchProgressStage, processed_models: usize) {
        if stage != SearchProgressStage::SubmodelFitting {
            return;
        }
        if let Some(bar) = &self.bar {
            bar.set_position(processed_models as u64);
        }
    }

    fn on_stage_finish(&mut self, stage: SearchProgressStage) {
        if stage != SearchProgressStage::SubmodelFitting {
            return;
        }
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
