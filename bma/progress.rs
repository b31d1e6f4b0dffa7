use std::fmt;

/// Stages reported during an exhaustive search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchProgressStage {
    SubmodelFitting,
    ModelAveraging,
}

impl SearchProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::SubmodelFitting => "submodel fitting",
            Self::ModelAveraging => "model averaging",
        }
    }
}

impl fmt::Display for SearchProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while searching the model
/// space. Callbacks run on the calling thread, between batches of models.
pub trait SearchProgressObserver {
    fn on_stage_start(&mut self, stage: SearchProgressStage, total_models: usize) {
        let _ = (stage, total_models);
    }
    fn on_stage_advance(&mut self, stage: SearchProgressStage, processed_models: usize) {
        let _ = (stage, processed_models);
    }
    fn on_stage_finish(&mut self, stage: SearchProgressStage) {
        let _ = stage;
    }
    /// Polled between batches; returning `true` aborts the search.
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct NoopSearchProgress;

impl SearchProgressObserver for NoopSearchProgress {}
