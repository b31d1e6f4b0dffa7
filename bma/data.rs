//! # Data Loading and Validation
//!
//! Reads tab-separated tables with a header row into the `ndarray` structures
//! the search works on.
//!
//! - Training files name the target column explicitly; every other column
//!   except an optional `sample_id` is a feature, in file order.
//! - Prediction files must contain the feature columns the model was trained
//!   on. Extra columns are ignored and column order does not matter.
//! - Every cell of a used column must parse as a finite number. Failures are
//!   reported with the column name and the 1-based data row.

use ndarray::{Array1, Array2};
use std::path::Path;
use thiserror::Error;

/// Column holding optional sample identifiers. Never treated as a feature.
pub const SAMPLE_ID_COLUMN: &str = "sample_id";

#[derive(Debug)]
pub struct TrainingData {
    pub feature_names: Vec<String>,
    /// Shape: [n_samples, n_features].
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

#[derive(Debug)]
pub struct PredictionData {
    /// Shape: [n_samples, n_features], columns in the requested order.
    pub x: Array2<f64>,
    /// From the `sample_id` column when present, otherwise 1-based row numbers.
    pub sample_ids: Vec<String>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the TSV reader: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("The required column '{0}' was not found in the input file. Please check spelling and case.")]
    ColumnNotFound(String),

    #[error("The column '{0}' appears more than once in the header.")]
    DuplicateColumn(String),

    #[error("Value '{value}' in column '{column}' (row {row}) is not a number.")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Non-finite value in column '{column}' (row {row}). All data must be finite.")]
    NonFiniteValue { column: String, row: usize },

    #[error("The input file has no feature columns besides the target '{0}'.")]
    NoFeatureColumns(String),

    #[error("The input file contains no data rows.")]
    NoRows,
}

pub fn load_training_data(path: impl AsRef<Path>, target: &str) -> Result<TrainingData, DataError> {
    let table = internal::read_table(path.as_ref())?;
    let target_index = table.column_index(target)?;
    let feature_indices: Vec<usize> = table
        .header
        .iter()
        .enumerate()
        .filter(|(i, name)| *i != target_index && name.as_str() != SAMPLE_ID_COLUMN)
        .map(|(i, _)| i)
        .collect();
    if feature_indices.is_empty() {
        return Err(DataError::NoFeatureColumns(target.to_string()));
    }

    let y = Array1::from(table.numeric_column(target_index)?);
    let x = table.numeric_matrix(&feature_indices)?;
    let feature_names = feature_indices
        .iter()
        .map(|&i| table.header[i].clone())
        .collect();
    log::info!(
        "Loaded {} samples with {} features and target '{}'.",
        y.len(),
        x.ncols(),
        target
    );
    Ok(TrainingData { feature_names, x, y })
}

pub fn load_prediction_data(
    path: impl AsRef<Path>,
    feature_names: &[String],
) -> Result<PredictionData, DataError> {
    let table = internal::read_table(path.as_ref())?;
    let feature_indices = feature_names
        .iter()
        .map(|name| table.column_index(name))
        .collect::<Result<Vec<_>, _>>()?;
    let x = table.numeric_matrix(&feature_indices)?;

    let sample_ids = match table.header.iter().position(|c| c == SAMPLE_ID_COLUMN) {
        Some(index) => table
            .rows
            .iter()
            .enumerate()
            .map(|(row, record)| match record.get(index) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => (row + 1).to_string(),
            })
            .collect(),
        None => (1..=table.rows.len()).map(|i| i.to_string()).collect(),
    };
    log::info!("Loaded {} samples for prediction.", x.nrows());
    Ok(PredictionData { x, sample_ids })
}

mod internal {
    use super::*;
    use csv::{ReaderBuilder, StringRecord, Trim};
    use std::collections::HashSet;

    pub(super) struct Table {
        pub header: Vec<String>,
        pub rows: Vec<StringRecord>,
    }

    pub(super) fn read_table(path: &Path) -> Result<Table, DataError> {
        log::debug!("Reading '{}'", path.display());
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(Trim::All)
            .from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut seen = HashSet::new();
        for name in &header {
            if !seen.insert(name.as_str()) {
                return Err(DataError::DuplicateColumn(name.clone()));
            }
        }

        let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Err(DataError::NoRows);
        }
        Ok(Table { header, rows })
    }

    impl Table {
        pub fn column_index(&self, name: &str) -> Result<usize, DataError> {
            self.header
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
        }

        pub fn numeric_column(&self, index: usize) -> Result<Vec<f64>, DataError> {
            let column = &self.header[index];
            self.rows
                .iter()
                .enumerate()
                .map(|(row, record)| {
                    let raw = record.get(index).unwrap_or("");
                    let value: f64 = raw.parse().map_err(|_| DataError::NotNumeric {
                        column: column.clone(),
                        row: row + 1,
                        value: raw.to_string(),
                    })?;
                    if !value.is_finite() {
                        return Err(DataError::NonFiniteValue {
                            column: column.clone(),
                            row: row + 1,
                        });
                    }
                    Ok(value)
                })
                .collect()
        }

        pub fn numeric_matrix(&self, indices: &[usize]) -> Result<Array2<f64>, DataError> {
            let mut x = Array2::<f64>::zeros((self.rows.len(), indices.len()));
            for (j, &index) in indices.iter().enumerate() {
                let values = self.numeric_column(index)?;
                x.column_mut(j).assign(&Array1::from(values));
            }
            Ok(x)
        }
    }
}
