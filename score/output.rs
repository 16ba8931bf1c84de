//! Per-sample risk scores and their CSV output.
//!
//! Classifiers score each sample with its predicted class label, as the
//! scikit-learn style `predict` of the trained models does. The class
//! probabilities can be written alongside.

use crate::model::OutputKind;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::{Column, CsvWriter, DataFrame, NamedFrom, PolarsError, SerWriter, Series};
use std::fs::{self, File};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write the score file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("The predictor returned {found} rows for {expected} samples.")]
    RowCountMismatch { found: usize, expected: usize },
    #[error("The predictor returned no output columns.")]
    NoOutputs,
    #[error("A {kind:?} predictor must return one output column, but it returned {found}.")]
    OutputWidth { kind: OutputKind, found: usize },
}

/// One score per sample, plus the class probabilities of classifiers when kept.
#[derive(Debug, Clone)]
pub struct ScoreTable {
    sample_ids: Vec<String>,
    prs: Array1<f64>,
    class_outputs: Option<Array2<f64>>,
}

fn most_probable_class(outputs: &Array2<f64>) -> Array1<f64> {
    outputs.map_axis(Axis(1), |row| {
        let mut best = 0;
        for (k, &value) in row.iter().enumerate() {
            if value > row[best] {
                best = k;
            }
        }
        best as f64
    })
}

/// Expands positive-class probabilities to `[P(class 0), P(class 1)]` rows.
fn binary_class_outputs(positive: &Array1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((positive.len(), 2), |(i, k)| {
        if k == 1 { positive[i] } else { 1.0 - positive[i] }
    })
}

impl ScoreTable {
    /// Builds the score column from predictor outputs. Regression scores are
    /// taken as they are. Classifiers score the most probable class: class 1
    /// when a binary model's probability exceeds 0.5, otherwise the index of
    /// the largest class probability.
    pub fn from_predictions(
        sample_ids: Vec<String>,
        outputs: Array2<f64>,
        kind: OutputKind,
        keep_class_outputs: bool,
    ) -> Result<Self, OutputError> {
        if outputs.nrows() != sample_ids.len() {
            return Err(OutputError::RowCountMismatch {
                found: outputs.nrows(),
                expected: sample_ids.len(),
            });
        }
        match (kind, outputs.ncols()) {
            (_, 0) => Err(OutputError::NoOutputs),
            (OutputKind::Score, 1) => Ok(Self {
                sample_ids,
                prs: outputs.column(0).to_owned(),
                class_outputs: None,
            }),
            (OutputKind::BinaryProbability, 1) => {
                let positive = outputs.column(0).to_owned();
                Ok(Self {
                    sample_ids,
                    prs: positive.mapv(|p| if p > 0.5 { 1.0 } else { 0.0 }),
                    class_outputs: keep_class_outputs.then(|| binary_class_outputs(&positive)),
                })
            }
            (OutputKind::ClassProbabilities, _) => Ok(Self {
                sample_ids,
                prs: most_probable_class(&outputs),
                class_outputs: keep_class_outputs.then_some(outputs),
            }),
            (kind, found) => Err(OutputError::OutputWidth { kind, found }),
        }
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn prs(&self) -> &Array1<f64> {
        &self.prs
    }

    pub fn class_outputs(&self) -> Option<&Array2<f64>> {
        self.class_outputs.as_ref()
    }

    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    pub fn to_frame(&self) -> Result<DataFrame, OutputError> {
        let mut columns: Vec<Column> = vec![
            Series::new("sample_id".into(), self.sample_ids.clone()).into(),
            Series::new("prs".into(), self.prs.to_vec()).into(),
        ];
        if let Some(outputs) = &self.class_outputs {
            for (k, values) in outputs.axis_iter(Axis(1)).enumerate() {
                columns.push(Series::new(format!("prob_class_{k}").into(), values.to_vec()).into());
            }
        }
        Ok(DataFrame::new(columns)?)
    }
}

/// Writes `table` as CSV, creating the parent directory when needed.
pub fn write_scores(path: &Path, table: &ScoreTable) -> Result<(), OutputError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut frame = table.to_frame()?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut frame)?;
    log::info!("Wrote {} scores to '{}'", table.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::tempdir;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("TCGA-{i:02}")).collect()
    }

    #[test]
    fn regression_output_is_the_score() {
        let table =
            ScoreTable::from_predictions(ids(2), array![[0.25], [0.75]], OutputKind::Score, true)
                .unwrap();
        assert_eq!(table.prs().to_vec(), vec![0.25, 0.75]);
        assert!(table.class_outputs().is_none());
    }

    #[test]
    fn binary_output_scores_the_predicted_label() {
        let outputs = array![[0.25], [0.75], [0.5]];
        let table = ScoreTable::from_predictions(
            ids(3),
            outputs.clone(),
            OutputKind::BinaryProbability,
            false,
        )
        .unwrap();
        assert_eq!(table.prs().to_vec(), vec![0.0, 1.0, 0.0]);
        assert!(table.class_outputs().is_none());

        let kept =
            ScoreTable::from_predictions(ids(3), outputs, OutputKind::BinaryProbability, true)
                .unwrap();
        let probabilities = kept.class_outputs().unwrap();
        assert_eq!(probabilities.shape(), &[3, 2]);
        assert_abs_diff_eq!(probabilities[[0, 0]], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(probabilities[[1, 1]], 0.75, epsilon = 1e-12);
        let names: Vec<String> = kept
            .to_frame()
            .unwrap()
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(names, vec!["sample_id", "prs", "prob_class_0", "prob_class_1"]);
    }

    #[test]
    fn single_output_width_is_enforced() {
        let err = ScoreTable::from_predictions(
            ids(1),
            array![[0.2, 0.8]],
            OutputKind::BinaryProbability,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, OutputError::OutputWidth { found: 2, .. }));
    }

    #[test]
    fn multi_output_scores_the_most_probable_class() {
        let outputs = array![[0.1, 0.7, 0.2], [0.5, 0.2, 0.3], [0.2, 0.2, 0.6]];
        let table = ScoreTable::from_predictions(
            ids(3),
            outputs.clone(),
            OutputKind::ClassProbabilities,
            false,
        )
        .unwrap();
        assert_eq!(table.prs().to_vec(), vec![1.0, 0.0, 2.0]);
        assert!(table.class_outputs().is_none());

        let kept =
            ScoreTable::from_predictions(ids(3), outputs, OutputKind::ClassProbabilities, true)
                .unwrap();
        assert_eq!(kept.class_outputs().unwrap().ncols(), 3);
        assert_eq!(kept.to_frame().unwrap().width(), 5);
    }

    #[test]
    fn row_count_must_match_samples() {
        let err =
            ScoreTable::from_predictions(ids(3), array![[0.1], [0.2]], OutputKind::Score, false)
                .unwrap_err();
        assert!(matches!(
            err,
            OutputError::RowCountMismatch {
                found: 2,
                expected: 3
            }
        ));
    }

    #[test]
    fn writes_csv_with_header_and_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output_data").join("scores.csv");
        let table =
            ScoreTable::from_predictions(ids(2), array![[0.125], [0.5]], OutputKind::Score, false)
                .unwrap();
        write_scores(&path, &table).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(header, vec!["sample_id", "prs"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "TCGA-01");
        assert_abs_diff_eq!(rows[1][1].parse::<f64>().unwrap(), 0.5, epsilon = 1e-12);
    }
}
