//! # Feature Reconciliation
//!
//! Brings a loaded omics table in line with a model's required variables:
//! repeated variable columns are collapsed to their first occurrence, every
//! required variable must be present, and the surviving columns are laid out in
//! the required order. Columns the model does not use are dropped. A missing
//! required variable is always an error; nothing is imputed or skipped.

use crate::omics::{OmicsTable, is_float_dtype, is_integer_dtype};
use crate::variables::RequiredVariables;
use ahash::{AHashMap, AHashSet};
use ndarray::Array2;
use polars::prelude::{DataFrame, DataType, PolarsError};
use thiserror::Error;

/// How many missing names are quoted in the error message.
const MISSING_EXAMPLES: usize = 5;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(
        "The requested biological variables were not found in the input data: {missing} of {total} missing (e.g. {examples}). Please check the biological variables."
    )]
    MissingVariables {
        missing: usize,
        total: usize,
        examples: String,
    },
    #[error("The required variable '{name}' contains non-numeric data (found type: {found_type}).")]
    NonNumericVariable { name: String, found_type: String },
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
}

/// An omics table restricted to, and ordered by, a model's required variables.
#[derive(Debug, Clone)]
pub struct AlignedTable {
    sample_ids: Vec<String>,
    frame: DataFrame,
    duplicates_removed: usize,
}

impl AlignedTable {
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn variables(&self) -> Vec<&str> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.as_str())
            .collect()
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Repeated input columns dropped while aligning.
    pub fn duplicates_removed(&self) -> usize {
        self.duplicates_removed
    }

    /// Samples × variables as `f64`; nulls become NaN.
    pub fn feature_matrix(&self) -> Result<Array2<f64>, ReconcileError> {
        let mut matrix = Array2::from_elem((self.frame.height(), self.frame.width()), f64::NAN);
        for (j, column) in self.frame.get_columns().iter().enumerate() {
            let values = column.cast(&DataType::Float64)?;
            for (i, value) in values.as_materialized_series().f64()?.into_iter().enumerate() {
                if let Some(v) = value {
                    matrix[[i, j]] = v;
                }
            }
        }
        Ok(matrix)
    }
}

/// Drops repeated variable columns, keeping the first occurrence of each name.
/// Returns how many columns were dropped.
pub fn deduplicate_variables(table: &mut OmicsTable) -> usize {
    let before = table.columns.len();
    let mut seen = AHashSet::with_capacity(before);
    table.columns.retain(|column| seen.insert(column.name().clone()));
    let removed = before - table.columns.len();
    if removed > 0 {
        log::warn!(
            "There are {removed} repeated biological variables in the input data; keeping the first occurrence of each."
        );
    }
    removed
}

/// Checks that `table` holds every required variable and reorders it to match.
pub fn align_to_required(
    mut table: OmicsTable,
    required: &RequiredVariables,
) -> Result<AlignedTable, ReconcileError> {
    let duplicates_removed = deduplicate_variables(&mut table);

    let positions: AHashMap<&str, usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| (column.name().as_str(), i))
        .collect();

    let missing: Vec<&str> = required
        .names()
        .iter()
        .map(String::as_str)
        .filter(|name| !positions.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(ReconcileError::MissingVariables {
            missing: missing.len(),
            total: required.len(),
            examples: missing
                .iter()
                .take(MISSING_EXAMPLES)
                .copied()
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    let mut selected = Vec::with_capacity(required.len());
    for name in required.names() {
        let column = &table.columns[positions[name.as_str()]];
        let dtype = column.dtype();
        if !is_integer_dtype(dtype) && !is_float_dtype(dtype) {
            return Err(ReconcileError::NonNumericVariable {
                name: name.clone(),
                found_type: format!("{dtype:?}"),
            });
        }
        selected.push(column.clone());
    }

    let dropped = table.columns.len() - selected.len();
    log::info!(
        "All {} required biological variables found; {} unused input variables dropped.",
        required.len(),
        dropped
    );

    Ok(AlignedTable {
        sample_ids: table.sample_ids,
        frame: DataFrame::new(selected)?,
        duplicates_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::prelude::{Column, NamedFrom, Series};

    fn table(columns: Vec<(&str, Vec<Option<f64>>)>) -> OmicsTable {
        let n = columns.first().map_or(0, |(_, v)| v.len());
        let ids = (1..=n).map(|i| format!("S{i}")).collect();
        let columns = columns
            .into_iter()
            .map(|(name, values)| Column::from(Series::new(name.into(), values)))
            .collect();
        OmicsTable::new(ids, columns).unwrap()
    }

    fn required(names: &[&str]) -> RequiredVariables {
        RequiredVariables::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn reorders_to_required_order_and_drops_extras() {
        let input = table(vec![
            ("C", vec![Some(3.0), Some(30.0)]),
            ("extra", vec![Some(0.0), Some(0.0)]),
            ("A", vec![Some(1.0), Some(10.0)]),
            ("B", vec![Some(2.0), Some(20.0)]),
        ]);
        let aligned = align_to_required(input, &required(&["A", "B", "C"])).unwrap();

        assert_eq!(aligned.variables(), vec!["A", "B", "C"]);
        assert_eq!(aligned.sample_ids(), &["S1", "S2"]);
        let matrix = aligned.feature_matrix().unwrap();
        assert_eq!(matrix.shape(), &[2, 3]);
        assert_abs_diff_eq!(matrix[[0, 0]], 1.0);
        assert_abs_diff_eq!(matrix[[1, 2]], 30.0);
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let mut input = table(vec![
            ("A", vec![Some(1.0)]),
            ("B", vec![Some(2.0)]),
            ("A", vec![Some(99.0)]),
        ]);
        assert_eq!(deduplicate_variables(&mut input), 1);
        assert_eq!(input.variable_names(), vec!["A", "B"]);

        let input = table(vec![
            ("A", vec![Some(1.0)]),
            ("A", vec![Some(99.0)]),
            ("B", vec![Some(2.0)]),
        ]);
        let aligned = align_to_required(input, &required(&["B", "A"])).unwrap();
        assert_eq!(aligned.duplicates_removed(), 1);
        let matrix = aligned.feature_matrix().unwrap();
        assert_abs_diff_eq!(matrix[[0, 1]], 1.0);
    }

    #[test]
    fn missing_required_variable_is_an_error() {
        let input = table(vec![("A", vec![Some(1.0)]), ("B", vec![Some(2.0)])]);
        let err = align_to_required(input, &required(&["A", "X", "B", "Y"])).unwrap_err();
        match err {
            ReconcileError::MissingVariables {
                missing,
                total,
                examples,
            } => {
                assert_eq!(missing, 2);
                assert_eq!(total, 4);
                assert_eq!(examples, "X, Y");
            }
            other => panic!("Expected MissingVariables, got {other:?}"),
        }
    }

    #[test]
    fn nulls_become_nan_in_the_feature_matrix() {
        let input = table(vec![("A", vec![Some(1.0), None])]);
        let aligned = align_to_required(input, &required(&["A"])).unwrap();
        let matrix = aligned.feature_matrix().unwrap();
        assert!(matrix[[1, 0]].is_nan());
    }

    #[test]
    fn fully_missing_variable_reaches_the_matrix_as_nan() {
        let input = table(vec![("A", vec![Some(1.0), Some(2.0)]), ("B", vec![None, None])]);
        let aligned = align_to_required(input, &required(&["B", "A"])).unwrap();
        let matrix = aligned.feature_matrix().unwrap();
        assert!(matrix.column(0).iter().all(|v| v.is_nan()));
        assert_abs_diff_eq!(matrix[[1, 1]], 2.0);
    }

    #[test]
    fn integer_columns_are_widened_to_f64() {
        let input = OmicsTable::new(
            vec!["S1".to_string(), "S2".to_string()],
            vec![Column::from(Series::new("counts".into(), vec![3i8, -4]))],
        )
        .unwrap();
        let aligned = align_to_required(input, &required(&["counts"])).unwrap();
        let matrix = aligned.feature_matrix().unwrap();
        assert_abs_diff_eq!(matrix[[1, 0]], -4.0);
    }

    #[test]
    fn non_numeric_required_variable_is_rejected() {
        let input = OmicsTable::new(
            vec!["S1".to_string()],
            vec![Column::from(Series::new("grade".into(), vec!["high"]))],
        )
        .unwrap();
        let err = align_to_required(input, &required(&["grade"])).unwrap_err();
        assert!(matches!(err, ReconcileError::NonNumericVariable { name, .. } if name == "grade"));
    }
}
