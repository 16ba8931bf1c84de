//! # Required Biological Variables
//!
//! Each pretrained model ships with a table listing the biological variables it
//! was fitted on. The first column holds the variable names and its row order is
//! the canonical feature order of the model; any further columns (importances,
//! annotations) are carried by the file but not used here.

use ahash::AHashSet;
use polars::prelude::{CsvReadOptions, CsvReader, DataType, PolarsError, SerReader};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VariableError {
    #[error(
        "There is no biological variables file at '{0}'. Please check the status, omics type and artifact directory."
    )]
    NotFound(PathBuf),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The biological variables file lists no variables.")]
    Empty,
    #[error("The variable name in row {row} of the biological variables file is missing.")]
    MissingName { row: usize },
    #[error("The biological variable '{0}' is listed more than once.")]
    Duplicate(String),
}

/// The variables a model consumes, in the model's feature order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredVariables {
    names: Vec<String>,
}

impl RequiredVariables {
    /// Builds the list, rejecting empty and repeated names.
    pub fn new(names: Vec<String>) -> Result<Self, VariableError> {
        if names.is_empty() {
            return Err(VariableError::Empty);
        }
        let mut seen = AHashSet::with_capacity(names.len());
        for (row, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(VariableError::MissingName { row: row + 1 });
            }
            if !seen.insert(name.as_str()) {
                return Err(VariableError::Duplicate(name.clone()));
            }
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Loads the required variable list from its CSV table.
pub fn load_required_variables(path: &Path) -> Result<RequiredVariables, VariableError> {
    if !path.is_file() {
        return Err(VariableError::NotFound(path.to_path_buf()));
    }

    let df = CsvReader::new(File::open(path)?)
        .with_options(CsvReadOptions::default().with_has_header(true))
        .finish()?;
    let Some(index) = df.get_columns().first() else {
        return Err(VariableError::Empty);
    };

    let as_text = index.cast(&DataType::String)?;
    let names = as_text
        .as_materialized_series()
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, name)| match name {
            Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            _ => Err(VariableError::MissingName { row: row + 1 }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let required = RequiredVariables::new(names)?;
    log::info!(
        "Loaded {} required biological variables from '{}'",
        required.len(),
        path.display()
    );
    Ok(required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn keeps_file_order_and_ignores_extra_columns() {
        let file = create_test_csv(",importance\nhsa-mir-21,120\nhsa-mir-155,87\nhsa-let-7a,3\n");
        let required = load_required_variables(file.path()).unwrap();
        assert_eq!(
            required.names(),
            &["hsa-mir-21", "hsa-mir-155", "hsa-let-7a"]
        );
        assert_eq!(required.len(), 3);
    }

    #[test]
    fn single_column_table_is_accepted() {
        let file = create_test_csv("variable\ncg00000029\ncg00000108\n");
        let required = load_required_variables(file.path()).unwrap();
        assert_eq!(required.names(), &["cg00000029", "cg00000108"]);
    }

    #[test]
    fn numeric_looking_names_are_kept_as_text() {
        let file = create_test_csv("id,gain\n7157,0.4\n672,0.2\n");
        let required = load_required_variables(file.path()).unwrap();
        assert_eq!(required.names(), &["7157", "672"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let file = create_test_csv("id,gain\nTP53,0.4\nBRCA1,0.2\nTP53,0.1\n");
        let err = load_required_variables(file.path()).unwrap_err();
        assert!(matches!(err, VariableError::Duplicate(name) if name == "TP53"));
    }

    #[test]
    fn header_only_file_is_empty() {
        let file = create_test_csv("id,gain\n");
        let err = load_required_variables(file.path()).unwrap_err();
        assert!(matches!(err, VariableError::Empty));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_required_variables(Path::new("/nonexistent/vars.csv")).unwrap_err();
        assert!(matches!(err, VariableError::NotFound(_)));
        assert!(err.to_string().contains("/nonexistent/vars.csv"));
    }

    #[test]
    fn blank_names_are_rejected() {
        let err = RequiredVariables::new(vec!["A".to_string(), String::new()]).unwrap_err();
        assert!(matches!(err, VariableError::MissingName { row: 2 }));
    }
}
