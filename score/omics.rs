//! # Omics Table Loading
//!
//! Reads the user-supplied omics matrix into an [`OmicsTable`]: one row per
//! sample, one column per biological variable. Expression and methylation
//! matrices are usually distributed with variables as rows, so that
//! orientation is the default and is transposed on load.
//!
//! The first column of the file is always the index (sample ids or variable
//! names). The raw header is read with the `csv` crate rather than taken from
//! the polars frame because polars renames repeated header names, and repeated
//! variables have to survive until reconciliation deduplicates them.
//!
//! Empty fields and the usual NA spellings of R and pandas exports are read as
//! missing. A column with no observed value at all is numeric (all null), so a
//! fully missing sample or variable still reaches the model as NaN.

use clap::ValueEnum;
use polars::prelude::{
    Column, CsvParseOptions, CsvReadOptions, CsvReader, DataType, NamedFrom, NullValues,
    PolarsError, SerReader, Series,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cell values read as missing in addition to empty fields.
const NA_TOKENS: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// How samples and variables are laid out in the input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    /// Each row is a sample, each column a biological variable.
    SamplesAsRows,
    /// Each row is a biological variable, each column a sample.
    #[default]
    VariablesAsRows,
}

#[derive(Debug, Clone, Copy)]
pub struct OmicsReadOptions {
    pub orientation: Orientation,
    pub separator: u8,
}

impl Default for OmicsReadOptions {
    fn default() -> Self {
        Self {
            orientation: Orientation::default(),
            separator: b',',
        }
    }
}

#[derive(Error, Debug)]
pub enum OmicsError {
    #[error("There is no omics data file at '{0}'. Please check the input path.")]
    NotFound(PathBuf),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Failed to read the omics header: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The omics file has an index column but no data columns.")]
    NoDataColumns,
    #[error("The omics file has a header but no data rows.")]
    NoRows,
    #[error("The omics header names {header} columns but {parsed} were parsed.")]
    HeaderMismatch { header: usize, parsed: usize },
    #[error("The index label in data row {row} is missing.")]
    MissingIdentifier { row: usize },
    #[error(
        "Sample column '{sample}' contains non-numeric data (found type: {found_type}). With variables as rows every sample column must be numeric."
    )]
    NonNumericSample { sample: String, found_type: String },
    #[error("Omics table has {ids} sample ids but column '{column}' holds {len} values.")]
    RaggedTable {
        ids: usize,
        column: String,
        len: usize,
    },
}

/// Samples × variables. Variable names may still repeat at this stage.
#[derive(Debug, Clone)]
pub struct OmicsTable {
    pub sample_ids: Vec<String>,
    pub columns: Vec<Column>,
}

impl OmicsTable {
    pub fn new(sample_ids: Vec<String>, columns: Vec<Column>) -> Result<Self, OmicsError> {
        if let Some(column) = columns.iter().find(|c| c.len() != sample_ids.len()) {
            return Err(OmicsError::RaggedTable {
                ids: sample_ids.len(),
                column: column.name().to_string(),
                len: column.len(),
            });
        }
        Ok(Self {
            sample_ids,
            columns,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_variables(&self) -> usize {
        self.columns.len()
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name().as_str()).collect()
    }

    /// Approximate heap size of the variable columns in bytes.
    pub fn estimated_size(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.as_materialized_series().estimated_size())
            .sum()
    }
}

pub(crate) fn is_integer_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

pub(crate) fn is_float_dtype(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Float32 | DataType::Float64)
}

/// Loads an omics table and orients it samples × variables.
pub fn load_omics_table(path: &Path, options: &OmicsReadOptions) -> Result<OmicsTable, OmicsError> {
    if !path.is_file() {
        return Err(OmicsError::NotFound(path.to_path_buf()));
    }

    log::info!("Loading omics data from '{}'", path.display());
    let header = read_raw_header(path, options.separator)?;
    if header.len() < 2 {
        return Err(OmicsError::NoDataColumns);
    }

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(options.separator)
                        .with_missing_is_null(true)
                        .with_null_values(Some(NullValues::AllColumns(
                            NA_TOKENS.iter().map(|token| (*token).into()).collect(),
                        ))),
                ),
        )
        .finish()?;

    if df.width() != header.len() {
        return Err(OmicsError::HeaderMismatch {
            header: header.len(),
            parsed: df.width(),
        });
    }
    if df.height() == 0 {
        return Err(OmicsError::NoRows);
    }

    let mut columns = df.get_columns().to_vec();
    let index = columns.remove(0);
    let labels = index_labels(&index)?;
    let mut columns = columns
        .into_iter()
        .map(numeric_if_all_missing)
        .collect::<Result<Vec<_>, _>>()?;

    let table = match options.orientation {
        Orientation::SamplesAsRows => {
            for (column, name) in columns.iter_mut().zip(&header[1..]) {
                column.rename(name.as_str().into());
            }
            OmicsTable::new(labels, columns)?
        }
        Orientation::VariablesAsRows => {
            let sample_ids = header[1..].to_vec();
            let variables = transpose_samples(&columns, &header[1..], &labels)?;
            OmicsTable::new(sample_ids, variables)?
        }
    };

    log::info!(
        "Loaded {} samples × {} biological variables ({:?}).",
        table.n_samples(),
        table.n_variables(),
        options.orientation
    );
    Ok(table)
}

fn read_raw_header(path: &Path, separator: u8) -> Result<Vec<String>, OmicsError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(true)
        .from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// The CSV reader infers a column without any value as text; such a column is
/// all-missing numeric data.
fn numeric_if_all_missing(column: Column) -> Result<Column, OmicsError> {
    let all_missing = column.null_count() == column.len();
    if all_missing && matches!(column.dtype(), DataType::String | DataType::Null) {
        log::debug!("Column '{}' has no values; reading it as Float64.", column.name());
        return Ok(column.cast(&DataType::Float64)?);
    }
    Ok(column)
}

fn index_labels(index: &Column) -> Result<Vec<String>, OmicsError> {
    let as_text = index.cast(&DataType::String)?;
    as_text
        .as_materialized_series()
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, label)| match label {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(OmicsError::MissingIdentifier { row: row + 1 }),
        })
        .collect()
}

/// Turns sample columns (one value per variable) into variable columns (one
/// value per sample). The result is integer only when every sample column is.
fn transpose_samples(
    samples: &[Column],
    sample_names: &[String],
    variables: &[String],
) -> Result<Vec<Column>, OmicsError> {
    for (column, name) in samples.iter().zip(sample_names) {
        let dtype = column.dtype();
        if !is_integer_dtype(dtype) && !is_float_dtype(dtype) {
            return Err(OmicsError::NonNumericSample {
                sample: name.clone(),
                found_type: format!("{dtype:?}"),
            });
        }
    }

    if samples.iter().all(|c| is_integer_dtype(c.dtype())) {
        let mut per_sample: Vec<Vec<Option<i64>>> = Vec::with_capacity(samples.len());
        for column in samples {
            let cast = column.cast(&DataType::Int64)?;
            per_sample.push(cast.as_materialized_series().i64()?.into_iter().collect());
        }
        Ok(build_variable_columns(&per_sample, variables))
    } else {
        let mut per_sample: Vec<Vec<Option<f64>>> = Vec::with_capacity(samples.len());
        for column in samples {
            let cast = column.cast(&DataType::Float64)?;
            per_sample.push(cast.as_materialized_series().f64()?.into_iter().collect());
        }
        Ok(build_variable_columns(&per_sample, variables))
    }
}

fn build_variable_columns<T>(per_sample: &[Vec<Option<T>>], variables: &[String]) -> Vec<Column>
where
    T: Copy,
    Series: NamedFrom<Vec<Option<T>>, [Option<T>]>,
{
    variables
        .iter()
        .enumerate()
        .map(|(v, name)| {
            let values: Vec<Option<T>> = per_sample.iter().map(|sample| sample[v]).collect();
            Column::from(Series::new(name.as_str().into(), values))
        })
        .collect()
}
