//! # Memory-Footprint Reduction
//!
//! Omics matrices are wide (tens of thousands of CpG sites or transcripts), and
//! the CSV reader materialises every numeric column as a 64-bit type. This pass
//! walks the columns once and casts each numeric one to the narrowest type of a
//! fixed ladder whose range strictly contains the column's observed min and max.
//!
//! Integer ladder: `Int8` → `Int16` → `Int32` → `Int64`.
//! Float ladder:   `Float32` → `Float64`.
//!
//! Only the range is checked. Floats that fit the `Float32` range are narrowed
//! even when that rounds their mantissa, which is what the scoring models were
//! validated against.

use itertools::{Itertools, MinMaxResult};
use polars::prelude::{Column, DataType, PolarsError};
use std::fmt;
use thiserror::Error;

const BYTES_PER_MEBIBYTE: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum DowncastError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
}

/// Estimated heap size of the columns before and after the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReport {
    pub before_bytes: usize,
    pub after_bytes: usize,
}

impl MemoryReport {
    pub fn reduction_percent(&self) -> f64 {
        if self.before_bytes == 0 {
            return 0.0;
        }
        100.0 * (self.before_bytes as f64 - self.after_bytes as f64) / self.before_bytes as f64
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mem. usage decreased to {:5.2} Mb ({:.1}% reduction)",
            self.after_bytes as f64 / BYTES_PER_MEBIBYTE,
            self.reduction_percent()
        )
    }
}

/// The narrowest signed integer type strictly containing `[min, max]`, or
/// `None` when not even `Int64` does (the column then keeps its type).
pub fn narrowest_integer_type(min: i64, max: i64) -> Option<DataType> {
    let fits = |lo: i64, hi: i64| min > lo && max < hi;
    if fits(i8::MIN.into(), i8::MAX.into()) {
        Some(DataType::Int8)
    } else if fits(i16::MIN.into(), i16::MAX.into()) {
        Some(DataType::Int16)
    } else if fits(i32::MIN.into(), i32::MAX.into()) {
        Some(DataType::Int32)
    } else if fits(i64::MIN, i64::MAX) {
        Some(DataType::Int64)
    } else {
        None
    }
}

pub fn narrowest_float_type(min: f64, max: f64) -> DataType {
    if min > f64::from(f32::MIN) && max < f64::from(f32::MAX) {
        DataType::Float32
    } else {
        DataType::Float64
    }
}

/// Chooses the target type for one column, or `None` to leave it untouched.
/// Nulls and NaN are ignored when taking the range.
fn target_type(column: &Column) -> Result<Option<DataType>, DowncastError> {
    match column.dtype() {
        DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let wide = column.cast(&DataType::Int64)?;
            let range = wide.as_materialized_series().i64()?.into_iter().flatten().minmax();
            Ok(match range {
                MinMaxResult::NoElements => None,
                MinMaxResult::OneElement(v) => narrowest_integer_type(v, v),
                MinMaxResult::MinMax(lo, hi) => narrowest_integer_type(lo, hi),
            })
        }
        DataType::Float32 | DataType::Float64 => {
            let wide = column.cast(&DataType::Float64)?;
            let range = wide
                .as_materialized_series()
                .f64()?
                .into_iter()
                .flatten()
                .filter(|v| !v.is_nan())
                .minmax();
            Ok(match range {
                MinMaxResult::NoElements => None,
                MinMaxResult::OneElement(v) => Some(narrowest_float_type(v, v)),
                MinMaxResult::MinMax(lo, hi) => Some(narrowest_float_type(lo, hi)),
            })
        }
        _ => Ok(None),
    }
}

fn column_bytes(columns: &[Column]) -> usize {
    columns
        .iter()
        .map(|c| c.as_materialized_series().estimated_size())
        .sum()
}

/// Downcasts every eligible column in place and reports the size change.
pub fn reduce_memory_usage(columns: &mut [Column]) -> Result<MemoryReport, DowncastError> {
    let before_bytes = column_bytes(columns);
    let mut narrowed = 0usize;

    for column in columns.iter_mut() {
        let Some(target) = target_type(column)? else {
            continue;
        };
        if column.dtype() != &target {
            log::debug!("Casting '{}' from {:?} to {:?}", column.name(), column.dtype(), target);
            *column = column.cast(&target)?;
            narrowed += 1;
        }
    }

    let report = MemoryReport {
        before_bytes,
        after_bytes: column_bytes(columns),
    };
    log::info!("{report}");
    log::debug!("{narrowed} of {} columns changed type.", columns.len());
    Ok(report)
}
