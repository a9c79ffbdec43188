//! Williams Fractal over a centered window.
//!
//! For row `i` the window is rows `i - period ..= i + period` in order-column
//! order, truncated at either end of the table. A row is an upper fractal when
//! its value equals the window maximum and a lower fractal when it equals the
//! window minimum. Nulls and NaN never take part in the extrema and are never
//! flagged.
//!
//! Output columns `upper_fractal` / `lower_fractal` hold the row's value when
//! flagged and null otherwise.

use polars::prelude::*;

use crate::store::{Store, StoreError};

pub const UPPER_COLUMN: &str = "upper_fractal";
pub const LOWER_COLUMN: &str = "lower_fractal";

#[derive(Debug, thiserror::Error)]
pub enum FractalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("column '{column}' has non-numeric type {dtype}")]
    NonNumeric { column: String, dtype: String },

    #[error("fractal query failed: {0}")]
    Query(String),
}

/// Parameters of a fractal query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractalQuery {
    pub table: String,
    /// Window half-width.
    pub period: usize,
    pub value_column: String,
    pub order_column: String,
}

impl FractalQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            period: 2,
            value_column: "close".to_string(),
            order_column: "date".to_string(),
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = period;
        self
    }

    pub fn with_value_column(mut self, column: impl Into<String>) -> Self {
        self.value_column = column.into();
        self
    }

    pub fn with_order_column(mut self, column: impl Into<String>) -> Self {
        self.order_column = column.into();
        self
    }
}

/// Compute the fractal columns for `query.table`.
///
/// Returns every source column plus [`UPPER_COLUMN`] and [`LOWER_COLUMN`],
/// sorted ascending by the order column (stable, nulls last).
pub fn williams_fractal(store: &Store, query: &FractalQuery) -> Result<DataFrame, FractalError> {
    let df = store.read(&query.table)?;

    for column in [&query.value_column, &query.order_column] {
        if df.column(column).is_err() {
            return Err(FractalError::ColumnNotFound {
                table: query.table.clone(),
                column: column.clone(),
            });
        }
    }

    let value_dtype = df
        .column(&query.value_column)
        .map_err(query_err)?
        .dtype()
        .clone();
    if !is_numeric(&value_dtype) {
        return Err(FractalError::NonNumeric {
            column: query.value_column.clone(),
            dtype: value_dtype.to_string(),
        });
    }

    let mut sorted = df
        .sort(
            [query.order_column.as_str()],
            SortMultipleOptions::default()
                .with_nulls_last(true)
                .with_maintain_order(true),
        )
        .map_err(query_err)?;

    let values: Vec<Option<f64>> = sorted
        .column(&query.value_column)
        .map_err(query_err)?
        .cast(&DataType::Float64)
        .map_err(query_err)?
        .f64()
        .map_err(query_err)?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect();

    let (upper, lower) = fractal_flags(&values, query.period);

    sorted
        .with_column(Column::new(UPPER_COLUMN.into(), upper))
        .map_err(query_err)?;
    sorted
        .with_column(Column::new(LOWER_COLUMN.into(), lower))
        .map_err(query_err)?;

    tracing::debug!(
        table = %query.table,
        period = query.period,
        rows = sorted.height(),
        "fractals computed"
    );

    Ok(sorted)
}

/// Upper and lower fractal values for an ordered series.
///
/// Element `i` of each output is `Some(values[i])` when that value is the
/// maximum (upper) or minimum (lower) of its truncated window.
pub fn fractal_flags(
    values: &[Option<f64>],
    period: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let n = values.len();
    let mut upper = vec![None; n];
    let mut lower = vec![None; n];

    for i in 0..n {
        let Some(value) = values[i].filter(|v| !v.is_nan()) else {
            continue;
        };

        let start = i.saturating_sub(period);
        let end = i.saturating_add(period).min(n - 1);

        let mut max_val = f64::NEG_INFINITY;
        let mut min_val = f64::INFINITY;
        for v in values[start..=end].iter().flatten() {
            if v.is_nan() {
                continue;
            }
            if *v > max_val {
                max_val = *v;
            }
            if *v < min_val {
                min_val = *v;
            }
        }

        if value == max_val {
            upper[i] = Some(value);
        }
        if value == min_val {
            lower[i] = Some(value);
        }
    }

    (upper, lower)
}

fn is_numeric(dtype: &DataType) -> bool {
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
            | DataType::Float32
            | DataType::Float64
    )
}

fn query_err(e: PolarsError) -> FractalError {
    FractalError::Query(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn alternating_series_period_one() {
        let (upper, lower) = fractal_flags(&some(&[10.0, 12.0, 8.0, 15.0, 11.0]), 1);
        assert_eq!(upper, vec![None, Some(12.0), None, Some(15.0), None]);
        assert_eq!(lower, vec![Some(10.0), None, Some(8.0), None, Some(11.0)]);
    }

    #[test]
    fn flat_window_sets_both_flags() {
        let (upper, lower) = fractal_flags(&some(&[5.0, 5.0, 5.0]), 2);
        assert_eq!(upper, some(&[5.0, 5.0, 5.0]));
        assert_eq!(lower, some(&[5.0, 5.0, 5.0]));
    }

    #[test]
    fn ties_flag_every_equal_row() {
        let (upper, _) = fractal_flags(&some(&[1.0, 3.0, 3.0, 1.0]), 1);
        assert_eq!(upper, vec![None, Some(3.0), Some(3.0), None]);
    }

    #[test]
    fn nulls_and_nan_are_ignored() {
        let values = vec![Some(4.0), None, Some(f64::NAN), Some(2.0)];
        let (upper, lower) = fractal_flags(&values, 3);
        assert_eq!(upper, vec![Some(4.0), None, None, None]);
        assert_eq!(lower, vec![None, None, None, Some(2.0)]);
    }

    #[test]
    fn lone_value_between_nulls_is_both() {
        let (upper, lower) = fractal_flags(&[None, Some(7.0), None], 1);
        assert_eq!(upper, vec![None, Some(7.0), None]);
        assert_eq!(lower, vec![None, Some(7.0), None]);
    }

    #[test]
    fn empty_series() {
        let (upper, lower) = fractal_flags(&[], 2);
        assert!(upper.is_empty());
        assert!(lower.is_empty());
    }

    #[test]
    fn query_defaults() {
        let q = FractalQuery::new("USDJPY_d");
        assert_eq!(q.period, 2);
        assert_eq!(q.value_column, "close");
        assert_eq!(q.order_column, "date");

        let q = q.with_period(3).with_value_column("high").with_order_column("datetime");
        assert_eq!(
            (q.period, q.value_column.as_str(), q.order_column.as_str()),
            (3, "high", "datetime")
        );
    }

    // ── Invariants ──────────────────────────────────────────────────

    fn series() -> impl Strategy<Value = Vec<Option<f64>>> {
        prop::collection::vec(prop::option::weighted(0.85, -1000.0f64..1000.0), 0..60)
    }

    proptest! {
        #[test]
        fn flags_carry_the_row_value(values in series(), period in 0usize..6) {
            let (upper, lower) = fractal_flags(&values, period);
            prop_assert_eq!(upper.len(), values.len());
            prop_assert_eq!(lower.len(), values.len());
            for i in 0..values.len() {
                if let Some(u) = upper[i] {
                    prop_assert_eq!(Some(u), values[i]);
                }
                if let Some(l) = lower[i] {
                    prop_assert_eq!(Some(l), values[i]);
                }
            }
        }

        #[test]
        fn global_extrema_are_always_flagged(values in series(), period in 0usize..6) {
            let (upper, lower) = fractal_flags(&values, period);
            let present: Vec<(usize, f64)> = values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.map(|v| (i, v)))
                .collect();
            if let Some(&(imax, _)) = present.iter().max_by(|a, b| a.1.total_cmp(&b.1)) {
                prop_assert!(upper[imax].is_some());
            }
            if let Some(&(imin, _)) = present.iter().min_by(|a, b| a.1.total_cmp(&b.1)) {
                prop_assert!(lower[imin].is_some());
            }
        }

        #[test]
        fn zero_period_flags_every_present_value(values in series()) {
            let (upper, lower) = fractal_flags(&values, 0);
            prop_assert_eq!(&upper, &values);
            prop_assert_eq!(&lower, &values);
        }

        #[test]
        fn upper_flag_dominates_its_window(values in series(), period in 0usize..6) {
            let (upper, _) = fractal_flags(&values, period);
            for (i, flag) in upper.iter().enumerate() {
                if let Some(u) = flag {
                    let start = i.saturating_sub(period);
                    let end = (i + period).min(values.len() - 1);
                    for v in values[start..=end].iter().flatten() {
                        prop_assert!(*v <= *u);
                    }
                }
            }
        }
    }
}
