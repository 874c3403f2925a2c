//! Row-group pruning from Parquet column statistics.
//!
//! Pruning is conservative: a row group is skipped only when its min/max
//! statistics prove that no row can satisfy the filter. Missing statistics
//! and unsupported column types keep the group, as do regex matches.

use parquet::basic::Type as PhysicalType;
use parquet::file::metadata::{ColumnChunkMetaData, RowGroupMetaData};

use catasto_tabular::ScalarValue;

use super::predicate::{ComparisonOp, Expression};

/// Min/max bounds of one column chunk.
#[derive(Debug, Clone, PartialEq)]
struct ColumnBounds {
    min: ScalarValue,
    max: ScalarValue,
}

impl Expression {
    /// Whether any row of the row group could satisfy this expression.
    pub fn can_match_row_group(&self, row_group: &RowGroupMetaData) -> bool {
        if row_group.num_rows() == 0 {
            return false;
        }

        match self {
            Expression::AlwaysTrue => true,
            Expression::AlwaysFalse => false,
            Expression::And(exprs) => exprs.iter().all(|e| e.can_match_row_group(row_group)),
            Expression::Comparison { column, op, value } => {
                match column_bounds(row_group, column) {
                    Some(bounds) => bounds_can_match(&bounds, *op, value),
                    None => true,
                }
            }
            Expression::Matches { .. } => true,
        }
    }
}

fn bounds_can_match(bounds: &ColumnBounds, op: ComparisonOp, value: &ScalarValue) -> bool {
    use std::cmp::Ordering::*;

    // Numeric bounds say nothing about the text ordering a text literal
    // is compared under.
    if bounds.min.as_f64().is_some() && value.as_f64().is_none() {
        return true;
    }

    let (Some(min_cmp), Some(max_cmp)) = (bounds.min.sql_cmp(value), bounds.max.sql_cmp(value))
    else {
        // Incomparable types: cannot reason about the range.
        return true;
    };

    match op {
        ComparisonOp::Eq => min_cmp != Greater && max_cmp != Less,
        ComparisonOp::NotEq => !(min_cmp == Equal && max_cmp == Equal),
        ComparisonOp::Lt => min_cmp == Less,
        ComparisonOp::LtEq => min_cmp != Greater,
        ComparisonOp::Gt => max_cmp == Greater,
        ComparisonOp::GtEq => max_cmp != Less,
    }
}

/// Find the chunk of a top-level column by name.
fn find_column<'a>(row_group: &'a RowGroupMetaData, name: &str) -> Option<&'a ColumnChunkMetaData> {
    row_group.columns().iter().find(|c| {
        let parts = c.column_path().parts();
        parts.len() == 1 && parts[0] == name
    })
}

fn column_bounds(row_group: &RowGroupMetaData, name: &str) -> Option<ColumnBounds> {
    let chunk = find_column(row_group, name)?;
    let stats = chunk.statistics()?;
    let min = stats.min_bytes_opt()?;
    let max = stats.max_bytes_opt()?;

    match chunk.column_type() {
        PhysicalType::INT32 => Some(ColumnBounds {
            min: ScalarValue::Int(i32::from_le_bytes(min.try_into().ok()?) as i64),
            max: ScalarValue::Int(i32::from_le_bytes(max.try_into().ok()?) as i64),
        }),
        PhysicalType::INT64 => Some(ColumnBounds {
            min: ScalarValue::Int(i64::from_le_bytes(min.try_into().ok()?)),
            max: ScalarValue::Int(i64::from_le_bytes(max.try_into().ok()?)),
        }),
        // Legacy writers ordered byte arrays as signed bytes; those bounds
        // do not match text ordering.
        PhysicalType::BYTE_ARRAY if !stats.is_min_max_deprecated() => Some(ColumnBounds {
            min: ScalarValue::Bytes(min.to_vec()),
            max: ScalarValue::Bytes(max.to_vec()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(min: i64, max: i64) -> ColumnBounds {
        ColumnBounds {
            min: ScalarValue::Int(min),
            max: ScalarValue::Int(max),
        }
    }

    fn text_bounds(min: &str, max: &str) -> ColumnBounds {
        ColumnBounds {
            min: ScalarValue::Bytes(min.as_bytes().to_vec()),
            max: ScalarValue::Bytes(max.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_eq_bounds() {
        let b = bounds(10, 20);
        assert!(bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::Int(10)));
        assert!(bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::Int(20)));
        assert!(!bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::Int(9)));
        assert!(!bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::Int(21)));
    }

    #[test]
    fn test_range_bounds() {
        let b = bounds(10, 20);
        assert!(!bounds_can_match(&b, ComparisonOp::Lt, &ScalarValue::Int(10)));
        assert!(bounds_can_match(&b, ComparisonOp::LtEq, &ScalarValue::Int(10)));
        assert!(!bounds_can_match(&b, ComparisonOp::Gt, &ScalarValue::Int(20)));
        assert!(bounds_can_match(&b, ComparisonOp::GtEq, &ScalarValue::Int(20)));
        assert!(!bounds_can_match(&bounds(5, 5), ComparisonOp::NotEq, &ScalarValue::Int(5)));
    }

    #[test]
    fn test_text_bounds() {
        let b = text_bounds("F205", "H501");
        assert!(bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::text("G999")));
        assert!(!bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::text("L219")));
        assert!(!bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::text("A001")));
    }

    #[test]
    fn test_incomparable_literal_keeps_group() {
        let b = text_bounds("1", "9");
        assert!(bounds_can_match(&b, ComparisonOp::Eq, &ScalarValue::Int(100)));

        // "10" sorts before "5" as text even though 10 lies inside [5, 20].
        assert!(bounds_can_match(&bounds(5, 20), ComparisonOp::Eq, &ScalarValue::text("10")));
    }
}
