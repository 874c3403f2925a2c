//! Filter predicate expressions for shard scans.
//!
//! Expressions are used twice during a scan:
//! - Row-group pruning using column statistics (see [`super::pruning`])
//! - Residual filtering on decoded rows
//!
//! # Design
//!
//! - Columns are addressed by name; shard files carry no field IDs
//! - Literals are owned `ScalarValue`s, so a bound query can hand over caller
//!   values without ever rendering them as text
//! - Row evaluation is three-valued: a NULL operand makes a comparison
//!   unknown, and unknown rows are dropped

use std::cmp::Ordering;
use std::fmt;

use catasto_tabular::{ColumnBatch, ScalarValue};
use regex::Regex;

/// Comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// Equal to (=)
    Eq,
    /// Not equal to (!=)
    NotEq,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    LtEq,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    GtEq,
}

impl ComparisonOp {
    /// Whether `lhs <op> rhs` holds given `lhs.cmp(rhs)`.
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::LtEq => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::GtEq => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
        }
    }
}

/// Filter expression evaluated against shard rows.
#[derive(Debug, Clone)]
pub enum Expression {
    /// Always true (no filtering)
    AlwaysTrue,
    /// Always false (no results)
    AlwaysFalse,
    /// Logical AND of multiple expressions
    And(Vec<Expression>),
    /// Comparison (=, !=, <, <=, >, >=)
    Comparison {
        column: String,
        op: ComparisonOp,
        value: ScalarValue,
    },
    /// Regular-expression search in the column's text form, like `regexp_matches`.
    Matches { column: String, pattern: Regex },
}

impl Expression {
    pub fn comparison(column: impl Into<String>, op: ComparisonOp, value: ScalarValue) -> Self {
        Expression::Comparison {
            column: column.into(),
            op,
            value,
        }
    }

    /// Create an equality comparison.
    pub fn eq(column: impl Into<String>, value: ScalarValue) -> Self {
        Self::comparison(column, ComparisonOp::Eq, value)
    }

    /// Regular-expression match. Anchor the pattern for whole-value matches.
    pub fn matches(column: impl Into<String>, pattern: Regex) -> Self {
        Expression::Matches {
            column: column.into(),
            pattern,
        }
    }

    /// Create a logical AND of expressions.
    pub fn and(exprs: Vec<Expression>) -> Self {
        // Flatten nested ANDs and filter out AlwaysTrue
        let mut flattened = Vec::new();
        for expr in exprs {
            match expr {
                Expression::AlwaysTrue => continue,
                Expression::AlwaysFalse => return Expression::AlwaysFalse,
                Expression::And(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }

        match flattened.len() {
            0 => Expression::AlwaysTrue,
            1 => flattened.pop().unwrap_or(Expression::AlwaysTrue),
            _ => Expression::And(flattened),
        }
    }

    /// Column names referenced by this expression, sorted and deduplicated.
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns.sort();
        columns.dedup();
        columns
    }

    fn collect_columns(&self, columns: &mut Vec<String>) {
        match self {
            Expression::AlwaysTrue | Expression::AlwaysFalse => {}
            Expression::And(exprs) => {
                for expr in exprs {
                    expr.collect_columns(columns);
                }
            }
            Expression::Comparison { column, .. } | Expression::Matches { column, .. } => {
                columns.push(column.clone())
            }
        }
    }

    /// Whether `row` of `batch` satisfies the expression.
    ///
    /// Unknown (NULL) results do not match. Columns missing from the batch
    /// read as NULL; scans reject unknown columns before decoding.
    pub fn evaluate(&self, batch: &ColumnBatch, row: usize) -> bool {
        self.evaluate_tri(batch, row) == Some(true)
    }

    /// SQL three-valued evaluation: `None` is UNKNOWN.
    fn evaluate_tri(&self, batch: &ColumnBatch, row: usize) -> Option<bool> {
        let value_of = |column: &str| batch.value(column, row).unwrap_or(ScalarValue::Null);

        match self {
            Expression::AlwaysTrue => Some(true),
            Expression::AlwaysFalse => Some(false),
            Expression::And(exprs) => {
                let mut result = Some(true);
                for expr in exprs {
                    match expr.evaluate_tri(batch, row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Expression::Comparison { column, op, value } => value_of(column)
                .sql_cmp(value)
                .map(|ordering| op.holds(ordering)),
            Expression::Matches { column, pattern } => value_of(column)
                .to_text()
                .map(|text| pattern.is_match(&text)),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::AlwaysTrue => write!(f, "TRUE"),
            Expression::AlwaysFalse => write!(f, "FALSE"),
            Expression::And(exprs) => {
                let parts: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(" AND "))
            }
            Expression::Comparison { column, op, value } => {
                write!(f, "{} {} {}", column, op, value)
            }
            Expression::Matches { column, pattern } => {
                write!(f, "regexp_matches({}, '{}')", column, pattern.as_str())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catasto_tabular::{BatchSchema, Column, FieldInfo, FieldType};
    use std::sync::Arc;

    fn batch() -> ColumnBatch {
        let schema = Arc::new(BatchSchema::new(vec![
            FieldInfo::new("comune", FieldType::String, true),
            FieldInfo::new("particella", FieldType::String, true),
            FieldInfo::new("x", FieldType::Int64, true),
        ]));
        ColumnBatch::new(
            schema,
            vec![
                Column::String(vec![
                    Some("H501".to_string()),
                    Some("H501".to_string()),
                    None,
                ]),
                Column::String(vec![
                    Some("45".to_string()),
                    Some("45A".to_string()),
                    Some("7".to_string()),
                ]),
                Column::Int64(vec![Some(10), None, Some(30)]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_comparison_op_holds() {
        assert!(ComparisonOp::Eq.holds(Ordering::Equal));
        assert!(ComparisonOp::NotEq.holds(Ordering::Less));
        assert!(ComparisonOp::LtEq.holds(Ordering::Equal));
        assert!(!ComparisonOp::Gt.holds(Ordering::Equal));
    }

    #[test]
    fn test_expression_and_simplification() {
        let eq = Expression::eq("comune", ScalarValue::text("H501"));
        let digits = Expression::matches("particella", Regex::new("^[0-9]+$").unwrap());

        assert!(matches!(Expression::and(vec![]), Expression::AlwaysTrue));
        assert!(matches!(
            Expression::and(vec![Expression::AlwaysTrue, eq.clone()]),
            Expression::Comparison { .. }
        ));
        assert!(matches!(
            Expression::and(vec![eq.clone(), Expression::AlwaysFalse]),
            Expression::AlwaysFalse
        ));

        let nested = Expression::and(vec![
            Expression::and(vec![eq.clone(), digits]),
            Expression::eq("foglio", ScalarValue::text("12")),
        ]);
        assert!(matches!(nested, Expression::And(ref v) if v.len() == 3));
    }

    #[test]
    fn test_referenced_columns() {
        let expr = Expression::and(vec![
            Expression::eq("comune", ScalarValue::text("H501")),
            Expression::comparison("x", ComparisonOp::Gt, ScalarValue::Int(0)),
            Expression::eq("comune", ScalarValue::text("F205")),
        ]);
        assert_eq!(expr.referenced_columns(), vec!["comune", "x"]);
    }

    #[test]
    fn test_evaluate_comparison() {
        let b = batch();
        let expr = Expression::eq("comune", ScalarValue::text("H501"));
        assert!(expr.evaluate(&b, 0));
        assert!(expr.evaluate(&b, 1));
        // NULL comune never matches.
        assert!(!expr.evaluate(&b, 2));

        let not_h501 =
            Expression::comparison("comune", ComparisonOp::NotEq, ScalarValue::text("H501"));
        assert!(!not_h501.evaluate(&b, 2));
    }

    #[test]
    fn test_evaluate_matches() {
        let b = batch();
        let digits = Expression::matches("particella", Regex::new("^[0-9]+$").unwrap());
        assert!(digits.evaluate(&b, 0));
        assert!(!digits.evaluate(&b, 1));
        assert!(digits.evaluate(&b, 2));

        // Integer columns match through their text form; NULL never does.
        let tens = Expression::matches("x", Regex::new("0$").unwrap());
        assert!(tens.evaluate(&b, 0));
        assert!(!tens.evaluate(&b, 1));
    }

    #[test]
    fn test_evaluate_and_with_unknown() {
        let b = batch();
        let expr = Expression::and(vec![
            Expression::comparison("x", ComparisonOp::Gt, ScalarValue::Int(20)),
            Expression::eq("particella", ScalarValue::text("7")),
        ]);
        assert!(!expr.evaluate(&b, 0));
        assert!(!expr.evaluate(&b, 1));
        assert!(expr.evaluate(&b, 2));
    }

    #[test]
    fn test_expression_display() {
        let expr = Expression::and(vec![
            Expression::eq("comune", ScalarValue::text("H501")),
            Expression::matches("particella", Regex::new("^[0-9]+$").unwrap()),
        ]);
        assert_eq!(
            expr.to_string(),
            "(comune = 'H501' AND regexp_matches(particella, '^[0-9]+$'))"
        );
    }
}
