//! Owned scalar values read out of a column batch.
//!
//! `ScalarValue` is what predicates compare against, what query results carry,
//! and what grouping keys are made of. Comparison follows SQL conventions:
//! NULL is incomparable, integers and floats compare numerically, and a text
//! value compared with a number compares against the number's text form.

use std::cmp::Ordering;
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Text literal.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view, for arithmetic projections.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value the way it would appear in a text column.
    ///
    /// Returns `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Boolean(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// SQL-style comparison. `None` when either side is NULL or the types
    /// cannot be compared.
    pub fn sql_cmp(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Self::Text(a), Self::Text(b)) => Some(a.as_str().cmp(b.as_str())),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Bytes(b)) => Some(a.as_bytes().cmp(b.as_slice())),
            (Self::Bytes(a), Self::Text(b)) => Some(a.as_slice().cmp(b.as_bytes())),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Text(a), num @ (Self::Int(_) | Self::Float(_))) => {
                Some(a.as_str().cmp(num.to_text()?.as_str()))
            }
            (num @ (Self::Int(_) | Self::Float(_)), Self::Text(b)) => {
                Some(num.to_text()?.as_str().cmp(b.as_str()))
            }
            _ => None,
        }
    }

    /// SQL equality: NULL never equals anything.
    pub fn sql_eq(&self, other: &ScalarValue) -> bool {
        self.sql_cmp(other) == Some(Ordering::Equal)
    }

    /// Total order used for ORDER BY. NULLs sort last, as DuckDB does for
    /// ascending keys.
    pub fn sort_cmp(&self, other: &ScalarValue) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self
                .sql_cmp(other)
                .unwrap_or_else(|| self.type_rank().cmp(&other.type_rank())),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Boolean(_) => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
            Self::Bytes(_) => 3,
            Self::Null => 4,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Bytes(b) => write!(f, "bytes[{}]", b.len()),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}
