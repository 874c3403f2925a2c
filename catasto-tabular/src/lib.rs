//! Tabular column batch types for the catasto lookup workspace.
//!
//! This crate provides format-agnostic columnar batch types produced by the
//! shard reader and consumed by the query executor.
//!
//! # Design
//!
//! - **Columnar storage**: Data is stored in typed `Vec` per column, not per-row
//! - **Strongly typed**: All column access is through the `Column` enum, no `dyn Any`
//! - **Name addressed**: Shard files carry no field IDs, so column names are canonical
//! - **No Arrow**: batches stay small and cheap to build from row iterators

pub mod batch;
pub mod error;
pub mod value;

pub use batch::{BatchSchema, Column, ColumnBatch, FieldInfo, FieldType};
pub use error::{Result, TabularError};
pub use value::ScalarValue;
