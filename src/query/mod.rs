#![forbid(unsafe_code)]

//! Ad-hoc multi-table query model, join advisor, executor and text generator.
//!
//! A [`QueryModel`] is assembled by hand or with [`QueryBuilder`], checked by
//! [`validate`] against a [`SchemaCatalog`], and then either evaluated by the
//! [`Executor`] over in-memory [`RowSets`] or rendered by [`generate`].
//! [`Engine`] bundles those steps and emits an [`AuditRecord`] per run.

/// Join suggestions derived from foreign keys.
pub mod advisor;

/// Validation and name resolution.
pub mod analyze;

/// Execution history entries.
pub mod audit;

/// Fluent construction of query models.
pub mod builder;

/// Table and field metadata.
pub mod catalog;

/// Facade over validation, execution and rendering.
pub mod engine;

/// Error types and codes.
pub mod errors;

/// In-memory evaluation.
pub mod executor;

/// Canonical query text.
pub mod generator;

/// The editable query model.
pub mod model;

/// Row sets and file loaders.
pub mod rows;

/// Scalar values.
pub mod value;

pub use advisor::{spanning_joins, suggest_joins, JoinCandidate};
pub use analyze::{validate, ValidatedQuery};
pub use audit::{AuditRecord, AuditStatus};
pub use builder::QueryBuilder;
pub use catalog::{DataType, FieldDescriptor, ForeignKeyRef, InMemoryCatalog, SchemaCatalog, TableDescriptor};
pub use engine::{Engine, RunReport, SharedCatalog};
pub use errors::{
    AggregationTypeError, EvaluationError, QueryError, QueryErrorWithCode, QueryValidationError,
};
pub use executor::{Executor, QueryResult};
pub use generator::{generate, preview, QueryText};
pub use model::{
    Aggregation, FieldId, FilterCondition, FilterId, FilterTarget, Join, JoinId, JoinType, Logic,
    Operator, ProjectedField, QueryModel, SortOrder, TableRef,
};
pub use rows::{load_tables, record, LoadError, Record, RowSets, TableRows};
pub use value::Value;
