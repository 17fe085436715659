//! Error taxonomy shared by validation, execution and the engine facade.
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::query::catalog::DataType;
use crate::query::model::{Aggregation, FieldId, FilterId, JoinId};

/// Structural problems found by the validation pass.
///
/// Every variant blocks both execution and text generation; callers can branch
/// on [`QueryValidationError::code`] without parsing messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryValidationError {
    /// `row_limit` must be at least one.
    #[error("row limit must be positive")]
    ZeroRowLimit,
    /// The model selects no tables.
    #[error("query selects no tables")]
    NoTables,
    /// Exactly one table must be flagged as main.
    #[error("query must have exactly one main table (found {count})")]
    MainTableCount { count: usize },
    /// Two selected tables share an alias.
    #[error("alias '{alias}' is used by more than one table")]
    DuplicateAlias { alias: String },
    /// Alias does not name a selected table.
    #[error("unknown alias '{alias}' referenced in {context}")]
    UnknownAlias { alias: String, context: &'static str },
    /// Table id is absent from the catalog.
    #[error("unknown table '{table}'")]
    UnknownTable { table: String },
    /// Field is absent from the table's catalog entry.
    #[error("unknown field '{field}' on table '{table}'")]
    UnknownField { table: String, field: String },
    /// A filter or setter named a projected field id that does not exist.
    #[error("no projected field with id {field}")]
    UnknownFieldId { field: FieldId },
    /// Two joins, fields or filters share an identifier.
    #[error("{kind} id {id} is used more than once")]
    DuplicateId { kind: &'static str, id: u32 },
    /// `(alias, field)` projected more than once.
    #[error("field '{alias}.{field}' is already projected")]
    DuplicateField { alias: String, field: String },
    /// Two visible columns resolve to the same output name.
    #[error("output column '{column}' appears more than once")]
    DuplicateColumn { column: String },
    /// Filter points at a projected field that has been removed.
    #[error("filter {filter} references removed field {field}")]
    DanglingFilterField { filter: FilterId, field: FieldId },
    /// Join lacks one of its key fields.
    #[error("join {join} between '{left}' and '{right}' is missing a key field")]
    IncompleteJoin { join: JoinId, left: String, right: String },
    /// Join reads from an alias that is not bound by the main table or an
    /// earlier join.
    #[error("join {join} reads from '{alias}' before it is joined")]
    JoinSourceNotBound { join: JoinId, alias: String },
    /// Join target is the main table or was already joined.
    #[error("join {join} targets '{alias}' which is already part of the query")]
    JoinTargetAlreadyBound { join: JoinId, alias: String },
    /// A selected table is neither main nor the target of a join.
    #[error("table '{alias}' is not joined to the main table")]
    TableNotJoined { alias: String },
    /// No visible columns remain after resolution.
    #[error("query projects no visible fields")]
    EmptyProjection,
    /// Grouped mode requires every field to be grouped or aggregated.
    #[error("field '{alias}.{field}' must be grouped or aggregated")]
    UngroupedField { alias: String, field: String },
    /// `in` needs a list operand.
    #[error("filter {filter} uses in() without a list value")]
    InRequiresList { filter: FilterId },
    /// `between` needs `value2`.
    #[error("filter {filter} uses between() without an upper bound")]
    BetweenMissingUpperBound { filter: FilterId },
    /// `*` is only meaningful as `count(*)` in grouped mode.
    #[error("'{alias}.*' may only be projected as a grouped count")]
    WildcardWithoutCount { alias: String },
    /// The caller supplied no row set for a selected alias.
    #[error("no rows supplied for alias '{alias}'")]
    MissingRowSet { alias: String },
    /// A builder step was called out of sequence.
    #[error("{0}")]
    InvalidBuilderCall(&'static str),
}

impl QueryValidationError {
    /// Builds an [`QueryValidationError::UnknownAlias`] for a specific context.
    pub fn unknown_alias(alias: impl Into<String>, context: &'static str) -> Self {
        QueryValidationError::UnknownAlias {
            alias: alias.into(),
            context,
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryValidationError::ZeroRowLimit => "ZeroRowLimit",
            QueryValidationError::NoTables => "NoTables",
            QueryValidationError::MainTableCount { .. } => "MainTableCount",
            QueryValidationError::DuplicateAlias { .. } => "DuplicateAlias",
            QueryValidationError::UnknownAlias { .. } => "UnknownAlias",
            QueryValidationError::UnknownTable { .. } => "UnknownTable",
            QueryValidationError::UnknownField { .. } => "UnknownField",
            QueryValidationError::UnknownFieldId { .. } => "UnknownField",
            QueryValidationError::DuplicateId { .. } => "DuplicateId",
            QueryValidationError::DuplicateField { .. } => "DuplicateField",
            QueryValidationError::DuplicateColumn { .. } => "DuplicateColumn",
            QueryValidationError::DanglingFilterField { .. } => "DanglingFilterField",
            QueryValidationError::IncompleteJoin { .. } => "IncompleteJoin",
            QueryValidationError::JoinSourceNotBound { .. } => "JoinSourceNotBound",
            QueryValidationError::JoinTargetAlreadyBound { .. } => "JoinTargetAlreadyBound",
            QueryValidationError::TableNotJoined { .. } => "TableNotJoined",
            QueryValidationError::EmptyProjection => "EmptyProjection",
            QueryValidationError::UngroupedField { .. } => "UngroupedField",
            QueryValidationError::InRequiresList { .. } => "InRequiresList",
            QueryValidationError::BetweenMissingUpperBound { .. } => "BetweenMissingUpperBound",
            QueryValidationError::WildcardWithoutCount { .. } => "WildcardWithoutCount",
            QueryValidationError::MissingRowSet { .. } => "MissingRowSet",
            QueryValidationError::InvalidBuilderCall(_) => "InvalidBuilderCall",
        }
    }
}

/// `sum`/`avg` requested on a field whose catalog type is not numeric.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{aggregation} requires a number field, but '{alias}.{field}' is {data_type}")]
pub struct AggregationTypeError {
    /// Owning table alias.
    pub alias: String,
    /// Offending field.
    pub field: String,
    /// Requested aggregation.
    pub aggregation: Aggregation,
    /// Catalog type of the field.
    pub data_type: DataType,
}

/// Failures raised while rows are being evaluated. Any of these aborts the
/// whole execution.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    /// A value could not be compared as the column's catalog type.
    #[error("cannot compare {found} value '{value}' as {expected} in '{column}'")]
    TypeMismatch {
        column: String,
        expected: DataType,
        found: &'static str,
        value: String,
    },
    /// An intermediate join produced more rows than allowed.
    #[error("join into '{alias}' produced more than {max} rows")]
    JoinRowsExceeded { alias: String, max: usize },
}

impl EvaluationError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            EvaluationError::TypeMismatch { .. } => "TypeMismatch",
            EvaluationError::JoinRowsExceeded { .. } => "JoinRowsExceeded",
        }
    }
}

/// Umbrella error returned by the engine entry points.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// Structural problem; nothing was executed.
    #[error(transparent)]
    Validation(#[from] QueryValidationError),
    /// Incompatible aggregation; nothing was executed.
    #[error(transparent)]
    AggregationType(#[from] AggregationTypeError),
    /// Runtime failure; no partial result was produced.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

impl QueryError {
    /// Returns a machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Validation(err) => err.code(),
            QueryError::AggregationType(_) => "AggregationType",
            QueryError::Evaluation(err) => err.code(),
        }
    }
}

/// Convenience wrapper that formats query errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_pass_through_umbrella() {
        let err = QueryError::from(QueryValidationError::ZeroRowLimit);
        assert_eq!(err.code(), "ZeroRowLimit");
        assert_eq!(QueryErrorWithCode(&err).to_string(), "[ZeroRowLimit] row limit must be positive");
    }

    #[test]
    fn aggregation_message_names_field() {
        let err = AggregationTypeError {
            alias: "c".into(),
            field: "name".into(),
            aggregation: Aggregation::Sum,
            data_type: DataType::String,
        };
        assert_eq!(
            err.to_string(),
            "sum requires a number field, but 'c.name' is string"
        );
        assert_eq!(QueryError::from(err).code(), "AggregationType");
    }
}
