//! Mutable, serializable representation of one query under construction.
//!
//! The model is owned by exactly one caller (a designer session, a CLI
//! invocation). Identifier allocation lives inside the model itself so that two
//! sessions never share counters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::advisor::JoinCandidate;
use crate::query::errors::QueryValidationError;
use crate::query::value::Value;

/// Row limit applied when the caller does not choose one.
pub const DEFAULT_ROW_LIMIT: u32 = 1_000;
/// Upper bound enforced by [`QueryModel::set_row_limit`].
pub const MAX_ROW_LIMIT: u32 = 100_000;
/// Field name standing for "every row" in a `count` projection.
pub const WILDCARD_FIELD: &str = "*";

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`Join`] within its model.
    JoinId
);
id_type!(
    /// Identifier of a [`ProjectedField`] within its model.
    FieldId
);
id_type!(
    /// Identifier of a [`FilterCondition`] within its model.
    FilterId
);

/// Join semantics applied between the accumulated rows and the joined table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Matched pairs only.
    Inner,
    /// Every accumulated row, null-filled on the right when unmatched.
    #[default]
    Left,
    /// Every right row, null-filled on the left when unmatched.
    Right,
    /// Every row from both sides.
    Full,
}

impl JoinType {
    /// SQL keyword preceding `JOIN`.
    pub fn keyword(self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
        }
    }
}

/// Aggregation applied to a projected field in grouped mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// No aggregation.
    #[default]
    None,
    /// Numeric sum.
    Sum,
    /// Numeric mean.
    Avg,
    /// Count of non-null values (or rows, for `*`).
    Count,
    /// Largest value.
    Max,
    /// Smallest value.
    Min,
}

impl Aggregation {
    /// SQL function name, `None` for [`Aggregation::None`].
    pub fn function(self) -> Option<&'static str> {
        match self {
            Aggregation::None => None,
            Aggregation::Sum => Some("SUM"),
            Aggregation::Avg => Some("AVG"),
            Aggregation::Count => Some("COUNT"),
            Aggregation::Max => Some("MAX"),
            Aggregation::Min => Some("MIN"),
        }
    }

    /// Whether the aggregation only accepts number fields.
    pub fn requires_number(self) -> bool {
        matches!(self, Aggregation::Sum | Aggregation::Avg)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aggregation::None => "none",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
        })
    }
}

/// Sort direction for a projected field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Not a sort key.
    #[default]
    None,
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Comparison operator of a filter condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equality.
    #[serde(rename = "=")]
    Eq,
    /// Inequality.
    #[serde(rename = "!=")]
    Ne,
    /// Strictly greater.
    #[serde(rename = ">")]
    Gt,
    /// Strictly less.
    #[serde(rename = "<")]
    Lt,
    /// Greater or equal.
    #[serde(rename = ">=")]
    Ge,
    /// Less or equal.
    #[serde(rename = "<=")]
    Le,
    /// Case-sensitive substring containment.
    #[serde(rename = "like")]
    Like,
    /// Membership in a literal list.
    #[serde(rename = "in")]
    In,
    /// Inclusive range between `value` and `value2`.
    #[serde(rename = "between")]
    Between,
}

/// Connective joining a condition to the running filter result.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    /// Conjunction.
    #[default]
    And,
    /// Disjunction.
    Or,
}

impl Logic {
    /// SQL keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }
}

/// A selected table instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    /// Catalog table identifier.
    pub table_id: String,
    /// Alias unique within the model.
    pub alias: String,
    /// `true` for the table every other table joins onto.
    pub is_main: bool,
}

/// Equality join between the accumulated rows and `right_alias`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    /// Identifier within the model.
    pub id: JoinId,
    /// Alias supplying the left-hand join key.
    pub left_alias: String,
    /// Left-hand key field.
    pub left_field: String,
    /// Alias of the table being joined in.
    pub right_alias: String,
    /// Right-hand key field.
    pub right_field: String,
    /// Join semantics.
    pub join_type: JoinType,
}

/// One output column.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedField {
    /// Identifier within the model.
    pub id: FieldId,
    /// Alias of the owning table.
    pub table_alias: String,
    /// Catalog field name, or `*` for `count(*)`.
    pub field_name: String,
    /// Output column name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_alias: Option<String>,
    /// Aggregation applied in grouped mode.
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Whether the column appears in results.
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Output position; ties fall back to insertion order.
    #[serde(default)]
    pub order: i32,
    /// Presentation hint, carried but unused by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Partitioning key marker.
    #[serde(default)]
    pub group_by: bool,
    /// Sort direction.
    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_visible() -> bool {
    true
}

impl ProjectedField {
    /// Output column name: the display alias, or `<alias>_<field>` with an
    /// `_<aggregation>` suffix when the field is aggregated in grouped mode.
    pub fn output_name(&self, grouped: bool) -> String {
        if let Some(alias) = self.display_alias.as_deref().filter(|a| !a.trim().is_empty()) {
            return alias.to_owned();
        }
        let aggregated = grouped && self.aggregation != Aggregation::None;
        match (self.field_name == WILDCARD_FIELD, aggregated) {
            (true, true) => format!("{}_{}", self.table_alias, self.aggregation),
            (true, false) => format!("{}_all", self.table_alias),
            (false, true) => format!("{}_{}_{}", self.table_alias, self.field_name, self.aggregation),
            (false, false) => format!("{}_{}", self.table_alias, self.field_name),
        }
    }
}

/// What a filter condition inspects.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterTarget {
    /// A projected field, by id.
    Field {
        /// Referenced projected field.
        field: FieldId,
    },
    /// A raw table column that need not be projected.
    #[serde(rename_all = "camelCase")]
    Column {
        /// Owning table alias.
        table_alias: String,
        /// Catalog field name.
        field_name: String,
    },
}

impl FilterTarget {
    /// Targets a raw column.
    pub fn column(table_alias: impl Into<String>, field_name: impl Into<String>) -> Self {
        FilterTarget::Column {
            table_alias: table_alias.into(),
            field_name: field_name.into(),
        }
    }
}

/// One predicate of the left-folded filter chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    /// Identifier within the model.
    pub id: FilterId,
    /// Inspected column.
    pub target: FilterTarget,
    /// Comparison operator.
    pub operator: Operator,
    /// Operand; a list for `in`.
    pub value: Value,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
    /// Connective to the running result; ignored on the first condition.
    #[serde(default)]
    pub logic: Logic,
}

/// Aggregate of everything one query needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryModel {
    /// Name recorded in audit history.
    pub name: String,
    /// Description recorded in audit history.
    #[serde(default)]
    pub description: String,
    /// Selected tables; the main table comes first unless reordered by removal.
    #[serde(default)]
    pub tables: Vec<TableRef>,
    /// Joins, applied in order.
    #[serde(default)]
    pub joins: Vec<Join>,
    /// Projected fields in insertion order.
    #[serde(default)]
    pub fields: Vec<ProjectedField>,
    /// Filter conditions, folded left to right.
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    /// Maximum number of result rows.
    #[serde(default = "default_row_limit")]
    pub row_limit: u32,
    #[serde(default)]
    next_id: u32,
}

fn default_row_limit() -> u32 {
    DEFAULT_ROW_LIMIT
}

impl QueryModel {
    /// Creates an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tables: Vec::new(),
            joins: Vec::new(),
            fields: Vec::new(),
            filters: Vec::new(),
            row_limit: DEFAULT_ROW_LIMIT,
            next_id: 0,
        }
    }

    /// The main table, if any table is selected.
    pub fn main_table(&self) -> Option<&TableRef> {
        self.tables.iter().find(|table| table.is_main)
    }

    /// Looks up a selected table by alias.
    pub fn table(&self, alias: &str) -> Option<&TableRef> {
        self.tables.iter().find(|table| table.alias == alias)
    }

    /// Looks up a projected field.
    pub fn field(&self, id: FieldId) -> Option<&ProjectedField> {
        self.fields.iter().find(|field| field.id == id)
    }

    /// Mutable access to a projected field for setters.
    pub fn field_mut(&mut self, id: FieldId) -> Option<&mut ProjectedField> {
        self.fields.iter_mut().find(|field| field.id == id)
    }

    /// Looks up a join.
    pub fn join(&self, id: JoinId) -> Option<&Join> {
        self.joins.iter().find(|join| join.id == id)
    }

    /// Looks up a filter condition.
    pub fn filter(&self, id: FilterId) -> Option<&FilterCondition> {
        self.filters.iter().find(|filter| filter.id == id)
    }

    /// Selects a table and returns its generated alias. The first selected
    /// table becomes the main table.
    pub fn add_table(&mut self, table_id: impl Into<String>) -> String {
        let table_id = table_id.into();
        let alias = self.next_alias(&table_id);
        let is_main = self.main_table().is_none();
        self.tables.push(TableRef {
            table_id,
            alias: alias.clone(),
            is_main,
        });
        alias
    }

    /// Removes a table and everything referencing its alias. When the main
    /// table goes, the first remaining table is promoted.
    pub fn remove_table(&mut self, alias: &str) -> Result<TableRef, QueryValidationError> {
        let pos = self
            .tables
            .iter()
            .position(|table| table.alias == alias)
            .ok_or_else(|| QueryValidationError::unknown_alias(alias, "table removal"))?;
        let removed = self.tables.remove(pos);
        self.joins
            .retain(|join| join.left_alias != alias && join.right_alias != alias);
        let dropped: Vec<FieldId> = self
            .fields
            .iter()
            .filter(|field| field.table_alias == alias)
            .map(|field| field.id)
            .collect();
        self.fields.retain(|field| field.table_alias != alias);
        self.filters.retain(|filter| match &filter.target {
            FilterTarget::Field { field } => !dropped.contains(field),
            FilterTarget::Column { table_alias, .. } => table_alias != alias,
        });
        if removed.is_main {
            if let Some(first) = self.tables.first_mut() {
                first.is_main = true;
            }
        }
        Ok(removed)
    }

    /// Adds a join between two selected aliases.
    pub fn add_join(
        &mut self,
        left_alias: &str,
        left_field: &str,
        right_alias: &str,
        right_field: &str,
        join_type: JoinType,
    ) -> Result<JoinId, QueryValidationError> {
        self.require_alias(left_alias, "join")?;
        self.require_alias(right_alias, "join")?;
        let id = JoinId(self.allocate_id());
        self.joins.push(Join {
            id,
            left_alias: left_alias.to_owned(),
            left_field: left_field.to_owned(),
            right_alias: right_alias.to_owned(),
            right_field: right_field.to_owned(),
            join_type,
        });
        Ok(id)
    }

    /// Removes a join, returning it when it existed.
    pub fn remove_join(&mut self, id: JoinId) -> Option<Join> {
        let pos = self.joins.iter().position(|join| join.id == id)?;
        Some(self.joins.remove(pos))
    }

    /// Changes the semantics of an existing join.
    pub fn set_join_type(&mut self, id: JoinId, join_type: JoinType) -> bool {
        match self.joins.iter_mut().find(|join| join.id == id) {
            Some(join) => {
                join.join_type = join_type;
                true
            }
            None => false,
        }
    }

    /// Appends an advisor suggestion as a regular join.
    pub fn accept_candidate(&mut self, candidate: &JoinCandidate) -> Result<JoinId, QueryValidationError> {
        self.add_join(
            &candidate.left_alias,
            &candidate.left_field,
            &candidate.right_alias,
            &candidate.right_field,
            candidate.join_type,
        )
    }

    /// Projects `alias.field`. Each pair may be projected once.
    pub fn add_field(&mut self, alias: &str, field_name: &str) -> Result<FieldId, QueryValidationError> {
        self.require_alias(alias, "projection")?;
        if self
            .fields
            .iter()
            .any(|field| field.table_alias == alias && field.field_name == field_name)
        {
            return Err(QueryValidationError::DuplicateField {
                alias: alias.to_owned(),
                field: field_name.to_owned(),
            });
        }
        let order = self
            .fields
            .iter()
            .map(|field| field.order.saturating_add(1))
            .max()
            .unwrap_or(0);
        let id = FieldId(self.allocate_id());
        self.fields.push(ProjectedField {
            id,
            table_alias: alias.to_owned(),
            field_name: field_name.to_owned(),
            display_alias: None,
            aggregation: Aggregation::None,
            visible: true,
            order,
            width: None,
            group_by: false,
            sort_order: SortOrder::None,
        });
        Ok(id)
    }

    /// Removes a projected field. Filters pointing at it are left in place and
    /// reported by validation.
    pub fn remove_field(&mut self, id: FieldId) -> Option<ProjectedField> {
        let pos = self.fields.iter().position(|field| field.id == id)?;
        Some(self.fields.remove(pos))
    }

    /// Appends a filter condition.
    pub fn add_filter(
        &mut self,
        target: FilterTarget,
        operator: Operator,
        value: Value,
        value2: Option<Value>,
        logic: Logic,
    ) -> Result<FilterId, QueryValidationError> {
        match &target {
            FilterTarget::Field { field } => {
                if self.field(*field).is_none() {
                    return Err(QueryValidationError::UnknownFieldId { field: *field });
                }
            }
            FilterTarget::Column { table_alias, .. } => self.require_alias(table_alias, "filter")?,
        }
        let id = FilterId(self.allocate_id());
        self.filters.push(FilterCondition {
            id,
            target,
            operator,
            value,
            value2,
            logic,
        });
        Ok(id)
    }

    /// Removes a filter condition.
    pub fn remove_filter(&mut self, id: FilterId) -> Option<FilterCondition> {
        let pos = self.filters.iter().position(|filter| filter.id == id)?;
        Some(self.filters.remove(pos))
    }

    /// Sets the row limit, clamped to [`MAX_ROW_LIMIT`]. Zero is stored as-is
    /// and rejected by validation.
    pub fn set_row_limit(&mut self, limit: u32) {
        self.row_limit = limit.min(MAX_ROW_LIMIT);
    }

    fn require_alias(&self, alias: &str, context: &'static str) -> Result<(), QueryValidationError> {
        if self.table(alias).is_some() {
            Ok(())
        } else {
            Err(QueryValidationError::unknown_alias(alias, context))
        }
    }

    /// Next id above both the stored counter and every id already present,
    /// so models deserialized without `nextId` never reuse an id.
    fn allocate_id(&mut self) -> u32 {
        let highest = self
            .joins
            .iter()
            .map(|join| join.id.0)
            .chain(self.fields.iter().map(|field| field.id.0))
            .chain(self.filters.iter().map(|filter| filter.id.0))
            .fold(self.next_id, u32::max);
        self.next_id = highest.saturating_add(1);
        self.next_id
    }

    fn next_alias(&self, table_id: &str) -> String {
        let base = table_id
            .chars()
            .find(char::is_ascii_alphanumeric)
            .filter(char::is_ascii_alphabetic)
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or('t')
            .to_string();
        if self.table(&base).is_none() {
            return base;
        }
        (1u32..)
            .map(|suffix| format!("{base}{suffix}"))
            .find(|candidate| self.table(candidate).is_none())
            .unwrap_or(base)
    }
}
