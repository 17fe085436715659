//! Structural validation and name resolution.
//!
//! [`validate`] checks a [`QueryModel`] against the catalog and produces a
//! [`ValidatedQuery`] in which every alias is bound to a slot, every column
//! carries its catalog type, and output names and ordering are settled. Both
//! the executor and the text generator consume the same value, which keeps
//! them structurally in step.
#![allow(missing_docs)]

use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::query::catalog::{DataType, SchemaCatalog};
use crate::query::errors::{AggregationTypeError, QueryError, QueryValidationError};
use crate::query::model::{
    Aggregation, FieldId, FilterId, FilterTarget, JoinId, JoinType, Logic, Operator, QueryModel,
    SortOrder, WILDCARD_FIELD,
};
use crate::query::value::Value;

/// Convenience alias for validation results.
pub type ValidateResult<T> = Result<T, QueryError>;

/// A selected table bound to a row slot. Slot 0 is the main table; each join
/// binds the next slot in join order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoundTable {
    pub slot: usize,
    pub alias: String,
    pub table_id: String,
}

/// Reference to one column of a bound table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    pub slot: usize,
    pub alias: String,
    pub field: String,
    pub data_type: DataType,
}

impl ColumnRef {
    /// `alias.field` label used in logs and error messages.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.field)
    }
}

/// Join with both sides resolved. `right.slot` is the slot the join binds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoundJoin {
    pub id: JoinId,
    pub join_type: JoinType,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// Resolved projected field. `column` is `None` for `count(*)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoundField {
    pub id: FieldId,
    pub alias: String,
    pub field_name: String,
    pub column: Option<ColumnRef>,
    pub output: String,
    /// Aggregation in effect; always [`Aggregation::None`] outside grouped mode.
    pub aggregation: Aggregation,
    pub visible: bool,
    pub group_by: bool,
    pub sort_order: SortOrder,
}

/// Resolved filter condition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundFilter {
    pub id: FilterId,
    pub column: ColumnRef,
    pub operator: Operator,
    pub value: Value,
    pub value2: Option<Value>,
    pub logic: Logic,
}

/// Output of [`validate`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidatedQuery {
    pub name: String,
    pub description: String,
    /// Bound tables indexed by slot.
    pub tables: Vec<BoundTable>,
    pub joins: Vec<BoundJoin>,
    /// Fields sorted by `(order, insertion)`.
    pub fields: Vec<BoundField>,
    pub filters: Vec<BoundFilter>,
    /// `true` when at least one field is a grouping key.
    pub grouped: bool,
    /// Effective limit: the model's limit capped by configuration.
    pub row_limit: usize,
}

impl ValidatedQuery {
    /// The main table.
    pub fn main(&self) -> &BoundTable {
        &self.tables[0]
    }

    /// Visible fields in output order.
    pub fn visible_fields(&self) -> impl Iterator<Item = &BoundField> {
        self.fields.iter().filter(|field| field.visible)
    }

    /// Output column names in order.
    pub fn columns(&self) -> Vec<String> {
        self.visible_fields().map(|field| field.output.clone()).collect()
    }
}

/// Validates `model` against `catalog`.
pub fn validate(
    model: &QueryModel,
    catalog: &dyn SchemaCatalog,
    config: &EngineConfig,
) -> ValidateResult<ValidatedQuery> {
    let result = Validator { model, catalog }.run(config);
    match &result {
        Ok(query) => debug!(
            query = %model.name,
            tables = query.tables.len(),
            joins = query.joins.len(),
            fields = query.fields.len(),
            filters = query.filters.len(),
            grouped = query.grouped,
            "validate.ok"
        ),
        Err(err) => debug!(query = %model.name, code = err.code(), error = %err, "validate.rejected"),
    }
    result
}

struct Validator<'a> {
    model: &'a QueryModel,
    catalog: &'a dyn SchemaCatalog,
}

impl Validator<'_> {
    fn run(&self, config: &EngineConfig) -> ValidateResult<ValidatedQuery> {
        if self.model.row_limit == 0 {
            return Err(QueryValidationError::ZeroRowLimit.into());
        }
        self.check_ids()?;
        let tables = self.bind_tables()?;
        trace!(main = %tables[0].alias, "validate.tables_bound");
        let (tables, joins) = self.bind_joins(tables)?;
        let (fields, grouped) = self.bind_fields(&tables)?;
        let filters = self.bind_filters(&tables)?;
        let row_limit = self.model.row_limit.min(config.max_row_limit) as usize;
        Ok(ValidatedQuery {
            name: self.model.name.clone(),
            description: self.model.description.clone(),
            tables,
            joins,
            fields,
            filters,
            grouped,
            row_limit: row_limit.max(1),
        })
    }

    /// Ids must be unique within joins, fields and filters; filters bind to
    /// fields by id.
    fn check_ids(&self) -> ValidateResult<()> {
        let groups: [(&'static str, Vec<u32>); 3] = [
            ("join", self.model.joins.iter().map(|j| j.id.0).collect()),
            ("field", self.model.fields.iter().map(|f| f.id.0).collect()),
            ("filter", self.model.filters.iter().map(|f| f.id.0).collect()),
        ];
        for (kind, ids) in groups {
            let mut seen = FxHashSet::default();
            if let Some(id) = ids.into_iter().find(|id| !seen.insert(*id)) {
                return Err(QueryValidationError::DuplicateId { kind, id }.into());
            }
        }
        Ok(())
    }

    /// Checks table-level invariants and binds the main table to slot 0.
    /// Remaining tables are bound by [`Self::bind_joins`].
    fn bind_tables(&self) -> ValidateResult<Vec<BoundTable>> {
        if self.model.tables.is_empty() {
            return Err(QueryValidationError::NoTables.into());
        }
        let mains = self.model.tables.iter().filter(|t| t.is_main).count();
        if mains != 1 {
            return Err(QueryValidationError::MainTableCount { count: mains }.into());
        }
        let mut seen = FxHashSet::default();
        for table in &self.model.tables {
            if !seen.insert(table.alias.as_str()) {
                return Err(QueryValidationError::DuplicateAlias {
                    alias: table.alias.clone(),
                }
                .into());
            }
            if self.catalog.table(&table.table_id).is_none() {
                return Err(QueryValidationError::UnknownTable {
                    table: table.table_id.clone(),
                }
                .into());
            }
        }
        let main = self
            .model
            .main_table()
            .ok_or(QueryValidationError::MainTableCount { count: 0 })?;
        Ok(vec![BoundTable {
            slot: 0,
            alias: main.alias.clone(),
            table_id: main.table_id.clone(),
        }])
    }

    fn bind_joins(
        &self,
        mut tables: Vec<BoundTable>,
    ) -> ValidateResult<(Vec<BoundTable>, Vec<BoundJoin>)> {
        let mut joins = Vec::with_capacity(self.model.joins.len());
        for join in &self.model.joins {
            for alias in [&join.left_alias, &join.right_alias] {
                if self.model.table(alias).is_none() {
                    return Err(QueryValidationError::unknown_alias(alias.clone(), "join").into());
                }
            }
            if join.left_field.trim().is_empty() || join.right_field.trim().is_empty() {
                return Err(QueryValidationError::IncompleteJoin {
                    join: join.id,
                    left: join.left_alias.clone(),
                    right: join.right_alias.clone(),
                }
                .into());
            }
            if !tables.iter().any(|t| t.alias == join.left_alias) {
                return Err(QueryValidationError::JoinSourceNotBound {
                    join: join.id,
                    alias: join.left_alias.clone(),
                }
                .into());
            }
            if tables.iter().any(|t| t.alias == join.right_alias) {
                return Err(QueryValidationError::JoinTargetAlreadyBound {
                    join: join.id,
                    alias: join.right_alias.clone(),
                }
                .into());
            }
            let left = self.column(&tables, &join.left_alias, &join.left_field)?;
            let right_ref = self
                .model
                .table(&join.right_alias)
                .ok_or_else(|| QueryValidationError::unknown_alias(join.right_alias.clone(), "join"))?;
            tables.push(BoundTable {
                slot: tables.len(),
                alias: right_ref.alias.clone(),
                table_id: right_ref.table_id.clone(),
            });
            let right = self.column(&tables, &join.right_alias, &join.right_field)?;
            joins.push(BoundJoin {
                id: join.id,
                join_type: join.join_type,
                left,
                right,
            });
        }
        if let Some(orphan) = self
            .model
            .tables
            .iter()
            .find(|t| !tables.iter().any(|bound| bound.alias == t.alias))
        {
            return Err(QueryValidationError::TableNotJoined {
                alias: orphan.alias.clone(),
            }
            .into());
        }
        Ok((tables, joins))
    }

    fn bind_fields(&self, tables: &[BoundTable]) -> ValidateResult<(Vec<BoundField>, bool)> {
        let grouped = self.model.fields.iter().any(|f| f.group_by);
        let mut seen = FxHashSet::default();
        let mut ordered: Vec<(i32, usize, BoundField)> = Vec::with_capacity(self.model.fields.len());
        for (idx, field) in self.model.fields.iter().enumerate() {
            if !tables.iter().any(|t| t.alias == field.table_alias) {
                return Err(
                    QueryValidationError::unknown_alias(field.table_alias.clone(), "projection").into(),
                );
            }
            if !seen.insert((field.table_alias.as_str(), field.field_name.as_str())) {
                return Err(QueryValidationError::DuplicateField {
                    alias: field.table_alias.clone(),
                    field: field.field_name.clone(),
                }
                .into());
            }
            let column = if field.field_name == WILDCARD_FIELD {
                if !grouped || field.aggregation != Aggregation::Count {
                    return Err(QueryValidationError::WildcardWithoutCount {
                        alias: field.table_alias.clone(),
                    }
                    .into());
                }
                None
            } else {
                let column = self.column(tables, &field.table_alias, &field.field_name)?;
                if field.aggregation.requires_number() && column.data_type != DataType::Number {
                    return Err(AggregationTypeError {
                        alias: field.table_alias.clone(),
                        field: field.field_name.clone(),
                        aggregation: field.aggregation,
                        data_type: column.data_type,
                    }
                    .into());
                }
                Some(column)
            };
            let aggregation = if grouped { field.aggregation } else { Aggregation::None };
            if grouped && !field.group_by && aggregation == Aggregation::None {
                return Err(QueryValidationError::UngroupedField {
                    alias: field.table_alias.clone(),
                    field: field.field_name.clone(),
                }
                .into());
            }
            ordered.push((
                field.order,
                idx,
                BoundField {
                    id: field.id,
                    alias: field.table_alias.clone(),
                    field_name: field.field_name.clone(),
                    column,
                    output: field.output_name(grouped),
                    aggregation,
                    visible: field.visible,
                    group_by: field.group_by,
                    sort_order: field.sort_order,
                },
            ));
        }
        ordered.sort_by_key(|(order, idx, _)| (*order, *idx));
        let fields: Vec<BoundField> = ordered.into_iter().map(|(_, _, field)| field).collect();

        let mut outputs = FxHashSet::default();
        for field in fields.iter().filter(|f| f.visible) {
            if !outputs.insert(field.output.as_str()) {
                return Err(QueryValidationError::DuplicateColumn {
                    column: field.output.clone(),
                }
                .into());
            }
        }
        if outputs.is_empty() {
            return Err(QueryValidationError::EmptyProjection.into());
        }
        Ok((fields, grouped))
    }

    fn bind_filters(&self, tables: &[BoundTable]) -> ValidateResult<Vec<BoundFilter>> {
        let mut filters = Vec::with_capacity(self.model.filters.len());
        for filter in &self.model.filters {
            let column = match &filter.target {
                FilterTarget::Field { field } => {
                    let projected = self.model.field(*field).ok_or(
                        QueryValidationError::DanglingFilterField {
                            filter: filter.id,
                            field: *field,
                        },
                    )?;
                    if projected.field_name == WILDCARD_FIELD {
                        return Err(QueryValidationError::UnknownField {
                            table: projected.table_alias.clone(),
                            field: projected.field_name.clone(),
                        }
                        .into());
                    }
                    self.column(tables, &projected.table_alias, &projected.field_name)?
                }
                FilterTarget::Column {
                    table_alias,
                    field_name,
                } => {
                    if !tables.iter().any(|t| &t.alias == table_alias) {
                        return Err(
                            QueryValidationError::unknown_alias(table_alias.clone(), "filter").into(),
                        );
                    }
                    self.column(tables, table_alias, field_name)?
                }
            };
            match filter.operator {
                Operator::In if !matches!(filter.value, Value::List(_)) => {
                    return Err(QueryValidationError::InRequiresList { filter: filter.id }.into());
                }
                Operator::Between if filter.value2.is_none() => {
                    return Err(
                        QueryValidationError::BetweenMissingUpperBound { filter: filter.id }.into(),
                    );
                }
                _ => {}
            }
            filters.push(BoundFilter {
                id: filter.id,
                column,
                operator: filter.operator,
                value: filter.value.clone(),
                value2: match filter.operator {
                    Operator::Between => filter.value2.clone(),
                    _ => None,
                },
                logic: filter.logic,
            });
        }
        Ok(filters)
    }

    fn column(&self, tables: &[BoundTable], alias: &str, field: &str) -> ValidateResult<ColumnRef> {
        let table = tables
            .iter()
            .find(|t| t.alias == alias)
            .ok_or_else(|| QueryValidationError::unknown_alias(alias, "column"))?;
        let descriptor = self.catalog.field(&table.table_id, field).ok_or_else(|| {
            QueryValidationError::UnknownField {
                table: table.table_id.clone(),
                field: field.to_owned(),
            }
        })?;
        Ok(ColumnRef {
            slot: table.slot,
            alias: table.alias.clone(),
            field: descriptor.name.clone(),
            data_type: descriptor.data_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::QueryBuilder;
    use crate::query::catalog::{FieldDescriptor, InMemoryCatalog, TableDescriptor};

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_table(
                TableDescriptor::new("orders")
                    .with_field(FieldDescriptor::new("order_id", DataType::Number).primary_key())
                    .with_field(
                        FieldDescriptor::new("customer_id", DataType::String)
                            .references("customers", "customer_id"),
                    )
                    .with_field(FieldDescriptor::new("amount", DataType::Number)),
            )
            .with_table(
                TableDescriptor::new("customers")
                    .with_field(FieldDescriptor::new("customer_id", DataType::String).primary_key())
                    .with_field(FieldDescriptor::new("name", DataType::String)),
            )
    }

    fn code(model: &QueryModel) -> &'static str {
        validate(model, &catalog(), &EngineConfig::default())
            .expect_err("model should be rejected")
            .code()
    }

    #[test]
    fn duplicate_field_ids_are_rejected() {
        let mut model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .select("o", "order_id")
            .build()
            .expect("model");
        model.fields[1].id = model.fields[0].id;
        assert_eq!(code(&model), "DuplicateId");
    }

    #[test]
    fn binds_slots_in_join_order() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .table("customers")
            .join_suggested(&catalog())
            .select("c", "name")
            .select("o", "amount")
            .build()
            .expect("model");
        let query = validate(&model, &catalog(), &EngineConfig::default()).expect("valid");
        assert_eq!(query.tables.len(), 2);
        assert_eq!(query.tables[1].alias, "c");
        assert_eq!(query.joins[0].right.slot, 1);
        assert_eq!(query.columns(), vec!["c_name", "o_amount"]);
        assert!(!query.grouped);
        assert_eq!(query.row_limit, 1_000);
    }

    #[test]
    fn zero_row_limit_is_structural() {
        let mut model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .build()
            .expect("model");
        model.set_row_limit(0);
        assert_eq!(code(&model), "ZeroRowLimit");
    }

    #[test]
    fn row_limit_is_capped_by_config() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .limit(500)
            .build()
            .expect("model");
        let config = EngineConfig {
            max_row_limit: 10,
            ..EngineConfig::default()
        };
        let query = validate(&model, &catalog(), &config).expect("valid");
        assert_eq!(query.row_limit, 10);
    }

    #[test]
    fn unjoined_table_is_rejected() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .table("customers")
            .select("o", "amount")
            .build()
            .expect("model");
        assert_eq!(code(&model), "TableNotJoined");
    }

    #[test]
    fn join_order_matters() {
        let mut model = QueryModel::new("q");
        let o = model.add_table("orders");
        let c = model.add_table("customers");
        let o2 = model.add_table("orders");
        model
            .add_join(&c, "customer_id", &o2, "customer_id", JoinType::Inner)
            .expect("join");
        model
            .add_join(&o, "customer_id", &c, "customer_id", JoinType::Inner)
            .expect("join");
        model.add_field(&o, "amount").expect("field");
        assert_eq!(code(&model), "JoinSourceNotBound");
    }

    #[test]
    fn joining_main_table_again_is_rejected() {
        let mut model = QueryModel::new("q");
        let o = model.add_table("orders");
        let c = model.add_table("customers");
        model
            .add_join(&o, "customer_id", &c, "customer_id", JoinType::Left)
            .expect("join");
        model
            .add_join(&c, "customer_id", &o, "customer_id", JoinType::Left)
            .expect("join");
        model.add_field(&o, "amount").expect("field");
        assert_eq!(code(&model), "JoinTargetAlreadyBound");
    }

    #[test]
    fn incomplete_and_unknown_join_fields() {
        let mut model = QueryModel::new("q");
        let o = model.add_table("orders");
        let c = model.add_table("customers");
        let join = model
            .add_join(&o, "", &c, "customer_id", JoinType::Left)
            .expect("join");
        model.add_field(&o, "amount").expect("field");
        assert_eq!(code(&model), "IncompleteJoin");

        model.remove_join(join);
        model
            .add_join(&o, "nope", &c, "customer_id", JoinType::Left)
            .expect("join");
        assert_eq!(code(&model), "UnknownField");
    }

    #[test]
    fn sum_over_text_is_an_aggregation_error() {
        let model = QueryBuilder::new("q")
            .table("customers")
            .select("c", "name")
            .aggregate(Aggregation::Sum)
            .build()
            .expect("model");
        let err = validate(&model, &catalog(), &EngineConfig::default()).expect_err("rejected");
        assert!(matches!(err, QueryError::AggregationType(_)));
    }

    #[test]
    fn grouped_mode_requires_grouped_or_aggregated_fields() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "customer_id")
            .group_by()
            .select("o", "amount")
            .build()
            .expect("model");
        assert_eq!(code(&model), "UngroupedField");
    }

    #[test]
    fn aggregation_ignored_without_grouping() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .aggregate(Aggregation::Max)
            .build()
            .expect("model");
        let query = validate(&model, &catalog(), &EngineConfig::default()).expect("valid");
        assert_eq!(query.fields[0].aggregation, Aggregation::None);
        assert_eq!(query.fields[0].output, "o_amount");
    }

    #[test]
    fn wildcard_requires_count() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "*")
            .build()
            .expect("model");
        assert_eq!(code(&model), "WildcardWithoutCount");

        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "customer_id")
            .group_by()
            .count_all("o")
            .build()
            .expect("model");
        let query = validate(&model, &catalog(), &EngineConfig::default()).expect("valid");
        assert_eq!(query.columns(), vec!["o_customer_id", "o_count"]);
        assert!(query.fields[1].column.is_none());
    }

    #[test]
    fn duplicate_output_names_are_rejected() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .alias("x")
            .select("o", "order_id")
            .alias("x")
            .build()
            .expect("model");
        assert_eq!(code(&model), "DuplicateColumn");
    }

    #[test]
    fn hidden_fields_do_not_count_as_projection() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .hidden()
            .build()
            .expect("model");
        assert_eq!(code(&model), "EmptyProjection");
    }

    #[test]
    fn fields_sort_by_order_then_insertion() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .position(5)
            .select("o", "order_id")
            .position(1)
            .select("o", "customer_id")
            .position(1)
            .build()
            .expect("model");
        let query = validate(&model, &catalog(), &EngineConfig::default()).expect("valid");
        assert_eq!(query.columns(), vec!["o_order_id", "o_customer_id", "o_amount"]);
    }

    #[test]
    fn filter_operand_shapes_are_checked() {
        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .filter("o", "amount", Operator::In, 3i64)
            .build()
            .expect("model");
        assert_eq!(code(&model), "InRequiresList");

        let model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "amount")
            .filter("o", "amount", Operator::Between, 3i64)
            .build()
            .expect("model");
        assert_eq!(code(&model), "BetweenMissingUpperBound");
    }

    #[test]
    fn dangling_filter_field_is_reported() {
        let mut model = QueryBuilder::new("q")
            .table("orders")
            .select("o", "order_id")
            .select("o", "amount")
            .filter_selected(Operator::Gt, 1i64, Logic::And)
            .build()
            .expect("model");
        let amount = model.fields[1].id;
        model.remove_field(amount);
        assert_eq!(code(&model), "DanglingFilterField");
    }

    #[test]
    fn unknown_table_is_rejected() {
        let mut model = QueryModel::new("q");
        let g = model.add_table("ghost");
        model.add_field(&g, "x").expect("field");
        assert_eq!(code(&model), "UnknownTable");
    }
}
