//! Fluent query builder.
//!
//! Every step operates on the most recently added table or field. The first
//! failing step latches its error; later steps become no-ops and
//! [`QueryBuilder::build`] reports it.

use crate::query::advisor::{spanning_joins, suggest_joins};
use crate::query::catalog::SchemaCatalog;
use crate::query::errors::QueryValidationError;
use crate::query::model::{
    Aggregation, FieldId, FilterTarget, JoinType, Logic, Operator, ProjectedField, QueryModel,
    SortOrder, WILDCARD_FIELD,
};
use crate::query::value::Value;

/// Fluent builder producing a [`QueryModel`].
#[derive(Debug)]
pub struct QueryBuilder {
    model: QueryModel,
    last_field: Option<FieldId>,
    error: Option<QueryValidationError>,
}

impl QueryBuilder {
    /// Creates a builder for a model with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            model: QueryModel::new(name),
            last_field: None,
            error: None,
        }
    }

    /// Continues building on top of an existing model.
    pub fn from_model(model: QueryModel) -> Self {
        Self {
            model,
            last_field: None,
            error: None,
        }
    }

    /// Sets the audit description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.model.description = description.into();
        self
    }

    /// Selects a table. The first call picks the main table.
    pub fn table(mut self, table_id: impl Into<String>) -> Self {
        if self.error.is_none() {
            self.model.add_table(table_id);
        }
        self
    }

    /// Adds an explicit join between two aliases.
    pub fn join(
        mut self,
        left: (&str, &str),
        right: (&str, &str),
        join_type: JoinType,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(err) = self.model.add_join(left.0, left.1, right.0, right.1, join_type) {
            self.error = Some(err);
        }
        self
    }

    /// Accepts the advisor's suggestions needed to connect every selected
    /// table to the main table.
    pub fn join_suggested(mut self, catalog: &dyn SchemaCatalog) -> Self {
        if self.error.is_some() {
            return self;
        }
        let candidates = suggest_joins(catalog, &self.model.tables);
        for candidate in spanning_joins(&self.model, &candidates) {
            if let Err(err) = self.model.accept_candidate(&candidate) {
                self.error = Some(err);
                break;
            }
        }
        self
    }

    /// Projects `alias.field` and makes it the target of the field setters.
    pub fn select(mut self, alias: &str, field: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.model.add_field(alias, field) {
            Ok(id) => self.last_field = Some(id),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Projects `count(*)` over `alias`.
    pub fn count_all(self, alias: &str) -> Self {
        self.select(alias, WILDCARD_FIELD)
            .aggregate(Aggregation::Count)
    }

    /// Sets the output column name of the last selected field.
    pub fn alias(self, display_alias: impl Into<String>) -> Self {
        let display_alias = display_alias.into();
        self.with_last_field("alias() requires a selected field", |field| {
            field.display_alias = Some(display_alias);
        })
    }

    /// Applies an aggregation to the last selected field.
    pub fn aggregate(self, aggregation: Aggregation) -> Self {
        self.with_last_field("aggregate() requires a selected field", |field| {
            field.aggregation = aggregation;
        })
    }

    /// Marks the last selected field as a grouping key.
    pub fn group_by(self) -> Self {
        self.with_last_field("group_by() requires a selected field", |field| {
            field.group_by = true;
        })
    }

    /// Sorts by the last selected field.
    pub fn sort(self, order: SortOrder) -> Self {
        self.with_last_field("sort() requires a selected field", |field| {
            field.sort_order = order;
        })
    }

    /// Hides the last selected field from the output.
    pub fn hidden(self) -> Self {
        self.with_last_field("hidden() requires a selected field", |field| {
            field.visible = false;
        })
    }

    /// Overrides the output position of the last selected field.
    pub fn position(self, order: i32) -> Self {
        self.with_last_field("position() requires a selected field", |field| {
            field.order = order;
        })
    }

    /// Appends an `AND` condition on a raw column.
    pub fn filter(self, alias: &str, field: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.push_filter(FilterTarget::column(alias, field), operator, value.into(), None, Logic::And)
    }

    /// Appends an `OR` condition on a raw column.
    pub fn or_filter(self, alias: &str, field: &str, operator: Operator, value: impl Into<Value>) -> Self {
        self.push_filter(FilterTarget::column(alias, field), operator, value.into(), None, Logic::Or)
    }

    /// Appends an inclusive range condition on a raw column.
    pub fn between(
        self,
        alias: &str,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
        logic: Logic,
    ) -> Self {
        self.push_filter(
            FilterTarget::column(alias, field),
            Operator::Between,
            low.into(),
            Some(high.into()),
            logic,
        )
    }

    /// Appends a condition on the last selected field.
    pub fn filter_selected(mut self, operator: Operator, value: impl Into<Value>, logic: Logic) -> Self {
        let Some(field) = self.last_field else {
            if self.error.is_none() {
                self.error = Some(QueryValidationError::InvalidBuilderCall(
                    "filter_selected() requires a selected field",
                ));
            }
            return self;
        };
        self.push_filter(FilterTarget::Field { field }, operator, value.into(), None, logic)
    }

    /// Sets the row limit (clamped by the model).
    pub fn limit(mut self, limit: u32) -> Self {
        self.model.set_row_limit(limit);
        self
    }

    /// Returns the model or the first latched error.
    pub fn build(self) -> Result<QueryModel, QueryValidationError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.model),
        }
    }

    fn push_filter(
        mut self,
        target: FilterTarget,
        operator: Operator,
        value: Value,
        value2: Option<Value>,
        logic: Logic,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(err) = self.model.add_filter(target, operator, value, value2, logic) {
            self.error = Some(err);
        }
        self
    }

    fn with_last_field<F>(mut self, misuse: &'static str, apply: F) -> Self
    where
        F: FnOnce(&mut ProjectedField),
    {
        if self.error.is_some() {
            return self;
        }
        match self.last_field.and_then(|id| self.model.field_mut(id)) {
            Some(field) => apply(field),
            None => self.error = Some(QueryValidationError::InvalidBuilderCall(misuse)),
        }
        self
    }
}
