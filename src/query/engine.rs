//! Facade tying validation, execution, text generation and history together.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::query::advisor::{suggest_joins, JoinCandidate};
use crate::query::analyze::{validate, ValidatedQuery};
use crate::query::audit::AuditRecord;
use crate::query::catalog::SchemaCatalog;
use crate::query::errors::QueryError;
use crate::query::executor::{Executor, QueryResult};
use crate::query::generator::{self, QueryText};
use crate::query::model::QueryModel;
use crate::query::rows::RowSets;

/// Shared catalog handle.
pub type SharedCatalog = Arc<dyn SchemaCatalog + Send + Sync>;

/// Everything produced by [`Engine::run`].
#[derive(Debug)]
pub struct RunReport {
    /// Generated text, or the preview when validation failed.
    pub text: String,
    /// Rows, or the first error encountered.
    pub outcome: Result<QueryResult, QueryError>,
    /// History entry for this run.
    pub audit: AuditRecord,
}

/// Stateless query engine over one catalog.
#[derive(Clone)]
pub struct Engine {
    catalog: SharedCatalog,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with default limits.
    pub fn new(catalog: SharedCatalog) -> Self {
        Self::with_config(catalog, EngineConfig::default())
    }

    /// Creates an engine with explicit limits.
    pub fn with_config(catalog: SharedCatalog, config: EngineConfig) -> Self {
        Self { catalog, config }
    }

    /// Catalog in use.
    pub fn catalog(&self) -> &dyn SchemaCatalog {
        self.catalog.as_ref()
    }

    /// Limits in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Join candidates for the model's current tables.
    pub fn suggest_joins(&self, model: &QueryModel) -> Vec<JoinCandidate> {
        suggest_joins(self.catalog(), &model.tables)
    }

    /// Validates `model`.
    pub fn validate(&self, model: &QueryModel) -> Result<ValidatedQuery, QueryError> {
        validate(model, self.catalog(), &self.config)
    }

    /// Validates and executes `model` over `rows`.
    pub fn execute(&self, model: &QueryModel, rows: &RowSets) -> Result<QueryResult, QueryError> {
        let query = self.validate(model)?;
        Executor::new(&self.config).execute(&query, rows)
    }

    /// Validates and renders `model`.
    pub fn generate(&self, model: &QueryModel) -> Result<QueryText, QueryError> {
        Ok(generator::generate(&self.validate(model)?))
    }

    /// Renders `model` without validating it.
    pub fn preview(&self, model: &QueryModel) -> String {
        generator::preview(model)
    }

    /// Validates, renders and executes `model`, producing an audit record
    /// whatever the outcome.
    pub fn run(&self, model: &QueryModel, rows: &RowSets) -> RunReport {
        let query = match self.validate(model) {
            Ok(query) => query,
            Err(err) => {
                let text = generator::preview(model);
                warn!(query = %model.name, code = err.code(), "query rejected");
                let audit = AuditRecord::failure(model, text.clone(), None, &err);
                return RunReport {
                    text,
                    outcome: Err(err),
                    audit,
                };
            }
        };

        let rendered = generator::generate(&query);
        let outcome = Executor::new(&self.config).execute(&query, rows);
        let audit = match &outcome {
            Ok(result) => {
                info!(query = %model.name, rows = result.len(), "query executed");
                AuditRecord::success(model, rendered.text.clone(), rendered.fingerprint, result.len())
            }
            Err(err) => {
                warn!(query = %model.name, code = err.code(), "query failed during evaluation");
                AuditRecord::failure(model, rendered.text.clone(), Some(rendered.fingerprint), err)
            }
        };
        RunReport {
            text: rendered.text,
            outcome,
            audit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::QueryBuilder;
    use crate::query::catalog::{DataType, FieldDescriptor, InMemoryCatalog, TableDescriptor};
    use crate::query::model::{Aggregation, JoinType};
    use crate::query::rows::record;
    use crate::query::value::Value;

    fn engine() -> Engine {
        let catalog = InMemoryCatalog::new()
            .with_table(
                TableDescriptor::new("customers")
                    .with_field(FieldDescriptor::new("id", DataType::Number).primary_key())
                    .with_field(FieldDescriptor::new("name", DataType::String)),
            )
            .with_table(
                TableDescriptor::new("orders")
                    .with_field(FieldDescriptor::new("id", DataType::Number).primary_key())
                    .with_field(FieldDescriptor::new("customer_id", DataType::Number).references("customers", "id"))
                    .with_field(FieldDescriptor::new("amount", DataType::Number)),
            );
        Engine::new(Arc::new(catalog))
    }

    fn rows() -> RowSets {
        RowSets::new()
            .with(
                "c",
                vec![
                    record([("id", Value::from(1)), ("name", Value::from("Alice"))]),
                    record([("id", Value::from(2)), ("name", Value::from("Bob"))]),
                ],
            )
            .with(
                "o",
                vec![
                    record([("id", Value::from(10)), ("customer_id", Value::from(1)), ("amount", Value::from(100))]),
                    record([("id", Value::from(11)), ("customer_id", Value::from(1)), ("amount", Value::from(50))]),
                    record([("id", Value::from(12)), ("customer_id", Value::from(2)), ("amount", Value::from(30))]),
                ],
            )
    }

    fn grouped_model(engine: &Engine) -> QueryModel {
        QueryBuilder::new("totals")
            .table("customers")
            .table("orders")
            .join_suggested(engine.catalog())
            .select("c", "name")
            .group_by()
            .select("o", "amount")
            .aggregate(Aggregation::Sum)
            .build()
            .expect("model")
    }

    #[test]
    fn run_success_records_fingerprint_and_count() {
        let engine = engine();
        let model = grouped_model(&engine);
        let report = engine.run(&model, &rows());
        let result = report.outcome.expect("rows");
        assert_eq!(result.len(), 2);
        assert!(report.audit.succeeded());
        assert_eq!(report.audit.record_count, 2);
        let text = engine.generate(&model).expect("text");
        assert_eq!(report.audit.fingerprint, Some(text.fingerprint));
        assert_eq!(report.text, text.text);
    }

    #[test]
    fn run_failure_still_audits_preview() {
        let engine = engine();
        let mut model = grouped_model(&engine);
        model.row_limit = 0;
        let report = engine.run(&model, &rows());
        assert_eq!(report.outcome.expect_err("rejected").code(), "ZeroRowLimit");
        assert!(!report.audit.succeeded());
        assert_eq!(report.audit.text, engine.preview(&model));
        assert!(report.audit.fingerprint.is_none());
    }

    #[test]
    fn suggestions_cover_selected_tables() {
        let engine = engine();
        let mut model = QueryModel::new("s");
        model.add_table("customers");
        model.add_table("orders");
        let candidates = engine.suggest_joins(&model);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].join_type, JoinType::Left);
    }
}
