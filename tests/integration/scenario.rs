#![allow(missing_docs)]

use std::sync::Arc;

use querykit::config::EngineConfig;
use querykit::query::{
    record, Aggregation, DataType, Engine, FieldDescriptor, InMemoryCatalog, JoinType, Logic,
    Operator, QueryBuilder, QueryModel, RowSets, SortOrder, TableDescriptor, Value,
};

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

fn rows() -> RowSets {
    RowSets::new()
        .with(
            "o",
            vec![
                record([
                    ("order_id", Value::from(1)),
                    ("customer_id", Value::from("A")),
                    ("amount", Value::from(100)),
                ]),
                record([
                    ("order_id", Value::from(2)),
                    ("customer_id", Value::from("A")),
                    ("amount", Value::from(50)),
                ]),
                record([
                    ("order_id", Value::from(3)),
                    ("customer_id", Value::from("B")),
                    ("amount", Value::from(30)),
                ]),
            ],
        )
        .with(
            "c",
            vec![
                record([("customer_id", "A"), ("name", "Alice")]),
                record([("customer_id", "B"), ("name", "Bob")]),
            ],
        )
}

fn engine() -> Engine {
    Engine::new(Arc::new(catalog()))
}

fn totals(engine: &Engine, aliased: bool) -> QueryModel {
    let builder = QueryBuilder::new("customer totals")
        .table("orders")
        .table("customers")
        .join_suggested(engine.catalog())
        .select("c", "name")
        .group_by();
    let builder = if aliased { builder.alias("name") } else { builder };
    let builder = builder.select("o", "amount").aggregate(Aggregation::Sum);
    let builder = if aliased { builder.alias("amount_sum") } else { builder };
    builder.build().expect("model")
}

#[test]
fn grouped_totals_follow_first_seen_order() {
    let engine = engine();
    let model = totals(&engine, true);
    assert_eq!(model.joins.len(), 1);
    assert_eq!(model.joins[0].join_type, JoinType::Left);

    let result = engine.execute(&model, &rows()).expect("execute");
    assert_eq!(result.columns, vec!["name", "amount_sum"]);
    assert_eq!(
        result.records(),
        vec![
            record([("name", Value::from("Alice")), ("amount_sum", Value::from(150))]),
            record([("name", Value::from("Bob")), ("amount_sum", Value::from(30))]),
        ]
    );
}

#[test]
fn default_output_names_use_alias_prefix() {
    let engine = engine();
    let result = engine.execute(&totals(&engine, false), &rows()).expect("execute");
    assert_eq!(result.columns, vec!["c_name", "o_amount_sum"]);
    assert_eq!(result.get(0, "o_amount_sum"), Some(&Value::from(150)));
}

#[test]
fn generated_text_mirrors_execution() {
    let engine = engine();
    let text = engine.generate(&totals(&engine, true)).expect("text");
    assert_eq!(text.from.table, "orders");
    assert_eq!(text.joins.len(), 1);
    assert_eq!(text.joins[0].table.alias, "c");
    assert!(text.text.starts_with("SELECT c.name AS name, SUM(o.amount) AS amount_sum FROM orders o"));
    assert!(text.text.contains("GROUP BY c.name"));
    assert!(text.text.ends_with("LIMIT 1000"));
}

#[test]
fn zero_row_limit_is_rejected() {
    let engine = engine();
    let mut model = totals(&engine, true);
    model.row_limit = 0;
    let err = engine.execute(&model, &rows()).expect_err("zero limit");
    assert_eq!(err.code(), "ZeroRowLimit");
}

#[test]
fn filters_sorting_and_limit_on_flat_rows() {
    let engine = engine();
    let model = QueryBuilder::new("big orders")
        .table("orders")
        .table("customers")
        .join_suggested(engine.catalog())
        .select("o", "order_id")
        .sort(SortOrder::Desc)
        .select("c", "name")
        .filter("o", "amount", Operator::Ge, 50)
        .filter("c", "name", Operator::Eq, "Bob")
        .filter_selected(Operator::Eq, "Bob", Logic::Or)
        .limit(1)
        .build()
        .expect("model");
    // (amount >= 50 AND name = 'Bob') OR name = 'Bob'
    let result = engine.execute(&model, &rows()).expect("execute");
    assert_eq!(result.len(), 1);
    assert_eq!(result.get(0, "o_order_id"), Some(&Value::from(3)));
}

#[test]
fn join_row_cap_aborts_execution() {
    let config = EngineConfig {
        max_join_rows: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::with_config(Arc::new(catalog()), config);
    let model = totals(&engine, true);
    let err = engine.execute(&model, &rows()).expect_err("cap");
    assert_eq!(err.code(), "JoinRowsExceeded");
}
