//! Canonical query text.
//!
//! [`generate`] renders a validated query and returns the table and join
//! clauses alongside the text so callers can compare structure without
//! parsing. [`preview`] renders any model, complete or not, for display while
//! the model is still being edited.

use std::hash::Hasher;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::query::analyze::{BoundField, ValidatedQuery};
use crate::query::catalog::DataType;
use crate::query::model::{
    Aggregation, FilterTarget, JoinType, Logic, Operator, ProjectedField, QueryModel, SortOrder,
    WILDCARD_FIELD,
};
use crate::query::value::{format_date, format_number, Value};

/// `FROM` clause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableClause {
    /// Catalog table id.
    pub table: String,
    /// Alias within the query.
    pub alias: String,
}

/// One `JOIN` clause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JoinClause {
    /// Join semantics.
    pub join_type: JoinType,
    /// Joined table.
    pub table: TableClause,
    /// Left key as `alias.field`.
    pub left: String,
    /// Right key as `alias.field`.
    pub right: String,
}

/// Generated text plus the structure it was rendered from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryText {
    /// Single-line query text.
    pub text: String,
    /// Main table.
    pub from: TableClause,
    /// Joins in application order.
    pub joins: Vec<JoinClause>,
    /// xxh64 over the tables, joins and text.
    pub fingerprint: u64,
}

/// Renders a validated query.
pub fn generate(query: &ValidatedQuery) -> QueryText {
    let main = query.main();
    let from = TableClause {
        table: main.table_id.clone(),
        alias: main.alias.clone(),
    };
    let joins: Vec<JoinClause> = query
        .joins
        .iter()
        .map(|join| JoinClause {
            join_type: join.join_type,
            table: TableClause {
                table: query.tables[join.right.slot].table_id.clone(),
                alias: join.right.alias.clone(),
            },
            left: join.left.qualified(),
            right: join.right.qualified(),
        })
        .collect();

    let mut clauses = Clauses::new(&from);
    clauses.select = query
        .visible_fields()
        .map(|field| format!("{} AS {}", field_expr(field, query.grouped), ident(&field.output)))
        .collect();
    clauses.joins = query
        .joins
        .iter()
        .zip(&joins)
        .map(|(bound, clause)| {
            format!(
                "{} JOIN {} {} ON {} = {}",
                clause.join_type.keyword(),
                ident(&clause.table.table),
                ident(&clause.table.alias),
                qualified(&bound.left.alias, &bound.left.field),
                qualified(&bound.right.alias, &bound.right.field),
            )
        })
        .collect();
    for filter in &query.filters {
        let column = qualified(&filter.column.alias, &filter.column.field);
        clauses.push_condition(
            filter.logic,
            condition(
                &column,
                filter.operator,
                &filter.value,
                filter.value2.as_ref(),
                Some(filter.column.data_type),
            ),
        );
    }
    if query.grouped {
        clauses.group_by = query
            .fields
            .iter()
            .filter(|field| field.group_by)
            .map(|field| field_expr(field, false))
            .collect();
    }
    clauses.order_by = query
        .fields
        .iter()
        .filter_map(|field| {
            direction(field.sort_order).map(|dir| format!("{} {dir}", field_expr(field, query.grouped)))
        })
        .collect();
    clauses.limit = query.row_limit as u64;

    let text = clauses.render();
    let fingerprint = fingerprint(&from, &joins, &text);
    QueryText {
        text,
        from,
        joins,
        fingerprint,
    }
}

/// Renders any model without validating it. Unknown references are printed
/// as written, a join missing a key renders as a comment, and a model with no
/// visible fields selects `*`.
pub fn preview(model: &QueryModel) -> String {
    let Some(main) = model.main_table().or_else(|| model.tables.first()) else {
        return "/* no tables selected */".to_owned();
    };
    let from = TableClause {
        table: main.table_id.clone(),
        alias: main.alias.clone(),
    };
    let grouped = model.fields.iter().any(|f| f.group_by);
    let mut fields: Vec<(usize, &ProjectedField)> = model.fields.iter().enumerate().collect();
    fields.sort_by_key(|(idx, field)| (field.order, *idx));

    let mut clauses = Clauses::new(&from);
    clauses.select = fields
        .iter()
        .filter(|(_, field)| field.visible)
        .map(|(_, field)| {
            let expr = raw_expr(&field.table_alias, &field.field_name, field.aggregation, grouped);
            format!("{expr} AS {}", ident(&field.output_name(grouped)))
        })
        .collect();
    clauses.joins = model
        .joins
        .iter()
        .map(|join| {
            if join.left_field.trim().is_empty() || join.right_field.trim().is_empty() {
                return format!(
                    "/* incomplete join: {} -> {} */",
                    join.left_alias, join.right_alias
                );
            }
            let table = model
                .table(&join.right_alias)
                .map_or(join.right_alias.as_str(), |t| t.table_id.as_str());
            format!(
                "{} JOIN {} {} ON {} = {}",
                join.join_type.keyword(),
                ident(table),
                ident(&join.right_alias),
                qualified(&join.left_alias, &join.left_field),
                qualified(&join.right_alias, &join.right_field),
            )
        })
        .collect();
    for filter in &model.filters {
        let column = match &filter.target {
            FilterTarget::Field { field } => match model.field(*field) {
                Some(f) => qualified(&f.table_alias, &f.field_name),
                None => format!("/* removed field {field} */"),
            },
            FilterTarget::Column {
                table_alias,
                field_name,
            } => qualified(table_alias, field_name),
        };
        clauses.push_condition(
            filter.logic,
            condition(&column, filter.operator, &filter.value, filter.value2.as_ref(), None),
        );
    }
    if grouped {
        clauses.group_by = fields
            .iter()
            .filter(|(_, field)| field.group_by)
            .map(|(_, field)| raw_expr(&field.table_alias, &field.field_name, Aggregation::None, false))
            .collect();
    }
    clauses.order_by = fields
        .iter()
        .filter_map(|(_, field)| {
            direction(field.sort_order).map(|dir| {
                let expr = raw_expr(&field.table_alias, &field.field_name, field.aggregation, grouped);
                format!("{expr} {dir}")
            })
        })
        .collect();
    clauses.limit = u64::from(model.row_limit);
    clauses.render()
}

/// Clause lists shared by [`generate`] and [`preview`].
struct Clauses {
    select: Vec<String>,
    from: String,
    joins: Vec<String>,
    condition: Option<(String, Option<Logic>)>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: u64,
}

impl Clauses {
    fn new(from: &TableClause) -> Self {
        Self {
            select: Vec::new(),
            from: format!("{} {}", ident(&from.table), ident(&from.alias)),
            joins: Vec::new(),
            condition: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: 0,
        }
    }

    /// Extends the left-folded WHERE expression. The running expression is
    /// parenthesised whenever the connective changes so that SQL precedence
    /// reproduces the fold.
    fn push_condition(&mut self, logic: Logic, rendered: String) {
        self.condition = Some(match self.condition.take() {
            None => (rendered, None),
            Some((acc, previous)) => {
                let acc = match previous {
                    Some(prev) if prev != logic => format!("({acc})"),
                    _ => acc,
                };
                (format!("{acc} {} {rendered}", logic.keyword()), Some(logic))
            }
        });
    }

    fn render(self) -> String {
        let mut out = String::from("SELECT ");
        if self.select.is_empty() {
            out.push('*');
        } else {
            out.push_str(&self.select.join(", "));
        }
        out.push_str(" FROM ");
        out.push_str(&self.from);
        for join in &self.joins {
            out.push(' ');
            out.push_str(join);
        }
        if let Some((condition, _)) = &self.condition {
            out.push_str(" WHERE ");
            out.push_str(condition);
        }
        if !self.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            out.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            out.push_str(" ORDER BY ");
            out.push_str(&self.order_by.join(", "));
        }
        out.push_str(&format!(" LIMIT {}", self.limit));
        out
    }
}

fn field_expr(field: &BoundField, grouped: bool) -> String {
    raw_expr(&field.alias, &field.field_name, field.aggregation, grouped)
}

fn raw_expr(alias: &str, field: &str, aggregation: Aggregation, grouped: bool) -> String {
    let column = if field == WILDCARD_FIELD {
        "*".to_owned()
    } else {
        qualified(alias, field)
    };
    match aggregation.function() {
        Some(function) if grouped => format!("{function}({column})"),
        _ => column,
    }
}

fn direction(order: SortOrder) -> Option<&'static str> {
    match order {
        SortOrder::None => None,
        SortOrder::Asc => Some("ASC"),
        SortOrder::Desc => Some("DESC"),
    }
}

fn condition(
    column: &str,
    operator: Operator,
    value: &Value,
    value2: Option<&Value>,
    data_type: Option<DataType>,
) -> String {
    let lit = |v: &Value| literal(v, data_type);
    match operator {
        Operator::Eq if value.is_null() => format!("{column} IS NULL"),
        Operator::Ne if value.is_null() => format!("{column} IS NOT NULL"),
        Operator::Eq => format!("{column} = {}", lit(value)),
        Operator::Ne => format!("{column} <> {}", lit(value)),
        Operator::Gt => format!("{column} > {}", lit(value)),
        Operator::Lt => format!("{column} < {}", lit(value)),
        Operator::Ge => format!("{column} >= {}", lit(value)),
        Operator::Le => format!("{column} <= {}", lit(value)),
        Operator::Like => format!(
            "{column} LIKE {} ESCAPE '\\'",
            quote(&format!("%{}%", escape_like(&value.to_string())))
        ),
        Operator::In => match value {
            Value::List(items) => format!(
                "{column} IN ({})",
                items.iter().map(|v| lit(v)).collect::<Vec<_>>().join(", ")
            ),
            other => format!("{column} IN ({})", lit(other)),
        },
        Operator::Between => format!(
            "{column} BETWEEN {} AND {}",
            lit(value),
            value2.map_or_else(|| "NULL".to_owned(), |v| lit(v))
        ),
    }
}

/// Renders a literal, typed by the column when known so that text and
/// execution coerce the same way.
fn literal(value: &Value, data_type: Option<DataType>) -> String {
    match (value, data_type) {
        (Value::Null, _) => "NULL".to_owned(),
        (Value::String(s), Some(DataType::Number)) if s.trim().parse::<f64>().is_ok() => {
            s.trim().to_owned()
        }
        (Value::String(s), Some(DataType::Boolean)) if matches!(s.trim(), "true" | "false") => {
            s.trim().to_ascii_uppercase()
        }
        (Value::Bool(_) | Value::Number(_) | Value::Date(_), Some(DataType::String)) => {
            quote(&value.to_string())
        }
        (Value::Bool(b), _) => if *b { "TRUE" } else { "FALSE" }.to_owned(),
        (Value::Number(n), _) => format_number(*n),
        (Value::String(s), _) => quote(s),
        (Value::Date(d), _) => format!("DATE {}", quote(&format_date(*d))),
        (Value::List(items), _) => format!(
            "({})",
            items.iter().map(|v| literal(v, data_type)).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Makes `%`, `_` and the escape character itself match literally.
fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn ident(name: &str) -> String {
    let simple = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_owned()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn qualified(alias: &str, field: &str) -> String {
    format!("{}.{}", ident(alias), ident(field))
}

fn fingerprint(from: &TableClause, joins: &[JoinClause], text: &str) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.write(from.table.as_bytes());
    hasher.write(from.alias.as_bytes());
    hasher.write_u64(joins.len() as u64);
    for join in joins {
        hasher.write(join.join_type.keyword().as_bytes());
        hasher.write(join.table.table.as_bytes());
        hasher.write(join.table.alias.as_bytes());
        hasher.write(join.left.as_bytes());
        hasher.write(join.right.as_bytes());
    }
    hasher.write(text.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::query::analyze::validate;
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
                    .with_field(FieldDescriptor::new("amount", DataType::Number))
                    .with_field(FieldDescriptor::new("placed", DataType::Date)),
            )
            .with_table(
                TableDescriptor::new("customers")
                    .with_field(FieldDescriptor::new("customer_id", DataType::String).primary_key())
                    .with_field(FieldDescriptor::new("name", DataType::String))
                    .with_field(FieldDescriptor::new("first name", DataType::String)),
            )
    }

    fn render(builder: QueryBuilder) -> QueryText {
        let model = builder.build().expect("model");
        let query = validate(&model, &catalog(), &EngineConfig::default()).expect("valid");
        generate(&query)
    }

    #[test]
    fn grouped_query_renders_every_clause() {
        let text = render(
            QueryBuilder::new("q")
                .table("orders")
                .table("customers")
                .join_suggested(&catalog())
                .select("c", "name")
                .group_by()
                .sort(SortOrder::Asc)
                .select("o", "amount")
                .aggregate(Aggregation::Sum)
                .alias("amount_sum")
                .filter("o", "amount", Operator::Gt, 10i64)
                .limit(50),
        );
        assert_eq!(
            text.text,
            "SELECT c.name AS c_name, SUM(o.amount) AS amount_sum FROM orders o \
             LEFT JOIN customers c ON o.customer_id = c.customer_id \
             WHERE o.amount > 10 GROUP BY c.name ORDER BY c.name ASC LIMIT 50"
        );
        assert_eq!(
            text.from,
            TableClause {
                table: "orders".into(),
                alias: "o".into()
            }
        );
        assert_eq!(text.joins.len(), 1);
        assert_eq!(text.joins[0].left, "o.customer_id");
    }

    #[test]
    fn aggregation_syntax_requires_grouping() {
        let text = render(
            QueryBuilder::new("q")
                .table("orders")
                .select("o", "amount")
                .aggregate(Aggregation::Sum),
        );
        assert_eq!(text.text, "SELECT o.amount AS o_amount FROM orders o LIMIT 1000");
    }

    #[test]
    fn mixed_connectives_are_parenthesised_as_a_fold() {
        let text = render(
            QueryBuilder::new("q")
                .table("orders")
                .select("o", "order_id")
                .filter("o", "order_id", Operator::Eq, 1i64)
                .or_filter("o", "order_id", Operator::Eq, 2i64)
                .filter("o", "amount", Operator::Lt, 60i64)
                .filter("o", "amount", Operator::Ne, Value::Null),
        );
        assert!(text.text.contains(
            "WHERE (o.order_id = 1 OR o.order_id = 2) AND o.amount < 60 AND o.amount IS NOT NULL"
        ));
    }

    #[test]
    fn literals_and_identifiers_are_escaped() {
        let text = render(
            QueryBuilder::new("q")
                .table("customers")
                .select("c", "first name")
                .alias("it's")
                .filter("c", "name", Operator::Like, "O'Br")
                .filter("c", "customer_id", Operator::In, vec![Value::from("A"), Value::from("B")]),
        );
        assert_eq!(
            text.text,
            "SELECT c.\"first name\" AS \"it's\" FROM customers c \
             WHERE c.name LIKE '%O''Br%' ESCAPE '\\' AND c.customer_id IN ('A', 'B') LIMIT 1000"
        );
    }

    #[test]
    fn like_wildcards_match_literally() {
        let text = render(
            QueryBuilder::new("q")
                .table("customers")
                .select("c", "name")
                .filter("c", "name", Operator::Like, r"5%_a\b"),
        );
        assert!(
            text.text.ends_with(r"WHERE c.name LIKE '%5\%\_a\\b%' ESCAPE '\' LIMIT 1000"),
            "{}",
            text.text
        );
    }

    #[test]
    fn typed_literals_follow_column_type() {
        let text = render(
            QueryBuilder::new("q")
                .table("orders")
                .select("o", "order_id")
                .filter("o", "amount", Operator::Ge, "9")
                .between(
                    "o",
                    "placed",
                    Value::date("2024-01-01").expect("date"),
                    "2024-12-31",
                    Logic::And,
                ),
        );
        assert!(text.text.contains("o.amount >= 9 AND"));
        assert!(text.text.contains("BETWEEN DATE '2024-01-01' AND '2024-12-31'"));
    }

    #[test]
    fn fingerprint_tracks_structure() {
        let a = render(QueryBuilder::new("q").table("orders").select("o", "amount"));
        let b = render(QueryBuilder::new("other name").table("orders").select("o", "amount"));
        let c = render(QueryBuilder::new("q").table("orders").select("o", "order_id"));
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn preview_tolerates_incomplete_models() {
        let mut model = QueryModel::new("draft");
        assert_eq!(preview(&model), "/* no tables selected */");
        let o = model.add_table("orders");
        let c = model.add_table("customers");
        model
            .add_join(&o, "customer_id", &c, "", JoinType::Inner)
            .expect("join");
        assert_eq!(
            preview(&model),
            "SELECT * FROM orders o /* incomplete join: o -> c */ LIMIT 1000"
        );
        let id = model.add_field(&o, "amount").expect("field");
        model
            .add_filter(FilterTarget::Field { field: id }, Operator::Gt, 5i64.into(), None, Logic::And)
            .expect("filter");
        model.remove_field(id);
        assert!(preview(&model).contains("WHERE /* removed field"));
    }
}
