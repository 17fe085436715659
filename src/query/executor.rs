//! Query executor.
//!
//! Evaluates a [`ValidatedQuery`] over in-memory row sets in a fixed order:
//! joins, filters, grouping and aggregation, sort, then projection and limit.
//! Intermediate rows never copy values; a [`BindingRow`] holds one row index
//! per bound table slot and reads cells from the caller's row sets.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::query::analyze::{BoundFilter, BoundJoin, ColumnRef, ValidatedQuery};
use crate::query::catalog::DataType;
use crate::query::errors::{EvaluationError, QueryError, QueryValidationError};
use crate::query::model::{Aggregation, JoinType, Logic, Operator, SortOrder};
use crate::query::rows::{Record, RowSets};
use crate::query::value::{cmp_f64_total, parse_date, total_cmp, Value, ValueKey};

static NULL: Value = Value::Null;

/// Convenience alias for executor results.
pub type ExecResult<T> = Result<T, QueryError>;

/// Materialised result returned by [`Executor::execute`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    /// Output column names in order.
    pub columns: Vec<String>,
    /// Rows, each aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when no rows were produced.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Rows as name-to-value records.
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

struct OrderedRow<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for OrderedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl Serialize for QueryResult {
    /// Serialises as an array of objects whose keys keep column order.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for values in &self.rows {
            seq.serialize_element(&OrderedRow {
                columns: &self.columns,
                values,
            })?;
        }
        seq.end()
    }
}

/// Row under evaluation: one optional row index per bound slot. `None` marks a
/// null-filled side of an outer join.
#[derive(Clone, Debug)]
struct BindingRow {
    slots: Vec<Option<usize>>,
}

impl BindingRow {
    fn from_base(slots: usize, idx: usize) -> Self {
        let mut row = vec![None; slots];
        row[0] = Some(idx);
        Self { slots: row }
    }

    fn with(&self, slot: usize, idx: Option<usize>) -> Self {
        let mut next = self.clone();
        next.slots[slot] = idx;
        next
    }
}

/// Per-slot row sets resolved from the caller's alias map.
struct Sources<'a> {
    slots: Vec<&'a [Record]>,
}

impl<'a> Sources<'a> {
    fn resolve(query: &ValidatedQuery, rows: &'a RowSets) -> ExecResult<Self> {
        let slots = query
            .tables
            .iter()
            .map(|table| {
                rows.get(&table.alias).ok_or_else(|| {
                    QueryError::from(QueryValidationError::MissingRowSet {
                        alias: table.alias.clone(),
                    })
                })
            })
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(Self { slots })
    }

    fn cell(&self, row: &BindingRow, column: &ColumnRef) -> &'a Value {
        match row.slots.get(column.slot).copied().flatten() {
            Some(idx) => self.slot_cell(column.slot, idx, &column.field),
            None => &NULL,
        }
    }

    fn slot_cell(&self, slot: usize, idx: usize, field: &str) -> &'a Value {
        let rows: &'a [Record] = self.slots[slot];
        rows.get(idx)
            .and_then(|record| record.get(field))
            .unwrap_or(&NULL)
    }
}

/// Executes validated queries.
#[derive(Clone, Debug)]
pub struct Executor {
    max_join_rows: usize,
}

impl Executor {
    /// Creates an executor honouring the configured runtime guards.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_join_rows: config.max_join_rows,
        }
    }

    /// Evaluates `query` over `rows`. Fails without partial output when a
    /// row set is missing, a comparison is ill-typed, or a join grows past
    /// the configured cap.
    pub fn execute(&self, query: &ValidatedQuery, rows: &RowSets) -> ExecResult<QueryResult> {
        let sources = Sources::resolve(query, rows)?;
        let slot_count = query.tables.len();
        let mut current: Vec<BindingRow> = (0..sources.slots[0].len())
            .map(|idx| BindingRow::from_base(slot_count, idx))
            .collect();
        trace!(alias = %query.main().alias, rows = current.len(), "exec.base");

        for join in &query.joins {
            current = self.apply_join(&sources, current, join)?;
            debug!(
                join = %join.id,
                kind = join.join_type.keyword(),
                alias = %join.right.alias,
                rows = current.len(),
                "exec.join"
            );
        }

        let mut survivors = Vec::with_capacity(current.len());
        for row in current {
            if eval_filters(&sources, &row, &query.filters)? {
                survivors.push(row);
            }
        }
        debug!(rows = survivors.len(), filters = query.filters.len(), "exec.filter");

        let mut projected = if query.grouped {
            let groups = group_rows(&sources, query, &survivors)?;
            debug!(groups = groups.len(), "exec.group");
            groups
        } else {
            survivors
                .iter()
                .map(|row| {
                    query
                        .fields
                        .iter()
                        .map(|field| match &field.column {
                            Some(column) => sources.cell(row, column).clone(),
                            None => Value::Null,
                        })
                        .collect()
                })
                .collect::<Vec<Vec<Value>>>()
        };

        let sort_keys: Vec<(usize, SortOrder)> = query
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.sort_order != SortOrder::None)
            .map(|(idx, field)| (idx, field.sort_order))
            .collect();
        if !sort_keys.is_empty() {
            projected.sort_by(|a, b| compare_rows(a, b, &sort_keys));
        }
        projected.truncate(query.row_limit);

        let visible: Vec<usize> = query
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.visible)
            .map(|(idx, _)| idx)
            .collect();
        let rows = projected
            .into_iter()
            .map(|mut row| {
                visible
                    .iter()
                    .map(|&idx| std::mem::replace(&mut row[idx], Value::Null))
                    .collect()
            })
            .collect::<Vec<Vec<Value>>>();
        debug!(query = %query.name, rows = rows.len(), "exec.done");
        Ok(QueryResult {
            columns: query.columns(),
            rows,
        })
    }

    fn apply_join(
        &self,
        sources: &Sources<'_>,
        left_rows: Vec<BindingRow>,
        join: &BoundJoin,
    ) -> ExecResult<Vec<BindingRow>> {
        let slot = join.right.slot;
        let width = sources.slots.len();
        let right_len = sources.slots[slot].len();
        let matches = |left: &BindingRow, right_idx: usize| {
            sources
                .cell(left, &join.left)
                .join_matches(sources.slot_cell(slot, right_idx, &join.right.field))
        };
        let orphan = |right_idx: usize| {
            let mut row = BindingRow {
                slots: vec![None; width],
            };
            row.slots[slot] = Some(right_idx);
            row
        };
        let mut out = Vec::new();
        let push = |out: &mut Vec<BindingRow>, row: BindingRow| {
            if out.len() >= self.max_join_rows {
                return Err(QueryError::from(EvaluationError::JoinRowsExceeded {
                    alias: join.right.alias.clone(),
                    max: self.max_join_rows,
                }));
            }
            out.push(row);
            Ok(())
        };

        match join.join_type {
            JoinType::Right => {
                for right_idx in 0..right_len {
                    let mut matched = false;
                    for left in &left_rows {
                        if matches(left, right_idx) {
                            matched = true;
                            push(&mut out, left.with(slot, Some(right_idx)))?;
                        }
                    }
                    if !matched {
                        push(&mut out, orphan(right_idx))?;
                    }
                }
            }
            JoinType::Inner | JoinType::Left | JoinType::Full => {
                let mut right_matched = vec![false; right_len];
                for left in &left_rows {
                    let mut matched = false;
                    for (right_idx, seen) in right_matched.iter_mut().enumerate() {
                        if matches(left, right_idx) {
                            matched = true;
                            *seen = true;
                            push(&mut out, left.with(slot, Some(right_idx)))?;
                        }
                    }
                    if !matched && join.join_type != JoinType::Inner {
                        push(&mut out, left.with(slot, None))?;
                    }
                }
                if join.join_type == JoinType::Full {
                    for (right_idx, _) in right_matched.iter().enumerate().filter(|(_, seen)| !**seen) {
                        push(&mut out, orphan(right_idx))?;
                    }
                }
            }
        }
        Ok(out)
    }
}

fn compare_rows(a: &[Value], b: &[Value], keys: &[(usize, SortOrder)]) -> Ordering {
    for &(idx, order) in keys {
        let ord = total_cmp(&a[idx], &b[idx]);
        let ord = if order == SortOrder::Desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Left fold over the conditions with no precedence: `a AND b OR c` is
/// `(a AND b) OR c`. Every condition is evaluated so type errors surface
/// regardless of short-circuiting.
fn eval_filters(sources: &Sources<'_>, row: &BindingRow, filters: &[BoundFilter]) -> ExecResult<bool> {
    let mut result: Option<bool> = None;
    for filter in filters {
        let value = sources.cell(row, &filter.column);
        let outcome = eval_condition(filter, value)?;
        result = Some(match (result, filter.logic) {
            (None, _) => outcome,
            (Some(acc), Logic::And) => acc && outcome,
            (Some(acc), Logic::Or) => acc || outcome,
        });
    }
    Ok(result.unwrap_or(true))
}

fn eval_condition(filter: &BoundFilter, value: &Value) -> ExecResult<bool> {
    let column = &filter.column;
    match filter.operator {
        Operator::Eq => eval_eq(column, value, &filter.value),
        Operator::Ne => eval_ne(column, value, &filter.value),
        Operator::Gt => compare_with(column, value, &filter.value, CompareOrdering::is_gt),
        Operator::Lt => compare_with(column, value, &filter.value, CompareOrdering::is_lt),
        Operator::Ge => compare_with(column, value, &filter.value, CompareOrdering::is_ge),
        Operator::Le => compare_with(column, value, &filter.value, CompareOrdering::is_le),
        Operator::Like => Ok(eval_like(value, &filter.value)),
        Operator::In => eval_in(column, value, &filter.value),
        Operator::Between => eval_between(column, value, &filter.value, filter.value2.as_ref()),
    }
}

fn eval_eq(column: &ColumnRef, value: &Value, literal: &Value) -> ExecResult<bool> {
    if literal.is_null() {
        return Ok(value.is_null());
    }
    if value.is_null() {
        return Ok(false);
    }
    Ok(compare_values(column, value, literal)?.is_eq())
}

fn eval_ne(column: &ColumnRef, value: &Value, literal: &Value) -> ExecResult<bool> {
    if literal.is_null() {
        return Ok(!value.is_null());
    }
    if value.is_null() {
        return Ok(false);
    }
    Ok(!compare_values(column, value, literal)?.is_eq())
}

fn compare_with<F>(column: &ColumnRef, value: &Value, literal: &Value, predicate: F) -> ExecResult<bool>
where
    F: Fn(CompareOrdering) -> bool,
{
    if literal.is_null() || value.is_null() {
        return Ok(false);
    }
    let ord = compare_values(column, value, literal)?;
    Ok(predicate(ord))
}

fn eval_between(column: &ColumnRef, value: &Value, low: &Value, high: Option<&Value>) -> ExecResult<bool> {
    let Some(high) = high else {
        return Ok(false);
    };
    if value.is_null() || low.is_null() || high.is_null() {
        return Ok(false);
    }
    if !compare_values(column, value, low)?.is_ge() {
        return Ok(false);
    }
    Ok(compare_values(column, value, high)?.is_le())
}

fn eval_in(column: &ColumnRef, value: &Value, literal: &Value) -> ExecResult<bool> {
    let Value::List(candidates) = literal else {
        return Ok(false);
    };
    if value.is_null() {
        return Ok(false);
    }
    for candidate in candidates.iter().filter(|c| !c.is_null()) {
        if compare_values(column, value, candidate)?.is_eq() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Case-sensitive substring containment over the text form of both sides.
fn eval_like(value: &Value, pattern: &Value) -> bool {
    if value.is_null() || pattern.is_null() {
        return false;
    }
    value.to_string().contains(&pattern.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum CompareOrdering {
    Less,
    Equal,
    Greater,
}

impl From<Ordering> for CompareOrdering {
    fn from(ord: Ordering) -> Self {
        match ord {
            Ordering::Less => CompareOrdering::Less,
            Ordering::Equal => CompareOrdering::Equal,
            Ordering::Greater => CompareOrdering::Greater,
        }
    }
}

impl CompareOrdering {
    fn is_eq(self) -> bool {
        matches!(self, CompareOrdering::Equal)
    }
    fn is_lt(self) -> bool {
        matches!(self, CompareOrdering::Less)
    }
    fn is_gt(self) -> bool {
        matches!(self, CompareOrdering::Greater)
    }
    fn is_le(self) -> bool {
        matches!(self, CompareOrdering::Less | CompareOrdering::Equal)
    }
    fn is_ge(self) -> bool {
        matches!(self, CompareOrdering::Greater | CompareOrdering::Equal)
    }
}

/// Both operands coerced to the column's catalog type.
#[derive(Clone, Debug, PartialEq)]
enum ComparableValue {
    Bool(bool),
    Number(f64),
    Date(i32),
    String(String),
}

fn comparable(column: &ColumnRef, value: &Value) -> Result<ComparableValue, EvaluationError> {
    let coerced = match (column.data_type, value) {
        (DataType::Number, Value::Number(n)) => Some(ComparableValue::Number(*n)),
        (DataType::Number, Value::String(s)) => s.trim().parse().ok().map(ComparableValue::Number),
        (DataType::Date, Value::Date(d)) => Some(ComparableValue::Date(*d)),
        (DataType::Date, Value::String(s)) => parse_date(s).map(ComparableValue::Date),
        (DataType::Boolean, Value::Bool(b)) => Some(ComparableValue::Bool(*b)),
        (DataType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Some(ComparableValue::Bool(true)),
            "false" => Some(ComparableValue::Bool(false)),
            _ => None,
        },
        (DataType::String, Value::List(_)) => None,
        (DataType::String, other) => Some(ComparableValue::String(other.to_string())),
        _ => None,
    };
    coerced.ok_or_else(|| EvaluationError::TypeMismatch {
        column: column.qualified(),
        expected: column.data_type,
        found: value.type_name(),
        value: value.to_string(),
    })
}

fn compare_values(
    column: &ColumnRef,
    value: &Value,
    literal: &Value,
) -> Result<CompareOrdering, EvaluationError> {
    let left = comparable(column, value)?;
    let right = comparable(column, literal)?;
    let ord = match (&left, &right) {
        (ComparableValue::Bool(a), ComparableValue::Bool(b)) => a.cmp(b),
        (ComparableValue::Number(a), ComparableValue::Number(b)) => cmp_f64_total(*a, *b),
        (ComparableValue::Date(a), ComparableValue::Date(b)) => a.cmp(b),
        (ComparableValue::String(a), ComparableValue::String(b)) => a.cmp(b),
        _ => {
            return Err(EvaluationError::TypeMismatch {
                column: column.qualified(),
                expected: column.data_type,
                found: literal.type_name(),
                value: literal.to_string(),
            })
        }
    };
    Ok(ord.into())
}

/// Running state of one aggregated column within a partition.
#[derive(Clone, Debug)]
enum Accumulator {
    First(Value),
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Count(u64),
    Extreme { best: Value, keep: CompareOrdering },
}

impl Accumulator {
    fn new(aggregation: Aggregation) -> Self {
        match aggregation {
            Aggregation::None => Accumulator::First(Value::Null),
            Aggregation::Sum => Accumulator::Sum(0.0),
            Aggregation::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            Aggregation::Count => Accumulator::Count(0),
            Aggregation::Max => Accumulator::Extreme {
                best: Value::Null,
                keep: CompareOrdering::Greater,
            },
            Aggregation::Min => Accumulator::Extreme {
                best: Value::Null,
                keep: CompareOrdering::Less,
            },
        }
    }

    /// `column` is `None` for `count(*)`, where every row counts.
    fn update(&mut self, column: Option<&ColumnRef>, value: &Value, first: bool) -> Result<(), EvaluationError> {
        match self {
            Accumulator::First(held) => {
                if first {
                    *held = value.clone();
                }
            }
            Accumulator::Sum(total) => *total += value.as_number().unwrap_or(0.0),
            Accumulator::Avg { sum, count } => {
                if let Some(n) = value.as_number() {
                    *sum += n;
                    *count += 1;
                }
            }
            Accumulator::Count(count) => {
                if column.is_none() || !value.is_null() {
                    *count += 1;
                }
            }
            Accumulator::Extreme { best, keep } => {
                let Some(column) = column else {
                    return Ok(());
                };
                if value.is_null() {
                    return Ok(());
                }
                let replace = if best.is_null() {
                    comparable(column, value)?;
                    true
                } else {
                    compare_values(column, value, best)? == *keep
                };
                if replace {
                    *best = value.clone();
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::First(value) => value,
            Accumulator::Sum(total) => Value::Number(total),
            Accumulator::Avg { sum, count } if count > 0 => Value::Number(sum / count as f64),
            Accumulator::Avg { .. } => Value::Null,
            Accumulator::Count(count) => Value::Number(count as f64),
            Accumulator::Extreme { best, .. } => best,
        }
    }
}

/// Partitions rows by the grouping-key tuple in first-seen order and reduces
/// every field. Output rows are aligned with `query.fields`.
fn group_rows(sources: &Sources<'_>, query: &ValidatedQuery, rows: &[BindingRow]) -> ExecResult<Vec<Vec<Value>>> {
    let key_columns: Vec<&ColumnRef> = query
        .fields
        .iter()
        .filter(|field| field.group_by)
        .filter_map(|field| field.column.as_ref())
        .collect();
    let mut index: FxHashMap<Vec<ValueKey>, usize> = FxHashMap::default();
    let mut groups: Vec<Vec<Accumulator>> = Vec::new();
    for row in rows {
        let key: Vec<ValueKey> = key_columns
            .iter()
            .map(|column| sources.cell(row, column).key())
            .collect();
        let (slot, first) = match index.get(&key) {
            Some(&slot) => (slot, false),
            None => {
                index.insert(key, groups.len());
                groups.push(
                    query
                        .fields
                        .iter()
                        .map(|field| Accumulator::new(field.aggregation))
                        .collect(),
                );
                (groups.len() - 1, true)
            }
        };
        for (acc, field) in groups[slot].iter_mut().zip(&query.fields) {
            let value = match &field.column {
                Some(column) => sources.cell(row, column),
                None => &NULL,
            };
            acc.update(field.column.as_ref(), value, first)?;
        }
    }
    Ok(groups
        .into_iter()
        .map(|accs| accs.into_iter().map(Accumulator::finish).collect())
        .collect())
}
