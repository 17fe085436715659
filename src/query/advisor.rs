//! Join inference from foreign-key metadata.
//!
//! The advisor is a pure function of the catalog and the selected tables. It
//! never fails: tables missing from the catalog simply contribute nothing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::catalog::SchemaCatalog;
use crate::query::model::{JoinType, QueryModel, TableRef};

/// A proposed join that is not yet part of any model.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCandidate {
    /// Alias of the table declaring the foreign key.
    pub left_alias: String,
    /// Foreign-key field.
    pub left_field: String,
    /// Alias of the referenced table.
    pub right_alias: String,
    /// Referenced field.
    pub right_field: String,
    /// Always [`JoinType::Left`] for fresh suggestions.
    pub join_type: JoinType,
}

/// Proposes one join per foreign key linking an ordered pair of distinct
/// selected tables. Both directions are inspected independently and fields
/// are visited in catalog order, so the output is deterministic.
pub fn suggest_joins(catalog: &dyn SchemaCatalog, tables: &[TableRef]) -> Vec<JoinCandidate> {
    let mut candidates = Vec::new();
    for left in tables {
        let Some(left_table) = catalog.table(&left.table_id) else {
            continue;
        };
        for right in tables {
            if left.alias == right.alias {
                continue;
            }
            let Some(right_table) = catalog.table(&right.table_id) else {
                continue;
            };
            for field in &left_table.fields {
                let Some(fk) = &field.references else {
                    continue;
                };
                if fk.table_id != right.table_id || right_table.field(&fk.field_name).is_none() {
                    continue;
                }
                candidates.push(JoinCandidate {
                    left_alias: left.alias.clone(),
                    left_field: field.name.clone(),
                    right_alias: right.alias.clone(),
                    right_field: fk.field_name.clone(),
                    join_type: JoinType::Left,
                });
            }
        }
    }
    debug!(
        tables = tables.len(),
        suggestions = candidates.len(),
        "advisor.suggest_joins"
    );
    candidates
}

/// Picks, in order, the candidates that grow the set of joined aliases outward
/// from the main table without ever re-joining an alias. A candidate whose
/// referenced side is already bound is flipped so the join still reads from a
/// bound alias. Aliases already targeted by a model join count as bound.
pub fn spanning_joins(model: &QueryModel, candidates: &[JoinCandidate]) -> Vec<JoinCandidate> {
    let mut bound: Vec<String> = model
        .main_table()
        .map(|main| main.alias.clone())
        .into_iter()
        .chain(model.joins.iter().map(|join| join.right_alias.clone()))
        .collect();
    let mut picked = Vec::new();
    loop {
        let before = picked.len();
        for candidate in candidates {
            let left_bound = bound.contains(&candidate.left_alias);
            let right_bound = bound.contains(&candidate.right_alias);
            let oriented = match (left_bound, right_bound) {
                (true, false) => candidate.clone(),
                (false, true) => candidate.flipped(),
                _ => continue,
            };
            bound.push(oriented.right_alias.clone());
            picked.push(oriented);
        }
        if picked.len() == before {
            break;
        }
    }
    picked
}

impl JoinCandidate {
    /// Same equality condition read from the other side.
    pub fn flipped(&self) -> JoinCandidate {
        JoinCandidate {
            left_alias: self.right_alias.clone(),
            left_field: self.right_field.clone(),
            right_alias: self.left_alias.clone(),
            right_field: self.left_field.clone(),
            join_type: self.join_type,
        }
    }
}
