//! Read queries over the row store and row-level result patches.
//!
//! Subscribed queries are re-run after every committed write; callers are
//! told only what changed between the previous and the current result.

use rowsync_core::{Value, IS_DELETED};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::schema::ID_COLUMN;

/// A row: column name to value, always including `id`.
pub type Row = BTreeMap<String, Value>;

/// A query against a single table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: String,
    /// Column equality filters, all of which must match.
    pub filter: Vec<(String, Value)>,
    /// Include rows flagged `isDeleted`.
    pub include_deleted: bool,
    /// Sort column; rows are ordered by `id` when unset.
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Vec::new(),
            include_deleted: false,
            order_by: None,
            descending: false,
            limit: None,
            offset: None,
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push((column.into(), value.into()));
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(column.into());
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Stable identity used to cache results.
    pub fn key(&self) -> String {
        format!("{:?}", self)
    }

    /// Evaluate the query against the rows of its table.
    pub fn run<'a>(&self, rows: impl IntoIterator<Item = &'a Row>) -> Vec<Row> {
        let mut result: Vec<Row> = rows
            .into_iter()
            .filter(|row| {
                self.include_deleted || !row.get(IS_DELETED).is_some_and(Value::is_true)
            })
            .filter(|row| {
                self.filter
                    .iter()
                    .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
            })
            .cloned()
            .collect();

        let column = self.order_by.as_deref().unwrap_or(ID_COLUMN);
        result.sort_by(|a, b| {
            let ordering = compare_values(
                a.get(column).unwrap_or(&Value::Null),
                b.get(column).unwrap_or(&Value::Null),
            )
            .then_with(|| {
                compare_values(
                    a.get(ID_COLUMN).unwrap_or(&Value::Null),
                    b.get(ID_COLUMN).unwrap_or(&Value::Null),
                )
            });
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        result
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Sort order across value kinds: null, numbers, text, blobs.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }

    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Integer(x), Value::Real(y)) => (*x as f64).total_cmp(y),
        (Value::Real(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Value::Real(x), Value::Real(y)) => x.total_cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// A change to a query result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Patch {
    ReplaceAll { value: Vec<Row> },
    ReplaceAt { index: usize, value: Row },
}

/// Patches for one query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPatches {
    pub query: Query,
    pub patches: Vec<Patch>,
}

/// Describe how `next` differs from `previous`.
///
/// The first result for a query, or a change in length, replaces everything;
/// otherwise each changed position is replaced individually.
pub fn make_patches(previous: Option<&[Row]>, next: &[Row]) -> Vec<Patch> {
    let Some(previous) = previous else {
        return vec![Patch::ReplaceAll {
            value: next.to_vec(),
        }];
    };
    if previous.len() != next.len() {
        return vec![Patch::ReplaceAll {
            value: next.to_vec(),
        }];
    }
    previous
        .iter()
        .zip(next)
        .enumerate()
        .filter(|(_, (before, after))| before != after)
        .map(|(index, (_, after))| Patch::ReplaceAt {
            index,
            value: after.clone(),
        })
        .collect()
}
