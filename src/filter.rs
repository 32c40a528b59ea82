//! Filter algebra and filter-membership index.
//!
//! Filters are AST nodes serialized as `{type, colName|filters, value|values}`:
//! - `{"type": "IN", "colName": "Sector", "values": ["Energy"]}`
//! - `{"type": "AND", "filters": [...]}`
//!
//! `add_filter` folds a new per-column filter into an existing AND-tree,
//! `extends_existing_filter` decides whether a new filter can only ever
//! select a subset of an old one, and `FilterSet` holds the matching
//! *sort-order* indices, computed either by a full scan or by narrowing the
//! previous set.

use crate::error::Result;
use crate::sort::SortIndex;
use crate::table::{Schema, Table};
use crate::value::{compare_values, values_equal, ColumnValue, Row};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A filter expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Filter {
    #[serde(rename = "EQ")]
    Eq {
        #[serde(rename = "colName")]
        column: String,
        value: ColumnValue,
    },
    #[serde(rename = "GT")]
    Gt {
        #[serde(rename = "colName")]
        column: String,
        value: ColumnValue,
    },
    #[serde(rename = "GE")]
    Ge {
        #[serde(rename = "colName")]
        column: String,
        value: ColumnValue,
    },
    #[serde(rename = "LT")]
    Lt {
        #[serde(rename = "colName")]
        column: String,
        value: ColumnValue,
    },
    #[serde(rename = "LE")]
    Le {
        #[serde(rename = "colName")]
        column: String,
        value: ColumnValue,
    },
    #[serde(rename = "STARTS_WITH")]
    StartsWith {
        #[serde(rename = "colName")]
        column: String,
        value: String,
    },
    #[serde(rename = "NOT_STARTS_WITH")]
    NotStartsWith {
        #[serde(rename = "colName")]
        column: String,
        value: String,
    },
    #[serde(rename = "IN")]
    In {
        #[serde(rename = "colName")]
        column: String,
        values: Vec<ColumnValue>,
    },
    #[serde(rename = "NOT_IN")]
    NotIn {
        #[serde(rename = "colName")]
        column: String,
        values: Vec<ColumnValue>,
    },
    #[serde(rename = "AND")]
    And { filters: Vec<Filter> },
    #[serde(rename = "OR")]
    Or { filters: Vec<Filter> },
}

impl Filter {
    pub fn is_in(column: impl Into<String>, values: Vec<ColumnValue>) -> Self {
        Filter::In {
            column: column.into(),
            values,
        }
    }

    pub fn not_in(column: impl Into<String>, values: Vec<ColumnValue>) -> Self {
        Filter::NotIn {
            column: column.into(),
            values,
        }
    }

    pub fn starts_with(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::StartsWith {
            column: column.into(),
            value: value.into(),
        }
    }

    /// The column a filter applies to. Combinators report a column only when
    /// every term applies to the same one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Filter::Eq { column, .. }
            | Filter::Gt { column, .. }
            | Filter::Ge { column, .. }
            | Filter::Lt { column, .. }
            | Filter::Le { column, .. }
            | Filter::StartsWith { column, .. }
            | Filter::NotStartsWith { column, .. }
            | Filter::In { column, .. }
            | Filter::NotIn { column, .. } => Some(column),
            Filter::And { filters } | Filter::Or { filters } => {
                let first = filters.first()?.column()?;
                filters
                    .iter()
                    .all(|f| f.column() == Some(first))
                    .then_some(first)
            }
        }
    }

    /// True when any term of the filter reads `column`
    pub fn includes_column(&self, column: &str) -> bool {
        match self {
            Filter::And { filters } | Filter::Or { filters } => {
                filters.iter().any(|f| f.includes_column(column))
            }
            other => other.column() == Some(column),
        }
    }

    /// An IN filter with no values; selects nothing
    pub fn selects_nothing(&self) -> bool {
        matches!(self, Filter::In { values, .. } if values.is_empty())
    }
}

fn union(a: &[ColumnValue], b: &[ColumnValue]) -> Vec<ColumnValue> {
    let mut out = a.to_vec();
    for v in b {
        if !out.iter().any(|existing| values_equal(existing, v)) {
            out.push(v.clone());
        }
    }
    out
}

fn difference(a: &[ColumnValue], b: &[ColumnValue]) -> Vec<ColumnValue> {
    a.iter()
        .filter(|v| !b.iter().any(|other| values_equal(v, other)))
        .cloned()
        .collect()
}

fn is_subset(a: &[ColumnValue], b: &[ColumnValue]) -> bool {
    a.iter().all(|v| b.iter().any(|other| values_equal(v, other)))
}

/// Combine two filters on the same column. None means "no filter left".
fn merge(old: &Filter, new: Filter) -> Option<Filter> {
    match (old, new) {
        (Filter::In { values: a, .. }, Filter::In { column, values: b }) => Some(Filter::In {
            values: union(a, &b),
            column,
        }),
        (Filter::In { values: a, .. }, Filter::NotIn { column, values: b }) => Some(Filter::In {
            values: difference(a, &b),
            column,
        }),
        (Filter::NotIn { values: a, .. }, Filter::In { column, values: b }) => {
            let remaining = difference(a, &b);
            (!remaining.is_empty()).then_some(Filter::NotIn {
                column,
                values: remaining,
            })
        }
        (Filter::NotIn { values: a, .. }, Filter::NotIn { column, values: b }) => {
            Some(Filter::NotIn {
                values: union(a, &b),
                column,
            })
        }
        (Filter::StartsWith { .. }, new @ Filter::StartsWith { .. }) => Some(Filter::Or {
            filters: vec![old.clone(), new],
        }),
        (Filter::Or { filters }, new @ Filter::StartsWith { .. }) => {
            let mut filters = filters.clone();
            filters.push(new);
            Some(Filter::Or { filters })
        }
        (Filter::NotStartsWith { .. }, new @ Filter::NotStartsWith { .. }) => Some(Filter::And {
            filters: vec![old.clone(), new],
        }),
        (_, new) => Some(new),
    }
}

fn fold_term(terms: &mut Vec<Filter>, term: Filter) {
    let column = term.column().map(str::to_string);
    let existing = column.as_deref().and_then(|col| {
        terms
            .iter()
            .position(|t| !matches!(t, Filter::And { .. }) && t.column() == Some(col))
    });

    match existing {
        None => terms.push(term),
        Some(idx) => {
            let old = terms.remove(idx);
            match merge(&old, term) {
                None => {}
                Some(Filter::And { filters }) => {
                    for (offset, f) in filters.into_iter().enumerate() {
                        terms.insert(idx + offset, f);
                    }
                }
                Some(merged) => terms.insert(idx, merged),
            }
        }
    }
}

fn collapse(mut terms: Vec<Filter>) -> Option<Filter> {
    match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(Filter::And { filters: terms }),
    }
}

/// Compose `new` into `existing` as a single AND-tree, merging terms on the
/// same column. Returns None when the combination cancels out.
pub fn add_filter(existing: Option<&Filter>, new: Filter) -> Option<Filter> {
    match existing {
        None => Some(new),
        Some(Filter::And { filters }) => {
            let mut terms = filters.clone();
            match new {
                Filter::And { filters: added } => {
                    for term in added {
                        fold_term(&mut terms, term);
                    }
                }
                term => fold_term(&mut terms, term),
            }
            collapse(terms)
        }
        Some(old) if old.column().is_some() && old.column() == new.column() => merge(old, new),
        Some(old) => Some(Filter::And {
            filters: vec![old.clone(), new],
        }),
    }
}

/// Drop every term that reads `column`
pub fn remove_filter_for_column(filter: &Filter, column: &str) -> Option<Filter> {
    match filter {
        Filter::And { filters } => collapse(
            filters
                .iter()
                .filter_map(|f| remove_filter_for_column(f, column))
                .collect(),
        ),
        other if other.includes_column(column) => None,
        other => Some(other.clone()),
    }
}

fn ordered(a: &ColumnValue, b: &ColumnValue) -> Ordering {
    compare_values(a, b)
}

/// True when `new` can only ever select a subset of what `old` selected, so
/// the previous result can be narrowed instead of rescanned.
pub fn extends_existing_filter(new: &Filter, old: &Filter) -> bool {
    if new == old {
        return true;
    }

    match (old, new) {
        (Filter::And { filters: old_terms }, Filter::And { filters: new_terms }) => old_terms
            .iter()
            .all(|o| new_terms.iter().any(|n| extends_existing_filter(n, o))),
        (_, Filter::And { filters }) => filters.iter().any(|n| extends_existing_filter(n, old)),
        (Filter::Or { filters }, _) if !matches!(new, Filter::Or { .. }) => {
            filters.iter().any(|o| extends_existing_filter(new, o))
        }
        (Filter::Or { filters: old_terms }, Filter::Or { filters: new_terms }) => new_terms
            .iter()
            .all(|n| old_terms.iter().any(|o| extends_existing_filter(n, o))),
        _ if old.column() != new.column() => false,
        (Filter::In { values: a, .. }, Filter::In { values: b, .. }) => is_subset(b, a),
        (Filter::In { values, .. }, Filter::Eq { value, .. }) => {
            values.iter().any(|v| values_equal(v, value))
        }
        (Filter::NotIn { values: a, .. }, Filter::NotIn { values: b, .. }) => is_subset(a, b),
        (Filter::StartsWith { value: p, .. }, Filter::StartsWith { value: q, .. }) => {
            q.to_lowercase().starts_with(&p.to_lowercase())
        }
        (Filter::NotStartsWith { value: p, .. }, Filter::NotStartsWith { value: q, .. }) => {
            p.to_lowercase().starts_with(&q.to_lowercase())
        }
        (Filter::Eq { value: a, .. }, Filter::Eq { value: b, .. }) => values_equal(a, b),
        (Filter::Gt { value: a, .. }, Filter::Gt { value: b, .. })
        | (Filter::Ge { value: a, .. }, Filter::Ge { value: b, .. })
        | (Filter::Ge { value: a, .. }, Filter::Gt { value: b, .. }) => {
            ordered(b, a) != Ordering::Less
        }
        (Filter::Gt { value: a, .. }, Filter::Ge { value: b, .. }) => {
            ordered(b, a) == Ordering::Greater
        }
        (Filter::Lt { value: a, .. }, Filter::Lt { value: b, .. })
        | (Filter::Le { value: a, .. }, Filter::Le { value: b, .. })
        | (Filter::Le { value: a, .. }, Filter::Lt { value: b, .. }) => {
            ordered(b, a) != Ordering::Greater
        }
        (Filter::Lt { value: a, .. }, Filter::Le { value: b, .. }) => {
            ordered(b, a) == Ordering::Less
        }
        _ => false,
    }
}

/// Compiled row predicate
pub type RowPredicate = Box<dyn Fn(&Row) -> bool>;

/// Turns a filter AST into a row predicate
pub trait PredicateCompiler {
    fn compile(&self, filter: &Filter, schema: &Schema) -> Result<RowPredicate>;
}

/// Default compiler: comparisons are type-aware, string prefix tests are
/// case-insensitive, NULL and NaN cells fail every comparison except the negated ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterCompiler;

impl FilterCompiler {
    fn compare(
        schema: &Schema,
        column: &str,
        value: &ColumnValue,
        accept: fn(Ordering) -> bool,
    ) -> Result<RowPredicate> {
        let idx = schema.column_index(column)?;
        let value = value.clone();
        Ok(Box::new(move |row: &Row| {
            let cell = &row[idx];
            !cell.is_null() && !cell.is_nan() && accept(compare_values(cell, &value))
        }))
    }
}

impl PredicateCompiler for FilterCompiler {
    fn compile(&self, filter: &Filter, schema: &Schema) -> Result<RowPredicate> {
        match filter {
            Filter::Eq { column, value } => {
                let idx = schema.column_index(column)?;
                let value = value.clone();
                Ok(Box::new(move |row: &Row| values_equal(&row[idx], &value)))
            }
            Filter::Gt { column, value } => {
                Self::compare(schema, column, value, |o| o == Ordering::Greater)
            }
            Filter::Ge { column, value } => {
                Self::compare(schema, column, value, |o| o != Ordering::Less)
            }
            Filter::Lt { column, value } => {
                Self::compare(schema, column, value, |o| o == Ordering::Less)
            }
            Filter::Le { column, value } => {
                Self::compare(schema, column, value, |o| o != Ordering::Greater)
            }
            Filter::StartsWith { column, value } => {
                let idx = schema.column_index(column)?;
                let prefix = value.to_lowercase();
                Ok(Box::new(move |row: &Row| {
                    !row[idx].is_null() && row[idx].to_key().to_lowercase().starts_with(&prefix)
                }))
            }
            Filter::NotStartsWith { column, value } => {
                let idx = schema.column_index(column)?;
                let prefix = value.to_lowercase();
                Ok(Box::new(move |row: &Row| {
                    row[idx].is_null() || !row[idx].to_key().to_lowercase().starts_with(&prefix)
                }))
            }
            Filter::In { column, values } => {
                let idx = schema.column_index(column)?;
                let values = values.clone();
                Ok(Box::new(move |row: &Row| {
                    values.iter().any(|v| values_equal(&row[idx], v))
                }))
            }
            Filter::NotIn { column, values } => {
                let idx = schema.column_index(column)?;
                let values = values.clone();
                Ok(Box::new(move |row: &Row| {
                    !values.iter().any(|v| values_equal(&row[idx], v))
                }))
            }
            Filter::And { filters } => {
                let parts = filters
                    .iter()
                    .map(|f| self.compile(f, schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(move |row: &Row| parts.iter().all(|p| p(row))))
            }
            Filter::Or { filters } => {
                let parts = filters
                    .iter()
                    .map(|f| self.compile(f, schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(move |row: &Row| parts.iter().any(|p| p(row))))
            }
        }
    }
}

/// A filter together with its compiled predicate
pub struct ActiveFilter {
    pub spec: Filter,
    predicate: RowPredicate,
}

impl ActiveFilter {
    pub fn compile(spec: Filter, schema: &Schema, compiler: &dyn PredicateCompiler) -> Result<Self> {
        let predicate = compiler.compile(&spec, schema)?;
        Ok(ActiveFilter { spec, predicate })
    }

    pub fn predicate(&self) -> &RowPredicate {
        &self.predicate
    }

    #[inline]
    pub fn matches(&self, row: &Row) -> bool {
        (self.predicate)(row)
    }

    pub fn matches_position(&self, table: &Table, position: usize) -> bool {
        table.row_at(position).map_or(false, |row| self.matches(row))
    }

    /// True when this filter selects a subset of what `previous` selected
    pub fn narrows(&self, previous: &ActiveFilter) -> bool {
        extends_existing_filter(&self.spec, &previous.spec)
    }
}

impl std::fmt::Debug for ActiveFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveFilter").field("spec", &self.spec).finish()
    }
}

/// Sort-order indices of the rows passing the active filter, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    indices: Vec<usize>,
}

impl FilterSet {
    /// Scan the whole sort order
    pub fn scan(sort: &SortIndex, table: &Table, predicate: &RowPredicate) -> Self {
        let indices = sort
            .positions()
            .enumerate()
            .filter(|(_, position)| table.row_at(*position).map_or(false, |row| predicate(row)))
            .map(|(idx, _)| idx)
            .collect();
        FilterSet { indices }
    }

    /// Re-test only the members of this set. Valid when the new predicate
    /// extends the one that produced this set and the sort order is unchanged.
    pub fn narrow(&self, sort: &SortIndex, table: &Table, predicate: &RowPredicate) -> Self {
        let indices = self
            .indices
            .iter()
            .copied()
            .filter(|&idx| {
                sort.position_at(idx)
                    .and_then(|position| table.row_at(position))
                    .map_or(false, |row| predicate(row))
            })
            .collect();
        FilterSet { indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Sort index at a filtered (visible) index
    #[inline]
    pub fn get(&self, visible: usize) -> Option<usize> {
        self.indices.get(visible).copied()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Visible index of a sort index, if it is a member
    pub fn visible_index_of(&self, sort_idx: usize) -> Option<usize> {
        self.indices.binary_search(&sort_idx).ok()
    }

    /// A sort-order entry was inserted at `sort_idx`; shift later members.
    /// When `member` is set, the new entry joins the set. Returns its visible index.
    pub fn on_sort_insert(&mut self, sort_idx: usize, member: bool) -> Option<usize> {
        let at = self.indices.partition_point(|&i| i < sort_idx);
        for i in &mut self.indices[at..] {
            *i += 1;
        }
        if member {
            self.indices.insert(at, sort_idx);
            Some(at)
        } else {
            None
        }
    }

    /// The sort-order entry at `sort_idx` was removed. Returns the visible
    /// index it occupied, if it was a member.
    pub fn on_sort_remove(&mut self, sort_idx: usize) -> Option<usize> {
        let at = self.indices.partition_point(|&i| i < sort_idx);
        let removed = (self.indices.get(at) == Some(&sort_idx)).then(|| self.indices.remove(at));
        for i in &mut self.indices[at..] {
            *i -= 1;
        }
        removed.map(|_| at)
    }

    /// Add an existing sort index to the set (row started matching)
    pub fn add(&mut self, sort_idx: usize) -> usize {
        match self.indices.binary_search(&sort_idx) {
            Ok(at) => at,
            Err(at) => {
                self.indices.insert(at, sort_idx);
                at
            }
        }
    }

    /// Drop an existing sort index from the set (row stopped matching)
    pub fn drop_member(&mut self, sort_idx: usize) -> Option<usize> {
        let at = self.indices.binary_search(&sort_idx).ok()?;
        self.indices.remove(at);
        Some(at)
    }
}
