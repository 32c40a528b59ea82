/// LiveGrid sort order index
///
/// `SortIndex` keeps the current permutation of table positions as a vector
/// of `SortEntry`, each caching up to three sort-key values. Changes to the
/// sort request are classified into a `SortTransition` so that predictable
/// reshapes avoid a full resort:
///
/// - `Extend`: one trailing column added; only the new key is fetched
/// - `Reverse`: same columns with every direction flipped; O(n) reversal
/// - `Revert`: all columns removed; back to table order
/// - `Full`: anything else

use crate::changeset::IndexAdjuster;
use crate::error::{GridError, Result};
use crate::table::Table;
use crate::value::{compare_values, ColumnValue};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Largest number of sort columns with a specialised comparator
pub const MAX_SORT_COLUMNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "A")]
    Ascending,
    #[serde(rename = "D")]
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    #[inline]
    pub(crate) fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// One column of a sort request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    pub column: String,
    #[serde(rename = "sortType")]
    pub direction: SortDirection,
}

impl SortColumn {
    pub fn ascending(column: impl Into<String>) -> Self {
        SortColumn {
            column: column.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        SortColumn {
            column: column.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// One row's place in the sort order
#[derive(Debug, Clone, PartialEq)]
pub struct SortEntry {
    pub position: usize,
    keys: [ColumnValue; MAX_SORT_COLUMNS],
}

impl SortEntry {
    fn natural(position: usize) -> Self {
        SortEntry {
            position,
            keys: [ColumnValue::Null, ColumnValue::Null, ColumnValue::Null],
        }
    }

    pub fn key(&self, n: usize) -> &ColumnValue {
        &self.keys[n]
    }
}

/// How a sort request was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTransition {
    Unchanged,
    Extend,
    Reverse,
    Revert,
    Full,
    /// More than `MAX_SORT_COLUMNS` columns; the order was left as it was
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedColumn {
    index: usize,
    direction: SortDirection,
}

#[derive(Debug, Clone, Default)]
pub struct SortIndex {
    entries: Vec<SortEntry>,
    columns: Vec<SortColumn>,
    resolved: Vec<ResolvedColumn>,
}

impl SortIndex {
    /// Natural (table position) order over every row
    pub fn new(table: &Table) -> Self {
        SortIndex {
            entries: (0..table.len()).map(SortEntry::natural).collect(),
            columns: Vec::new(),
            resolved: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn columns(&self) -> &[SortColumn] {
        &self.columns
    }

    pub fn is_sorted(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn entries(&self) -> &[SortEntry] {
        &self.entries
    }

    /// Table position at the given sort index
    #[inline]
    pub fn position_at(&self, idx: usize) -> Option<usize> {
        self.entries.get(idx).map(|e| e.position)
    }

    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|e| e.position)
    }

    /// Sort index of a table position (linear scan)
    pub fn index_of_position(&self, position: usize) -> Option<usize> {
        self.entries.iter().position(|e| e.position == position)
    }

    /// True when the table column participates in the current sort
    pub fn sorts_on(&self, column: usize) -> bool {
        self.resolved.iter().any(|c| c.index == column)
    }

    /// Apply a new sort request.
    pub fn sort(&mut self, table: &Table, columns: &[SortColumn]) -> Result<SortTransition> {
        if columns.len() > MAX_SORT_COLUMNS {
            log::warn!(
                "sort on {} columns is not supported (max {}); order unchanged",
                columns.len(),
                MAX_SORT_COLUMNS
            );
            return Ok(SortTransition::Unsupported);
        }

        let resolved = columns
            .iter()
            .map(|c| {
                Ok(ResolvedColumn {
                    index: table.schema().column_index(&c.column)?,
                    direction: c.direction,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let transition = self.classify(columns);
        log::debug!("sort {:?} -> {:?}", columns, transition);

        match transition {
            SortTransition::Unchanged | SortTransition::Unsupported => {}
            SortTransition::Revert => {
                self.resolved.clear();
                self.entries.sort_by_key(|e| e.position);
            }
            SortTransition::Reverse => {
                self.resolved = resolved;
                self.entries.reverse();
            }
            SortTransition::Extend => {
                let n = resolved.len() - 1;
                let column = resolved[n].index;
                for entry in self.entries.iter_mut() {
                    entry.keys[n] = table.value(entry.position, column).clone();
                }
                self.resolved = resolved;
                self.sort_entries();
            }
            SortTransition::Full => {
                self.resolved = resolved;
                self.refresh_keys(table);
                self.sort_entries();
            }
        }

        self.columns = columns.to_vec();
        Ok(transition)
    }

    fn classify(&self, columns: &[SortColumn]) -> SortTransition {
        let old = &self.columns;
        if columns == old.as_slice() {
            SortTransition::Unchanged
        } else if columns.is_empty() {
            SortTransition::Revert
        } else if columns.len() == old.len() + 1 && !old.is_empty() && columns[..old.len()] == old[..] {
            SortTransition::Extend
        } else if columns.len() == old.len()
            && columns
                .iter()
                .zip(old.iter())
                .all(|(new, prev)| new.column == prev.column && new.direction == prev.direction.flipped())
        {
            SortTransition::Reverse
        } else {
            SortTransition::Full
        }
    }

    /// Re-read every cached key from the table
    fn refresh_keys(&mut self, table: &Table) {
        for entry in self.entries.iter_mut() {
            entry.keys = [ColumnValue::Null, ColumnValue::Null, ColumnValue::Null];
            for (n, column) in self.resolved.iter().enumerate() {
                entry.keys[n] = table.value(entry.position, column.index).clone();
            }
        }
    }

    /// Stable sort with a comparator specialised for the column count.
    fn sort_entries(&mut self) {
        match self.resolved.as_slice() {
            [] => self.entries.sort_by_key(|e| e.position),
            [c0] => {
                let d0 = c0.direction;
                self.entries
                    .sort_by(|a, b| d0.apply(compare_values(&a.keys[0], &b.keys[0])));
            }
            [c0, c1] => {
                let (d0, d1) = (c0.direction, c1.direction);
                self.entries.sort_by(|a, b| {
                    d0.apply(compare_values(&a.keys[0], &b.keys[0]))
                        .then_with(|| d1.apply(compare_values(&a.keys[1], &b.keys[1])))
                });
            }
            [c0, c1, c2] => {
                let (d0, d1, d2) = (c0.direction, c1.direction, c2.direction);
                self.entries.sort_by(|a, b| {
                    d0.apply(compare_values(&a.keys[0], &b.keys[0]))
                        .then_with(|| d1.apply(compare_values(&a.keys[1], &b.keys[1])))
                        .then_with(|| d2.apply(compare_values(&a.keys[2], &b.keys[2])))
                });
            }
            _ => {}
        }
    }

    fn entry_for(&self, table: &Table, position: usize) -> SortEntry {
        let mut entry = SortEntry::natural(position);
        for (n, column) in self.resolved.iter().enumerate() {
            entry.keys[n] = table.value(position, column.index).clone();
        }
        entry
    }

    /// Compare two entries under the current sort; ties keep table order.
    fn compare_entries(&self, a: &SortEntry, b: &SortEntry) -> Ordering {
        for (n, column) in self.resolved.iter().enumerate() {
            let ord = column.direction.apply(compare_values(&a.keys[n], &b.keys[n]));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compare two table positions under the current sort
    pub fn compare_positions(&self, table: &Table, a: usize, b: usize) -> Ordering {
        let ea = self.entry_for(table, a);
        let eb = self.entry_for(table, b);
        self.compare_entries(&ea, &eb).then(a.cmp(&b))
    }

    /// Sort index a new row at `position` belongs at: after every entry that
    /// sorts before or equal to it.
    pub fn insertion_index(&self, table: &Table, position: usize) -> usize {
        if self.resolved.is_empty() {
            return self.entries.len();
        }
        let entry = self.entry_for(table, position);

        // boundaries first: appends at either end are the common case
        match self.entries.first() {
            None => return 0,
            Some(first) if self.compare_entries(&entry, first) == Ordering::Less => return 0,
            _ => {}
        }
        if let Some(last) = self.entries.last() {
            if self.compare_entries(&entry, last) != Ordering::Less {
                return self.entries.len();
            }
        }

        self.entries
            .partition_point(|existing| self.compare_entries(existing, &entry) != Ordering::Greater)
    }

    /// Insert the row at `position` into the order; returns its sort index.
    pub fn insert(&mut self, table: &Table, position: usize) -> usize {
        let idx = self.insertion_index(table, position);
        let entry = self.entry_for(table, position);
        self.entries.insert(idx, entry);
        idx
    }

    /// Table row at `position` was removed: drop its entry and shift later
    /// positions down. Returns the sort index it occupied.
    pub fn remove_position(&mut self, position: usize) -> Option<usize> {
        let mut found = None;
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            match IndexAdjuster::adjust_for_delete(entry.position, position) {
                Some(adjusted) => entry.position = adjusted,
                None => found = Some(idx),
            }
        }
        if let Some(idx) = found {
            self.entries.remove(idx);
        }
        found
    }

    /// Rebuild from the table and reapply the current sort columns
    pub fn rebuild(&mut self, table: &Table) -> Result<()> {
        let columns = std::mem::take(&mut self.columns);
        *self = SortIndex::new(table);
        if !columns.is_empty() {
            self.sort(table, &columns)?;
        }
        Ok(())
    }

    /// Refresh cached keys of a changed row and move it to its new place.
    /// Returns (old index, new index).
    pub fn reposition(&mut self, table: &Table, position: usize) -> Option<(usize, usize)> {
        let old_idx = self.index_of_position(position)?;
        self.entries.remove(old_idx);
        let new_idx = self.insert(table, position);
        Some((old_idx, new_idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Schema;
    use crate::value::ColumnType;

    fn make_table() -> Table {
        let schema = Schema::new(vec![
            ("id".to_string(), ColumnType::String, false),
            ("group".to_string(), ColumnType::String, false),
            ("score".to_string(), ColumnType::Int32, false),
            ("age".to_string(), ColumnType::Int32, false),
        ]);
        let mut table = Table::new("t".to_string(), schema);
        for (id, group, score, age) in [
            ("a", "x", 30, 40),
            ("b", "y", 10, 20),
            ("c", "x", 20, 30),
            ("d", "y", 10, 10),
            ("e", "x", 30, 10),
        ] {
            table.insert(vec![id.into(), group.into(), score.into(), age.into()]).unwrap();
        }
        table
    }

    fn ids(index: &SortIndex, table: &Table) -> Vec<String> {
        index.positions().map(|p| table.key_at(p).unwrap()).collect()
    }

    #[test]
    fn test_size_matches_table() {
        let table = make_table();
        let mut index = SortIndex::new(&table);
        assert_eq!(index.len(), table.len());
        index.sort(&table, &[SortColumn::ascending("score")]).unwrap();
        assert_eq!(index.len(), table.len());
    }

    #[test]
    fn test_single_column_sort_is_stable() {
        let table = make_table();
        let mut index = SortIndex::new(&table);
        let t = index.sort(&table, &[SortColumn::ascending("score")]).unwrap();
        assert_eq!(t, SortTransition::Full);
        assert_eq!(ids(&index, &table), vec!["b", "d", "c", "a", "e"]);
    }

    #[test]
    fn test_extend_refines_within_groups() {
        let table = make_table();
        let mut index = SortIndex::new(&table);
        index.sort(&table, &[SortColumn::ascending("score")]).unwrap();
        let t = index
            .sort(&table, &[SortColumn::ascending("score"), SortColumn::ascending("age")])
            .unwrap();
        assert_eq!(t, SortTransition::Extend);
        assert_eq!(ids(&index, &table), vec!["d", "b", "c", "e", "a"]);

        let t = index
            .sort(
                &table,
                &[
                    SortColumn::ascending("score"),
                    SortColumn::ascending("age"),
                    SortColumn::descending("group"),
                ],
            )
            .unwrap();
        assert_eq!(t, SortTransition::Extend);
        assert_eq!(ids(&index, &table), vec!["d", "b", "c", "e", "a"]);
    }

    #[test]
    fn test_reverse_flips_order() {
        let table = make_table();
        let mut index = SortIndex::new(&table);
        index.sort(&table, &[SortColumn::ascending("age")]).unwrap();
        let t = index.sort(&table, &[SortColumn::descending("age")]).unwrap();
        assert_eq!(t, SortTransition::Reverse);
        let ages: Vec<_> = index.positions().map(|p| table.value(p, 3).as_i64().unwrap()).collect();
        assert_eq!(ages, vec![40, 30, 20, 10, 10]);
    }

    #[test]
    fn test_revert_restores_insertion_order() {
        let table = make_table();
        let mut index = SortIndex::new(&table);
        index
            .sort(&table, &[SortColumn::descending("group"), SortColumn::ascending("score")])
            .unwrap();
        let t = index.sort(&table, &[]).unwrap();
        assert_eq!(t, SortTransition::Revert);
        assert_eq!(ids(&index, &table), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_more_than_three_columns_is_a_noop() {
        let table = make_table();
        let mut index = SortIndex::new(&table);
        let cols = vec![
            SortColumn::ascending("group"),
            SortColumn::ascending("score"),
            SortColumn::ascending("age"),
            SortColumn::ascending("id"),
        ];
        assert_eq!(index.sort(&table, &cols).unwrap(), SortTransition::Unsupported);
        assert_eq!(ids(&index, &table), vec!["a", "b", "c", "d", "e"]);
        assert!(index.columns().is_empty());
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let table = make_table();
        let mut index = SortIndex::new(&table);
        assert!(matches!(
            index.sort(&table, &[SortColumn::ascending("nope")]),
            Err(GridError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_insert_finds_rank() {
        let mut table = make_table();
        let mut index = SortIndex::new(&table);
        index.sort(&table, &[SortColumn::ascending("score")]).unwrap();

        let first = table.insert(vec!["f".into(), "x".into(), 5.into(), 1.into()]).unwrap();
        assert_eq!(index.insert(&table, first), 0);
        let last = table.insert(vec!["g".into(), "x".into(), 99.into(), 1.into()]).unwrap();
        assert_eq!(index.insert(&table, last), 6);
        let mid = table.insert(vec!["h".into(), "x".into(), 10.into(), 1.into()]).unwrap();
        assert_eq!(index.insert(&table, mid), 3);
        assert_eq!(index.len(), table.len());
    }

    #[test]
    fn test_remove_position_shifts_entries() {
        let mut table = make_table();
        let mut index = SortIndex::new(&table);
        index.sort(&table, &[SortColumn::ascending("score")]).unwrap();
        table.remove("b").unwrap();
        assert_eq!(index.remove_position(1), Some(0));
        assert_eq!(ids(&index, &table), vec!["d", "c", "a", "e"]);
    }

    #[test]
    fn test_nan_sorts_after_numbers() {
        let schema = Schema::new(vec![
            ("id".to_string(), ColumnType::String, false),
            ("price".to_string(), ColumnType::Float64, false),
        ]);
        let mut table = Table::new("prices".to_string(), schema);
        for i in 0..600 {
            let price = if i % 3 == 0 { f64::NAN } else { ((i * 7919) % 1000) as f64 / 10.0 };
            table.insert(vec![format!("p{}", i).into(), price.into()]).unwrap();
        }
        let mut index = SortIndex::new(&table);
        index.sort(&table, &[SortColumn::ascending("price")]).unwrap();

        let prices: Vec<f64> = index.positions().map(|p| table.value(p, 1).as_f64().unwrap()).collect();
        let numbers: Vec<f64> = prices.iter().copied().take_while(|p| !p.is_nan()).collect();
        assert_eq!(numbers.len(), 400);
        assert!(numbers.windows(2).all(|w| w[0] <= w[1]));
        assert!(prices[400..].iter().all(|p| p.is_nan()));

        let pos = table.insert(vec!["cheap".into(), 0.05.into()]).unwrap();
        assert_eq!(index.insert(&table, pos), 0);
        let pos = table.insert(vec!["dear".into(), 999.0.into()]).unwrap();
        assert_eq!(index.insert(&table, pos), 401);
    }
}
