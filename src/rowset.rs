/// LiveGrid windowed row set
///
/// A `RowSet` composes the sort order, the filter membership set and the
/// selection into the flat visible sequence a client scrolls through, and
/// answers every request with the smallest `DataResponse` that brings the
/// client's window up to date.
///
/// Table changes are applied incrementally through `insert`, `update` and
/// `delete`, each returning a `RowPatch` describing what the client must be
/// sent. Changes under a combined sort and filter are not patched
/// incrementally: they fail with `UnsupportedCombination` and the caller
/// resyncs.

use crate::changeset::CellChange;
use crate::error::{GridError, Result};
use crate::filter::{ActiveFilter, Filter, FilterSet, PredicateCompiler};
use crate::protocol::{DataResponse, Range, RowInfo, RowMeta};
use crate::sort::{SortColumn, SortIndex, SortTransition};
use crate::table::Table;
use crate::value::{values_equal, ColumnType, ColumnValue, Row, RowKey};
use std::collections::{BTreeSet, HashSet};

/// What a table change means for the client window
#[derive(Debug, Clone, PartialEq)]
pub enum RowPatch {
    /// No visible row changed; the visible size may have
    Nothing { size: usize },
    /// Rows to write at their IDX; every other row keeps its position
    Rows(DataResponse),
    /// Positions inside the window moved; the rows from the first moved one
    /// to the end of the window
    Shifted(DataResponse),
}

impl RowPatch {
    pub fn size(&self) -> usize {
        match self {
            RowPatch::Nothing { size } => *size,
            RowPatch::Rows(resp) | RowPatch::Shifted(resp) => resp.size,
        }
    }
}

/// Selected rows, tracked by primary key so the selection survives
/// reordering and filtering
#[derive(Debug, Clone, Default)]
pub struct Selection {
    keys: HashSet<RowKey>,
}

impl Selection {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &HashSet<RowKey> {
        &self.keys
    }

    /// Selection after clicking a row: toggled within the existing
    /// selection, or selected alone
    pub fn with_row(&self, key: RowKey, keep_existing: bool) -> HashSet<RowKey> {
        if keep_existing {
            let mut keys = self.keys.clone();
            if !keys.remove(&key) {
                keys.insert(key);
            }
            keys
        } else {
            HashSet::from([key])
        }
    }

    /// Replace the selection; returns the keys whose state changed
    pub fn replace(&mut self, keys: HashSet<RowKey>) -> HashSet<RowKey> {
        let changed = self.keys.symmetric_difference(&keys).cloned().collect();
        self.keys = keys;
        changed
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.keys.remove(key)
    }

    /// Drop keys no longer present in the table
    pub fn retain_live(&mut self, table: &Table) {
        self.keys.retain(|key| table.position_of(key).is_some());
    }
}

#[derive(Debug)]
struct Filtered {
    active: ActiveFilter,
    set: FilterSet,
}

#[derive(Debug)]
pub struct RowSet {
    sort: SortIndex,
    filter: Option<Filtered>,
    range: Range,
    selection: Selection,
    meta: RowMeta,
}

impl RowSet {
    pub fn new(table: &Table) -> Self {
        RowSet {
            sort: SortIndex::new(table),
            filter: None,
            range: Range::NULL,
            selection: Selection::default(),
            meta: RowMeta::for_schema(table.schema()),
        }
    }

    pub fn meta(&self) -> &RowMeta {
        &self.meta
    }

    pub fn sort_index(&self) -> &SortIndex {
        &self.sort
    }

    pub fn sort_columns(&self) -> &[SortColumn] {
        self.sort.columns()
    }

    pub fn filter_spec(&self) -> Option<&Filter> {
        self.filter.as_ref().map(|f| &f.active.spec)
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Number of visible rows
    pub fn size(&self) -> usize {
        match &self.filter {
            Some(filtered) => filtered.set.len(),
            None => self.sort.len(),
        }
    }

    fn sort_index_at(&self, visible: usize) -> Option<usize> {
        match &self.filter {
            Some(filtered) => filtered.set.get(visible),
            None => (visible < self.sort.len()).then_some(visible),
        }
    }

    /// Table position of a visible row
    pub fn position_at(&self, visible: usize) -> Option<usize> {
        self.sort.position_at(self.sort_index_at(visible)?)
    }

    pub fn visible_key(&self, table: &Table, visible: usize) -> Option<RowKey> {
        table.key_at(self.position_at(visible)?)
    }

    fn project(&self, table: &Table, visible: usize) -> Option<Row> {
        let position = self.position_at(visible)?;
        let data = table.row_at(position)?;
        let key = data[table.schema().primary_key()].to_key();
        let selected = self.selection.contains(&key);
        let mut info = RowInfo::leaf(visible, key, selected);
        info.idx_pointer = Some(position);
        Some(self.meta.project(Some(data), &info))
    }

    fn rows_in(&self, table: &Table, range: Range) -> Vec<Row> {
        (range.from..range.to.min(self.size()))
            .filter_map(|visible| self.project(table, visible))
            .collect()
    }

    /// The requested window plus its buffer, limited to the visible rows
    fn window(&self) -> Range {
        self.range.full_range().clamp(self.size())
    }

    // === Window ===

    /// Move the window. With `use_delta` only rows the client does not hold
    /// yet are returned; a range with `reset` set always returns everything.
    pub fn set_range(&mut self, table: &Table, range: Range, use_delta: bool) -> DataResponse {
        let use_delta = use_delta && range.reset != Some(true);
        let previous = self.window();
        self.range = Range {
            reset: None,
            ..range
        };
        let requested = self.window();
        let send = if use_delta {
            requested.delta(&previous)
        } else {
            requested
        };
        DataResponse::new(self.rows_in(table, send), self.size())
    }

    /// Every row of the current window
    pub fn current_range(&self, table: &Table) -> DataResponse {
        DataResponse::new(self.rows_in(table, self.window()), self.size())
    }

    fn reset_range(&mut self, table: &Table) -> DataResponse {
        let range = self.range.reset_to_start();
        self.set_range(table, range, false)
    }

    // === Sort and filter ===

    pub fn sort(&mut self, table: &Table, columns: &[SortColumn]) -> Result<DataResponse> {
        let transition = self.sort.sort(table, columns)?;
        if !matches!(transition, SortTransition::Unchanged | SortTransition::Unsupported) {
            if let Some(filtered) = &mut self.filter {
                filtered.set = FilterSet::scan(&self.sort, table, filtered.active.predicate());
            }
        }
        Ok(self.reset_range(table))
    }

    /// Replace the active filter. A filter that only narrows the previous one
    /// re-tests the previous members instead of scanning every row.
    pub fn filter(
        &mut self,
        table: &Table,
        filter: Filter,
        compiler: &dyn PredicateCompiler,
    ) -> Result<DataResponse> {
        let active = ActiveFilter::compile(filter, table.schema(), compiler)?;
        let set = match &self.filter {
            Some(previous) if active.narrows(&previous.active) => {
                log::debug!("narrowing filter over {} rows", previous.set.len());
                previous.set.narrow(&self.sort, table, active.predicate())
            }
            _ => {
                log::debug!("filter scan over {} rows", self.sort.len());
                FilterSet::scan(&self.sort, table, active.predicate())
            }
        };
        self.filter = Some(Filtered { active, set });
        Ok(self.reset_range(table))
    }

    pub fn clear_filter(&mut self, table: &Table) -> DataResponse {
        self.filter = None;
        self.reset_range(table)
    }

    /// Distinct values of a string column over the visible rows, sorted.
    pub fn distinct_values(
        &self,
        table: &Table,
        column: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>> {
        let idx = table.schema().column_index(column)?;
        let column_type = table.schema().columns()[idx].column_type;
        if column_type != ColumnType::String {
            return Err(GridError::TypeMismatch {
                column: column.to_string(),
                expected: ColumnType::String.to_string(),
                actual: column_type.to_string(),
            });
        }

        let prefix = prefix.map(str::to_lowercase);
        let mut seen = BTreeSet::new();
        for visible in 0..self.size() {
            let Some(position) = self.position_at(visible) else {
                continue;
            };
            if let ColumnValue::String(s) = table.value(position, idx) {
                if prefix.as_deref().map_or(true, |p| s.to_lowercase().starts_with(p)) {
                    seen.insert(s.clone());
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    // === Selection ===

    fn require_key(&self, table: &Table, visible: usize) -> Result<RowKey> {
        self.visible_key(table, visible).ok_or(GridError::OutOfRange {
            index: visible,
            len: self.size(),
        })
    }

    /// Select exactly the rows at the given visible indices
    pub fn select(&mut self, table: &Table, indices: &[usize]) -> Result<DataResponse> {
        let keys = indices
            .iter()
            .map(|&idx| self.require_key(table, idx))
            .collect::<Result<HashSet<_>>>()?;
        Ok(self.apply_selection(table, keys))
    }

    pub fn select_row(
        &mut self,
        table: &Table,
        idx: usize,
        keep_existing: bool,
    ) -> Result<DataResponse> {
        let key = self.require_key(table, idx)?;
        let keys = self.selection.with_row(key, keep_existing);
        Ok(self.apply_selection(table, keys))
    }

    /// Select the inclusive range between two visible indices
    pub fn select_row_range(
        &mut self,
        table: &Table,
        from: usize,
        to: usize,
        keep_existing: bool,
    ) -> Result<DataResponse> {
        let mut keys = if keep_existing {
            self.selection.keys().clone()
        } else {
            HashSet::new()
        };
        for idx in from.min(to)..=from.max(to) {
            keys.insert(self.require_key(table, idx)?);
        }
        Ok(self.apply_selection(table, keys))
    }

    fn apply_selection(&mut self, table: &Table, keys: HashSet<RowKey>) -> DataResponse {
        let changed = self.selection.replace(keys);
        let window = self.window();
        let rows = (window.from..window.to)
            .filter(|&visible| {
                self.visible_key(table, visible)
                    .map_or(false, |key| changed.contains(&key))
            })
            .filter_map(|visible| self.project(table, visible))
            .collect();
        DataResponse::new(rows, self.size())
    }

    // === Table changes ===

    /// Row appended to the table at `position`
    pub fn insert(&mut self, table: &Table, position: usize) -> Result<RowPatch> {
        if self.sort.is_sorted() && self.filter.is_some() {
            return Err(GridError::UnsupportedCombination(
                "row insert into a sorted and filtered row set".to_string(),
            ));
        }

        let sort_idx = self.sort.insert(table, position);
        let visible = match &mut self.filter {
            None => Some(sort_idx),
            Some(filtered) => {
                let member = filtered.active.matches_position(table, position);
                filtered.set.on_sort_insert(sort_idx, member)
            }
        };

        Ok(match visible {
            None => RowPatch::Nothing { size: self.size() },
            Some(visible) => self.patch_for_insert(table, visible),
        })
    }

    fn patch_for_insert(&self, table: &Table, visible: usize) -> RowPatch {
        let size = self.size();
        let window = self.window();
        if visible >= window.to {
            RowPatch::Nothing { size }
        } else if visible + 1 == size {
            RowPatch::Rows(DataResponse::new(self.rows_in(table, Range::new(visible, size)), size))
        } else {
            log::debug!("insert at visible {} shifts window {:?}", visible, window);
            RowPatch::Shifted(DataResponse::new(self.rows_in(table, window), size))
        }
    }

    /// Cells of the row at `position` changed
    pub fn update(
        &mut self,
        table: &Table,
        position: usize,
        changes: &[CellChange],
    ) -> Result<RowPatch> {
        let sorted = self.sort.is_sorted();
        if sorted && self.filter.is_some() {
            return Err(GridError::UnsupportedCombination(
                "row update in a sorted and filtered row set".to_string(),
            ));
        }

        if sorted {
            let missing = || GridError::NotFound(format!("row {} in sort order", position));
            let moved = changes
                .iter()
                .any(|c| self.sort.sorts_on(c.column) && !values_equal(&c.old_value, &c.new_value));
            if moved {
                let (from, to) = self.sort.reposition(table, position).ok_or_else(missing)?;
                return Ok(self.patch_for_move(table, from, to));
            }
            let idx = self.sort.index_of_position(position).ok_or_else(missing)?;
            return Ok(self.patch_in_place(table, idx));
        }

        // unsorted: sort index == table position
        match &mut self.filter {
            None => Ok(self.patch_in_place(table, position)),
            Some(filtered) => {
                let matches = filtered.active.matches_position(table, position);
                match (filtered.set.visible_index_of(position), matches) {
                    (Some(visible), true) => Ok(self.patch_in_place(table, visible)),
                    (Some(_), false) => {
                        let visible = filtered.set.drop_member(position);
                        Ok(self.patch_for_shift(table, visible))
                    }
                    (None, true) => {
                        let visible = filtered.set.add(position);
                        Ok(self.patch_for_shift(table, Some(visible)))
                    }
                    (None, false) => Ok(RowPatch::Nothing { size: self.size() }),
                }
            }
        }
    }

    fn patch_in_place(&self, table: &Table, visible: usize) -> RowPatch {
        let size = self.size();
        if self.window().contains(visible) {
            RowPatch::Rows(DataResponse::new(
                self.rows_in(table, Range::new(visible, visible + 1)),
                size,
            ))
        } else {
            RowPatch::Nothing { size }
        }
    }

    fn patch_for_shift(&self, table: &Table, visible: Option<usize>) -> RowPatch {
        let size = self.size();
        let window = self.window();
        match visible {
            Some(visible) if visible < window.to => {
                let from = visible.max(window.from);
                RowPatch::Shifted(DataResponse::new(
                    self.rows_in(table, Range::new(from, window.to)),
                    size,
                ))
            }
            _ => RowPatch::Nothing { size },
        }
    }

    fn patch_for_move(&self, table: &Table, from: usize, to: usize) -> RowPatch {
        if from == to {
            return self.patch_in_place(table, to);
        }
        let window = self.window();
        let (low, high) = (from.min(to), from.max(to));
        if low < window.to && high >= window.from {
            let start = low.max(window.from);
            let end = (high + 1).min(window.to);
            RowPatch::Shifted(DataResponse::new(
                self.rows_in(table, Range::new(start, end)),
                self.size(),
            ))
        } else {
            RowPatch::Nothing { size: self.size() }
        }
    }

    /// Row `key` was removed from the table at `position`
    pub fn delete(&mut self, table: &Table, position: usize, key: &str) -> Result<RowPatch> {
        let sort_idx = self.sort.remove_position(position).ok_or_else(|| {
            GridError::InvalidState(format!("removed row {} was not in the sort order", position))
        })?;
        self.selection.remove(key);

        let visible = match &mut self.filter {
            None => Some(sort_idx),
            Some(filtered) => filtered.set.on_sort_remove(sort_idx),
        };
        Ok(self.patch_for_shift(table, visible))
    }

    /// Rebuild sort order and filter membership from the table
    pub fn resync(&mut self, table: &Table) -> Result<DataResponse> {
        self.sort.rebuild(table)?;
        if let Some(filtered) = &mut self.filter {
            filtered.set = FilterSet::scan(&self.sort, table, filtered.active.predicate());
        }
        self.selection.retain_live(table);
        Ok(self.current_range(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterCompiler;
    use crate::table::Schema;

    // r0..r9; sector alternates Even/Odd; price = (i * 7) % 10
    fn make_table() -> Table {
        let schema = Schema::new(vec![
            ("id".to_string(), ColumnType::String, false),
            ("sector".to_string(), ColumnType::String, false),
            ("price".to_string(), ColumnType::Float64, false),
            ("qty".to_string(), ColumnType::Int32, false),
        ]);
        let mut table = Table::new("t".to_string(), schema);
        for i in 0..10 {
            let sector = if i % 2 == 0 { "Even" } else { "Odd" };
            table
                .insert(vec![
                    format!("r{}", i).into(),
                    sector.into(),
                    (((i * 7) % 10) as f64).into(),
                    (i as i32).into(),
                ])
                .unwrap();
        }
        table
    }

    fn keys(rs: &RowSet, rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| rs.meta().row_key(r).unwrap().to_string())
            .collect()
    }

    fn even() -> Filter {
        Filter::is_in("sector", vec!["Even".into()])
    }

    #[test]
    fn test_set_range_deltas() {
        let table = make_table();
        let mut rs = RowSet::new(&table);

        let resp = rs.set_range(&table, Range::new(0, 5), true);
        assert_eq!(keys(&rs, &resp.rows), vec!["r0", "r1", "r2", "r3", "r4"]);
        assert_eq!(resp.size, 10);

        let again = rs.set_range(&table, Range::new(0, 5), true);
        assert!(again.rows.is_empty());
        assert_eq!(again.size, 10);

        let moved = rs.set_range(&table, Range::new(3, 8), true);
        assert_eq!(keys(&rs, &moved.rows), vec!["r5", "r6", "r7"]);

        let full = rs.set_range(&table, Range::new(3, 8), false);
        assert_eq!(full.rows.len(), 5);

        let reset = rs.set_range(
            &table,
            Range {
                reset: Some(true),
                ..Range::new(3, 8)
            },
            true,
        );
        assert_eq!(reset.rows.len(), 5);
    }

    #[test]
    fn test_buffered_window() {
        let table = make_table();
        let mut rs = RowSet::new(&table);
        let resp = rs.set_range(&table, Range::new(2, 4).with_buffer(3), true);
        assert_eq!(resp.rows.len(), 7);
        assert_eq!(rs.meta().row_idx(&resp.rows[0]), Some(0));
    }

    #[test]
    fn test_sort_resets_window() {
        let table = make_table();
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(3, 8), true);

        let resp = rs.sort(&table, &[SortColumn::ascending("price")]).unwrap();
        assert_eq!(rs.range(), Range::new(0, 5));
        assert_eq!(keys(&rs, &resp.rows), vec!["r0", "r3", "r6", "r9", "r2"]);
        assert_eq!(rs.sort_index().len(), table.len());
    }

    #[test]
    fn test_filter_round_trip() {
        let table = make_table();
        let compiler = FilterCompiler;
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 10), true);
        rs.sort(&table, &[SortColumn::ascending("price")]).unwrap();
        let before: Vec<usize> = rs.sort_index().positions().collect();

        let resp = rs.filter(&table, even(), &compiler).unwrap();
        assert_eq!(resp.size, 5);
        assert_eq!(keys(&rs, &resp.rows), vec!["r0", "r6", "r2", "r8", "r4"]);

        let resp = rs.clear_filter(&table);
        assert_eq!(resp.size, 10);
        assert_eq!(rs.sort_index().positions().collect::<Vec<_>>(), before);
        assert!(rs.filter_spec().is_none());
    }

    #[test]
    fn test_narrowed_filter_matches_rescan() {
        let table = make_table();
        let compiler = FilterCompiler;
        let mut narrowed = RowSet::new(&table);
        narrowed.set_range(&table, Range::new(0, 10), true);
        narrowed
            .filter(&table, Filter::is_in("id", vec!["r1".into(), "r2".into(), "r4".into()]), &compiler)
            .unwrap();
        let resp = narrowed
            .filter(&table, Filter::is_in("id", vec!["r2".into(), "r4".into()]), &compiler)
            .unwrap();

        let mut fresh = RowSet::new(&table);
        fresh.set_range(&table, Range::new(0, 10), true);
        let expected = fresh
            .filter(&table, Filter::is_in("id", vec!["r2".into(), "r4".into()]), &compiler)
            .unwrap();
        assert_eq!(resp, expected);
        assert_eq!(resp.size, 2);
    }

    #[test]
    fn test_selection_only_emits_window_rows() {
        let table = make_table();
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 5), true);

        let resp = rs.select(&table, &[1, 3]).unwrap();
        assert_eq!(keys(&rs, &resp.rows), vec!["r1", "r3"]);
        assert!(resp.rows.iter().all(|r| rs.meta().is_selected(r)));

        // r1 deselected (in window), r7 selected (outside the window)
        let resp = rs.select(&table, &[3, 7]).unwrap();
        assert_eq!(keys(&rs, &resp.rows), vec!["r1"]);
        assert!(!rs.meta().is_selected(&resp.rows[0]));
        assert!(rs.selection().contains("r7"));

        let resp = rs.select_row(&table, 0, true).unwrap();
        assert_eq!(keys(&rs, &resp.rows), vec!["r0"]);
        assert_eq!(rs.selection().len(), 3);

        let resp = rs.select_row_range(&table, 2, 0, false).unwrap();
        assert_eq!(keys(&rs, &resp.rows), vec!["r1", "r2", "r3"]);
        assert!(rs.select_row(&table, 42, false).is_err());
    }

    #[test]
    fn test_selection_survives_sort() {
        let table = make_table();
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 10), true);
        rs.select(&table, &[0]).unwrap();
        let resp = rs.sort(&table, &[SortColumn::descending("price")]).unwrap();
        let selected: Vec<_> = resp
            .rows
            .iter()
            .filter(|r| rs.meta().is_selected(r))
            .map(|r| rs.meta().row_key(r).unwrap().to_string())
            .collect();
        assert_eq!(selected, vec!["r0"]);
    }

    #[test]
    fn test_unsorted_insert() {
        let mut table = make_table();
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 20), true);

        let pos = table.insert(vec!["r10".into(), "Even".into(), 1.5.into(), 0.into()]).unwrap();
        match rs.insert(&table, pos).unwrap() {
            RowPatch::Rows(resp) => {
                assert_eq!(keys(&rs, &resp.rows), vec!["r10"]);
                assert_eq!(resp.size, 11);
            }
            other => panic!("expected rows, got {:?}", other),
        }

        rs.set_range(&table, Range::new(0, 5), true);
        let pos = table.insert(vec!["r11".into(), "Odd".into(), 1.5.into(), 0.into()]).unwrap();
        assert_eq!(rs.insert(&table, pos).unwrap(), RowPatch::Nothing { size: 12 });
    }

    #[test]
    fn test_sorted_insert_at_start_and_interior() {
        let mut table = make_table();
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 5), true);
        rs.sort(&table, &[SortColumn::ascending("price")]).unwrap();

        let pos = table.insert(vec!["r10".into(), "Even".into(), (-1.0).into(), 0.into()]).unwrap();
        assert!(matches!(rs.insert(&table, pos).unwrap(), RowPatch::Shifted(_)));
        let current = rs.current_range(&table);
        assert_eq!(keys(&rs, &current.rows)[0], "r10");

        // lands after price 4.0 at sort index 6, below the window
        let pos = table.insert(vec!["r11".into(), "Odd".into(), 4.5.into(), 0.into()]).unwrap();
        assert_eq!(rs.insert(&table, pos).unwrap(), RowPatch::Nothing { size: 12 });
        assert_eq!(rs.visible_key(&table, 6), Some("r11".to_string()));
    }

    #[test]
    fn test_sorted_and_filtered_change_requires_resync() {
        let mut table = make_table();
        let compiler = FilterCompiler;
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 10), true);
        rs.sort(&table, &[SortColumn::ascending("price")]).unwrap();
        rs.filter(&table, even(), &compiler).unwrap();

        let pos = table.insert(vec!["r10".into(), "Even".into(), (-1.0).into(), 0.into()]).unwrap();
        let err = rs.insert(&table, pos).unwrap_err();
        assert!(err.is_unsupported());

        let resp = rs.resync(&table).unwrap();
        assert_eq!(resp.size, 6);
        assert_eq!(keys(&rs, &resp.rows)[0], "r10");
        assert_eq!(rs.sort_index().len(), table.len());
    }

    #[test]
    fn test_sorted_update() {
        let mut table = make_table();
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 5), true);
        rs.sort(&table, &[SortColumn::ascending("price")]).unwrap();

        // r7 has the highest price; moving it to the lowest shifts the window
        let changes = table.update(7, &[(2, (-5.0).into())]).unwrap();
        match rs.update(&table, 7, &changes).unwrap() {
            RowPatch::Shifted(resp) => assert_eq!(keys(&rs, &resp.rows)[0], "r7"),
            other => panic!("expected shifted window, got {:?}", other),
        }

        let changes = table.update(0, &[(3, 99.into())]).unwrap();
        match rs.update(&table, 0, &changes).unwrap() {
            RowPatch::Rows(resp) => {
                assert_eq!(keys(&rs, &resp.rows), vec!["r0"]);
                assert_eq!(rs.meta().row_idx(&resp.rows[0]), Some(1));
            }
            other => panic!("expected one row, got {:?}", other),
        }
    }

    #[test]
    fn test_filtered_update_moves_membership() {
        let mut table = make_table();
        let compiler = FilterCompiler;
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 10), true);
        rs.filter(&table, even(), &compiler).unwrap();

        let changes = table.update(2, &[(1, "Odd".into())]).unwrap();
        let patch = rs.update(&table, 2, &changes).unwrap();
        assert!(matches!(patch, RowPatch::Shifted(_)));
        assert_eq!(patch.size(), 4);

        let changes = table.update(3, &[(1, "Even".into())]).unwrap();
        match rs.update(&table, 3, &changes).unwrap() {
            RowPatch::Shifted(resp) => {
                assert_eq!(resp.size, 5);
                assert_eq!(keys(&rs, &resp.rows), vec!["r3", "r4", "r6", "r8"]);
            }
            other => panic!("expected shifted rows, got {:?}", other),
        }

        let changes = table.update(0, &[(3, 5.into())]).unwrap();
        assert!(matches!(rs.update(&table, 0, &changes).unwrap(), RowPatch::Rows(_)));
    }

    #[test]
    fn test_delete_emits_surviving_window_rows() {
        let mut table = make_table();
        let mut rs = RowSet::new(&table);
        rs.set_range(&table, Range::new(0, 5), true);
        rs.select(&table, &[2]).unwrap();

        table.remove("r2").unwrap();
        match rs.delete(&table, 2, "r2").unwrap() {
            RowPatch::Shifted(resp) => {
                assert_eq!(keys(&rs, &resp.rows), vec!["r3", "r4", "r5"]);
                assert_eq!(resp.size, 9);
            }
            other => panic!("expected shifted rows, got {:?}", other),
        }
        assert!(rs.selection().is_empty());

        table.remove("r9").unwrap();
        assert_eq!(rs.delete(&table, 8, "r9").unwrap(), RowPatch::Nothing { size: 8 });
        assert_eq!(rs.sort_index().len(), table.len());
    }

    #[test]
    fn test_distinct_values_follow_filter() {
        let table = make_table();
        let compiler = FilterCompiler;
        let mut rs = RowSet::new(&table);
        assert_eq!(rs.distinct_values(&table, "sector", None).unwrap(), vec!["Even", "Odd"]);
        rs.filter(&table, even(), &compiler).unwrap();
        assert_eq!(rs.distinct_values(&table, "sector", Some("e")).unwrap(), vec!["Even"]);
        assert!(matches!(
            rs.distinct_values(&table, "qty", None),
            Err(GridError::TypeMismatch { .. })
        ));
    }
}
