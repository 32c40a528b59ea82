/// LiveGrid grouped row set
///
/// The grouped counterpart of `RowSet`: the sort order feeds a `GroupTree`,
/// and the client window is a slice of the tree's visible rows (group rows
/// and the leaf rows of expanded deepest-level groups).
///
/// Table changes keep the sort order and the tree in step incrementally;
/// because a change can move any number of visible rows, each one answers
/// with the full current window.

use crate::changeset::CellChange;
use crate::config::GridConfig;
use crate::error::{GridError, Result};
use crate::filter::{ActiveFilter, Filter};
use crate::group_aggregate::{Aggregation, GroupAggregator};
use crate::group_iter::GroupIterator;
use crate::group_tree::GroupTree;
use crate::protocol::{DataResponse, Range, RowMeta};
use crate::rowset::Selection;
use crate::sort::{SortColumn, SortIndex};
use crate::table::Table;
use crate::value::{values_equal, ColumnValue, Row, RowKey};
use std::collections::HashSet;

#[derive(Debug)]
pub struct GroupRowSet {
    sort: SortIndex,
    filter: Option<ActiveFilter>,
    tree: GroupTree,
    group_by: Vec<String>,
    range: Range,
    selection: Selection,
    meta: RowMeta,
    config: GridConfig,
}

impl GroupRowSet {
    pub fn new(
        table: &Table,
        group_by: &[String],
        sort_columns: &[SortColumn],
        filter: Option<ActiveFilter>,
        aggregations: &[Aggregation],
        config: &GridConfig,
    ) -> Result<Self> {
        let mut sort = SortIndex::new(table);
        if !sort_columns.is_empty() {
            sort.sort(table, sort_columns)?;
        }
        let aggregator = GroupAggregator::new(table.schema(), aggregations)?;
        let tree = GroupTree::build(table, &sort, group_by, aggregator, filter.as_ref(), config)?;
        Ok(GroupRowSet {
            sort,
            filter,
            tree,
            group_by: group_by.to_vec(),
            range: Range::NULL,
            selection: Selection::default(),
            meta: RowMeta::for_schema(table.schema()),
            config: config.clone(),
        })
    }

    pub fn meta(&self) -> &RowMeta {
        &self.meta
    }

    pub fn tree(&self) -> &GroupTree {
        &self.tree
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    pub fn sort_columns(&self) -> &[SortColumn] {
        self.sort.columns()
    }

    pub fn filter_spec(&self) -> Option<&Filter> {
        self.filter.as_ref().map(|f| &f.spec)
    }

    pub fn aggregations(&self) -> &[Aggregation] {
        self.tree.aggregator().specs()
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Visible rows: group rows plus leaf rows of expanded groups
    pub fn size(&self) -> usize {
        self.tree.size()
    }

    fn window(&self) -> Range {
        self.range.full_range().clamp(self.size())
    }

    fn rows_in(&self, table: &Table, range: Range) -> Vec<Row> {
        GroupIterator::new(&self.tree).rows(table, &self.meta, &self.selection, range)
    }

    // === Window ===

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

    pub fn current_range(&self, table: &Table) -> DataResponse {
        DataResponse::new(self.rows_in(table, self.window()), self.size())
    }

    fn reset_range(&mut self, table: &Table) -> DataResponse {
        let range = self.range.reset_to_start();
        self.set_range(table, range, false)
    }

    /// Rebuild the tree from the sort order, reopening `expanded` paths
    fn rebuild(&mut self, table: &Table, group_by: &[String], expanded: &[String]) -> Result<()> {
        let aggregator = self.tree.aggregator().clone();
        let mut tree = GroupTree::build(table, &self.sort, group_by, aggregator, self.filter.as_ref(), &self.config)?;
        tree.restore_expanded(table, expanded);
        self.tree = tree;
        self.group_by = group_by.to_vec();
        Ok(())
    }

    // === Sort, filter, group, aggregate ===

    pub fn sort(&mut self, table: &Table, columns: &[SortColumn]) -> Result<DataResponse> {
        self.sort.sort(table, columns)?;
        let expanded = self.tree.expanded_paths();
        let group_by = self.group_by.clone();
        self.rebuild(table, &group_by, &expanded)?;
        Ok(self.reset_range(table))
    }

    pub fn filter(&mut self, table: &Table, filter: ActiveFilter) -> DataResponse {
        let narrow = self.filter.as_ref().map_or(false, |previous| filter.narrows(previous));
        log::debug!("grouped filter {:?}, narrowing: {}", filter.spec, narrow);
        self.tree.apply_filter(table, Some(&filter), narrow);
        self.filter = Some(filter);
        self.reset_range(table)
    }

    pub fn clear_filter(&mut self, table: &Table) -> DataResponse {
        self.filter = None;
        self.tree.apply_filter(table, None, false);
        self.reset_range(table)
    }

    /// Change the group-by columns. Adding one trailing column keeps the
    /// tree; anything else rebuilds it, keeping expanded nodes whose levels
    /// are unchanged.
    pub fn group(&mut self, table: &Table, group_by: &[String]) -> Result<DataResponse> {
        if group_by.is_empty() {
            return Err(GridError::InvalidArgument("group-by needs at least one column".to_string()));
        }
        if group_by == self.group_by.as_slice() {
            return Ok(self.current_range(table));
        }

        let current = self.group_by.len();
        if group_by.len() == current + 1 && group_by.starts_with(&self.group_by) {
            let name = &group_by[current];
            let column = table.schema().column_index(name)?;
            let direction = GroupTree::direction_for(&self.sort, name);
            self.tree.extend_levels(table, column, direction);
            self.group_by = group_by.to_vec();
        } else {
            let shared = group_by
                .iter()
                .zip(&self.group_by)
                .take_while(|(a, b)| a == b)
                .count();
            let separator = self.tree.separator();
            let expanded: Vec<String> = self
                .tree
                .expanded_paths()
                .into_iter()
                .filter(|path| path.matches(separator).count() <= shared)
                .collect();
            self.rebuild(table, group_by, &expanded)?;
        }
        Ok(self.reset_range(table))
    }

    pub fn aggregate(&mut self, table: &Table, aggregations: &[Aggregation]) -> Result<DataResponse> {
        let aggregator = GroupAggregator::new(table.schema(), aggregations)?;
        self.tree.set_aggregator(table, aggregator);
        Ok(self.current_range(table))
    }

    /// Aggregated value of `column` for the group at `path`
    pub fn aggregate_value(&self, path: &str, column: &str) -> Result<ColumnValue> {
        let id = self.tree.node_id(path)?;
        let cell = self
            .tree
            .aggregator()
            .cell_index(column)
            .ok_or_else(|| GridError::ColumnNotFound(column.to_string()))?;
        Ok(self.tree.node(id).aggregates().get(cell).map_or(ColumnValue::Null, |c| c.to_value()))
    }

    // === Expand / collapse ===

    pub fn open_tree_node(&mut self, table: &Table, path: &str) -> Result<DataResponse> {
        self.tree.open(table, path)?;
        Ok(self.current_range(table))
    }

    pub fn close_tree_node(&mut self, table: &Table, path: &str) -> Result<DataResponse> {
        self.tree.close(path)?;
        Ok(self.current_range(table))
    }

    // === Selection ===

    /// Primary key of the leaf row at a visible index
    fn require_leaf_key(&self, table: &Table, idx: usize) -> Result<RowKey> {
        let iter = GroupIterator::new(&self.tree);
        match iter.locate(idx) {
            None => Err(GridError::OutOfRange { index: idx, len: self.size() }),
            Some((visible, _)) => iter
                .leaf_key(table, visible)
                .ok_or_else(|| GridError::InvalidArgument(format!("row {} is a group row", idx))),
        }
    }

    pub fn select(&mut self, table: &Table, indices: &[usize]) -> Result<DataResponse> {
        let keys = indices
            .iter()
            .map(|&idx| self.require_leaf_key(table, idx))
            .collect::<Result<HashSet<_>>>()?;
        Ok(self.apply_selection(table, keys))
    }

    pub fn select_row(&mut self, table: &Table, idx: usize, keep_existing: bool) -> Result<DataResponse> {
        let key = self.require_leaf_key(table, idx)?;
        let keys = self.selection.with_row(key, keep_existing);
        Ok(self.apply_selection(table, keys))
    }

    /// Select the leaf rows between two visible indices, inclusive; group
    /// rows in between are skipped
    pub fn select_row_range(
        &mut self,
        table: &Table,
        from: usize,
        to: usize,
        keep_existing: bool,
    ) -> Result<DataResponse> {
        let (low, high) = (from.min(to), from.max(to));
        if high >= self.size() {
            return Err(GridError::OutOfRange { index: high, len: self.size() });
        }
        let mut keys = if keep_existing {
            self.selection.keys().clone()
        } else {
            HashSet::new()
        };
        let iter = GroupIterator::new(&self.tree);
        iter.visit(Range::new(low, high + 1), |_, _, visible| {
            if let Some(key) = iter.leaf_key(table, visible) {
                keys.insert(key);
            }
        });
        Ok(self.apply_selection(table, keys))
    }

    fn apply_selection(&mut self, table: &Table, keys: HashSet<RowKey>) -> DataResponse {
        let changed = self.selection.replace(keys);
        let iter = GroupIterator::new(&self.tree);
        let mut rows = Vec::new();
        iter.visit(self.window(), |idx, parent, visible| {
            let hit = iter.leaf_key(table, visible).map_or(false, |key| changed.contains(&key));
            if hit {
                if let Some(row) = iter.project(table, &self.meta, &self.selection, idx, parent, visible) {
                    rows.push(row);
                }
            }
        });
        DataResponse::new(rows, self.size())
    }

    // === Table changes ===

    /// Row appended to the table at `position`
    pub fn insert(&mut self, table: &Table, position: usize) -> Result<DataResponse> {
        self.sort.insert(table, position);
        self.tree.insert_row(table, &self.sort, position, self.filter.as_ref());
        Ok(self.current_range(table))
    }

    /// Cells of the row at `position` changed
    pub fn update(&mut self, table: &Table, position: usize, changes: &[CellChange]) -> Result<DataResponse> {
        let resorted = changes
            .iter()
            .any(|c| self.sort.sorts_on(c.column) && !values_equal(&c.old_value, &c.new_value));
        if resorted {
            self.sort.reposition(table, position).ok_or_else(|| {
                GridError::NotFound(format!("row {} in sort order", position))
            })?;
        }
        self.tree.update_row(table, &self.sort, position, changes, self.filter.as_ref())?;
        Ok(self.current_range(table))
    }

    /// Row `row` with key `key` was removed from the table at `position`
    pub fn delete(&mut self, table: &Table, position: usize, key: &str, row: &Row) -> Result<DataResponse> {
        self.sort.remove_position(position).ok_or_else(|| {
            GridError::InvalidState(format!("removed row {} was not in the sort order", position))
        })?;
        self.tree.remove_row(table, position, row);
        self.selection.remove(key);
        Ok(self.current_range(table))
    }

    /// Rebuild sort order and tree from the table, keeping expanded nodes
    pub fn resync(&mut self, table: &Table) -> Result<DataResponse> {
        self.sort.rebuild(table)?;
        let expanded = self.tree.expanded_paths();
        let group_by = self.group_by.clone();
        self.rebuild(table, &group_by, &expanded)?;
        self.selection.retain_live(table);
        Ok(self.current_range(table))
    }
}
