/// Windowed walk over a group tree
///
/// `GroupIterator` visits the visible rows of a `GroupTree` in display order
/// (pre-order: a group row, then its visible contents) restricted to a
/// `[from, to)` window. Subtrees that end before the window are stepped over
/// in O(1) using each node's cached `exposed` count, and leaf lists are
/// entered at an offset, so the cost is proportional to the depth of the
/// tree plus the size of the window.

use crate::group_tree::{GroupTree, NodeId, ROOT};
use crate::protocol::{Range, RowInfo, RowMeta};
use crate::rowset::Selection;
use crate::table::Table;
use crate::value::{Row, RowKey};
use std::ops::ControlFlow;

/// One visible row of a grouped view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visible {
    Group(NodeId),
    /// A table row inside the leaf container `node`
    Leaf { node: NodeId, position: usize },
}

pub struct GroupIterator<'a> {
    tree: &'a GroupTree,
}

impl<'a> GroupIterator<'a> {
    pub fn new(tree: &'a GroupTree) -> Self {
        GroupIterator { tree }
    }

    /// Call `f(idx, parent_idx, row)` for each visible row in `range`
    pub fn visit<F>(&self, range: Range, mut f: F)
    where
        F: FnMut(usize, Option<usize>, Visible),
    {
        if range.is_empty() {
            return;
        }
        let mut next = 0;
        let _ = self.walk(ROOT, None, &mut next, range, &mut f);
    }

    fn walk<F>(
        &self,
        id: NodeId,
        parent_idx: Option<usize>,
        next: &mut usize,
        range: Range,
        f: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(usize, Option<usize>, Visible),
    {
        for child in self.tree.visible_children(id) {
            if *next >= range.to {
                return ControlFlow::Break(());
            }
            let node = self.tree.node(child);
            let idx = *next;
            let span = 1 + node.exposed();
            if idx + span <= range.from {
                *next += span;
                continue;
            }

            if idx >= range.from {
                f(idx, parent_idx, Visible::Group(child));
            }
            *next += 1;
            if !node.is_expanded() {
                continue;
            }

            if self.tree.is_leaf_container(child) {
                let rows = self.tree.visible_rows(child);
                let first = range.from.saturating_sub(*next).min(rows.len());
                for (offset, &position) in rows.iter().enumerate().skip(first) {
                    let row_idx = *next + offset;
                    if row_idx >= range.to {
                        return ControlFlow::Break(());
                    }
                    f(row_idx, Some(idx), Visible::Leaf { node: child, position });
                }
                *next += rows.len();
            } else {
                self.walk(child, Some(idx), next, range, f)?;
            }
        }
        ControlFlow::Continue(())
    }

    /// The row at visible index `idx` and its parent's index
    pub fn locate(&self, idx: usize) -> Option<(Visible, Option<usize>)> {
        let mut found = None;
        self.visit(Range::new(idx, idx + 1), |_, parent, visible| {
            found = Some((visible, parent));
        });
        found
    }

    /// Primary key of a leaf row, `None` for group rows
    pub fn leaf_key(&self, table: &Table, visible: Visible) -> Option<RowKey> {
        match visible {
            Visible::Group(_) => None,
            Visible::Leaf { position, .. } => table.key_at(position),
        }
    }

    /// Build the wire row for one visible row
    pub fn project(
        &self,
        table: &Table,
        meta: &RowMeta,
        selection: &Selection,
        idx: usize,
        parent_idx: Option<usize>,
        visible: Visible,
    ) -> Option<Row> {
        match visible {
            Visible::Group(id) => Some(self.project_group(meta, idx, parent_idx, id)),
            Visible::Leaf { node, position } => {
                let data = table.row_at(position)?;
                let key = data[table.schema().primary_key()].to_key();
                let mut info = RowInfo::leaf(
                    idx,
                    self.tree.child_path(self.tree.node(node).path(), &key),
                    selection.contains(&key),
                );
                info.parent_idx = parent_idx;
                info.idx_pointer = Some(position);
                Some(meta.project(Some(data), &info))
            }
        }
    }

    fn project_group(&self, meta: &RowMeta, idx: usize, parent_idx: Option<usize>, id: NodeId) -> Row {
        let node = self.tree.node(id);
        let mut out = meta.blank_row();
        for (column, value) in self.tree.group_values(id) {
            out[meta.slot(column)] = value;
        }
        let aggregator = self.tree.aggregator();
        for (column, cell) in aggregator.columns().zip(node.aggregates()) {
            out[meta.slot(column)] = cell.to_value();
        }

        let info = RowInfo {
            idx,
            depth: node.signed_depth(),
            count: node.total(),
            key: node.path().to_string(),
            selected: false,
            parent_idx,
            idx_pointer: None,
            filter_count: self.tree.is_filtered().then(|| node.count()),
        };
        meta.write_info(&mut out, &info);
        out
    }

    /// Projected rows of a window
    pub fn rows(&self, table: &Table, meta: &RowMeta, selection: &Selection, range: Range) -> Vec<Row> {
        let mut rows = Vec::with_capacity(range.len().min(self.tree.size()));
        self.visit(range, |idx, parent, visible| {
            if let Some(row) = self.project(table, meta, selection, idx, parent, visible) {
                rows.push(row);
            }
        });
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridConfig;
    use crate::group_aggregate::{Aggregation, GroupAggregator};
    use crate::sort::SortIndex;
    use crate::table::Schema;
    use crate::value::{ColumnType, ColumnValue};

    // three teams with 4, 2 and 3 players
    fn make_table() -> Table {
        let schema = Schema::new(vec![
            ("id".to_string(), ColumnType::String, false),
            ("team".to_string(), ColumnType::String, false),
            ("score".to_string(), ColumnType::Int32, false),
        ]);
        let mut table = Table::new("t".to_string(), schema);
        let teams = ["a", "a", "b", "c", "a", "c", "b", "a", "c"];
        for (i, team) in teams.iter().enumerate() {
            table
                .insert(vec![format!("p{}", i).into(), (*team).into(), (i as i32).into()])
                .unwrap();
        }
        table
    }

    fn make_tree(table: &Table) -> GroupTree {
        let sort = SortIndex::new(table);
        let aggregator = GroupAggregator::new(table.schema(), &[Aggregation::sum("score")]).unwrap();
        GroupTree::build(table, &sort, &["team".to_string()], aggregator, None, &GridConfig::default()).unwrap()
    }

    fn collect(tree: &GroupTree, range: Range) -> Vec<(usize, Option<usize>, Visible)> {
        let mut out = Vec::new();
        GroupIterator::new(tree).visit(range, |idx, parent, v| out.push((idx, parent, v)));
        out
    }

    #[test]
    fn test_collapsed_groups() {
        let table = make_table();
        let tree = make_tree(&table);
        let visited = collect(&tree, Range::new(0, 20));
        assert_eq!(visited.len(), 3);
        assert!(visited.iter().all(|(_, parent, v)| parent.is_none() && matches!(v, Visible::Group(_))));
    }

    #[test]
    fn test_window_skips_subtrees() {
        let table = make_table();
        let mut tree = make_tree(&table);
        tree.open(&table, "root|a").unwrap();
        tree.open(&table, "root|c").unwrap();
        // a, p0 p1 p4 p7, b, c, p3 p5 p8
        assert_eq!(tree.size(), 10);

        let visited = collect(&tree, Range::new(3, 8));
        let idxs: Vec<usize> = visited.iter().map(|v| v.0).collect();
        assert_eq!(idxs, vec![3, 4, 5, 6, 7]);
        assert_eq!(visited[0].2, Visible::Leaf { node: tree.node_id("root|a").unwrap(), position: 4 });
        assert_eq!(visited[0].1, Some(0));
        assert_eq!(visited[2].2, Visible::Group(tree.node_id("root|b").unwrap()));
        assert_eq!(visited[4].1, Some(6));

        let iter = GroupIterator::new(&tree);
        assert_eq!(iter.locate(9).map(|(v, _)| v), Some(Visible::Leaf { node: tree.node_id("root|c").unwrap(), position: 8 }));
        assert_eq!(iter.locate(10), None);
    }

    #[test]
    fn test_projected_rows() {
        let table = make_table();
        let mut tree = make_tree(&table);
        tree.open(&table, "root|b").unwrap();
        let meta = RowMeta::for_schema(table.schema());
        let rows = GroupIterator::new(&tree).rows(&table, &meta, &Selection::default(), Range::new(0, 3));

        // a: collapsed group carrying its value and sum
        assert_eq!(rows[0][1], ColumnValue::from("a"));
        assert_eq!(rows[0][2], ColumnValue::Float64(12.0));
        assert_eq!(rows[0][meta.depth], ColumnValue::Int64(-1));
        assert_eq!(rows[0][meta.count], ColumnValue::Int64(4));
        assert_eq!(meta.row_key(&rows[0]), Some("root|a"));

        assert_eq!(rows[1][meta.depth], ColumnValue::Int64(1));
        assert_eq!(meta.row_key(&rows[2]), Some("root|b|p2"));
        assert_eq!(rows[2][meta.parent_idx], ColumnValue::Int64(1));
        assert_eq!(rows[2][meta.idx_pointer], ColumnValue::Int64(2));
        assert_eq!(rows[2][meta.filter_count], ColumnValue::Null);
    }
}
