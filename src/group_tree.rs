/// LiveGrid group tree
///
/// Rows are grouped one level per group-by column into an arena of
/// `GroupNode`s addressed by `NodeId`. The root (depth 0) is always
/// expanded. Only the first level is built up front; a node's children are
/// built the first time it is expanded, from the row positions it holds.
///
/// # Node members
///
/// A node either holds table positions (`Members::Rows`, in sort order) or
/// child groups (`Members::Groups`), never both. At the deepest level the
/// positions are the node's leaf rows; above it they mean "not expanded
/// yet".
///
/// # Cached sizes
///
/// `exposed` is the number of visible rows beneath an expanded node, so a
/// window walk can step over a whole subtree in O(1). Collapsing a node
/// leaves its descendants' `expanded` flags alone; reopening it restores
/// them.

use crate::changeset::{CellChange, IndexAdjuster};
use crate::config::GridConfig;
use crate::error::{GridError, Result};
use crate::filter::ActiveFilter;
use crate::group_aggregate::{AggregateCell, GroupAggregator};
use crate::sort::{SortDirection, SortIndex};
use crate::table::Table;
use crate::value::{compare_values, values_equal, ColumnValue, Row};
use std::cmp::Ordering;
use std::collections::HashMap;

pub type NodeId = usize;

pub const ROOT: NodeId = 0;

/// Escape character of path segments. Separators must be ASCII and differ from it.
const ESCAPE: char = '%';

/// Segment of a group path for `value`. The escape character and the
/// separator are percent-encoded, and NULL gets a key no escaped value can
/// produce, so distinct values never share a path.
fn segment(value: &ColumnValue, separator: char) -> String {
    if value.is_null() {
        return format!("{}null", ESCAPE);
    }
    let mut out = String::new();
    for c in value.to_key().chars() {
        if c == ESCAPE || c == separator {
            out.push_str(&format!("{}{:02X}", ESCAPE, c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone)]
enum Members {
    Rows {
        all: Vec<usize>,
        /// Positions passing the active filter; None without a filter
        filtered: Option<Vec<usize>>,
    },
    Groups {
        /// Children in display order
        order: Vec<NodeId>,
        by_key: HashMap<String, NodeId>,
    },
}

#[derive(Debug, Clone)]
pub struct GroupNode {
    path: String,
    value: ColumnValue,
    depth: usize,
    expanded: bool,
    parent: Option<NodeId>,
    members: Members,
    total: usize,
    count: usize,
    exposed: usize,
    aggregates: Vec<AggregateCell>,
}

impl GroupNode {
    fn new(path: String, value: ColumnValue, depth: usize, parent: Option<NodeId>, members: Members) -> Self {
        GroupNode {
            path,
            value,
            depth,
            expanded: false,
            parent,
            members,
            total: 0,
            count: 0,
            exposed: 0,
            aggregates: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Group column value shared by every row under this node
    pub fn value(&self) -> &ColumnValue {
        &self.value
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Rows under this node, ignoring the filter
    pub fn total(&self) -> usize {
        self.total
    }

    /// Rows under this node passing the filter
    pub fn count(&self) -> usize {
        self.count
    }

    /// Visible rows beneath this node; 0 while collapsed
    pub fn exposed(&self) -> usize {
        self.exposed
    }

    pub fn aggregates(&self) -> &[AggregateCell] {
        &self.aggregates
    }

    /// Signed wire depth: positive expanded, negative collapsed
    pub fn signed_depth(&self) -> i64 {
        if self.expanded {
            self.depth as i64
        } else {
            -(self.depth as i64)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub column: usize,
    pub direction: SortDirection,
}

#[derive(Debug, Clone)]
pub struct GroupTree {
    nodes: Vec<GroupNode>,
    paths: HashMap<String, NodeId>,
    levels: Vec<Level>,
    aggregator: GroupAggregator,
    filtered: bool,
    separator: char,
}

fn insert_sorted(list: &mut Vec<usize>, position: usize, cmp: impl Fn(usize, usize) -> Ordering) {
    let at = list.partition_point(|&p| cmp(p, position) == Ordering::Less);
    list.insert(at, position);
}

impl GroupTree {
    /// Group the sort order by `group_by`, building the first level only.
    pub fn build(
        table: &Table,
        sort: &SortIndex,
        group_by: &[String],
        aggregator: GroupAggregator,
        filter: Option<&ActiveFilter>,
        config: &GridConfig,
    ) -> Result<Self> {
        if group_by.is_empty() {
            return Err(GridError::InvalidArgument("group-by needs at least one column".to_string()));
        }
        if !config.path_separator.is_ascii() || config.path_separator == ESCAPE {
            return Err(GridError::InvalidArgument(format!(
                "path separator must be an ASCII character other than '{}'",
                ESCAPE
            )));
        }
        let levels = group_by
            .iter()
            .map(|name| {
                Ok(Level {
                    column: table.schema().column_index(name)?,
                    direction: Self::direction_for(sort, name),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let all: Vec<usize> = sort.positions().collect();
        let filtered = filter.map(|f| {
            all.iter()
                .copied()
                .filter(|&p| f.matches_position(table, p))
                .collect()
        });
        let mut root = GroupNode::new(
            config.root_path(),
            ColumnValue::Null,
            0,
            None,
            Members::Rows { all, filtered },
        );
        root.expanded = true;

        let mut tree = GroupTree {
            paths: HashMap::from([(root.path.clone(), ROOT)]),
            nodes: vec![root],
            levels,
            aggregator,
            filtered: filter.is_some(),
            separator: config.path_separator,
        };
        tree.make_children(table, ROOT);
        tree.refresh_node(table, ROOT);
        log::debug!(
            "built group tree on {:?}: {} top-level groups over {} rows",
            group_by,
            tree.child_count(ROOT),
            tree.nodes[ROOT].total
        );
        Ok(tree)
    }

    /// Key order of a group column follows its direction among the sort columns
    pub fn direction_for(sort: &SortIndex, column: &str) -> SortDirection {
        sort.columns()
            .iter()
            .find(|c| c.column == column)
            .map_or(SortDirection::Ascending, |c| c.direction)
    }

    // === Accessors ===

    /// Visible rows of the whole tree
    pub fn size(&self) -> usize {
        self.nodes[ROOT].exposed
    }

    pub fn node(&self, id: NodeId) -> &GroupNode {
        &self.nodes[id]
    }

    pub fn node_id(&self, path: &str) -> Result<NodeId> {
        self.paths
            .get(path)
            .copied()
            .ok_or_else(|| GridError::NotFound(format!("tree node '{}'", path)))
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn aggregator(&self) -> &GroupAggregator {
        &self.aggregator
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// True for nodes at the deepest group level, whose members are leaf rows
    pub fn is_leaf_container(&self, id: NodeId) -> bool {
        self.nodes[id].depth == self.levels.len()
    }

    fn child_count(&self, id: NodeId) -> usize {
        match &self.nodes[id].members {
            Members::Groups { order, .. } => order.len(),
            Members::Rows { .. } => 0,
        }
    }

    /// Children with at least one visible row, in display order
    pub fn visible_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let order: &[NodeId] = match &self.nodes[id].members {
            Members::Groups { order, .. } => order,
            Members::Rows { .. } => &[],
        };
        order.iter().copied().filter(move |&c| self.nodes[c].count > 0)
    }

    /// Table positions held by a node, filtered when a filter is active
    pub fn visible_rows(&self, id: NodeId) -> &[usize] {
        match &self.nodes[id].members {
            Members::Rows { all, filtered } => filtered.as_deref().unwrap_or(all.as_slice()),
            Members::Groups { .. } => &[],
        }
    }

    /// (table column, group value) for the node and each of its ancestors
    pub fn group_values(&self, id: NodeId) -> Vec<(usize, ColumnValue)> {
        let mut values = Vec::with_capacity(self.nodes[id].depth);
        let mut cur = id;
        while let Some(parent) = self.nodes[cur].parent {
            let node = &self.nodes[cur];
            values.push((self.levels[node.depth - 1].column, node.value.clone()));
            cur = parent;
        }
        values
    }

    pub fn child_path(&self, parent: &str, segment: &str) -> String {
        format!("{}{}{}", parent, self.separator, segment)
    }

    // === Structure ===

    fn push_node(&mut self, node: GroupNode) -> NodeId {
        let id = self.nodes.len();
        self.paths.insert(node.path.clone(), id);
        self.nodes.push(node);
        id
    }

    /// Turn a node's rows into child groups keyed by the next group column
    fn make_children(&mut self, table: &Table, id: NodeId) {
        let depth = self.nodes[id].depth;
        let Some(level) = self.levels.get(depth).copied() else {
            return;
        };
        let (all, filtered) = match &mut self.nodes[id].members {
            Members::Rows { all, filtered } => (std::mem::take(all), filtered.take()),
            Members::Groups { .. } => return,
        };

        let mut buckets: Vec<(String, ColumnValue, Vec<usize>)> = Vec::new();
        let mut slot: HashMap<String, usize> = HashMap::new();
        for position in all {
            let value = table.value(position, level.column);
            let key = segment(value, self.separator);
            match slot.get(&key) {
                Some(&i) => buckets[i].2.push(position),
                None => {
                    slot.insert(key.clone(), buckets.len());
                    buckets.push((key, value.clone(), vec![position]));
                }
            }
        }
        let mut filtered_buckets = filtered.map(|positions| {
            let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
            for position in positions {
                by_key
                    .entry(segment(table.value(position, level.column), self.separator))
                    .or_default()
                    .push(position);
            }
            by_key
        });
        buckets.sort_by(|a, b| level.direction.apply(compare_values(&a.1, &b.1)));

        let parent_path = self.nodes[id].path.clone();
        let mut order = Vec::with_capacity(buckets.len());
        let mut by_key = HashMap::with_capacity(buckets.len());
        for (key, value, rows) in buckets {
            let filtered = filtered_buckets
                .as_mut()
                .map(|m| m.remove(&key).unwrap_or_default());
            let path = self.child_path(&parent_path, &key);
            let child = self.push_node(GroupNode::new(
                path,
                value,
                depth + 1,
                Some(id),
                Members::Rows { all: rows, filtered },
            ));
            self.refresh_node(table, child);
            order.push(child);
            by_key.insert(key, child);
        }
        self.nodes[id].members = Members::Groups { order, by_key };
    }

    fn child_id(&self, id: NodeId, key: &str) -> Option<NodeId> {
        match &self.nodes[id].members {
            Members::Groups { by_key, .. } => by_key.get(key).copied(),
            Members::Rows { .. } => None,
        }
    }

    /// New empty child group, placed in key order
    fn add_child(&mut self, parent: NodeId, key: String, value: ColumnValue) -> NodeId {
        let depth = self.nodes[parent].depth + 1;
        let direction = self.levels[depth - 1].direction;
        let path = self.child_path(&self.nodes[parent].path, &key);
        let filtered = self.filtered.then(Vec::new);

        let at = match &self.nodes[parent].members {
            Members::Groups { order, .. } => order.partition_point(|&c| {
                direction.apply(compare_values(&self.nodes[c].value, &value)) == Ordering::Less
            }),
            Members::Rows { .. } => 0,
        };
        let child = self.push_node(GroupNode::new(
            path,
            value,
            depth,
            Some(parent),
            Members::Rows { all: Vec::new(), filtered },
        ));
        if let Members::Groups { order, by_key } = &mut self.nodes[parent].members {
            order.insert(at, child);
            by_key.insert(key, child);
        }
        child
    }

    /// Deepest existing node on the path described by a row's values
    fn find_container(&self, values: &Row) -> NodeId {
        let mut id = ROOT;
        while let Members::Groups { by_key, .. } = &self.nodes[id].members {
            let level = self.levels[self.nodes[id].depth];
            match by_key.get(&segment(&values[level.column], self.separator)) {
                Some(&child) => id = child,
                None => break,
            }
        }
        id
    }

    // === Derived state ===

    fn recount(&mut self, id: NodeId) {
        let (total, count) = match &self.nodes[id].members {
            Members::Rows { all, filtered } => (all.len(), filtered.as_ref().map_or(all.len(), Vec::len)),
            Members::Groups { order, .. } => order.iter().fold((0, 0), |(t, c), &child| {
                (t + self.nodes[child].total, c + self.nodes[child].count)
            }),
        };
        let node = &mut self.nodes[id];
        node.total = total;
        node.count = count;
    }

    fn refresh_aggregates(&mut self, table: &Table, id: NodeId) {
        if self.aggregator.is_empty() {
            self.nodes[id].aggregates.clear();
            return;
        }
        let cells = match &self.nodes[id].members {
            Members::Rows { .. } => self.aggregator.from_rows(table, self.visible_rows(id)),
            Members::Groups { order, .. } => {
                let parts: Vec<&[AggregateCell]> = order
                    .iter()
                    .map(|&c| &self.nodes[c])
                    .filter(|c| c.count > 0)
                    .map(|c| c.aggregates.as_slice())
                    .collect();
                self.aggregator.combine(&parts)
            }
        };
        self.nodes[id].aggregates = cells;
    }

    fn compute_exposed(&self, id: NodeId) -> usize {
        let node = &self.nodes[id];
        if !node.expanded {
            return 0;
        }
        match &node.members {
            Members::Rows { .. } if self.is_leaf_container(id) => node.count,
            Members::Rows { .. } => 0,
            Members::Groups { order, .. } => order
                .iter()
                .map(|&c| &self.nodes[c])
                .filter(|c| c.count > 0)
                .map(|c| 1 + c.exposed)
                .sum(),
        }
    }

    fn refresh_node(&mut self, table: &Table, id: NodeId) {
        self.recount(id);
        self.refresh_aggregates(table, id);
        self.nodes[id].exposed = self.compute_exposed(id);
    }

    /// Refresh a node and each of its ancestors; nothing else is touched
    fn refresh_path(&mut self, table: &Table, id: NodeId) {
        let mut cur = Some(id);
        while let Some(n) = cur {
            self.refresh_node(table, n);
            cur = self.nodes[n].parent;
        }
    }

    fn refresh_exposed_path(&mut self, id: NodeId) {
        let mut cur = Some(id);
        while let Some(n) = cur {
            self.nodes[n].exposed = self.compute_exposed(n);
            cur = self.nodes[n].parent;
        }
    }

    /// Post-order refresh of a whole subtree
    fn refresh_subtree(&mut self, table: &Table, id: NodeId) {
        let children: Vec<NodeId> = match &self.nodes[id].members {
            Members::Groups { order, .. } => order.clone(),
            Members::Rows { .. } => Vec::new(),
        };
        for child in children {
            self.refresh_subtree(table, child);
        }
        self.refresh_node(table, id);
    }

    // === Expand / collapse ===

    pub fn open(&mut self, table: &Table, path: &str) -> Result<()> {
        let id = self.node_id(path)?;
        if self.nodes[id].expanded {
            return Err(GridError::InvalidState(format!("tree node '{}' is already expanded", path)));
        }
        self.expand(table, id);
        log::debug!("opened '{}'; {} visible rows", path, self.size());
        Ok(())
    }

    fn expand(&mut self, table: &Table, id: NodeId) {
        self.nodes[id].expanded = true;
        if !self.is_leaf_container(id) {
            self.make_children(table, id);
        }
        self.refresh_exposed_path(id);
    }

    pub fn close(&mut self, path: &str) -> Result<()> {
        let id = self.node_id(path)?;
        if id == ROOT {
            return Err(GridError::InvalidState("the root node cannot be collapsed".to_string()));
        }
        if !self.nodes[id].expanded {
            return Err(GridError::InvalidState(format!("tree node '{}' is already collapsed", path)));
        }
        self.nodes[id].expanded = false;
        self.refresh_exposed_path(id);
        log::debug!("closed '{}'; {} visible rows", path, self.size());
        Ok(())
    }

    /// Paths of expanded nodes reachable from the root through expanded
    /// nodes, parents before children
    pub fn expanded_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            if let Members::Groups { order, .. } = &self.nodes[id].members {
                for &child in order.iter().rev() {
                    if self.nodes[child].expanded {
                        out.push(self.nodes[child].path.clone());
                        stack.push(child);
                    }
                }
            }
        }
        out.sort_by_key(|p| p.matches(self.separator).count());
        out
    }

    /// Reopen previously expanded paths that still exist
    pub fn restore_expanded(&mut self, table: &Table, paths: &[String]) {
        for path in paths {
            if let Some(&id) = self.paths.get(path) {
                if !self.nodes[id].expanded {
                    self.expand(table, id);
                }
            }
        }
    }

    // === Filter / levels / aggregates ===

    /// Recompute each node's filtered rows. When `narrow` is set only the
    /// previously filtered rows of each node are re-tested.
    pub fn apply_filter(&mut self, table: &Table, filter: Option<&ActiveFilter>, narrow: bool) {
        for node in self.nodes.iter_mut() {
            if let Members::Rows { all, filtered } = &mut node.members {
                let next = filter.map(|f| {
                    let source: &[usize] = if narrow {
                        filtered.as_deref().unwrap_or(all.as_slice())
                    } else {
                        all.as_slice()
                    };
                    source
                        .iter()
                        .copied()
                        .filter(|&p| f.matches_position(table, p))
                        .collect()
                });
                *filtered = next;
            }
        }
        self.filtered = filter.is_some();
        self.refresh_subtree(table, ROOT);
    }

    /// Add one trailing group level, keeping the existing tree
    pub fn extend_levels(&mut self, table: &Table, column: usize, direction: SortDirection) {
        let old_depth = self.levels.len();
        self.levels.push(Level { column, direction });
        let expanded: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&id| self.nodes[id].depth == old_depth && self.nodes[id].expanded)
            .collect();
        for id in expanded {
            self.make_children(table, id);
        }
        self.refresh_subtree(table, ROOT);
    }

    pub fn set_aggregator(&mut self, table: &Table, aggregator: GroupAggregator) {
        self.aggregator = aggregator;
        self.refresh_subtree(table, ROOT);
    }

    // === Table changes ===

    fn attach(&mut self, table: &Table, sort: &SortIndex, position: usize, member: bool) -> NodeId {
        let mut id = ROOT;
        while matches!(self.nodes[id].members, Members::Groups { .. }) {
            let level = self.levels[self.nodes[id].depth];
            let value = table.value(position, level.column);
            let key = segment(value, self.separator);
            id = match self.child_id(id, &key) {
                Some(child) => child,
                None => self.add_child(id, key, value.clone()),
            };
        }

        let cmp = |a: usize, b: usize| sort.compare_positions(table, a, b);
        if let Members::Rows { all, filtered } = &mut self.nodes[id].members {
            insert_sorted(all, position, cmp);
            if let (true, Some(filtered)) = (member, filtered) {
                insert_sorted(filtered, position, cmp);
            }
        }
        id
    }

    fn detach(&mut self, id: NodeId, position: usize) {
        if let Members::Rows { all, filtered } = &mut self.nodes[id].members {
            all.retain(|&p| p != position);
            if let Some(filtered) = filtered {
                filtered.retain(|&p| p != position);
            }
        }
    }

    /// Row appended to the table at `position`
    pub fn insert_row(&mut self, table: &Table, sort: &SortIndex, position: usize, filter: Option<&ActiveFilter>) {
        let member = filter.map_or(true, |f| f.matches_position(table, position));
        let container = self.attach(table, sort, position, member);
        self.refresh_path(table, container);
    }

    /// Row `row` removed from `position`; later positions shift down
    pub fn remove_row(&mut self, table: &Table, position: usize, row: &Row) {
        let container = self.find_container(row);
        for node in self.nodes.iter_mut() {
            if let Members::Rows { all, filtered } = &mut node.members {
                IndexAdjuster::remove_and_shift(all, position);
                if let Some(filtered) = filtered {
                    IndexAdjuster::remove_and_shift(filtered, position);
                }
            }
        }
        self.refresh_path(table, container);
    }

    /// Cells of the row at `position` changed. The row is moved to its new
    /// group and place; only the old and new paths are refreshed.
    pub fn update_row(
        &mut self,
        table: &Table,
        sort: &SortIndex,
        position: usize,
        changes: &[CellChange],
        filter: Option<&ActiveFilter>,
    ) -> Result<()> {
        if changes.iter().all(|c| values_equal(&c.old_value, &c.new_value)) {
            return Ok(());
        }
        let mut old_values = table.row(position)?.clone();
        for change in changes {
            old_values[change.column] = change.old_value.clone();
        }

        let old_container = self.find_container(&old_values);
        self.detach(old_container, position);
        let member = filter.map_or(true, |f| f.matches_position(table, position));
        let new_container = self.attach(table, sort, position, member);
        if old_container != new_container {
            self.refresh_path(table, old_container);
        }
        self.refresh_path(table, new_container);
        Ok(())
    }
}
