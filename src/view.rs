/// LiveGrid View
///
/// A `View` is one client's window onto a `Table`. It holds the client's
/// configuration (sort, filter, group-by, aggregations) and exactly one
/// active representation: a flat `RowSet`, or a `GroupRowSet` while the
/// group-by is non-empty.
///
/// Configuration methods answer directly with a `DataResponse`. Table
/// changes arrive through the `TableListener` impl and are pushed into the
/// view's `UpdateQueue`, which the caller drains and delivers.

use crate::changeset::{SubscriptionId, TableChange, TableListener};
use crate::config::GridConfig;
use crate::error::{GridError, Result};
use crate::filter::{add_filter, remove_filter_for_column, ActiveFilter, Filter, FilterCompiler, PredicateCompiler};
use crate::filter_parse::{FilterParser, TextFilterParser};
use crate::group_aggregate::Aggregation;
use crate::group_rowset::GroupRowSet;
use crate::protocol::{DataResponse, Range, RowMeta};
use crate::rowset::{RowPatch, RowSet};
use crate::sort::SortColumn;
use crate::table::Table;
use crate::update_queue::{Batch, UpdateQueue};
use crate::value::{ColumnValue, RowKey};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Client configuration of a view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewSpec {
    pub sort: Vec<SortColumn>,
    pub filter: Option<Filter>,
    pub group_by: Vec<String>,
    pub aggregations: Vec<Aggregation>,
}

impl ViewSpec {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug)]
pub enum Representation {
    Flat(RowSet),
    Grouped(GroupRowSet),
}

impl Representation {
    pub fn size(&self) -> usize {
        match self {
            Representation::Flat(rs) => rs.size(),
            Representation::Grouped(grs) => grs.size(),
        }
    }

    pub fn meta(&self) -> &RowMeta {
        match self {
            Representation::Flat(rs) => rs.meta(),
            Representation::Grouped(grs) => grs.meta(),
        }
    }

    fn range(&self) -> Range {
        match self {
            Representation::Flat(rs) => rs.range(),
            Representation::Grouped(grs) => grs.range(),
        }
    }
}

pub struct View {
    spec: ViewSpec,
    representation: Representation,
    queue: UpdateQueue,
    config: GridConfig,
    compiler: Rc<dyn PredicateCompiler>,
    parser: Rc<dyn FilterParser>,
    subscription: Option<SubscriptionId>,
    last_size: usize,
}

impl View {
    /// Build a view over `table` without subscribing it
    pub fn new(table: &Table, spec: ViewSpec, config: &GridConfig) -> Result<Self> {
        Self::with_collaborators(table, spec, config, Rc::new(FilterCompiler), Rc::new(TextFilterParser))
    }

    pub fn with_collaborators(
        table: &Table,
        spec: ViewSpec,
        config: &GridConfig,
        compiler: Rc<dyn PredicateCompiler>,
        parser: Rc<dyn FilterParser>,
    ) -> Result<Self> {
        let representation = Self::build(table, &spec, config, compiler.as_ref(), Range::NULL)?;
        let last_size = representation.size();
        Ok(View {
            spec,
            representation,
            queue: UpdateQueue::new(config.queue_warn_threshold),
            config: config.clone(),
            compiler,
            parser,
            subscription: None,
            last_size,
        })
    }

    /// Build a view and subscribe it to the table's change feed
    pub fn attach(table: &mut Table, spec: ViewSpec, config: &GridConfig) -> Result<Rc<RefCell<View>>> {
        let view = Rc::new(RefCell::new(View::new(table, spec, config)?));
        let listener: Rc<RefCell<dyn TableListener>> = view.clone();
        let id = table.subscribe(listener);
        view.borrow_mut().subscription = Some(id);
        log::info!(
            "view attached to table '{}' ({} rows, {} listeners)",
            table.name(),
            table.len(),
            table.listener_count()
        );
        Ok(view)
    }

    /// Deregister from the table. Returns false if the view was not attached.
    pub fn teardown(&mut self, table: &mut Table) -> bool {
        let Some(id) = self.subscription.take() else {
            return false;
        };
        let removed = table.unsubscribe(id);
        log::info!("view detached from table '{}'", table.name());
        removed
    }

    /// Representation for `spec`, with its window placed at `range`
    fn build(
        table: &Table,
        spec: &ViewSpec,
        config: &GridConfig,
        compiler: &dyn PredicateCompiler,
        range: Range,
    ) -> Result<Representation> {
        let mut representation = if spec.group_by.is_empty() {
            let mut rs = RowSet::new(table);
            if !spec.sort.is_empty() {
                rs.sort(table, &spec.sort)?;
            }
            if let Some(filter) = &spec.filter {
                rs.filter(table, filter.clone(), compiler)?;
            }
            Representation::Flat(rs)
        } else {
            let filter = spec
                .filter
                .clone()
                .map(|f| ActiveFilter::compile(f, table.schema(), compiler))
                .transpose()?;
            Representation::Grouped(GroupRowSet::new(
                table,
                &spec.group_by,
                &spec.sort,
                filter,
                &spec.aggregations,
                config,
            )?)
        };
        if !range.is_empty() || range.buffer_size.is_some() {
            match &mut representation {
                Representation::Flat(rs) => rs.set_range(table, range, false),
                Representation::Grouped(grs) => grs.set_range(table, range, false),
            };
        }
        Ok(representation)
    }

    // === Accessors ===

    pub fn spec(&self) -> &ViewSpec {
        &self.spec
    }

    pub fn representation(&self) -> &Representation {
        &self.representation
    }

    pub fn is_grouped(&self) -> bool {
        matches!(self.representation, Representation::Grouped(_))
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn meta(&self) -> &RowMeta {
        self.representation.meta()
    }

    /// Number of visible rows
    pub fn size(&self) -> usize {
        self.representation.size()
    }

    pub fn range(&self) -> Range {
        self.representation.range()
    }

    /// Batches queued since the last drain
    pub fn pending_updates(&self) -> &[Batch] {
        self.queue.batches()
    }

    pub fn drain_updates(&mut self) -> Vec<Batch> {
        self.queue.drain()
    }

    /// Flags responses whose size differs from the last one the client saw
    fn respond(&mut self, resp: DataResponse) -> DataResponse {
        let changed = resp.size != self.last_size;
        self.last_size = resp.size;
        if changed {
            resp.with_size_message()
        } else {
            resp
        }
    }

    // === Window ===

    /// Move the window; only rows the client does not hold are returned.
    /// A range without a buffer gets the configured default buffer.
    pub fn set_range(&mut self, table: &Table, range: Range) -> DataResponse {
        let range = match range.buffer_size {
            None if self.config.default_buffer_size > 0 => range.with_buffer(self.config.default_buffer_size),
            _ => range,
        };
        let resp = match &mut self.representation {
            Representation::Flat(rs) => rs.set_range(table, range, true),
            Representation::Grouped(grs) => grs.set_range(table, range, true),
        };
        self.respond(resp)
    }

    pub fn current_range(&self, table: &Table) -> DataResponse {
        match &self.representation {
            Representation::Flat(rs) => rs.current_range(table),
            Representation::Grouped(grs) => grs.current_range(table),
        }
    }

    // === Configuration ===

    /// Re-sort the view. The recorded spec keeps the columns the order
    /// actually follows, so an unsupported request leaves it unchanged.
    pub fn sort(&mut self, table: &Table, columns: &[SortColumn]) -> Result<DataResponse> {
        let (resp, applied) = match &mut self.representation {
            Representation::Flat(rs) => (rs.sort(table, columns)?, rs.sort_columns().to_vec()),
            Representation::Grouped(grs) => (grs.sort(table, columns)?, grs.sort_columns().to_vec()),
        };
        self.spec.sort = applied;
        Ok(self.respond(resp))
    }

    /// Replace the filter
    pub fn filter(&mut self, table: &Table, filter: Filter) -> Result<DataResponse> {
        let resp = match &mut self.representation {
            Representation::Flat(rs) => rs.filter(table, filter.clone(), self.compiler.as_ref())?,
            Representation::Grouped(grs) => {
                let active = ActiveFilter::compile(filter.clone(), table.schema(), self.compiler.as_ref())?;
                grs.filter(table, active)
            }
        };
        self.spec.filter = Some(filter);
        Ok(self.respond(resp))
    }

    /// Merge `filter` into the current filter
    pub fn add_filter(&mut self, table: &Table, filter: Filter) -> Result<DataResponse> {
        match add_filter(self.spec.filter.as_ref(), filter) {
            Some(combined) => self.filter(table, combined),
            None => Ok(self.clear_filter(table)),
        }
    }

    /// Drop every filter term on `column`
    pub fn remove_filter(&mut self, table: &Table, column: &str) -> Result<DataResponse> {
        let Some(current) = &self.spec.filter else {
            return Ok(self.current_range(table));
        };
        match remove_filter_for_column(current, column) {
            Some(rest) => self.filter(table, rest),
            None => Ok(self.clear_filter(table)),
        }
    }

    /// Parse filter text and apply it
    pub fn filter_text(&mut self, table: &Table, text: &str) -> Result<DataResponse> {
        let filter = self.parser.parse(text)?;
        self.filter(table, filter)
    }

    pub fn clear_filter(&mut self, table: &Table) -> DataResponse {
        let resp = match &mut self.representation {
            Representation::Flat(rs) => rs.clear_filter(table),
            Representation::Grouped(grs) => grs.clear_filter(table),
        };
        self.spec.filter = None;
        self.respond(resp)
    }

    /// Change the group-by. Moving between an empty and a non-empty group-by
    /// switches representation; the window restarts at 0 either way.
    pub fn group(&mut self, table: &Table, group_by: &[String]) -> Result<DataResponse> {
        let resp = match (&mut self.representation, group_by.is_empty()) {
            (Representation::Flat(rs), true) => rs.current_range(table),
            (Representation::Grouped(grs), false) => grs.group(table, group_by)?,
            (current, _) => {
                let range = current.range().reset_to_start();
                let mut spec = self.spec.clone();
                spec.group_by = group_by.to_vec();
                let next = Self::build(table, &spec, &self.config, self.compiler.as_ref(), range)?;
                log::debug!("view representation switched, group-by {:?}", group_by);
                *current = next;
                self.current_range(table)
            }
        };
        self.spec.group_by = group_by.to_vec();
        Ok(self.respond(resp))
    }

    /// Set the aggregated columns of a grouped view
    pub fn aggregate(&mut self, table: &Table, aggregations: &[Aggregation]) -> Result<DataResponse> {
        let Representation::Grouped(grs) = &mut self.representation else {
            return Err(GridError::InvalidState("aggregate requires a grouped view".to_string()));
        };
        let resp = grs.aggregate(table, aggregations)?;
        self.spec.aggregations = aggregations.to_vec();
        Ok(self.respond(resp))
    }

    /// Aggregated value of `column` for the group at `path`
    pub fn aggregate_value(&self, path: &str, column: &str) -> Result<ColumnValue> {
        match &self.representation {
            Representation::Grouped(grs) => grs.aggregate_value(path, column),
            Representation::Flat(_) => Err(GridError::InvalidState("view is not grouped".to_string())),
        }
    }

    pub fn open_tree_node(&mut self, table: &Table, path: &str) -> Result<DataResponse> {
        let Representation::Grouped(grs) = &mut self.representation else {
            return Err(GridError::InvalidState("openTreeNode requires a grouped view".to_string()));
        };
        let resp = grs.open_tree_node(table, path)?;
        Ok(self.respond(resp))
    }

    pub fn close_tree_node(&mut self, table: &Table, path: &str) -> Result<DataResponse> {
        let Representation::Grouped(grs) = &mut self.representation else {
            return Err(GridError::InvalidState("closeTreeNode requires a grouped view".to_string()));
        };
        let resp = grs.close_tree_node(table, path)?;
        Ok(self.respond(resp))
    }

    /// Distinct values of a string column. Flat views only list values of
    /// rows passing the filter.
    pub fn distinct_values(&self, table: &Table, column: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        match &self.representation {
            Representation::Flat(rs) => rs.distinct_values(table, column, prefix),
            Representation::Grouped(_) => table.get_unique_values_for_column(column, prefix),
        }
    }

    // === Selection ===

    pub fn select(&mut self, table: &Table, indices: &[usize]) -> Result<DataResponse> {
        match &mut self.representation {
            Representation::Flat(rs) => rs.select(table, indices),
            Representation::Grouped(grs) => grs.select(table, indices),
        }
    }

    pub fn select_row(&mut self, table: &Table, idx: usize, keep_existing: bool) -> Result<DataResponse> {
        match &mut self.representation {
            Representation::Flat(rs) => rs.select_row(table, idx, keep_existing),
            Representation::Grouped(grs) => grs.select_row(table, idx, keep_existing),
        }
    }

    pub fn select_row_range(
        &mut self,
        table: &Table,
        from: usize,
        to: usize,
        keep_existing: bool,
    ) -> Result<DataResponse> {
        match &mut self.representation {
            Representation::Flat(rs) => rs.select_row_range(table, from, to, keep_existing),
            Representation::Grouped(grs) => grs.select_row_range(table, from, to, keep_existing),
        }
    }

    pub fn selected_keys(&self) -> Vec<RowKey> {
        let selection = match &self.representation {
            Representation::Flat(rs) => rs.selection(),
            Representation::Grouped(grs) => grs.selection(),
        };
        let mut keys: Vec<RowKey> = selection.keys().iter().cloned().collect();
        keys.sort();
        keys
    }
}

/// Queue what a flat row set reported for one table change
fn queue_patch(queue: &mut UpdateQueue, meta: &RowMeta, last_size: usize, change: &TableChange, patch: RowPatch) {
    match (change, patch) {
        (_, RowPatch::Nothing { size }) => {
            if size != last_size {
                queue.resize(size);
            }
        }
        (TableChange::RowInserted { .. }, RowPatch::Rows(resp)) => queue.insert(resp.rows, resp.size),
        (TableChange::RowUpdated { changes, .. }, RowPatch::Rows(resp)) => {
            for row in &resp.rows {
                let Some(idx) = meta.row_idx(row) else {
                    continue;
                };
                let values = changes
                    .iter()
                    .map(|c| (meta.slot(c.column), c.new_value.clone()))
                    .collect();
                queue.update(idx, values);
            }
            if resp.size != last_size {
                queue.resize(resp.size);
            }
        }
        (_, RowPatch::Rows(resp)) | (_, RowPatch::Shifted(resp)) => queue.replace(resp.rows, resp.size),
    }
}

impl TableListener for View {
    fn on_change(&mut self, table: &Table, change: &TableChange) -> Result<()> {
        match &mut self.representation {
            Representation::Flat(rs) => {
                let patch = match change {
                    TableChange::RowInserted { position, .. } => rs.insert(table, *position),
                    TableChange::RowUpdated { position, changes } => rs.update(table, *position, changes),
                    TableChange::RowRemoved { position, key, .. } => rs.delete(table, *position, key),
                };
                match patch {
                    Ok(patch) => queue_patch(&mut self.queue, rs.meta(), self.last_size, change, patch),
                    Err(e) if e.is_unsupported() => {
                        log::warn!("{}; resyncing view", e);
                        let resp = rs.resync(table)?;
                        self.queue.replace(resp.rows, resp.size);
                    }
                    Err(e) => return Err(e),
                }
            }
            Representation::Grouped(grs) => {
                let resp = match change {
                    TableChange::RowInserted { position, .. } => grs.insert(table, *position)?,
                    TableChange::RowUpdated { position, changes } => grs.update(table, *position, changes)?,
                    TableChange::RowRemoved { position, key, row } => grs.delete(table, *position, key, row)?,
                };
                self.queue.replace(resp.rows, resp.size);
            }
        }
        self.last_size = self.representation.size();
        Ok(())
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("spec", &self.spec)
            .field("size", &self.size())
            .field("pending", &self.queue.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Schema;
    use crate::value::ColumnType;

    // sku0..sku5; colour red/blue; stock = 10 * i
    fn make_table() -> Table {
        let schema = Schema::new(vec![
            ("sku".to_string(), ColumnType::String, false),
            ("colour".to_string(), ColumnType::String, false),
            ("stock".to_string(), ColumnType::Int32, false),
        ]);
        let mut table = Table::new("inventory".to_string(), schema);
        for i in 0..6 {
            let colour = if i % 3 == 0 { "red" } else { "blue" };
            table
                .insert(vec![format!("sku{}", i).into(), colour.into(), (10 * i as i32).into()])
                .unwrap();
        }
        table
    }

    fn keys(view: &View, resp: &DataResponse) -> Vec<String> {
        resp.rows
            .iter()
            .map(|r| view.meta().row_key(r).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_attach_and_teardown() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut table = make_table();
        let view = View::attach(&mut table, ViewSpec::default(), &GridConfig::default()).unwrap();
        assert_eq!(table.listener_count(), 1);
        assert!(view.borrow().is_attached());

        assert!(view.borrow_mut().teardown(&mut table));
        assert_eq!(table.listener_count(), 0);
        assert!(!view.borrow_mut().teardown(&mut table));

        // detached views no longer see changes
        table.insert(vec!["sku6".into(), "red".into(), 60.into()]).unwrap();
        assert_eq!(view.borrow().size(), 6);
        assert!(view.borrow().pending_updates().is_empty());
    }

    #[test]
    fn test_spec_from_json() {
        let table = make_table();
        let spec = ViewSpec::from_json(
            r#"{"sort":[{"column":"stock","sortType":"D"}],
                "filter":{"type":"IN","colName":"colour","values":["blue"]}}"#,
        )
        .unwrap();
        let mut view = View::new(&table, spec, &GridConfig::default()).unwrap();
        let resp = view.set_range(&table, Range::new(0, 10));
        assert_eq!(keys(&view, &resp), vec!["sku5", "sku4", "sku2", "sku1"]);
        assert!(view.spec().group_by.is_empty());
    }

    #[test]
    fn test_inverted_range_then_sort() {
        let table = make_table();
        let mut view = View::new(&table, ViewSpec::default(), &GridConfig::default()).unwrap();
        let range: Range = serde_json::from_str(r#"{"from":8,"to":3}"#).unwrap();
        let resp = view.set_range(&table, range);
        assert!(resp.rows.is_empty());

        let resp = view.sort(&table, &[SortColumn::ascending("stock")]).unwrap();
        assert!(resp.rows.is_empty());
        assert_eq!(resp.size, 6);
        assert_eq!(view.range(), Range::new(0, 0));
    }

    #[test]
    fn test_unsupported_sort_keeps_spec() {
        let table = make_table();
        let spec = ViewSpec {
            sort: vec![SortColumn::descending("stock")],
            ..ViewSpec::default()
        };
        let mut view = View::new(&table, spec, &GridConfig::default()).unwrap();
        view.sort(
            &table,
            &[
                SortColumn::ascending("colour"),
                SortColumn::ascending("stock"),
                SortColumn::ascending("sku"),
                SortColumn::descending("colour"),
            ],
        )
        .unwrap();
        assert_eq!(view.spec().sort, vec![SortColumn::descending("stock")]);

        let resp = view.set_range(&table, Range::new(0, 10));
        assert_eq!(keys(&view, &resp), vec!["sku5", "sku4", "sku3", "sku2", "sku1", "sku0"]);
    }

    #[test]
    fn test_size_change_is_flagged() {
        let table = make_table();
        let mut view = View::new(&table, ViewSpec::default(), &GridConfig::default()).unwrap();
        let resp = view.set_range(&table, Range::new(0, 10));
        assert_eq!(resp.size_message_required, None);

        let resp = view.filter_text(&table, "colour = 'red'").unwrap();
        assert_eq!(resp.size, 2);
        assert_eq!(resp.size_message_required, Some(true));
        let resp = view.sort(&table, &[SortColumn::descending("stock")]).unwrap();
        assert_eq!(resp.size_message_required, None);

        let resp = view.group(&table, &["colour".to_string()]).unwrap();
        assert_eq!(resp.size, 1);
        assert_eq!(resp.size_message_required, Some(true));
        let resp = view.open_tree_node(&table, "root|red").unwrap();
        assert_eq!(resp.size, 3);
        assert_eq!(resp.size_message_required, Some(true));
        let resp = view.close_tree_node(&table, "root|red").unwrap();
        assert_eq!(resp.size, 1);
        assert_eq!(resp.size_message_required, Some(true));
    }

    #[test]
    fn test_filter_composition() {
        let table = make_table();
        let mut view = View::new(&table, ViewSpec::default(), &GridConfig::default()).unwrap();
        view.set_range(&table, Range::new(0, 10));

        let resp = view.filter_text(&table, "colour = 'red'").unwrap();
        assert_eq!(keys(&view, &resp), vec!["sku0", "sku3"]);

        let resp = view.add_filter(&table, Filter::Gt { column: "stock".into(), value: 5.into() }).unwrap();
        assert_eq!(keys(&view, &resp), vec!["sku3"]);

        let resp = view.remove_filter(&table, "colour").unwrap();
        assert_eq!(resp.size, 5);
        let resp = view.remove_filter(&table, "stock").unwrap();
        assert_eq!(resp.size, 6);
        assert_eq!(view.spec().filter, None);
        assert!(view.filter_text(&table, "colour ==").is_err());
    }

    #[test]
    fn test_switch_representation() {
        let table = make_table();
        let mut view = View::new(&table, ViewSpec::default(), &GridConfig::default()).unwrap();
        view.set_range(&table, Range::new(0, 10));
        assert!(matches!(
            view.aggregate(&table, &[Aggregation::sum("stock")]),
            Err(GridError::InvalidState(_))
        ));
        assert!(view.open_tree_node(&table, "root|red").is_err());

        let resp = view.group(&table, &["colour".to_string()]).unwrap();
        assert!(view.is_grouped());
        assert_eq!(keys(&view, &resp), vec!["root|blue", "root|red"]);

        view.aggregate(&table, &[Aggregation::sum("stock")]).unwrap();
        assert_eq!(view.aggregate_value("root|red", "stock").unwrap(), ColumnValue::Float64(30.0));
        let resp = view.open_tree_node(&table, "root|red").unwrap();
        assert_eq!(resp.size, 4);

        let resp = view.group(&table, &[]).unwrap();
        assert!(!view.is_grouped());
        assert_eq!(resp.size, 6);
        assert_eq!(resp.rows.len(), 6);
    }

    #[test]
    fn test_default_buffer_applied() {
        let table = make_table();
        let config = GridConfig {
            default_buffer_size: 2,
            ..GridConfig::default()
        };
        let mut view = View::new(&table, ViewSpec::default(), &config).unwrap();
        let resp = view.set_range(&table, Range::new(2, 3));
        assert_eq!(keys(&view, &resp), vec!["sku0", "sku1", "sku2", "sku3", "sku4"]);
        assert_eq!(view.range().buffer_size, Some(2));
    }

    #[test]
    fn test_grouped_changes_queue_replace() {
        let mut table = make_table();
        let spec = ViewSpec {
            group_by: vec!["colour".to_string()],
            ..ViewSpec::default()
        };
        let view = View::attach(&mut table, spec, &GridConfig::default()).unwrap();
        view.borrow_mut().set_range(&table, Range::new(0, 10));

        table.insert(vec!["sku6".into(), "green".into(), 1.into()]).unwrap();
        table.update_by_key("sku0", &[(2, 7.into())]).unwrap();
        let batches = view.borrow_mut().drain_updates();
        assert_eq!(batches.len(), 2);
        match &batches[0] {
            Batch::Replace { rows, size } => {
                assert_eq!(*size, 3);
                assert_eq!(rows.len(), 3);
            }
            other => panic!("expected replace, got {:?}", other),
        }
    }
}
