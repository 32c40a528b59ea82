/// LiveGrid Table Implementation
///
/// The Table is the canonical row store: positional row storage, a
/// primary-key index and a change feed. It is the single writer of row
/// contents; views hold positions only and read rows through `row_at`.
///
/// # Examples
///
/// ```
/// use livegrid::{Table, Schema, ColumnType, ColumnValue};
///
/// let schema = Schema::new(vec![
///     ("id".to_string(), ColumnType::String, false),
///     ("price".to_string(), ColumnType::Float64, false),
/// ]);
///
/// let mut table = Table::new("prices".to_string(), schema);
/// let pos = table.insert(vec!["A".into(), ColumnValue::Float64(1.5)]).unwrap();
///
/// assert_eq!(pos, 0);
/// assert_eq!(table.position_of("A"), Some(0));
/// ```

use crate::changeset::{CellChange, Subscribers, SubscriptionId, TableChange, TableListener};
use crate::error::{GridError, Result};
use crate::value::{ColumnType, ColumnValue, Row, RowKey};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

static NULL_VALUE: ColumnValue = ColumnValue::Null;

/// One column of a schema
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Explicit wire position; metadata columns start after the largest one
    pub key: Option<usize>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            column_type,
            nullable: false,
            key: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_key(mut self, key: usize) -> Self {
        self.key = Some(key);
        self
    }
}

/// Schema definition with column names and types.
///
/// The primary key column defaults to the first column.
///
/// ```
/// use livegrid::{Schema, ColumnType};
///
/// let schema = Schema::new(vec![
///     ("symbol".to_string(), ColumnType::String, false),
///     ("price".to_string(), ColumnType::Float64, true),
/// ])
/// .with_primary_key("symbol")
/// .unwrap();
///
/// assert_eq!(schema.get_column_index("price"), Some(1));
/// assert_eq!(schema.primary_key(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    primary_key: usize,
}

impl Schema {
    /// Creates a schema from (column_name, column_type, is_nullable) tuples.
    pub fn new(columns: Vec<(String, ColumnType, bool)>) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, column_type, nullable)| ColumnDef {
                name,
                column_type,
                nullable,
                key: None,
            })
            .collect();
        Schema { columns, primary_key: 0 }
    }

    pub fn from_defs(columns: Vec<ColumnDef>) -> Self {
        Schema { columns, primary_key: 0 }
    }

    pub fn with_primary_key(mut self, name: &str) -> Result<Self> {
        self.primary_key = self
            .get_column_index(name)
            .ok_or_else(|| GridError::ColumnNotFound(name.to_string()))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn get_column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Like `get_column_index`, but a missing column is an error.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.get_column_index(name)
            .ok_or_else(|| GridError::ColumnNotFound(name.to_string()))
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    pub fn get_column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.column_type)
    }

    pub fn primary_key(&self) -> usize {
        self.primary_key
    }

    /// Validate and convert a value for the given column
    fn validate_value(&self, index: usize, value: ColumnValue) -> Result<ColumnValue> {
        let def = self.columns.get(index).ok_or(GridError::OutOfRange {
            index,
            len: self.columns.len(),
        })?;

        if value.is_null() {
            if !def.nullable {
                return Err(GridError::InvalidArgument(format!(
                    "Column '{}' is not nullable",
                    def.name
                )));
            }
            return Ok(ColumnValue::Null);
        }

        let value = value.coerce(def.column_type);
        match value.column_type() {
            Some(actual) if actual == def.column_type => Ok(value),
            actual => Err(GridError::TypeMismatch {
                column: def.name.clone(),
                expected: def.column_type.to_string(),
                actual: actual.map_or("Null".to_string(), |t| t.to_string()),
            }),
        }
    }
}

/// Root table owning its rows.
pub struct Table {
    name: String,
    schema: Schema,
    rows: Vec<Row>,
    key_index: HashMap<RowKey, usize>,
    subscribers: Subscribers,
}

impl Table {
    pub fn new(name: String, schema: Schema) -> Self {
        Table {
            name,
            schema,
            rows: Vec::new(),
            key_index: HashMap::new(),
            subscribers: Subscribers::new(),
        }
    }

    /// Build a table from a JSON array of objects keyed by column name.
    /// Loading happens before any listener can subscribe, so no events fire.
    pub fn from_json(name: &str, schema: Schema, json: &str) -> Result<Table> {
        let parsed: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(json)?;
        let mut table = Table::new(name.to_string(), schema);

        for (row_idx, obj) in parsed.iter().enumerate() {
            let mut row = Vec::with_capacity(table.schema.len());
            for def in table.schema.columns() {
                let value = match obj.get(&def.name) {
                    Some(v) => ColumnValue::from_json(v)
                        .map_err(|e| GridError::Parse(format!("Row {}: {}", row_idx, e)))?,
                    None => ColumnValue::Null,
                };
                row.push(value);
            }
            table.insert(row)?;
        }

        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[inline]
    pub fn row_at(&self, position: usize) -> Option<&Row> {
        self.rows.get(position)
    }

    pub fn row(&self, position: usize) -> Result<&Row> {
        self.rows.get(position).ok_or(GridError::OutOfRange {
            index: position,
            len: self.rows.len(),
        })
    }

    /// Cell value by position and column index; NULL when out of range.
    #[inline]
    pub fn value(&self, position: usize, column: usize) -> &ColumnValue {
        self.rows
            .get(position)
            .and_then(|row| row.get(column))
            .unwrap_or(&NULL_VALUE)
    }

    pub fn key_at(&self, position: usize) -> Option<RowKey> {
        self.rows
            .get(position)
            .map(|row| row[self.schema.primary_key()].to_key())
    }

    pub fn position_of(&self, key: &str) -> Option<usize> {
        self.key_index.get(key).copied()
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &Row> + '_ {
        self.rows.iter()
    }

    /// Append a row, returning its position.
    pub fn insert(&mut self, row: Row) -> Result<usize> {
        if row.len() != self.schema.len() {
            return Err(GridError::InvalidArgument(format!(
                "Row has {} values, schema has {} columns",
                row.len(),
                self.schema.len()
            )));
        }

        let row = row
            .into_iter()
            .enumerate()
            .map(|(i, value)| self.schema.validate_value(i, value))
            .collect::<Result<Row>>()?;

        let key = row[self.schema.primary_key()].to_key();
        if self.key_index.contains_key(&key) {
            return Err(GridError::DuplicateKey(key));
        }

        let position = self.rows.len();
        self.key_index.insert(key, position);
        self.rows.push(row.clone());

        self.publish(TableChange::RowInserted { position, row })?;
        Ok(position)
    }

    /// Apply (column index, value) pairs to the row at `position`.
    pub fn update(
        &mut self,
        position: usize,
        updates: &[(usize, ColumnValue)],
    ) -> Result<Vec<CellChange>> {
        let len = self.rows.len();
        if position >= len {
            return Err(GridError::OutOfRange { index: position, len });
        }

        let mut validated = Vec::with_capacity(updates.len());
        for (column, value) in updates {
            if *column == self.schema.primary_key() {
                return Err(GridError::InvalidArgument(
                    "Primary key column cannot be updated".to_string(),
                ));
            }
            validated.push((*column, self.schema.validate_value(*column, value.clone())?));
        }

        let row = &mut self.rows[position];
        let mut changes = Vec::with_capacity(validated.len());
        for (column, new_value) in validated {
            let old_value = std::mem::replace(&mut row[column], new_value.clone());
            changes.push(CellChange {
                column,
                old_value,
                new_value,
            });
        }

        self.publish(TableChange::RowUpdated {
            position,
            changes: changes.clone(),
        })?;
        Ok(changes)
    }

    pub fn update_by_key(
        &mut self,
        key: &str,
        updates: &[(usize, ColumnValue)],
    ) -> Result<Vec<CellChange>> {
        let position = self
            .position_of(key)
            .ok_or_else(|| GridError::NotFound(format!("key '{}'", key)))?;
        self.update(position, updates)
    }

    /// Remove the row with the given key. Every later position shifts down by one.
    pub fn remove(&mut self, key: &str) -> Result<Row> {
        let position = self
            .key_index
            .remove(key)
            .ok_or_else(|| GridError::NotFound(format!("key '{}'", key)))?;

        let row = self.rows.remove(position);
        for stored in self.key_index.values_mut() {
            if *stored > position {
                *stored -= 1;
            }
        }

        self.publish(TableChange::RowRemoved {
            position,
            key: key.to_string(),
            row: row.clone(),
        })?;
        Ok(row)
    }

    /// Distinct values of a string column, sorted. With a prefix, only values
    /// starting with it (case-insensitive) are returned.
    pub fn get_unique_values_for_column(
        &self,
        name: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<String>> {
        let column = self.schema.column_index(name)?;
        let def = &self.schema.columns()[column];
        if def.column_type != ColumnType::String {
            return Err(GridError::TypeMismatch {
                column: name.to_string(),
                expected: ColumnType::String.to_string(),
                actual: def.column_type.to_string(),
            });
        }

        let prefix = prefix.map(str::to_lowercase);
        let mut seen: BTreeMap<&str, ()> = BTreeMap::new();
        for row in &self.rows {
            if let ColumnValue::String(s) = &row[column] {
                let matches = prefix
                    .as_deref()
                    .map_or(true, |p| s.to_lowercase().starts_with(p));
                if matches {
                    seen.insert(s.as_str(), ());
                }
            }
        }

        Ok(seen.into_keys().map(str::to_string).collect())
    }

    // === Change feed ===

    pub fn subscribe(&mut self, listener: Rc<RefCell<dyn TableListener>>) -> SubscriptionId {
        self.subscribers.add(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Notify listeners in registration order. The mutation is already
    /// committed; the first listener error stops delivery and is returned,
    /// so later listeners miss this change.
    fn publish(&mut self, change: TableChange) -> Result<()> {
        for listener in self.subscribers.snapshot() {
            let mut listener = listener.try_borrow_mut().map_err(|_| {
                GridError::InvalidState(format!(
                    "listener on table '{}' is busy during a table change",
                    self.name
                ))
            })?;
            listener.on_change(self, &change)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("rows", &self.rows.len())
            .field("listeners", &self.subscribers.len())
            .finish()
    }
}
