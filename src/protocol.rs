/// Wire shapes exchanged with viewport clients
///
/// `Range` is the requested window, `DataResponse` the output of every view
/// operation, and `RowMeta` the positional layout of a wire row: data columns
/// first, then the fixed metadata columns.

use crate::table::Schema;
use crate::value::{ColumnValue, Row, RowKey};
use serde::{Deserialize, Serialize};

/// Requested visible window `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireRange")]
pub struct Range {
    pub from: usize,
    pub to: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
}

/// Range as a client sends it; `to` may precede `from`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRange {
    from: usize,
    to: usize,
    #[serde(default)]
    buffer_size: Option<usize>,
    #[serde(default)]
    reset: Option<bool>,
}

impl From<WireRange> for Range {
    fn from(wire: WireRange) -> Self {
        Range {
            buffer_size: wire.buffer_size,
            reset: wire.reset,
            ..Range::new(wire.from, wire.to)
        }
    }
}

impl Range {
    /// The collapsed sentinel returned when nothing needs sending
    pub const NULL: Range = Range {
        from: 0,
        to: 0,
        buffer_size: None,
        reset: None,
    };

    pub fn new(from: usize, to: usize) -> Self {
        Range {
            from,
            to: to.max(from),
            buffer_size: None,
            reset: None,
        }
    }

    pub fn with_buffer(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.from && idx < self.to
    }

    /// Same window moved back to start at 0, keeping its length and buffer
    pub fn reset_to_start(&self) -> Range {
        Range {
            from: 0,
            to: self.len(),
            buffer_size: self.buffer_size,
            reset: None,
        }
    }

    /// The window widened by `buffer_size` rows on both sides
    pub fn full_range(&self) -> Range {
        let buffer = self.buffer_size.unwrap_or(0);
        Range::new(self.from.saturating_sub(buffer), self.to + buffer)
    }

    /// Window limited to `size` rows
    pub fn clamp(&self, size: usize) -> Range {
        let to = self.to.min(size);
        Range::new(self.from.min(to), to)
    }

    /// Minimal window to send when moving from `previous` to `self`.
    ///
    /// Contained in previous: the NULL range. Disjoint: the whole new
    /// window. Overlapping on one side: the uncovered part. Extending on both
    /// sides: the whole new window.
    pub fn delta(&self, previous: &Range) -> Range {
        if self.from >= previous.from && self.to <= previous.to {
            Range::NULL
        } else if self.from >= previous.to || self.to <= previous.from {
            Range::new(self.from, self.to)
        } else if self.from < previous.from && self.to <= previous.to {
            Range::new(self.from, previous.from)
        } else if self.from >= previous.from && self.to > previous.to {
            Range::new(previous.to, self.to)
        } else {
            Range::new(self.from, self.to)
        }
    }
}

/// Output of any view operation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub rows: Vec<Row>,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_message_required: Option<bool>,
}

impl DataResponse {
    pub fn new(rows: Vec<Row>, size: usize) -> Self {
        DataResponse {
            rows,
            size,
            size_message_required: None,
        }
    }

    /// No rows; the size is still reported
    pub fn empty(size: usize) -> Self {
        DataResponse::new(Vec::new(), size)
    }

    pub fn with_size_message(mut self) -> Self {
        self.size_message_required = Some(true);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-row metadata written into the wire row
#[derive(Debug, Clone, PartialEq)]
pub struct RowInfo {
    pub idx: usize,
    /// Signed: positive expanded group, negative collapsed group, 0 leaf
    pub depth: i64,
    pub count: usize,
    pub key: RowKey,
    pub selected: bool,
    pub parent_idx: Option<usize>,
    pub idx_pointer: Option<usize>,
    pub filter_count: Option<usize>,
}

impl RowInfo {
    pub fn leaf(idx: usize, key: RowKey, selected: bool) -> Self {
        RowInfo {
            idx,
            depth: 0,
            count: 0,
            key,
            selected,
            parent_idx: None,
            idx_pointer: None,
            filter_count: None,
        }
    }
}

/// Positional wire layout. Metadata starts after the largest explicit column
/// key (or after the last column when no keys are assigned); `width` is the
/// trailing running count, i.e. the full wire row length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMeta {
    slots: Vec<usize>,
    pub idx: usize,
    pub render_idx: usize,
    pub depth: usize,
    pub count: usize,
    pub key: usize,
    pub selected: usize,
    pub parent_idx: usize,
    pub idx_pointer: usize,
    pub filter_count: usize,
    pub next_filter_idx: usize,
    pub width: usize,
}

impl RowMeta {
    pub fn for_schema(schema: &Schema) -> Self {
        let columns = schema.columns();
        let slots: Vec<usize> = columns
            .iter()
            .enumerate()
            .map(|(i, def)| def.key.unwrap_or(i))
            .collect();
        let start = columns
            .iter()
            .filter_map(|def| def.key)
            .max()
            .map_or(columns.len(), |max_key| (max_key + 1).max(columns.len()));

        RowMeta {
            slots,
            idx: start,
            render_idx: start + 1,
            depth: start + 2,
            count: start + 3,
            key: start + 4,
            selected: start + 5,
            parent_idx: start + 6,
            idx_pointer: start + 7,
            filter_count: start + 8,
            next_filter_idx: start + 9,
            width: start + 10,
        }
    }

    /// Wire position of a data column
    pub fn slot(&self, column: usize) -> usize {
        self.slots.get(column).copied().unwrap_or(column)
    }

    pub fn blank_row(&self) -> Row {
        vec![ColumnValue::Null; self.width]
    }

    /// Build a wire row from (optional) data values and metadata
    pub fn project(&self, data: Option<&Row>, info: &RowInfo) -> Row {
        let mut out = self.blank_row();
        if let Some(data) = data {
            for (column, value) in data.iter().enumerate() {
                out[self.slot(column)] = value.clone();
            }
        }
        self.write_info(&mut out, info);
        out
    }

    pub fn write_info(&self, out: &mut Row, info: &RowInfo) {
        let opt = |v: Option<usize>| v.map_or(ColumnValue::Null, |n| ColumnValue::Int64(n as i64));
        out[self.idx] = ColumnValue::Int64(info.idx as i64);
        out[self.render_idx] = ColumnValue::Int64(0);
        out[self.depth] = ColumnValue::Int64(info.depth);
        out[self.count] = ColumnValue::Int64(info.count as i64);
        out[self.key] = ColumnValue::String(info.key.clone());
        out[self.selected] = ColumnValue::Int64(info.selected as i64);
        out[self.parent_idx] = opt(info.parent_idx);
        out[self.idx_pointer] = opt(info.idx_pointer);
        out[self.filter_count] = opt(info.filter_count);
        out[self.next_filter_idx] = ColumnValue::Null;
    }

    /// Read IDX back from a wire row
    pub fn row_idx(&self, row: &Row) -> Option<usize> {
        row.get(self.idx).and_then(ColumnValue::as_i64).map(|n| n as usize)
    }

    pub fn row_key<'a>(&self, row: &'a Row) -> Option<&'a str> {
        row.get(self.key).and_then(ColumnValue::as_string)
    }

    pub fn is_selected(&self, row: &Row) -> bool {
        row.get(self.selected).and_then(ColumnValue::as_i64) == Some(1)
    }
}
