/// Outgoing update batching
///
/// A View pushes every delta it produces for its client into one
/// `UpdateQueue`. Batches are kept in arrival order; coalescing never moves a
/// delta across an insert, because inserts shift the positions that update
/// deltas refer to.
///
/// # Rules
///
/// - updates to the same row inside the open update batch are merged
/// - an insert closes the open update batch; a pending size batch is folded into it
/// - a replace always starts a fresh batch

use crate::value::{ColumnValue, Row};

/// Column deltas for one visible row
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub idx: usize,
    /// (wire column, new value)
    pub values: Vec<(usize, ColumnValue)>,
}

impl RowUpdate {
    fn merge(&mut self, values: Vec<(usize, ColumnValue)>) {
        for (column, value) in values {
            match self.values.iter_mut().find(|(c, _)| *c == column) {
                Some(existing) => existing.1 = value,
                None => self.values.push((column, value)),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// Only the visible size changed
    Size(usize),
    /// Full resend; the client drops what it holds
    Replace { rows: Vec<Row>, size: usize },
    /// Rows placed at their IDX
    Insert { rows: Vec<Row>, size: usize },
    Update(Vec<RowUpdate>),
}

impl Batch {
    pub fn size(&self) -> Option<usize> {
        match self {
            Batch::Size(size) | Batch::Replace { size, .. } | Batch::Insert { size, .. } => Some(*size),
            Batch::Update(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct UpdateQueue {
    batches: Vec<Batch>,
    warn_threshold: usize,
    warned: bool,
}

impl UpdateQueue {
    pub fn new(warn_threshold: usize) -> Self {
        UpdateQueue {
            batches: Vec::new(),
            warn_threshold,
            warned: false,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn resize(&mut self, size: usize) {
        match self.batches.last_mut() {
            Some(Batch::Size(pending)) => *pending = size,
            Some(Batch::Insert { size: pending, .. }) => *pending = size,
            _ => self.push(Batch::Size(size)),
        }
    }

    pub fn replace(&mut self, rows: Vec<Row>, size: usize) {
        self.push(Batch::Replace { rows, size });
    }

    pub fn insert(&mut self, rows: Vec<Row>, size: usize) {
        match self.batches.last_mut() {
            Some(Batch::Insert { rows: pending, size: pending_size }) => {
                pending.extend(rows);
                *pending_size = size;
            }
            Some(Batch::Size(_)) => {
                self.batches.pop();
                self.push(Batch::Insert { rows, size });
            }
            _ => self.push(Batch::Insert { rows, size }),
        }
    }

    pub fn update(&mut self, idx: usize, values: Vec<(usize, ColumnValue)>) {
        if let Some(Batch::Update(updates)) = self.batches.last_mut() {
            match updates.iter_mut().find(|u| u.idx == idx) {
                Some(existing) => existing.merge(values),
                None => updates.push(RowUpdate { idx, values }),
            }
            return;
        }
        self.push(Batch::Update(vec![RowUpdate { idx, values }]));
    }

    /// Take every pending batch in order
    pub fn drain(&mut self) -> Vec<Batch> {
        self.warned = false;
        std::mem::take(&mut self.batches)
    }

    fn push(&mut self, batch: Batch) {
        self.batches.push(batch);
        if !self.warned && self.batches.len() >= self.warn_threshold {
            self.warned = true;
            log::warn!(
                "update queue holds {} undrained batches; is the consumer keeping up?",
                self.batches.len()
            );
        }
    }
}

impl Default for UpdateQueue {
    fn default() -> Self {
        UpdateQueue::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::values_equal;

    fn update_sets(update: &RowUpdate, column: usize, value: &ColumnValue) -> bool {
        update
            .values
            .iter()
            .any(|(c, v)| *c == column && values_equal(v, value))
    }

    fn cell(column: usize, v: i32) -> (usize, ColumnValue) {
        (column, ColumnValue::Int32(v))
    }

    #[test]
    fn test_updates_to_same_row_merge() {
        let mut queue = UpdateQueue::default();
        queue.update(4, vec![cell(1, 10)]);
        queue.update(4, vec![cell(1, 11), cell(2, 5)]);
        queue.update(7, vec![cell(1, 1)]);

        let batches = queue.drain();
        assert_eq!(batches.len(), 1);
        match &batches[0] {
            Batch::Update(updates) => {
                assert_eq!(updates.len(), 2);
                assert_eq!(updates[0].values, vec![cell(1, 11), cell(2, 5)]);
            }
            other => panic!("expected update batch, got {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_insert_splits_update_batches() {
        let mut queue = UpdateQueue::default();
        queue.update(4, vec![cell(1, 10)]);
        queue.insert(vec![vec![ColumnValue::Int32(0)]], 11);
        queue.update(4, vec![cell(1, 20)]);

        let batches = queue.drain();
        assert_eq!(batches.len(), 3);
        match &batches[0] {
            Batch::Update(updates) => {
                assert_eq!(updates.len(), 1);
                assert!(update_sets(&updates[0], 1, &ColumnValue::Int32(10)));
                assert!(!update_sets(&updates[0], 1, &ColumnValue::Int32(20)));
            }
            other => panic!("expected update batch, got {:?}", other),
        }
        assert!(matches!(batches[1], Batch::Insert { size: 11, .. }));
        assert!(matches!(&batches[2], Batch::Update(u) if u[0].idx == 4));
    }

    #[test]
    fn test_size_absorbed_by_insert() {
        let mut queue = UpdateQueue::default();
        queue.resize(10);
        queue.resize(9);
        assert_eq!(queue.len(), 1);
        queue.insert(vec![], 10);
        queue.insert(vec![], 11);
        assert_eq!(queue.batches(), &[Batch::Insert { rows: vec![], size: 11 }]);
    }

    #[test]
    fn test_replace_always_starts_a_batch() {
        let mut queue = UpdateQueue::default();
        queue.replace(vec![], 3);
        queue.replace(vec![], 4);
        queue.update(0, vec![cell(0, 1)]);
        queue.replace(vec![], 4);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.batches()[3].size(), Some(4));
    }

    #[test]
    fn test_warning_threshold_is_reported_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut queue = UpdateQueue::new(2);
        queue.replace(vec![], 1);
        queue.replace(vec![], 1);
        queue.replace(vec![], 1);
        assert!(queue.warned);
        queue.drain();
        assert!(!queue.warned);
    }
}
