/// Changeset - Table change feed for LiveGrid
///
/// A Table publishes one `TableChange` per mutation to every registered
/// `TableListener`, synchronously and in mutation order. Listeners receive a
/// shared reference to the table as it stands after the mutation.
///
/// # Change Types
///
/// - `RowInserted`: a row was appended at `position`
/// - `RowUpdated`: cells changed; each `CellChange` keeps the old value so
///   consumers can tell whether a sort or group key moved
/// - `RowRemoved`: a row was removed; every later position shifts down by one

use crate::error::Result;
use crate::table::Table;
use crate::value::{ColumnValue, Row, RowKey};
use std::cell::RefCell;
use std::rc::Rc;

/// One changed cell: (column index, old value, new value)
#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub column: usize,
    pub old_value: ColumnValue,
    pub new_value: ColumnValue,
}

/// Represents a single change to a table
#[derive(Debug, Clone)]
pub enum TableChange {
    RowInserted {
        position: usize,
        row: Row,
    },

    RowUpdated {
        position: usize,
        changes: Vec<CellChange>,
    },

    /// Contains the removed row so consumers can still read its key and values
    RowRemoved {
        position: usize,
        key: RowKey,
        row: Row,
    },
}

/// Observer of a Table's change feed
pub trait TableListener {
    fn on_change(&mut self, table: &Table, change: &TableChange) -> Result<()>;
}

/// Handle returned by `Table::subscribe`, used to deregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Registry of listeners, in registration order
#[derive(Default)]
pub struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Rc<RefCell<dyn TableListener>>)>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Rc<RefCell<dyn TableListener>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Returns false when the id was not registered
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cloned handles so the table can be reborrowed while notifying
    pub(crate) fn snapshot(&self) -> Vec<Rc<RefCell<dyn TableListener>>> {
        self.entries.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

/// Helper to repair stored table positions after a remove
///
/// When the row at position P is removed, every stored position > P is
/// decremented and any stored position == P is dropped.
pub struct IndexAdjuster;

impl IndexAdjuster {
    /// Returns Some(new_position) or None if the position was the removed row
    pub fn adjust_for_delete(position: usize, removed: usize) -> Option<usize> {
        if position == removed {
            None
        } else if position > removed {
            Some(position - 1)
        } else {
            Some(position)
        }
    }

    /// Drop the removed position from a position list and shift the rest.
    /// Returns the list index the removed position occupied, if present.
    pub fn remove_and_shift(positions: &mut Vec<usize>, removed: usize) -> Option<usize> {
        let mut found = None;
        for (idx, position) in positions.iter_mut().enumerate() {
            if *position == removed {
                found = Some(idx);
            } else if *position > removed {
                *position -= 1;
            }
        }
        if let Some(idx) = found {
            positions.remove(idx);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_for_delete() {
        assert_eq!(IndexAdjuster::adjust_for_delete(0, 2), Some(0));
        assert_eq!(IndexAdjuster::adjust_for_delete(2, 2), None);
        assert_eq!(IndexAdjuster::adjust_for_delete(4, 2), Some(3));
    }

    #[test]
    fn test_remove_and_shift() {
        let mut positions = vec![5, 0, 3, 7];
        let removed = IndexAdjuster::remove_and_shift(&mut positions, 3);
        assert_eq!(removed, Some(2));
        assert_eq!(positions, vec![4, 0, 6]);

        let removed = IndexAdjuster::remove_and_shift(&mut positions, 1);
        assert_eq!(removed, None);
        assert_eq!(positions, vec![3, 0, 5]);
    }

    struct Counter(usize);

    impl TableListener for Counter {
        fn on_change(&mut self, _table: &Table, _change: &TableChange) -> Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn test_subscribers_add_remove() {
        let mut subs = Subscribers::new();
        let a = subs.add(Rc::new(RefCell::new(Counter(0))));
        let b = subs.add(Rc::new(RefCell::new(Counter(0))));
        assert_ne!(a, b);
        assert_eq!(subs.len(), 2);
        assert!(subs.remove(a));
        assert!(!subs.remove(a));
        assert_eq!(subs.snapshot().len(), 1);
    }
}
