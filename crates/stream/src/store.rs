use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{Activity, JobEvent};

/// Store shared between a session task and its owner
pub type SharedStore<T> = Arc<Mutex<EventStore<T>>>;

/// An item that can be held in an [`EventStore`].
pub trait StreamItem: Clone + Send + Sync + 'static {
    type Key: PartialEq + Clone + Debug + Send;

    /// Identity used for deduplication
    fn key(&self) -> Self::Key;

    /// Ordering/resume position within its stream
    fn sequence(&self) -> i64;

    /// True when this item proves the watched entity finished
    fn is_terminal(&self) -> bool {
        false
    }
}

impl StreamItem for Activity {
    type Key = i64;

    fn key(&self) -> i64 {
        self.id
    }

    fn sequence(&self) -> i64 {
        self.id
    }
}

/// `seq` only counts within one job, so the job id is part of the identity
impl StreamItem for JobEvent {
    type Key = (i64, i64);

    fn key(&self) -> (i64, i64) {
        (self.job_id, self.seq)
    }

    fn sequence(&self) -> i64 {
        self.seq
    }

    fn is_terminal(&self) -> bool {
        JobEvent::is_terminal(self)
    }
}

/// Where a previously unknown item is inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Newest-first feeds
    Prepend,
    /// Sequence-ordered feeds
    Append,
}

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Replaced { index: usize },
}

/// Ordered, deduplicating collection with upsert-by-identity.
///
/// A re-delivery of a known key replaces the entry where it is; it is never
/// moved or duplicated. With `max_items` set, a prepend insert that grows the
/// store past the bound drops entries from the tail.
#[derive(Debug, Clone)]
pub struct EventStore<T: StreamItem> {
    items: Vec<T>,
    max_items: Option<usize>,
}

impl<T: StreamItem> Default for EventStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StreamItem> EventStore<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            max_items: None,
        }
    }

    /// Create a store bounded to `max_items` (at least 1)
    pub fn with_max_items(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items: Some(max_items.max(1)),
        }
    }

    pub fn set_max_items(&mut self, max_items: Option<usize>) {
        self.max_items = max_items.map(|n| n.max(1));
    }

    pub fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    /// Insert or replace in place
    pub fn upsert(&mut self, item: T, position: Position) -> Upserted {
        let key = item.key();
        if let Some(index) = self.position_of(&key) {
            self.items[index] = item;
            return Upserted::Replaced { index };
        }

        match position {
            Position::Prepend => {
                self.items.insert(0, item);
                self.truncate_to_bound();
            }
            Position::Append => self.items.push(item),
        }
        Upserted::Inserted
    }

    /// Replace the whole content, collapsing duplicate keys inside `items`
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.clear();
        self.extend(items);
    }

    /// Append items in order, applying the upsert rule to each
    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.upsert(item, Position::Append);
        }
    }

    /// Update matching entries in place; returns how many changed
    pub fn update_where(
        &mut self,
        mut predicate: impl FnMut(&T) -> bool,
        mut update: impl FnMut(&mut T),
    ) -> usize {
        let mut changed = 0;
        for item in self.items.iter_mut().filter(|item| predicate(item)) {
            update(item);
            changed += 1;
        }
        changed
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.items.iter().find(|item| &item.key() == key)
    }

    pub fn position_of(&self, key: &T::Key) -> Option<usize> {
        self.items.iter().position(|item| &item.key() == key)
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.position_of(key).is_some()
    }

    pub fn any(&self, predicate: impl FnMut(&T) -> bool) -> bool {
        self.items.iter().any(predicate)
    }

    /// Current ordered contents
    pub fn list(&self) -> &[T] {
        &self.items
    }

    /// Owned copy of the current contents
    pub fn snapshot(&self) -> Vec<T> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn truncate_to_bound(&mut self) {
        if let Some(max) = self.max_items {
            self.items.truncate(max);
        }
    }
}
