//! Bounded recently-seen id set.

use std::collections::{HashSet, VecDeque};

/// FIFO-evicting set of recently seen ids.
///
/// Remembers the last `capacity` distinct ids; older ids are forgotten, so a
/// duplicate arriving after `capacity` newer ids is not detected.
#[derive(Debug)]
pub struct RecentIds {
    capacity: usize,
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            set: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.set.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    /// Forget `id`. Returns `true` if it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.set.remove(id) {
            return false;
        }
        self.order.retain(|x| x != id);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
