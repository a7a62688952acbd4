/*!
 * Fixed-capacity ring of breadcrumbs.
 *
 * Insertion order is preserved; once `capacity` is reached the oldest entry
 * is evicted. Reads hand out copies so in-flight reports are unaffected by
 * later additions.
 */
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::protocol::types::Breadcrumb;

pub const DEFAULT_MAX_BREADCRUMBS: usize = 50;

#[derive(Debug)]
pub struct BreadcrumbRing {
    capacity: usize,
    entries: Mutex<VecDeque<Breadcrumb>>,
}

impl BreadcrumbRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a breadcrumb, evicting the oldest one when full.
    pub fn push(&self, breadcrumb: Breadcrumb) {
        if let Ok(mut entries) = self.entries.lock() {
            while entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(breadcrumb);
        }
    }

    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Breadcrumb> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BreadcrumbRing {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BREADCRUMBS)
    }
}
