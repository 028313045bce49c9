use std::collections::{HashSet, VecDeque};

/// Bounded memory of recently processed message ids.
///
/// Once `capacity` ids are held the oldest is forgotten first.
#[derive(Debug, Clone)]
pub struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record `id`. Returns `false` if it was already remembered.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.capacity == 0 {
            return true;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_are_rejected() {
        let mut ids = RecentIds::new(4);
        assert!(ids.insert("A1"));
        assert!(!ids.insert("A1"));
        assert!(ids.insert("A2"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn contains_does_not_record() {
        let mut ids = RecentIds::new(4);
        assert!(!ids.contains("A1"));
        assert!(ids.is_empty());
        ids.insert("A1");
        assert!(ids.contains("A1"));
    }

    #[test]
    fn oldest_is_evicted() {
        let mut ids = RecentIds::new(2);
        assert!(ids.insert("A1"));
        assert!(ids.insert("A2"));
        assert!(ids.insert("A3"));
        assert!(ids.insert("A1"));
        assert!(!ids.insert("A3"));
    }

    #[test]
    fn zero_capacity_remembers_nothing() {
        let mut ids = RecentIds::new(0);
        assert!(ids.insert("A1"));
        assert!(ids.insert("A1"));
        assert!(ids.is_empty());
    }
}
