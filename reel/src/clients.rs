use std::collections::{HashSet, VecDeque};

use crate::types::ClientId;

/// Bounded memory of clients whose processing already ended.
///
/// Stages consult it to recognize batches arriving after a client finished or was discarded,
/// which are dropped instead of opening a new session. The oldest entries are forgotten first.
#[derive(Debug, Clone)]
pub struct FinishedClients {
    capacity: usize,
    order: VecDeque<ClientId>,
    members: HashSet<ClientId>,
}

impl FinishedClients {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Remembers `client_id`, evicting the oldest entry when full.
    pub fn insert(&mut self, client_id: ClientId) {
        if self.capacity == 0 || self.members.contains(&client_id) {
            return;
        }

        if self.order.len() == self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.members.remove(&evicted);
        }

        self.members.insert(client_id.clone());
        self.order.push_back(client_id);
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.members.contains(client_id)
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
    fn oldest_clients_are_forgotten_first() {
        let mut finished = FinishedClients::new(2);

        finished.insert(ClientId::new("a"));
        finished.insert(ClientId::new("b"));
        finished.insert(ClientId::new("c"));

        assert!(!finished.contains(&ClientId::new("a")));
        assert!(finished.contains(&ClientId::new("b")));
        assert!(finished.contains(&ClientId::new("c")));
        assert_eq!(finished.len(), 2);
    }

    #[test]
    fn zero_capacity_remembers_nothing() {
        let mut finished = FinishedClients::new(0);

        finished.insert(ClientId::new("a"));

        assert!(finished.is_empty());
    }
}
