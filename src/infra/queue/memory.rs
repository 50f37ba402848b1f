//! In-memory request store for development and testing.

use std::collections::HashMap;

use crate::core::{Request, RequestId, RequestStore, SchedulerError};

/// Volatile store; everything is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    /// Latest version of every request, in first-persisted order.
    requests: Vec<Request>,
    positions: HashMap<RequestId, usize>,
}

impl InMemoryRequestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct requests stored.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the store holds no requests.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl RequestStore for InMemoryRequestStore {
    fn load(&mut self) -> Result<Vec<Request>, SchedulerError> {
        Ok(self.requests.clone())
    }

    fn persist(&mut self, request: &Request) -> Result<(), SchedulerError> {
        match self.positions.get(&request.id) {
            Some(&slot) => self.requests[slot] = request.clone(),
            None => {
                self.positions.insert(request.id, self.requests.len());
                self.requests.push(request.clone());
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "in_memory"
    }
}
