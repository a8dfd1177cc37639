//! Identifier and credential pools
//!
//! Both pools are plain injectable services shared by `Arc` across every
//! concurrent session; each holds one short-held mutex and nothing else, so
//! no lock ordering concerns arise.

use crate::config::Credentials;
use std::sync::Mutex;

/// Multiplier separating per-worker flow id ranges.
///
/// `worker_id * 100_000 + sequence` keeps ids unique across distributed
/// workers without any coordination beyond the local counter.
pub const WORKER_ID_RANGE: u64 = 100_000;

/// Process-wide unique flow id allocator
#[derive(Debug, Default)]
pub struct FlowIdAllocator {
    counter: Mutex<u64>,
}

impl FlowIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next flow id for this worker
    ///
    /// Ids are never reused; the sequence starts at 1.
    pub fn next_id(&self, worker_id: u64) -> u64 {
        let mut counter = match self.counter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counter += 1;
        worker_id * WORKER_ID_RANGE + *counter
    }
}

/// Round-robin credential pool
///
/// Distributes sessions fairly across the configured tenant accounts no
/// matter how many sessions start concurrently.
#[derive(Debug)]
pub struct CredentialPool {
    users: Vec<Credentials>,
    index: Mutex<usize>,
}

impl CredentialPool {
    pub fn new(users: Vec<Credentials>) -> Self {
        Self {
            users,
            index: Mutex::new(0),
        }
    }

    /// Number of credential sets in the pool
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Take the next credential set, wrapping around at the end of the pool
    ///
    /// Returns `None` when the pool is empty.
    pub fn next_credentials(&self) -> Option<Credentials> {
        if self.users.is_empty() {
            return None;
        }
        let mut index = match self.index.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let creds = self.users[*index % self.users.len()].clone();
        *index += 1;
        Some(creds)
    }
}
