//! Port Allocator
//!
//! Hands out mutually-exclusive local ports from a configured range and
//! takes them back for reuse. One allocator instance serves the whole agent
//! process; every registration task allocates and releases through it.

use std::collections::{HashSet, VecDeque};
use parking_lot::Mutex;
use tracing::debug;

/// Allocator errors
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("No free ports left in the forwarding pool")]
    Exhausted,
    #[error("Port {0} is already allocated")]
    AlreadyAllocated(u16),
}

struct PortPool {
    free: VecDeque<u16>,
    allocated: HashSet<u16>,
}

/// Pool of forwardable local ports
pub struct PortAllocator {
    min: u16,
    max: u16,
    pool: Mutex<PortPool>,
}

impl PortAllocator {
    /// Seed the free list with every port in `[min, max]`
    pub fn new(min: u16, max: u16) -> Self {
        let free: VecDeque<u16> = (min..=max).collect();
        Self {
            min,
            max,
            pool: Mutex::new(PortPool {
                free,
                allocated: HashSet::new(),
            }),
        }
    }

    /// Take one free port out of the pool
    pub fn allocate(&self) -> Result<u16, PortError> {
        let mut pool = self.pool.lock();
        let port = pool.free.pop_front().ok_or(PortError::Exhausted)?;
        pool.allocated.insert(port);
        debug!(port, "allocated forward port");
        Ok(port)
    }

    /// Return a port to the pool. Safe to call repeatedly; releasing a port
    /// that was never allocated is a no-op.
    pub fn release(&self, port: u16) {
        let mut pool = self.pool.lock();
        if !pool.allocated.remove(&port) {
            return;
        }
        // Pinned out-of-range ports leave the allocated set but never enter
        // the free list.
        if (self.min..=self.max).contains(&port) {
            pool.free.push_back(port);
        }
        debug!(port, "released forward port");
    }

    /// Pin a specific, externally-known port
    pub fn reserve(&self, port: u16) -> Result<(), PortError> {
        let mut pool = self.pool.lock();
        if pool.allocated.contains(&port) {
            return Err(PortError::AlreadyAllocated(port));
        }
        pool.free.retain(|p| *p != port);
        pool.allocated.insert(port);
        debug!(port, "reserved forward port");
        Ok(())
    }

    /// Number of ports currently free
    pub fn free_count(&self) -> usize {
        self.pool.lock().free.len()
    }

    /// Number of ports currently allocated
    pub fn allocated_count(&self) -> usize {
        self.pool.lock().allocated.len()
    }

    /// Total pool capacity
    pub fn capacity(&self) -> usize {
        (self.max - self.min) as usize + 1
    }
}
