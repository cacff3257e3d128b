//! Reusable tunnel pool.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::Tunnel;

/// Pool of idle, cleared tunnels.
///
/// Tunnels only enter the idle list through [`TunnelPool::release`], which
/// clears them, so every checkout starts from a clear tunnel.
#[derive(Debug)]
pub struct TunnelPool {
    idle: Mutex<Vec<Tunnel>>,
    max_idle: usize,
    allocated: AtomicUsize,
}

impl TunnelPool {
    pub fn new(max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            idle: Mutex::new(Vec::with_capacity(max_idle.min(64))),
            max_idle,
            allocated: AtomicUsize::new(0),
        })
    }

    /// Check out a cleared tunnel, allocating one when none is idle.
    pub fn acquire(self: &Arc<Self>) -> PooledTunnel {
        let tunnel = self.idle.lock().pop().unwrap_or_else(|| {
            let total = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
            trace!("Allocated tunnel #{}", total);
            Tunnel::new()
        });
        debug_assert!(tunnel.is_clear());

        PooledTunnel {
            tunnel: Some(tunnel),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut tunnel: Tunnel) {
        tunnel.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(tunnel);
        }
    }

    /// Number of tunnels ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of tunnels waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

/// A checked-out tunnel; returns to its pool when dropped.
#[derive(Debug)]
pub struct PooledTunnel {
    tunnel: Option<Tunnel>,
    pool: Arc<TunnelPool>,
}

impl Deref for PooledTunnel {
    type Target = Tunnel;

    fn deref(&self) -> &Tunnel {
        self.tunnel.as_ref().expect("tunnel present until drop")
    }
}

impl DerefMut for PooledTunnel {
    fn deref_mut(&mut self) -> &mut Tunnel {
        self.tunnel.as_mut().expect("tunnel present until drop")
    }
}

impl Drop for PooledTunnel {
    fn drop(&mut self) {
        if let Some(tunnel) = self.tunnel.take() {
            self.pool.release(tunnel);
        }
    }
}
