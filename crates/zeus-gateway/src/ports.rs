//! Port allocation for worker processes.
//!
//! Centralized allocation prevents collisions across concurrent spawns. The
//! allocator hands out the lowest free port in its half-open range, checking
//! OS-level availability with a best-effort bind probe so we never double up
//! on a port some unrelated process is listening on.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::{debug, warn};
use zeus_core::{Result, WorkerId, ZeusError};

/// Allocator over a fixed half-open port range `[low, high)`.
#[derive(Debug)]
pub struct PortAllocator {
    low: u16,
    high: u16,
    /// port → owning worker id
    table: Mutex<BTreeMap<u16, WorkerId>>,
}

impl PortAllocator {
    /// Create an allocator over `[low, high)`.
    pub fn new(low: u16, high: u16) -> Self {
        Self {
            low,
            high,
            table: Mutex::new(BTreeMap::new()),
        }
    }

    /// Allocate the lowest free port for `owner`.
    ///
    /// A port is free when it is absent from the table *and* the OS probe
    /// does not find a foreign listener on it.
    pub fn allocate(&self, owner: &str) -> Result<u16> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        for port in self.low..self.high {
            if table.contains_key(&port) {
                continue;
            }
            if !probe_free(port) {
                debug!(port, "skipping port bound by a foreign process");
                continue;
            }
            table.insert(port, owner.to_string());
            debug!(port, owner, "allocated port");
            return Ok(port);
        }
        Err(ZeusError::NoPortsAvailable {
            low: self.low,
            high: self.high,
        })
    }

    /// Claim a caller-supplied port for `owner`, verifying that it lies in
    /// the allocator's range and is actually available.
    pub fn claim(&self, port: u16, owner: &str) -> Result<()> {
        if port < self.low || port >= self.high {
            return Err(ZeusError::PortUnavailable {
                port,
                reason: format!("outside worker port range [{}, {})", self.low, self.high),
            });
        }
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = table.get(&port) {
            return Err(ZeusError::PortUnavailable {
                port,
                reason: format!("already owned by {existing}"),
            });
        }
        if !probe_free(port) {
            return Err(ZeusError::PortUnavailable {
                port,
                reason: "bound by a foreign process".to_string(),
            });
        }
        table.insert(port, owner.to_string());
        debug!(port, owner, "claimed port");
        Ok(())
    }

    /// Release a port. Idempotent.
    pub fn release(&self, port: u16) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if table.remove(&port).is_some() {
            debug!(port, "released port");
        }
    }

    /// Owner of a port, if allocated.
    pub fn owner_of(&self, port: u16) -> Option<WorkerId> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.get(&port).cloned()
    }

    /// Number of allocated ports.
    pub fn in_use(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.len()
    }
}

/// Best-effort OS availability probe: bind a loopback listener and release
/// it immediately. If the probe cannot run, the port is assumed free.
fn probe_free(port: u16) -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => false,
        Err(e) => {
            warn!(port, error = %e, "port probe unavailable, assuming free");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free() {
        let alloc = PortAllocator::new(41000, 41010);
        let p1 = alloc.allocate("w1").unwrap();
        let p2 = alloc.allocate("w2").unwrap();
        assert!(p1 < p2);
        assert_eq!(alloc.owner_of(p1).as_deref(), Some("w1"));
    }

    #[test]
    fn test_no_two_owners_share_a_port() {
        let alloc = PortAllocator::new(41020, 41030);
        let mut seen = std::collections::HashSet::new();
        for i in 0..10 {
            match alloc.allocate(&format!("w{i}")) {
                Ok(p) => assert!(seen.insert(p), "port {p} handed out twice"),
                Err(ZeusError::NoPortsAvailable { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_exhaustion() {
        let alloc = PortAllocator::new(41040, 41042);
        let _a = alloc.allocate("w1");
        let _b = alloc.allocate("w2");
        assert!(matches!(
            alloc.allocate("w3"),
            Err(ZeusError::NoPortsAvailable { .. })
        ));
    }

    #[test]
    fn test_release_is_idempotent_and_reclaims() {
        let alloc = PortAllocator::new(41050, 41060);
        let p = alloc.allocate("w1").unwrap();
        alloc.release(p);
        alloc.release(p);
        // Released port is immediately allocatable again.
        let p2 = alloc.allocate("w2").unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn test_claim_conflicts() {
        let alloc = PortAllocator::new(41070, 41080);
        alloc.claim(41075, "w1").unwrap();
        assert!(matches!(
            alloc.claim(41075, "w2"),
            Err(ZeusError::PortUnavailable { .. })
        ));
    }

    #[test]
    fn test_claim_rejects_out_of_range_ports() {
        let alloc = PortAllocator::new(41070, 41080);
        // Below, above, and at the exclusive upper bound.
        for port in [22, 41069, 41080, 65535] {
            let err = alloc.claim(port, "w1").unwrap_err();
            assert!(matches!(err, ZeusError::PortUnavailable { .. }));
            assert!(err.to_string().contains("range"));
        }
        assert_eq!(alloc.in_use(), 0);
    }

    #[test]
    fn test_probe_skips_foreign_listener() {
        let alloc = PortAllocator::new(41090, 41095);
        // Occupy the lowest port with a "foreign" listener.
        let _foreign = std::net::TcpListener::bind(("127.0.0.1", 41090)).unwrap();
        let p = alloc.allocate("w1").unwrap();
        assert_ne!(p, 41090);
    }
}
