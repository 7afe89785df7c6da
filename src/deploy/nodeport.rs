use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};

pub const NODEPORT_MIN: u16 = 30000;
pub const NODEPORT_MAX: u16 = 32767;

static NODE_HOSTNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^ec(\d+)-inorch-tmf-proxy$").expect("valid regex"));

/// Cluster number encoded in the node hostname (`ec21-inorch-tmf-proxy` → 21).
pub fn cluster_number_from_hostname(hostname: &str) -> Option<u32> {
    NODE_HOSTNAME
        .captures(hostname.trim())
        .and_then(|captures| captures[1].parse().ok())
}

/// The ten contiguous NodePorts reserved for a cluster.
///
/// The range starts above 30100 to leave room for default cluster NodePorts
/// (30000-30040) and Prometheus (30090).
pub fn cluster_range(cluster: u32) -> Result<(u16, u16)> {
    let end = 30100_u32 + cluster * 10;
    let start = end - 9;
    if start < NODEPORT_MIN as u32 {
        return Err(OrchestratorError::NodePort(format!(
            "calculated range start ({start}) is below minimum ({NODEPORT_MIN}); invalid cluster number {cluster}"
        )));
    }
    if end > NODEPORT_MAX as u32 {
        return Err(OrchestratorError::NodePort(format!(
            "calculated range end ({end}) exceeds maximum ({NODEPORT_MAX}); invalid cluster number {cluster}"
        )));
    }
    debug!(cluster, start, end, "cluster NodePort range");
    Ok((start as u16, end as u16))
}

/// Tracks NodePorts handed out during this process lifetime. Cross-process
/// arbitration relies on the caller querying the live cluster before
/// assigning.
#[derive(Default)]
pub struct NodePortAllocator {
    assigned: Mutex<HashSet<u16>>,
}

impl NodePortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next free port in the cluster range, skipping ports in use in the
    /// cluster and ports already assigned by this process.
    pub fn assign(&self, range: (u16, u16), in_use: &HashSet<u16>) -> Result<u16> {
        let (start, end) = range;
        let mut assigned = self.assigned.lock().expect("allocator lock poisoned");
        for port in start..=end {
            if in_use.contains(&port) || assigned.contains(&port) {
                continue;
            }
            assigned.insert(port);
            info!(port, start, end, "assigned NodePort from cluster range");
            return Ok(port);
        }
        Err(OrchestratorError::NodePort(format!(
            "no available NodePort in cluster range {start}-{end} (all {} ports are in use)",
            end - start + 1
        )))
    }

    pub fn assigned(&self) -> HashSet<u16> {
        self.assigned.lock().expect("allocator lock poisoned").clone()
    }

    /// Release ports assigned for an aborted deployment so they do not leak.
    pub fn release(&self, ports: &[u16]) {
        let mut assigned = self.assigned.lock().expect("allocator lock poisoned");
        for port in ports {
            assigned.remove(port);
        }
    }
}
