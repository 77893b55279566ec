//! Deterministic port allocation per workflow identifier.
//!
//! Each workflow gets one of `PORT_SLOTS` slots: a backend/frontend pair at
//! a fixed offset from the base ports. The slot is derived from the
//! identifier, so repeated calls for the same workflow are idempotent; when
//! two identifiers hash to the same slot, the fall-forward scan resolves
//! the conflict against live bind probes.

use crate::errors::AllocationError;
use sha2::{Digest, Sha256};
use std::net::TcpListener;

pub const BACKEND_PORT_BASE: u16 = 9100;
pub const FRONTEND_PORT_BASE: u16 = 9200;
pub const PORT_SLOTS: u16 = 15;

/// Map a workflow identifier onto a slot index. The first 8 alphanumeric
/// characters are read as a base-36 number; identifiers with no such
/// characters fall back to a SHA-256 digest so the mapping stays stable
/// across processes.
fn slot_for_workflow(wid: &str) -> u16 {
    let digits: String = wid
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();

    if let Ok(n) = u64::from_str_radix(&digits, 36) {
        return (n % PORT_SLOTS as u64) as u16;
    }

    let digest = Sha256::digest(wid.as_bytes());
    let n = u64::from_be_bytes(digest[..8].try_into().unwrap_or_default());
    (n % PORT_SLOTS as u64) as u16
}

/// Deterministically assign a (backend, frontend) port pair.
pub fn ports_for_workflow(wid: &str) -> (u16, u16) {
    let slot = slot_for_workflow(wid);
    (BACKEND_PORT_BASE + slot, FRONTEND_PORT_BASE + slot)
}

/// Probe whether a port is currently bindable on localhost.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Scan forward (wrapping) from the deterministic slot until a pair whose
/// ports both probe free is found. This is what keeps two concurrently
/// running workflows apart even when their deterministic slots collide.
pub fn find_next_available_ports(wid: &str) -> Result<(u16, u16), AllocationError> {
    let base_slot = slot_for_workflow(wid);

    for offset in 0..PORT_SLOTS {
        let slot = (base_slot + offset) % PORT_SLOTS;
        let backend = BACKEND_PORT_BASE + slot;
        let frontend = FRONTEND_PORT_BASE + slot;

        if is_port_available(backend) && is_port_available(frontend) {
            return Ok((backend, frontend));
        }
    }

    Err(AllocationError::NoAvailablePorts {
        wid: wid.to_string(),
    })
}
