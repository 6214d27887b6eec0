//! Deterministic identifier derivation
//!
//! Machine and port identifiers are truncated SHA-256 digests so that every
//! independent run computes the same id for the same hardware. The collector
//! relies on this determinism for idempotent upserts: re-sending a report
//! must never create duplicate rows.

use sha2::{Digest, Sha256};

/// Hex chars kept from the digest. 48 bits of id space keeps collision
/// probability negligible at small-to-medium fleet scale.
const ID_HASH_LEN: usize = 12;

fn truncated_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..ID_HASH_LEN].to_string()
}

/// Derive a machine id from a hardware fingerprint string.
pub fn machine_id_from_fingerprint(fingerprint: &str) -> String {
    format!("PC_{}", truncated_sha256(fingerprint))
}

/// Derive the stable display id for a port from its owning machine and
/// topological chain path.
pub fn port_display_id(machine_id: &str, chain: &str) -> String {
    format!("PORT_{}", truncated_sha256(&format!("{}_{}", machine_id, chain)))
}
