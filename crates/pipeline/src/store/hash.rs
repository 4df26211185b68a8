// Content hashing for rendered artifacts.
//
// The digest of an encoded artifact is logged at commit time so that a later
// re-render from the sidecar can be checked for reproducibility.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 hash of file content.
pub type ContentHash = String;

/// Compute the SHA-256 hash of the given bytes, returned as a lowercase hex string.
pub fn sha256_hex(content: &[u8]) -> ContentHash {
    let digest = Sha256::digest(content);
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}
