//! Container checksum
//!
//! Containers end with an xxHash64 (seed 0) of every byte before it, stored
//! little-endian. Validation re-derives it over the file contents.

use xxhash_rust::xxh64::Xxh64;

/// Size in bytes of the trailing checksum
pub const CHECKSUM_LEN: usize = 8;

/// Compute xxHash64 of a byte slice
pub fn compute_checksum(data: &[u8]) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(data);
    hasher.digest()
}

/// Append the checksum of `data` to itself
pub fn seal(data: &mut Vec<u8>) {
    let hash = compute_checksum(data);
    data.extend_from_slice(&hash.to_le_bytes());
}

/// Verify the trailing checksum of a sealed buffer.
///
/// Returns false for buffers too short to carry one.
pub fn verify_sealed(data: &[u8]) -> bool {
    if data.len() < CHECKSUM_LEN {
        return false;
    }
    let (body, tail) = data.split_at(data.len() - CHECKSUM_LEN);
    let mut stored = [0u8; CHECKSUM_LEN];
    stored.copy_from_slice(tail);
    compute_checksum(body) == u64::from_le_bytes(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_verify() {
        let mut data = b"Hello, World!".to_vec();
        seal(&mut data);
        assert_eq!(data.len(), 13 + CHECKSUM_LEN);
        assert!(verify_sealed(&data));

        data[3] ^= 0x40;
        assert!(!verify_sealed(&data));
    }

    #[test]
    fn test_short_buffer() {
        assert!(!verify_sealed(&[1, 2, 3]));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(compute_checksum(b"abc"), compute_checksum(b"abc"));
        assert_ne!(compute_checksum(b"abc"), compute_checksum(b"abd"));
    }
}
