use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq as _;

/// Content hash over sealed share bytes. The digest doubles as the blob path component and as
/// the stored tamper check.
pub trait ContentHasher: Send + Sync {
    fn digest(&self, bytes: &[u8]) -> String;

    fn verify(&self, bytes: &[u8], expected: &str) -> bool {
        constant_time_eq(self.digest(bytes).as_bytes(), expected.as_bytes())
    }
}

/// Lowercase hex SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn digest(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
}

/// Length mismatch compares unequal.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Digests are used as path segments, so anything that is not plain hex is refused.
pub fn is_hex_digest(s: &str) -> bool {
    !s.is_empty() && s.len() <= 128 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            Sha256Hasher.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_detects_single_byte_change() {
        let h = Sha256Hasher;
        let mut bytes = b"sealed share bytes".to_vec();
        let expected = h.digest(&bytes);
        assert!(h.verify(&bytes, &expected));

        if let Some(b) = bytes.get_mut(3) {
            *b ^= 0x01;
        }
        assert!(!h.verify(&bytes, &expected));
        assert!(!h.verify(&bytes, "short"));
    }

    #[test]
    fn constant_time_eq_handles_length_and_content() {
        assert!(constant_time_eq(b"deadbeef", b"deadbeef"));
        assert!(!constant_time_eq(b"deadbeef", b"deadbeee"));
        assert!(!constant_time_eq(b"deadbeef", b"deadbeef00"));
        assert!(!constant_time_eq(b"", b"00"));
    }

    #[test]
    fn hex_digest_guard() {
        assert!(is_hex_digest(&Sha256Hasher.digest(b"x")));
        assert!(!is_hex_digest(""));
        assert!(!is_hex_digest("../etc"));
    }
}
