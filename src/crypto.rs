//! Crypto primitives used by the CWDTP opening handshake.
//!
//! Two operations only: cryptographically secure random bytes, and SHA-1.
//! SHA-1 is required by the handshake derivation and is not used anywhere
//! else in this crate.

use rand::RngCore;
use sha1::{Digest, Sha1};

/// Fixed ASCII salt concatenated with a handshake `req_key` before hashing
/// to derive `res_key`. Both roles must use the exact same bytes; this is
/// part of the wire protocol, not an implementation detail.
///
/// The reference source this engine was distilled from did not ship the
/// file defining this constant (see `DESIGN.md`), so this value is this
/// implementation's own fixed choice, in the spirit of RFC 6455's
/// `258EAFA5-E914-47DA-95CA-C5AB0DC85B11` GUID.
pub const MAGIC: &str = "CWDTP-3DDA9F9E-9A42-4B57-8B1E-5B7C6C6F6D61";

/// Fills `buf` with cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Computes the SHA-1 digest of `bytes`.
pub fn sha1(bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::default();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Derives the handshake `res_key` from the client's base64-encoded
/// `req_key`: `base64(sha1(utf8(req_key ++ MAGIC)))`.
pub fn derive_res_key(req_key: &str) -> String {
    let mut preimage = String::with_capacity(req_key.len() + MAGIC.len());
    preimage.push_str(req_key);
    preimage.push_str(MAGIC);
    base64::encode(sha1(preimage.as_bytes()))
}

/// Generates a fresh base64-encoded 16-byte `req_key` for the client hello.
pub fn generate_req_key() -> String {
    base64::encode(random_bytes(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_res_key_is_deterministic() {
        let req_key = "dGhlIHNhbXBsZSBub25jZQ==";
        let a = derive_res_key(req_key);
        let b = derive_res_key(req_key);
        assert_eq!(a, b);
    }

    #[test]
    fn derive_res_key_changes_with_single_bit_flip() {
        let a = derive_res_key("aGVsbG8=");
        let b = derive_res_key("aGVsbG9=");
        assert_ne!(a, b);
    }

    #[test]
    fn random_bytes_produces_requested_length() {
        assert_eq!(random_bytes(16).len(), 16);
        assert_eq!(random_bytes(0).len(), 0);
    }
}
