//! Content fingerprints used as `ETag` validators.
//!
//! A fingerprint is the first six hex characters of the MD5 digest of the
//! bundle bytes. It depends on nothing but the bytes, so a rebuild that
//! produces identical output keeps browser caches valid.

use md5::{Digest, Md5};
use std::fmt::Write;

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 6;

/// Compute the fingerprint of a payload.
#[must_use]
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN.div_ceil(2)) {
        let _ = write!(hex, "{byte:02x}");
    }
    hex.truncate(FINGERPRINT_LEN);
    hex
}
