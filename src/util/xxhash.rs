use core::hash::Hasher;

use twox_hash::XxHash32;

/// Bit-exact XXH32 (seed 0) over the raw little/native-endian bytes of a
/// `u32` sequence. Used to derive the interning hash for archetype identity
/// sequences and query descriptor arrays; the digest is an implementation
/// detail everywhere except where callers rely on it as a stable lookup key
/// within a single process run.
pub(crate) fn hash_u32_slice(values: &[u32]) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    for v in values {
        hasher.write(&v.to_ne_bytes());
    }
    hasher.finish() as u32
}
