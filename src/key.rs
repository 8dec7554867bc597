//! Structural hash keys used by [`crate::cache::ObjectCache`] and
//! [`crate::descriptor_pool::DescriptorPool`] to deduplicate GPU objects created from otherwise
//! opaque create-info structures.
//!
//! A [`HashKey`] is a flat byte stream assembled by [`HashKeyBuilder`] from the functional fields
//! of a create-info structure (see [`crate::structural_key`]), with caller-supplied handles
//! substituted in place of the raw Vulkan handle fields. Two create-info structures that would
//! produce identical GPU objects always serialize to the same byte stream, and therefore to the
//! same key.

use std::hash::{Hash, Hasher};

/// Fixed MurmurHash3_x86_32 seed used for every hash key in this crate. Changing this constant
/// invalidates every previously-serialized pipeline cache blob, since the hash feeds into nothing
/// persisted, but keeping it fixed (rather than per-process random) makes key hashes reproducible
/// across runs, which the determinism property relies on.
pub const HASH_SEED: u32 = 0x4AC0_93E6;

/// An opaque, structurally-comparable key built from a create-info byte stream.
///
/// Equality and the map lookup hash are both over the raw bytes; the MurmurHash3 digest is
/// computed lazily only when a `HashMap`/`HashSet` actually needs a `std::hash::Hash`
/// implementation, so building a key never requires hashing it up front.
#[derive(Clone, Eq)]
pub struct HashKey {
    bytes: Box<[u8]>,
}

impl HashKey {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn murmur3(&self) -> u32 {
        murmur3_32(&self.bytes, HASH_SEED)
    }
}

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        // Length first avoids a full memcmp on the common case of differently-shaped structures.
        self.bytes.len() == other.bytes.len() && self.bytes == other.bytes
    }
}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.murmur3());
    }
}

impl std::fmt::Debug for HashKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashKey")
            .field("len", &self.bytes.len())
            .field("murmur3", &self.murmur3())
            .finish()
    }
}

/// Incrementally assembles a [`HashKey`] from the functional fields of a create-info structure.
///
/// Field order matters: pushing the same logical fields in a different order produces a
/// different key even if the resulting GPU object would be identical, so
/// [`crate::structural_key`] extractors must push fields in a fixed, documented order per tag.
#[derive(Default)]
pub struct HashKeyBuilder {
    bytes: Vec<u8>,
}

impl HashKeyBuilder {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Pushes a discriminant tag identifying which create-info variant this key was built from.
    /// Always the first field pushed by every extractor, so two different tags can never collide
    /// even if the remaining fields happen to serialize identically.
    pub fn push_tag(&mut self, tag: u32) -> &mut Self {
        self.push_u32(tag)
    }

    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        self.push_u8(value as u8)
    }

    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_f32(&mut self, value: f32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Substitutes an engine-assigned opaque handle for a raw Vulkan handle field. Callers are
    /// responsible for mapping their `vk::Handle` values to stable `u64` identifiers before
    /// calling into the cache; this builder never sees a raw Vulkan handle.
    pub fn push_handle(&mut self, handle: u64) -> &mut Self {
        self.push_u64(handle)
    }

    /// Pushes an opaque blob (for example packed blend constants) verbatim, prefixed with its
    /// length so a shorter blob can never be mistaken for a truncated prefix of a longer one.
    pub fn push_blob(&mut self, blob: &[u8]) -> &mut Self {
        self.push_u32(blob.len() as u32);
        self.bytes.extend_from_slice(blob);
        self
    }

    /// Pushes the count of a variable-length array. Always call this before pushing the array's
    /// elements so the key remains self-describing and unambiguous.
    pub fn push_count(&mut self, count: usize) -> &mut Self {
        self.push_u32(count as u32)
    }

    /// Pushes an optional substructure: a presence byte, followed by the substructure's fields
    /// only when `present` is true.
    pub fn push_optional<F: FnOnce(&mut Self)>(&mut self, present: bool, f: F) -> &mut Self {
        self.push_bool(present);
        if present {
            f(self);
        }
        self
    }

    pub fn finalize(self) -> HashKey {
        HashKey {
            bytes: self.bytes.into_boxed_slice(),
        }
    }
}

/// MurmurHash3 (x86, 32-bit variant) over `data`, seeded with `seed`.
///
/// Implemented directly from the public-domain reference algorithm rather than pulled in as a
/// dependency, since the fixed seed and length-mixing behavior this crate requires are part of
/// the algorithm's own finalizer, not a wrapper concern.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut hash = seed;
    let chunks = data.chunks_exact(4);
    let remainder = chunks.remainder();

    for chunk in chunks {
        let mut k = u32::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        hash ^= k;
        hash = hash.rotate_left(13);
        hash = hash.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let mut k: u32 = 0;
    for (i, &byte) in remainder.iter().enumerate().rev() {
        k ^= (byte as u32) << (8 * i);
    }
    if !remainder.is_empty() {
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);
        hash ^= k;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85ebca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2ae35);
    hash ^= hash >> 16;

    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    // Seed 0 over an empty input degenerates to exactly the seed: the body loop and tail byte
    // both contribute nothing, and the length/avalanche mix of zero is zero.
    #[test]
    fn murmur3_empty_string_seed_zero() {
        assert_eq!(murmur3_32(b"", 0), 0);
    }

    #[test]
    fn murmur3_empty_string_nonzero_seed_is_not_the_seed_itself() {
        // The length-mix and avalanche steps still run even on empty input, so a nonzero seed
        // does not simply pass through unchanged.
        assert_ne!(murmur3_32(b"", HASH_SEED), HASH_SEED);
    }

    #[test]
    fn murmur3_is_deterministic() {
        let data = b"pipeline-layout-descriptor-set-layout-key";
        assert_eq!(murmur3_32(data, HASH_SEED), murmur3_32(data, HASH_SEED));
    }

    #[test]
    fn murmur3_is_seed_dependent() {
        assert_ne!(murmur3_32(b"abc", 0), murmur3_32(b"abc", HASH_SEED));
    }

    #[test]
    fn murmur3_is_sensitive_to_single_byte_changes() {
        assert_ne!(murmur3_32(b"abcd", HASH_SEED), murmur3_32(b"abce", HASH_SEED));
    }

    #[test]
    fn murmur3_is_sensitive_to_length() {
        assert_ne!(murmur3_32(b"abc", HASH_SEED), murmur3_32(b"abcd", HASH_SEED));
    }

    #[test]
    fn murmur3_handles_every_tail_length() {
        // Exercises the 1/2/3-remaining-byte tail paths in addition to the exact-chunk path.
        let base = b"0123456789abcdef";
        for len in 0..=base.len() {
            let _ = murmur3_32(&base[..len], HASH_SEED);
        }
    }

    #[test]
    fn hash_key_equality_is_structural_not_by_reference() {
        let mut a = HashKeyBuilder::new();
        a.push_tag(1).push_u32(42).push_handle(7);
        let a = a.finalize();

        let mut b = HashKeyBuilder::new();
        b.push_tag(1).push_u32(42).push_handle(7);
        let b = b.finalize();

        assert_eq!(a, b);
        assert_eq!(a.murmur3(), b.murmur3());
    }

    #[test]
    fn hash_key_differs_on_field_order() {
        let mut a = HashKeyBuilder::new();
        a.push_u32(1).push_u32(2);
        let a = a.finalize();

        let mut b = HashKeyBuilder::new();
        b.push_u32(2).push_u32(1);
        let b = b.finalize();

        assert_ne!(a, b);
    }

    #[test]
    fn blob_length_prefix_prevents_prefix_collisions() {
        let mut a = HashKeyBuilder::new();
        a.push_blob(&[1, 2, 3]);
        let a = a.finalize();

        let mut b = HashKeyBuilder::new();
        b.push_blob(&[1, 2]);
        b.push_u8(3);
        let b = b.finalize();

        assert_ne!(a, b);
    }

    #[test]
    fn optional_substructure_presence_changes_key() {
        let mut a = HashKeyBuilder::new();
        a.push_optional(true, |b| {
            b.push_u32(99);
        });
        let a = a.finalize();

        let mut b = HashKeyBuilder::new();
        b.push_optional(false, |b| {
            b.push_u32(99);
        });
        let b = b.finalize();

        assert_ne!(a, b);
    }
}
