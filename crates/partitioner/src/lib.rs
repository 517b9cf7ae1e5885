//! # Partitioner — token assignment and global row ordering
//!
//! A partitioner maps a partition key to a fixed-width [`Token`] and defines
//! the total order `(token, key)` that every SSTable in a table shares. Four
//! variants exist across Cassandra's history:
//!
//! * **Random** — MD5 of the key, rewritten to its two's-complement absolute
//!   value; tokens compare as 16 unsigned bytes.
//! * **Murmur3** — a bug-compatible port of Cassandra's Java Murmur3: the
//!   tail bytes are accumulated *sign-extended* and the finalizer XORs the
//!   signed length, so the output disagrees with reference MurmurHash3 for
//!   keys containing bytes ≥ 0x80. An output of `i64::MIN` is remapped to
//!   `i64::MAX`. The token stores `h1` little-endian in its first 8 bytes
//!   and compares as a signed 64-bit value.
//! * **ByteOrdered** / **OrderPreserving** — no token; keys compare
//!   lexicographically.
//!
//! Ties on token fall back to key bytes, then key length.

use byteorder::{ByteOrder, LittleEndian};
use md5::{Digest, Md5};
use std::cmp::Ordering;

/// Fixed-width token. Variants using fewer than 16 bytes zero the tail.
pub type Token = [u8; 16];

const CLASS_PREFIX: &str = "org.apache.cassandra.dht.";

const C1: i64 = 0x87c3_7b91_1142_53d5_u64 as i64;
const C2: i64 = 0x4cf5_ad43_2745_937f_u64 as i64;

fn fmix(mut k: i64) -> i64 {
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53_u64 as i64);
    k ^= ((k as u64) >> 33) as i64;
    k
}

/// Little-endian 64-bit block, assembled from unsigned bytes.
fn getblock(key: &[u8], index: usize) -> i64 {
    LittleEndian::read_i64(&key[index << 3..(index << 3) + 8])
}

/// Cassandra's broken-Java Murmur3, `h1` only. Note the *sign-extending*
/// byte loads in the tail: that is the bug being reproduced, not a slip.
fn murmur3_h1(key: &[u8]) -> i64 {
    let nblocks = key.len() / 16;
    let mut h1: i64 = 0;
    let mut h2: i64 = 0;

    for i in 0..nblocks {
        let mut k1 = getblock(key, i * 2);
        let mut k2 = getblock(key, i * 2 + 1);

        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;

        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;

        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = &key[nblocks * 16..];
    let signed = |i: usize| i64::from(tail[i] as i8);

    let mut k1: i64 = 0;
    let mut k2: i64 = 0;
    if tail.len() >= 9 {
        for i in (8..tail.len()).rev() {
            k2 ^= signed(i) << ((i - 8) * 8);
        }
        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
    }
    if !tail.is_empty() {
        for i in (0..tail.len().min(8)).rev() {
            k1 ^= signed(i) << (i * 8);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= key.len() as i64;
    h2 ^= key.len() as i64;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix(h1);
    h2 = fmix(h2);

    clamp_token(h1.wrapping_add(h2))
}

/// Cassandra folds the one unrepresentable token back into range.
fn clamp_token(h1: i64) -> i64 {
    if h1 == i64::MIN {
        i64::MAX
    } else {
        h1
    }
}

/// MD5 of the key, then the absolute value of the digest treated as a
/// two's-complement 128-bit integer.
fn random_token(key: &[u8]) -> Token {
    let checksum: [u8; 16] = Md5::digest(key).into();
    if checksum[0] < 0x80 {
        return checksum;
    }

    let mut token = [0u8; 16];
    let mut i = 15;
    // checksum[0] >= 0x80, so a non-zero byte exists before underflow.
    while checksum[i] == 0 {
        i -= 1;
    }
    token[i] = 0xff - checksum[i] + 1;
    while i > 0 {
        i -= 1;
        token[i] = 0xff - checksum[i];
    }
    token
}

/// One of the partitioners a table can be written under. All files merged
/// together must agree on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioner {
    Random,
    Murmur3,
    ByteOrdered,
    OrderPreserving,
}

impl Partitioner {
    /// Resolves a fully-qualified class name from file metadata. Ancient
    /// files carry no name at all; callers fall back to [`Self::Random`].
    pub fn from_class_name(name: &str) -> Option<Self> {
        match name.strip_prefix(CLASS_PREFIX)? {
            "RandomPartitioner" => Some(Self::Random),
            "Murmur3Partitioner" => Some(Self::Murmur3),
            "ByteOrderedPartitioner" => Some(Self::ByteOrdered),
            "OrderPreservingPartitioner" => Some(Self::OrderPreserving),
            _ => None,
        }
    }

    pub fn assign_token(&self, key: &[u8]) -> Token {
        match self {
            Self::Random => random_token(key),
            Self::Murmur3 => {
                let mut token = [0u8; 16];
                LittleEndian::write_i64(&mut token[..8], murmur3_h1(key));
                token
            }
            Self::ByteOrdered | Self::OrderPreserving => [0u8; 16],
        }
    }

    /// Total order over `(token, key)` pairs: token first, then key bytes,
    /// then key length.
    pub fn compare(
        &self,
        token_a: &Token,
        key_a: &[u8],
        token_b: &Token,
        key_b: &[u8],
    ) -> Ordering {
        match self {
            Self::Random => token_a.cmp(token_b).then_with(|| key_a.cmp(key_b)),
            Self::Murmur3 => {
                let a = LittleEndian::read_i64(&token_a[..8]);
                let b = LittleEndian::read_i64(&token_b[..8]);
                a.cmp(&b).then_with(|| key_a.cmp(key_b))
            }
            Self::ByteOrdered | Self::OrderPreserving => key_a.cmp(key_b),
        }
    }
}
