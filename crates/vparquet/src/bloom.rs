//! Sharded bloom filter over trace ids
//!
//! Every trace id hashes to exactly one shard; each shard is an independent
//! bloom filter persisted as its own `bloom-<n>` object, so a point lookup
//! only loads the shard its id belongs to.

use crate::error::{Result, VParquetError};
use bloomfilter::Bloom;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::f64::consts::LN_2;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Upper bound on shards per block
pub const MAX_SHARDS: usize = 1000;

/// Seed for the shard assignment hash
const SHARD_SEED: u64 = 0x7465_6d70_6f5f_626c;

const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.01;

const MAGIC: &[u8; 4] = b"TBLM";
// magic, k, bit count, two sip key pairs
const HEADER_LEN: usize = 4 + 4 + 8 + 32;

/// Object name of a bloom shard
pub fn shard_name(shard: usize) -> String {
    format!("bloom-{}", shard)
}

/// Shard a trace id belongs to
pub fn shard_key(id: &[u8], shard_count: usize) -> usize {
    (xxh3_64_with_seed(id, SHARD_SEED) % shard_count.max(1) as u64) as usize
}

/// Bits needed for `n` items at false positive rate `p`
fn optimal_num_bits(n: usize, p: f64) -> u64 {
    let n = n.max(1) as f64;
    let m = -(n * p.ln()) / (LN_2 * LN_2);
    (m.ceil() as u64).max(64)
}

/// Number of shards needed to keep each shard under `shard_size_bytes`
pub fn shard_count_for(fp: f64, shard_size_bytes: usize, estimated_objects: usize) -> usize {
    let total_bits = optimal_num_bits(estimated_objects, fp);
    let shard_bits = (shard_size_bytes.max(1) as u64) * 8;
    (total_bits.div_ceil(shard_bits) as usize).clamp(1, MAX_SHARDS)
}

/// One bloom filter shard
pub struct BloomFilter {
    bloom: Bloom<[u8]>,
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits())
            .field("num_hashes", &self.num_hashes())
            .finish()
    }
}

impl BloomFilter {
    /// Filter sized for `expected_items` at `false_positive_rate`
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let fp = if false_positive_rate > 0.0 && false_positive_rate < 1.0 {
            false_positive_rate
        } else {
            DEFAULT_FALSE_POSITIVE_RATE
        };
        Self {
            bloom: Bloom::new_for_fp_rate(expected_items.max(1), fp),
        }
    }

    pub fn insert(&mut self, id: &[u8]) {
        self.bloom.set(id);
    }

    /// False means the id was never inserted
    pub fn contains(&self, id: &[u8]) -> bool {
        self.bloom.check(id)
    }

    pub fn num_bits(&self) -> u64 {
        self.bloom.number_of_bits()
    }

    pub fn num_hashes(&self) -> u32 {
        self.bloom.number_of_hash_functions()
    }

    /// Serialized form: magic, k (u32), bit count (u64), sip keys (4 x u64), bitmap
    pub fn to_bytes(&self) -> Bytes {
        let bitmap = self.bloom.bitmap();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + bitmap.len());
        buf.put_slice(MAGIC);
        buf.put_u32_le(self.num_hashes());
        buf.put_u64_le(self.num_bits());
        for (k0, k1) in self.bloom.sip_keys() {
            buf.put_u64_le(k0);
            buf.put_u64_le(k1);
        }
        buf.put_slice(&bitmap);
        buf.freeze()
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN || &data[..4] != MAGIC {
            return Err(VParquetError::DecodeFailure(
                "bloom shard has no valid header".to_string(),
            ));
        }
        data.advance(4);
        let num_hashes = data.get_u32_le();
        let num_bits = data.get_u64_le();
        let sip_keys = [
            (data.get_u64_le(), data.get_u64_le()),
            (data.get_u64_le(), data.get_u64_le()),
        ];

        if num_hashes == 0 || num_bits == 0 {
            return Err(VParquetError::DecodeFailure(format!(
                "bloom shard header is inconsistent: k={} bits={}",
                num_hashes, num_bits
            )));
        }
        // a short bitmap would index past its end on lookup
        if data.remaining() as u64 != num_bits.div_ceil(8) {
            return Err(VParquetError::DecodeFailure(format!(
                "bloom shard of {} bits has a {} byte bitmap",
                num_bits,
                data.remaining()
            )));
        }

        Ok(Self {
            bloom: Bloom::from_existing(data, num_bits, num_hashes, sip_keys),
        })
    }
}

/// The full set of shards of one block
#[derive(Debug)]
pub struct ShardedBloom {
    shards: Vec<BloomFilter>,
}

impl ShardedBloom {
    /// Shards for `estimated_objects` ids, each under `shard_size_bytes`
    pub fn new(fp: f64, shard_size_bytes: usize, estimated_objects: usize) -> Self {
        let shard_count = shard_count_for(fp, shard_size_bytes, estimated_objects);
        let per_shard = estimated_objects.max(1).div_ceil(shard_count);
        Self {
            shards: (0..shard_count).map(|_| BloomFilter::new(per_shard, fp)).collect(),
        }
    }

    pub fn add(&mut self, id: &[u8]) {
        let key = shard_key(id, self.shards.len());
        self.shards[key].insert(id);
    }

    pub fn test(&self, id: &[u8]) -> bool {
        let key = shard_key(id, self.shards.len());
        self.shards[key].contains(id)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[BloomFilter] {
        &self.shards
    }

    /// Serialized shards, in shard order
    pub fn marshal(&self) -> Vec<Bytes> {
        self.shards.iter().map(BloomFilter::to_bytes).collect()
    }
}
