//! §4.3's snapshot encoder.

use crate::bitpacked::BitPackedArray;
use crate::bitset::BitSet;
use crate::ordinal_map::OrdinalMap;
use crate::placement::place_record;
use crate::stats::{BitWidths, ShardStats};
use crate::util::hash_table_size;

/// A fully encoded shard: ready to be framed by `framing.rs`.
pub struct ShardSnapshot {
    pub max_shard_ordinal: i64,
    pub total_of_map_buckets: u64,
    pub widths: BitWidths,
    pub pointers_and_sizes: BitPackedArray,
    pub entries: BitPackedArray,
}

/// Encodes every shard of a full snapshot of `curr`.
///
/// One call per shard keeps this embarrassingly parallel over shards per
/// §5 -- each shard's scratch arrays are disjoint and only `ordinal_map`
/// and `curr` are shared (both read-only here).
pub fn encode_snapshot(
    ordinal_map: &OrdinalMap,
    curr: &BitSet,
    stats: &ShardStats,
    load_factor: f64,
    hasher: Option<&dyn Fn(u32) -> u32>,
) -> Vec<ShardSnapshot> {
    (0..stats.num_shards as usize)
        .map(|shard| encode_snapshot_shard(ordinal_map, curr, shard, stats, load_factor, hasher))
        .collect()
}

fn encode_snapshot_shard(
    ordinal_map: &OrdinalMap,
    curr: &BitSet,
    shard: usize,
    stats: &ShardStats,
    load_factor: f64,
    hasher: Option<&dyn Fn(u32) -> u32>,
) -> ShardSnapshot {
    let num_shards = stats.num_shards as usize;
    let max_shard_ordinal = stats.max_shard_ordinal[shard];
    let total_of_map_buckets = stats.total_of_map_buckets[shard];
    let widths = stats.widths;

    let pointer_width = widths.bits_per_map_pointer as usize;
    let size_width = widths.bits_per_map_size_value as usize;
    let pointer_size_width = pointer_width + size_width;
    let entry_width = widths.entry_width() as usize;

    let num_pointer_elems = if max_shard_ordinal >= 0 {
        (max_shard_ordinal + 1) as usize
    } else {
        0
    };
    let mut pointers_and_sizes =
        BitPackedArray::with_bit_capacity(num_pointer_elems * pointer_size_width);
    let mut entries = BitPackedArray::with_bit_capacity(total_of_map_buckets as usize * entry_width);

    let mut cursor: u64 = 0;
    if max_shard_ordinal >= 0 {
        for shard_ord in 0..=max_shard_ordinal as usize {
            let ord = shard_ord * num_shards + shard;
            let bit_offset = shard_ord * pointer_size_width;
            if curr.get(ord) {
                let record = ordinal_map
                    .decode(ord)
                    .expect("ordinal set in curr must have a staged record");
                let size = record.size();
                let bucket_count = hash_table_size(size, load_factor);
                place_record(
                    &mut entries,
                    cursor as usize,
                    bucket_count,
                    &widths,
                    &record,
                    hasher,
                );
                cursor += bucket_count as u64;
                pointers_and_sizes.set_element_value(bit_offset, pointer_width, cursor);
                pointers_and_sizes.set_element_value(
                    bit_offset + pointer_width,
                    size_width,
                    size as u64,
                );
            } else {
                // Tombstone: size field stays zero; pointer repeats the
                // running cursor so the next record's range starts here.
                pointers_and_sizes.set_element_value(bit_offset, pointer_width, cursor);
            }
        }
    }

    debug_assert_eq!(cursor, total_of_map_buckets);

    ShardSnapshot {
        max_shard_ordinal,
        total_of_map_buckets,
        widths,
        pointers_and_sizes,
        entries,
    }
}
