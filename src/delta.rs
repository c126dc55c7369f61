//! §4.4's delta encoder: a diff pass sizing each shard's scratch arrays,
//! then an encode pass walking the full ordinal range once.

use crate::bitpacked::BitPackedArray;
use crate::bitset::BitSet;
use crate::ordinal_map::{decode_size, OrdinalMap};
use crate::placement::place_record;
use crate::stats::BitWidths;
use crate::util::hash_table_size;
use crate::varint::write_vint;

/// Per-shard sizes produced by the diff pass, ahead of any allocation.
#[derive(Debug, Clone)]
pub struct DeltaDiff {
    pub max_ordinal: i64,
    pub num_maps_in_delta: Vec<u64>,
    pub num_buckets_in_delta: Vec<u64>,
}

/// §4.4's diff pass: `added = to ∧ ¬from`, sized without decoding any entry
/// bytes beyond each added record's leading `size` var-int.
pub fn diff_pass(
    ordinal_map: &OrdinalMap,
    from: &BitSet,
    to: &BitSet,
    num_shards: u32,
    load_factor: f64,
) -> DeltaDiff {
    assert!(num_shards.is_power_of_two());

    let added = to.and_not(from);
    let mut num_maps_in_delta = vec![0u64; num_shards as usize];
    let mut num_buckets_in_delta = vec![0u64; num_shards as usize];

    for ord in added.iter_set_bits() {
        let bytes = ordinal_map
            .record_bytes(ord)
            .expect("ordinal in `to` but absent from `from` must have a staged record");
        let size = decode_size(bytes);
        let buckets = hash_table_size(size, load_factor) as u64;
        let shard = ord & (num_shards as usize - 1);
        num_maps_in_delta[shard] += 1;
        num_buckets_in_delta[shard] += buckets;
    }

    let max_ordinal = from
        .max_set_bit()
        .into_iter()
        .chain(to.max_set_bit())
        .max()
        .unwrap_or(-1);

    DeltaDiff {
        max_ordinal,
        num_maps_in_delta,
        num_buckets_in_delta,
    }
}

/// One shard's encoded delta body, ready to be framed.
pub struct ShardDelta {
    pub num_maps_in_delta: u64,
    pub num_buckets_in_delta: u64,
    pub pointers_and_sizes: BitPackedArray,
    pub entries: BitPackedArray,
    pub added_ordinals: Vec<u8>,
    pub removed_ordinals: Vec<u8>,
}

/// Encodes every shard's delta body.
///
/// `widths` and `num_shards` must already be the ones effective for this
/// delta's direction (see [`crate::stats::BitWidths::for_direction`] and
/// [`crate::stats::ShardStats::effective_num_shards`]) -- this function is
/// direction-agnostic and only ever sees `from`/`to` as given.
pub fn encode_delta(
    ordinal_map: &OrdinalMap,
    from: &BitSet,
    to: &BitSet,
    diff: &DeltaDiff,
    widths: &BitWidths,
    num_shards: u32,
    load_factor: f64,
    hasher: Option<&dyn Fn(u32) -> u32>,
) -> Vec<ShardDelta> {
    (0..num_shards as usize)
        .map(|shard| {
            encode_delta_shard(
                ordinal_map,
                from,
                to,
                shard,
                num_shards as usize,
                diff,
                widths,
                load_factor,
                hasher,
            )
        })
        .collect()
}

fn encode_delta_shard(
    ordinal_map: &OrdinalMap,
    from: &BitSet,
    to: &BitSet,
    shard: usize,
    num_shards: usize,
    diff: &DeltaDiff,
    widths: &BitWidths,
    load_factor: f64,
    hasher: Option<&dyn Fn(u32) -> u32>,
) -> ShardDelta {
    let pointer_width = widths.bits_per_map_pointer as usize;
    let size_width = widths.bits_per_map_size_value as usize;
    let pointer_size_width = pointer_width + size_width;
    let entry_width = widths.entry_width() as usize;

    let num_maps = diff.num_maps_in_delta[shard];
    let num_buckets = diff.num_buckets_in_delta[shard];

    let mut pointers_and_sizes =
        BitPackedArray::with_bit_capacity(num_maps as usize * pointer_size_width);
    let mut entries = BitPackedArray::with_bit_capacity(num_buckets as usize * entry_width);
    let mut added_ordinals = Vec::new();
    let mut removed_ordinals = Vec::new();

    let mut cursor: u64 = 0;
    let mut map_index: usize = 0;
    let mut prev_added_shard_ord: i64 = 0;
    let mut prev_removed_shard_ord: i64 = 0;

    if diff.max_ordinal >= 0 {
        let mut ord = shard;
        let mut shard_ord: i64 = 0;
        while (ord as i64) <= diff.max_ordinal {
            let in_from = from.get(ord);
            let in_to = to.get(ord);

            if in_to && !in_from {
                let record = ordinal_map
                    .decode(ord)
                    .expect("ordinal added this cycle must have a staged record");
                let size = record.size();
                let bucket_count = hash_table_size(size, load_factor);
                place_record(
                    &mut entries,
                    cursor as usize,
                    bucket_count,
                    widths,
                    &record,
                    hasher,
                );
                cursor += bucket_count as u64;
                let bit_offset = map_index * pointer_size_width;
                pointers_and_sizes.set_element_value(bit_offset, pointer_width, cursor);
                pointers_and_sizes.set_element_value(
                    bit_offset + pointer_width,
                    size_width,
                    size as u64,
                );
                map_index += 1;
                write_vint(&mut added_ordinals, (shard_ord - prev_added_shard_ord) as u32);
                prev_added_shard_ord = shard_ord;
            } else if in_from && !in_to {
                write_vint(
                    &mut removed_ordinals,
                    (shard_ord - prev_removed_shard_ord) as u32,
                );
                prev_removed_shard_ord = shard_ord;
            }

            ord += num_shards;
            shard_ord += 1;
        }
    }

    debug_assert_eq!(cursor, num_buckets);
    debug_assert_eq!(map_index as u64, num_maps);

    ShardDelta {
        num_maps_in_delta: num_maps,
        num_buckets_in_delta: num_buckets,
        pointers_and_sizes,
        entries,
        added_ordinals,
        removed_ordinals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordinal_map::{MapEntry, MapRecord};
    use crate::varint::read_vint;

    fn stage(map: &mut OrdinalMap, ordinal: usize, entries: Vec<(u32, u32, u32)>) {
        let record = MapRecord::new(
            entries
                .into_iter()
                .map(|(k, v, h)| MapEntry {
                    key_ordinal: k,
                    value_ordinal: v,
                    bucket_hint: h,
                })
                .collect(),
        );
        map.stage(ordinal, &record);
    }

    #[test]
    fn s3_added_and_removed_gap_streams() {
        let mut map = OrdinalMap::new();
        stage(&mut map, 1, vec![(1, 1, 0)]);
        stage(&mut map, 2, vec![(2, 2, 0)]);
        let prev = BitSet::from_ordinals([0, 1]);
        let curr = BitSet::from_ordinals([1, 2]);

        let diff = diff_pass(&map, &prev, &curr, 1, 0.75);
        assert_eq!(diff.num_maps_in_delta, vec![1]);

        let widths = BitWidths {
            bits_per_key_element: 3,
            bits_per_value_element: 3,
            bits_per_map_size_value: 2,
            bits_per_map_pointer: 4,
            rev_bits_per_map_pointer: None,
        };
        let shards = encode_delta(&map, &prev, &curr, &diff, &widths, 1, 0.75, None);
        let shard = &shards[0];

        let mut pos = 0;
        assert_eq!(read_vint(&shard.added_ordinals, &mut pos), 2);
        pos = 0;
        assert_eq!(read_vint(&shard.removed_ordinals, &mut pos), 0);
    }

    #[test]
    fn gap_streams_are_relative_to_previous_emission() {
        let mut map = OrdinalMap::new();
        for ord in [2usize, 5, 9] {
            stage(&mut map, ord, vec![(1, 1, 0)]);
        }
        let prev = BitSet::new();
        let curr = BitSet::from_ordinals([2, 5, 9]);
        let diff = diff_pass(&map, &prev, &curr, 1, 0.75);

        let widths = BitWidths {
            bits_per_key_element: 3,
            bits_per_value_element: 3,
            bits_per_map_size_value: 2,
            bits_per_map_pointer: 4,
            rev_bits_per_map_pointer: None,
        };
        let shards = encode_delta(&map, &prev, &curr, &diff, &widths, 1, 0.75, None);
        let stream = &shards[0].added_ordinals;

        let mut pos = 0;
        let a = read_vint(stream, &mut pos);
        let b = read_vint(stream, &mut pos);
        let c = read_vint(stream, &mut pos);
        assert_eq!((a, b, c), (2, 3, 4)); // gaps: 2-0, 5-2, 9-5
    }

    #[test]
    fn pointer_ends_at_num_buckets_in_delta() {
        let mut map = OrdinalMap::new();
        for ord in 0..4usize {
            stage(&mut map, ord, vec![(ord as u32, ord as u32, 0)]);
        }
        let prev = BitSet::new();
        let curr = BitSet::from_ordinals([0, 1, 2, 3]);
        let diff = diff_pass(&map, &prev, &curr, 1, 0.75);

        let widths = BitWidths {
            bits_per_key_element: 3,
            bits_per_value_element: 3,
            bits_per_map_size_value: 2,
            bits_per_map_pointer: 6,
            rev_bits_per_map_pointer: None,
        };
        let shards = encode_delta(&map, &prev, &curr, &diff, &widths, 1, 0.75, None);
        let shard = &shards[0];

        let pointer_width = widths.bits_per_map_pointer as usize;
        let size_width = widths.bits_per_map_size_value as usize;
        let slot_width = pointer_width + size_width;
        let last = shard.num_maps_in_delta as usize - 1;
        let pointer = shard
            .pointers_and_sizes
            .get_element_value(last * slot_width, pointer_width);
        assert_eq!(pointer, shard.num_buckets_in_delta);
    }

    #[test]
    fn no_op_ordinals_present_in_both_emit_nothing() {
        let mut map = OrdinalMap::new();
        stage(&mut map, 0, vec![(1, 1, 0)]);
        let prev = BitSet::from_ordinals([0]);
        let curr = BitSet::from_ordinals([0]);
        let diff = diff_pass(&map, &prev, &curr, 1, 0.75);
        assert_eq!(diff.num_maps_in_delta, vec![0]);
        assert_eq!(diff.num_buckets_in_delta, vec![0]);

        let widths = BitWidths {
            bits_per_key_element: 3,
            bits_per_value_element: 3,
            bits_per_map_size_value: 2,
            bits_per_map_pointer: 1,
            rev_bits_per_map_pointer: None,
        };
        let shards = encode_delta(&map, &prev, &curr, &diff, &widths, 1, 0.75, None);
        assert!(shards[0].added_ordinals.is_empty());
        assert!(shards[0].removed_ordinals.is_empty());
    }
}
