//! The two-pass statistics phase (§4.1): the shard sizer that picks
//! `numShards`, and the per-shard stats pass that derives every bit-width
//! and bucket total the snapshot/delta encoders need before they can
//! allocate scratch arrays.

use crate::bitset::BitSet;
use crate::config::WriterConfig;
use crate::ordinal_map::OrdinalMap;
use crate::util::{ceil_log2, hash_table_size};

/// The four bit-widths shared by every shard and by both the forward and
/// reverse shard counts (§3's "Bit-widths (invariants)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitWidths {
    pub bits_per_key_element: u32,
    pub bits_per_value_element: u32,
    pub bits_per_map_size_value: u32,
    pub bits_per_map_pointer: u32,
    pub rev_bits_per_map_pointer: Option<u32>,
}

impl BitWidths {
    pub fn pointer_and_size_width(&self) -> u32 {
        self.bits_per_map_pointer + self.bits_per_map_size_value
    }

    pub fn rev_pointer_and_size_width(&self) -> u32 {
        self.rev_bits_per_map_pointer.unwrap_or(self.bits_per_map_pointer) + self.bits_per_map_size_value
    }

    pub fn entry_width(&self) -> u32 {
        self.bits_per_key_element + self.bits_per_value_element
    }

    pub fn empty_sentinel(&self) -> u64 {
        (1u64 << self.bits_per_key_element) - 1
    }

    /// The pointer width effective for a given delta direction (§4.4
    /// "Reverse handling"): `rev_bits_per_map_pointer` when reversing
    /// against a shard count that actually differs, else the forward
    /// width.
    pub fn effective_pointer_width(&self, is_reverse: bool) -> u32 {
        if is_reverse {
            self.rev_bits_per_map_pointer.unwrap_or(self.bits_per_map_pointer)
        } else {
            self.bits_per_map_pointer
        }
    }

    /// A copy of these widths with `bits_per_map_pointer` set to the one
    /// effective for `is_reverse`, so callers can treat forward and
    /// reverse deltas uniformly after this call.
    pub fn for_direction(&self, is_reverse: bool) -> BitWidths {
        BitWidths {
            bits_per_map_pointer: self.effective_pointer_width(is_reverse),
            rev_bits_per_map_pointer: None,
            ..*self
        }
    }
}

/// Per-shard and global statistics computed by the stats pass.
#[derive(Debug, Clone)]
pub struct ShardStats {
    pub num_shards: u32,
    pub rev_num_shards: u32,
    pub max_ordinal: i64,
    pub max_shard_ordinal: Vec<i64>,
    pub rev_max_shard_ordinal: Vec<i64>,
    pub total_of_map_buckets: Vec<u64>,
    pub rev_total_of_map_buckets: Vec<u64>,
    pub widths: BitWidths,
}

impl ShardStats {
    pub fn needs_reverse(&self) -> bool {
        self.rev_num_shards != self.num_shards
    }

    /// The shard count effective for a given delta direction.
    pub fn effective_num_shards(&self, is_reverse: bool) -> u32 {
        if is_reverse && self.needs_reverse() {
            self.rev_num_shards
        } else {
            self.num_shards
        }
    }

    /// The per-shard `maxShardOrdinal` array effective for a direction.
    pub fn effective_max_shard_ordinal(&self, is_reverse: bool) -> &[i64] {
        if is_reverse && self.needs_reverse() {
            &self.rev_max_shard_ordinal
        } else {
            &self.max_shard_ordinal
        }
    }
}

/// Ordinals populated in either cycle, ascending, each visited once.
fn populated_ordinals(prev: &BitSet, curr: &BitSet) -> impl Iterator<Item = usize> {
    prev.or(curr).iter_set_bits().collect::<Vec<_>>().into_iter()
}

/// §4.1's shard sizer: a single pass over populated ordinals choosing the
/// smallest power-of-two shard count that keeps the projected snapshot
/// size under `config.target_max_shard_bytes` per shard.
pub fn choose_shard_count(
    ordinal_map: &OrdinalMap,
    prev: &BitSet,
    curr: &BitSet,
    config: &WriterConfig,
) -> u32 {
    let mut max_key_ordinal: i64 = -1;
    let mut max_value_ordinal: i64 = -1;
    let mut max_map_size: u32 = 0;
    let mut max_ordinal: i64 = -1;
    let mut total_buckets: u64 = 0;

    for ord in populated_ordinals(prev, curr) {
        max_ordinal = max_ordinal.max(ord as i64);
        let Some(record) = ordinal_map.decode(ord) else {
            continue;
        };
        max_map_size = max_map_size.max(record.size());
        total_buckets += hash_table_size(record.size(), config.load_factor) as u64;
        for entry in &record.entries {
            max_key_ordinal = max_key_ordinal.max(entry.key_ordinal as i64);
            max_value_ordinal = max_value_ordinal.max(entry.value_ordinal as i64);
        }
    }

    let bits_per_key = ceil_log2((max_key_ordinal + 2) as u64);
    let bits_per_value = (ceil_log2((max_value_ordinal + 1) as u64)).max(1);
    let bits_per_size = ceil_log2(max_map_size as u64 + 1);
    let bits_per_pointer_provisional = ceil_log2(total_buckets + 1);

    let projected_bytes = ((bits_per_size + bits_per_pointer_provisional) as u64
        * (max_ordinal + 1) as u64
        + (bits_per_key + bits_per_value) as u64 * total_buckets)
        / 8;

    let mut target_num_shards: u32 = 1;
    while (config.target_max_shard_bytes * target_num_shards as u64) < projected_bytes {
        target_num_shards *= 2;
    }
    target_num_shards
}

/// §4.1's statistics pass: same loop as the shard sizer, but now attributing
/// bucket totals to shards under the chosen `num_shards` (and, when
/// resharding, `rev_num_shards`).
///
/// `totalOfMapBuckets` must equal exactly what the snapshot walk writes for
/// `curr` (invariant 3: the final pointer in a shard equals its bucket
/// total), so only `curr`-populated ordinals feed it. `revTotalOfMapBuckets`
/// plays the same role for a reverse delta's "added" set against the prior
/// published shard count, i.e. the old snapshot's own layout, so only
/// `prev`-populated ordinals feed it. An ordinal present in both still
/// decodes once per iteration and is attributed to whichever of the two
/// counters applies.
pub fn gather_stats(
    ordinal_map: &OrdinalMap,
    prev: &BitSet,
    curr: &BitSet,
    num_shards: u32,
    rev_num_shards: u32,
    load_factor: f64,
) -> ShardStats {
    assert!(num_shards.is_power_of_two());
    assert!(rev_num_shards.is_power_of_two());

    let needs_rev = rev_num_shards != num_shards;

    let mut max_ordinal: i64 = -1;
    let mut max_key_ordinal: i64 = -1;
    let mut max_value_ordinal: i64 = -1;
    let mut max_map_size: u32 = 0;
    let mut total_of_map_buckets = vec![0u64; num_shards as usize];
    let mut rev_total_of_map_buckets = if needs_rev {
        vec![0u64; rev_num_shards as usize]
    } else {
        Vec::new()
    };

    for ord in populated_ordinals(prev, curr) {
        max_ordinal = max_ordinal.max(ord as i64);
        let Some(record) = ordinal_map.decode(ord) else {
            continue;
        };
        max_map_size = max_map_size.max(record.size());
        let buckets = hash_table_size(record.size(), load_factor) as u64;

        if curr.get(ord) {
            let shard = ord & (num_shards as usize - 1);
            total_of_map_buckets[shard] += buckets;
        }
        if needs_rev && prev.get(ord) {
            let rev_shard = ord & (rev_num_shards as usize - 1);
            rev_total_of_map_buckets[rev_shard] += buckets;
        }
        for entry in &record.entries {
            max_key_ordinal = max_key_ordinal.max(entry.key_ordinal as i64);
            max_value_ordinal = max_value_ordinal.max(entry.value_ordinal as i64);
        }
    }

    let max_shard_ordinal = derive_max_shard_ordinal(max_ordinal, num_shards);
    let rev_max_shard_ordinal = if needs_rev {
        derive_max_shard_ordinal(max_ordinal, rev_num_shards)
    } else {
        Vec::new()
    };

    let bits_per_key_element = ceil_log2((max_key_ordinal + 2) as u64);
    let bits_per_value_element = (ceil_log2((max_value_ordinal + 1) as u64)).max(1);
    let bits_per_map_size_value = ceil_log2(max_map_size as u64 + 1);
    let bits_per_map_pointer =
        ceil_log2(total_of_map_buckets.iter().copied().max().unwrap_or(0) + 1);
    let rev_bits_per_map_pointer = if needs_rev {
        Some(ceil_log2(
            rev_total_of_map_buckets.iter().copied().max().unwrap_or(0) + 1,
        ))
    } else {
        None
    };

    ShardStats {
        num_shards,
        rev_num_shards,
        max_ordinal,
        max_shard_ordinal,
        rev_max_shard_ordinal,
        total_of_map_buckets,
        rev_total_of_map_buckets,
        widths: BitWidths {
            bits_per_key_element,
            bits_per_value_element,
            bits_per_map_size_value,
            bits_per_map_pointer,
            rev_bits_per_map_pointer,
        },
    }
}

/// For each shard, the highest shard-local index reachable by any ordinal
/// in `0..=max_ordinal`, or `-1` if the shard owns no ordinal in range.
/// The snapshot walk visits every ordinal in that range (tombstones
/// included), so this is derivable directly from `max_ordinal` and
/// `num_shards` without a second scan.
fn derive_max_shard_ordinal(max_ordinal: i64, num_shards: u32) -> Vec<i64> {
    let mut result = vec![-1i64; num_shards as usize];
    if max_ordinal < 0 {
        return result;
    }
    for shard in 0..num_shards as usize {
        if (shard as i64) <= max_ordinal {
            result[shard] = (max_ordinal - shard as i64) / num_shards as i64;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordinal_map::{MapEntry, MapRecord};

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
    fn s1_single_map_bit_widths() {
        let mut map = OrdinalMap::new();
        stage(&mut map, 0, vec![(10, 100, 0), (20, 200, 1)]);
        let curr = BitSet::from_ordinals([0]);
        let prev = BitSet::new();
        let stats = gather_stats(&map, &prev, &curr, 1, 1, 0.75);

        assert_eq!(stats.widths.bits_per_key_element, 5); // ceilLog2(22)
        assert_eq!(stats.widths.bits_per_value_element, 8); // ceilLog2(201)
        assert_eq!(stats.widths.bits_per_map_size_value, 2); // ceilLog2(3)
    }

    #[test]
    fn derives_max_shard_ordinal_from_max_ordinal_alone() {
        // four ordinals, two shards: shard 0 owns {0,2}, shard 1 owns {1,3}
        let result = derive_max_shard_ordinal(3, 2);
        assert_eq!(result, vec![1, 1]);
    }

    #[test]
    fn empty_input_yields_minus_one_everywhere() {
        let map = OrdinalMap::new();
        let empty = BitSet::new();
        let stats = gather_stats(&map, &empty, &empty, 1, 1, 0.75);
        assert_eq!(stats.max_ordinal, -1);
        assert_eq!(stats.max_shard_ordinal, vec![-1]);
        assert_eq!(stats.widths.bits_per_key_element, 1); // ceilLog2(1)
    }

    #[test]
    fn reverse_counters_populated_only_when_shard_counts_differ() {
        let mut map = OrdinalMap::new();
        for ord in 0..4 {
            stage(&mut map, ord, vec![(ord as u32, ord as u32, 0)]);
        }
        let curr = BitSet::from_ordinals([0, 1, 2, 3]);
        let prev = BitSet::new();

        let same = gather_stats(&map, &prev, &curr, 2, 2, 0.75);
        assert!(!same.needs_reverse());
        assert!(same.rev_total_of_map_buckets.is_empty());

        let reshard = gather_stats(&map, &prev, &curr, 4, 2, 0.75);
        assert!(reshard.needs_reverse());
        assert_eq!(reshard.rev_total_of_map_buckets.len(), 2);
    }
}
