//! §4.2's deterministic hash-bucket placement with linear probing.
//!
//! Readers probe the same way: compute the hash, mask to `B-1`, linear
//! probe until they either find their key or hit the sentinel. Because
//! entries are written in staging order and probing only advances on
//! collisions, the encoded table is a deterministic function of the
//! staged entries -- required for byte-identical deltas (§5's ordering
//! guarantee).

use crate::bitpacked::BitPackedArray;
use crate::ordinal_map::MapRecord;
use crate::stats::BitWidths;

/// Places `record`'s entries into the `bucket_count`-slot bucket range
/// starting at element index `bucket_base` of `entries`.
///
/// When `hasher` is `Some`, it overrides every entry's staged
/// `bucket_hint` (§4.2). `bucket_count` must be a power of two and
/// strictly greater than `record.entries.len()` -- the caller derives it
/// via [`crate::util::hash_table_size`], which guarantees this as long as
/// the configured load factor is in `(0.0, 1.0)`.
pub fn place_record(
    entries: &mut BitPackedArray,
    bucket_base: usize,
    bucket_count: u32,
    widths: &BitWidths,
    record: &MapRecord,
    hasher: Option<&dyn Fn(u32) -> u32>,
) {
    debug_assert!(bucket_count.is_power_of_two());
    debug_assert!((record.entries.len() as u32) < bucket_count);

    let key_width = widths.bits_per_key_element as usize;
    let value_width = widths.bits_per_value_element as usize;
    let slot_width = key_width + value_width;
    let sentinel = widths.empty_sentinel();
    let mask = bucket_count - 1;

    for slot in 0..bucket_count as usize {
        let bit_offset = (bucket_base + slot) * slot_width;
        entries.set_element_value(bit_offset, key_width, sentinel);
    }

    for entry in &record.entries {
        let bucket = match hasher {
            Some(h) => h(entry.key_ordinal) & mask,
            None => entry.bucket_hint & mask,
        };
        let mut slot = bucket as usize;
        loop {
            let bit_offset = (bucket_base + slot) * slot_width;
            if entries.get_element_value(bit_offset, key_width) == sentinel {
                entries.set_element_value(bit_offset, key_width, entry.key_ordinal as u64);
                entries.set_element_value(
                    bit_offset + key_width,
                    value_width,
                    entry.value_ordinal as u64,
                );
                break;
            }
            slot = (slot + 1) & mask as usize;
        }
    }
}
