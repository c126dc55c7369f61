//! §4.5's outer and shard-body byte framing, shared by the snapshot and
//! delta writers.

use std::io::{self, Write};

use crate::bitset::BitSet;
use crate::delta::ShardDelta;
use crate::snapshot::ShardSnapshot;
use crate::stats::BitWidths;
use crate::varint::{write_vint, write_vlong};

/// `maxShardOrdinal` is `-1` for an empty shard; var-ints are unsigned, so
/// it is carried as `value + 1` on the wire.
fn write_max_shard_ordinal<W: Write>(out: &mut W, max_shard_ordinal: i64) -> io::Result<()> {
    let mut buf = Vec::new();
    write_vint(&mut buf, (max_shard_ordinal + 1) as u32);
    out.write_all(&buf)
}

fn write_words<W: Write>(out: &mut W, words: &[u64]) -> io::Result<()> {
    let mut buf = Vec::new();
    write_vint(&mut buf, words.len() as u32);
    out.write_all(&buf)?;
    for word in words {
        out.write_all(&word.to_be_bytes())?;
    }
    Ok(())
}

/// Writes a full snapshot: the optional sharded header, each shard body in
/// order, then the populated bit-set.
///
/// `max_ordinal` is the type's overall max populated ordinal this cycle
/// (shared across shards; each shard's own `maxShardOrdinal` is carried
/// inside [`ShardSnapshot`]).
pub fn write_snapshot<W: Write>(
    out: &mut W,
    shards: &[ShardSnapshot],
    curr: &BitSet,
    max_ordinal: i64,
) -> io::Result<()> {
    if shards.len() > 1 {
        let mut buf = Vec::new();
        write_vint(&mut buf, (max_ordinal + 1) as u32);
        out.write_all(&buf)?;
    }
    for shard in shards {
        write_snapshot_shard_body(out, shard)?;
    }
    curr.serialize_to(out)
}

fn write_snapshot_shard_body<W: Write>(out: &mut W, shard: &ShardSnapshot) -> io::Result<()> {
    write_max_shard_ordinal(out, shard.max_shard_ordinal)?;
    write_stats_block(out, &shard.widths, shard.total_of_map_buckets)?;
    write_words(out, shard.pointers_and_sizes.words())?;
    write_words(out, shard.entries.words())
}

fn write_stats_block<W: Write>(
    out: &mut W,
    widths: &BitWidths,
    total_of_map_buckets: u64,
) -> io::Result<()> {
    let mut buf = Vec::new();
    write_vint(&mut buf, widths.bits_per_map_pointer);
    write_vint(&mut buf, widths.bits_per_map_size_value);
    write_vint(&mut buf, widths.bits_per_key_element);
    write_vint(&mut buf, widths.bits_per_value_element);
    write_vlong(&mut buf, total_of_map_buckets);
    out.write_all(&buf)
}

/// Writes a full delta: the optional sharded header, then each shard body.
/// No populated bit-set is appended -- readers reconstruct `curr` from
/// their prior state plus the add/remove streams.
///
/// `widths` and `effective_total_of_map_buckets` must already be the ones
/// for this delta's direction (see
/// [`crate::stats::BitWidths::for_direction`] and the forward/reverse
/// `totalOfMapBuckets` array), and `max_shard_ordinal` is the matching
/// per-shard array (`ShardStats::effective_max_shard_ordinal`).
pub fn write_delta<W: Write>(
    out: &mut W,
    shards: &[ShardDelta],
    widths: &BitWidths,
    max_shard_ordinal: &[i64],
    effective_total_of_map_buckets: &[u64],
    max_ordinal: i64,
) -> io::Result<()> {
    if shards.len() > 1 {
        let mut buf = Vec::new();
        write_vint(&mut buf, (max_ordinal + 1) as u32);
        out.write_all(&buf)?;
    }
    for (i, shard) in shards.iter().enumerate() {
        write_delta_shard_body(
            out,
            shard,
            widths,
            max_shard_ordinal[i],
            effective_total_of_map_buckets[i],
        )?;
    }
    Ok(())
}

fn write_delta_shard_body<W: Write>(
    out: &mut W,
    shard: &ShardDelta,
    widths: &BitWidths,
    max_shard_ordinal: i64,
    total_of_map_buckets: u64,
) -> io::Result<()> {
    write_max_shard_ordinal(out, max_shard_ordinal)?;

    let mut len_buf = Vec::new();
    write_vlong(&mut len_buf, shard.removed_ordinals.len() as u64);
    out.write_all(&len_buf)?;
    out.write_all(&shard.removed_ordinals)?;

    len_buf.clear();
    write_vlong(&mut len_buf, shard.added_ordinals.len() as u64);
    out.write_all(&len_buf)?;
    out.write_all(&shard.added_ordinals)?;

    write_stats_block(out, widths, total_of_map_buckets)?;
    write_words(out, shard.pointers_and_sizes.words())?;
    write_words(out, shard.entries.words())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterConfig;
    use crate::delta::{diff_pass, encode_delta};
    use crate::ordinal_map::{MapEntry, MapRecord, OrdinalMap};
    use crate::snapshot::encode_snapshot;
    use crate::stats::gather_stats;
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
    fn single_shard_snapshot_omits_the_maxordinal_header() {
        let mut map = OrdinalMap::new();
        stage(&mut map, 0, vec![(1, 1, 0)]);
        let curr = BitSet::from_ordinals([0]);
        let config = WriterConfig::new(1 << 20, 0.75).unwrap();
        let stats = gather_stats(&map, &BitSet::new(), &curr, 1, 1, config.load_factor);
        let shards = encode_snapshot(&map, &curr, &stats, config.load_factor, None);

        let mut buf = Vec::new();
        write_snapshot(&mut buf, &shards, &curr, stats.max_ordinal).unwrap();

        // Body starts directly with maxShardOrdinal (offset-by-one: 0+1=1).
        let mut pos = 0;
        assert_eq!(read_vint(&buf, &mut pos), 1);
    }

    #[test]
    fn sharded_snapshot_carries_a_maxordinal_header() {
        let mut map = OrdinalMap::new();
        for ord in 0..4usize {
            stage(&mut map, ord, vec![(ord as u32, ord as u32, 0)]);
        }
        let curr = BitSet::from_ordinals([0, 1, 2, 3]);
        let config = WriterConfig::new(1 << 20, 0.75).unwrap();
        let stats = gather_stats(&map, &BitSet::new(), &curr, 2, 2, config.load_factor);
        let shards = encode_snapshot(&map, &curr, &stats, config.load_factor, None);

        let mut buf = Vec::new();
        write_snapshot(&mut buf, &shards, &curr, stats.max_ordinal).unwrap();

        let mut pos = 0;
        assert_eq!(read_vint(&buf, &mut pos), (stats.max_ordinal + 1) as u32);
    }

    #[test]
    fn delta_has_no_trailing_bitset() {
        let mut map = OrdinalMap::new();
        stage(&mut map, 2, vec![(1, 1, 0)]);
        let prev = BitSet::new();
        let curr = BitSet::from_ordinals([2]);
        let config = WriterConfig::new(1 << 20, 0.75).unwrap();
        let stats = gather_stats(&map, &prev, &curr, 1, 1, config.load_factor);
        let diff = diff_pass(&map, &prev, &curr, 1, config.load_factor);
        let shards = encode_delta(&map, &prev, &curr, &diff, &stats.widths, 1, config.load_factor, None);

        let mut buf = Vec::new();
        write_delta(
            &mut buf,
            &shards,
            &stats.widths,
            &stats.max_shard_ordinal,
            &stats.total_of_map_buckets,
            diff.max_ordinal,
        )
        .unwrap();

        // No bit-set footer: the stream ends exactly at the last shard's
        // entries words, which we don't re-parse here (no decoder in this
        // crate) -- just assert it's non-empty and deterministic.
        let mut buf2 = Vec::new();
        write_delta(
            &mut buf2,
            &shards,
            &stats.widths,
            &stats.max_shard_ordinal,
            &stats.total_of_map_buckets,
            diff.max_ordinal,
        )
        .unwrap();
        assert_eq!(buf, buf2);
        assert!(!buf.is_empty());
    }

    #[test]
    fn snapshot_encoding_is_deterministic() {
        let mut map = OrdinalMap::new();
        stage(&mut map, 0, vec![(1, 1, 0), (2, 2, 1)]);
        stage(&mut map, 1, vec![(3, 3, 0)]);
        let curr = BitSet::from_ordinals([0, 1]);
        let config = WriterConfig::new(1 << 20, 0.75).unwrap();
        let stats = gather_stats(&map, &BitSet::new(), &curr, 1, 1, config.load_factor);

        let shards_a = encode_snapshot(&map, &curr, &stats, config.load_factor, None);
        let shards_b = encode_snapshot(&map, &curr, &stats, config.load_factor, None);
        let mut buf_a = Vec::new();
        let mut buf_b = Vec::new();
        write_snapshot(&mut buf_a, &shards_a, &curr, stats.max_ordinal).unwrap();
        write_snapshot(&mut buf_b, &shards_b, &curr, stats.max_ordinal).unwrap();
        assert_eq!(buf_a, buf_b);
    }
}
