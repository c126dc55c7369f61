//! Stages a synthetic map population, runs a full snapshot + delta cycle,
//! and reports the shard statistics the two-pass pipeline chose. A
//! human-legible harness for a pipeline that is otherwise only exercised
//! through unit tests.

use clap::Parser;
use typed_map_writer::bitset::BitSet;
use typed_map_writer::hasher::{FieldResolution, FieldPath, TypeStateView};
use typed_map_writer::ordinal_map::{MapEntry, MapRecord, OrdinalMap};
use typed_map_writer::write_state::MapWriteState;
use typed_map_writer::WriterConfig;

#[derive(Parser)]
struct Args {
    /// Number of maps to stage in the initial population.
    #[arg(long, default_value_t = 10_000)]
    population: usize,

    /// Number of entries per staged map.
    #[arg(long, default_value_t = 4)]
    entries_per_map: u32,

    /// Byte budget the shard sizer keeps each shard under.
    #[arg(long, default_value_t = 1 << 16)]
    target_max_shard_bytes: u64,

    /// Load factor for hash-bucket sizing, must be in (0.0, 1.0).
    #[arg(long, default_value_t = 0.75)]
    load_factor: f64,

    /// Allow the shard sizer to pick a fresh shard count this cycle.
    #[arg(long, default_value_t = true)]
    can_reshard: bool,
}

/// No primary-key hasher declared for this demo; every record is placed by
/// its staged bucket hint.
struct NoPrimaryKeyHasher;

impl TypeStateView for NoPrimaryKeyHasher {
    fn resolve(&self, _path: &FieldPath) -> FieldResolution {
        FieldResolution::NotBindable
    }
}

fn stage_population(ordinal_map: &mut OrdinalMap, count: usize, entries_per_map: u32) -> BitSet {
    let mut curr = BitSet::new();
    for ordinal in 0..count {
        let mut entries = Vec::with_capacity(entries_per_map as usize);
        for i in 0..entries_per_map {
            let key_ordinal = ordinal as u32 * entries_per_map + i;
            entries.push(MapEntry {
                key_ordinal,
                value_ordinal: key_ordinal * 2,
                bucket_hint: i,
            });
        }
        ordinal_map.stage(ordinal, &MapRecord::new(entries));
        curr.set(ordinal);
    }
    curr
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = WriterConfig::new(args.target_max_shard_bytes, args.load_factor)?;
    let view = NoPrimaryKeyHasher;
    let mut state = MapWriteState::new(config, Vec::new(), &view);

    let mut ordinal_map = OrdinalMap::new();
    let curr = stage_population(&mut ordinal_map, args.population, args.entries_per_map);
    let prev = BitSet::new();

    state.prepare_for_write(args.can_reshard, &ordinal_map, &prev, &curr)?;
    println!("numShards chosen: {}", state.type_state_num_shards());

    state.calculate_snapshot(&ordinal_map, &curr)?;
    let mut snapshot_bytes = Vec::new();
    state.write_snapshot(&mut snapshot_bytes, &curr)?;
    println!("snapshot: {} bytes", snapshot_bytes.len());

    // Second cycle: remove the first tenth, add an equal number past the end.
    let removed = args.population / 10;
    let mut next_ordinal_map = ordinal_map.clone();
    let mut next_curr = curr.clone();
    for ordinal in 0..removed {
        next_curr_unset(&mut next_curr, ordinal);
    }
    for i in 0..removed {
        let ordinal = args.population + i;
        let entries = vec![MapEntry {
            key_ordinal: ordinal as u32,
            value_ordinal: ordinal as u32 * 2,
            bucket_hint: 0,
        }];
        next_ordinal_map.stage(ordinal, &MapRecord::new(entries));
        next_curr.set(ordinal);
    }

    state.prepare_for_write(args.can_reshard, &next_ordinal_map, &curr, &next_curr)?;
    state.calculate_delta(&next_ordinal_map, &curr, &next_curr, false)?;
    let mut delta_bytes = Vec::new();
    let max_shard_ordinal = state.effective_max_shard_ordinal().to_vec();
    state.write_calculated_delta(&mut delta_bytes, false, &max_shard_ordinal)?;
    println!("delta: {} bytes ({} added, {} removed)", delta_bytes.len(), removed, removed);

    Ok(())
}

/// `BitSet` has no public unset; the demo only ever adds ordinals, so model
/// a removal by rebuilding from the ordinals still present.
fn next_curr_unset(curr: &mut BitSet, ordinal: usize) {
    let remaining: Vec<usize> = curr.iter_set_bits().filter(|&o| o != ordinal).collect();
    *curr = BitSet::from_ordinals(remaining);
}
