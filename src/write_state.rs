//! The public write-state object (§6, §9): wires the stats, placement,
//! snapshot, delta and framing modules behind the four-call cycle an
//! embedding state engine drives -- `prepareForWrite`, `calculateSnapshot`
//! / `writeSnapshot`, `calculateDelta` / `writeCalculatedDelta`.
//!
//! §9 calls out that the source factors this into a base class shared by
//! every collection type (`Map`, `List`, `Set`, `Object`). This crate only
//! implements `Map`, so the shared fields (ordinal map, populated sets,
//! shard counts) live directly on [`MapWriteState`] rather than behind a
//! separate base-state trait -- there is nothing yet to factor it out of.

use std::io::Write;

use crate::bitset::BitSet;
use crate::config::WriterConfig;
use crate::delta::{diff_pass, encode_delta, ShardDelta};
use crate::error::{Result, WriteError};
use crate::framing;
use crate::hasher::{BoxedHasher, FieldPath, FieldPathHasherFactory, HasherBinding, TypeStateView};
use crate::ordinal_map::OrdinalMap;
use crate::snapshot::{encode_snapshot, ShardSnapshot};
use crate::stats::{choose_shard_count, gather_stats, BitWidths, ShardStats};

struct CalculatedSnapshot {
    shards: Vec<ShardSnapshot>,
    stats: ShardStats,
}

struct CalculatedDelta {
    shards: Vec<ShardDelta>,
    widths: BitWidths,
    is_reverse: bool,
    effective_total_of_map_buckets: Vec<u64>,
    effective_max_shard_ordinal: Vec<i64>,
    max_ordinal: i64,
}

/// Per-cycle encoder state for one Map-typed field, held by the embedding
/// state engine across `prepareForWrite` / calculate / write calls.
pub struct MapWriteState<'a, V: TypeStateView> {
    config: WriterConfig,
    hasher_field_paths: Vec<FieldPath>,
    state_view: &'a V,
    num_shards: u32,
    rev_num_shards: u32,
    calculated_snapshot: Option<CalculatedSnapshot>,
    calculated_delta: Option<CalculatedDelta>,
}

impl<'a, V: TypeStateView> MapWriteState<'a, V> {
    pub fn new(config: WriterConfig, hasher_field_paths: Vec<FieldPath>, state_view: &'a V) -> Self {
        Self {
            config,
            hasher_field_paths,
            state_view,
            num_shards: 1,
            rev_num_shards: 1,
            calculated_snapshot: None,
            calculated_delta: None,
        }
    }

    /// The shard count currently in effect. `typeStateNumShards` in the
    /// external interface: the embedding engine queries this to decide how
    /// to route a lookup by ordinal without re-running the shard sizer.
    pub fn type_state_num_shards(&self) -> u32 {
        self.num_shards
    }

    /// §4.1: run once per cycle before any encoding. `rev_num_shards` is
    /// always rolled to the prior cycle's `num_shards` first, so a
    /// `calculateDelta(.., is_reverse=true)` later this cycle still sees
    /// the shard count readers on the previous version understand.
    pub fn prepare_for_write(
        &mut self,
        can_reshard: bool,
        ordinal_map: &OrdinalMap,
        prev: &BitSet,
        curr: &BitSet,
    ) -> Result<()> {
        self.rev_num_shards = self.num_shards;
        if can_reshard {
            self.num_shards = match self.config.pinned_num_shards {
                Some(pinned) => pinned,
                None => choose_shard_count(ordinal_map, prev, curr, &self.config),
            };
        }
        Ok(())
    }

    fn bind_hasher(&self) -> Result<Option<BoxedHasher>> {
        match FieldPathHasherFactory::new(self.state_view).bind(&self.hasher_field_paths) {
            HasherBinding::Bound(hasher) => Ok(Some(hasher)),
            HasherBinding::Skipped => Ok(None),
            HasherBinding::Fatal(reason) => Err(WriteError::HasherBindingFailed {
                field_paths: self.hasher_field_paths.iter().map(|p| p.to_string()).collect(),
                reason,
            }),
        }
    }

    /// §4.3: computes a full snapshot of `curr` under the active shard
    /// count. Must be followed by [`Self::write_snapshot`] before the next
    /// `prepareForWrite` call discards the scratch arrays.
    pub fn calculate_snapshot(&mut self, ordinal_map: &OrdinalMap, curr: &BitSet) -> Result<()> {
        let empty = BitSet::new();
        let stats = gather_stats(
            ordinal_map,
            &empty,
            curr,
            self.num_shards,
            self.num_shards,
            self.config.load_factor,
        );
        let hasher = self.bind_hasher()?;
        let shards = encode_snapshot(
            ordinal_map,
            curr,
            &stats,
            self.config.load_factor,
            hasher.as_deref(),
        );
        self.calculated_snapshot = Some(CalculatedSnapshot { shards, stats });
        Ok(())
    }

    /// Streams the most recently calculated snapshot, followed by `curr`'s
    /// serialized populated bit-set.
    pub fn write_snapshot<W: Write>(&self, out: &mut W, curr: &BitSet) -> Result<()> {
        let calculated = self
            .calculated_snapshot
            .as_ref()
            .expect("calculate_snapshot must be called before write_snapshot");
        framing::write_snapshot(out, &calculated.shards, curr, calculated.stats.max_ordinal)
            .map_err(WriteError::Io)
    }

    /// §4.4: diffs `from_pop`/`to_pop` and encodes only the added records.
    /// `is_reverse` selects the bit-widths and shard count this delta is
    /// encoded against (§4.4 "Reverse handling") -- it does not swap
    /// `from_pop`/`to_pop` itself; the caller supplies those already
    /// oriented for the direction it wants.
    pub fn calculate_delta(
        &mut self,
        ordinal_map: &OrdinalMap,
        from_pop: &BitSet,
        to_pop: &BitSet,
        is_reverse: bool,
    ) -> Result<()> {
        let stats = gather_stats(
            ordinal_map,
            from_pop,
            to_pop,
            self.num_shards,
            self.rev_num_shards,
            self.config.load_factor,
        );
        let effective_num_shards = stats.effective_num_shards(is_reverse);
        let widths = stats.widths.for_direction(is_reverse);
        let effective_total_of_map_buckets = if is_reverse && stats.needs_reverse() {
            stats.rev_total_of_map_buckets.clone()
        } else {
            stats.total_of_map_buckets.clone()
        };
        let effective_max_shard_ordinal = stats.effective_max_shard_ordinal(is_reverse).to_vec();

        let hasher = self.bind_hasher()?;
        let diff = diff_pass(
            ordinal_map,
            from_pop,
            to_pop,
            effective_num_shards,
            self.config.load_factor,
        );
        let shards = encode_delta(
            ordinal_map,
            from_pop,
            to_pop,
            &diff,
            &widths,
            effective_num_shards,
            self.config.load_factor,
            hasher.as_deref(),
        );

        self.calculated_delta = Some(CalculatedDelta {
            shards,
            widths,
            is_reverse,
            effective_total_of_map_buckets,
            effective_max_shard_ordinal,
            max_ordinal: diff.max_ordinal,
        });
        Ok(())
    }

    /// The per-shard `maxShardOrdinal` array effective for the most
    /// recently calculated delta's direction -- exactly what
    /// `write_calculated_delta`'s `max_shard_ordinal` argument must be.
    /// Callers should use this instead of reconstructing the array
    /// themselves, since it is derived from the same stats pass
    /// `calculate_delta` already ran.
    pub fn effective_max_shard_ordinal(&self) -> &[i64] {
        &self
            .calculated_delta
            .as_ref()
            .expect("calculate_delta must be called before effective_max_shard_ordinal")
            .effective_max_shard_ordinal
    }

    /// Streams the most recently calculated delta. `max_shard_ordinal` is
    /// the per-shard array for this direction -- callers should pass
    /// [`Self::effective_max_shard_ordinal`], taken from the same
    /// `calculate_delta` call this write corresponds to.
    pub fn write_calculated_delta<W: Write>(
        &self,
        out: &mut W,
        is_reverse: bool,
        max_shard_ordinal: &[i64],
    ) -> Result<()> {
        let calculated = self
            .calculated_delta
            .as_ref()
            .expect("calculate_delta must be called before write_calculated_delta");
        debug_assert_eq!(
            calculated.is_reverse, is_reverse,
            "write_calculated_delta direction must match the last calculate_delta call"
        );
        framing::write_delta(
            out,
            &calculated.shards,
            &calculated.widths,
            max_shard_ordinal,
            &calculated.effective_total_of_map_buckets,
            calculated.max_ordinal,
        )
        .map_err(WriteError::Io)
    }
}
