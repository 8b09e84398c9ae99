//! Slot directory mapping unitig head k-mers to color-set storage.
//!
//! Every unitig claims one slot in a flat array by hash displacement: probe
//! the seeds in order and take the first unoccupied slot; the probe index
//! plus one becomes the unitig's `hid` byte. Unitigs that exhaust all
//! probes are routed to the overflow map (`hid = 0`). `MAX_HASH_PROBES` is
//! 31 for both claiming and lookup.
//!
//! A unitig owns exactly one live slot, so the slot mutex doubles as the
//! per-unitig lock of the mapping phase; overflow entries are locked
//! per-entry through the concurrent map's shard guards.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rand::{thread_rng, RngCore};
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

use crate::color_set::ColorSet;
use crate::error::{ColorIndexError, Result};
use crate::graph::UnitigGraph;
use crate::kmer::{self, Kmer};

pub const MAX_HASH_PROBES: usize = 31;

type FastDashMap<K, V> = DashMap<K, V, BuildHasherDefault<FxHasher>>;

pub struct ColorDirectory {
    slots: Vec<Mutex<ColorSet>>,
    overflow: FastDashMap<Kmer, ColorSet>,
    seeds: [u64; MAX_HASH_PROBES],
}

impl std::fmt::Debug for ColorDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots: Vec<ColorSet> = self.slots.iter().map(|s| s.lock().clone()).collect();
        f.debug_struct("ColorDirectory")
            .field("slots", &slots)
            .field("overflow", &self.overflow_entries_sorted())
            .field("seeds", &self.seeds)
            .finish()
    }
}


impl ColorDirectory {
    /// Allocate one slot per unitig, all unoccupied, with fresh seeds.
    pub fn new(n_unitigs: usize) -> Self {
        let mut rng = thread_rng();
        let mut seeds = [0u64; MAX_HASH_PROBES];
        for s in seeds.iter_mut() {
            *s = rng.next_u64();
        }
        Self::with_seeds(n_unitigs, seeds)
    }

    /// Same, with caller-provided seeds (index reload, tests).
    pub fn with_seeds(n_unitigs: usize, seeds: [u64; MAX_HASH_PROBES]) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(n_unitigs, || Mutex::new(ColorSet::new()));
        ColorDirectory {
            slots,
            overflow: FastDashMap::default(),
            seeds,
        }
    }

    pub(crate) fn from_parts(
        seeds: [u64; MAX_HASH_PROBES],
        slots: Vec<ColorSet>,
        overflow: Vec<(Kmer, ColorSet)>,
    ) -> Self {
        let dir = ColorDirectory {
            slots: slots.into_iter().map(Mutex::new).collect(),
            overflow: FastDashMap::default(),
            seeds,
        };
        for (head, set) in overflow {
            dir.overflow.insert(head, set);
        }
        dir
    }

    pub fn n_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn n_overflow(&self) -> usize {
        self.overflow.len()
    }

    pub fn seeds(&self) -> &[u64; MAX_HASH_PROBES] {
        &self.seeds
    }

    #[inline]
    fn slot_index(&self, head: Kmer, hid: u8) -> usize {
        (kmer::hash_with_seed(head, self.seeds[(hid - 1) as usize]) % self.slots.len() as u64)
            as usize
    }

    /// Claim one slot per unitig and record each unitig's probe id in the
    /// graph metadata. Single-threaded; run once, after the graph is frozen.
    pub fn assign_slots(&mut self, graph: &mut UnitigGraph) {
        let n = self.slots.len() as u64;
        if n == 0 {
            return;
        }
        let unitigs: Vec<(u32, Kmer)> = graph
            .iter_unitigs()
            .map(|(id, head, _)| (id, head))
            .collect();

        for (id, head) in unitigs {
            let mut hid = 0u8;
            for i in 0..MAX_HASH_PROBES {
                let slot = (kmer::hash_with_seed(head, self.seeds[i]) % n) as usize;
                let set = self.slots[slot].get_mut();
                if !set.is_occupied() {
                    set.set_occupied();
                    hid = (i + 1) as u8;
                    break;
                }
            }
            if hid == 0 {
                let mut cs = ColorSet::new();
                cs.set_occupied();
                self.overflow.insert(head, cs);
            }
            graph.set_hid(id, hid);
        }
    }

    /// Run `f` on the unitig's color set under its lock.
    pub fn with_set_mut<R>(
        &self,
        head: Kmer,
        hid: u8,
        f: impl FnOnce(&mut ColorSet) -> R,
    ) -> Result<R> {
        if hid == 0 {
            let mut entry = self
                .overflow
                .get_mut(&head)
                .ok_or(ColorIndexError::MissingColorSet(head))?;
            Ok(f(entry.value_mut()))
        } else {
            let slot = self.slot_index(head, hid);
            Ok(f(&mut self.slots[slot].lock()))
        }
    }

    /// Run `f` on a shared view of the unitig's color set.
    pub fn with_set<R>(&self, head: Kmer, hid: u8, f: impl FnOnce(&ColorSet) -> R) -> Result<R> {
        if hid == 0 {
            let entry = self
                .overflow
                .get(&head)
                .ok_or(ColorIndexError::MissingColorSet(head))?;
            Ok(f(entry.value()))
        } else {
            let slot = self.slot_index(head, hid);
            Ok(f(&self.slots[slot].lock()))
        }
    }

    /// Release a unitig's storage: unoccupy its slot or drop its overflow
    /// entry.
    pub fn release(&self, head: Kmer, hid: u8) {
        if hid == 0 {
            self.overflow.remove(&head);
        } else {
            let slot = self.slot_index(head, hid);
            self.slots[slot].lock().set_unoccupied();
        }
    }

    /// Canonicalize every stored set (bitmap demotion, run compression).
    pub fn optimize_all(&mut self) {
        for slot in &mut self.slots {
            slot.get_mut().optimize();
        }
        for mut entry in self.overflow.iter_mut() {
            entry.value_mut().optimize();
        }
    }

    pub(crate) fn slot_ref(&self, i: usize) -> MutexGuard<'_, ColorSet> {
        self.slots[i].lock()
    }

    /// Overflow entries in head-k-mer order (stable on-disk layout).
    pub(crate) fn overflow_entries_sorted(&self) -> Vec<(Kmer, ColorSet)> {
        let mut entries: Vec<(Kmer, ColorSet)> = self
            .overflow
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_unstable_by_key(|e| e.0);
        entries
    }
}

impl PartialEq for ColorDirectory {
    fn eq(&self, other: &Self) -> bool {
        self.seeds == other.seeds
            && self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(other.slots.iter())
                .all(|(a, b)| *a.lock() == *b.lock())
            && self.overflow_entries_sorted() == other.overflow_entries_sorted()
    }
}
