// Unitig catalog over a compacted de Bruijn graph.
//
// Unitigs are stored as per-base 2-bit codes; every k-mer position is
// indexed under its canonical form so lookups report the mapped strand.
// The color index keeps a single byte of per-unitig metadata here: the
// hash-probe id (`hid`) of the unitig's directory slot.

use anyhow::Result;
use hashbrown::HashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

use crate::kmer::{self, Kmer};

type FastHashMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher>>;

/// A mapping of `len` consecutive k-mers onto a unitig.
///
/// `offset` is the position of the first mapped k-mer on the mapped strand:
/// on the forward strand it counts from the unitig head, on the reverse
/// strand from the unitig tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitigLocation {
    pub unitig_id: u32,
    /// K-mer offset on the mapped strand.
    pub offset: u64,
    /// Number of consecutive mapped k-mers.
    pub len: u64,
    /// Unitig length in bases.
    pub size: u64,
    /// True when mapped on the forward strand.
    pub strand: bool,
}

impl UnitigLocation {
    /// Number of k-mers on the whole unitig.
    #[inline]
    pub fn km(&self, k: usize) -> u64 {
        self.size - k as u64 + 1
    }

    /// Offset of the first mapped k-mer in forward-strand coordinates.
    #[inline]
    pub fn forward_offset(&self, k: usize) -> u64 {
        if self.strand {
            self.offset
        } else {
            self.km(k) - self.offset - self.len
        }
    }
}

#[derive(Clone, Copy)]
struct KmerHit {
    unitig_id: u32,
    offset: u32,
    /// True when the unitig's forward-strand k-mer at this offset is the
    /// canonical form.
    forward: bool,
}

pub struct UnitigGraph {
    k: usize,
    unitigs: Vec<Vec<u8>>,
    index: FastHashMap<Kmer, KmerHit>,
    hids: Vec<u8>,
}

impl UnitigGraph {
    /// Build the catalog from unitig sequences (ASCII, ACGT only).
    pub fn new(k: usize, seqs: Vec<Vec<u8>>) -> Result<UnitigGraph> {
        anyhow::ensure!(
            (2..=kmer::MAX_K).contains(&k),
            "k={} is invalid: allowed range is 2..={}",
            k,
            kmer::MAX_K
        );

        let mask = kmer::kmer_mask(k);
        let mut unitigs: Vec<Vec<u8>> = Vec::with_capacity(seqs.len());
        let mut index = FastHashMap::default();

        for (uid, seq) in seqs.into_iter().enumerate() {
            anyhow::ensure!(
                seq.len() >= k,
                "unitig {} is shorter ({} bases) than k={}",
                uid,
                seq.len(),
                k
            );
            let mut codes = Vec::with_capacity(seq.len());
            for &b in &seq {
                let c = kmer::encode_base(b);
                anyhow::ensure!(
                    c != 255,
                    "unitig {} contains a non-ACGT base ({:?})",
                    uid,
                    b as char
                );
                codes.push(c);
            }

            let mut roll: u64 = 0;
            for (pos, &c) in codes.iter().enumerate() {
                roll = ((roll << 2) | (c as u64)) & mask;
                if pos + 1 < k {
                    continue;
                }
                let off = pos + 1 - k;
                let (canon, forward) = kmer::canonical(roll, k);
                let hit = KmerHit {
                    unitig_id: uid as u32,
                    offset: off as u32,
                    forward,
                };
                anyhow::ensure!(
                    index.insert(canon, hit).is_none(),
                    "duplicate k-mer at unitig {} offset {}: input is not a compacted graph",
                    uid,
                    off
                );
            }
            unitigs.push(codes);
        }

        let hids = vec![0u8; unitigs.len()];
        Ok(UnitigGraph {
            k,
            unitigs,
            index,
            hids,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn n_unitigs(&self) -> usize {
        self.unitigs.len()
    }

    pub fn n_kmers(&self) -> usize {
        self.index.len()
    }

    /// Unitig length in bases.
    pub fn unitig_len(&self, unitig_id: u32) -> u64 {
        self.unitigs[unitig_id as usize].len() as u64
    }

    /// First k-mer of the unitig on its forward strand.
    pub fn head_kmer(&self, unitig_id: u32) -> Kmer {
        let codes = &self.unitigs[unitig_id as usize];
        let mut roll: u64 = 0;
        for &c in &codes[..self.k] {
            roll = (roll << 2) | (c as u64);
        }
        roll
    }

    /// Iterate `(unitig_id, head_kmer, length_bases)` in id order.
    pub fn iter_unitigs(&self) -> impl Iterator<Item = (u32, Kmer, u64)> + '_ {
        (0..self.unitigs.len() as u32).map(|id| (id, self.head_kmer(id), self.unitig_len(id)))
    }

    pub fn set_hid(&mut self, unitig_id: u32, hid: u8) {
        self.hids[unitig_id as usize] = hid;
    }

    pub fn hid(&self, unitig_id: u32) -> u8 {
        self.hids[unitig_id as usize]
    }

    pub fn hids(&self) -> &[u8] {
        &self.hids
    }

    pub fn set_hids(&mut self, hids: Vec<u8>) {
        debug_assert_eq!(hids.len(), self.unitigs.len());
        self.hids = hids;
    }

    /// Locate one k-mer. The returned location has `len = 1` and its offset
    /// expressed on the query strand.
    pub fn find(&self, query: Kmer) -> Option<UnitigLocation> {
        let (canon, query_is_canonical) = kmer::canonical(query, self.k);
        let hit = self.index.get(&canon)?;
        let size = self.unitig_len(hit.unitig_id);
        let km = size - self.k as u64 + 1;
        let strand = hit.forward == query_is_canonical;
        let offset = if strand {
            hit.offset as u64
        } else {
            km - 1 - hit.offset as u64
        };
        Some(UnitigLocation {
            unitig_id: hit.unitig_id,
            offset,
            len: 1,
            size,
            strand,
        })
    }

    /// Longest common extension past an initial k-mer match: the number of
    /// additional k-mers mappable by following the read along the mapped
    /// strand. `read_pos` is the read index of the matched k-mer's first
    /// base.
    pub fn extend_match(&self, loc: &UnitigLocation, read: &[u8], read_pos: usize) -> u64 {
        let codes = &self.unitigs[loc.unitig_id as usize];
        let km = loc.km(self.k);
        let avail_unitig = km - 1 - loc.offset;
        let avail_read = read.len().saturating_sub(read_pos + self.k) as u64;
        let max = avail_unitig.min(avail_read);

        let mut n = 0u64;
        while n < max {
            let b = kmer::encode_base(read[read_pos + self.k + n as usize]);
            if b == 255 {
                break;
            }
            let ucode = if loc.strand {
                codes[(loc.offset + self.k as u64 + n) as usize]
            } else {
                let fwd_start = km - 1 - loc.offset;
                3 - codes[(fwd_start - 1 - n) as usize]
            };
            if b != ucode {
                break;
            }
            n += 1;
        }
        n
    }
}

pub fn print_graph_size(g: &UnitigGraph) {
    eprintln!("graph size: unitigs={} kmers={}", g.n_unitigs(), g.n_kmers());
}
