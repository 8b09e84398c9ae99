//! Batched parallel mapping of input records onto unitig color sets.
//!
//! The pipeline is bulk-synchronous: a single-threaded prefetch pulls up to
//! `chunk_size` records, the batch is split into contiguous per-worker
//! slices (remainder spread over the leading workers), and all workers join
//! before the next batch is fetched. Per-unitig contributions are set
//! unions, so the final color sets are independent of worker scheduling.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::color_set::encode_pos;
use crate::directory::ColorDirectory;
use crate::error::{ColorIndexError, Result};
use crate::graph::UnitigGraph;
use crate::io::SequenceSource;
use crate::kmer::KmerScanner;

#[derive(Debug, Default, Clone, Copy)]
pub struct MapStats {
    pub records: u64,
    pub kmers_mapped: u64,
    pub kmers_skipped: u64,
    pub bad_records: u64,
}

struct Counters {
    mapped: AtomicU64,
    skipped: AtomicU64,
}

/// Stream all records of `source` and add each record's color to every
/// unitig k-mer it covers.
pub fn map_colors(
    graph: &UnitigGraph,
    directory: &ColorDirectory,
    source: &mut dyn SequenceSource,
    pool: &rayon::ThreadPool,
    n_threads: usize,
    chunk_size: usize,
    cancel: &AtomicBool,
) -> Result<MapStats> {
    let chunk_size = chunk_size.max(1);
    let counters = Counters {
        mapped: AtomicU64::new(0),
        skipped: AtomicU64::new(0),
    };
    let first_error: Mutex<Option<ColorIndexError>> = Mutex::new(None);

    let mut records = 0u64;
    let mut batch: Vec<(Vec<u8>, u32)> = Vec::with_capacity(chunk_size);
    let mut done = false;

    while !done {
        batch.clear();
        while batch.len() < chunk_size {
            if cancel.load(Ordering::Relaxed) {
                return Err(ColorIndexError::Cancelled);
            }
            match source.next_record()? {
                Some(rec) => batch.push(rec),
                None => {
                    done = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            break;
        }
        records += batch.len() as u64;

        let workers = n_threads.max(1).min(batch.len());
        let base = batch.len() / workers;
        let extra = batch.len() % workers;

        pool.scope(|s| {
            let mut rest: &[(Vec<u8>, u32)] = &batch;
            for i in 0..workers {
                let take = base + usize::from(i < extra);
                let (part, tail) = rest.split_at(take);
                rest = tail;
                let counters = &counters;
                let first_error = &first_error;
                s.spawn(move |_| {
                    for (seq, color) in part {
                        if cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        if let Err(e) = map_record(graph, directory, seq, *color, counters) {
                            let mut slot = first_error.lock();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            // Stop the siblings as well.
                            cancel.store(true, Ordering::Relaxed);
                            return;
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.lock().take() {
            return Err(e);
        }
        if cancel.load(Ordering::Relaxed) {
            return Err(ColorIndexError::Cancelled);
        }
    }

    Ok(MapStats {
        records,
        kmers_mapped: counters.mapped.load(Ordering::Relaxed),
        kmers_skipped: counters.skipped.load(Ordering::Relaxed),
        bad_records: source.bad_records(),
    })
}

fn map_record(
    graph: &UnitigGraph,
    directory: &ColorDirectory,
    seq: &[u8],
    color: u32,
    counters: &Counters,
) -> Result<()> {
    let k = graph.k();
    let mut scan = KmerScanner::new(seq, k);
    let mut mapped = 0u64;
    let mut skipped = 0u64;

    while let Some((pos, km_word)) = scan.next_kmer() {
        let Some(mut loc) = graph.find(km_word) else {
            skipped += 1;
            continue;
        };
        let km = loc.km(k);

        // Extend the match along the read to cover a whole unitig stretch
        // with a single lookup and a single range insert.
        if (loc.strand && loc.offset > 0) || (!loc.strand && loc.offset < km - 1) {
            loc.len += graph.extend_match(&loc, seq, pos);
        }

        let start = encode_pos(color, loc.forward_offset(k), km);
        let head = graph.head_kmer(loc.unitig_id);
        let hid = graph.hid(loc.unitig_id);
        directory.with_set_mut(head, hid, |set| set.insert_run(start, loc.len))?;

        mapped += loc.len;
        scan.advance((loc.len - 1) as usize);
    }

    counters.mapped.fetch_add(mapped, Ordering::Relaxed);
    counters.skipped.fetch_add(skipped, Ordering::Relaxed);
    Ok(())
}
