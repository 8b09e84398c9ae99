//! Color transforms under graph edits: unitig concatenation and substring
//! extraction.
//!
//! Offsets shift by bases (not k-mers) when two unitigs are joined: the
//! junction contributes new k-mer positions between the two halves. The
//! merged set is always written back through the destination's directory
//! slot, and consecutive positions are coalesced into runs before
//! insertion to keep retained bitmaps compressible.

use crate::color_set::{decode_pos, encode_pos, ColorId, ColorSet};
use crate::directory::ColorDirectory;
use crate::error::{ColorIndexError, Result};
use crate::graph::{UnitigGraph, UnitigLocation};

/// Accumulates consecutive `(color, offset)` pairs into range inserts.
struct RunCoalescer {
    run: Option<(ColorId, u64, u64)>,
}

impl RunCoalescer {
    fn new() -> Self {
        RunCoalescer { run: None }
    }

    fn push(&mut self, out: &mut ColorSet, km_out: u64, c: ColorId, o: u64) {
        match &mut self.run {
            Some((rc, ro, rl)) if *rc == c && o == *ro + *rl => *rl += 1,
            Some(run) => {
                let (rc, ro, rl) = *run;
                out.insert_run(encode_pos(rc, ro, km_out), rl);
                *run = (c, o, 1);
            }
            None => self.run = Some((c, o, 1)),
        }
    }

    fn flush(&mut self, out: &mut ColorSet, km_out: u64) {
        if let Some((rc, ro, rl)) = self.run.take() {
            out.insert_run(encode_pos(rc, ro, km_out), rl);
        }
    }
}

/// Re-encode every position of `src` (over `km_src` k-mers) into `out`
/// (over `km_out` k-mers), shifting offsets by `shift`.
fn translate_into(out: &mut ColorSet, src: &ColorSet, km_src: u64, km_out: u64, shift: u64) {
    let mut runs = RunCoalescer::new();
    for x in src.iter() {
        let (c, o) = decode_pos(x, km_src);
        runs.push(out, km_out, c, o + shift);
    }
    runs.flush(out, km_out);
}

fn occupied_set(
    directory: &ColorDirectory,
    graph: &UnitigGraph,
    loc: &UnitigLocation,
    what: &str,
) -> Result<ColorSet> {
    let head = graph.head_kmer(loc.unitig_id);
    let hid = graph.hid(loc.unitig_id);
    let set = directory.with_set(head, hid, |s| s.clone())?;
    if !set.is_occupied() {
        return Err(ColorIndexError::InvalidEdit(format!(
            "{} unitig {} has an unoccupied color slot",
            what, loc.unitig_id
        )));
    }
    Ok(set)
}

/// Concatenate the colors of two unitigs: `dest` is extended by `src`
/// (either side may enter the concatenation reverse-complemented). The
/// merged set replaces the destination's slot content; the source's
/// storage is released.
pub fn join_colors(
    directory: &ColorDirectory,
    graph: &UnitigGraph,
    dest: &UnitigLocation,
    src: &UnitigLocation,
) -> Result<()> {
    let k = graph.k() as u64;
    if dest.size < k || src.size < k {
        return Err(ColorIndexError::InvalidEdit(format!(
            "join of unitigs shorter than k ({} and {} bases, k={})",
            dest.size, src.size, k
        )));
    }
    if dest.unitig_id == src.unitig_id {
        return Err(ColorIndexError::InvalidEdit(format!(
            "join of unitig {} with itself",
            dest.unitig_id
        )));
    }

    let km_dest = dest.km(graph.k());
    let km_src = src.km(graph.k());
    let km_joined = km_dest + src.size;

    let mut set_dest = occupied_set(directory, graph, dest, "destination")?;
    if !dest.strand {
        set_dest = set_dest.reverse(km_dest);
    }
    let mut set_src = occupied_set(directory, graph, src, "source")?;
    if !src.strand {
        set_src = set_src.reverse(km_src);
    }

    let mut joined = ColorSet::new();
    joined.set_occupied();
    translate_into(&mut joined, &set_dest, km_dest, km_joined, 0);
    translate_into(&mut joined, &set_src, km_src, km_joined, dest.size);

    let head_dest = graph.head_kmer(dest.unitig_id);
    directory.with_set_mut(head_dest, graph.hid(dest.unitig_id), |s| *s = joined)?;
    directory.release(graph.head_kmer(src.unitig_id), graph.hid(src.unitig_id));
    Ok(())
}

/// Carve the colors of the mapping `loc` out of its unitig: positions in
/// `[offset, offset + len)` are re-based to the new unitig's coordinates.
/// The returned set spans `loc.len` k-mers.
pub fn extract_colors(
    directory: &ColorDirectory,
    graph: &UnitigGraph,
    loc: &UnitigLocation,
) -> Result<ColorSet> {
    let km = loc.km(graph.k());
    if loc.len == 0 || loc.offset + loc.len > km {
        return Err(ColorIndexError::InvalidEdit(format!(
            "extract of k-mers {}..{} from a unitig with {} k-mers",
            loc.offset,
            loc.offset + loc.len,
            km
        )));
    }

    let mut set = occupied_set(directory, graph, loc, "source")?;
    if !loc.strand {
        set = set.reverse(km);
    }

    let mut out = ColorSet::new();
    out.set_occupied();
    let mut runs = RunCoalescer::new();
    for x in set.iter() {
        let (c, o) = decode_pos(x, km);
        if o >= loc.offset && o < loc.offset + loc.len {
            runs.push(&mut out, loc.len, c, o - loc.offset);
        }
    }
    runs.flush(&mut out, loc.len);
    Ok(out)
}
