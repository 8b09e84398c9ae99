//! On-disk index format.
//!
//! Layout: a 16-byte magic+version prefix, the unitig and color counts, the
//! probe seeds, the color names, the per-unitig `hid` bytes, every directory
//! slot in order, then the overflow entries sorted by head k-mer. Integers
//! are little-endian; varints are LEB128. The color-set tag bytes are
//! pinned: 0 bitmap, 1 inline, 2 single, 3 unoccupied.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringTreemap;
use std::io::{Read, Write};

use crate::color_set::{ColorSet, TAG_BITMAP, TAG_INLINE, TAG_SINGLE, TAG_UNOCCUPIED};
use crate::directory::{ColorDirectory, MAX_HASH_PROBES};
use crate::error::{ColorIndexError, Result};
use crate::graph::UnitigGraph;
use crate::kmer::Kmer;

pub const MAGIC: [u8; 16] = *b"TINTOCLRIDX\0\0\0v1";

/// Cap on any single length prefix read back from disk.
const MAX_ALLOC: u64 = 1 << 40;

pub fn encode_varint(w: &mut impl Write, mut v: u64) -> Result<()> {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            w.write_u8(b)?;
            return Ok(());
        }
        w.write_u8(b | 0x80)?;
    }
}

pub fn decode_varint(r: &mut impl Read) -> Result<u64> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = r.read_u8()?;
        v |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
        if shift >= 64 {
            return Err(ColorIndexError::CorruptColorSet(byte));
        }
    }
}

fn write_set(w: &mut impl Write, set: &ColorSet) -> Result<()> {
    match set {
        ColorSet::Bitmap(bm) => {
            w.write_u8(TAG_BITMAP)?;
            encode_varint(w, bm.serialized_size() as u64)?;
            bm.serialize_into(&mut *w)?;
        }
        ColorSet::Inline(bits) => {
            w.write_u8(TAG_INLINE)?;
            w.write_u64::<LittleEndian>(*bits)?;
        }
        ColorSet::Single(v) => {
            w.write_u8(TAG_SINGLE)?;
            encode_varint(w, *v)?;
        }
        ColorSet::Unoccupied => {
            w.write_u8(TAG_UNOCCUPIED)?;
        }
    }
    Ok(())
}

fn read_set(r: &mut impl Read) -> Result<ColorSet> {
    let tag = r.read_u8()?;
    match tag {
        TAG_BITMAP => {
            let n = decode_varint(r)?;
            if n > MAX_ALLOC {
                return Err(ColorIndexError::OutOfMemory(n));
            }
            let mut buf = vec![0u8; n as usize];
            r.read_exact(&mut buf)?;
            let bm = RoaringTreemap::deserialize_from(&buf[..])?;
            Ok(ColorSet::Bitmap(Box::new(bm)))
        }
        TAG_INLINE => Ok(ColorSet::Inline(r.read_u64::<LittleEndian>()?)),
        TAG_SINGLE => Ok(ColorSet::Single(decode_varint(r)?)),
        TAG_UNOCCUPIED => Ok(ColorSet::Unoccupied),
        t => Err(ColorIndexError::CorruptColorSet(t)),
    }
}

pub fn write_index(
    w: &mut impl Write,
    directory: &ColorDirectory,
    graph: &UnitigGraph,
    color_names: &[String],
) -> Result<()> {
    w.write_all(&MAGIC)?;
    w.write_u64::<LittleEndian>(graph.n_unitigs() as u64)?;
    w.write_u64::<LittleEndian>(color_names.len() as u64)?;
    w.write_u8(MAX_HASH_PROBES as u8)?;
    for s in directory.seeds() {
        w.write_u64::<LittleEndian>(*s)?;
    }
    for name in color_names {
        encode_varint(w, name.len() as u64)?;
        w.write_all(name.as_bytes())?;
    }
    w.write_all(graph.hids())?;
    for i in 0..directory.n_slots() {
        write_set(w, &directory.slot_ref(i))?;
    }
    let overflow = directory.overflow_entries_sorted();
    w.write_u64::<LittleEndian>(overflow.len() as u64)?;
    for (head, set) in &overflow {
        w.write_u64::<LittleEndian>(*head)?;
        write_set(w, set)?;
    }
    Ok(())
}

pub struct IndexFile {
    pub directory: ColorDirectory,
    pub color_names: Vec<String>,
    pub hids: Vec<u8>,
}

pub fn read_index(r: &mut impl Read) -> Result<IndexFile> {
    let mut magic = [0u8; 16];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(ColorIndexError::VersionMismatch(format!(
            "unknown magic {:?}",
            &magic[..]
        )));
    }

    let n_unitigs = r.read_u64::<LittleEndian>()?;
    let n_colors = r.read_u64::<LittleEndian>()?;
    if n_unitigs > MAX_ALLOC || n_colors > MAX_ALLOC {
        return Err(ColorIndexError::OutOfMemory(n_unitigs.max(n_colors)));
    }

    let n_probes = r.read_u8()? as usize;
    if n_probes != MAX_HASH_PROBES {
        return Err(ColorIndexError::VersionMismatch(format!(
            "index uses {} hash probes, this build uses {}",
            n_probes, MAX_HASH_PROBES
        )));
    }
    let mut seeds = [0u64; MAX_HASH_PROBES];
    for s in seeds.iter_mut() {
        *s = r.read_u64::<LittleEndian>()?;
    }

    let mut color_names = Vec::with_capacity(n_colors as usize);
    for _ in 0..n_colors {
        let len = decode_varint(r)?;
        if len > MAX_ALLOC {
            return Err(ColorIndexError::OutOfMemory(len));
        }
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf)?;
        let name = String::from_utf8(buf).map_err(|_| {
            ColorIndexError::VersionMismatch("color name is not valid UTF-8".to_string())
        })?;
        color_names.push(name);
    }

    let mut hids = vec![0u8; n_unitigs as usize];
    r.read_exact(&mut hids)?;

    let mut slots = Vec::with_capacity(n_unitigs as usize);
    for _ in 0..n_unitigs {
        slots.push(read_set(r)?);
    }

    let n_overflow = r.read_u64::<LittleEndian>()?;
    if n_overflow > MAX_ALLOC {
        return Err(ColorIndexError::OutOfMemory(n_overflow));
    }
    let mut overflow: Vec<(Kmer, ColorSet)> = Vec::with_capacity(n_overflow as usize);
    for _ in 0..n_overflow {
        let head = r.read_u64::<LittleEndian>()?;
        overflow.push((head, read_set(r)?));
    }

    Ok(IndexFile {
        directory: ColorDirectory::from_parts(seeds, slots, overflow),
        color_names,
        hids,
    })
}
