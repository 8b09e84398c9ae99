use std::sync::atomic::AtomicBool;

use hashbrown::HashSet;
use tinto::color_set::{decode_pos, ColorSet};
use tinto::directory::{ColorDirectory, MAX_HASH_PROBES};
use tinto::error::ColorIndexError;
use tinto::graph::{UnitigGraph, UnitigLocation};
use tinto::io::SequenceSource;
use tinto::kmer::{self, KmerScanner};
use tinto::ColorIndex;

struct VecSource {
    records: std::vec::IntoIter<(Vec<u8>, u32)>,
}

impl VecSource {
    fn new(records: Vec<(Vec<u8>, u32)>) -> Self {
        VecSource {
            records: records.into_iter(),
        }
    }
}

impl SequenceSource for VecSource {
    fn next_record(&mut self) -> tinto::error::Result<Option<(Vec<u8>, u32)>> {
        Ok(self.records.next())
    }
}

fn pack(seq: &[u8]) -> u64 {
    seq.iter()
        .fold(0u64, |acc, &b| (acc << 2) | kmer::encode_base(b) as u64)
}

/// Generate unitig sequences whose canonical k-mers are globally distinct,
/// by depth-first search over the four bases.
fn make_unitigs(k: usize, lens: &[usize]) -> Vec<Vec<u8>> {
    fn extend(seq: &mut Vec<u8>, used: &mut HashSet<u64>, k: usize, target: usize) -> bool {
        if seq.len() == target {
            return true;
        }
        for b in [b'A', b'C', b'G', b'T'] {
            seq.push(b);
            if seq.len() < k {
                if extend(seq, used, k, target) {
                    return true;
                }
                seq.pop();
                continue;
            }
            let (canon, _) = kmer::canonical(pack(&seq[seq.len() - k..]), k);
            if used.insert(canon) {
                if extend(seq, used, k, target) {
                    return true;
                }
                used.remove(&canon);
            }
            seq.pop();
        }
        false
    }

    let mut used = HashSet::new();
    let mut out = Vec::with_capacity(lens.len());
    for &len in lens {
        let mut seq = Vec::with_capacity(len);
        assert!(
            extend(&mut seq, &mut used, k, len),
            "could not generate a {}-base unitig with distinct {}-mers",
            len,
            k
        );
        out.push(seq);
    }
    out
}

fn rev_comp_seq(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            _ => b'A',
        })
        .collect()
}

fn full_loc(graph: &UnitigGraph, id: u32) -> UnitigLocation {
    let size = graph.unitig_len(id);
    UnitigLocation {
        unitig_id: id,
        offset: 0,
        len: size - graph.k() as u64 + 1,
        size,
        strand: true,
    }
}

fn build_index(
    k: usize,
    seqs: &[Vec<u8>],
    records: Vec<(Vec<u8>, u32)>,
    n_colors: usize,
    threads: usize,
) -> (UnitigGraph, ColorIndex) {
    let mut graph = UnitigGraph::new(k, seqs.to_vec()).unwrap();
    let mut index = ColorIndex::init(&mut graph);
    index.register_colors((0..n_colors).map(|i| format!("sample{}", i)));
    let mut source = VecSource::new(records);
    let cancel = AtomicBool::new(false);
    index
        .build(&graph, &mut source, threads, 4, &cancel)
        .unwrap();
    (graph, index)
}

fn unitig_pairs(graph: &UnitigGraph, index: &ColorIndex, id: u32) -> Vec<(u32, u64)> {
    let km = graph.unitig_len(id) - graph.k() as u64 + 1;
    index
        .directory()
        .with_set(graph.head_kmer(id), graph.hid(id), |s| {
            s.iter().map(|x| decode_pos(x, km)).collect()
        })
        .unwrap()
}

#[test]
fn single_kmer_two_sources() {
    // One unitig "ACG" (a single 3-mer), colored by two one-record files.
    let seqs = vec![b"ACG".to_vec()];
    let records = vec![(b"ACG".to_vec(), 0), (b"ACG".to_vec(), 1)];
    let (graph, index) = build_index(3, &seqs, records, 2, 1);

    let loc = graph.find(pack(b"ACG")).expect("k-mer in graph");
    assert_eq!(loc.unitig_id, 0);
    assert!(loc.strand);

    assert_eq!(unitig_pairs(&graph, &index, 0), vec![(0, 0), (1, 0)]);
    assert_eq!(index.colors_of(&graph, &loc).unwrap().to_vec(), vec![0, 1]);

    // Two colors over one k-mer stay in the inline representation.
    index
        .directory()
        .with_set(graph.head_kmer(0), graph.hid(0), |s| {
            assert_eq!(s.size(), 2);
            assert!(matches!(s, ColorSet::Inline(_)));
        })
        .unwrap();
}

#[test]
fn dense_unitig_promotes_to_bitmap() {
    // 66 bases at k=5: 62 k-mers per color; two full coverings cross the
    // inline range and must live in a compressed bitmap.
    let seqs = make_unitigs(5, &[66]);
    let read = seqs[0].clone();
    let records = vec![(read.clone(), 0), (read, 1)];
    let (graph, index) = build_index(5, &seqs, records, 2, 1);

    index
        .directory()
        .with_set(graph.head_kmer(0), graph.hid(0), |s| {
            assert_eq!(s.size(), 124);
            assert!(matches!(s, ColorSet::Bitmap(_)));
        })
        .unwrap();

    let loc = full_loc(&graph, 0);
    assert_eq!(loc.len, 62);
    assert!(index.contains(&graph, &loc, 0).unwrap());
    assert!(index.contains(&graph, &loc, 1).unwrap());
    assert_eq!(index.colors_of(&graph, &loc).unwrap().to_vec(), vec![0, 1]);
}

#[test]
fn every_input_kmer_gets_its_color() {
    let seqs = make_unitigs(7, &[30, 18, 25]);
    // Source 0: forward copies; source 1: reverse complements and a
    // substring; both with a record carrying an ambiguous base.
    let mut records: Vec<(Vec<u8>, u32)> = Vec::new();
    for s in &seqs {
        records.push((s.clone(), 0));
    }
    records.push((rev_comp_seq(&seqs[0]), 1));
    records.push((rev_comp_seq(&seqs[2]), 1));
    records.push((seqs[1][2..15].to_vec(), 1));
    let mut with_n = seqs[1].clone();
    with_n[9] = b'N';
    records.push((with_n, 1));

    let (graph, index) = build_index(7, &seqs, records.clone(), 2, 2);

    for (seq, color) in &records {
        let mut scan = KmerScanner::new(seq, 7);
        while let Some((_, km_word)) = scan.next_kmer() {
            let loc = graph.find(km_word).expect("read k-mer comes from a unitig");
            assert!(
                index.contains(&graph, &loc, *color).unwrap(),
                "color {} missing for a k-mer of its own source",
                color
            );
        }
    }

    // Reverse-complement reads cover the whole unitig with source 1.
    assert!(index
        .contains(&graph, &full_loc(&graph, 0), 1)
        .unwrap());
    assert!(index
        .contains(&graph, &full_loc(&graph, 2), 1)
        .unwrap());
    // ...but not unitig 1, which source 1 only touched in part.
    assert!(!index
        .contains(&graph, &full_loc(&graph, 1), 1)
        .unwrap());
    assert_eq!(
        index.colors_of(&graph, &full_loc(&graph, 1)).unwrap().to_vec(),
        vec![0, 1]
    );
}

#[test]
fn parallel_build_matches_serial_build() {
    let seqs = make_unitigs(9, &[40, 22, 31, 17]);
    let mut records: Vec<(Vec<u8>, u32)> = Vec::new();
    for c in 0..3u32 {
        for s in &seqs {
            records.push((s.clone(), c));
            records.push((rev_comp_seq(s), c));
        }
        records.push((seqs[0][5..25].to_vec(), c));
    }

    let (graph1, index1) = build_index(9, &seqs, records.clone(), 3, 1);
    let (graph4, index4) = build_index(9, &seqs, records, 3, 4);

    for id in 0..graph1.n_unitigs() as u32 {
        assert_eq!(
            unitig_pairs(&graph1, &index1, id),
            unitig_pairs(&graph4, &index4, id),
            "unitig {} differs between serial and parallel builds",
            id
        );
    }
}

#[test]
fn index_round_trips_through_bytes() {
    let seqs = make_unitigs(5, &[66, 12, 9]);
    let mut records: Vec<(Vec<u8>, u32)> = Vec::new();
    records.push((seqs[0].clone(), 0));
    records.push((seqs[1].clone(), 0));
    records.push((seqs[0].clone(), 1));
    records.push((seqs[2].clone(), 1));
    let (graph, index) = build_index(5, &seqs, records, 2, 1);

    let mut bytes = Vec::new();
    index.write(&graph, &mut bytes).unwrap();

    let mut graph2 = UnitigGraph::new(5, seqs.to_vec()).unwrap();
    let index2 = ColorIndex::read(&mut graph2, &mut bytes.as_slice()).unwrap();

    assert_eq!(index, index2);
    assert_eq!(graph.hids(), graph2.hids());
    assert_eq!(index2.color_name(0), Some("sample0"));
    for id in 0..graph.n_unitigs() as u32 {
        assert_eq!(
            unitig_pairs(&graph, &index, id),
            unitig_pairs(&graph2, &index2, id)
        );
    }
}

#[test]
fn truncated_or_foreign_files_are_rejected() {
    let seqs = make_unitigs(5, &[12]);
    let records = vec![(seqs[0].clone(), 0)];
    let (graph, index) = build_index(5, &seqs, records, 1, 1);

    let mut bytes = Vec::new();
    index.write(&graph, &mut bytes).unwrap();

    // Foreign magic.
    let mut wrong = bytes.clone();
    wrong[0] ^= 0xff;
    let mut graph2 = UnitigGraph::new(5, seqs.to_vec()).unwrap();
    let err = ColorIndex::read(&mut graph2, &mut wrong.as_slice()).unwrap_err();
    assert!(matches!(err, ColorIndexError::VersionMismatch(_)));

    // Truncation inside the slot section.
    let mut short = bytes.clone();
    short.truncate(bytes.len() - 3);
    let err = ColorIndex::read(&mut graph2, &mut short.as_slice()).unwrap_err();
    assert!(matches!(err, ColorIndexError::InputRead(_)));
}

#[test]
fn colliding_probes_route_to_the_overflow_map() {
    let k = 5;
    let seqs = make_unitigs(k, &[10, 14, 8]);
    let mut graph = UnitigGraph::new(k, seqs.clone()).unwrap();
    let heads: Vec<u64> = graph.iter_unitigs().map(|(_, h, _)| h).collect();

    // With every probe seed identical, each unitig has a single candidate
    // slot; pick a seed that makes at least two unitigs collide.
    let n = heads.len() as u64;
    let seed = (0u64..)
        .find(|&s| {
            let mut taken = HashSet::new();
            !heads
                .iter()
                .all(|&h| taken.insert(kmer::hash_with_seed(h, s) % n))
        })
        .unwrap();

    let mut dir = ColorDirectory::with_seeds(heads.len(), [seed; MAX_HASH_PROBES]);
    dir.assign_slots(&mut graph);
    assert!(dir.n_overflow() >= 1);
    assert!(graph.hids().iter().any(|&h| h == 0));

    let mut index = ColorIndex::from_parts(dir, vec!["a".into(), "b".into()]);
    let mut records: Vec<(Vec<u8>, u32)> = Vec::new();
    for s in &seqs {
        records.push((s.clone(), 0));
    }
    records.push((seqs[1].clone(), 1));
    let mut source = VecSource::new(records);
    let cancel = AtomicBool::new(false);
    index.build(&graph, &mut source, 2, 4, &cancel).unwrap();

    // Overflow-routed unitigs answer queries exactly like slotted ones.
    for id in 0..graph.n_unitigs() as u32 {
        let expect = if id == 1 { vec![0, 1] } else { vec![0] };
        assert_eq!(
            index.colors_of(&graph, &full_loc(&graph, id)).unwrap().to_vec(),
            expect
        );
    }

    // And they survive a round trip.
    let mut bytes = Vec::new();
    index.write(&graph, &mut bytes).unwrap();
    let mut graph2 = UnitigGraph::new(k, seqs).unwrap();
    let index2 = ColorIndex::read(&mut graph2, &mut bytes.as_slice()).unwrap();
    assert_eq!(index, index2);
}

#[test]
fn cancellation_aborts_the_build() {
    let seqs = make_unitigs(5, &[12]);
    let mut graph = UnitigGraph::new(5, seqs.clone()).unwrap();
    let mut index = ColorIndex::init(&mut graph);
    index.register_colors(["a".to_string()]);

    let mut source = VecSource::new(vec![(seqs[0].clone(), 0)]);
    let cancel = AtomicBool::new(true);
    let err = index.build(&graph, &mut source, 1, 4, &cancel).unwrap_err();
    assert!(matches!(err, ColorIndexError::Cancelled));
}

#[test]
fn build_reports_record_counts() {
    let seqs = make_unitigs(5, &[12, 9]);
    let mut graph = UnitigGraph::new(5, seqs.clone()).unwrap();
    let mut index = ColorIndex::init(&mut graph);
    index.register_colors(["a".to_string()]);

    // One record full of bases the graph cannot contain k-mers for.
    let mut records: Vec<(Vec<u8>, u32)> = seqs.iter().map(|s| (s.clone(), 0)).collect();
    records.push((b"NNNNNNNN".to_vec(), 0));

    let mut source = VecSource::new(records);
    let cancel = AtomicBool::new(false);
    let stats = index.build(&graph, &mut source, 1, 2, &cancel).unwrap();
    assert_eq!(stats.records, 3);
    assert_eq!(stats.kmers_mapped, (12 - 4) + (9 - 4));
    assert_eq!(stats.kmers_skipped, 0);
}
