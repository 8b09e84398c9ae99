use clap::{ArgAction, Parser};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use bitvec::prelude::*;
use smallvec::SmallVec;

pub mod color_set;
pub mod directory;
pub mod edits;
pub mod error;
pub mod graph;
pub mod io;
pub mod kmer;
pub mod mapper;
pub mod persist;

use color_set::{decode_pos, encode_pos, ColorId};
use directory::ColorDirectory;
use error::ColorIndexError;
use graph::{UnitigGraph, UnitigLocation};
use io::{FileSource, SequenceSource};
use mapper::MapStats;

/// Map per-source colors onto the k-mers of a compacted de Bruijn graph.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_version_flag = true)]
pub struct Args {
    /// Input sequence files (FASTA/FASTQ, plain or .gz); order defines color ids
    #[arg(short, long, required = true)]
    pub input: Vec<PathBuf>,

    /// Unitig FASTA of the compacted graph
    #[arg(short, long)]
    pub graph: PathBuf,

    /// K-mer length [k=31]
    #[arg(short, long, default_value_t = 31, hide_default_value = true)]
    pub k: usize,

    /// Output prefix [o=tinto]
    #[arg(short, long, default_value = "tinto")]
    pub output: PathBuf,

    /// Number of threads [t=1]
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Records per mapping batch [chunk=10000]
    #[arg(long, default_value_t = 10_000, hide_default_value = true)]
    pub chunk: usize,

    /// Print progress information
    #[arg(long)]
    pub verbose: bool,

    /// Display version information.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: (),
}

/// The color index of one compacted graph: the slot directory plus the
/// color-id to source-name mapping.
#[derive(Debug)]
pub struct ColorIndex {
    directory: ColorDirectory,
    color_names: Vec<String>,
}

impl ColorIndex {
    /// Size the directory to the frozen graph and claim one slot per
    /// unitig, writing each unitig's probe id into the graph metadata.
    pub fn init(graph: &mut UnitigGraph) -> ColorIndex {
        let mut directory = ColorDirectory::new(graph.n_unitigs());
        directory.assign_slots(graph);
        ColorIndex {
            directory,
            color_names: Vec::new(),
        }
    }

    /// Assemble an index from an already-populated directory (index
    /// tooling, tests).
    pub fn from_parts(directory: ColorDirectory, color_names: Vec<String>) -> ColorIndex {
        ColorIndex {
            directory,
            color_names,
        }
    }

    /// Register the color order (one color per source, in presentation
    /// order). Call once, before `build`.
    pub fn register_colors(&mut self, names: impl IntoIterator<Item = String>) {
        self.color_names.extend(names);
    }

    pub fn n_colors(&self) -> usize {
        self.color_names.len()
    }

    pub fn color_name(&self, color: ColorId) -> Option<&str> {
        self.color_names.get(color as usize).map(|s| s.as_str())
    }

    pub fn directory(&self) -> &ColorDirectory {
        &self.directory
    }

    /// Map all records of `source` onto the graph using `n_threads`
    /// workers over batches of `chunk_size` records.
    pub fn build(
        &mut self,
        graph: &UnitigGraph,
        source: &mut dyn SequenceSource,
        n_threads: usize,
        chunk_size: usize,
        cancel: &AtomicBool,
    ) -> error::Result<MapStats> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads.max(1))
            .build()
            .expect("Failed to build local Rayon thread pool");
        mapper::map_colors(
            graph,
            &self.directory,
            source,
            &pool,
            n_threads,
            chunk_size,
            cancel,
        )
    }

    /// True iff every k-mer of the mapping carries the color.
    pub fn contains(
        &self,
        graph: &UnitigGraph,
        loc: &UnitigLocation,
        color: ColorId,
    ) -> error::Result<bool> {
        let k = graph.k();
        let start = encode_pos(color, loc.forward_offset(k), loc.km(k));
        let head = graph.head_kmer(loc.unitig_id);
        self.directory
            .with_set(head, graph.hid(loc.unitig_id), |s| {
                s.contains_run(start, loc.len)
            })
    }

    /// Distinct colors present on at least one k-mer of the mapping, in
    /// ascending color order.
    pub fn colors_of(
        &self,
        graph: &UnitigGraph,
        loc: &UnitigLocation,
    ) -> error::Result<SmallVec<[ColorId; 4]>> {
        let k = graph.k();
        let km = loc.km(k);
        let fwd = loc.forward_offset(k);
        let mut bv = BitVec::<u32, Lsb0>::new();
        bv.resize(self.n_colors(), false);

        let head = graph.head_kmer(loc.unitig_id);
        self.directory
            .with_set(head, graph.hid(loc.unitig_id), |s| {
                for x in s.iter() {
                    let (c, o) = decode_pos(x, km);
                    if o >= fwd && o < fwd + loc.len {
                        if let Some(mut bit) = bv.get_mut(c as usize) {
                            *bit = true;
                        }
                    }
                }
            })?;
        Ok(bv.iter_ones().map(|c| c as ColorId).collect())
    }

    /// Canonicalize every stored set. Run once after the mapping phase.
    pub fn optimize(&mut self) {
        self.directory.optimize_all();
    }

    pub fn write(&self, graph: &UnitigGraph, w: &mut impl Write) -> error::Result<()> {
        persist::write_index(w, &self.directory, graph, &self.color_names)
    }

    /// Load an index written for `graph`; restores the per-unitig probe ids
    /// into the graph metadata.
    pub fn read(graph: &mut UnitigGraph, r: &mut impl Read) -> error::Result<ColorIndex> {
        let file = persist::read_index(r)?;
        if file.hids.len() != graph.n_unitigs() {
            return Err(ColorIndexError::VersionMismatch(format!(
                "index built for {} unitigs, graph has {}",
                file.hids.len(),
                graph.n_unitigs()
            )));
        }
        graph.set_hids(file.hids);
        Ok(ColorIndex {
            directory: file.directory,
            color_names: file.color_names,
        })
    }
}

impl PartialEq for ColorIndex {
    fn eq(&self, other: &Self) -> bool {
        self.color_names == other.color_names && self.directory == other.directory
    }
}

/// Exit code for the binary: 1 input/IO, 2 format, 3 internal.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ColorIndexError>() {
        Some(ColorIndexError::InputRead(_)) => 1,
        Some(ColorIndexError::VersionMismatch(_)) | Some(ColorIndexError::CorruptColorSet(_)) => 2,
        Some(_) => 3,
        None => 1,
    }
}

pub fn index_path(prefix: &std::path::Path) -> PathBuf {
    let mut path = prefix.to_path_buf();
    path.set_extension("tinto");
    path
}

pub fn run_with_args(args: Args) -> anyhow::Result<()> {
    let num_threads = args.threads.unwrap_or(1);
    anyhow::ensure!(num_threads >= 1, "threads must be ≥ 1");
    anyhow::ensure!(args.chunk >= 1, "chunk must be ≥ 1");

    eprintln!("tinto v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "parameters: k={} threads={} chunk={} graph={} output={}",
        args.k,
        num_threads,
        args.chunk,
        args.graph.display(),
        args.output.display()
    );

    let seqs = io::read_unitig_fasta(&args.graph)?;
    let mut graph = UnitigGraph::new(args.k, seqs)?;
    graph::print_graph_size(&graph);

    let mut index = ColorIndex::init(&mut graph);
    if args.verbose {
        eprintln!(
            "color slots: hashed={} overflow={}",
            graph.n_unitigs() - index.directory().n_overflow(),
            index.directory().n_overflow()
        );
    }

    let inputs = io::source_inputs(&args.input)?;
    eprintln!("input files: {}", inputs.len());
    index.register_colors(inputs.iter().map(|s| s.name.clone()));

    let mut source = FileSource::new(inputs);
    let cancel = AtomicBool::new(false);
    let stats = index.build(&graph, &mut source, num_threads, args.chunk, &cancel)?;
    eprintln!(
        "mapped: records={} kmers={} skipped={} bad_records={}",
        stats.records, stats.kmers_mapped, stats.kmers_skipped, stats.bad_records
    );

    index.optimize();

    let out_path = index_path(&args.output);
    let fh = File::create(&out_path).with_context(|| format!("create {:?}", out_path))?;
    let mut w = BufWriter::new(fh);
    index.write(&graph, &mut w)?;
    w.flush()?;
    eprintln!("output file:  {}", out_path.display());

    Ok(())
}

/// Reload an index next to its graph (query tooling, tests).
pub fn load_index(graph_path: &std::path::Path, k: usize, index_file: &std::path::Path)
    -> anyhow::Result<(UnitigGraph, ColorIndex)> {
    let seqs = io::read_unitig_fasta(graph_path)?;
    let mut graph = UnitigGraph::new(k, seqs)?;
    let fh = File::open(index_file).with_context(|| format!("open {:?}", index_file))?;
    let mut r = BufReader::new(fh);
    let index = ColorIndex::read(&mut graph, &mut r)?;
    Ok((graph, index))
}
