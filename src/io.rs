use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use seq_io::fasta;
use seq_io::fastq;
use seq_io::fastq::Record as _;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::ColorIndexError;

// ------------------------------
// File I/O helpers
// ------------------------------

#[derive(Debug, Clone)]
pub struct SourceInput {
    pub name: String,
    pub path: PathBuf,
}

/// Build the color-ordered source list: one color per file, in the order
/// the files were given on the command line.
pub fn source_inputs(paths: &[PathBuf]) -> Result<Vec<SourceInput>> {
    let mut seen = hashbrown::HashSet::new();
    let mut inputs: Vec<SourceInput> = Vec::with_capacity(paths.len());

    for path in paths {
        let metadata =
            std::fs::metadata(path).with_context(|| format!("read metadata for {:?}", path))?;
        anyhow::ensure!(metadata.is_file(), "input path {:?} is not a file.", path);

        let name = source_name_from_path(path);
        if !seen.insert(name.clone()) {
            anyhow::bail!("input name {:?} appears more than once.", name);
        }
        inputs.push(SourceInput {
            name,
            path: path.clone(),
        });
    }
    Ok(inputs)
}

pub(crate) fn source_name_from_path(p: &Path) -> String {
    let mut stem = p
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("unnamed")
        .to_string();
    if stem.ends_with(".gz") {
        stem.truncate(stem.len() - 3);
    }
    for ext in [".fa", ".fasta", ".fas", ".fna", ".fq", ".fastq"] {
        if stem.to_ascii_lowercase().ends_with(ext) {
            let n = stem.len() - ext.len();
            stem.truncate(n);
            break;
        }
    }
    stem
}

pub(crate) fn open_seq(path: &Path) -> Result<Box<dyn Read>> {
    let f = File::open(path).with_context(|| format!("open {:?}", path))?;
    // Larger buffer for better I/O throughput
    let buffered = BufReader::with_capacity(512 * 1024, f);
    let r: Box<dyn Read> = if path.to_str().is_some_and(|s| s.ends_with(".gz")) {
        Box::new(MultiGzDecoder::new(buffered))
    } else {
        Box::new(buffered)
    };
    Ok(r)
}

fn is_fastq_path(path: &Path) -> bool {
    let s = path.to_str().unwrap_or("");
    let s = s.strip_suffix(".gz").unwrap_or(s);
    let lower = s.to_ascii_lowercase();
    lower.ends_with(".fq") || lower.ends_with(".fastq")
}

/// Read a unitig FASTA (the frozen compacted graph) into raw sequences.
pub fn read_unitig_fasta(path: &Path) -> Result<Vec<Vec<u8>>> {
    let rdr = open_seq(path)?;
    let mut reader = fasta::Reader::new(rdr);
    let mut seqs = Vec::new();
    while let Some(rec) = reader.next() {
        let rec = rec.with_context(|| format!("parse unitig record in {:?}", path))?;
        seqs.push(rec.full_seq().into_owned());
    }
    anyhow::ensure!(!seqs.is_empty(), "no unitigs found in {:?}", path);
    Ok(seqs)
}

// ------------------------------
// Record streaming for the mapper
// ------------------------------

/// Source of `(record_bytes, source_id)` pairs consumed by the mapper.
/// Source ids are non-decreasing: all records of color 0, then color 1, ...
pub trait SequenceSource {
    fn next_record(&mut self) -> crate::error::Result<Option<(Vec<u8>, u32)>>;

    /// Records dropped because of per-record parse errors.
    fn bad_records(&self) -> u64 {
        0
    }
}

enum RecordReader {
    Fasta(fasta::Reader<Box<dyn Read>>),
    Fastq(fastq::Reader<Box<dyn Read>>),
}

/// Streams the input files in color order, one file per color.
pub struct FileSource {
    inputs: Vec<SourceInput>,
    current: Option<RecordReader>,
    file_idx: usize,
    bad_records: u64,
}

impl FileSource {
    pub fn new(inputs: Vec<SourceInput>) -> Self {
        FileSource {
            inputs,
            current: None,
            file_idx: 0,
            bad_records: 0,
        }
    }

    fn open_next(&mut self) -> crate::error::Result<bool> {
        if self.file_idx >= self.inputs.len() {
            return Ok(false);
        }
        let path = &self.inputs[self.file_idx].path;
        let rdr = open_seq(path).map_err(|e| {
            ColorIndexError::InputRead(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("{:#}", e),
            ))
        })?;
        self.current = Some(if is_fastq_path(path) {
            RecordReader::Fastq(fastq::Reader::new(rdr))
        } else {
            RecordReader::Fasta(fasta::Reader::new(rdr))
        });
        Ok(true)
    }

    /// Pull one record from the current file. `Ok(None)` means the file is
    /// exhausted (or abandoned after a parse error).
    fn next_in_file(&mut self) -> crate::error::Result<Option<Vec<u8>>> {
        let name = &self.inputs[self.file_idx].name;
        match self.current.as_mut().expect("reader open") {
            RecordReader::Fasta(reader) => match reader.next() {
                None => Ok(None),
                Some(Ok(rec)) => Ok(Some(rec.full_seq().into_owned())),
                Some(Err(fasta::Error::Io(e))) => Err(ColorIndexError::InputRead(e)),
                Some(Err(e)) => {
                    eprintln!("[{}] skipping rest of file after parse error: {}", name, e);
                    self.bad_records += 1;
                    Ok(None)
                }
            },
            RecordReader::Fastq(reader) => match reader.next() {
                None => Ok(None),
                Some(Ok(rec)) => Ok(Some(rec.seq().to_vec())),
                Some(Err(fastq::Error::Io(e))) => Err(ColorIndexError::InputRead(e)),
                Some(Err(e)) => {
                    eprintln!("[{}] skipping rest of file after parse error: {}", name, e);
                    self.bad_records += 1;
                    Ok(None)
                }
            },
        }
    }
}

impl SequenceSource for FileSource {
    fn next_record(&mut self) -> crate::error::Result<Option<(Vec<u8>, u32)>> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(None);
            }
            match self.next_in_file()? {
                Some(seq) => return Ok(Some((seq, self.file_idx as u32))),
                None => {
                    self.current = None;
                    self.file_idx += 1;
                }
            }
        }
    }

    fn bad_records(&self) -> u64 {
        self.bad_records
    }
}
