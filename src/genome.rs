//! Genome store: random access over reference sequences.
//!
//! A [`Genome`] is loaded once from FASTA (plain or gzipped, parsed with
//! `needletail`), normalized to uppercase `{A,C,G,T,N}`, and then shared
//! read-only as `Arc<Genome>` across all jobs. Reads take no locks.
//! [`GenomeRegistry`] maps genome identifiers to loaded genomes and guards
//! the one-time load against concurrent re-load of the same id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use needletail::parse_fastx_file;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, RangeError};

/// One reference sequence.
#[derive(Debug)]
pub struct Chromosome {
    pub name: String,
    /// Uppercase bases; anything outside `ACGT` is stored as `N`.
    pub seq: Vec<u8>,
}

/// An immutable, indexed reference genome.
#[derive(Debug)]
pub struct Genome {
    id: String,
    chroms: Vec<Chromosome>,
    by_name: HashMap<String, usize>,
}

/// Normalize one base: uppercase, non-ACGT collapses to `N`.
#[inline]
pub fn normalize_base(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        c @ (b'A' | b'C' | b'G' | b'T') => c,
        _ => b'N',
    }
}

impl Genome {
    /// Load a genome from a FASTA file. Fails on unreadable or malformed
    /// input and on duplicate chromosome names.
    pub fn load<P: AsRef<Path>>(id: &str, path: P) -> Result<Genome, LoadError> {
        let p = path.as_ref();
        let pstr = p.display().to_string();
        let mut reader = parse_fastx_file(p).map_err(|e| LoadError::Malformed {
            path: pstr.clone(),
            reason: e.to_string(),
        })?;

        let mut chroms: Vec<Chromosome> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        while let Some(record) = reader.next() {
            let rec = record.map_err(|e| LoadError::Malformed {
                path: pstr.clone(),
                reason: e.to_string(),
            })?;
            // Chromosome name is the first whitespace-delimited token of the header.
            let header = String::from_utf8_lossy(rec.id()).to_string();
            let name = header.split_whitespace().next().unwrap_or("").to_string();
            if name.is_empty() {
                return Err(LoadError::Malformed {
                    path: pstr,
                    reason: "record with empty sequence name".to_string(),
                });
            }
            if by_name.contains_key(&name) {
                return Err(LoadError::DuplicateChromosome { name, path: pstr });
            }
            let seq: Vec<u8> = rec.seq().iter().map(|&b| normalize_base(b)).collect();
            if seq.is_empty() {
                return Err(LoadError::Malformed {
                    path: pstr,
                    reason: format!("chromosome '{name}' has an empty sequence"),
                });
            }
            by_name.insert(name.clone(), chroms.len());
            chroms.push(Chromosome { name, seq });
        }
        if chroms.is_empty() {
            return Err(LoadError::Empty { id: id.to_string() });
        }
        log::info!(
            "loaded genome '{}' from {}: {} chromosome(s), {} bases",
            id,
            pstr,
            chroms.len(),
            chroms.iter().map(|c| c.seq.len()).sum::<usize>()
        );
        Ok(Genome { id: id.to_string(), chroms, by_name })
    }

    /// Build a genome from in-memory records (used by tests and embedding
    /// callers). Same normalization and duplicate rules as [`Genome::load`].
    pub fn from_records(id: &str, records: Vec<(String, Vec<u8>)>) -> Result<Genome, LoadError> {
        let mut chroms = Vec::new();
        let mut by_name = HashMap::new();
        for (name, raw) in records {
            if by_name.contains_key(&name) {
                return Err(LoadError::DuplicateChromosome { name, path: "<memory>".into() });
            }
            let seq: Vec<u8> = raw.iter().map(|&b| normalize_base(b)).collect();
            if seq.is_empty() {
                return Err(LoadError::Malformed {
                    path: "<memory>".to_string(),
                    reason: format!("chromosome '{name}' has an empty sequence"),
                });
            }
            by_name.insert(name.clone(), chroms.len());
            chroms.push(Chromosome { name, seq });
        }
        if chroms.is_empty() {
            return Err(LoadError::Empty { id: id.to_string() });
        }
        Ok(Genome { id: id.to_string(), chroms, by_name })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Chromosomes in load order.
    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chroms
    }

    pub fn chrom_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn chrom_len(&self, name: &str) -> Option<usize> {
        self.chrom_index(name).map(|i| self.chroms[i].seq.len())
    }

    /// Fetch `[start, end)` (0-based, half-open) from a chromosome.
    ///
    /// # Examples
    /// ```
    /// use kasprimer::genome::Genome;
    /// let g = Genome::from_records("g", vec![("chr1".into(), b"ACGTACGT".to_vec())]).unwrap();
    /// assert_eq!(g.fetch("chr1", 2, 6).unwrap(), b"GTAC");
    /// assert!(g.fetch("chr1", 6, 2).is_err());
    /// ```
    pub fn fetch(&self, chrom: &str, start: usize, end: usize) -> Result<&[u8], RangeError> {
        let len = self.chrom_len(chrom).unwrap_or(0);
        if end < start || end > len || len == 0 {
            return Err(RangeError { chrom: chrom.to_string(), start, end, len });
        }
        let i = self.chrom_index(chrom).expect("length check implies presence");
        Ok(&self.chroms[i].seq[start..end])
    }

    /// The base at a 1-based position, if the position exists.
    pub fn base_at(&self, chrom: &str, pos: u64) -> Option<u8> {
        if pos == 0 {
            return None;
        }
        let i = self.chrom_index(chrom)?;
        self.chroms[i].seq.get(pos as usize - 1).copied()
    }
}

/// One entry of the genome registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeEntry {
    pub id: String,
    /// Human-readable name shown by the genome-listing query.
    pub name: String,
    pub path: String,
}

/// Registry of available genomes, with lazy one-time loading per id.
pub struct GenomeRegistry {
    entries: Vec<GenomeEntry>,
    // Loading holds this lock, so two callers asking for the same id never
    // both parse the FASTA.
    loaded: Mutex<HashMap<String, Arc<Genome>>>,
}

impl GenomeRegistry {
    pub fn new(entries: Vec<GenomeEntry>) -> Self {
        GenomeRegistry { entries, loaded: Mutex::new(HashMap::new()) }
    }

    /// Read a registry file: a JSON array of `{id, name, path}` objects.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let entries: Vec<GenomeEntry> = serde_json::from_str(&text)?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[GenomeEntry] {
        &self.entries
    }

    /// Register an already-loaded genome under its own id (direct FASTA
    /// submissions and tests).
    pub fn insert(&self, genome: Arc<Genome>) {
        let mut guard = self.loaded.lock().expect("registry lock");
        guard.insert(genome.id().to_string(), genome);
    }

    /// Return the genome for `id`, loading it on first use.
    pub fn get_or_load(&self, id: &str) -> Result<Arc<Genome>, LoadError> {
        let mut guard = self.loaded.lock().expect("registry lock");
        if let Some(g) = guard.get(id) {
            return Ok(g.clone());
        }
        let entry = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| LoadError::UnknownGenome { id: id.to_string() })?;
        let genome = Arc::new(Genome::load(id, &entry.path)?);
        guard.insert(id.to_string(), genome.clone());
        Ok(genome)
    }
}
