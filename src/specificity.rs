//! Genome-wide specificity checking.
//!
//! A [`SeedIndex`] (2-bit-encoded k-mer → positions) is built once per genome
//! and shared read-only by every job. Per candidate we run a pigeonhole
//! seed-and-extend search: split the pattern into `k+1` disjoint seeds, look
//! each up in the index, and verify every anchor by Hamming distance on both
//! strands. When the configured budget is too large for the pattern to carry
//! `k+1` seeds, a direct scan keeps the contract exact instead of silently
//! missing matches.

use std::collections::BTreeSet;
use std::collections::HashMap;

use bio::alphabets::dna::revcomp;

use crate::candidate::{PrimerCandidate, Strand};
use crate::genome::Genome;
use crate::target::SnpTarget;

/// What the checker reports for one candidate. A candidate with no match at
/// its intended locus is invalid; more than one acceptable match elsewhere
/// marks it ambiguous (penalized in ranking, not discarded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecificityReport {
    /// Genome-wide matches within the mismatch budget, both strands.
    pub hits: usize,
    /// Whether one of those matches is the intended locus.
    pub at_locus: bool,
    /// `hits > 1`.
    pub ambiguous: bool,
}

#[inline]
fn encode_base(b: u8) -> Option<u64> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Encode a seed as a 2-bit packed value; `None` if it contains `N`.
fn encode_seed(seed: &[u8]) -> Option<u64> {
    let mut v = 0u64;
    for &b in seed {
        v = (v << 2) | encode_base(b)?;
    }
    Some(v)
}

/// Immutable k-mer position index over a genome.
pub struct SeedIndex {
    seed_len: usize,
    map: HashMap<u64, Vec<(u32, u32)>>,
}

impl SeedIndex {
    /// Index every plus-strand k-mer of every chromosome. Windows containing
    /// `N` are skipped.
    pub fn build(genome: &Genome, seed_len: usize) -> SeedIndex {
        let mut map: HashMap<u64, Vec<(u32, u32)>> = HashMap::new();
        for (ci, chrom) in genome.chromosomes().iter().enumerate() {
            let seq = &chrom.seq;
            if seq.len() < seed_len {
                continue;
            }
            let mask = (1u64 << (2 * seed_len)) - 1;
            let mut key = 0u64;
            let mut valid = 0usize; // bases since the last N
            for (pos, &b) in seq.iter().enumerate() {
                match encode_base(b) {
                    Some(code) => {
                        key = ((key << 2) | code) & mask;
                        valid += 1;
                    }
                    None => {
                        valid = 0;
                    }
                }
                if valid >= seed_len {
                    let start = pos + 1 - seed_len;
                    map.entry(key).or_default().push((ci as u32, start as u32));
                }
            }
        }
        log::debug!(
            "seed index for '{}': {} distinct {}-mers",
            genome.id(),
            map.len(),
            seed_len
        );
        SeedIndex { seed_len, map }
    }

    pub fn seed_len(&self) -> usize {
        self.seed_len
    }

    fn lookup(&self, key: u64) -> &[(u32, u32)] {
        self.map.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn hamming_within(a: &[u8], b: &[u8], budget: usize) -> Option<usize> {
    debug_assert_eq!(a.len(), b.len());
    let mut d = 0;
    for (&x, &y) in a.iter().zip(b) {
        // N in the genome never counts as a match.
        if x != y || x == b'N' {
            d += 1;
            if d > budget {
                return None;
            }
        }
    }
    Some(d)
}

/// All (chrom, start) plus-strand anchors where `pattern` occurs within `k`
/// mismatches, via the seed index.
fn find_matches(genome: &Genome, index: &SeedIndex, pattern: &[u8], k: usize) -> BTreeSet<(u32, u32)> {
    let mut found = BTreeSet::new();
    let plen = pattern.len();
    let seed_len = index.seed_len;
    if plen < seed_len {
        return found;
    }

    if (k + 1) * seed_len > plen {
        // Pattern too short for pigeonhole at this budget; fall back to a
        // direct scan so the match count stays exact.
        for (ci, chrom) in genome.chromosomes().iter().enumerate() {
            if chrom.seq.len() < plen {
                continue;
            }
            for start in 0..=chrom.seq.len() - plen {
                if hamming_within(pattern, &chrom.seq[start..start + plen], k).is_some() {
                    found.insert((ci as u32, start as u32));
                }
            }
        }
        return found;
    }

    // k+1 disjoint seeds: at least one is exact in any match within budget.
    for s in 0..=k {
        let off = s * seed_len;
        let Some(key) = encode_seed(&pattern[off..off + seed_len]) else {
            continue;
        };
        for &(ci, seed_pos) in index.lookup(key) {
            let seed_pos = seed_pos as usize;
            if seed_pos < off {
                continue;
            }
            let start = seed_pos - off;
            let chrom = &genome.chromosomes()[ci as usize];
            if start + plen > chrom.seq.len() {
                continue;
            }
            if hamming_within(pattern, &chrom.seq[start..start + plen], k).is_some() {
                found.insert((ci as u32, start as u32));
            }
        }
    }
    found
}

/// Check one candidate against the whole genome.
///
/// The candidate's plus-strand projection is searched on both strands within
/// the mismatch budget; the intended locus is the candidate's own window on
/// its own strand. Note an allele-B candidate legitimately carries one
/// mismatch against the reference at its own locus, so budgets below 1 will
/// reject it there.
pub fn check(
    genome: &Genome,
    index: &SeedIndex,
    candidate: &PrimerCandidate,
    target: &SnpTarget,
    k: usize,
) -> SpecificityReport {
    let plus = candidate.plus_oriented_core();
    let minus = revcomp(&plus[..]);

    let fwd = find_matches(genome, index, &plus, k);
    let rev = find_matches(genome, index, &minus, k);

    let intended_chrom = genome.chrom_index(&target.chrom).map(|i| i as u32);
    let intended = intended_chrom.map(|ci| (ci, candidate.start as u32));

    let at_locus = match (intended, candidate.strand) {
        (Some(key), Strand::Plus) => fwd.contains(&key),
        (Some(key), Strand::Minus) => {
            // The minus-strand primer's plus projection is what `fwd` holds.
            fwd.contains(&key)
        }
        (None, _) => false,
    };

    // A palindromic window would appear in both sets at the same anchor;
    // count distinct (strand, anchor) occurrences the way a mispriming event
    // would see them, but collapse exact palindromes.
    let mut hits = fwd.len();
    for key in &rev {
        if !fwd.contains(key) {
            hits += 1;
        }
    }

    SpecificityReport { hits, at_locus, ambiguous: hits > 1 }
}
