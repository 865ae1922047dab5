//! Candidate primer generation.
//!
//! Pure and deterministic: the same (genome, target, config) always yields
//! the same ordered candidate list. Allele-specific forward candidates anchor
//! their 3'-terminal base on the SNP, substituted per allele, with the
//! configured KASP tail prepended. Common reverse candidates sweep lengths
//! and 3'-offsets downstream of the SNP on the minus strand. Windows that
//! would leave the chromosome, or that contain `N`, are skipped rather than
//! errored.

use bio::alphabets::dna::revcomp;

use crate::config::DesignConfig;
use crate::genome::Genome;
use crate::target::SnpTarget;

/// The three roles of a KASP primer triple. Closed by design: the assay only
/// ever has these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimerRole {
    AlleleA,
    AlleleB,
    Common,
}

impl PrimerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimerRole::AlleleA => "allele_A",
            PrimerRole::AlleleB => "allele_B",
            PrimerRole::Common => "common",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Plus,
    Minus,
}

/// An ephemeral candidate primer, generated and discarded within one SNP's
/// processing.
#[derive(Debug, Clone)]
pub struct PrimerCandidate {
    pub role: PrimerRole,
    pub strand: Strand,
    /// 0-based plus-strand coordinate of the leftmost covered genome base.
    pub start: usize,
    pub length: usize,
    /// Genomic part of the primer, 5'→3' in primer orientation, including
    /// the allele-specific 3'-terminal base for allele roles.
    pub core: Vec<u8>,
    /// Full synthesized sequence: KASP tail + core for allele roles, equal
    /// to `core` for the common primer.
    pub full: Vec<u8>,
}

impl PrimerCandidate {
    /// Plus-strand projection of the core: what a genome-wide search should
    /// look for on the forward strand.
    pub fn plus_oriented_core(&self) -> Vec<u8> {
        match self.strand {
            Strand::Plus => self.core.clone(),
            Strand::Minus => revcomp(&self.core[..]),
        }
    }
}

fn window_has_n(w: &[u8]) -> bool {
    w.iter().any(|&b| b == b'N')
}

/// Generate allele-specific forward candidates for one allele.
///
/// The 3' end sits on the SNP; the window extends upstream on the plus
/// strand. Lengths ascend, so output order is deterministic.
fn generate_allele(
    genome: &Genome,
    target: &SnpTarget,
    role: PrimerRole,
    allele: u8,
    tail: &[u8],
    cfg: &DesignConfig,
) -> Vec<PrimerCandidate> {
    let snp_idx = target.pos as usize - 1;
    let mut out = Vec::new();
    for len in cfg.primer_len_min..=cfg.primer_len_max {
        if snp_idx + 1 < len {
            continue; // window would run off the chromosome start
        }
        let start = snp_idx + 1 - len;
        let Ok(window) = genome.fetch(&target.chrom, start, snp_idx + 1) else {
            continue;
        };
        let mut core = window.to_vec();
        if window_has_n(&core[..len - 1]) {
            continue;
        }
        *core.last_mut().expect("len >= 2") = allele;
        let mut full = tail.to_vec();
        full.extend_from_slice(&core);
        out.push(PrimerCandidate { role, strand: Strand::Plus, start, length: len, core, full });
    }
    out
}

/// Generate common reverse candidates: minus-strand windows whose 3' end
/// binds `offset` bases downstream of the SNP, for every configured offset
/// and length. Offsets ascend, then lengths, for determinism.
fn generate_common(genome: &Genome, target: &SnpTarget, cfg: &DesignConfig) -> Vec<PrimerCandidate> {
    let snp_idx = target.pos as usize - 1;
    let chrom_len = genome.chrom_len(&target.chrom).unwrap_or(0);
    let mut out = Vec::new();
    for offset in cfg.common_offset_min..=cfg.common_offset_max {
        let start = snp_idx + offset;
        for len in cfg.primer_len_min..=cfg.primer_len_max {
            let end = start + len;
            if end > chrom_len {
                continue;
            }
            let Ok(window) = genome.fetch(&target.chrom, start, end) else {
                continue;
            };
            if window_has_n(window) {
                continue;
            }
            let core = revcomp(window);
            out.push(PrimerCandidate {
                role: PrimerRole::Common,
                strand: Strand::Minus,
                start,
                length: len,
                core: core.clone(),
                full: core,
            });
        }
    }
    out
}

/// Candidate sets for the three roles, in a fixed order.
pub struct CandidateSet {
    pub allele_a: Vec<PrimerCandidate>,
    pub allele_b: Vec<PrimerCandidate>,
    pub common: Vec<PrimerCandidate>,
}

/// Produce the full bounded candidate set for one validated target.
pub fn generate(genome: &Genome, target: &SnpTarget, cfg: &DesignConfig) -> CandidateSet {
    let allele_a = generate_allele(
        genome,
        target,
        PrimerRole::AlleleA,
        target.ref_allele,
        cfg.tail_a.as_bytes(),
        cfg,
    );
    let allele_b = generate_allele(
        genome,
        target,
        PrimerRole::AlleleB,
        target.alt_allele,
        cfg.tail_b.as_bytes(),
        cfg,
    );
    let common = generate_common(genome, target, cfg);
    log::debug!(
        "target {}: {} allele-A, {} allele-B, {} common candidates",
        target.id(),
        allele_a.len(),
        allele_b.len(),
        common.len()
    );
    CandidateSet { allele_a, allele_b, common }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_genome(len: usize) -> Genome {
        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut seq = Vec::with_capacity(len);
        for _ in 0..len {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seq.push(b"ACGT"[(state >> 33) as usize % 4]);
        }
        Genome::from_records("lcg", vec![("chr1".into(), seq)]).unwrap()
    }

    fn target_at(genome: &Genome, pos: u64) -> SnpTarget {
        let base = genome.base_at("chr1", pos).unwrap();
        let alt = if base == b'A' { b'C' } else { b'A' };
        SnpTarget { chrom: "chr1".into(), pos, ref_allele: base, alt_allele: alt, label: None }
    }

    #[test]
    fn allele_candidates_end_on_the_allele_base() {
        let g = lcg_genome(600);
        let t = target_at(&g, 300);
        let cfg = DesignConfig::default();
        let set = generate(&g, &t, &cfg);
        assert!(!set.allele_a.is_empty());
        for c in &set.allele_a {
            assert_eq!(*c.core.last().unwrap(), t.ref_allele);
            assert!(c.full.starts_with(cfg.tail_a.as_bytes()));
            assert!(c.full.ends_with(&[t.ref_allele]));
        }
        for c in &set.allele_b {
            assert_eq!(*c.core.last().unwrap(), t.alt_allele);
            assert!(c.full.starts_with(cfg.tail_b.as_bytes()));
        }
    }

    #[test]
    fn lengths_and_offsets_stay_within_configured_bounds() {
        let g = lcg_genome(600);
        let t = target_at(&g, 300);
        let cfg = DesignConfig::default();
        let set = generate(&g, &t, &cfg);
        let snp_idx = t.pos as usize - 1;
        for c in set.allele_a.iter().chain(&set.allele_b) {
            assert!(c.length >= cfg.primer_len_min && c.length <= cfg.primer_len_max);
            assert_eq!(c.start + c.length - 1, snp_idx);
        }
        for c in &set.common {
            assert!(c.length >= cfg.primer_len_min && c.length <= cfg.primer_len_max);
            let offset = c.start - snp_idx;
            assert!(offset >= cfg.common_offset_min && offset <= cfg.common_offset_max);
        }
    }

    #[test]
    fn chromosome_end_windows_are_skipped_not_errors() {
        let g = lcg_genome(600);
        // SNP five bases from the start: no full-length allele window fits.
        let t = target_at(&g, 5);
        let set = generate(&g, &t, &DesignConfig::default());
        assert!(set.allele_a.is_empty());
        // SNP near the end: no common reverse window fits downstream.
        let t = target_at(&g, 595);
        let set = generate(&g, &t, &DesignConfig::default());
        assert!(set.common.is_empty());
    }

    #[test]
    fn generation_is_deterministic() {
        let g = lcg_genome(600);
        let t = target_at(&g, 300);
        let cfg = DesignConfig::default();
        let a = generate(&g, &t, &cfg);
        let b = generate(&g, &t, &cfg);
        let dump = |s: &CandidateSet| {
            s.allele_a
                .iter()
                .chain(&s.allele_b)
                .chain(&s.common)
                .map(|c| (c.start, c.length, c.full.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(dump(&a), dump(&b));
    }

    #[test]
    fn minus_strand_core_is_reverse_complement() {
        let g = Genome::from_records("m", vec![("c".into(), b"AAAACGTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTACGACGACGACGACGACGGG".to_vec())]).unwrap();
        let t = SnpTarget { chrom: "c".into(), pos: 5, ref_allele: b'C', alt_allele: b'T', label: None };
        let mut cfg = DesignConfig::default();
        cfg.primer_len_min = 4;
        cfg.primer_len_max = 4;
        cfg.common_offset_min = 1;
        cfg.common_offset_max = 1;
        let set = generate(&g, &t, &cfg);
        // window starts at snp_idx + 1 = index 5 -> "GTTT" -> revcomp "AAAC"
        assert_eq!(set.common[0].core, b"AAAC".to_vec());
        assert_eq!(set.common[0].strand, Strand::Minus);
        assert_eq!(set.common[0].plus_oriented_core(), b"GTTT".to_vec());
    }
}
