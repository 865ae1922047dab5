//! Candidate ranking and final triple selection.
//!
//! Each surviving candidate gets a composite score from melting-temperature
//! and GC closeness to their target ranges, secondary-structure penalties
//! (monotone in ΔG severity), and a large ambiguity penalty. The best
//! allele-A, allele-B and common candidates are chosen independently, then
//! the triple must pass the amplicon-size and cross-dimer constraints; when
//! it does not, the next-best combination is tried in rank order up to a
//! bounded retry count before the SNP is marked `NoValidPrimerFound`.
//! Ties break by higher score, then shorter primer, then lexicographically
//! smaller sequence, so selection is fully deterministic.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use crate::candidate::{self, PrimerCandidate, PrimerRole, Strand};
use crate::config::DesignConfig;
use crate::error::{CandidateError, TargetError};
use crate::genome::Genome;
use crate::specificity::{self, SeedIndex, SpecificityReport};
use crate::target::SnpTarget;
use crate::thermo::{self, ThermoProfile};

/// Cooperative wall-clock budget for one SNP's processing. Checked at stage
/// boundaries, never mid-scan of a single candidate.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Instant,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Deadline { end: Instant::now() + budget }
    }

    /// A deadline that never fires (validation-only paths, tests).
    pub fn unbounded() -> Self {
        Deadline { end: Instant::now() + Duration::from_secs(60 * 60 * 24) }
    }

    pub fn exceeded(&self) -> bool {
        Instant::now() >= self.end
    }
}

/// A primer chosen for the final triple.
#[derive(Debug, Clone)]
pub struct DesignedPrimer {
    pub role: PrimerRole,
    pub strand: Strand,
    /// 0-based plus-strand coordinate of the leftmost covered genome base.
    pub start: usize,
    pub length: usize,
    /// Full synthesized sequence (tail included for allele roles).
    pub sequence: String,
    pub thermo: ThermoProfile,
    pub specificity: SpecificityReport,
    /// Candidate score (higher is better).
    pub score: f64,
}

/// Final design for one SNP.
#[derive(Debug, Clone)]
pub struct PrimerResult {
    pub target: SnpTarget,
    pub allele_a: DesignedPrimer,
    pub allele_b: DesignedPrimer,
    pub common: DesignedPrimer,
    /// Genomic span from the leftmost forward-primer base to the rightmost
    /// common-primer base (tails excluded).
    pub product_size: usize,
    /// Composite triple quality (higher is better).
    pub quality: f64,
}

/// Distance of `v` outside `[lo, hi]`; 0 inside.
fn range_distance(v: f64, lo: f64, hi: f64) -> f64 {
    if v < lo {
        lo - v
    } else if v > hi {
        v - hi
    } else {
        0.0
    }
}

/// Composite per-candidate score. Higher is better; 100 is a flawless
/// candidate.
fn composite_score(profile: &ThermoProfile, spec: &SpecificityReport, cfg: &DesignConfig) -> f64 {
    let mut s = 100.0;
    s -= cfg.weight_tm * range_distance(profile.tm, cfg.tm_min, cfg.tm_max);
    s -= cfg.weight_gc * range_distance(profile.gc, cfg.gc_min, cfg.gc_max);
    s -= cfg.weight_structure * (-profile.hairpin_dg).max(0.0);
    s -= cfg.weight_structure * 0.5 * (-profile.self_dimer_dg).max(0.0);
    // A very sticky 3' end promotes mispriming.
    s -= cfg.weight_structure * (-(profile.three_prime_dg) - 9.0).max(0.0);
    if spec.ambiguous {
        s -= cfg.weight_ambiguity * (spec.hits as f64 - 1.0).min(4.0);
    }
    s
}

struct Scored {
    cand: PrimerCandidate,
    profile: ThermoProfile,
    spec: SpecificityReport,
    score: f64,
}

/// Score one role's candidates: thermodynamics first, then the specificity
/// check on the thermodynamically best `max_checked_per_role`. Candidates
/// failing `ScoreError` or `LocusMismatchError` are dropped here.
fn rank_role(
    genome: &Genome,
    index: &SeedIndex,
    target: &SnpTarget,
    candidates: Vec<PrimerCandidate>,
    cfg: &DesignConfig,
) -> Vec<Scored> {
    // Preliminary thermodynamic ordering.
    let mut prelim: Vec<(PrimerCandidate, ThermoProfile, f64)> = Vec::new();
    for cand in candidates {
        match thermo::score(&cand.core, cfg) {
            Ok(profile) => {
                let clean = SpecificityReport { hits: 1, at_locus: true, ambiguous: false };
                let s = composite_score(&profile, &clean, cfg);
                prelim.push((cand, profile, s));
            }
            Err(e) => {
                log::debug!("target {}: dropping candidate: {e}", target.id());
            }
        }
    }
    prelim.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then(a.0.length.cmp(&b.0.length))
            .then(a.0.core.cmp(&b.0.core))
    });
    prelim.truncate(cfg.max_checked_per_role);

    let mut out = Vec::new();
    for (cand, profile, _) in prelim {
        let spec = specificity::check(genome, index, &cand, target, cfg.mismatch_budget);
        if !spec.at_locus {
            log::debug!(
                "target {}: {} candidate at {}: {}",
                target.id(),
                cand.role.as_str(),
                cand.start,
                CandidateError::LocusMismatch
            );
            continue;
        }
        let score = composite_score(&profile, &spec, cfg);
        out.push(Scored { cand, profile, spec, score });
    }
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.cand.length.cmp(&b.cand.length))
            .then(a.cand.core.cmp(&b.cand.core))
    });
    out
}

fn designed(s: &Scored) -> DesignedPrimer {
    DesignedPrimer {
        role: s.cand.role,
        strand: s.cand.strand,
        start: s.cand.start,
        length: s.cand.length,
        sequence: String::from_utf8_lossy(&s.cand.full).to_string(),
        thermo: s.profile,
        specificity: s.spec,
        score: s.score,
    }
}

/// Worst pairwise cross-dimer ΔG among the three primers of a triple.
fn worst_cross_dimer(a: &Scored, b: &Scored, c: &Scored, cfg: &DesignConfig) -> f64 {
    thermo::dimer_dg(&a.cand.core, &c.cand.core, cfg)
        .min(thermo::dimer_dg(&b.cand.core, &c.cand.core, cfg))
        .min(thermo::dimer_dg(&a.cand.core, &b.cand.core, cfg))
}

/// Score of a concrete triple: the candidate scores minus the allele
/// length-matching and cross-dimer penalties.
fn triple_score(a: &Scored, b: &Scored, c: &Scored, cfg: &DesignConfig) -> f64 {
    let len_gap = a.cand.length.abs_diff(b.cand.length) as f64;
    let cross = worst_cross_dimer(a, b, c, cfg);
    (a.score + b.score + c.score) / 3.0
        - cfg.weight_len_match * len_gap
        - cfg.weight_structure * 0.5 * (-cross).max(0.0)
}

// Best-first search over (ia, ib, ic) index triples, ordered by quantized
// score so the heap ordering is total and deterministic.
#[derive(PartialEq, Eq)]
struct ComboKey {
    q: i64,
    ia: usize,
    ib: usize,
    ic: usize,
}

impl Ord for ComboKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.q
            .cmp(&other.q)
            .then(other.ia.cmp(&self.ia))
            .then(other.ib.cmp(&self.ib))
            .then(other.ic.cmp(&self.ic))
    }
}

impl PartialOrd for ComboKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn quantize(score: f64) -> i64 {
    (score * 1e6).round() as i64
}

/// Design the primer triple for one validated SNP target.
pub fn design_target(
    genome: &Genome,
    index: &SeedIndex,
    target: &SnpTarget,
    cfg: &DesignConfig,
    deadline: &Deadline,
) -> Result<PrimerResult, TargetError> {
    let set = candidate::generate(genome, target, cfg);
    if deadline.exceeded() {
        return Err(TargetError::Timeout { attempts: 1 });
    }

    let a = rank_role(genome, index, target, set.allele_a, cfg);
    if deadline.exceeded() {
        return Err(TargetError::Timeout { attempts: 1 });
    }
    let b = rank_role(genome, index, target, set.allele_b, cfg);
    if deadline.exceeded() {
        return Err(TargetError::Timeout { attempts: 1 });
    }
    let c = rank_role(genome, index, target, set.common, cfg);

    if a.is_empty() || b.is_empty() || c.is_empty() {
        return Err(TargetError::NoValidPrimerFound { tried: 0 });
    }

    let mut heap = BinaryHeap::new();
    let mut seen: HashSet<(usize, usize, usize)> = HashSet::new();
    let push = |heap: &mut BinaryHeap<ComboKey>,
                seen: &mut HashSet<(usize, usize, usize)>,
                ia: usize,
                ib: usize,
                ic: usize| {
        if ia < a.len() && ib < b.len() && ic < c.len() && seen.insert((ia, ib, ic)) {
            let q = quantize(triple_score(&a[ia], &b[ib], &c[ic], cfg));
            heap.push(ComboKey { q, ia, ib, ic });
        }
    };
    push(&mut heap, &mut seen, 0, 0, 0);

    let mut tried = 0usize;
    while let Some(ComboKey { q, ia, ib, ic }) = heap.pop() {
        if tried >= cfg.max_combo_retries {
            break;
        }
        tried += 1;
        if deadline.exceeded() {
            return Err(TargetError::Timeout { attempts: 1 });
        }

        let (sa, sb, sc) = (&a[ia], &b[ib], &c[ic]);
        let left = sa.cand.start.min(sb.cand.start);
        let right = sc.cand.start + sc.cand.length;
        let product_size = right - left;
        let size_ok = product_size >= cfg.amplicon_min && product_size <= cfg.amplicon_max;
        let dimer_ok = worst_cross_dimer(sa, sb, sc, cfg) >= cfg.cross_dimer_dg_min;
        if size_ok && dimer_ok {
            let quality = q as f64 / 1e6;
            log::debug!(
                "target {}: selected triple after {} combination(s), product {} bp, quality {:.2}",
                target.id(),
                tried,
                product_size,
                quality
            );
            return Ok(PrimerResult {
                target: target.clone(),
                allele_a: designed(sa),
                allele_b: designed(sb),
                common: designed(sc),
                product_size,
                quality,
            });
        }

        push(&mut heap, &mut seen, ia + 1, ib, ic);
        push(&mut heap, &mut seen, ia, ib + 1, ic);
        push(&mut heap, &mut seen, ia, ib, ic + 1);
    }

    Err(TargetError::NoValidPrimerFound { tried })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcg_genome(len: usize, seed: u64) -> Genome {
        let mut state = seed;
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

    fn design_at(pos: u64) -> (Genome, SnpTarget, Result<PrimerResult, TargetError>) {
        let g = lcg_genome(4000, 0x9E3779B97F4A7C15);
        let cfg = DesignConfig::default();
        let idx = SeedIndex::build(&g, cfg.seed_len);
        let t = target_at(&g, pos);
        let r = design_target(&g, &idx, &t, &cfg, &Deadline::unbounded());
        (g, t, r)
    }

    #[test]
    fn designs_a_triple_in_a_random_genome() {
        let (_, t, r) = design_at(2000);
        let r = r.expect("design should succeed mid-chromosome");
        let cfg = DesignConfig::default();
        assert!(r.product_size >= cfg.amplicon_min && r.product_size <= cfg.amplicon_max);
        // Allele primers end on their respective alleles, tails prepended.
        assert!(r.allele_a.sequence.ends_with((t.ref_allele as char).to_string().as_str()));
        assert!(r.allele_b.sequence.ends_with((t.alt_allele as char).to_string().as_str()));
        assert!(r.allele_a.sequence.starts_with(&cfg.tail_a));
        assert!(r.allele_b.sequence.starts_with(&cfg.tail_b));
        assert_eq!(r.common.role, PrimerRole::Common);
        // Specificity invariant: every selected primer hits its locus.
        assert!(r.allele_a.specificity.at_locus);
        assert!(r.allele_b.specificity.at_locus);
        assert!(r.common.specificity.at_locus);
    }

    #[test]
    fn selection_is_deterministic() {
        let (g, t, r1) = design_at(2000);
        let cfg = DesignConfig::default();
        let idx = SeedIndex::build(&g, cfg.seed_len);
        let r2 = design_target(&g, &idx, &t, &cfg, &Deadline::unbounded()).unwrap();
        let r1 = r1.unwrap();
        assert_eq!(r1.allele_a.sequence, r2.allele_a.sequence);
        assert_eq!(r1.allele_b.sequence, r2.allele_b.sequence);
        assert_eq!(r1.common.sequence, r2.common.sequence);
        assert_eq!(r1.product_size, r2.product_size);
        assert_eq!(quantize(r1.quality), quantize(r2.quality));
    }

    #[test]
    fn chromosome_end_yields_no_valid_primer() {
        let (_, _, r) = design_at(10);
        assert!(matches!(r, Err(TargetError::NoValidPrimerFound { .. })));
    }

    #[test]
    fn expired_deadline_reports_timeout() {
        let g = lcg_genome(4000, 3);
        let cfg = DesignConfig::default();
        let idx = SeedIndex::build(&g, cfg.seed_len);
        let t = target_at(&g, 2000);
        let dl = Deadline::new(Duration::from_secs(0));
        assert!(matches!(
            design_target(&g, &idx, &t, &cfg, &dl),
            Err(TargetError::Timeout { .. })
        ));
    }

    #[test]
    fn impossible_amplicon_range_exhausts_retries() {
        let g = lcg_genome(4000, 5);
        let mut cfg = DesignConfig::default();
        cfg.amplicon_min = 1;
        cfg.amplicon_max = 2; // unreachable: primers alone exceed this
        let idx = SeedIndex::build(&g, cfg.seed_len);
        let t = target_at(&g, 2000);
        match design_target(&g, &idx, &t, &cfg, &Deadline::unbounded()) {
            Err(TargetError::NoValidPrimerFound { tried }) => {
                assert!(tried <= cfg.max_combo_retries);
                assert!(tried > 0);
            }
            other => panic!("expected NoValidPrimerFound, got {other:?}"),
        }
    }

    #[test]
    fn cross_dimer_floor_rejects_incompatible_triples() {
        let g = lcg_genome(4000, 0x9E3779B97F4A7C15);
        let mut cfg = DesignConfig::default();
        // Cross-dimer ΔG never exceeds zero, so a positive floor rejects
        // every combination the search proposes.
        cfg.cross_dimer_dg_min = 0.5;
        let idx = SeedIndex::build(&g, cfg.seed_len);
        let t = target_at(&g, 2000);
        match design_target(&g, &idx, &t, &cfg, &Deadline::unbounded()) {
            Err(TargetError::NoValidPrimerFound { tried }) => {
                assert_eq!(tried, cfg.max_combo_retries);
            }
            other => panic!("expected NoValidPrimerFound, got {other:?}"),
        }
        // The stock floor keeps the same target designable.
        let r = design_target(&g, &idx, &t, &DesignConfig::default(), &Deadline::unbounded());
        assert!(r.is_ok());
    }

    #[test]
    fn range_distance_is_zero_inside_the_band() {
        assert_eq!(range_distance(60.0, 55.0, 65.0), 0.0);
        assert_eq!(range_distance(50.0, 55.0, 65.0), 5.0);
        assert_eq!(range_distance(70.0, 55.0, 65.0), 5.0);
    }
}
