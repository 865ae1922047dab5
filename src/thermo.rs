//! Thermodynamic scoring of primer candidates.
//!
//! Melting temperature comes from the nearest-neighbor dinucleotide table in
//! the config (ΔH/ΔS per step plus initiation), with an entropic salt
//! correction and the primer-concentration term. Hairpin and dimer risks are
//! estimated from complementary-run scans; the 3'-end stability is the NN ΔG
//! of the terminal base pairs. Every metric returns a finite value — a
//! candidate that cannot be scored fails with a [`CandidateError::Score`]
//! and is dropped upstream, never propagated as a crash.

use crate::config::DesignConfig;
use crate::error::CandidateError;

/// Gas constant, cal/(mol·K).
const GAS_R: f64 = 1.98722;
/// Reference temperature for ΔG, 37°C in Kelvin.
const T37: f64 = 310.15;
/// Bases of the 3' terminus considered for end stability.
const THREE_PRIME_WINDOW: usize = 5;

/// Immutable per-candidate metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermoProfile {
    /// Melting temperature, °C.
    pub tm: f64,
    /// GC fraction in [0, 1].
    pub gc: f64,
    /// Worst hairpin ΔG estimate (kcal/mol, ≤ 0; 0 means no stem found).
    pub hairpin_dg: f64,
    /// Worst self-dimer ΔG estimate (kcal/mol, ≤ 0).
    pub self_dimer_dg: f64,
    /// NN ΔG of the terminal 3' base pairs (kcal/mol).
    pub three_prime_dg: f64,
}

#[inline]
fn base_index(b: u8) -> Option<usize> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

#[inline]
fn complement(b: u8) -> u8 {
    match b {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}

fn ensure_scoreable(seq: &[u8]) -> Result<(), CandidateError> {
    if seq.len() < 2 {
        return Err(CandidateError::Score(format!("sequence too short ({} nt)", seq.len())));
    }
    if let Some(&bad) = seq.iter().find(|&&b| base_index(b).is_none()) {
        return Err(CandidateError::Score(format!("ambiguous base '{}'", bad as char)));
    }
    Ok(())
}

/// GC fraction of a sequence (0.0 for empty input).
///
/// # Examples
/// ```
/// assert!((kasprimer::thermo::gc_fraction(b"ACGT") - 0.5).abs() < 1e-12);
/// ```
pub fn gc_fraction(seq: &[u8]) -> f64 {
    if seq.is_empty() {
        return 0.0;
    }
    let gc = seq.iter().filter(|&&b| b == b'G' || b == b'C').count();
    gc as f64 / seq.len() as f64
}

/// Nearest-neighbor melting temperature (°C) with salt and concentration
/// corrections. Parameters come from the config, not from constants.
pub fn melting_temp(seq: &[u8], cfg: &DesignConfig) -> Result<f64, CandidateError> {
    ensure_scoreable(seq)?;
    let nn = &cfg.nn;
    let mut dh = nn.init_dh; // kcal/mol
    let mut ds = nn.init_ds; // cal/(mol·K)
    for w in seq.windows(2) {
        let i = base_index(w[0]).expect("checked above");
        let j = base_index(w[1]).expect("checked above");
        dh += nn.dh[i][j];
        ds += nn.ds[i][j];
    }
    // Entropic salt correction (monovalent), then the concentration term.
    let salt_molar = cfg.salt_mm * 1e-3;
    ds += 0.368 * (seq.len() as f64 - 1.0) * salt_molar.ln();
    let conc = cfg.primer_nm * 1e-9;
    let denom = ds + GAS_R * (conc / 4.0).ln();
    if denom.abs() < 1e-9 {
        return Err(CandidateError::Score("degenerate thermodynamic sum".to_string()));
    }
    let tm_k = dh * 1000.0 / denom;
    let tm_c = tm_k - 273.15;
    if !tm_c.is_finite() {
        return Err(CandidateError::Score("non-finite melting temperature".to_string()));
    }
    Ok(tm_c)
}

/// ΔG contribution of one paired stem/overlap run, by composition. G·C pairs
/// stack harder than A·T.
fn run_dg(pairs: &[(u8, u8)]) -> f64 {
    let mut dg = 0.0;
    for &(a, _) in pairs {
        dg += if a == b'G' || a == b'C' { -2.2 } else { -1.0 };
    }
    dg
}

/// Worst hairpin ΔG over all inverted repeats with at least
/// `min_hairpin_stem` paired bases and a loop of at least `min_hairpin_loop`.
/// Returns 0.0 when no qualifying stem exists.
pub fn hairpin_dg(seq: &[u8], cfg: &DesignConfig) -> f64 {
    let n = seq.len();
    let min_stem = cfg.min_hairpin_stem;
    let min_loop = cfg.min_hairpin_loop;
    let mut worst = 0.0f64;
    if n < 2 * min_stem + min_loop {
        return worst;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            // Grow a stem pairing seq[i+t] against seq[j-t].
            let mut pairs = Vec::new();
            let mut t = 0;
            while i + t < j - t && complement(seq[i + t]) == seq[j - t] {
                // The unpaired loop between the arms must stay >= min_loop.
                if (j - t) - (i + t) - 1 < min_loop {
                    break;
                }
                pairs.push((seq[i + t], seq[j - t]));
                t += 1;
            }
            if pairs.len() >= min_stem {
                let dg = run_dg(&pairs) + 2.5; // loop closure penalty
                worst = worst.min(dg);
            }
        }
    }
    worst
}

/// Worst dimer ΔG between two primers (pass the same sequence twice for the
/// self-dimer). Scans every antiparallel alignment for its longest
/// contiguous complementary run; runs anchored on either primer's 3' end are
/// weighted harder since they are extensible by the polymerase.
pub fn dimer_dg(a: &[u8], b: &[u8], cfg: &DesignConfig) -> f64 {
    let min_run = cfg.min_hairpin_stem;
    let bl = b.len();
    let al = a.len();
    if al == 0 || bl == 0 {
        return 0.0;
    }
    // b reversed: index 0 is b's 3' end, so a[i] (5'→3') pairs antiparallel
    // with brev[i - shift].
    let brev: Vec<u8> = b.iter().rev().copied().collect();
    let mut worst = 0.0f64;
    for shift in -(bl as isize - 1)..=(al as isize - 1) {
        let mut run: Vec<(u8, u8)> = Vec::new();
        let mut run_start_i = 0usize;
        let mut flush = |run: &mut Vec<(u8, u8)>, start_i: usize, worst: &mut f64| {
            if run.len() >= min_run {
                let end_i = start_i + run.len() - 1;
                let j_start = start_i as isize - shift;
                let anchored_3p = end_i == al - 1 || j_start == 0;
                let mut dg = run_dg(run);
                if anchored_3p {
                    dg *= 1.3;
                }
                *worst = worst.min(dg);
            }
            run.clear();
        };
        for i in 0..al {
            let j = i as isize - shift;
            if j < 0 || j >= bl as isize {
                flush(&mut run, run_start_i, &mut worst);
                continue;
            }
            if complement(a[i]) == brev[j as usize] {
                if run.is_empty() {
                    run_start_i = i;
                }
                run.push((a[i], brev[j as usize]));
            } else {
                flush(&mut run, run_start_i, &mut worst);
            }
        }
        flush(&mut run, run_start_i, &mut worst);
    }
    worst
}

/// NN ΔG (kcal/mol at 37°C) of the 3'-terminal bases. More negative means a
/// stickier 3' end.
pub fn three_prime_dg(seq: &[u8], cfg: &DesignConfig) -> Result<f64, CandidateError> {
    ensure_scoreable(seq)?;
    let tail_len = THREE_PRIME_WINDOW.min(seq.len());
    let tail = &seq[seq.len() - tail_len..];
    let nn = &cfg.nn;
    let mut dg = 0.0;
    for w in tail.windows(2) {
        let i = base_index(w[0]).expect("checked above");
        let j = base_index(w[1]).expect("checked above");
        dg += nn.dh[i][j] - T37 * nn.ds[i][j] / 1000.0;
    }
    Ok(dg)
}

/// Score one candidate core sequence. Fails with `ScoreError` on degenerate
/// input; otherwise every field is finite.
pub fn score(core: &[u8], cfg: &DesignConfig) -> Result<ThermoProfile, CandidateError> {
    let tm = melting_temp(core, cfg)?;
    let gc = gc_fraction(core);
    let hairpin = hairpin_dg(core, cfg);
    let self_dimer = dimer_dg(core, core, cfg);
    let three_prime = three_prime_dg(core, cfg)?;
    Ok(ThermoProfile {
        tm,
        gc,
        hairpin_dg: hairpin,
        self_dimer_dg: self_dimer,
        three_prime_dg: three_prime,
    })
}
