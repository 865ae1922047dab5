//! Design configuration.
//!
//! Everything tunable lives here and deserializes from a JSON file so that
//! product-specific constants (nearest-neighbor table, KASP tails, mismatch
//! budget) are injected rather than hard-coded. [`DesignConfig::default`]
//! carries the stock parameters.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Standard KASP discriminating tails (FAM and HEX/VIC compatible).
pub const FAM_TAIL: &str = "GAAGGTGACCAAGTTCATGCT";
pub const HEX_TAIL: &str = "GAAGGTCGGAGTCAACGGATT";

/// Nearest-neighbor thermodynamic parameters over dinucleotide steps.
///
/// `dh` is ΔH in kcal/mol, `ds` is ΔS in cal/(mol·K), both indexed by
/// `[first base][second base]` in A, C, G, T order. The default is the
/// SantaLucia unified parameter set; alternative tables can be supplied via
/// the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestNeighborTable {
    pub dh: [[f64; 4]; 4],
    pub ds: [[f64; 4]; 4],
    /// Duplex initiation terms.
    pub init_dh: f64,
    pub init_ds: f64,
}

impl Default for NearestNeighborTable {
    fn default() -> Self {
        // SantaLucia (1998) unified NN parameters, 1M NaCl reference.
        NearestNeighborTable {
            dh: [
                // AA     AC     AG     AT
                [-7.9, -8.4, -7.8, -7.2],
                // CA     CC     CG     CT
                [-8.5, -8.0, -10.6, -7.8],
                // GA     GC     GG     GT
                [-8.2, -9.8, -8.0, -8.4],
                // TA     TC     TG     TT
                [-7.2, -8.2, -8.5, -7.9],
            ],
            ds: [
                [-22.2, -22.4, -21.0, -20.4],
                [-22.7, -19.9, -27.2, -21.0],
                [-22.2, -24.4, -19.9, -22.4],
                [-21.3, -22.2, -22.7, -22.2],
            ],
            init_dh: 0.2,
            init_ds: -5.7,
        }
    }
}

/// Full engine configuration. All fields have defaults, so a config file may
/// override any subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    /// Primer length window (inclusive), applied to every role.
    pub primer_len_min: usize,
    pub primer_len_max: usize,

    /// Distance window, in bases downstream of the SNP, where the common
    /// reverse primer's 3' end may bind (inclusive).
    pub common_offset_min: usize,
    pub common_offset_max: usize,

    /// Acceptable amplicon size range (inclusive).
    pub amplicon_min: usize,
    pub amplicon_max: usize,

    /// Melting temperature target range and optimum (°C).
    pub tm_min: f64,
    pub tm_max: f64,
    pub tm_opt: f64,

    /// GC fraction target range.
    pub gc_min: f64,
    pub gc_max: f64,

    /// KASP discriminating tails prepended to the allele-specific primers.
    pub tail_a: String,
    pub tail_b: String,

    /// Specificity search: allowed mismatches and seed length for the
    /// genome-wide k-mer index.
    pub mismatch_budget: usize,
    pub seed_len: usize,

    /// Hairpin detection thresholds.
    pub min_hairpin_stem: usize,
    pub min_hairpin_loop: usize,

    /// Monovalent salt (mM) and primer concentration (nM) for the Tm
    /// correction terms.
    pub salt_mm: f64,
    pub primer_nm: f64,

    /// Scoring weights. Larger means the metric dominates ranking harder.
    pub weight_tm: f64,
    pub weight_gc: f64,
    pub weight_structure: f64,
    pub weight_ambiguity: f64,
    pub weight_len_match: f64,

    /// How many thermodynamically best candidates per role are carried into
    /// the (more expensive) specificity check.
    pub max_checked_per_role: usize,

    /// Worst acceptable cross-dimer ΔG (kcal/mol) within a triple.
    /// Combinations below this floor are rejected outright; milder dimers
    /// only lose ranking points.
    pub cross_dimer_dg_min: f64,

    /// Bounded retry count for the next-best triple search when a combination
    /// fails the amplicon-size or cross-dimer constraint.
    pub max_combo_retries: usize,

    /// Per-SNP wall-clock budget (seconds) and bounded retry count applied
    /// only to timeouts.
    pub snp_timeout_secs: u64,
    pub timeout_retries: u32,

    /// Maximum SNP count accepted per job submission.
    pub max_snp_count: usize,

    /// Nearest-neighbor thermodynamic table.
    pub nn: NearestNeighborTable,
}

impl Default for DesignConfig {
    fn default() -> Self {
        DesignConfig {
            primer_len_min: 18,
            primer_len_max: 25,
            common_offset_min: 1,
            common_offset_max: 150,
            amplicon_min: 50,
            amplicon_max: 180,
            tm_min: 55.0,
            tm_max: 65.0,
            tm_opt: 60.0,
            gc_min: 0.30,
            gc_max: 0.70,
            tail_a: FAM_TAIL.to_string(),
            tail_b: HEX_TAIL.to_string(),
            mismatch_budget: 1,
            seed_len: 8,
            min_hairpin_stem: 4,
            min_hairpin_loop: 3,
            salt_mm: 50.0,
            primer_nm: 200.0,
            weight_tm: 2.0,
            weight_gc: 20.0,
            weight_structure: 1.0,
            weight_ambiguity: 25.0,
            weight_len_match: 0.5,
            max_checked_per_role: 40,
            cross_dimer_dg_min: -20.0,
            max_combo_retries: 10,
            snp_timeout_secs: 30,
            timeout_retries: 1,
            max_snp_count: 50,
            nn: NearestNeighborTable::default(),
        }
    }
}

impl DesignConfig {
    /// Load a config from a JSON file; unset fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let cfg: DesignConfig = serde_json::from_str(&text)?;
        cfg.validated()
    }

    /// Reject configurations the generator cannot honor.
    pub fn validated(self) -> anyhow::Result<Self> {
        anyhow::ensure!(
            self.primer_len_min >= 2 && self.primer_len_min <= self.primer_len_max,
            "primer length window {}..{} is empty or degenerate",
            self.primer_len_min,
            self.primer_len_max
        );
        anyhow::ensure!(
            self.common_offset_min >= 1 && self.common_offset_min <= self.common_offset_max,
            "common primer offset window {}..{} is empty",
            self.common_offset_min,
            self.common_offset_max
        );
        anyhow::ensure!(
            self.amplicon_min <= self.amplicon_max,
            "amplicon range {}..{} is empty",
            self.amplicon_min,
            self.amplicon_max
        );
        anyhow::ensure!(self.seed_len >= 4 && self.seed_len <= 31, "seed_len out of range");
        anyhow::ensure!(self.primer_nm > 0.0 && self.salt_mm > 0.0, "concentrations must be positive");
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DesignConfig::default().validated().unwrap();
    }

    #[test]
    fn nn_table_is_symmetric_under_reverse_complement() {
        // ΔH(XY) must equal ΔH(revcomp(XY)): e.g. CA == TG.
        let nn = NearestNeighborTable::default();
        let idx = |b: u8| match b {
            b'A' => 0usize,
            b'C' => 1,
            b'G' => 2,
            _ => 3,
        };
        let comp = |b: u8| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            _ => b'A',
        };
        for &x in b"ACGT" {
            for &y in b"ACGT" {
                let fwd = nn.dh[idx(x)][idx(y)];
                let rc = nn.dh[idx(comp(y))][idx(comp(x))];
                assert!((fwd - rc).abs() < 1e-9, "step {}{} asymmetric", x as char, y as char);
            }
        }
    }

    #[test]
    fn partial_config_file_overrides_subset() {
        let cfg: DesignConfig = serde_json::from_str(r#"{"mismatch_budget": 2}"#).unwrap();
        assert_eq!(cfg.mismatch_budget, 2);
        assert_eq!(cfg.primer_len_min, DesignConfig::default().primer_len_min);
    }
}
