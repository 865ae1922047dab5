//! Error taxonomy for the design engine.
//!
//! Two severity levels exist and they never mix:
//! - **job-fatal**: [`LoadError`] and [`EngineError`] abort a whole job
//!   (genome unreadable, infrastructure failure).
//! - **per-target**: [`TargetError`] is recorded in that target's result slot;
//!   the job carries on with the remaining SNPs.
//!
//! Candidate-level failures ([`CandidateError`]) stay inside one SNP's
//! processing: an unscorable or off-locus candidate is dropped, and if nothing
//! survives the target ends as `NoValidPrimerFound`.

use thiserror::Error;

/// Genome file could not be loaded. Always job-fatal.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Unreadable or malformed sequence file; `reason` carries the parser's
    /// message, IO failures included.
    #[error("cannot load sequence file {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("duplicate chromosome name '{name}' in {path}")]
    DuplicateChromosome { name: String, path: String },

    #[error("genome '{id}' contains no sequences")]
    Empty { id: String },

    #[error("genome '{id}' is not registered")]
    UnknownGenome { id: String },
}

/// A subsequence request fell outside a chromosome (or the chromosome does
/// not exist, in which case `len` is 0).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("range {start}..{end} out of bounds for '{chrom}' (len {len})")]
pub struct RangeError {
    pub chrom: String,
    pub start: usize,
    pub end: usize,
    pub len: usize,
}

/// Per-target outcome errors. None of these abort the job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Submitted reference allele disagrees with the genome base. An `N` in
    /// the genome is always a mismatch.
    #[error("reference allele mismatch: submitted {submitted}, genome has {genome}")]
    RefMismatch { submitted: char, genome: char },

    /// Second submission of the same (chromosome, position); collapsed into
    /// the first occurrence.
    #[error("duplicate of earlier target at {chrom}:{pos}")]
    Duplicate { chrom: String, pos: u64 },

    /// No primer triple survived scoring, specificity checking and the
    /// amplicon-size constraint.
    #[error("no valid primer combination found ({tried} combinations tried)")]
    NoValidPrimerFound { tried: usize },

    /// Per-SNP wall-clock budget exceeded, after the bounded retry loop.
    #[error("design timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
}

impl TargetError {
    /// Stable short code used in reports and JSON payloads.
    pub fn code(&self) -> &'static str {
        match self {
            TargetError::Range(_) => "RangeError",
            TargetError::RefMismatch { .. } => "RefMismatch",
            TargetError::Duplicate { .. } => "Duplicate",
            TargetError::NoValidPrimerFound { .. } => "NoValidPrimerFound",
            TargetError::Timeout { .. } => "TimeoutError",
        }
    }
}

/// Candidate-level failures, resolved within one SNP's processing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CandidateError {
    /// Candidate cannot be scored (degenerate length, ambiguous base in the
    /// window). The candidate is dropped, never propagated as a crash.
    #[error("candidate cannot be scored: {0}")]
    Score(String),

    /// The genome-wide search found no match at the candidate's intended
    /// locus within the mismatch budget. The candidate is invalid.
    #[error("no match at the intended locus")]
    LocusMismatch,
}

/// Engine-level failures that transition a running job to `Failed`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("infrastructure failure: {0}")]
    Infra(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_error_codes_are_stable() {
        let e = TargetError::RefMismatch { submitted: 'T', genome: 'G' };
        assert_eq!(e.code(), "RefMismatch");
        let e = TargetError::Timeout { attempts: 2 };
        assert_eq!(e.code(), "TimeoutError");
        let e = TargetError::Range(RangeError {
            chrom: "chr1".into(),
            start: 10,
            end: 20,
            len: 5,
        });
        assert_eq!(e.code(), "RangeError");
    }

    #[test]
    fn range_error_message_names_chromosome() {
        let e = RangeError { chrom: "chr7A".into(), start: 0, end: 9, len: 4 };
        assert!(e.to_string().contains("chr7A"));
    }
}
