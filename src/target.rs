//! SNP target parsing and validation.
//!
//! Input is the tab-separated `Chr\tPos\tRef\tAlt` format; blank lines and a
//! leading header line are tolerated and skipped. A three-field form with the
//! alleles combined (`chr7A\t7659\tT/C` or `T>C`) is also accepted, and an
//! optional fifth field supplies a label.
//!
//! Validation never aborts a batch: every defective target surfaces as a
//! per-target [`TargetError`] while the rest proceed.

use crate::error::{RangeError, TargetError};
use crate::genome::Genome;

/// One submitted SNP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnpTarget {
    pub chrom: String,
    /// 1-based position.
    pub pos: u64,
    pub ref_allele: u8,
    pub alt_allele: u8,
    pub label: Option<String>,
}

impl SnpTarget {
    /// Stable identifier used in reports: the label if given, otherwise
    /// `chrom:pos`.
    pub fn id(&self) -> String {
        match &self.label {
            Some(l) => l.clone(),
            None => format!("{}:{}", self.chrom, self.pos),
        }
    }
}

fn parse_allele(field: &str, line_no: usize, what: &str) -> anyhow::Result<u8> {
    let s = field.trim().to_ascii_uppercase();
    let b = s.as_bytes();
    anyhow::ensure!(
        b.len() == 1 && matches!(b[0], b'A' | b'C' | b'G' | b'T'),
        "line {line_no}: {what} allele '{field}' is not a single A/C/G/T base"
    );
    Ok(b[0])
}

/// Parse a SNP list from text. Fails on malformed lines (with the line
/// number) and when more than `max_count` targets are submitted.
pub fn parse_targets(text: &str, max_count: usize) -> anyhow::Result<Vec<SnpTarget>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut out = Vec::new();
    let mut first_record = true;
    for (i, rec) in rdr.records().enumerate() {
        let line_no = i + 1;
        let rec = rec.map_err(|e| anyhow::anyhow!("line {line_no}: {e}"))?;
        let fields: Vec<&str> = rec.iter().map(str::trim).collect();
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }
        if first_record {
            first_record = false;
            // A header line ("Chr Pos Ref Alt", possibly truncated) is
            // tolerated once, before any arity checks apply.
            let looks_like_header = fields.get(1).map_or(true, |f| f.parse::<u64>().is_err());
            if looks_like_header {
                continue;
            }
        }
        anyhow::ensure!(
            fields.len() >= 3,
            "line {line_no}: expected at least 3 tab-separated fields, got {}",
            fields.len()
        );

        let pos = fields[1]
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("line {line_no}: position '{}' is not a number", fields[1]))?;
        anyhow::ensure!(pos >= 1, "line {line_no}: position must be 1-based");

        let (ref_field, alt_field, label_idx) = if fields.len() >= 4 {
            (fields[2].to_string(), fields[3].to_string(), 4)
        } else {
            // Combined allele field, e.g. "T/C" or "T>C".
            let combined = fields[2];
            let parts: Vec<&str> = combined.split(['/', '>']).collect();
            anyhow::ensure!(
                parts.len() == 2,
                "line {line_no}: cannot split alleles from '{combined}' (expected Ref/Alt)"
            );
            (parts[0].to_string(), parts[1].to_string(), usize::MAX)
        };

        let ref_allele = parse_allele(&ref_field, line_no, "reference")?;
        let alt_allele = parse_allele(&alt_field, line_no, "alternate")?;
        anyhow::ensure!(
            ref_allele != alt_allele,
            "line {line_no}: reference and alternate alleles are identical"
        );

        let label = fields
            .get(label_idx)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        out.push(SnpTarget {
            chrom: fields[0].to_string(),
            pos,
            ref_allele,
            alt_allele,
            label,
        });
    }

    anyhow::ensure!(
        out.len() <= max_count,
        "too many SNPs: {} submitted, at most {max_count} per job",
        out.len()
    );
    Ok(out)
}

/// Validation outcome: valid targets in submission order, plus one typed
/// error per rejected target.
pub struct Validation {
    pub valid: Vec<SnpTarget>,
    pub errors: Vec<(SnpTarget, TargetError)>,
}

/// Validate targets in place, one verdict per submission slot (`None` means
/// the target is good). Used by the orchestrator, which keeps results
/// aligned with submission order.
pub fn validate_indexed(genome: &Genome, targets: &[SnpTarget]) -> Vec<Option<TargetError>> {
    let mut verdicts = Vec::with_capacity(targets.len());
    let mut seen = std::collections::HashSet::new();

    for t in targets {
        if !seen.insert((t.chrom.clone(), t.pos)) {
            log::warn!("target {} duplicates an earlier submission", t.id());
            verdicts.push(Some(TargetError::Duplicate { chrom: t.chrom.clone(), pos: t.pos }));
            continue;
        }
        let len = genome.chrom_len(&t.chrom).unwrap_or(0);
        let in_bounds = t.pos >= 1 && t.pos as usize <= len;
        if !in_bounds {
            verdicts.push(Some(TargetError::Range(RangeError {
                chrom: t.chrom.clone(),
                start: t.pos as usize,
                end: t.pos as usize,
                len,
            })));
            continue;
        }
        let base = genome.base_at(&t.chrom, t.pos).expect("bounds checked");
        if base == t.ref_allele {
            verdicts.push(None);
        } else {
            verdicts.push(Some(TargetError::RefMismatch {
                submitted: t.ref_allele as char,
                genome: base as char,
            }));
        }
    }
    verdicts
}

/// Check every target against the genome.
///
/// - position must fall within the chromosome (unknown chromosomes report a
///   zero-length range);
/// - the reference allele must equal the genome base, case-insensitively,
///   with `N` always a mismatch;
/// - repeated (chromosome, position) pairs collapse into the first occurrence
///   and the duplicates are reported, not fatal.
pub fn validate(genome: &Genome, targets: Vec<SnpTarget>) -> Validation {
    let verdicts = validate_indexed(genome, &targets);
    let mut valid = Vec::new();
    let mut errors = Vec::new();
    for (t, v) in targets.into_iter().zip(verdicts) {
        match v {
            None => valid.push(t),
            Some(e) => errors.push((t, e)),
        }
    }
    Validation { valid, errors }
}
