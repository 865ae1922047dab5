//! Report generation over finished job outcomes.
//!
//! Two tab-separated artifacts are produced per job: a one-line-per-SNP
//! summary and a one-line-per-primer detail table, plus a JSON results
//! payload for programmatic consumers. All three are pure functions of the
//! outcome slots, so re-rendering a finished job always yields identical
//! bytes.

use crate::candidate::Strand;
use crate::job::TargetOutcome;
use crate::select::DesignedPrimer;
use crate::target::SnpTarget;

/// File name of the per-SNP summary table.
pub const SUMMARY_FILE: &str = "all_KASP_primers_summary.txt";
/// File name of the per-primer detail table.
pub const DETAIL_FILE: &str = "all_KASP_primers.txt";

fn strand_glyph(s: Strand) -> &'static str {
    match s {
        Strand::Plus => "+",
        Strand::Minus => "-",
    }
}

/// Render the summary table: one row per submitted SNP, in submission order.
/// Failed targets carry their error code in the `Status` column and dashes
/// in the sequence columns; undispatched slots (cancelled jobs) report
/// `NotProcessed`.
pub fn summary(targets: &[SnpTarget], outcomes: &[Option<TargetOutcome>]) -> anyhow::Result<String> {
    let mut w = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    w.write_record([
        "SNP_ID",
        "Chrom",
        "Pos",
        "Status",
        "Allele_FAM_Primer",
        "Allele_HEX_Primer",
        "Common_Primer",
        "Product_Size",
        "Quality",
    ])?;
    for (t, outcome) in targets.iter().zip(outcomes) {
        match outcome {
            Some(TargetOutcome::Designed(r)) => {
                w.write_record([
                    t.id(),
                    t.chrom.clone(),
                    t.pos.to_string(),
                    "OK".to_string(),
                    r.allele_a.sequence.clone(),
                    r.allele_b.sequence.clone(),
                    r.common.sequence.clone(),
                    r.product_size.to_string(),
                    format!("{:.2}", r.quality),
                ])?;
            }
            Some(TargetOutcome::Failed(e)) => {
                w.write_record([
                    t.id(),
                    t.chrom.clone(),
                    t.pos.to_string(),
                    e.code().to_string(),
                    "-".into(),
                    "-".into(),
                    "-".into(),
                    "-".into(),
                    "-".into(),
                ])?;
            }
            None => {
                w.write_record([
                    t.id(),
                    t.chrom.clone(),
                    t.pos.to_string(),
                    "NotProcessed".to_string(),
                    "-".into(),
                    "-".into(),
                    "-".into(),
                    "-".into(),
                    "-".into(),
                ])?;
            }
        }
    }
    let bytes = w
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing summary table: {e}"))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

fn primer_row(
    w: &mut csv::Writer<Vec<u8>>,
    snp_id: &str,
    p: &DesignedPrimer,
) -> anyhow::Result<()> {
    w.write_record([
        snp_id.to_string(),
        p.role.as_str().to_string(),
        strand_glyph(p.strand).to_string(),
        (p.start + 1).to_string(),
        p.length.to_string(),
        p.sequence.clone(),
        format!("{:.2}", p.thermo.tm),
        format!("{:.1}", p.thermo.gc * 100.0),
        format!("{:.2}", p.thermo.hairpin_dg),
        format!("{:.2}", p.thermo.self_dimer_dg),
        format!("{:.2}", p.thermo.three_prime_dg),
        p.specificity.hits.to_string(),
        if p.specificity.ambiguous { "yes" } else { "no" }.to_string(),
    ])?;
    Ok(())
}

/// Render the per-primer detail table. Positions are reported 1-based; only
/// successfully designed targets contribute rows (failures live in the
/// summary).
pub fn detail(targets: &[SnpTarget], outcomes: &[Option<TargetOutcome>]) -> anyhow::Result<String> {
    let mut w = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    w.write_record([
        "SNP_ID",
        "Primer",
        "Strand",
        "Start",
        "Length",
        "Sequence",
        "Tm",
        "GC_pct",
        "Hairpin_dG",
        "Self_Dimer_dG",
        "End_Stability_dG",
        "Genome_Hits",
        "Ambiguous",
    ])?;
    for (t, outcome) in targets.iter().zip(outcomes) {
        if let Some(TargetOutcome::Designed(r)) = outcome {
            let id = t.id();
            primer_row(&mut w, &id, &r.allele_a)?;
            primer_row(&mut w, &id, &r.allele_b)?;
            primer_row(&mut w, &id, &r.common)?;
        }
    }
    let bytes = w
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing detail table: {e}"))?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

fn primer_json(p: &DesignedPrimer) -> serde_json::Value {
    serde_json::json!({
        "role": p.role.as_str(),
        "strand": strand_glyph(p.strand),
        "start": p.start + 1,
        "length": p.length,
        "sequence": p.sequence,
        "tm": p.thermo.tm,
        "gc": p.thermo.gc,
        "hairpin_dg": p.thermo.hairpin_dg,
        "self_dimer_dg": p.thermo.self_dimer_dg,
        "end_stability_dg": p.thermo.three_prime_dg,
        "genome_hits": p.specificity.hits,
        "ambiguous": p.specificity.ambiguous,
    })
}

/// Build the JSON results payload: one object per submitted SNP, in
/// submission order.
pub fn results(targets: &[SnpTarget], outcomes: &[Option<TargetOutcome>]) -> serde_json::Value {
    let items: Vec<serde_json::Value> = targets
        .iter()
        .zip(outcomes)
        .map(|(t, outcome)| match outcome {
            Some(TargetOutcome::Designed(r)) => serde_json::json!({
                "id": t.id(),
                "chrom": t.chrom,
                "pos": t.pos,
                "status": "ok",
                "primers": {
                    "allele_a": primer_json(&r.allele_a),
                    "allele_b": primer_json(&r.allele_b),
                    "common": primer_json(&r.common),
                },
                "product_size": r.product_size,
                "quality": r.quality,
            }),
            Some(TargetOutcome::Failed(e)) => serde_json::json!({
                "id": t.id(),
                "chrom": t.chrom,
                "pos": t.pos,
                "status": e.code(),
                "error": e.to_string(),
            }),
            None => serde_json::json!({
                "id": t.id(),
                "chrom": t.chrom,
                "pos": t.pos,
                "status": "NotProcessed",
            }),
        })
        .collect();
    serde_json::Value::Array(items)
}
