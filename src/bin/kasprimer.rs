use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use kasprimer::genome::{Genome, GenomeRegistry};
use kasprimer::job::{Engine, JobState};
use kasprimer::target;
use kasprimer::{report, DesignConfig};

/// KASP primer design CLI
#[derive(Parser)]
#[command(name = "kasprimer")]
#[command(version)]
#[command(about = "KASP genotyping assay primer design", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Design KASP primer triples for a SNP list
    Design {
        /// SNP list file (tab-separated: Chr Pos Ref Alt [Label])
        snps: PathBuf,
        /// Genome: a registered id, or a FASTA path (.fa/.fasta, optionally gzipped)
        genome: String,
        /// Output directory for the report files
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Genome registry (JSON array of {id, name, path})
        #[arg(long)]
        registry: Option<PathBuf>,
        /// Design configuration overrides (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Threads (default: all)
        #[arg(long)]
        threads: Option<usize>,
        /// Emit the JSON results payload to a file
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Validate a SNP list against a genome without designing primers
    Validate {
        /// SNP list file
        snps: PathBuf,
        /// Genome: a registered id, or a FASTA path
        genome: String,
        /// Genome registry (JSON array of {id, name, path})
        #[arg(long)]
        registry: Option<PathBuf>,
    },

    /// List the genomes available in a registry
    ListGenomes {
        /// Genome registry (JSON array of {id, name, path})
        #[arg(long)]
        registry: PathBuf,
    },
}

fn load_registry(path: Option<&Path>) -> anyhow::Result<GenomeRegistry> {
    match path {
        Some(p) => GenomeRegistry::from_file(p)
            .with_context(|| format!("reading genome registry {}", p.display())),
        None => Ok(GenomeRegistry::new(vec![])),
    }
}

/// A genome argument naming an existing file is loaded directly; anything
/// else is treated as a registry id.
fn resolve_genome(registry: &GenomeRegistry, arg: &str) -> anyhow::Result<String> {
    let p = Path::new(arg);
    if p.is_file() {
        let id = p
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| arg.to_string());
        let genome = Genome::load(&id, p).with_context(|| format!("loading {arg}"))?;
        registry.insert(Arc::new(genome));
        Ok(id)
    } else {
        Ok(arg.to_string())
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DesignConfig> {
    match path {
        Some(p) => DesignConfig::from_file(p)
            .with_context(|| format!("reading configuration {}", p.display())),
        None => Ok(DesignConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Design { snps, genome, out, registry, config, threads, json } => {
            let cfg = load_config(config.as_deref())?;
            let reg = load_registry(registry.as_deref())?;
            let genome_id = resolve_genome(&reg, &genome)?;
            let text = std::fs::read_to_string(&snps)
                .with_context(|| format!("reading SNP list {}", snps.display()))?;

            let engine = Engine::new(reg, cfg);
            let id = engine.submit(&genome_id, &text)?;
            engine.run(&id, threads)?;

            let job = engine.job(&id).expect("job just ran");
            let status = job.status();
            if status.state == JobState::Failed {
                anyhow::bail!(
                    "job failed: {}",
                    job.failure().unwrap_or_else(|| "unknown failure".to_string())
                );
            }

            let outcomes = job.outcomes();
            std::fs::create_dir_all(&out)
                .with_context(|| format!("creating {}", out.display()))?;
            let summary_path = out.join(report::SUMMARY_FILE);
            std::fs::write(&summary_path, report::summary(job.targets(), &outcomes)?)?;
            let detail_path = out.join(report::DETAIL_FILE);
            std::fs::write(&detail_path, report::detail(job.targets(), &outcomes)?)?;
            if let Some(p) = json {
                let payload = report::results(job.targets(), &outcomes);
                std::fs::write(&p, serde_json::to_string_pretty(&payload)?)?;
            }

            println!("{}", serde_json::to_string(&status)?);
        }

        Commands::Validate { snps, genome, registry } => {
            let reg = load_registry(registry.as_deref())?;
            let genome_id = resolve_genome(&reg, &genome)?;
            let g = reg.get_or_load(&genome_id)?;
            let text = std::fs::read_to_string(&snps)
                .with_context(|| format!("reading SNP list {}", snps.display()))?;
            let targets = target::parse_targets(&text, usize::MAX)?;
            let verdicts = target::validate_indexed(&g, &targets);

            let mut bad = 0usize;
            for (t, v) in targets.iter().zip(verdicts) {
                match v {
                    None => println!("{}\tOK", t.id()),
                    Some(e) => {
                        bad += 1;
                        println!("{}\t{}\t{}", t.id(), e.code(), e);
                    }
                }
            }
            if bad > 0 {
                anyhow::bail!("{bad} of {} target(s) failed validation", targets.len());
            }
        }

        Commands::ListGenomes { registry } => {
            let reg = GenomeRegistry::from_file(&registry)
                .with_context(|| format!("reading genome registry {}", registry.display()))?;
            for e in reg.entries() {
                println!("{}\t{}\t{}", e.id, e.name, e.path);
            }
        }
    }

    Ok(())
}
