#![forbid(unsafe_code)]
//! # kasprimer
//!
//! A batch design engine for **KASP genotyping assays**: given a reference
//! genome and a list of SNPs, it produces for each SNP two allele-specific
//! forward primers (FAM- and HEX-tailed, 3' terminus on the variant base)
//! and one common reverse primer, thermodynamically scored and checked for
//! genome-wide specificity.
//!
//! ## Highlights
//! - **Deterministic**: identical submissions against the same genome and
//!   configuration select identical primer triples, regardless of thread
//!   count.
//! - **Batch-tolerant**: a defective SNP (bad coordinates, reference
//!   mismatch, no viable primer) fails alone; the rest of the batch
//!   completes.
//! - **Shared read-only genomes**: each reference is loaded and indexed
//!   once, then shared across jobs without locking on the read path.
//!
//! ## Examples
//! ```rust
//! use kasprimer::genome::Genome;
//! use kasprimer::target;
//!
//! let genome = Genome::from_records(
//!     "demo",
//!     vec![("chr7A".into(), b"ACGTACGTTA".to_vec())],
//! ).unwrap();
//! let targets = target::parse_targets("chr7A\t9\tT\tC\n", 50).unwrap();
//! let validation = target::validate(&genome, targets);
//! assert_eq!(validation.valid.len(), 1);
//! assert!(validation.errors.is_empty());
//! ```

pub mod candidate;
pub mod config;
pub mod error;
pub mod genome;
pub mod job;
pub mod report;
pub mod select;
pub mod specificity;
pub mod target;
pub mod thermo;

pub use config::DesignConfig;
pub use error::{EngineError, TargetError};
pub use genome::{Genome, GenomeRegistry};
pub use job::{Engine, JobState, JobStatus, TargetOutcome};
pub use select::PrimerResult;
pub use target::SnpTarget;

/// Crate version, as compiled.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
