//! Job orchestration: lifecycle state machine, worker pool, result slots.
//!
//! A [`Job`] moves `Queued -> Running -> {Complete, Failed}`, with
//! `Cancelled` reachable from `Queued` or `Running`; terminal states are
//! final. Per-SNP design failures land in that target's result slot and
//! never fail the job — only engine-level failures (genome unreadable,
//! worker pool construction) do.
//!
//! Execution fans per-SNP work out over a bounded rayon scope fed by an mpsc
//! queue. Each slot is written by exactly one worker, the processed counter
//! is atomic and only ever increments, and cancellation is cooperative:
//! workers re-check the flag between SNPs, in-flight work completes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, SystemTime};

use rayon::ThreadPoolBuilder;
use serde::Serialize;

use crate::config::DesignConfig;
use crate::error::{EngineError, TargetError};
use crate::genome::GenomeRegistry;
use crate::select::{self, Deadline, PrimerResult};
use crate::specificity::SeedIndex;
use crate::target::{self, SnpTarget};

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Cancelled)
    }

    fn may_become(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Cancelled) | (Running, Complete) | (Running, Failed) | (Running, Cancelled)
        )
    }
}

/// Outcome for one submitted target: a design or a typed failure.
#[derive(Debug, Clone)]
pub enum TargetOutcome {
    Designed(PrimerResult),
    Failed(TargetError),
}

/// Status payload served to polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    pub processed_count: usize,
    pub total_count: usize,
}

/// One design job. Owned by the [`Engine`]'s registry; targets and outcomes
/// live and die with the job.
pub struct Job {
    pub id: String,
    pub genome_id: String,
    targets: Vec<SnpTarget>,
    state: Mutex<JobState>,
    processed: AtomicUsize,
    cancel: AtomicBool,
    slots: Mutex<Vec<Option<TargetOutcome>>>,
    created: SystemTime,
    completed: Mutex<Option<SystemTime>>,
    failure: Mutex<Option<String>>,
}

impl Job {
    fn new(id: String, genome_id: String, targets: Vec<SnpTarget>) -> Self {
        let n = targets.len();
        Job {
            id,
            genome_id,
            targets,
            state: Mutex::new(JobState::Queued),
            processed: AtomicUsize::new(0),
            cancel: AtomicBool::new(false),
            slots: Mutex::new(vec![None; n]),
            created: SystemTime::now(),
            completed: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    pub fn state(&self) -> JobState {
        *self.state.lock().expect("job state lock")
    }

    pub fn targets(&self) -> &[SnpTarget] {
        &self.targets
    }

    pub fn created(&self) -> SystemTime {
        self.created
    }

    pub fn completed(&self) -> Option<SystemTime> {
        *self.completed.lock().expect("job completed lock")
    }

    /// Engine-level failure message, when the job is `Failed`.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().expect("job failure lock").clone()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            state: self.state(),
            processed_count: self.processed.load(Ordering::SeqCst),
            total_count: self.targets.len(),
        }
    }

    /// Attempt a legal state transition; illegal ones are ignored and return
    /// false. Terminal transitions stamp the completion time.
    fn transition(&self, next: JobState) -> bool {
        let mut guard = self.state.lock().expect("job state lock");
        if !guard.may_become(next) {
            return false;
        }
        *guard = next;
        if next.is_terminal() {
            *self.completed.lock().expect("job completed lock") = Some(SystemTime::now());
        }
        true
    }

    fn record(&self, slot: usize, outcome: TargetOutcome) {
        {
            let mut slots = self.slots.lock().expect("job slots lock");
            debug_assert!(slots[slot].is_none(), "slot {slot} written twice");
            slots[slot] = Some(outcome);
        }
        // The counter only moves after the slot is visible, so a polling
        // client never observes a count ahead of the data.
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Clone the per-target outcomes in submission order. Slots of targets
    /// never dispatched (cancelled jobs) are `None`.
    pub fn outcomes(&self) -> Vec<Option<TargetOutcome>> {
        self.slots.lock().expect("job slots lock").clone()
    }
}

/// The design engine: genome registry, shared specificity indexes and the
/// job table.
pub struct Engine {
    genomes: GenomeRegistry,
    cfg: DesignConfig,
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    indexes: Mutex<HashMap<String, Arc<SeedIndex>>>,
    next_id: AtomicU64,
}

impl Engine {
    pub fn new(genomes: GenomeRegistry, cfg: DesignConfig) -> Self {
        Engine {
            genomes,
            cfg,
            jobs: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &DesignConfig {
        &self.cfg
    }

    pub fn genomes(&self) -> &GenomeRegistry {
        &self.genomes
    }

    /// Parse and register a new job. Fails on malformed input or oversized
    /// submissions; genome problems surface later, when the job runs.
    pub fn submit(&self, genome_id: &str, snps_text: &str) -> anyhow::Result<String> {
        let targets = target::parse_targets(snps_text, self.cfg.max_snp_count)?;
        anyhow::ensure!(!targets.is_empty(), "no SNP targets in submission");
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("job-{n:06}");
        let job = Arc::new(Job::new(id.clone(), genome_id.to_string(), targets));
        log::info!(
            "job {} submitted: genome '{}', {} target(s)",
            id,
            genome_id,
            job.targets.len()
        );
        self.jobs.lock().expect("jobs lock").insert(id.clone(), job);
        Ok(id)
    }

    pub fn job(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.lock().expect("jobs lock").get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.job(id).map(|j| j.status())
    }

    /// Request cancellation. Queued jobs settle immediately; running jobs
    /// stop dispatching new targets and settle when in-flight work drains.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(job) = self.job(id) else {
            return false;
        };
        if job.state().is_terminal() {
            return false;
        }
        job.cancel.store(true, Ordering::SeqCst);
        // Queued settles now; a running job settles in run() once its
        // workers drain.
        if job.state() == JobState::Queued {
            job.transition(JobState::Cancelled);
        }
        true
    }

    /// Drop a terminal job from the registry (retention policy hook).
    pub fn purge(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        match jobs.get(id) {
            Some(j) if j.state().is_terminal() => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    fn index_for(&self, genome: &Arc<crate::genome::Genome>) -> Arc<SeedIndex> {
        let mut guard = self.indexes.lock().expect("indexes lock");
        if let Some(idx) = guard.get(genome.id()) {
            return idx.clone();
        }
        let idx = Arc::new(SeedIndex::build(genome, self.cfg.seed_len));
        guard.insert(genome.id().to_string(), idx.clone());
        idx
    }

    /// Execute a job to completion (blocking). Per-target failures are
    /// recorded in their slots; only engine-level problems mark the job
    /// `Failed`. Returns an error only for unknown job ids.
    pub fn run(&self, id: &str, threads: Option<usize>) -> anyhow::Result<()> {
        let job = self.job(id).ok_or_else(|| anyhow::anyhow!("unknown job id '{id}'"))?;
        if !job.transition(JobState::Running) {
            // Already cancelled (or somehow re-run); nothing to do.
            return Ok(());
        }
        log::info!("job {} running", job.id);

        let genome = match self.genomes.get_or_load(&job.genome_id) {
            Ok(g) => g,
            Err(e) => {
                let err = EngineError::from(e);
                log::error!("job {}: {err}", job.id);
                *job.failure.lock().expect("job failure lock") = Some(err.to_string());
                job.transition(JobState::Failed);
                return Ok(());
            }
        };

        // Validation verdicts fill slots immediately, keeping one outcome
        // per submitted target.
        let verdicts = target::validate_indexed(&genome, &job.targets);
        let mut pending: Vec<usize> = Vec::new();
        for (i, v) in verdicts.into_iter().enumerate() {
            match v {
                Some(err) => job.record(i, TargetOutcome::Failed(err)),
                None => pending.push(i),
            }
        }

        let index = self.index_for(&genome);

        let n_workers = threads
            .unwrap_or_else(num_cpus::get)
            .max(1)
            .min(pending.len().max(1));
        let pool = match ThreadPoolBuilder::new().num_threads(n_workers).build() {
            Ok(p) => p,
            Err(e) => {
                let err = EngineError::Infra(format!("worker pool construction failed: {e}"));
                log::error!("job {}: {err}", job.id);
                *job.failure.lock().expect("job failure lock") = Some(err.to_string());
                job.transition(JobState::Failed);
                return Ok(());
            }
        };

        let (tx, rx) = mpsc::channel::<usize>();
        for i in &pending {
            tx.send(*i).expect("queue open");
        }
        drop(tx);
        let rx = Mutex::new(rx);

        let cfg = &self.cfg;
        let job_ref = &job;
        let genome_ref = &genome;
        let index_ref = &index;
        pool.install(|| {
            rayon::scope(|s| {
                for _ in 0..n_workers {
                    s.spawn(|_| loop {
                        let slot = {
                            let guard = rx.lock().expect("queue lock");
                            guard.recv()
                        };
                        let Ok(slot) = slot else { break };
                        // Cooperative cancellation, checked between SNPs.
                        if job_ref.cancel.load(Ordering::SeqCst) {
                            break;
                        }
                        let t = &job_ref.targets[slot];
                        let outcome = design_with_retry(genome_ref, index_ref, t, cfg);
                        job_ref.record(slot, outcome);
                    });
                }
            });
        });

        if job.cancel.load(Ordering::SeqCst) {
            job.transition(JobState::Cancelled);
            log::info!("job {} cancelled", job.id);
        } else {
            job.transition(JobState::Complete);
            log::info!(
                "job {} complete: {}/{} targets processed",
                job.id,
                job.processed.load(Ordering::SeqCst),
                job.targets.len()
            );
        }
        Ok(())
    }
}

/// One target's design with the bounded timeout-retry loop. Only timeouts
/// retry; every other per-target error is terminal for that target.
fn design_with_retry(
    genome: &crate::genome::Genome,
    index: &SeedIndex,
    target: &SnpTarget,
    cfg: &DesignConfig,
) -> TargetOutcome {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let deadline = Deadline::new(Duration::from_secs(cfg.snp_timeout_secs));
        match select::design_target(genome, index, target, cfg, &deadline) {
            Ok(result) => return TargetOutcome::Designed(result),
            Err(TargetError::Timeout { .. }) if attempts <= cfg.timeout_retries => {
                log::warn!(
                    "target {} timed out (attempt {attempts}), retrying",
                    target.id()
                );
            }
            Err(TargetError::Timeout { .. }) => {
                return TargetOutcome::Failed(TargetError::Timeout { attempts })
            }
            Err(e) => return TargetOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;

    fn lcg_seq(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        let mut seq = Vec::with_capacity(len);
        for _ in 0..len {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            seq.push(b"ACGT"[(state >> 33) as usize % 4]);
        }
        seq
    }

    fn engine_with_genome(seq: Vec<u8>) -> Engine {
        let genome = Genome::from_records("g1", vec![("chr7A".into(), seq)]).unwrap();
        let reg = GenomeRegistry::new(vec![]);
        reg.insert(Arc::new(genome));
        Engine::new(reg, DesignConfig::default())
    }

    fn snp_line(seq: &[u8], pos: usize) -> String {
        let r = seq[pos - 1] as char;
        let a = if r == 'A' { 'C' } else { 'A' };
        format!("chr7A\t{pos}\t{r}\t{a}\n")
    }

    #[test]
    fn state_machine_permits_only_legal_transitions() {
        use JobState::*;
        assert!(Queued.may_become(Running));
        assert!(Queued.may_become(Cancelled));
        assert!(Running.may_become(Complete));
        assert!(Running.may_become(Failed));
        assert!(Running.may_become(Cancelled));
        for terminal in [Complete, Failed, Cancelled] {
            for next in [Queued, Running, Complete, Failed, Cancelled] {
                assert!(!terminal.may_become(next));
            }
        }
        assert!(!Queued.may_become(Complete));
    }

    #[test]
    fn job_completes_with_one_outcome_per_target() {
        let seq = lcg_seq(9000, 0xDEADBEEF);
        let mut snps = String::from("Chr\tPos\tRef\tAlt\n");
        snps.push_str(&snp_line(&seq, 3000));
        snps.push_str(&snp_line(&seq, 5000));
        // Ref mismatch: claim the wrong base.
        let wrong = if seq[6999] == b'G' { 'C' } else { 'G' };
        snps.push_str(&format!("chr7A\t7000\t{wrong}\tA\n"));
        let engine = engine_with_genome(seq);

        let id = engine.submit("g1", &snps).unwrap();
        assert_eq!(engine.status(&id).unwrap().state, JobState::Queued);
        engine.run(&id, Some(2)).unwrap();

        let st = engine.status(&id).unwrap();
        assert_eq!(st.state, JobState::Complete);
        assert_eq!(st.processed_count, st.total_count);
        assert_eq!(st.total_count, 3);

        let outcomes = engine.job(&id).unwrap().outcomes();
        assert!(outcomes.iter().all(|o| o.is_some()));
        assert!(matches!(outcomes[0], Some(TargetOutcome::Designed(_))));
        assert!(matches!(outcomes[1], Some(TargetOutcome::Designed(_))));
        match &outcomes[2] {
            Some(TargetOutcome::Failed(e)) => assert_eq!(e.code(), "RefMismatch"),
            other => panic!("expected RefMismatch, got {other:?}"),
        }
    }

    #[test]
    fn chromosome_end_target_fails_per_target_not_per_job() {
        let seq = lcg_seq(6000, 0xABCD);
        let mut snps = snp_line(&seq, 3000);
        snps.push_str(&snp_line(&seq, 5)); // too close to the start
        let engine = engine_with_genome(seq);
        let id = engine.submit("g1", &snps).unwrap();
        engine.run(&id, Some(2)).unwrap();
        assert_eq!(engine.status(&id).unwrap().state, JobState::Complete);
        let outcomes = engine.job(&id).unwrap().outcomes();
        match &outcomes[1] {
            Some(TargetOutcome::Failed(e)) => assert_eq!(e.code(), "NoValidPrimerFound"),
            other => panic!("expected NoValidPrimerFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_targets_collapse_to_one_result() {
        let seq = lcg_seq(6000, 0x1234);
        let line = snp_line(&seq, 3000);
        let snps = format!("{line}{line}");
        let engine = engine_with_genome(seq);
        let id = engine.submit("g1", &snps).unwrap();
        engine.run(&id, None).unwrap();
        let outcomes = engine.job(&id).unwrap().outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], Some(TargetOutcome::Designed(_))));
        match &outcomes[1] {
            Some(TargetOutcome::Failed(e)) => assert_eq!(e.code(), "Duplicate"),
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[test]
    fn unknown_genome_fails_the_whole_job() {
        let engine = Engine::new(GenomeRegistry::new(vec![]), DesignConfig::default());
        let id = engine.submit("nope", "chr1\t100\tA\tC\n").unwrap();
        engine.run(&id, None).unwrap();
        let job = engine.job(&id).unwrap();
        assert_eq!(job.state(), JobState::Failed);
        assert!(job.failure().unwrap().contains("not registered"));
    }

    #[test]
    fn cancel_before_run_settles_cancelled() {
        let seq = lcg_seq(6000, 0x77);
        let snps = snp_line(&seq, 3000);
        let engine = engine_with_genome(seq);
        let id = engine.submit("g1", &snps).unwrap();
        assert!(engine.cancel(&id));
        engine.run(&id, None).unwrap();
        assert_eq!(engine.status(&id).unwrap().state, JobState::Cancelled);
        // Cancelling a terminal job changes nothing.
        engine.cancel(&id);
        assert_eq!(engine.status(&id).unwrap().state, JobState::Cancelled);
    }

    #[test]
    fn cancel_while_running_drains_and_leaves_later_slots_unwritten() {
        let seq = lcg_seq(30_000, 0xC0FFEE);
        let mut snps = String::new();
        for i in 1..=24 {
            snps.push_str(&snp_line(&seq, i * 1000));
        }
        let engine = Arc::new(engine_with_genome(seq));
        let id = engine.submit("g1", &snps).unwrap();

        let runner = {
            let engine = engine.clone();
            let id = id.clone();
            std::thread::spawn(move || engine.run(&id, Some(1)).unwrap())
        };
        // Wait for the single worker to finish its first target, then cancel.
        while engine.status(&id).unwrap().processed_count == 0 {
            std::thread::yield_now();
        }
        assert!(engine.cancel(&id));
        runner.join().unwrap();

        let job = engine.job(&id).unwrap();
        assert_eq!(job.state(), JobState::Cancelled);
        let outcomes = job.outcomes();
        // In-flight work drained into its slots; undispatched targets stay
        // empty.
        assert!(outcomes.iter().any(|o| o.is_some()));
        assert!(outcomes.iter().any(|o| o.is_none()));
        let st = job.status();
        assert_eq!(
            st.processed_count,
            outcomes.iter().filter(|o| o.is_some()).count()
        );
        assert_eq!(st.total_count, 24);
    }

    #[test]
    fn zero_budget_times_out_after_bounded_retries_without_failing_the_job() {
        let seq = lcg_seq(6000, 0x7117);
        let snps = snp_line(&seq, 3000);
        let genome = Genome::from_records("g1", vec![("chr7A".into(), seq)]).unwrap();
        let reg = GenomeRegistry::new(vec![]);
        reg.insert(Arc::new(genome));
        let mut cfg = DesignConfig::default();
        cfg.snp_timeout_secs = 0;
        let engine = Engine::new(reg, cfg.clone());

        let id = engine.submit("g1", &snps).unwrap();
        engine.run(&id, None).unwrap();

        let st = engine.status(&id).unwrap();
        assert_eq!(st.state, JobState::Complete);
        assert_eq!(st.processed_count, st.total_count);
        match &engine.job(&id).unwrap().outcomes()[0] {
            Some(TargetOutcome::Failed(TargetError::Timeout { attempts })) => {
                assert_eq!(*attempts, cfg.timeout_retries + 1);
            }
            other => panic!("expected a timeout outcome, got {other:?}"),
        }
    }

    #[test]
    fn determinism_across_independent_runs() {
        let seq = lcg_seq(9000, 0x5EED);
        let snps = format!("{}{}", snp_line(&seq, 2500), snp_line(&seq, 6100));

        let collect = |threads: Option<usize>| {
            let engine = engine_with_genome(seq.clone());
            let id = engine.submit("g1", &snps).unwrap();
            engine.run(&id, threads).unwrap();
            engine
                .job(&id)
                .unwrap()
                .outcomes()
                .into_iter()
                .map(|o| match o.unwrap() {
                    TargetOutcome::Designed(r) => format!(
                        "{}|{}|{}|{}|{:.6}",
                        r.allele_a.sequence, r.allele_b.sequence, r.common.sequence, r.product_size, r.quality
                    ),
                    TargetOutcome::Failed(e) => e.code().to_string(),
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(collect(Some(1)), collect(Some(4)));
    }

    #[test]
    fn purge_removes_only_terminal_jobs() {
        let seq = lcg_seq(6000, 0x99);
        let snps = snp_line(&seq, 3000);
        let engine = engine_with_genome(seq);
        let id = engine.submit("g1", &snps).unwrap();
        assert!(!engine.purge(&id)); // still queued
        engine.run(&id, None).unwrap();
        assert!(engine.purge(&id));
        assert!(engine.status(&id).is_none());
    }
}
