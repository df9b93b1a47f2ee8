use crate::config::{DedupConfig, Strategy};
use crate::fingerprint::{
    Comparator, FingerprintError, HashComparator, RejectReason, Score, StructuralComparator,
};
use crate::frame::{CandidateFrame, FrameId};
use crate::index::{DuplicateIndex, EntryRef, MatchPolicy};
use crate::store::{FrameStore, StoreError};
use image::DynamicImage;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage failure while admitting {frame}: {source}")]
    Storage {
        frame: FrameId,
        #[source]
        source: StoreError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A batch that stopped early. Everything admitted before the stop stays in
/// the store and in `report`.
#[derive(Debug, Error)]
#[error("Batch aborted: {cause}")]
pub struct BatchAborted {
    #[source]
    pub cause: PipelineError,
    pub report: BatchReport,
}

/// Shared flag that stops a running batch between candidates.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Unique,
    Duplicate,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// Newly admitted. `reused` is set when the store already held the key.
    Unique {
        frame: FrameId,
        key: String,
        location: PathBuf,
        reused: bool,
    },
    /// Discarded in favour of `matched`.
    Duplicate {
        frame: FrameId,
        key: String,
        matched: EntryRef,
        score: Score,
    },
    /// Could not be fingerprinted.
    Invalid {
        frame: FrameId,
        reason: RejectReason,
        message: String,
    },
}

impl AdmissionDecision {
    pub fn frame(&self) -> &FrameId {
        match self {
            AdmissionDecision::Unique { frame, .. }
            | AdmissionDecision::Duplicate { frame, .. }
            | AdmissionDecision::Invalid { frame, .. } => frame,
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            AdmissionDecision::Unique { .. } => Outcome::Unique,
            AdmissionDecision::Duplicate { .. } => Outcome::Duplicate,
            AdmissionDecision::Invalid { .. } => Outcome::Invalid,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Unique { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            AdmissionDecision::Unique { key, .. } | AdmissionDecision::Duplicate { key, .. } => {
                Some(key)
            }
            AdmissionDecision::Invalid { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub admitted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    /// Candidates never decided because the batch stopped early.
    pub unprocessed: usize,
    pub decisions: Vec<AdmissionDecision>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BatchReport {
    fn record(&mut self, decision: AdmissionDecision) {
        match decision.outcome() {
            Outcome::Unique => self.admitted += 1,
            Outcome::Duplicate => self.duplicates += 1,
            Outcome::Invalid => self.invalid += 1,
        }
        self.decisions.push(decision);
    }

    pub fn processed(&self) -> usize {
        self.admitted + self.duplicates + self.invalid
    }

    pub fn admitted_keys(&self) -> Vec<&str> {
        self.decisions
            .iter()
            .filter(|d| d.is_admitted())
            .filter_map(|d| d.key())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub threads: Option<usize>,
    pub deadline: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            threads: None,
            deadline: None,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &DedupConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            threads: config.threads,
            deadline: config.deadline(),
        }
    }
}

/// A candidate after the fingerprint stage.
enum Stage<F> {
    Fingerprinted {
        frame: FrameId,
        image: DynamicImage,
        fingerprint: F,
        key: String,
    },
    Rejected {
        frame: FrameId,
        error: FingerprintError,
    },
}

fn fingerprint_candidate<C: Comparator>(
    comparator: &C,
    candidate: CandidateFrame,
) -> Stage<C::Fingerprint> {
    let (frame, image) = candidate.into_parts();
    let image = match image {
        Ok(image) => image,
        Err(error) => return Stage::Rejected { frame, error },
    };
    match comparator.compute(&image) {
        Ok(fingerprint) => {
            let key = comparator.key(&fingerprint);
            Stage::Fingerprinted {
                frame,
                image,
                fingerprint,
                key,
            }
        }
        Err(error) => Stage::Rejected { frame, error },
    }
}

/// Fingerprint, look up, then admit or reject each candidate in order.
///
/// Fingerprints of a chunk are computed in parallel. The lookup and insert for
/// each candidate run one at a time, in input order, against the index this
/// pipeline owns.
pub struct AdmissionPipeline<C: Comparator, S: FrameStore> {
    index: DuplicateIndex<C>,
    store: S,
    options: PipelineOptions,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl<C: Comparator, S: FrameStore> AdmissionPipeline<C, S> {
    pub fn new(index: DuplicateIndex<C>, store: S) -> Self {
        Self {
            index,
            store,
            options: PipelineOptions::default(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn index(&self) -> &DuplicateIndex<C> {
        &self.index
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (DuplicateIndex<C>, S) {
        (self.index, self.store)
    }

    /// Decide a single candidate.
    pub fn process(&mut self, candidate: CandidateFrame) -> Result<AdmissionDecision, PipelineError> {
        let stage = fingerprint_candidate(self.index.comparator(), candidate);
        self.decide(stage)
    }

    fn decide(&mut self, stage: Stage<C::Fingerprint>) -> Result<AdmissionDecision, PipelineError> {
        let (frame, image, fingerprint, key) = match stage {
            Stage::Rejected { frame, error } => {
                log::warn!("Rejecting {}: {}", frame, error);
                return Ok(AdmissionDecision::Invalid {
                    frame,
                    reason: error.reason(),
                    message: error.to_string(),
                });
            }
            Stage::Fingerprinted {
                frame,
                image,
                fingerprint,
                key,
            } => (frame, image, fingerprint, key),
        };

        if let Some(found) = self.index.lookup(&fingerprint) {
            log::debug!(
                "Duplicate {} matches {} ({})",
                frame, found.entry.frame, found.score
            );
            return Ok(AdmissionDecision::Duplicate {
                frame,
                key,
                matched: found.entry.to_ref(),
                score: found.score,
            });
        }

        // Same canonical form, but outside the comparator's threshold.
        if let Some(existing) = self.index.get(&key) {
            let score = self
                .index
                .comparator()
                .score(&fingerprint, &existing.fingerprint);
            log::debug!("Duplicate {} shares key {} with {}", frame, key, existing.frame);
            return Ok(AdmissionDecision::Duplicate {
                frame,
                key,
                matched: existing.to_ref(),
                score,
            });
        }

        let reused = self.store.exists(&key);
        let location = if reused {
            self.store.location(&key)
        } else {
            self.store
                .save(&key, &image)
                .map_err(|source| PipelineError::Storage {
                    frame: frame.clone(),
                    source,
                })?
        };

        self.index
            .admit(key.clone(), fingerprint, frame.clone(), location.clone());
        log::debug!("Admitted {} as {}", frame, location.display());

        Ok(AdmissionDecision::Unique {
            frame,
            key,
            location,
            reused,
        })
    }

    fn check_stop(&self, started: Instant) -> Option<PipelineError> {
        if self.cancel.is_cancelled() {
            return Some(PipelineError::Cancelled);
        }
        match self.options.deadline {
            Some(deadline) if started.elapsed() >= deadline => {
                Some(PipelineError::DeadlineExceeded(deadline))
            }
            _ => None,
        }
    }

    /// Process a whole batch in the given order.
    pub fn run<I>(&mut self, candidates: I) -> Result<BatchReport, BatchAborted>
    where
        I: IntoIterator<Item = CandidateFrame>,
    {
        let candidates: Vec<CandidateFrame> = candidates.into_iter().collect();
        let total = candidates.len();
        let started = Instant::now();
        let mut report = BatchReport::default();

        if let Some(progress) = &self.progress {
            progress.set_length(total as u64);
        }

        let pool = match self.options.threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    report.unprocessed = total;
                    return Err(BatchAborted {
                        cause: e.into(),
                        report,
                    });
                }
            },
            None => None,
        };

        log::info!(
            "Deduplicating {} candidates with {} ({} entries already indexed)",
            total,
            self.index.comparator().name(),
            self.index.len()
        );

        let chunk_size = self.options.chunk_size.max(1);
        let mut remaining = candidates.into_iter();
        loop {
            let chunk: Vec<CandidateFrame> = remaining.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }

            if let Some(cause) = self.check_stop(started) {
                return Err(self.abort(cause, report, total, started));
            }

            let comparator = self.index.comparator();
            let stages: Vec<Stage<C::Fingerprint>> = match &pool {
                Some(pool) => pool.install(|| {
                    chunk
                        .into_par_iter()
                        .map(|c| fingerprint_candidate(comparator, c))
                        .collect()
                }),
                None => chunk
                    .into_par_iter()
                    .map(|c| fingerprint_candidate(comparator, c))
                    .collect(),
            };

            for stage in stages {
                if let Some(cause) = self.check_stop(started) {
                    return Err(self.abort(cause, report, total, started));
                }
                match self.decide(stage) {
                    Ok(decision) => {
                        report.record(decision);
                        if let Some(progress) = &self.progress {
                            progress.inc(1);
                        }
                    }
                    Err(cause) => return Err(self.abort(cause, report, total, started)),
                }
            }
        }

        report.elapsed = started.elapsed();
        if let Some(progress) = &self.progress {
            progress.finish_with_message("Deduplication complete");
        }
        log::info!(
            "Admitted {}, duplicates {}, invalid {} in {:.2?}",
            report.admitted, report.duplicates, report.invalid, report.elapsed
        );
        Ok(report)
    }

    fn abort(
        &self,
        cause: PipelineError,
        mut report: BatchReport,
        total: usize,
        started: Instant,
    ) -> BatchAborted {
        report.unprocessed = total - report.processed();
        report.elapsed = started.elapsed();
        if let Some(progress) = &self.progress {
            progress.abandon_with_message("Deduplication aborted");
        }
        match &cause {
            PipelineError::Storage { .. } => log::error!(
                "{}; {} admitted entries kept, {} candidates left",
                cause, report.admitted, report.unprocessed
            ),
            _ => log::warn!("{}; {} candidates left", cause, report.unprocessed),
        }
        BatchAborted { cause, report }
    }
}

/// Build the comparator `config` selects and run `candidates` through it.
pub fn run_configured<S: FrameStore>(
    config: &DedupConfig,
    candidates: Vec<CandidateFrame>,
    store: S,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
) -> Result<BatchReport, BatchAborted> {
    match config.strategy {
        Strategy::Hash => run_with(
            HashComparator::new(&config.hash),
            config,
            candidates,
            store,
            cancel,
            progress,
        ),
        Strategy::Structural => run_with(
            StructuralComparator::new(&config.structural),
            config,
            candidates,
            store,
            cancel,
            progress,
        ),
    }
}

fn run_with<C: Comparator, S: FrameStore>(
    comparator: C,
    config: &DedupConfig,
    candidates: Vec<CandidateFrame>,
    store: S,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
) -> Result<BatchReport, BatchAborted> {
    let index = DuplicateIndex::new(comparator, config.policy);
    let mut pipeline = AdmissionPipeline::new(index, store)
        .with_options(PipelineOptions::from_config(config))
        .with_cancellation(cancel);
    if let Some(progress) = progress {
        pipeline = pipeline.with_progress(progress);
    }
    pipeline.run(candidates)
}

/// Shorthand for a first-match hash pipeline with default settings.
pub fn hash_pipeline<S: FrameStore>(store: S) -> AdmissionPipeline<HashComparator, S> {
    AdmissionPipeline::new(
        DuplicateIndex::new(HashComparator::default(), MatchPolicy::FirstMatch),
        store,
    )
}
