//! Near-duplicate filtering for frames sampled from video.
//!
//! Candidate frames are fingerprinted, compared against every frame admitted
//! so far, and either stored under their fingerprint key or discarded as a
//! duplicate of an earlier frame.

pub mod config;
pub mod fingerprint;
pub mod frame;
pub mod index;
pub mod pipeline;
pub mod report;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigError, DedupConfig, Strategy};
pub use fingerprint::{
    compare_images, Comparator, Comparison, FingerprintError, HashComparator, HashFingerprint,
    RejectReason, Score, StructuralComparator,
};
pub use frame::{discover_frames, CandidateFrame, DiscoverOptions, FrameId, FrameOrder};
pub use index::{DuplicateIndex, EntryRef, MatchPolicy};
pub use pipeline::{
    run_configured, AdmissionDecision, AdmissionPipeline, BatchAborted, BatchReport,
    CancellationToken, Outcome, PipelineError, PipelineOptions,
};
pub use report::{group_decisions, DecisionRecord, FrameGroup, LogError};
pub use store::{DryRunStore, FrameStore, FsFrameStore, StoreError};
