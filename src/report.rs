use crate::fingerprint::{RejectReason, Score};
use crate::frame::FrameId;
use crate::pipeline::{AdmissionDecision, Outcome};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Decision log file name, kept inside the store directory.
pub const DECISION_LOG: &str = ".decisions.jsonl";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error on decision log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One line of the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub recorded_at: String,
    pub outcome: Outcome,
    pub frame: FrameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_location: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DecisionRecord {
    pub fn from_decision(decision: &AdmissionDecision, recorded_at: &str) -> Self {
        let mut record = DecisionRecord {
            recorded_at: recorded_at.to_string(),
            outcome: decision.outcome(),
            frame: decision.frame().clone(),
            key: decision.key().map(str::to_string),
            location: None,
            matched_key: None,
            matched_location: None,
            score: None,
            reject_reason: None,
            reason: None,
        };
        match decision {
            AdmissionDecision::Unique { location, .. } => {
                record.location = Some(location.clone());
            }
            AdmissionDecision::Duplicate { matched, score, .. } => {
                record.matched_key = Some(matched.key.clone());
                record.matched_location = Some(matched.location.clone());
                record.score = Some(*score);
            }
            AdmissionDecision::Invalid {
                reason, message, ..
            } => {
                record.reject_reason = Some(*reason);
                record.reason = Some(message.clone());
            }
        }
        record
    }
}

pub fn log_path(store_dir: &Path) -> PathBuf {
    store_dir.join(DECISION_LOG)
}

/// Append one line per decision, all stamped with the current time.
pub fn append_decisions(store_dir: &Path, decisions: &[AdmissionDecision]) -> Result<usize, LogError> {
    let path = log_path(store_dir);
    let io_err = |source| LogError::Io {
        path: path.clone(),
        source,
    };

    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err)?;

    let now = Utc::now().to_rfc3339();
    for decision in decisions {
        let record = DecisionRecord::from_decision(decision, &now);
        writeln!(out, "{}", serde_json::to_string(&record)?).map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    Ok(decisions.len())
}

/// Read every well-formed record. A missing log reads as empty.
pub fn read_decision_log(store_dir: &Path) -> Result<Vec<DecisionRecord>, LogError> {
    let path = log_path(store_dir);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(LogError::Io { path, source }),
    };

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| LogError::Io {
            path: path.clone(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DecisionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => log::warn!("Skipping malformed decision log line {}: {}", i + 1, err),
        }
    }
    Ok(records)
}

/// Remove the log. Returns whether there was one.
pub fn clear_decision_log(store_dir: &Path) -> Result<bool, LogError> {
    let path = log_path(store_dir);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(LogError::Io { path, source }),
    }
}

/// A kept frame and every frame suppressed in its favour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameGroup {
    pub key: String,
    pub kept: FrameId,
    pub location: PathBuf,
    /// The kept frame was admitted by an earlier run against the same store.
    pub carried_over: bool,
    pub duplicates: Vec<FrameId>,
}

/// Fold decisions into groups, in admission order. Invalid frames belong to
/// no group.
pub fn group_decisions(decisions: &[AdmissionDecision]) -> Vec<FrameGroup> {
    let mut groups: Vec<FrameGroup> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for decision in decisions {
        match decision {
            AdmissionDecision::Unique {
                frame,
                key,
                location,
                ..
            } => {
                by_key.insert(key.clone(), groups.len());
                groups.push(FrameGroup {
                    key: key.clone(),
                    kept: frame.clone(),
                    location: location.clone(),
                    carried_over: false,
                    duplicates: Vec::new(),
                });
            }
            AdmissionDecision::Duplicate { frame, matched, .. } => {
                let pos = *by_key.entry(matched.key.clone()).or_insert_with(|| {
                    groups.push(FrameGroup {
                        key: matched.key.clone(),
                        kept: matched.frame.clone(),
                        location: matched.location.clone(),
                        carried_over: true,
                        duplicates: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[pos].duplicates.push(frame.clone());
            }
            AdmissionDecision::Invalid { .. } => {}
        }
    }

    groups
}
