//! Content capture: fingerprint, diff against the previous snapshot, append.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::{
    ChangeLevel, ContentSnapshot, DbError, DiffSummary, EvaluationStore, NewSnapshot, ProbeResult,
};

use super::diff::{classify, diff};
use super::fingerprint::Fingerprint;

/// Content capture errors. These never fail an evaluation.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("successful probe carried no body")]
    MissingBody,
    #[error("storage error: {0}")]
    Store(#[from] DbError),
}

/// What a successful capture produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub snapshot_id: i64,
    pub sequence: i64,
    pub previous_snapshot_id: Option<i64>,
    pub body_size: i64,
    pub change_level: ChangeLevel,
    pub diff: DiffSummary,
}

impl From<&ContentSnapshot> for SnapshotSummary {
    fn from(s: &ContentSnapshot) -> Self {
        Self {
            snapshot_id: s.id,
            sequence: s.sequence,
            previous_snapshot_id: s.previous_snapshot_id,
            body_size: s.body_size,
            change_level: s.change_level,
            diff: s.diff_summary.clone(),
        }
    }
}

/// Capture the body of a successful probe as the next snapshot of a target.
///
/// The predecessor's stored body is re-parsed rather than reusing a cached
/// fingerprint. Sizes are raw byte counts; bodies are decoded lossily only
/// for fingerprinting.
pub fn capture_content(
    store: &dyn EvaluationStore,
    target_id: i64,
    probe: &ProbeResult,
) -> Result<ContentSnapshot, CaptureError> {
    let body = probe.body.as_deref().ok_or(CaptureError::MissingBody)?;
    let current = Fingerprint::extract(&String::from_utf8_lossy(body));

    let previous = store.get_latest_snapshot(target_id)?;
    let baseline = previous
        .as_ref()
        .map(|p| (Fingerprint::extract(&p.body_text()), p.body_size.max(0) as usize));

    let diff_summary = diff(
        &current,
        body.len(),
        baseline.as_ref().map(|(fp, size)| (fp, *size)),
    );
    let change_level = classify(&diff_summary);

    let snapshot = NewSnapshot {
        target_id,
        previous_snapshot_id: previous.as_ref().map(|p| p.id),
        body: body.to_vec(),
        status_code: probe.status_code,
        headers: probe
            .headers
            .as_ref()
            .map(normalize_headers)
            .unwrap_or_default(),
        diff_summary,
        change_level,
        created_at: Utc::now(),
    };

    Ok(store.append_snapshot(&snapshot)?)
}

/// Lowercase header names, trim values, and fold names that collide.
pub fn normalize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut normalized: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        normalized
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    normalized
}
