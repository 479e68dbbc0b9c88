//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A monitored endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Consecutive corroborating probes required to confirm a transition.
    /// Stored as written; values below 1 are rejected at evaluation time.
    pub confirmation_threshold: i64,
    pub enabled: bool,
    /// Seconds between probes.
    pub probe_interval: f64,
    /// Probe timeout in seconds.
    pub timeout: f64,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            confirmation_threshold: 1,
            enabled: true,
            probe_interval: 60.0,
            timeout: 10.0,
        }
    }
}

/// The slice of a target the evaluation pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSettings {
    pub confirmation_threshold: i64,
    pub enabled: bool,
}

/// Believed reachability of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Availability {
    Up,
    Down,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Up => "UP",
            Availability::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(Availability::Up),
            "DOWN" => Some(Availability::Down),
            _ => None,
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome category reported by the probe executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeOutcome {
    Success,
    Error,
    Timeout,
    Blocked,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Success => "SUCCESS",
            ProbeOutcome::Error => "ERROR",
            ProbeOutcome::Timeout => "TIMEOUT",
            ProbeOutcome::Blocked => "BLOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(ProbeOutcome::Success),
            "ERROR" => Some(ProbeOutcome::Error),
            "TIMEOUT" => Some(ProbeOutcome::Timeout),
            "BLOCKED" => Some(ProbeOutcome::Blocked),
            _ => None,
        }
    }

    /// The availability this outcome argues for. Only SUCCESS counts as up.
    pub fn candidate(&self) -> Availability {
        match self {
            ProbeOutcome::Success => Availability::Up,
            ProbeOutcome::Error | ProbeOutcome::Timeout | ProbeOutcome::Blocked => {
                Availability::Down
            }
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of one probe, as handed over by the probe executor.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub outcome: ProbeOutcome,
    pub status_code: Option<u16>,
    /// URL after redirects.
    pub final_url: Option<String>,
    pub latency_ms: f64,
    pub observed_at: DateTime<Utc>,
    /// Raw response bytes. Present only on SUCCESS.
    pub body: Option<Vec<u8>>,
    /// Present only on SUCCESS.
    pub headers: Option<BTreeMap<String, String>>,
}

impl ProbeResult {
    /// A successful probe carrying content.
    pub fn success(
        status_code: u16,
        latency_ms: f64,
        body: impl Into<Vec<u8>>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            outcome: ProbeOutcome::Success,
            status_code: Some(status_code),
            final_url: None,
            latency_ms,
            observed_at: Utc::now(),
            body: Some(body.into()),
            headers: Some(headers),
        }
    }

    /// A failed probe of the given category.
    pub fn failure(outcome: ProbeOutcome, status_code: Option<u16>, latency_ms: f64) -> Self {
        Self {
            outcome,
            status_code,
            final_url: None,
            latency_ms,
            observed_at: Utc::now(),
            body: None,
            headers: None,
        }
    }
}

/// Current belief about a target's reachability. One row per target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityState {
    pub target_id: i64,
    pub state: Availability,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_observed_at: DateTime<Utc>,
    pub last_outcome: ProbeOutcome,
    pub last_status_code: Option<u16>,
    pub last_latency_ms: f64,
    pub last_final_url: Option<String>,
}

/// Audit record of a confirmed state change. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    /// Zero until the event has been stored.
    pub id: i64,
    pub target_id: i64,
    pub from_state: Availability,
    pub to_state: Availability,
    pub outcome: ProbeOutcome,
    pub status_code: Option<u16>,
    pub observed_at: DateTime<Utc>,
}

/// Coarse magnitude of a content change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeLevel {
    None,
    Minor,
    Moderate,
    Major,
}

impl ChangeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeLevel::None => "NONE",
            ChangeLevel::Minor => "MINOR",
            ChangeLevel::Moderate => "MODERATE",
            ChangeLevel::Major => "MAJOR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(ChangeLevel::None),
            "MINOR" => Some(ChangeLevel::Minor),
            "MODERATE" => Some(ChangeLevel::Moderate),
            "MAJOR" => Some(ChangeLevel::Major),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Additions and removals between two fingerprints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub scripts_added: BTreeSet<String>,
    pub scripts_removed: BTreeSet<String>,
    pub styles_added: BTreeSet<String>,
    pub styles_removed: BTreeSet<String>,
    pub images_added: BTreeSet<String>,
    pub images_removed: BTreeSet<String>,
    pub meta_tags_changed: bool,
    pub size_diff: i64,
    pub size_change_percent: f64,
}

/// A stored content snapshot. Never mutated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSnapshot {
    pub id: i64,
    pub target_id: i64,
    /// 1-based position in the target's chain.
    pub sequence: i64,
    pub previous_snapshot_id: Option<i64>,
    pub body: Vec<u8>,
    /// Length of `body` in bytes.
    pub body_size: i64,
    pub status_code: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub diff_summary: DiffSummary,
    pub change_level: ChangeLevel,
    pub created_at: DateTime<Utc>,
}

impl ContentSnapshot {
    /// The body decoded for parsing. Invalid UTF-8 is replaced, not rejected.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A snapshot about to be appended.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub target_id: i64,
    pub previous_snapshot_id: Option<i64>,
    pub body: Vec<u8>,
    pub status_code: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub diff_summary: DiffSummary,
    pub change_level: ChangeLevel,
    pub created_at: DateTime<Utc>,
}
