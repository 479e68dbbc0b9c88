//! Confirmation state machine.
//!
//! Turns a stream of probe outcomes into a debounced UP/DOWN belief. A flip is
//! only accepted once `threshold` consecutive probes agree on it.

use crate::db::{Availability, AvailabilityState, ProbeResult, TransitionEvent};

/// Result of feeding one probe into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    /// The state row to persist.
    pub state: AvailabilityState,
    /// Set only when this probe confirmed a flip.
    pub transition: Option<TransitionEvent>,
}

/// Apply one probe to the previous state of a target.
///
/// `previous` is `None` for a target that has never been probed; such a
/// target starts out UP and no transition is emitted, whatever the probe says.
/// `threshold` must be at least 1.
pub fn confirm(
    previous: Option<&AvailabilityState>,
    target_id: i64,
    threshold: u32,
    probe: &ProbeResult,
) -> Confirmation {
    let candidate = probe.outcome.candidate();

    let Some(previous) = previous else {
        let (failures, successes) = match candidate {
            Availability::Down => (1, 0),
            Availability::Up => (0, 1),
        };
        let state = AvailabilityState {
            target_id,
            state: Availability::Up,
            consecutive_failures: failures,
            consecutive_successes: successes,
            last_observed_at: probe.observed_at,
            last_outcome: probe.outcome,
            last_status_code: probe.status_code,
            last_latency_ms: probe.latency_ms,
            last_final_url: probe.final_url.clone(),
        };
        return Confirmation {
            state,
            transition: None,
        };
    };

    let mut state = previous.clone();
    observe(&mut state, probe);

    let confirmed = match candidate {
        Availability::Down => {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.consecutive_successes = 0;
            state.state == Availability::Up && state.consecutive_failures >= threshold
        }
        Availability::Up => {
            state.consecutive_successes = state.consecutive_successes.saturating_add(1);
            state.consecutive_failures = 0;
            state.state == Availability::Down && state.consecutive_successes >= threshold
        }
    };

    let transition = confirmed.then(|| {
        let event = TransitionEvent {
            id: 0,
            target_id,
            from_state: state.state,
            to_state: candidate,
            outcome: probe.outcome,
            status_code: probe.status_code,
            observed_at: probe.observed_at,
        };
        state.state = candidate;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        event
    });

    Confirmation { state, transition }
}

/// Copy the display fields of the probe onto the state row.
fn observe(state: &mut AvailabilityState, probe: &ProbeResult) {
    state.last_observed_at = probe.observed_at;
    state.last_outcome = probe.outcome;
    state.last_status_code = probe.status_code;
    state.last_latency_ms = probe.latency_ms;
    state.last_final_url = probe.final_url.clone();
}
