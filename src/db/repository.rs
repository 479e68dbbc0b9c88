//! Collaborator seams consumed by the evaluation pipeline.

use super::models::*;
use super::store::DbError;

/// Resolves the monitoring settings of a target.
pub trait TargetLookup: Send + Sync {
    /// Returns `None` when the target does not exist.
    fn lookup_target(&self, target_id: i64) -> Result<Option<TargetSettings>, DbError>;
}

/// Persistence consumed by the evaluation pipeline.
pub trait EvaluationStore: Send + Sync {
    fn get_availability(&self, target_id: i64) -> Result<Option<AvailabilityState>, DbError>;

    /// Upsert the state row and append the event, if any, in one transaction.
    ///
    /// Returns the id assigned to the event.
    fn save_availability(
        &self,
        state: &AvailabilityState,
        event: Option<&TransitionEvent>,
    ) -> Result<Option<i64>, DbError>;

    /// The newest snapshot for the target, stored body included.
    fn get_latest_snapshot(&self, target_id: i64) -> Result<Option<ContentSnapshot>, DbError>;

    /// Append a snapshot after `snapshot.previous_snapshot_id`.
    ///
    /// Fails with [`DbError::ChainConflict`] when the referenced predecessor is
    /// no longer the newest snapshot for the target.
    fn append_snapshot(&self, snapshot: &NewSnapshot) -> Result<ContentSnapshot, DbError>;
}
