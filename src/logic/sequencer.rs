use itertools::Itertools;
use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::logic::error::{ApplyFailure, RepositoryError};
use crate::logic::interpreter::{ChangeEffects, ChangeInterpreter};
use crate::model::{Change, ChangePayload};
use crate::store::traits::EntityScope;

/// A change together with where it sits in the overall run
#[derive(Debug, Clone, Copy)]
pub struct SequencedChange<'p> {
    /// Position in the flattened sequence
    pub position: usize,
    pub payload: &'p ChangePayload,
    /// Index within `payload`
    pub index: usize,
    pub change: &'p Change,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Number of changes executed
    pub operations: usize,
    pub effects: ChangeEffects,
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("{0}")]
    Failed(ApplyFailure),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Flattens a changeset's payloads into one ordered sequence of changes.
/// Payloads run in position order (ties broken by creation time), changes in list order.
pub struct PayloadSequencer<'p> {
    payloads: Vec<&'p ChangePayload>,
}

impl<'p> PayloadSequencer<'p> {
    pub fn new(payloads: &'p [ChangePayload]) -> Self {
        let payloads = payloads
            .iter()
            .sorted_by_key(|payload| (payload.position, payload.created_at))
            .collect();
        Self { payloads }
    }

    pub fn len(&self) -> usize {
        self.payloads.iter().map(|p| p.changes().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = SequencedChange<'p>> + '_ {
        self.payloads
            .iter()
            .copied()
            .flat_map(|payload: &'p ChangePayload| {
                payload
                    .changes()
                    .iter()
                    .enumerate()
                    .map(move |(index, change)| (payload, index, change))
            })
            .enumerate()
            .map(|(position, (payload, index, change))| SequencedChange {
                position,
                payload,
                index,
                change,
            })
    }

    /// Execute every change against `scope`, stopping at the first failure.
    /// Whatever was written before the failure stays in the scope; the caller decides its fate.
    pub async fn run<T: EntityScope>(&self, scope: &mut T) -> Result<RunReport, SequenceError> {
        let mut interpreter = ChangeInterpreter::new(scope);
        let mut report = RunReport::default();

        for step in self.iter() {
            match interpreter.execute(step.change).await {
                Ok(effects) => {
                    report.operations += 1;
                    report.effects.merge(effects);
                }
                Err(RepositoryError::Failed(cause)) => {
                    debug!(
                        "Change #{} in payload {} failed: {}",
                        step.position, step.payload.id, cause
                    );
                    return Err(SequenceError::Failed(ApplyFailure {
                        position: step.position,
                        payload_id: step.payload.id.clone(),
                        change_index: step.index,
                        action: step.change.action,
                        onestop_id: step.change.onestop_id().clone(),
                        cause,
                    }));
                }
                Err(RepositoryError::Storage(e)) => return Err(SequenceError::Storage(e)),
            }
        }

        Ok(report)
    }
}
