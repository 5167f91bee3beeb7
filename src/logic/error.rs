use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::logic::validate::ValidationError;
use crate::model::{ChangeAction, EntityKind, Id, MalformedPayload, OnestopId};

/// Why a single change could not be applied. These are reported as data, never raised as faults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FailureCause {
    #[error("{onestop_id} does not resolve to an existing {expected}")]
    #[serde(rename_all = "camelCase")]
    UnresolvedIdentifier {
        onestop_id: OnestopId,
        expected: EntityKind,
    },
    #[error("{onestop_id} failed validation: {}", summarize(.errors))]
    #[serde(rename_all = "camelCase")]
    Validation {
        onestop_id: OnestopId,
        errors: Vec<ValidationError>,
    },
    #[error("{onestop_id} not found")]
    #[serde(rename_all = "camelCase")]
    NotFound { onestop_id: OnestopId },
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The first offending change of a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyFailure {
    /// Position in the linear sequence across all payloads
    pub position: usize,
    pub payload_id: Id,
    /// Index of the change within its own payload
    pub change_index: usize,
    pub action: ChangeAction,
    pub onestop_id: OnestopId,
    pub cause: FailureCause,
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "change #{} ({} {}) failed: {}",
            self.position, self.action, self.onestop_id, self.cause
        )
    }
}

/// Errors from entity repository calls
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Failed(#[from] FailureCause),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn unresolved(onestop_id: &OnestopId, expected: EntityKind) -> Self {
        FailureCause::UnresolvedIdentifier {
            onestop_id: onestop_id.clone(),
            expected,
        }
        .into()
    }

    pub fn not_found(onestop_id: &OnestopId) -> Self {
        FailureCause::NotFound {
            onestop_id: onestop_id.clone(),
        }
        .into()
    }

    pub fn validation(onestop_id: &OnestopId, errors: Vec<ValidationError>) -> Self {
        FailureCause::Validation {
            onestop_id: onestop_id.clone(),
            errors,
        }
        .into()
    }
}

/// Errors surfaced by the apply engine to its callers
#[derive(Debug, Error)]
pub enum ChangesetError {
    #[error(transparent)]
    MalformedPayload(#[from] MalformedPayload),
    #[error("cannot update a Changeset that has already been applied")]
    AlreadyApplied,
    #[error("changeset {0} not found")]
    ChangesetNotFound(Id),
    #[error("changeset could not be applied: {0}")]
    ApplyFailed(ApplyFailure),
    #[error("reverting an applied changeset is not supported")]
    RevertUnsupported,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ChangesetError {
    /// Stable machine-readable name of the error
    pub fn kind(&self) -> &'static str {
        match self {
            ChangesetError::MalformedPayload(_) => "malformedPayload",
            ChangesetError::AlreadyApplied => "alreadyApplied",
            ChangesetError::ChangesetNotFound(_) => "changesetNotFound",
            ChangesetError::ApplyFailed(failure) => match failure.cause {
                FailureCause::UnresolvedIdentifier { .. } => "unresolvedIdentifier",
                FailureCause::Validation { .. } => "validationFailure",
                FailureCause::NotFound { .. } => "notFound",
            },
            ChangesetError::RevertUnsupported => "revertUnsupported",
            ChangesetError::Storage(_) => "storage",
        }
    }
}
