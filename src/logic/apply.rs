use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::logic::error::{ApplyFailure, ChangesetError};
use crate::logic::sequencer::{PayloadSequencer, RunReport, SequenceError};
use crate::model::{
    ChangePayload, Changeset, ChangesetDetail, ChangesetUpdate, Edge, Entity, Id, NewChangeset,
    OnestopId, PayloadBody, WhenToApply,
};
use crate::store::traits::{
    ChangesetScope, ChangesetStore, EntityStore, Store, StoreTransaction, TransactionalStore,
};

/// A committed apply: the changeset in its applied state and what the run did
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub changeset: Changeset,
    #[serde(flatten)]
    pub report: RunReport,
}

/// An entity as currently persisted, with every edge touching it
#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub entity: Entity,
    pub edges: Vec<Edge>,
}

enum RunOutcome {
    Succeeded {
        changeset: Changeset,
        report: RunReport,
    },
    Failed(ApplyFailure),
}

/// Owns the changeset lifecycle: creation, appends, trial runs and applies.
///
/// Every check or apply runs the full payload sequence inside one store
/// transaction. A trial always rolls back. An apply commits only if every change
/// succeeded, flipping `applied` in the same transaction.
pub struct ApplyEngine<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for ApplyEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> ApplyEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Trial run. Never mutates durable state; an applied changeset checks false.
    pub async fn check(&self, id: &Id) -> Result<bool, ChangesetError> {
        match self.run(id, false).await {
            Ok(RunOutcome::Succeeded { .. }) => Ok(true),
            Ok(RunOutcome::Failed(_)) => Ok(false),
            Err(ChangesetError::AlreadyApplied) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn apply(&self, id: &Id) -> Result<ApplyReport, ChangesetError> {
        match self.run(id, true).await? {
            RunOutcome::Succeeded { changeset, report } => Ok(ApplyReport { changeset, report }),
            RunOutcome::Failed(failure) => Err(ChangesetError::ApplyFailed(failure)),
        }
    }

    async fn run(&self, id: &Id, commit: bool) -> Result<RunOutcome, ChangesetError> {
        let mode = if commit { "apply" } else { "check" };
        let mut tx = self.store.begin().await?;

        let mut changeset = tx
            .lock_changeset(id)
            .await?
            .ok_or_else(|| ChangesetError::ChangesetNotFound(id.clone()))?;
        if changeset.applied {
            return Err(ChangesetError::AlreadyApplied);
        }

        let payloads = tx.scoped_payloads(id).await?;
        let sequencer = PayloadSequencer::new(&payloads);
        info!(
            "Starting {} of changeset {} ({} payloads, {} changes)",
            mode,
            id,
            payloads.len(),
            sequencer.len()
        );

        let outcome = sequencer.run(&mut tx).await;
        match outcome {
            Ok(report) => {
                if commit {
                    changeset.mark_applied(Utc::now());
                    tx.update_changeset(&changeset).await?;
                    tx.commit().await?;
                } else {
                    tx.rollback().await?;
                }
                info!(
                    "Finished {} of changeset {}: {} changes succeeded",
                    mode, id, report.operations
                );
                Ok(RunOutcome::Succeeded { changeset, report })
            }
            Err(SequenceError::Failed(failure)) => {
                tx.rollback().await?;
                warn!("{} of changeset {} rolled back: {}", mode, id, failure);
                Ok(RunOutcome::Failed(failure))
            }
            // dropping the transaction discards the partial run
            Err(SequenceError::Storage(e)) => Err(ChangesetError::Storage(e)),
        }
    }

    /// Create a changeset, optionally with an initial payload. In
    /// `instantlyIfClean` mode a successful trial is followed by an apply.
    pub async fn create(&self, request: NewChangeset) -> Result<Changeset, ChangesetError> {
        if let Some(payload) = &request.payload {
            payload.validate()?;
        }

        let changeset = Changeset::new(request.notes);
        let mut tx = self.store.begin().await?;
        tx.insert_changeset(&changeset).await?;
        if let Some(payload) = request.payload {
            let payload = ChangePayload::new(changeset.id.clone(), 0, payload)?;
            tx.insert_payload(&payload).await?;
        }
        tx.commit().await?;
        info!("Created changeset {}", changeset.id);

        match request.when_to_apply {
            WhenToApply::Later => Ok(changeset),
            WhenToApply::InstantlyIfClean => self.apply_if_clean(changeset).await,
        }
    }

    async fn apply_if_clean(&self, changeset: Changeset) -> Result<Changeset, ChangesetError> {
        if !self.check(&changeset.id).await? {
            info!("Changeset {} left unapplied: trial failed", changeset.id);
            return Ok(changeset);
        }

        match self.apply(&changeset.id).await {
            Ok(applied) => Ok(applied.changeset),
            // the store moved between the trial and the apply
            Err(ChangesetError::ApplyFailed(failure)) => {
                warn!(
                    "Changeset {} passed its trial but failed to apply: {}",
                    changeset.id, failure
                );
                Ok(changeset)
            }
            Err(e) => Err(e),
        }
    }

    /// Attach another payload after the existing ones
    pub async fn append(&self, id: &Id, payload: PayloadBody) -> Result<Changeset, ChangesetError> {
        payload.validate()?;

        let mut tx = self.store.begin().await?;
        let mut changeset = tx
            .lock_changeset(id)
            .await?
            .ok_or_else(|| ChangesetError::ChangesetNotFound(id.clone()))?;
        if changeset.applied {
            return Err(ChangesetError::AlreadyApplied);
        }

        let position = tx
            .scoped_payloads(id)
            .await?
            .iter()
            .map(|p| p.position + 1)
            .max()
            .unwrap_or(0);
        let payload = ChangePayload::new(id.clone(), position, payload)?;
        tx.insert_payload(&payload).await?;

        changeset.touch();
        tx.update_changeset(&changeset).await?;
        tx.commit().await?;

        info!(
            "Appended payload {} to changeset {} at position {}",
            payload.id, id, position
        );
        Ok(changeset)
    }

    pub async fn update(
        &self,
        id: &Id,
        update: ChangesetUpdate,
    ) -> Result<Changeset, ChangesetError> {
        let mut tx = self.store.begin().await?;
        let mut changeset = tx
            .lock_changeset(id)
            .await?
            .ok_or_else(|| ChangesetError::ChangesetNotFound(id.clone()))?;
        if changeset.applied {
            return Err(ChangesetError::AlreadyApplied);
        }

        changeset.notes = update.notes;
        changeset.touch();
        tx.update_changeset(&changeset).await?;
        tx.commit().await?;

        Ok(changeset)
    }

    /// Not supported: there is no defined inverse for an applied changeset
    pub async fn revert(&self, id: &Id) -> Result<Changeset, ChangesetError> {
        self.get(id).await?;
        Err(ChangesetError::RevertUnsupported)
    }

    pub async fn get(&self, id: &Id) -> Result<Changeset, ChangesetError> {
        self.store
            .get_changeset(id)
            .await?
            .ok_or_else(|| ChangesetError::ChangesetNotFound(id.clone()))
    }

    pub async fn list(&self) -> Result<Vec<Changeset>, ChangesetError> {
        Ok(self.store.list_changesets().await?)
    }

    pub async fn payloads(&self, id: &Id) -> Result<Vec<ChangePayload>, ChangesetError> {
        self.get(id).await?;
        Ok(self.store.list_payloads(id).await?)
    }

    pub async fn detail(&self, id: &Id) -> Result<ChangesetDetail, ChangesetError> {
        let changeset = self.get(id).await?;
        let payloads = self.store.list_payloads(id).await?;
        Ok(ChangesetDetail::new(changeset, payloads))
    }

    /// Committed state of an entity, outside of any run
    pub async fn lookup(&self, onestop_id: &OnestopId) -> Result<Option<EntityRecord>, ChangesetError> {
        let Some(entity) = self.store.get_entity(onestop_id).await? else {
            return Ok(None);
        };
        let edges = self.store.list_edges_for(onestop_id).await?;
        Ok(Some(EntityRecord { entity, edges }))
    }
}
