use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{generate_id, Change, Id, PayloadBody};

/// A proposed batch of edits, applied atomically or not at all
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: Id,
    pub notes: Option<String>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Changeset {
    pub fn new(notes: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            notes,
            applied: false,
            applied_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Flip into the terminal applied state. `applied` and `applied_at` always move together.
    pub fn mark_applied(&mut self, at: DateTime<Utc>) {
        self.applied = true;
        self.applied_at = Some(at);
        self.updated_at = at;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One ordered batch of changes attached to a changeset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub id: Id,
    pub changeset_id: Id,
    /// 0-based append order within the changeset
    pub position: i32,
    pub payload: PayloadBody,
    /// SHA-256 of the serialized changes
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl ChangePayload {
    pub fn new(changeset_id: Id, position: i32, payload: PayloadBody) -> anyhow::Result<Self> {
        let digest = Self::calculate_digest(&changeset_id, position, &payload)?;
        Ok(Self {
            id: generate_id(),
            changeset_id,
            position,
            payload,
            digest,
            created_at: Utc::now(),
        })
    }

    pub fn changes(&self) -> &[Change] {
        &self.payload.changes
    }

    fn calculate_digest(
        changeset_id: &str,
        position: i32,
        payload: &PayloadBody,
    ) -> anyhow::Result<String> {
        use sha2::{Digest, Sha256};

        let serialized = serde_json::to_string(payload)?;
        let mut hasher = Sha256::new();
        hasher.update(format!("changeset:{}\n", changeset_id));
        hasher.update(format!("position:{}\n", position));
        hasher.update(format!("changes:{}\n", serialized));

        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WhenToApply {
    /// Leave the changeset for an explicit apply
    Later,
    /// Apply right after creation if a trial run succeeds
    InstantlyIfClean,
}

impl Default for WhenToApply {
    fn default() -> Self {
        WhenToApply::Later
    }
}

/// Changeset creation request, after the payload has been parsed
#[derive(Debug, Clone, Default)]
pub struct NewChangeset {
    pub notes: Option<String>,
    pub payload: Option<PayloadBody>,
    pub when_to_apply: WhenToApply,
}

/// Changeset update request; only notes are editable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesetUpdate {
    pub notes: Option<String>,
}

/// A changeset with its payloads, for display
#[derive(Debug, Clone, Serialize)]
pub struct ChangesetDetail {
    #[serde(flatten)]
    pub changeset: Changeset,
    /// Every change of every payload, in apply order
    pub payload: PayloadBody,
    pub payloads: Vec<PayloadSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadSummary {
    pub id: Id,
    pub position: i32,
    pub digest: String,
    pub changes: usize,
    pub created_at: DateTime<Utc>,
}

impl ChangesetDetail {
    pub fn new(changeset: Changeset, mut payloads: Vec<ChangePayload>) -> Self {
        payloads.sort_by_key(|p| (p.position, p.created_at));
        let summaries = payloads
            .iter()
            .map(|p| PayloadSummary {
                id: p.id.clone(),
                position: p.position,
                digest: p.digest.clone(),
                changes: p.changes().len(),
                created_at: p.created_at,
            })
            .collect();
        let changes = payloads
            .into_iter()
            .flat_map(|p| p.payload.changes)
            .collect();

        Self {
            changeset,
            payload: PayloadBody::new(changes),
            payloads: summaries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mark_applied_sets_both_fields() {
        let mut changeset = Changeset::new(Some("initial import".to_string()));
        assert!(!changeset.applied);
        assert!(changeset.applied_at.is_none());

        let at = Utc::now();
        changeset.mark_applied(at);
        assert!(changeset.applied);
        assert_eq!(changeset.applied_at, Some(at));
    }

    #[test]
    fn test_payload_digest_is_stable() {
        let body = PayloadBody::from_value(json!({
            "changes": [{"action": "destroy", "stop": {"onestopId": "s-5b2-Fake"}}]
        }))
        .unwrap();

        let a = ChangePayload::new("cs-1".to_string(), 0, body.clone()).unwrap();
        let b = ChangePayload::new("cs-1".to_string(), 0, body.clone()).unwrap();
        let c = ChangePayload::new("cs-1".to_string(), 1, body).unwrap();

        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn test_detail_merges_payloads_in_order() {
        let changeset = Changeset::new(None);
        let body = |id: &str| {
            PayloadBody::from_value(json!({
                "changes": [{"action": "destroy", "stop": {"onestopId": id}}]
            }))
            .unwrap()
        };
        let second = ChangePayload::new(changeset.id.clone(), 1, body("s-5b2-Second")).unwrap();
        let first = ChangePayload::new(changeset.id.clone(), 0, body("s-5b2-First")).unwrap();

        let detail = ChangesetDetail::new(changeset, vec![second, first]);
        let ids: Vec<_> = detail
            .payload
            .changes
            .iter()
            .map(|c| c.onestop_id().to_string())
            .collect();
        assert_eq!(ids, vec!["s-5b2-First", "s-5b2-Second"]);
        assert_eq!(detail.payloads[1].position, 1);

        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["applied"], false);
        assert_eq!(value["payload"]["changes"].as_array().unwrap().len(), 2);
    }
}
