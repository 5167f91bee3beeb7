use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::model::{
    ChangePayload, Changeset, Edge, EdgeKey, EdgeKind, Entity, EntityKind, Id, OnestopId,
    PayloadBody, Tags,
};
use crate::store::traits::{
    ChangesetScope, ChangesetStore, EntityScope, EntityStore, Store, StoreTransaction,
    TransactionalStore,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }
}

fn changeset_from_row(row: &PgRow) -> Result<Changeset> {
    Ok(Changeset {
        id: row.try_get("id")?,
        notes: row.try_get("notes")?,
        applied: row.try_get("applied")?,
        applied_at: row.try_get("applied_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payload_from_row(row: &PgRow) -> Result<ChangePayload> {
    let payload: serde_json::Value = row.try_get("payload")?;
    let payload: PayloadBody =
        serde_json::from_value(payload).context("Failed to deserialize change payload")?;

    Ok(ChangePayload {
        id: row.try_get("id")?,
        changeset_id: row.try_get("changeset_id")?,
        position: row.try_get("position")?,
        payload,
        digest: row.try_get("digest")?,
        created_at: row.try_get("created_at")?,
    })
}

fn entity_from_row(row: &PgRow) -> Result<Entity> {
    let data: serde_json::Value = row.try_get("data")?;
    serde_json::from_value(data).context("Failed to deserialize entity data")
}

fn edge_from_row(row: &PgRow) -> Result<Edge> {
    let kind: String = row.try_get("kind")?;
    let kind = EdgeKind::parse(&kind)
        .ok_or_else(|| anyhow::anyhow!("Unknown edge kind in storage: {}", kind))?;
    let from: String = row.try_get("from_onestop_id")?;
    let to: String = row.try_get("to_onestop_id")?;
    let tags: serde_json::Value = row.try_get("tags")?;

    Ok(Edge {
        key: EdgeKey::new(kind, OnestopId::parse(&from)?, OnestopId::parse(&to)?),
        tags: serde_json::from_value::<Tags>(tags).context("Failed to deserialize edge tags")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const CHANGESET_COLUMNS: &str = "id, notes, applied, applied_at, created_at, updated_at";
const PAYLOAD_COLUMNS: &str = "id, changeset_id, position, payload, digest, created_at";
const EDGE_COLUMNS: &str =
    "kind, from_onestop_id, to_onestop_id, tags, created_at, updated_at";

#[async_trait::async_trait]
impl ChangesetStore for PostgresStore {
    async fn get_changeset(&self, id: &Id) -> Result<Option<Changeset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM changesets WHERE id = $1",
            CHANGESET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch changeset")?;

        row.as_ref().map(changeset_from_row).transpose()
    }

    async fn list_changesets(&self) -> Result<Vec<Changeset>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM changesets ORDER BY created_at, id",
            CHANGESET_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list changesets")?;

        rows.iter().map(changeset_from_row).collect()
    }

    async fn list_payloads(&self, changeset_id: &Id) -> Result<Vec<ChangePayload>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM change_payloads WHERE changeset_id = $1 ORDER BY position, created_at",
            PAYLOAD_COLUMNS
        ))
        .bind(changeset_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list change payloads")?;

        rows.iter().map(payload_from_row).collect()
    }
}

#[async_trait::async_trait]
impl EntityStore for PostgresStore {
    async fn get_entity(&self, onestop_id: &OnestopId) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT data FROM entities WHERE onestop_id = $1")
            .bind(onestop_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch entity")?;

        row.as_ref().map(entity_from_row).transpose()
    }

    async fn list_edges_for(&self, onestop_id: &OnestopId) -> Result<Vec<Edge>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entity_edges WHERE from_onestop_id = $1 OR to_onestop_id = $1 ORDER BY kind, from_onestop_id, to_onestop_id",
            EDGE_COLUMNS
        ))
        .bind(onestop_id.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entity edges")?;

        rows.iter().map(edge_from_row).collect()
    }

    async fn count_entities(&self, kind: Option<EntityKind>) -> Result<i64> {
        let count: i64 = match kind {
            Some(kind) => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entities WHERE kind = $1")
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await,
            None => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entities")
                .fetch_one(&self.pool)
                .await,
        }
        .context("Failed to count entities")?;

        Ok(count)
    }
}

/// A PostgreSQL transaction. sqlx rolls it back when dropped uncommitted.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl TransactionalStore for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(PostgresTransaction { tx })
    }
}

#[async_trait::async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }
}

#[async_trait::async_trait]
impl EntityScope for PostgresTransaction {
    async fn lock_onestop_id(&mut self, onestop_id: &OnestopId) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(onestop_id.as_str())
            .execute(&mut *self.tx)
            .await
            .context("Failed to lock onestop id")?;
        Ok(())
    }

    async fn find_entity(&mut self, onestop_id: &OnestopId) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT data FROM entities WHERE onestop_id = $1")
            .bind(onestop_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch entity")?;

        row.as_ref().map(entity_from_row).transpose()
    }

    async fn put_entity(&mut self, entity: &Entity) -> Result<()> {
        let data = serde_json::to_value(entity).context("Failed to serialize entity")?;

        sqlx::query(
            r#"
            INSERT INTO entities (onestop_id, kind, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (onestop_id) DO UPDATE SET
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(entity.onestop_id().as_str())
        .bind(entity.kind().as_str())
        .bind(data)
        .bind(entity.created_at())
        .bind(entity.updated_at())
        .execute(&mut *self.tx)
        .await
        .context("Failed to upsert entity")?;

        Ok(())
    }

    async fn delete_entity(&mut self, onestop_id: &OnestopId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE onestop_id = $1")
            .bind(onestop_id.as_str())
            .execute(&mut *self.tx)
            .await
            .context("Failed to delete entity")?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_edge(&mut self, key: &EdgeKey) -> Result<Option<Edge>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM entity_edges WHERE kind = $1 AND from_onestop_id = $2 AND to_onestop_id = $3",
            EDGE_COLUMNS
        ))
        .bind(key.kind.as_str())
        .bind(key.from.as_str())
        .bind(key.to.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch entity edge")?;

        row.as_ref().map(edge_from_row).transpose()
    }

    async fn put_edge(&mut self, edge: &Edge) -> Result<()> {
        let tags = serde_json::to_value(&edge.tags).context("Failed to serialize edge tags")?;

        sqlx::query(
            r#"
            INSERT INTO entity_edges (kind, from_onestop_id, to_onestop_id, tags, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (kind, from_onestop_id, to_onestop_id) DO UPDATE SET
                tags = EXCLUDED.tags,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(edge.key.kind.as_str())
        .bind(edge.key.from.as_str())
        .bind(edge.key.to.as_str())
        .bind(tags)
        .bind(edge.created_at)
        .bind(edge.updated_at)
        .execute(&mut *self.tx)
        .await
        .context("Failed to upsert entity edge")?;

        Ok(())
    }

    async fn delete_edge(&mut self, key: &EdgeKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM entity_edges WHERE kind = $1 AND from_onestop_id = $2 AND to_onestop_id = $3",
        )
        .bind(key.kind.as_str())
        .bind(key.from.as_str())
        .bind(key.to.as_str())
        .execute(&mut *self.tx)
        .await
        .context("Failed to delete entity edge")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_edges_touching(&mut self, onestop_id: &OnestopId) -> Result<Vec<EdgeKey>> {
        let rows = sqlx::query(&format!(
            "DELETE FROM entity_edges WHERE from_onestop_id = $1 OR to_onestop_id = $1 RETURNING {}",
            EDGE_COLUMNS
        ))
        .bind(onestop_id.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to delete dangling entity edges")?;

        rows.iter()
            .map(|row| edge_from_row(row).map(|edge| edge.key))
            .collect()
    }

    async fn retire_onestop_id(&mut self, onestop_id: &OnestopId) -> Result<()> {
        sqlx::query(
            "INSERT INTO retired_onestop_ids (onestop_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(onestop_id.as_str())
        .execute(&mut *self.tx)
        .await
        .context("Failed to retire onestop id")?;
        Ok(())
    }

    async fn is_retired(&mut self, onestop_id: &OnestopId) -> Result<bool> {
        let retired = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM retired_onestop_ids WHERE onestop_id = $1)",
        )
        .bind(onestop_id.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to check retired onestop id")?;

        Ok(retired)
    }
}

#[async_trait::async_trait]
impl ChangesetScope for PostgresTransaction {
    async fn lock_changeset(&mut self, id: &Id) -> Result<Option<Changeset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM changesets WHERE id = $1 FOR UPDATE",
            CHANGESET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to lock changeset")?;

        row.as_ref().map(changeset_from_row).transpose()
    }

    async fn scoped_payloads(&mut self, changeset_id: &Id) -> Result<Vec<ChangePayload>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM change_payloads WHERE changeset_id = $1 ORDER BY position, created_at",
            PAYLOAD_COLUMNS
        ))
        .bind(changeset_id)
        .fetch_all(&mut *self.tx)
        .await
        .context("Failed to list change payloads")?;

        rows.iter().map(payload_from_row).collect()
    }

    async fn insert_changeset(&mut self, changeset: &Changeset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO changesets (id, notes, applied, applied_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&changeset.id)
        .bind(&changeset.notes)
        .bind(changeset.applied)
        .bind(changeset.applied_at)
        .bind(changeset.created_at)
        .bind(changeset.updated_at)
        .execute(&mut *self.tx)
        .await
        .context("Failed to create changeset")?;

        Ok(())
    }

    async fn update_changeset(&mut self, changeset: &Changeset) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE changesets
            SET notes = $2, applied = $3, applied_at = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(&changeset.id)
        .bind(&changeset.notes)
        .bind(changeset.applied)
        .bind(changeset.applied_at)
        .bind(changeset.updated_at)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update changeset")?;

        Ok(())
    }

    async fn insert_payload(&mut self, payload: &ChangePayload) -> Result<()> {
        let body =
            serde_json::to_value(&payload.payload).context("Failed to serialize change payload")?;

        sqlx::query(
            r#"
            INSERT INTO change_payloads (id, changeset_id, position, payload, digest, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&payload.id)
        .bind(&payload.changeset_id)
        .bind(payload.position)
        .bind(body)
        .bind(&payload.digest)
        .bind(payload.created_at)
        .execute(&mut *self.tx)
        .await
        .context("Failed to create change payload")?;

        Ok(())
    }
}

impl Store for PostgresStore {}
