//! PostgreSQL-backed line and content stores.
//!
//! Every structural mutation runs in one transaction that first takes
//! `FOR UPDATE` over the note's full line set, fully serializing structural
//! changes per note across connections and processes. Position shifts are
//! applied one row at a time in the collision-free order computed by
//! `note_core::plan`, so the unique index on (note_id, order_number) holds
//! at every point of the transaction. An early return drops the transaction
//! and rolls the whole mutation back.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Transaction};
use tracing::error;
use uuid::Uuid;

use note_core::model::{Content, ContentKind, Line, Mention, Note, Resource};
use note_core::order::OrderNumber;
use note_core::plan;
use note_core::store::{ContentStore, LineStore, Result, StoreError};

fn backend(e: tokio_postgres::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

async fn connect_client(url: &str) -> Result<Arc<Mutex<Client>>> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await.map_err(backend)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("postgres connection error: {e}");
        }
    });
    Ok(Arc::new(Mutex::new(client)))
}

const LINE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS notes (
    id UUID PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS note_user_relations (
    note_id UUID NOT NULL REFERENCES notes (id) ON DELETE CASCADE,
    user_id UUID NOT NULL,
    PRIMARY KEY (note_id, user_id)
);

CREATE TABLE IF NOT EXISTS note_community_relations (
    note_id UUID NOT NULL REFERENCES notes (id) ON DELETE CASCADE,
    community_id UUID NOT NULL,
    PRIMARY KEY (note_id, community_id)
);

CREATE TABLE IF NOT EXISTS lines (
    id UUID PRIMARY KEY,
    note_id UUID NOT NULL REFERENCES notes (id) ON DELETE CASCADE,
    order_number INTEGER NOT NULL,
    UNIQUE (note_id, order_number)
);
";

/// Relational store for notes and their ordered lines.
#[derive(Clone)]
pub struct PostgresLineStore {
    client: Arc<Mutex<Client>>,
}

impl PostgresLineStore {
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self {
            client: connect_client(url).await?,
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .lock()
            .await
            .batch_execute(LINE_SCHEMA)
            .await
            .map_err(backend)
    }

    fn row_to_line(note_id: Uuid, row: &tokio_postgres::Row) -> Result<Line> {
        let order: i32 = row.get(1);
        let order = u32::try_from(order)
            .ok()
            .and_then(|o| OrderNumber::new(o).ok())
            .ok_or_else(|| StoreError::Backend(format!("corrupt order_number {order}")))?;
        Ok(Line {
            id: row.get(0),
            note_id,
            order,
            property: None,
        })
    }

    async fn require_note(tx: &Transaction<'_>, note_id: Uuid) -> Result<()> {
        tx.query_opt("SELECT id FROM notes WHERE id = $1", &[&note_id])
            .await
            .map_err(backend)?
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("note {note_id}")))
    }

    /// Select-for-update over the note's full line set; the serialization
    /// point for every structural mutation.
    async fn lock_lines(tx: &Transaction<'_>, note_id: Uuid) -> Result<()> {
        tx.execute(
            "SELECT id FROM lines WHERE note_id = $1 ORDER BY order_number ASC FOR UPDATE",
            &[&note_id],
        )
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn last_order(tx: &Transaction<'_>, note_id: Uuid) -> Result<u32> {
        let row = tx
            .query_opt(
                "SELECT order_number FROM lines WHERE note_id = $1 \
                 ORDER BY order_number DESC LIMIT 1",
                &[&note_id],
            )
            .await
            .map_err(backend)?;
        Ok(row.map(|r| r.get::<_, i32>(0) as u32).unwrap_or(0))
    }

    async fn reassign(
        tx: &Transaction<'_>,
        note_id: Uuid,
        shifts: &[plan::ShiftStep],
    ) -> Result<()> {
        for shift in shifts {
            tx.execute(
                "UPDATE lines SET order_number = $3 WHERE note_id = $1 AND order_number = $2",
                &[&note_id, &(shift.from as i32), &(shift.to as i32)],
            )
            .await
            .map_err(backend)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LineStore for PostgresLineStore {
    async fn create_note(&self, note: &Note, mention: &Mention) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;

        tx.execute("INSERT INTO notes (id) VALUES ($1)", &[&note.id])
            .await
            .map_err(backend)?;

        match mention.resource {
            Resource::User => {
                tx.execute(
                    "INSERT INTO note_user_relations (note_id, user_id) VALUES ($1, $2)",
                    &[&note.id, &mention.id],
                )
                .await
                .map_err(backend)?;
            }
            Resource::Community => {
                tx.execute(
                    "INSERT INTO note_community_relations (note_id, community_id) VALUES ($1, $2)",
                    &[&note.id, &mention.id],
                )
                .await
                .map_err(backend)?;
            }
            other => {
                return Err(StoreError::Backend(format!(
                    "resource cannot own a note: {other}"
                )));
            }
        }

        tx.commit().await.map_err(backend)
    }

    async fn get_note(&self, id: Uuid) -> Result<Option<Note>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt("SELECT id FROM notes WHERE id = $1", &[&id])
            .await
            .map_err(backend)?;
        Ok(row.map(|r| Note { id: r.get(0) }))
    }

    async fn get_note_by_resource(&self, mention: &Mention) -> Result<Option<Note>> {
        let sql = match mention.resource {
            Resource::User => {
                "SELECT notes.id FROM notes \
                 INNER JOIN note_user_relations ON notes.id = note_user_relations.note_id \
                 WHERE note_user_relations.user_id = $1 \
                 ORDER BY notes.created_at ASC LIMIT 1"
            }
            Resource::Community => {
                "SELECT notes.id FROM notes \
                 INNER JOIN note_community_relations ON notes.id = note_community_relations.note_id \
                 WHERE note_community_relations.community_id = $1 \
                 ORDER BY notes.created_at ASC LIMIT 1"
            }
            _ => return Ok(None),
        };

        let client = self.client.lock().await;
        let row = client
            .query_opt(sql, &[&mention.id])
            .await
            .map_err(backend)?;
        Ok(row.map(|r| Note { id: r.get(0) }))
    }

    async fn list_lines(&self, note_id: Uuid) -> Result<Vec<Line>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT id, order_number FROM lines WHERE note_id = $1 \
                 ORDER BY order_number ASC",
                &[&note_id],
            )
            .await
            .map_err(backend)?;
        rows.iter().map(|r| Self::row_to_line(note_id, r)).collect()
    }

    async fn get_line_by_order(&self, note_id: Uuid, order: OrderNumber) -> Result<Option<Line>> {
        let client = self.client.lock().await;
        let row = client
            .query_opt(
                "SELECT id, order_number FROM lines WHERE note_id = $1 AND order_number = $2",
                &[&note_id, &(order.get() as i32)],
            )
            .await
            .map_err(backend)?;
        row.map(|r| Self::row_to_line(note_id, &r)).transpose()
    }

    async fn insert_line(
        &self,
        note_id: Uuid,
        line_id: Uuid,
        to: OrderNumber,
    ) -> Result<OrderNumber> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;

        Self::require_note(&tx, note_id).await?;
        Self::lock_lines(&tx, note_id).await?;

        let last = Self::last_order(&tx, note_id).await?;
        let insert = plan::insert_plan(last, to.get());
        Self::reassign(&tx, note_id, &insert.shifts).await?;

        tx.execute(
            "INSERT INTO lines (id, note_id, order_number) VALUES ($1, $2, $3)",
            &[&line_id, &note_id, &(insert.effective as i32)],
        )
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        OrderNumber::new(insert.effective).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn move_line(&self, note_id: Uuid, src: OrderNumber, dst: OrderNumber) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;

        Self::require_note(&tx, note_id).await?;
        Self::lock_lines(&tx, note_id).await?;

        let last = Self::last_order(&tx, note_id).await?;
        let Some(plan) = plan::move_plan(last, src.get(), dst.get()) else {
            // A source beyond the end is silently discarded.
            return tx.commit().await.map_err(backend);
        };

        // Three-phase: park the moving line outside the valid range, close
        // the window toward the source, land the parked line on the target.
        tx.execute(
            "UPDATE lines SET order_number = $3 WHERE note_id = $1 AND order_number = $2",
            &[&note_id, &(plan.src as i32), &(plan::PARKED as i32)],
        )
        .await
        .map_err(backend)?;

        Self::reassign(&tx, note_id, &plan.shifts).await?;

        tx.execute(
            "UPDATE lines SET order_number = $3 WHERE note_id = $1 AND order_number = $2",
            &[&note_id, &(plan::PARKED as i32), &(plan.dst as i32)],
        )
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn delete_line(&self, note_id: Uuid, order: OrderNumber) -> Result<Line> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;

        Self::require_note(&tx, note_id).await?;
        Self::lock_lines(&tx, note_id).await?;

        let row = tx
            .query_opt(
                "SELECT id, order_number FROM lines WHERE note_id = $1 AND order_number = $2",
                &[&note_id, &(order.get() as i32)],
            )
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(format!("line at order {order}")))?;
        let removed = Self::row_to_line(note_id, &row)?;

        let last = Self::last_order(&tx, note_id).await?;
        tx.execute("DELETE FROM lines WHERE id = $1", &[&removed.id])
            .await
            .map_err(backend)?;
        Self::reassign(&tx, note_id, &plan::delete_plan(last, order.get())).await?;

        tx.commit().await.map_err(backend)?;
        Ok(removed)
    }
}

const CONTENT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contents (
    id UUID PRIMARY KEY,
    content_type TEXT NOT NULL,
    bin BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS content_line_relations (
    content_id UUID NOT NULL REFERENCES contents (id) ON DELETE CASCADE,
    line_id UUID NOT NULL,
    PRIMARY KEY (content_id, line_id)
);

CREATE TABLE IF NOT EXISTS content_topic_relations (
    content_id UUID NOT NULL REFERENCES contents (id) ON DELETE CASCADE,
    topic_id UUID NOT NULL,
    PRIMARY KEY (content_id, topic_id)
);

CREATE TABLE IF NOT EXISTS content_post_relations (
    content_id UUID NOT NULL REFERENCES contents (id) ON DELETE CASCADE,
    post_id UUID NOT NULL,
    PRIMARY KEY (content_id, post_id)
);
";

/// Which relation table attaches contents to a resource kind.
fn relation_table(resource: Resource) -> Option<(&'static str, &'static str)> {
    match resource {
        Resource::Line => Some(("content_line_relations", "line_id")),
        Resource::Topic => Some(("content_topic_relations", "topic_id")),
        Resource::Post => Some(("content_post_relations", "post_id")),
        _ => None,
    }
}

fn require_relation(mention: &Mention) -> Result<(&'static str, &'static str)> {
    relation_table(mention.resource).ok_or_else(|| {
        StoreError::Backend(format!("contents cannot attach to {}", mention.resource))
    })
}

/// Relational store owning content blocks and their mention relations.
#[derive(Clone)]
pub struct PostgresContentStore {
    client: Arc<Mutex<Client>>,
}

impl PostgresContentStore {
    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self {
            client: connect_client(url).await?,
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .lock()
            .await
            .batch_execute(CONTENT_SCHEMA)
            .await
            .map_err(backend)
    }

    async fn insert_all(
        tx: &Transaction<'_>,
        contents: &[Content],
        mention: &Mention,
    ) -> Result<()> {
        let (table, column) = require_relation(mention)?;
        for content in contents {
            tx.execute(
                "INSERT INTO contents (id, content_type, bin) VALUES ($1, $2, $3)",
                &[&content.id, &content.kind.as_str(), &content.value],
            )
            .await
            .map_err(backend)?;
            tx.execute(
                &format!("INSERT INTO {table} (content_id, {column}) VALUES ($1, $2)"),
                &[&content.id, &mention.id],
            )
            .await
            .map_err(backend)?;
        }
        Ok(())
    }

    async fn delete_all(tx: &Transaction<'_>, mention: &Mention) -> Result<()> {
        let (table, column) = require_relation(mention)?;
        // Relations follow via ON DELETE CASCADE.
        tx.execute(
            &format!(
                "DELETE FROM contents WHERE id IN \
                 (SELECT content_id FROM {table} WHERE {column} = $1)"
            ),
            &[&mention.id],
        )
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for PostgresContentStore {
    async fn create(&self, contents: &[Content], mention: &Mention) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;
        Self::insert_all(&tx, contents, mention).await?;
        tx.commit().await.map_err(backend)
    }

    async fn delete_and_create(&self, contents: &[Content], mention: &Mention) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;
        Self::delete_all(&tx, mention).await?;
        Self::insert_all(&tx, contents, mention).await?;
        tx.commit().await.map_err(backend)
    }

    async fn list_by_line(&self, line_id: Uuid) -> Result<Vec<Content>> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT contents.id, contents.content_type, contents.bin FROM contents \
                 INNER JOIN content_line_relations ON contents.id = content_line_relations.content_id \
                 WHERE content_line_relations.line_id = $1 \
                 ORDER BY contents.created_at ASC",
                &[&line_id],
            )
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| {
                let kind: ContentKind = row
                    .get::<_, String>(1)
                    .parse()
                    .map_err(|e| StoreError::Backend(format!("corrupt content row: {e}")))?;
                Ok(Content {
                    id: row.get(0),
                    kind,
                    value: row.get(2),
                })
            })
            .collect()
    }

    async fn delete_by_resource(&self, mention: &Mention) -> Result<()> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(backend)?;
        Self::delete_all(&tx, mention).await?;
        tx.commit().await.map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_tables_cover_mentionable_resources() {
        assert_eq!(
            relation_table(Resource::Line),
            Some(("content_line_relations", "line_id"))
        );
        assert_eq!(
            relation_table(Resource::Topic),
            Some(("content_topic_relations", "topic_id"))
        );
        assert_eq!(
            relation_table(Resource::Post),
            Some(("content_post_relations", "post_id"))
        );
        assert_eq!(relation_table(Resource::User), None);
        assert_eq!(relation_table(Resource::Community), None);
    }

    #[test]
    fn test_line_schema_enforces_order_uniqueness() {
        assert!(LINE_SCHEMA.contains("UNIQUE (note_id, order_number)"));
    }
}
