//! Store contracts for the note core, with in-memory implementations.
//!
//! Implementations:
//! - `InMemory*` (here) - For testing
//! - `PostgresLineStore` / `PostgresContentStore` (in note-daemon)
//! - `MongoPropertyStore` (in note-daemon)
//! - `RedisSessionLock` (in note-daemon)
//!
//! Every structural mutation in a `LineStore` is serialized per note: real
//! backends take a write lock over the note's full line set (select-for-update
//! semantics) before computing shifts, and commit or roll back as a unit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Content, Line, Mention, Note, PropertyKind, Resource};
use crate::order::OrderNumber;
use crate::plan;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Relational store owning notes and their ordered line sets.
///
/// Lines come back with `property: None`; properties live in a
/// [`PropertyStore`] and are attached by the service layer.
#[async_trait]
pub trait LineStore: Send + Sync {
    /// Create a note and bind it to its owning resource.
    async fn create_note(&self, note: &Note, mention: &Mention) -> Result<()>;

    async fn get_note(&self, id: Uuid) -> Result<Option<Note>>;

    /// Earliest-created note owned by the mentioned user or community.
    async fn get_note_by_resource(&self, mention: &Mention) -> Result<Option<Note>>;

    /// All lines of the note, ascending by order.
    async fn list_lines(&self, note_id: Uuid) -> Result<Vec<Line>>;

    async fn get_line_by_order(&self, note_id: Uuid, order: OrderNumber) -> Result<Option<Line>>;

    /// Create a blank line, shifting followers up. Returns the effective
    /// position, which may differ from the request (see [`plan::insert_plan`]).
    async fn insert_line(&self, note_id: Uuid, line_id: Uuid, to: OrderNumber)
        -> Result<OrderNumber>;

    /// Relocate the line at `src` to `dst` (see [`plan::move_plan`] for the
    /// clamping and no-op rules).
    async fn move_line(&self, note_id: Uuid, src: OrderNumber, dst: OrderNumber) -> Result<()>;

    /// Remove the line at `order` and close the gap. Returns the removed line.
    async fn delete_line(&self, note_id: Uuid, order: OrderNumber) -> Result<Line>;
}

/// Document-collection store for per-line properties, keyed by line id.
///
/// Never consulted by a move; relocating a line leaves its property alone.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn get(&self, line_id: Uuid) -> Result<Option<PropertyKind>>;

    /// Replace-or-create the property for a line.
    async fn set(&self, line_id: Uuid, kind: PropertyKind) -> Result<()>;

    /// Idempotent delete.
    async fn clear(&self, line_id: Uuid) -> Result<()>;
}

/// Store owning content blocks attached to mentionable entities.
///
/// Each call is atomic from the caller's point of view.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn create(&self, contents: &[Content], mention: &Mention) -> Result<()>;

    /// Full replacement of the mention's content set.
    async fn delete_and_create(&self, contents: &[Content], mention: &Mention) -> Result<()>;

    /// Contents attached to a line, in creation order.
    async fn list_by_line(&self, line_id: Uuid) -> Result<Vec<Content>>;

    /// Delete the full content set for a mention.
    async fn delete_by_resource(&self, mention: &Mention) -> Result<()>;
}

/// Distributed mutual exclusion over a note's live edit session.
///
/// Advisory: acquisition is an exists-check followed by a set, not a
/// compare-and-swap. The TTL is fail-open; a holder that stops renewing
/// loses the lock rather than blocking the note forever.
#[async_trait]
pub trait SessionLock: Send + Sync {
    /// Non-blocking: `false` when another session holds the lock.
    async fn acquire(&self, note_id: Uuid, ttl: Duration) -> Result<bool>;

    async fn renew(&self, note_id: Uuid, ttl: Duration) -> Result<()>;

    /// Idempotent release.
    async fn release(&self, note_id: Uuid) -> Result<()>;
}

// Arc pass-throughs so one store can be shared between a service and a test
// harness.

#[async_trait]
impl<T: LineStore> LineStore for std::sync::Arc<T> {
    async fn create_note(&self, note: &Note, mention: &Mention) -> Result<()> {
        (**self).create_note(note, mention).await
    }

    async fn get_note(&self, id: Uuid) -> Result<Option<Note>> {
        (**self).get_note(id).await
    }

    async fn get_note_by_resource(&self, mention: &Mention) -> Result<Option<Note>> {
        (**self).get_note_by_resource(mention).await
    }

    async fn list_lines(&self, note_id: Uuid) -> Result<Vec<Line>> {
        (**self).list_lines(note_id).await
    }

    async fn get_line_by_order(&self, note_id: Uuid, order: OrderNumber) -> Result<Option<Line>> {
        (**self).get_line_by_order(note_id, order).await
    }

    async fn insert_line(
        &self,
        note_id: Uuid,
        line_id: Uuid,
        to: OrderNumber,
    ) -> Result<OrderNumber> {
        (**self).insert_line(note_id, line_id, to).await
    }

    async fn move_line(&self, note_id: Uuid, src: OrderNumber, dst: OrderNumber) -> Result<()> {
        (**self).move_line(note_id, src, dst).await
    }

    async fn delete_line(&self, note_id: Uuid, order: OrderNumber) -> Result<Line> {
        (**self).delete_line(note_id, order).await
    }
}

#[async_trait]
impl<T: PropertyStore> PropertyStore for std::sync::Arc<T> {
    async fn get(&self, line_id: Uuid) -> Result<Option<PropertyKind>> {
        (**self).get(line_id).await
    }

    async fn set(&self, line_id: Uuid, kind: PropertyKind) -> Result<()> {
        (**self).set(line_id, kind).await
    }

    async fn clear(&self, line_id: Uuid) -> Result<()> {
        (**self).clear(line_id).await
    }
}

#[async_trait]
impl<T: ContentStore> ContentStore for std::sync::Arc<T> {
    async fn create(&self, contents: &[Content], mention: &Mention) -> Result<()> {
        (**self).create(contents, mention).await
    }

    async fn delete_and_create(&self, contents: &[Content], mention: &Mention) -> Result<()> {
        (**self).delete_and_create(contents, mention).await
    }

    async fn list_by_line(&self, line_id: Uuid) -> Result<Vec<Content>> {
        (**self).list_by_line(line_id).await
    }

    async fn delete_by_resource(&self, mention: &Mention) -> Result<()> {
        (**self).delete_by_resource(mention).await
    }
}

#[async_trait]
impl<T: SessionLock> SessionLock for std::sync::Arc<T> {
    async fn acquire(&self, note_id: Uuid, ttl: Duration) -> Result<bool> {
        (**self).acquire(note_id, ttl).await
    }

    async fn renew(&self, note_id: Uuid, ttl: Duration) -> Result<()> {
        (**self).renew(note_id, ttl).await
    }

    async fn release(&self, note_id: Uuid) -> Result<()> {
        (**self).release(note_id).await
    }
}

#[derive(Debug, Clone)]
struct LineRec {
    id: Uuid,
    order: u32,
}

/// In-memory line store for testing.
///
/// Applies the same reassignment plans as the SQL backend and asserts order
/// uniqueness after every step, emulating the unique index.
#[derive(Default)]
pub struct InMemoryLineStore {
    notes: RwLock<HashMap<Uuid, ()>>,
    owners: RwLock<HashMap<(Resource, Uuid), Uuid>>,
    lines: RwLock<HashMap<Uuid, Vec<LineRec>>>,
}

impl InMemoryLineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_line(note_id: Uuid, rec: &LineRec) -> Line {
        Line {
            id: rec.id,
            note_id,
            order: OrderNumber::new(rec.order).expect("stored order is positive"),
            property: None,
        }
    }

    fn assert_unique(recs: &[LineRec]) {
        let mut seen = std::collections::HashSet::new();
        for rec in recs {
            debug_assert!(seen.insert(rec.order), "duplicate order {}", rec.order);
        }
    }

    fn apply_shifts(recs: &mut [LineRec], shifts: &[plan::ShiftStep]) {
        for shift in shifts {
            let rec = recs
                .iter_mut()
                .find(|r| r.order == shift.from)
                .expect("shift source exists");
            rec.order = shift.to;
            Self::assert_unique(recs);
        }
    }
}

#[async_trait]
impl LineStore for InMemoryLineStore {
    async fn create_note(&self, note: &Note, mention: &Mention) -> Result<()> {
        self.notes.write().unwrap().insert(note.id, ());
        self.lines.write().unwrap().entry(note.id).or_default();
        if matches!(mention.resource, Resource::User | Resource::Community) {
            // First note bound to a resource wins, like the earliest-created
            // row in the relational backend.
            self.owners
                .write()
                .unwrap()
                .entry((mention.resource, mention.id))
                .or_insert(note.id);
        }
        Ok(())
    }

    async fn get_note(&self, id: Uuid) -> Result<Option<Note>> {
        Ok(self
            .notes
            .read()
            .unwrap()
            .contains_key(&id)
            .then_some(Note { id }))
    }

    async fn get_note_by_resource(&self, mention: &Mention) -> Result<Option<Note>> {
        Ok(self
            .owners
            .read()
            .unwrap()
            .get(&(mention.resource, mention.id))
            .map(|&id| Note { id }))
    }

    async fn list_lines(&self, note_id: Uuid) -> Result<Vec<Line>> {
        let lines = self.lines.read().unwrap();
        let mut recs = lines.get(&note_id).cloned().unwrap_or_default();
        recs.sort_by_key(|r| r.order);
        Ok(recs.iter().map(|r| Self::to_line(note_id, r)).collect())
    }

    async fn get_line_by_order(&self, note_id: Uuid, order: OrderNumber) -> Result<Option<Line>> {
        let lines = self.lines.read().unwrap();
        Ok(lines
            .get(&note_id)
            .and_then(|recs| recs.iter().find(|r| r.order == order.get()))
            .map(|r| Self::to_line(note_id, r)))
    }

    async fn insert_line(
        &self,
        note_id: Uuid,
        line_id: Uuid,
        to: OrderNumber,
    ) -> Result<OrderNumber> {
        let mut lines = self.lines.write().unwrap();
        let recs = lines
            .get_mut(&note_id)
            .ok_or_else(|| StoreError::NotFound(format!("note {note_id}")))?;

        let last = recs.iter().map(|r| r.order).max().unwrap_or(0);
        let insert = plan::insert_plan(last, to.get());
        Self::apply_shifts(recs, &insert.shifts);
        recs.push(LineRec {
            id: line_id,
            order: insert.effective,
        });
        Self::assert_unique(recs);

        Ok(OrderNumber::new(insert.effective).expect("effective order is positive"))
    }

    async fn move_line(&self, note_id: Uuid, src: OrderNumber, dst: OrderNumber) -> Result<()> {
        let mut lines = self.lines.write().unwrap();
        let recs = lines
            .get_mut(&note_id)
            .ok_or_else(|| StoreError::NotFound(format!("note {note_id}")))?;

        let last = recs.iter().map(|r| r.order).max().unwrap_or(0);
        let Some(plan) = plan::move_plan(last, src.get(), dst.get()) else {
            return Ok(());
        };

        let park_idx = recs
            .iter()
            .position(|r| r.order == plan.src)
            .expect("source line exists within 1..=last");
        recs[park_idx].order = plan::PARKED;
        Self::apply_shifts(recs, &plan.shifts);
        recs[park_idx].order = plan.dst;
        Self::assert_unique(recs);

        Ok(())
    }

    async fn delete_line(&self, note_id: Uuid, order: OrderNumber) -> Result<Line> {
        let mut lines = self.lines.write().unwrap();
        let recs = lines
            .get_mut(&note_id)
            .ok_or_else(|| StoreError::NotFound(format!("note {note_id}")))?;

        let idx = recs
            .iter()
            .position(|r| r.order == order.get())
            .ok_or_else(|| StoreError::NotFound(format!("line at order {order}")))?;
        let removed = recs.swap_remove(idx);

        let last = recs
            .iter()
            .map(|r| r.order)
            .max()
            .unwrap_or(0)
            .max(order.get());
        Self::apply_shifts(recs, &plan::delete_plan(last, order.get()));

        Ok(Self::to_line(note_id, &removed))
    }
}

/// In-memory property store for testing.
#[derive(Default)]
pub struct InMemoryPropertyStore {
    properties: RwLock<HashMap<Uuid, PropertyKind>>,
}

impl InMemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PropertyStore for InMemoryPropertyStore {
    async fn get(&self, line_id: Uuid) -> Result<Option<PropertyKind>> {
        Ok(self.properties.read().unwrap().get(&line_id).copied())
    }

    async fn set(&self, line_id: Uuid, kind: PropertyKind) -> Result<()> {
        self.properties.write().unwrap().insert(line_id, kind);
        Ok(())
    }

    async fn clear(&self, line_id: Uuid) -> Result<()> {
        self.properties.write().unwrap().remove(&line_id);
        Ok(())
    }
}

/// In-memory content store for testing.
#[derive(Default)]
pub struct InMemoryContentStore {
    contents: RwLock<HashMap<Mention, Vec<Content>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn create(&self, contents: &[Content], mention: &Mention) -> Result<()> {
        self.contents
            .write()
            .unwrap()
            .entry(*mention)
            .or_default()
            .extend_from_slice(contents);
        Ok(())
    }

    async fn delete_and_create(&self, contents: &[Content], mention: &Mention) -> Result<()> {
        self.contents
            .write()
            .unwrap()
            .insert(*mention, contents.to_vec());
        Ok(())
    }

    async fn list_by_line(&self, line_id: Uuid) -> Result<Vec<Content>> {
        Ok(self
            .contents
            .read()
            .unwrap()
            .get(&Mention::line(line_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_by_resource(&self, mention: &Mention) -> Result<()> {
        self.contents.write().unwrap().remove(mention);
        Ok(())
    }
}

/// In-memory session lock for testing, with real TTL expiry.
#[derive(Default)]
pub struct InMemorySessionLock {
    held: Mutex<HashMap<Uuid, Instant>>,
}

impl InMemorySessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expiry of a currently held lock, for assertions on renewal.
    pub fn expires_at(&self, note_id: Uuid) -> Option<Instant> {
        self.held.lock().unwrap().get(&note_id).copied()
    }
}

#[async_trait]
impl SessionLock for InMemorySessionLock {
    async fn acquire(&self, note_id: Uuid, ttl: Duration) -> Result<bool> {
        let mut held = self.held.lock().unwrap();
        if let Some(expires) = held.get(&note_id) {
            if *expires > Instant::now() {
                return Ok(false);
            }
        }
        held.insert(note_id, Instant::now() + ttl);
        Ok(true)
    }

    async fn renew(&self, note_id: Uuid, ttl: Duration) -> Result<()> {
        self.held
            .lock()
            .unwrap()
            .insert(note_id, Instant::now() + ttl);
        Ok(())
    }

    async fn release(&self, note_id: Uuid) -> Result<()> {
        self.held.lock().unwrap().remove(&note_id);
        Ok(())
    }
}
