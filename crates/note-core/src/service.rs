//! Note service: orchestrates the line, property and content stores.
//!
//! Structural order changes go to the line store alone. Updates and deletes
//! touch the side stores too, relational change first: a crash between the
//! stores can orphan a property or content set but never corrupt the order
//! sequence. No cross-store transaction is attempted.

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::model::{Content, Line, LineProperty, Mention, Note, PropertyKind, Resource};
use crate::order::{OrderError, OrderNumber};
use crate::store::{ContentStore, LineStore, PropertyStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid order: {0}")]
    InvalidOrder(#[from] OrderError),

    #[error("resource cannot own a note: {0}")]
    InvalidOwner(Resource),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// One line as delivered to an editing client: order plus the property and
/// contents gathered from the side stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineView {
    pub order: OrderNumber,
    pub property: Option<LineProperty>,
    pub contents: Vec<Content>,
}

/// The note usecase surface consumed by edit sessions and provisioning.
pub struct NoteService<L, P, C> {
    lines: L,
    properties: P,
    contents: C,
}

impl<L, P, C> NoteService<L, P, C>
where
    L: LineStore,
    P: PropertyStore,
    C: ContentStore,
{
    pub fn new(lines: L, properties: P, contents: C) -> Self {
        Self {
            lines,
            properties,
            contents,
        }
    }

    pub async fn get_note(&self, id: Uuid) -> Result<Note> {
        self.lines
            .get_note(id)
            .await?
            .ok_or(ServiceError::NotFound("note"))
    }

    /// The note backing a user's profile.
    pub async fn get_user_profile(&self, user_id: Uuid) -> Result<Note> {
        self.lines
            .get_note_by_resource(&Mention::user(user_id))
            .await?
            .ok_or(ServiceError::NotFound("note"))
    }

    /// The note backing a community's description.
    pub async fn get_community_description(&self, community_id: Uuid) -> Result<Note> {
        self.lines
            .get_note_by_resource(&Mention::community(community_id))
            .await?
            .ok_or(ServiceError::NotFound("note"))
    }

    /// Provision the note for a freshly created user or community.
    pub async fn create_note(&self, mention: Mention) -> Result<Note> {
        if !matches!(mention.resource, Resource::User | Resource::Community) {
            return Err(ServiceError::InvalidOwner(mention.resource));
        }
        let note = Note::new();
        self.lines.create_note(&note, &mention).await?;
        debug!(note_id = %note.id, owner = %mention.resource, "note created");
        Ok(note)
    }

    /// Full ordered view of a note, ascending by order.
    pub async fn list_lines(&self, note_id: Uuid) -> Result<Vec<LineView>> {
        let lines = self.lines.list_lines(note_id).await?;

        let mut views = Vec::with_capacity(lines.len());
        for line in lines {
            let property = self
                .properties
                .get(line.id)
                .await?
                .map(|kind| LineProperty { kind });
            let contents = self.contents.list_by_line(line.id).await?;
            views.push(LineView {
                order: line.order,
                property,
                contents,
            });
        }
        Ok(views)
    }

    /// Create a blank line. Returns the effective position, which the caller
    /// must treat as authoritative.
    pub async fn insert_line(&self, note_id: Uuid, to: u32) -> Result<OrderNumber> {
        let to = OrderNumber::new(to)?;
        let order = self.lines.insert_line(note_id, Uuid::new_v4(), to).await?;
        debug!(%note_id, requested = %to, effective = %order, "line inserted");
        Ok(order)
    }

    /// Relocate the line at `src` to `dst`. A coinciding source and
    /// destination is a no-op before any store is touched.
    pub async fn move_line(&self, note_id: Uuid, src: u32, dst: u32) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let src = OrderNumber::new(src)?;
        let dst = OrderNumber::new(dst)?;
        self.lines.move_line(note_id, src, dst).await?;
        debug!(%note_id, %src, %dst, "line moved");
        Ok(())
    }

    /// Replace the content set and set/clear the property of the line at
    /// `order`, leaving its position untouched.
    pub async fn update_line(
        &self,
        note_id: Uuid,
        order: u32,
        property: Option<PropertyKind>,
        contents: Vec<Content>,
    ) -> Result<()> {
        let order = OrderNumber::new(order)?;
        let line = self
            .lines
            .get_line_by_order(note_id, order)
            .await?
            .ok_or(ServiceError::NotFound("line"))?;

        self.contents
            .delete_and_create(&contents, &Mention::line(line.id))
            .await?;

        match property {
            Some(kind) => self.properties.set(line.id, kind).await?,
            None => self.properties.clear(line.id).await?,
        }

        debug!(%note_id, %order, line_id = %line.id, "line updated");
        Ok(())
    }

    /// Remove the line at `order` together with its property and contents.
    pub async fn delete_line(&self, note_id: Uuid, order: u32) -> Result<Line> {
        let order = OrderNumber::new(order)?;
        self.lines
            .get_line_by_order(note_id, order)
            .await?
            .ok_or(ServiceError::NotFound("line"))?;

        let removed = self.lines.delete_line(note_id, order).await?;
        self.properties.clear(removed.id).await?;
        self.contents
            .delete_by_resource(&Mention::line(removed.id))
            .await?;

        debug!(%note_id, %order, line_id = %removed.id, "line deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentKind;
    use crate::store::{InMemoryContentStore, InMemoryLineStore, InMemoryPropertyStore};

    fn service() -> NoteService<InMemoryLineStore, InMemoryPropertyStore, InMemoryContentStore> {
        NoteService::new(
            InMemoryLineStore::new(),
            InMemoryPropertyStore::new(),
            InMemoryContentStore::new(),
        )
    }

    fn text_content(body: &str) -> Content {
        Content {
            id: Uuid::new_v4(),
            kind: ContentKind::Text,
            value: format!(r#"{{"value":"{body}"}}"#).into_bytes(),
        }
    }

    async fn seeded_note<L, P, C>(service: &NoteService<L, P, C>, count: u32) -> Note
    where
        L: LineStore,
        P: PropertyStore,
        C: ContentStore,
    {
        let note = service
            .create_note(Mention::user(Uuid::new_v4()))
            .await
            .unwrap();
        for i in 1..=count {
            service.insert_line(note.id, i).await.unwrap();
        }
        note
    }

    #[tokio::test]
    async fn test_update_replaces_contents_and_property() {
        let service = service();
        let note = seeded_note(&service, 2).await;

        service
            .update_line(
                note.id,
                1,
                Some(PropertyKind::Toggle),
                vec![text_content("first")],
            )
            .await
            .unwrap();
        service
            .update_line(
                note.id,
                1,
                Some(PropertyKind::Callout),
                vec![text_content("second"), text_content("third")],
            )
            .await
            .unwrap();

        let views = service.list_lines(note.id).await.unwrap();
        assert_eq!(views[0].contents.len(), 2, "replacement, not accumulation");
        assert_eq!(
            views[0].property,
            Some(LineProperty {
                kind: PropertyKind::Callout
            })
        );
        assert!(views[1].contents.is_empty());
    }

    #[tokio::test]
    async fn test_update_with_no_property_clears_it() {
        let service = service();
        let note = seeded_note(&service, 1).await;

        service
            .update_line(note.id, 1, Some(PropertyKind::Blockquote), vec![])
            .await
            .unwrap();
        service.update_line(note.id, 1, None, vec![]).await.unwrap();

        let views = service.list_lines(note.id).await.unwrap();
        assert_eq!(views[0].property, None);
    }

    #[tokio::test]
    async fn test_update_missing_line_is_not_found() {
        let service = service();
        let note = seeded_note(&service, 1).await;

        let err = service
            .update_line(note.id, 4, None, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound("line")));
    }

    #[tokio::test]
    async fn test_delete_removes_property_and_contents() {
        let service = service();
        let note = seeded_note(&service, 3).await;
        service
            .update_line(
                note.id,
                2,
                Some(PropertyKind::Toggle),
                vec![text_content("doomed")],
            )
            .await
            .unwrap();

        service.delete_line(note.id, 2).await.unwrap();

        let views = service.list_lines(note.id).await.unwrap();
        assert_eq!(views.len(), 2);
        assert!(
            views.iter().all(|v| v.property.is_none() && v.contents.is_empty()),
            "no property or content survives its line"
        );
    }

    #[tokio::test]
    async fn test_property_change_never_moves_lines() {
        let service = service();
        let note = seeded_note(&service, 3).await;

        let before: Vec<_> = service
            .list_lines(note.id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.order)
            .collect();

        service
            .update_line(note.id, 2, Some(PropertyKind::Blockquote), vec![])
            .await
            .unwrap();
        service.update_line(note.id, 2, None, vec![]).await.unwrap();

        let after: Vec<_> = service
            .list_lines(note.id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.order)
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_move_to_same_position_is_noop() {
        let service = service();
        let note = seeded_note(&service, 2).await;

        // Position 0 never reaches the store: the identity check runs first.
        service.move_line(note.id, 0, 0).await.unwrap();
        service.move_line(note.id, 2, 2).await.unwrap();

        let views = service.list_lines(note.id).await.unwrap();
        assert_eq!(views.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_order_is_rejected() {
        let service = service();
        let note = seeded_note(&service, 1).await;

        assert!(matches!(
            service.insert_line(note.id, 0).await.unwrap_err(),
            ServiceError::InvalidOrder(_)
        ));
        assert!(matches!(
            service.move_line(note.id, 0, 2).await.unwrap_err(),
            ServiceError::InvalidOrder(_)
        ));
    }

    #[tokio::test]
    async fn test_profile_and_description_lookup() {
        let service = service();
        let user_id = Uuid::new_v4();
        let community_id = Uuid::new_v4();

        let profile = service.create_note(Mention::user(user_id)).await.unwrap();
        let description = service
            .create_note(Mention::community(community_id))
            .await
            .unwrap();

        assert_eq!(service.get_user_profile(user_id).await.unwrap(), profile);
        assert_eq!(
            service
                .get_community_description(community_id)
                .await
                .unwrap(),
            description
        );
        assert!(matches!(
            service.get_user_profile(Uuid::new_v4()).await.unwrap_err(),
            ServiceError::NotFound("note")
        ));
    }

    #[tokio::test]
    async fn test_line_cannot_own_a_note() {
        let service = service();
        let err = service
            .create_note(Mention::line(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOwner(Resource::Line)));
    }
}
