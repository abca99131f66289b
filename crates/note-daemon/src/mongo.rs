//! MongoDB-backed property store.
//!
//! Line properties are schema-flexible side metadata, so they live in a
//! document collection keyed by line id rather than in the relational
//! ordered table. Reordering a line never touches this store.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use note_core::model::PropertyKind;
use note_core::store::{PropertyStore, Result, StoreError};

const COLLECTION: &str = "line_properties";

fn backend(e: mongodb::error::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct LinePropertyDoc {
    line_id: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Document store for per-line properties.
#[derive(Clone)]
pub struct MongoPropertyStore {
    collection: Collection<LinePropertyDoc>,
}

impl MongoPropertyStore {
    pub async fn connect(url: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(url).await.map_err(backend)?;
        Ok(Self {
            collection: client.database(database).collection(COLLECTION),
        })
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "line_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index).await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl PropertyStore for MongoPropertyStore {
    async fn get(&self, line_id: Uuid) -> Result<Option<PropertyKind>> {
        let found = self
            .collection
            .find_one(doc! { "line_id": line_id.to_string() })
            .await
            .map_err(backend)?;

        found
            .map(|doc| {
                doc.kind
                    .parse()
                    .map_err(|e| StoreError::Backend(format!("corrupt property document: {e}")))
            })
            .transpose()
    }

    async fn set(&self, line_id: Uuid, kind: PropertyKind) -> Result<()> {
        let replacement = LinePropertyDoc {
            line_id: line_id.to_string(),
            kind: kind.as_str().to_string(),
        };
        self.collection
            .replace_one(doc! { "line_id": line_id.to_string() }, replacement)
            .upsert(true)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn clear(&self, line_id: Uuid) -> Result<()> {
        self.collection
            .delete_one(doc! { "line_id": line_id.to_string() })
            .await
            .map_err(backend)?;
        Ok(())
    }
}
