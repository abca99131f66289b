//! Redis-backed session lock with native TTL expiry.
//!
//! Acquisition is an EXISTS check followed by SET EX, not a compare-and-swap:
//! the lock is advisory by design. A holder that crashes or loses
//! connectivity simply stops renewing and the key expires, so a dead session
//! never blocks its note (fail-open).

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use note_core::store::{Result, SessionLock, StoreError};

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Distributed edit-session lock keyed by note id.
#[derive(Clone)]
pub struct RedisSessionLock {
    conn: MultiplexedConnection,
}

impl RedisSessionLock {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)?;
        Ok(Self { conn })
    }

    fn key(note_id: Uuid) -> String {
        format!("note_edit_session_{note_id}")
    }
}

#[async_trait]
impl SessionLock for RedisSessionLock {
    async fn acquire(&self, note_id: Uuid, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let held: bool = conn.exists(Self::key(note_id)).await.map_err(backend)?;
        if held {
            return Ok(false);
        }
        let _: () = conn
            .set_ex(Self::key(note_id), "", ttl_secs(ttl))
            .await
            .map_err(backend)?;
        Ok(true)
    }

    async fn renew(&self, note_id: Uuid, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(Self::key(note_id), "", ttl_secs(ttl))
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn release(&self, note_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(Self::key(note_id)).await.map_err(backend)?;
        Ok(())
    }
}
