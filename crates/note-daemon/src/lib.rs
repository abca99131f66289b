//! note-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod http;
pub mod mongo;
pub mod postgres;
pub mod redis_lock;
pub mod socket;

// Re-export key types for convenience
pub use http::{router, EditState};
pub use mongo::MongoPropertyStore;
pub use postgres::{PostgresContentStore, PostgresLineStore};
pub use redis_lock::RedisSessionLock;
pub use socket::AxumSocket;
