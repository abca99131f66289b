//! note-core: Core of the collaborative note editor.
//!
//! This crate provides the core functionality for:
//! - The note/line domain model and the order-number invariant
//! - Position-reassignment plans shared by every line-store backend
//! - Store contracts (lines, properties, contents, session lock) with
//!   in-memory implementations for testing
//! - The note service orchestrating the stores
//! - The JSON wire protocol and the per-connection edit session

pub mod model;
pub mod order;
pub mod plan;
pub mod protocol;
pub mod service;
pub mod session;
pub mod store;

pub use model::{Content, ContentKind, Line, LineProperty, Mention, Note, PropertyKind, Resource};
pub use order::OrderNumber;
pub use protocol::{ClientMessage, ContentFrame, LineFrame, PropertyFrame, ServerMessage};
pub use service::{LineView, NoteService, ServiceError};
pub use session::{EditSession, EditSocket, Received, Rejection, SessionConfig, SessionEnd};
pub use store::{ContentStore, LineStore, PropertyStore, SessionLock, StoreError};
