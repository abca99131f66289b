//! HTTP/WebSocket boundary for edit sessions.
//!
//! Three upgrade endpoints, one per way of reaching a note: directly by id,
//! through a user's profile, or through a community's description. Admission
//! runs before the upgrade so a missing note is a plain 404 and a held lock
//! a plain 423; only an admitted session ever sees a WebSocket.
//!
//! The router is generic over the store types so integration tests can run
//! it over the in-memory stores.

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use note_core::service::{NoteService, ServiceError};
use note_core::session::{EditSession, Rejection, SessionConfig};
use note_core::store::{ContentStore, LineStore, PropertyStore, SessionLock};

use crate::socket::AxumSocket;

/// Shared state behind every edit endpoint.
pub struct EditState<L, P, C, K> {
    pub service: Arc<NoteService<L, P, C>>,
    pub lock: Arc<K>,
    pub config: SessionConfig,
}

impl<L, P, C, K> Clone for EditState<L, P, C, K> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            lock: Arc::clone(&self.lock),
            config: self.config,
        }
    }
}

pub fn router<L, P, C, K>(state: EditState<L, P, C, K>) -> Router
where
    L: LineStore + 'static,
    P: PropertyStore + 'static,
    C: ContentStore + 'static,
    K: SessionLock + 'static,
{
    Router::new()
        .route("/notes/{id}/edit", get(edit_note::<L, P, C, K>))
        .route(
            "/users/{id}/profile/edit",
            get(edit_user_profile::<L, P, C, K>),
        )
        .route(
            "/communities/{id}/description/edit",
            get(edit_community_description::<L, P, C, K>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn edit_note<L, P, C, K>(
    State(state): State<EditState<L, P, C, K>>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response
where
    L: LineStore + 'static,
    P: PropertyStore + 'static,
    C: ContentStore + 'static,
    K: SessionLock + 'static,
{
    open_session(state, id, ws).await
}

async fn edit_user_profile<L, P, C, K>(
    State(state): State<EditState<L, P, C, K>>,
    Path(user_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response
where
    L: LineStore + 'static,
    P: PropertyStore + 'static,
    C: ContentStore + 'static,
    K: SessionLock + 'static,
{
    match state.service.get_user_profile(user_id).await {
        Ok(note) => open_session(state, note.id, ws).await,
        Err(e) => lookup_failure(e),
    }
}

async fn edit_community_description<L, P, C, K>(
    State(state): State<EditState<L, P, C, K>>,
    Path(community_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response
where
    L: LineStore + 'static,
    P: PropertyStore + 'static,
    C: ContentStore + 'static,
    K: SessionLock + 'static,
{
    match state.service.get_community_description(community_id).await {
        Ok(note) => open_session(state, note.id, ws).await,
        Err(e) => lookup_failure(e),
    }
}

fn lookup_failure(e: ServiceError) -> Response {
    match e {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
        other => {
            error!(error = %other, "note lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Admit the session, then upgrade. Rejections become HTTP statuses; nothing
/// is streamed to a client that was not admitted.
async fn open_session<L, P, C, K>(
    state: EditState<L, P, C, K>,
    note_id: Uuid,
    ws: WebSocketUpgrade,
) -> Response
where
    L: LineStore + 'static,
    P: PropertyStore + 'static,
    C: ContentStore + 'static,
    K: SessionLock + 'static,
{
    match EditSession::open(
        state.service.clone(),
        state.lock.clone(),
        note_id,
        state.config,
    )
    .await
    {
        Ok(session) => ws.on_upgrade(move |socket| async move {
            let mut socket = AxumSocket::new(socket);
            session.run(&mut socket).await;
        }),
        Err(Rejection::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(Rejection::Locked) => StatusCode::LOCKED.into_response(),
        Err(Rejection::Store(e)) => {
            error!(%note_id, error = %e, "session admission failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
