//! The per-connection collaborative edit session.
//!
//! One session owns one note's editing rights for its lifetime:
//! `Connecting → Locking → Streaming → Closed`. Admission (note lookup and
//! lock acquisition) happens in [`EditSession::open`] so the transport layer
//! can reject a connection before upgrading it; [`EditSession::run`] streams
//! the snapshot, applies mutations and guarantees the lock is released on
//! every exit path.
//!
//! The socket is abstracted behind [`EditSocket`] so the state machine runs
//! against a scripted fake in tests and an upgraded WebSocket in the daemon.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{ClientMessage, LineFrame, ProtocolError, ServerMessage};
use crate::service::{NoteService, ServiceError};
use crate::store::{ContentStore, LineStore, PropertyStore, SessionLock, StoreError};

/// Why a connection was refused before streaming began.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("note not found")]
    NotFound,

    #[error("note is being edited by another session")]
    Locked,

    #[error(transparent)]
    Store(StoreError),
}

#[derive(Debug, Error)]
#[error("socket error: {0}")]
pub struct SocketError(pub String);

/// Outcome of one receive attempt.
#[derive(Debug)]
pub enum Received {
    /// A complete data frame (text or binary payload bytes).
    Frame(Vec<u8>),
    /// The client closed the connection or the stream ended.
    Closed,
    /// Nothing arrived before the renewal deadline.
    TimedOut,
}

/// Transport seam between the session and its connection.
#[async_trait]
pub trait EditSocket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SocketError>;

    /// Wait for the next frame, at most `deadline`.
    async fn recv(&mut self, deadline: Duration) -> Result<Received, SocketError>;

    /// Best-effort close; errors are ignored, the session is over either way.
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Idle deadline and lock TTL in one: the lock is renewed with this
    /// value on every applied message, and the session closes after this
    /// long without traffic.
    pub deadline: Duration,
}

impl SessionConfig {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        // Matches the editor's historical 30-minute idle window.
        Self::new(Duration::from_secs(1800))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Locking,
    Streaming,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Apply(#[from] ServiceError),

    #[error("session lock error: {0}")]
    Lock(StoreError),

    #[error(transparent)]
    Transport(#[from] SocketError),

    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// How a streaming session ended. Failure is fail-fast: no mutation is
/// retried, because a dropped message would let client and server diverge.
#[derive(Debug)]
pub enum SessionEnd {
    ClientClosed,
    IdleTimeout,
    Failed(SessionError),
}

/// All per-connection state, owned and passed explicitly.
pub struct EditSession<L, P, C, K> {
    service: Arc<NoteService<L, P, C>>,
    lock: Arc<K>,
    note_id: Uuid,
    config: SessionConfig,
    state: SessionState,
}

impl<L, P, C, K> EditSession<L, P, C, K>
where
    L: LineStore,
    P: PropertyStore,
    C: ContentStore,
    K: SessionLock,
{
    /// Admit a session: the note must exist and its lock must be free.
    ///
    /// On `Err` nothing is held and nothing was sent; the caller maps the
    /// rejection to a transport-level refusal.
    pub async fn open(
        service: Arc<NoteService<L, P, C>>,
        lock: Arc<K>,
        note_id: Uuid,
        config: SessionConfig,
    ) -> Result<Self, Rejection> {
        match service.get_note(note_id).await {
            Ok(_) => {}
            Err(ServiceError::NotFound(_)) => return Err(Rejection::NotFound),
            Err(ServiceError::Store(e)) => return Err(Rejection::Store(e)),
            Err(e) => return Err(Rejection::Store(StoreError::Backend(e.to_string()))),
        }

        match lock.acquire(note_id, config.deadline).await {
            Ok(true) => {}
            Ok(false) => return Err(Rejection::Locked),
            Err(e) => return Err(Rejection::Store(e)),
        }

        Ok(Self {
            service,
            lock,
            note_id,
            config,
            state: SessionState::Locking,
        })
    }

    pub fn note_id(&self) -> Uuid {
        self.note_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stream the session to completion.
    ///
    /// The lock is released and the socket closed on every exit path,
    /// including apply and transport failures.
    pub async fn run<S: EditSocket>(mut self, socket: &mut S) -> SessionEnd {
        self.state = SessionState::Streaming;

        let end = match self.stream(socket).await {
            Ok(end) => end,
            Err(e) => SessionEnd::Failed(e),
        };

        if let Err(e) = self.lock.release(self.note_id).await {
            warn!(note_id = %self.note_id, error = %e, "failed to release session lock");
        }
        socket.close().await;
        self.state = SessionState::Closed;

        info!(note_id = %self.note_id, end = ?end, "edit session closed");
        end
    }

    async fn stream<S: EditSocket>(
        &mut self,
        socket: &mut S,
    ) -> Result<SessionEnd, SessionError> {
        let views = self.service.list_lines(self.note_id).await?;
        let frames: Vec<LineFrame> = views.iter().map(LineFrame::from).collect();
        socket
            .send_text(ServerMessage::Current(frames).to_json()?)
            .await?;

        loop {
            match socket.recv(self.config.deadline).await? {
                Received::Closed => return Ok(SessionEnd::ClientClosed),
                Received::TimedOut => return Ok(SessionEnd::IdleTimeout),
                Received::Frame(bytes) => {
                    // A frame that fails to decode has touched no store, so
                    // only the message is discarded. Once a mutation starts,
                    // any failure ends the session instead.
                    let message = match ClientMessage::from_slice(&bytes) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(note_id = %self.note_id, error = %e, "discarding undecodable message");
                            continue;
                        }
                    };

                    self.apply(message).await?;
                    self.lock
                        .renew(self.note_id, self.config.deadline)
                        .await
                        .map_err(SessionError::Lock)?;
                }
            }
        }
    }

    async fn apply(&self, message: ClientMessage) -> Result<(), ServiceError> {
        match message {
            ClientMessage::Insert(insert) => {
                self.service.insert_line(self.note_id, insert.to).await?;
            }
            ClientMessage::Move(mv) => {
                self.service.move_line(self.note_id, mv.from, mv.to).await?;
            }
            ClientMessage::Update(edit) => {
                let contents = edit
                    .contents
                    .into_iter()
                    .map(|frame| frame.into_content())
                    .collect();
                self.service
                    .update_line(
                        self.note_id,
                        edit.order,
                        edit.property.map(|p| p.kind),
                        contents,
                    )
                    .await?;
            }
            ClientMessage::Delete(delete) => {
                self.service.delete_line(self.note_id, delete.to).await?;
            }
        }
        Ok(())
    }
}
