//! EditSocket adapter for upgraded axum WebSockets.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

use note_core::session::{EditSocket, Received, SocketError};

/// A live, upgraded WebSocket connection driving one edit session.
pub struct AxumSocket {
    socket: WebSocket,
}

impl AxumSocket {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl EditSocket for AxumSocket {
    async fn send_text(&mut self, text: String) -> Result<(), SocketError> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SocketError(e.to_string()))
    }

    async fn recv(&mut self, deadline: Duration) -> Result<Received, SocketError> {
        // Control frames don't reset the renewal deadline.
        let deadline_at = Instant::now() + deadline;
        loop {
            match timeout_at(deadline_at, self.socket.recv()).await {
                Err(_) => return Ok(Received::TimedOut),
                Ok(None) => return Ok(Received::Closed),
                Ok(Some(Err(e))) => return Err(SocketError(e.to_string())),
                Ok(Some(Ok(message))) => match message {
                    Message::Text(text) => return Ok(Received::Frame(text.as_bytes().to_vec())),
                    Message::Binary(bytes) => return Ok(Received::Frame(bytes.to_vec())),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => return Ok(Received::Closed),
                },
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}
