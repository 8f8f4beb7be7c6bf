//! WebSocket client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, identify, disconnect)
//! - Typed send methods for every client event
//! - A receive channel delivering decoded server events to the application
//!
//! The client identifies itself with `session:hello` immediately after the
//! transport handshake; the server refuses everything until that frame
//! arrives.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{CallKind, ChatKind, ClientEvent, ProtocolError, ServerEvent};
use crate::registry::UserIdentity;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The collaboration client.
///
/// Manages a WebSocket connection to the collaboration server and exposes
/// typed methods for each protocol event. Incoming server events arrive on
/// the channel returned by [`take_event_rx`](Self::take_event_rx).
pub struct CollabClient {
    /// Who we are on the wire
    identity: UserIdentity,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::UnboundedSender<ClientEvent>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::UnboundedSender<ServerEvent>,

    /// Server URL
    server_url: String,
}

impl CollabClient {
    /// Create a new client.
    pub fn new(identity: UserIdentity, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            identity,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and identify this session.
    ///
    /// Spawns background tasks for reading and writing WebSocket frames.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(ok) => ok,
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: encode outgoing events onto the socket.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let frame = match event.encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("Failed to encode outgoing event: {e}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            // Outgoing channel closed (client dropped): tell the server.
            let _ = ws_writer.send(Message::Close(None)).await;
        });
        self.outgoing_tx = Some(out_tx);

        // Identify before anything else.
        self.send(ClientEvent::Hello {
            user_id: self.identity.user_id,
            user_name: self.identity.user_name.clone(),
            avatar: self.identity.avatar.clone(),
        })?;

        *self.state.write().await = ConnectionState::Connected;

        // Reader task: decode incoming frames into server events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break; // application dropped the receiver
                            }
                        }
                        Err(e) => {
                            log::warn!("Undecodable server frame: {e}");
                        }
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        Ok(())
    }

    fn send(&self, event: ClientEvent) -> Result<(), ProtocolError> {
        match &self.outgoing_tx {
            Some(tx) => tx.send(event).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub fn join_workspace(&self, workspace_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::JoinWorkspace { workspace_id })
    }

    pub fn leave_workspace(&self) -> Result<(), ProtocolError> {
        self.send(ClientEvent::LeaveWorkspace)
    }

    pub fn send_chat(
        &self,
        workspace_id: Uuid,
        message: impl Into<String>,
        kind: ChatKind,
    ) -> Result<(), ProtocolError> {
        self.send(ClientEvent::ChatSend {
            workspace_id,
            message: message.into(),
            kind,
        })
    }

    pub fn set_typing(&self, workspace_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::Typing { workspace_id })
    }

    pub fn stop_typing(&self, workspace_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::StopTyping { workspace_id })
    }

    pub fn send_operation(
        &self,
        workspace_id: Uuid,
        document_id: Uuid,
        operation: serde_json::Value,
    ) -> Result<(), ProtocolError> {
        self.send(ClientEvent::DocumentOperation {
            workspace_id,
            document_id,
            operation,
        })
    }

    pub fn start_call(&self, workspace_id: Uuid, kind: CallKind) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CallStart { workspace_id, kind })
    }

    pub fn join_call(&self, call_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CallJoin { call_id })
    }

    pub fn leave_call(&self, call_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CallLeave { call_id })
    }

    pub fn end_call(&self, call_id: Uuid) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CallEnd { call_id })
    }

    pub fn send_offer(
        &self,
        call_id: Uuid,
        to: Uuid,
        offer: serde_json::Value,
    ) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CallOffer { call_id, to, offer })
    }

    pub fn send_answer(
        &self,
        call_id: Uuid,
        to: Uuid,
        answer: serde_json::Value,
    ) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CallAnswer { call_id, to, answer })
    }

    pub fn send_ice_candidate(
        &self,
        call_id: Uuid,
        to: Uuid,
        candidate: serde_json::Value,
    ) -> Result<(), ProtocolError> {
        self.send(ClientEvent::CallIceCandidate {
            call_id,
            to,
            candidate,
        })
    }

    pub fn ping(&self) -> Result<(), ProtocolError> {
        self.send(ClientEvent::Ping)
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get our identity.
    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
