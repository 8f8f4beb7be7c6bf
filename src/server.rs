//! WebSocket collaboration server: session lifecycle and event dispatch.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── handle_connection (one task per socket)
//! Client B ──┘        │
//!                      ├── ConnectionRegistry (identity, workspace binding)
//!                      ├── AccessGate (join admission)
//!                      ├── PresenceTracker (joined / typing sets)
//!                      ├── CallRelay (call state + signaling validation)
//!                      │
//!                      ▼
//!                BroadcastRouter ──► per-connection mpsc ──► writer half
//! ```
//!
//! Each connection task owns both halves of its socket and runs a select
//! loop: inbound frames are decoded and dispatched, outbound events arrive
//! on the connection's mpsc channel and are written out. All delivery —
//! broadcasts, point-to-point signaling, direct error replies — goes
//! through the channel, so the socket writer has a single owner.
//!
//! The first frame on every connection must be `session:hello`; the
//! connection is not registered (and cannot join anything) until then.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::access::AccessGate;
use crate::broadcast::{BroadcastRouter, Delivery};
use crate::call::{CallError, CallRelay};
use crate::presence::PresenceTracker;
use crate::protocol::{ClientEvent, ErrorCode, ServerEvent};
use crate::registry::{ConnectionRegistry, UserIdentity};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum users per workspace
    pub max_users_per_workspace: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_users_per_workspace: 100,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub protocol_errors: u64,
}

/// Shared state handed to every connection task.
#[derive(Clone)]
struct ServerContext {
    config: ServerConfig,
    gate: Arc<AccessGate>,
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceTracker>,
    calls: Arc<CallRelay>,
    router: Arc<BroadcastRouter>,
    stats: Arc<RwLock<ServerStats>>,
}

/// The collaboration server.
pub struct CollabServer {
    ctx: ServerContext,
}

type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;

impl CollabServer {
    /// Create a server. Membership truth comes in through the gate.
    pub fn new(config: ServerConfig, gate: Arc<AccessGate>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(BroadcastRouter::new(registry.clone()));
        Self {
            ctx: ServerContext {
                config,
                gate,
                registry,
                presence: Arc::new(PresenceTracker::new()),
                calls: Arc::new(CallRelay::new()),
                router,
                stats: Arc::new(RwLock::new(ServerStats::default())),
            },
        }
    }

    /// The router, for pushing events from outside the socket loop
    /// (notification fan-out from the event bus).
    pub fn router(&self) -> Arc<BroadcastRouter> {
        self.ctx.router.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.ctx.registry.clone()
    }

    pub fn presence(&self) -> Arc<PresenceTracker> {
        self.ctx.presence.clone()
    }

    pub fn calls(&self) -> Arc<CallRelay> {
        self.ctx.calls.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.ctx.config.bind_addr
    }

    pub async fn stats(&self) -> ServerStats {
        self.ctx.stats.read().await.clone()
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.ctx.config.bind_addr).await?;
        log::info!("Collab server listening on {}", self.ctx.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, ctx).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Handle a single WebSocket connection from handshake to teardown.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ServerContext,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    log::info!("WebSocket connection established from {addr}");

    // The connection has no identity until `session:hello` arrives.
    let identity = match await_hello(&mut ws_sender, &mut ws_receiver).await? {
        Some(identity) => identity,
        None => return Ok(()), // closed or refused before identifying
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection_id = ctx.registry.register(identity.clone(), tx).await;
    {
        let mut s = ctx.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }
    log::info!(
        "Session established: {} ({}) as connection {connection_id}",
        identity.user_name,
        identity.user_id
    );

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        {
                            let mut s = ctx.stats.write().await;
                            s.total_messages += 1;
                        }
                        match ClientEvent::decode(text.as_str()) {
                            Ok(event) => {
                                dispatch_event(&ctx, connection_id, &identity, event).await;
                            }
                            Err(e) => {
                                log::warn!("Malformed frame from {addr}: {e}");
                                ctx.stats.write().await.protocol_errors += 1;
                                let reply = ServerEvent::validation_error(format!(
                                    "Malformed frame: {e}"
                                ));
                                let _ = ctx.router.send_to_connection(connection_id, reply).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        break;
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            event = rx.recv() => {
                match event {
                    Some(event) => {
                        let frame = match event.encode() {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::error!("Failed to encode outbound event: {e}");
                                continue;
                            }
                        };
                        if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    // Registry entry dropped out from under us (dead-connection
                    // cleanup won the race). Nothing left to do.
                    None => break,
                }
            }
        }
    }

    cleanup_connection(&ctx, connection_id).await;
    {
        let mut s = ctx.stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }
    Ok(())
}

/// Wait for the identifying `session:hello` frame.
///
/// Returns `None` when the client closes or sends something else first —
/// the protocol refuses to process any event from an anonymous connection.
async fn await_hello(
    ws_sender: &mut WsWriter,
    ws_receiver: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> Result<Option<UserIdentity>, Box<dyn std::error::Error + Send + Sync>> {
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                return match ClientEvent::decode(text.as_str()) {
                    Ok(ClientEvent::Hello {
                        user_id,
                        user_name,
                        avatar,
                    }) => {
                        let mut identity = UserIdentity::new(user_id, user_name);
                        if let Some(avatar) = avatar {
                            identity = identity.with_avatar(avatar);
                        }
                        Ok(Some(identity))
                    }
                    Ok(_) => {
                        let reply =
                            ServerEvent::validation_error("First frame must be session:hello");
                        ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                        Ok(None)
                    }
                    Err(e) => {
                        let reply = ServerEvent::validation_error(format!("Malformed frame: {e}"));
                        ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                        Ok(None)
                    }
                };
            }
            Some(Ok(Message::Ping(data))) => {
                ws_sender.send(Message::Pong(data)).await?;
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Err(e)) => return Err(Box::new(e)),
            _ => {}
        }
    }
}

/// Route one decoded client event to its handler.
async fn dispatch_event(
    ctx: &ServerContext,
    connection_id: Uuid,
    identity: &UserIdentity,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Hello { .. } => {
            reply_error(
                ctx,
                connection_id,
                ServerEvent::validation_error("Connection is already identified"),
            )
            .await;
        }
        ClientEvent::JoinWorkspace { workspace_id } => {
            handle_join(ctx, connection_id, identity, workspace_id).await;
        }
        ClientEvent::LeaveWorkspace => {
            leave_current_workspace(ctx, connection_id, identity.user_id).await;
        }
        ClientEvent::ChatSend {
            workspace_id,
            message,
            kind,
        } => {
            if !require_workspace(ctx, connection_id, workspace_id).await {
                return;
            }
            if message.trim().is_empty() {
                reply_error(
                    ctx,
                    connection_id,
                    ServerEvent::validation_error("Chat message must not be empty"),
                )
                .await;
                return;
            }
            let event = ServerEvent::ChatMessage {
                id: Uuid::new_v4(),
                workspace_id,
                user_id: identity.user_id,
                user_name: identity.user_name.clone(),
                message,
                timestamp: chrono::Utc::now(),
                kind,
            };
            let delivery = ctx
                .router
                .broadcast_to_workspace(workspace_id, &event, Some(connection_id))
                .await;
            reap_dead(ctx, delivery);
        }
        ClientEvent::Typing { workspace_id } => {
            if !require_workspace(ctx, connection_id, workspace_id).await {
                return;
            }
            if ctx.presence.set_typing(workspace_id, identity.user_id).await {
                let event = ServerEvent::Typing {
                    workspace_id,
                    user_id: identity.user_id,
                };
                let delivery = ctx
                    .router
                    .broadcast_to_workspace(workspace_id, &event, Some(connection_id))
                    .await;
                reap_dead(ctx, delivery);
            }
        }
        ClientEvent::StopTyping { workspace_id } => {
            if !require_workspace(ctx, connection_id, workspace_id).await {
                return;
            }
            if ctx
                .presence
                .clear_typing(workspace_id, identity.user_id)
                .await
            {
                let event = ServerEvent::StopTyping {
                    workspace_id,
                    user_id: identity.user_id,
                };
                let delivery = ctx
                    .router
                    .broadcast_to_workspace(workspace_id, &event, Some(connection_id))
                    .await;
                reap_dead(ctx, delivery);
            }
        }
        ClientEvent::DocumentOperation {
            workspace_id,
            document_id,
            operation,
        } => {
            if !require_workspace(ctx, connection_id, workspace_id).await {
                return;
            }
            // Relayed verbatim: the operation payload is never interpreted.
            let event = ServerEvent::DocumentOperation {
                document_id,
                operation,
                user_id: identity.user_id,
                timestamp: chrono::Utc::now(),
            };
            let delivery = ctx
                .router
                .broadcast_to_workspace(workspace_id, &event, Some(connection_id))
                .await;
            reap_dead(ctx, delivery);
        }
        ClientEvent::CallStart { workspace_id, kind } => {
            if !require_workspace(ctx, connection_id, workspace_id).await {
                return;
            }
            match ctx.calls.start(workspace_id, identity.user_id, kind).await {
                Ok(call) => {
                    let event = ServerEvent::CallStarted {
                        call_id: call.call_id,
                        workspace_id,
                        kind: call.kind,
                        started_by: identity.user_id,
                    };
                    // The initiator learns the call id through the direct
                    // copy; the rest of the room through the broadcast.
                    let _ = ctx
                        .router
                        .send_to_connection(connection_id, event.clone())
                        .await;
                    let delivery = ctx
                        .router
                        .broadcast_to_workspace(workspace_id, &event, Some(connection_id))
                        .await;
                    reap_dead(ctx, delivery);
                    log::info!(
                        "Call {} started in workspace {workspace_id} by {}",
                        call.call_id,
                        identity.user_id
                    );
                }
                Err(e) => reply_call_error(ctx, connection_id, e).await,
            }
        }
        ClientEvent::CallJoin { call_id } => {
            // Participants are always drawn from the call's workspace.
            let Some(call_workspace) = ctx.calls.workspace_of(call_id).await else {
                reply_call_error(ctx, connection_id, CallError::NoSuchCall(call_id)).await;
                return;
            };
            let bound = ctx
                .registry
                .get(connection_id)
                .await
                .and_then(|entry| entry.workspace_id);
            if bound != Some(call_workspace) {
                reply_error(
                    ctx,
                    connection_id,
                    ServerEvent::invalid_call_state("Not joined to the call's workspace"),
                )
                .await;
                return;
            }
            match ctx.calls.join(call_id, identity.user_id).await {
                Ok(call) => {
                    let event = ServerEvent::CallParticipantJoined {
                        call_id,
                        user_id: identity.user_id,
                    };
                    let delivery = ctx
                        .router
                        .broadcast_to_workspace(call.workspace_id, &event, None)
                        .await;
                    reap_dead(ctx, delivery);
                }
                Err(e) => reply_call_error(ctx, connection_id, e).await,
            }
        }
        ClientEvent::CallLeave { call_id } => {
            match ctx.calls.leave(call_id, identity.user_id).await {
                Ok(departure) => {
                    announce_departure(ctx, call_id, identity.user_id, &departure).await;
                }
                Err(e) => reply_call_error(ctx, connection_id, e).await,
            }
        }
        ClientEvent::CallEnd { call_id } => {
            match ctx.calls.end(call_id, identity.user_id).await {
                Ok(call) => {
                    let event = ServerEvent::CallEnded {
                        call_id,
                        ended_by: identity.user_id,
                    };
                    let delivery = ctx
                        .router
                        .broadcast_to_workspace(call.workspace_id, &event, None)
                        .await;
                    reap_dead(ctx, delivery);
                    log::info!("Call {call_id} ended by {}", identity.user_id);
                }
                Err(e) => reply_call_error(ctx, connection_id, e).await,
            }
        }
        ClientEvent::CallOffer { call_id, to, offer } => {
            relay_signal(
                ctx,
                connection_id,
                call_id,
                identity.user_id,
                to,
                ServerEvent::CallOffer {
                    call_id,
                    from: identity.user_id,
                    to,
                    offer,
                },
            )
            .await;
        }
        ClientEvent::CallAnswer { call_id, to, answer } => {
            relay_signal(
                ctx,
                connection_id,
                call_id,
                identity.user_id,
                to,
                ServerEvent::CallAnswer {
                    call_id,
                    from: identity.user_id,
                    to,
                    answer,
                },
            )
            .await;
        }
        ClientEvent::CallIceCandidate {
            call_id,
            to,
            candidate,
        } => {
            relay_signal(
                ctx,
                connection_id,
                call_id,
                identity.user_id,
                to,
                ServerEvent::CallIceCandidate {
                    call_id,
                    from: identity.user_id,
                    to,
                    candidate,
                },
            )
            .await;
        }
        ClientEvent::Ping => {
            let _ = ctx
                .router
                .send_to_connection(connection_id, ServerEvent::Pong)
                .await;
        }
    }
}

/// Admission flow for `workspace:join`.
async fn handle_join(
    ctx: &ServerContext,
    connection_id: Uuid,
    identity: &UserIdentity,
    workspace_id: Uuid,
) {
    let current = match ctx.registry.get(connection_id).await {
        Some(entry) => entry.workspace_id,
        None => return,
    };

    // Re-joining the same workspace just re-sends the snapshot.
    if current == Some(workspace_id) {
        let snapshot = ctx.presence.snapshot(workspace_id).await;
        let _ = ctx
            .router
            .send_to_connection(
                connection_id,
                ServerEvent::WorkspaceJoined {
                    workspace_id,
                    joined: snapshot.joined,
                    typing: snapshot.typing,
                },
            )
            .await;
        return;
    }

    if !ctx.gate.can_join(workspace_id, identity.user_id).await {
        log::info!(
            "Join refused: user {} to workspace {workspace_id}",
            identity.user_id
        );
        reply_error(
            ctx,
            connection_id,
            ServerEvent::access_denied("Not a member of this workspace"),
        )
        .await;
        return;
    }

    if ctx.registry.workspace_len(workspace_id).await >= ctx.config.max_users_per_workspace {
        reply_error(
            ctx,
            connection_id,
            ServerEvent::Error {
                message: "Workspace is full".into(),
                code: Some(ErrorCode::WorkspaceFull),
            },
        )
        .await;
        return;
    }

    // Switching workspaces: run the full leave for the old one first.
    if current.is_some() {
        leave_current_workspace(ctx, connection_id, identity.user_id).await;
    }

    if ctx
        .registry
        .set_workspace(connection_id, workspace_id)
        .await
        .is_err()
    {
        return; // connection died mid-join
    }
    ctx.presence.join(workspace_id, identity.user_id).await;
    let snapshot = ctx.presence.snapshot(workspace_id).await;
    let member_count = snapshot.joined.len();

    let _ = ctx
        .router
        .send_to_connection(
            connection_id,
            ServerEvent::WorkspaceJoined {
                workspace_id,
                joined: snapshot.joined,
                typing: snapshot.typing,
            },
        )
        .await;

    let announce = ServerEvent::UserJoined {
        workspace_id,
        user_id: identity.user_id,
        user_name: identity.user_name.clone(),
        avatar: identity.avatar.clone(),
        member_count,
    };
    let delivery = ctx
        .router
        .broadcast_to_workspace(workspace_id, &announce, Some(connection_id))
        .await;
    reap_dead(ctx, delivery);

    log::info!(
        "User {} joined workspace {workspace_id} ({member_count} members)",
        identity.user_id
    );
}

/// Leave the bound workspace: call cleanup, presence, departure announce.
/// No-op when the connection is not in a workspace.
async fn leave_current_workspace(ctx: &ServerContext, connection_id: Uuid, user_id: Uuid) {
    let Some(workspace_id) = ctx.registry.clear_workspace(connection_id).await else {
        return;
    };

    if let Some(departure) = ctx.calls.leave_workspace_call(workspace_id, user_id).await {
        announce_departure(ctx, departure.call.call_id, user_id, &departure).await;
    }
    ctx.presence.leave(workspace_id, user_id).await;

    let event = ServerEvent::UserLeft {
        workspace_id,
        user_id,
    };
    let delivery = ctx
        .router
        .broadcast_to_workspace(workspace_id, &event, Some(connection_id))
        .await;
    reap_dead(ctx, delivery);

    log::info!("User {user_id} left workspace {workspace_id}");
}

/// Broadcast the consequences of a participant leaving a call.
async fn announce_departure(
    ctx: &ServerContext,
    call_id: Uuid,
    user_id: Uuid,
    departure: &crate::call::CallDeparture,
) {
    let workspace_id = departure.call.workspace_id;
    let event = if departure.ended {
        ServerEvent::CallEnded {
            call_id,
            ended_by: user_id,
        }
    } else {
        ServerEvent::CallParticipantLeft { call_id, user_id }
    };
    let delivery = ctx
        .router
        .broadcast_to_workspace(workspace_id, &event, None)
        .await;
    reap_dead(ctx, delivery);
}

/// Validate and forward one point-to-point signaling frame.
async fn relay_signal(
    ctx: &ServerContext,
    connection_id: Uuid,
    call_id: Uuid,
    from: Uuid,
    to: Uuid,
    event: ServerEvent,
) {
    let workspace_id = match ctx.calls.validate_relay(call_id, from, to).await {
        Ok(workspace_id) => workspace_id,
        Err(e) => {
            reply_call_error(ctx, connection_id, e).await;
            return;
        }
    };
    if ctx.router.send_to_user(workspace_id, to, event).await.is_err() {
        reply_error(
            ctx,
            connection_id,
            ServerEvent::invalid_call_state(format!("Participant {to} is not reachable")),
        )
        .await;
    }
}

/// Check that the connection is bound to the workspace it claims to act in.
async fn require_workspace(ctx: &ServerContext, connection_id: Uuid, workspace_id: Uuid) -> bool {
    let bound = ctx
        .registry
        .get(connection_id)
        .await
        .and_then(|entry| entry.workspace_id);
    if bound == Some(workspace_id) {
        return true;
    }
    reply_error(
        ctx,
        connection_id,
        ServerEvent::validation_error("Not joined to this workspace"),
    )
    .await;
    false
}

async fn reply_error(ctx: &ServerContext, connection_id: Uuid, event: ServerEvent) {
    let _ = ctx.router.send_to_connection(connection_id, event).await;
}

async fn reply_call_error(ctx: &ServerContext, connection_id: Uuid, error: CallError) {
    reply_error(
        ctx,
        connection_id,
        ServerEvent::invalid_call_state(error.to_string()),
    )
    .await;
}

/// Kick off disconnect cleanup for connections whose channel is closed.
///
/// Their socket tasks have already exited (or will momentarily); the
/// cleanup is idempotent with the one the task runs itself.
fn reap_dead(ctx: &ServerContext, delivery: Delivery) {
    for connection_id in delivery.dead {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            cleanup_connection(&ctx, connection_id).await;
        });
    }
}

/// Full disconnect teardown. Safe to run more than once per connection.
async fn cleanup_connection(ctx: &ServerContext, connection_id: Uuid) {
    let Some(entry) = ctx.registry.unregister(connection_id).await else {
        return; // already cleaned up
    };
    let user_id = entry.identity.user_id;

    if let Some(workspace_id) = entry.workspace_id {
        if let Some(departure) = ctx.calls.leave_workspace_call(workspace_id, user_id).await {
            announce_departure(ctx, departure.call.call_id, user_id, &departure).await;
        }
        ctx.presence.leave(workspace_id, user_id).await;

        let event = ServerEvent::UserLeft {
            workspace_id,
            user_id,
        };
        let delivery = ctx
            .router
            .broadcast_to_workspace(workspace_id, &event, None)
            .await;
        reap_dead(ctx, delivery);
    }
    log::info!("Connection {connection_id} cleaned up (user {user_id})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::StaticMembership;

    fn test_server() -> CollabServer {
        let gate = Arc::new(AccessGate::new(Arc::new(StaticMembership::new())));
        CollabServer::new(ServerConfig::default(), gate)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_users_per_workspace, 100);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = test_server();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.protocol_errors, 0);
    }

    #[tokio::test]
    async fn test_server_shares_registry_with_router() {
        let server = test_server();
        let registry = server.registry();
        let router = server.router();
        assert!(Arc::ptr_eq(router.registry(), &registry));
    }

    #[tokio::test]
    async fn test_cleanup_connection_idempotent() {
        let server = test_server();
        let ctx = server.ctx.clone();

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ctx
            .registry
            .register(UserIdentity::new(Uuid::new_v4(), "Alice"), tx)
            .await;

        cleanup_connection(&ctx, conn).await;
        cleanup_connection(&ctx, conn).await; // second run finds nothing
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_runs_workspace_teardown() {
        let server = test_server();
        let ctx = server.ctx.clone();
        let ws = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ctx
            .registry
            .register(UserIdentity::new(user, "Alice"), tx)
            .await;
        ctx.registry.set_workspace(conn, ws).await.unwrap();
        ctx.presence.join(ws, user).await;

        cleanup_connection(&ctx, conn).await;

        assert!(!ctx.presence.is_joined(ws, user).await);
        assert_eq!(ctx.registry.workspace_len(ws).await, 0);
    }
}
