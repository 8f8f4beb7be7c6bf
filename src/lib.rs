//! # campus-collab — Real-time collaboration layer for the campus platform
//!
//! WebSocket-based workspace collaboration (chat, presence, document op
//! relay, call signaling) plus a validated, audited event bus that drives
//! reputation, achievements, and notifications.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌───────────────┐
//! │ CollabClient │ ◄─────────────────► │ CollabServer  │
//! │  (per user)  │     JSON frames     │  (central)    │
//! └──────────────┘                     └───────┬───────┘
//!                                              │
//!                       ┌──────────┬───────────┼───────────┬──────────┐
//!                       ▼          ▼           ▼           ▼          ▼
//!                  Connection   Presence    Access       Call    Broadcast
//!                  Registry     Tracker     Gate         Relay   Router
//!                                                                   ▲
//!                                              ┌────────────────────┘
//!                                              │ live notification push
//!                  ┌───────────┐        ┌──────┴─────┐
//!                  │ AuditLog  │ ◄───── │  EventBus  │ ◄── platform events
//!                  └───────────┘        └──────┬─────┘
//!                                              │
//!                               reputation → achievements → notifications
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol (tagged client/server events)
//! - [`registry`] — Connection identity and workspace bindings
//! - [`presence`] — Joined and typing sets per workspace
//! - [`access`] — Join admission (membership + allow-lists, fail closed)
//! - [`broadcast`] — Fan-out with sender exclusion and dead-peer reporting
//! - [`call`] — Call lifecycle state and WebRTC signaling validation
//! - [`server`] — WebSocket collaboration server
//! - [`client`] — WebSocket collaboration client
//! - [`events`] — Event bus, audit log, and the handler cascade

pub mod access;
pub mod broadcast;
pub mod call;
pub mod client;
pub mod events;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod server;

// Re-exports for convenience
pub use access::{AccessGate, LookupError, MembershipLookup, StaticMembership};
pub use broadcast::{BroadcastRouter, Delivery, RouteError, RouterStats};
pub use call::{Call, CallDeparture, CallError, CallRelay, CallState};
pub use client::{CollabClient, ConnectionState};
pub use events::{
    AuditLog, DomainEvent, EventBus, EventHandler, EventKind, EventRecord, FileAuditLog,
    MemoryAuditLog, PublishError,
};
pub use presence::{PresenceSnapshot, PresenceTracker};
pub use protocol::{CallKind, ChatKind, ClientEvent, ErrorCode, ProtocolError, ServerEvent};
pub use registry::{ConnectionEntry, ConnectionRegistry, Recipient, RegistryError, UserIdentity};
pub use server::{CollabServer, ServerConfig, ServerStats};
