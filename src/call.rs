//! Call lifecycle state and WebRTC signaling validation.
//!
//! Per-workspace state machine:
//!
//! ```text
//! NoCall ──start──► Started ──2nd participant──► Active
//!                      │                            │
//!                      └──────── leave/end ─────────┘
//!                                    │
//!                                  Ended ──discard──► NoCall
//! ```
//!
//! At most one call exists per workspace. A `start` while a call is in
//! progress is rejected rather than overwriting it — silently replacing an
//! active call would strand its participants (see DESIGN.md).
//!
//! The relay itself is pure pass-through: offers, answers and ICE
//! candidates are validated against the current participant set and then
//! forwarded point-to-point, never inspected. Validation failures are
//! reported to the requester only.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::protocol::CallKind;

/// Call lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Created, waiting for a second participant.
    Started,
    /// Two or more participants connected.
    Active,
    /// Terminated; the call is discarded immediately after.
    Ended,
}

/// A call in progress within one workspace.
#[derive(Debug, Clone)]
pub struct Call {
    pub call_id: Uuid,
    pub workspace_id: Uuid,
    pub kind: CallKind,
    pub participants: HashSet<Uuid>,
    pub state: CallState,
    pub started_by: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Signaling failures, returned to the requester only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// A call already exists in this workspace.
    CallInProgress(Uuid),
    /// The referenced call does not exist (stale or bogus id).
    NoSuchCall(Uuid),
    /// The stated user is not a participant of the call.
    NotAParticipant(Uuid),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallInProgress(id) => write!(f, "A call is already in progress ({id})"),
            Self::NoSuchCall(id) => write!(f, "No such call {id}"),
            Self::NotAParticipant(user) => write!(f, "User {user} is not in the call"),
        }
    }
}

impl std::error::Error for CallError {}

/// Result of a participant leaving.
#[derive(Debug, Clone)]
pub struct CallDeparture {
    pub call: Call,
    /// True when the last participant left and the call was discarded.
    pub ended: bool,
}

#[derive(Default)]
struct CallTable {
    /// workspace_id → call (one per workspace)
    by_workspace: HashMap<Uuid, Call>,
    /// call_id → workspace_id
    workspace_of: HashMap<Uuid, Uuid>,
}

/// Owns all per-workspace call state.
pub struct CallRelay {
    table: Mutex<CallTable>,
}

impl CallRelay {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(CallTable::default()),
        }
    }

    /// Start a call. Legal only when the workspace has no call.
    pub async fn start(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        kind: CallKind,
    ) -> Result<Call, CallError> {
        let mut table = self.table.lock().await;
        if let Some(existing) = table.by_workspace.get(&workspace_id) {
            return Err(CallError::CallInProgress(existing.call_id));
        }

        let call = Call {
            call_id: Uuid::new_v4(),
            workspace_id,
            kind,
            participants: HashSet::from([user_id]),
            state: CallState::Started,
            started_by: user_id,
            started_at: Utc::now(),
        };
        table.workspace_of.insert(call.call_id, workspace_id);
        table.by_workspace.insert(workspace_id, call.clone());
        Ok(call)
    }

    /// Join an existing call. Transitions to Active at two participants.
    pub async fn join(&self, call_id: Uuid, user_id: Uuid) -> Result<Call, CallError> {
        let mut table = self.table.lock().await;
        let workspace_id = *table
            .workspace_of
            .get(&call_id)
            .ok_or(CallError::NoSuchCall(call_id))?;
        let call = table
            .by_workspace
            .get_mut(&workspace_id)
            .ok_or(CallError::NoSuchCall(call_id))?;

        call.participants.insert(user_id);
        if call.participants.len() >= 2 {
            call.state = CallState::Active;
        }
        Ok(call.clone())
    }

    /// Validate a relay frame: the call must exist and both endpoints must
    /// be current participants. Returns the workspace for routing.
    pub async fn validate_relay(
        &self,
        call_id: Uuid,
        from: Uuid,
        to: Uuid,
    ) -> Result<Uuid, CallError> {
        let table = self.table.lock().await;
        let workspace_id = *table
            .workspace_of
            .get(&call_id)
            .ok_or(CallError::NoSuchCall(call_id))?;
        let call = table
            .by_workspace
            .get(&workspace_id)
            .ok_or(CallError::NoSuchCall(call_id))?;

        if !call.participants.contains(&from) {
            return Err(CallError::NotAParticipant(from));
        }
        if !call.participants.contains(&to) {
            return Err(CallError::NotAParticipant(to));
        }
        Ok(workspace_id)
    }

    /// Remove a participant; discard the call when it becomes empty.
    pub async fn leave(&self, call_id: Uuid, user_id: Uuid) -> Result<CallDeparture, CallError> {
        let mut table = self.table.lock().await;
        let workspace_id = *table
            .workspace_of
            .get(&call_id)
            .ok_or(CallError::NoSuchCall(call_id))?;
        let call = table
            .by_workspace
            .get_mut(&workspace_id)
            .ok_or(CallError::NoSuchCall(call_id))?;

        if !call.participants.remove(&user_id) {
            return Err(CallError::NotAParticipant(user_id));
        }

        if !call.participants.is_empty() {
            return Ok(CallDeparture {
                call: call.clone(),
                ended: false,
            });
        }

        let mut call = table
            .by_workspace
            .remove(&workspace_id)
            .ok_or(CallError::NoSuchCall(call_id))?;
        call.state = CallState::Ended;
        table.workspace_of.remove(&call_id);
        Ok(CallDeparture { call, ended: true })
    }

    /// Explicit termination by a participant, regardless of headcount.
    pub async fn end(&self, call_id: Uuid, user_id: Uuid) -> Result<Call, CallError> {
        let mut table = self.table.lock().await;
        let workspace_id = *table
            .workspace_of
            .get(&call_id)
            .ok_or(CallError::NoSuchCall(call_id))?;
        {
            let call = table
                .by_workspace
                .get(&workspace_id)
                .ok_or(CallError::NoSuchCall(call_id))?;
            if !call.participants.contains(&user_id) {
                return Err(CallError::NotAParticipant(user_id));
            }
        }

        let mut call = table
            .by_workspace
            .remove(&workspace_id)
            .ok_or(CallError::NoSuchCall(call_id))?;
        call.state = CallState::Ended;
        table.workspace_of.remove(&call_id);
        Ok(call)
    }

    /// Disconnect cleanup: remove a user from their workspace's call, if
    /// any. Returns `None` when the user was not in a call.
    pub async fn leave_workspace_call(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Option<CallDeparture> {
        let call_id = {
            let table = self.table.lock().await;
            let call = table.by_workspace.get(&workspace_id)?;
            if !call.participants.contains(&user_id) {
                return None;
            }
            call.call_id
        };
        self.leave(call_id, user_id).await.ok()
    }

    /// The workspace a live call belongs to.
    pub async fn workspace_of(&self, call_id: Uuid) -> Option<Uuid> {
        self.table.lock().await.workspace_of.get(&call_id).copied()
    }

    /// The current call in a workspace, if any.
    pub async fn current(&self, workspace_id: Uuid) -> Option<Call> {
        self.table
            .lock()
            .await
            .by_workspace
            .get(&workspace_id)
            .cloned()
    }

    /// Number of workspaces with a call in progress.
    pub async fn active_calls(&self) -> usize {
        self.table.lock().await.by_workspace.len()
    }
}

impl Default for CallRelay {
    fn default() -> Self {
        Self::new()
    }
}
