//! Turn and event classifications shared by storage and the pipeline.

use crate::stream::StopReason;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persistent status of a turn row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Running => "running",
            TurnStatus::Completed => "completed",
            TurnStatus::Cancelled => "cancelled",
            TurnStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Running)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn stop reason
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal classification of a turn. `None` is the empty string of a
/// still-running turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStopReason {
    EndTurn,
    Cancelled,
    Error,
    None,
}

impl TurnStopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStopReason::EndTurn => "end_turn",
            TurnStopReason::Cancelled => "cancelled",
            TurnStopReason::Error => "error",
            TurnStopReason::None => "",
        }
    }
}

impl From<StopReason> for TurnStopReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn => TurnStopReason::EndTurn,
            StopReason::Cancelled => TurnStopReason::Cancelled,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The type tag shared by the persisted event log and the SSE frames —
/// every emitted frame has a durable event row with the same type and
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TurnStarted,
    MessageDelta,
    PermissionRequired,
    TurnCompleted,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TurnStarted => "turn_started",
            EventType::MessageDelta => "message_delta",
            EventType::PermissionRequired => "permission_required",
            EventType::TurnCompleted => "turn_completed",
            EventType::Error => "error",
        }
    }
}
