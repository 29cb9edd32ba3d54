//! Session state machine states and the UI-facing status.

use std::fmt;

/// Lifecycle of the voice session.
///
/// `Idle → Connecting → Active → Disconnecting → Idle`, with `Failed`
/// reachable from `Connecting` or `Active` and always returning to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Disconnecting,
    Failed,
}

impl SessionState {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Active)
                | (Connecting, Failed)
                | (Connecting, Idle)
                | (Active, Disconnecting)
                | (Active, Failed)
                | (Disconnecting, Idle)
                | (Failed, Idle)
        )
    }

    /// Whether the session holds devices or a transport in this state.
    pub fn holds_resources(self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Read-only snapshot for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Microphone and speaker are open.
    pub devices_ready: bool,
    /// The endpoint confirmed the session and is taking audio.
    pub listening: bool,
    /// The last session was closed by the endpoint rather than by a stop.
    pub ended_by_endpoint: bool,
    /// Human-readable reason for the most recent failure.
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.state, &self.error) {
            (SessionState::Idle | SessionState::Failed, Some(reason)) => f.write_str(reason),
            (SessionState::Idle, None) if self.ended_by_endpoint => f.write_str("Disconnected"),
            (SessionState::Idle | SessionState::Failed, None) => f.write_str("Ready to connect"),
            (SessionState::Connecting, _) if !self.devices_ready => {
                f.write_str("Initializing audio...")
            }
            (SessionState::Connecting, _) => f.write_str("Connecting..."),
            (SessionState::Active, _) if self.listening => f.write_str("Listening..."),
            (SessionState::Active, _) => f.write_str("Connecting..."),
            (SessionState::Disconnecting, _) => f.write_str("Disconnecting..."),
        }
    }
}

/// Counters for the current session. Reset on every start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub frames_sent: u64,
    /// Frames captured before the endpoint was ready.
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    pub decode_failures: u64,
    pub interruptions: u64,
}
