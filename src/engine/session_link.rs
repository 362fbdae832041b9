//! Session-link-family protocol engine.
//!
//! RPC-shaped handshake: on connect the engine sends a host-session frame
//! carrying a fixed numeric request ID, session ID, and session key. On the
//! remote `OK` it issues an `IsLinked` query followed by a
//! `GetSessionConfig` query, then settles into a heartbeat loop where the
//! literal payload `"h"` is echoed back whenever the remote sends either
//! `GetSessionConfigOK` or `"h"` itself.

// ============================================================================
// Imports
// ============================================================================

use serde_json::json;

use crate::config::SessionLinkParams;
use crate::engine::{EngineStep, ProtocolEngine, message_type};

// ============================================================================
// Constants
// ============================================================================

/// Literal heartbeat payload, sent and received verbatim.
const HEARTBEAT: &str = "h";

// ============================================================================
// SessionLinkState
// ============================================================================

/// Session-link engine state. Transitions are forward-only; `Closed` and
/// `Errored` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionLinkState {
    /// Constructed, not yet dialing.
    Idle,
    /// Dialing the endpoint.
    Connecting,
    /// Connection open, host-session frame queued or sent.
    HostSessionSent,
    /// Remote acknowledged; link and config queries queued.
    Ok,
    /// Queries flushed, waiting for the config response.
    AwaitingConfig,
    /// Config response received.
    ConfigReceived,
    /// Heartbeat echo loop.
    HeartbeatLoop,
    /// Connection closed. Absorbing.
    Closed,
    /// Connection or handshake failed. Absorbing.
    Errored,
}

impl SessionLinkState {
    /// Returns `true` for the absorbing states.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Recognized inbound message shapes, one case per tag plus a catch-all.
#[derive(Debug)]
enum Inbound {
    /// `{"type":"OK"}`: host-session accepted.
    Ok,
    /// `{"type":"GetSessionConfigOK"}`: config query answered.
    SessionConfigOk,
    /// The literal payload `"h"`: heartbeat probe.
    Heartbeat,
    /// Anything else, including malformed payloads.
    Ignored,
}

impl Inbound {
    fn decode(raw: &str) -> Self {
        if raw == HEARTBEAT {
            return Self::Heartbeat;
        }
        match message_type(raw).as_deref() {
            Some("OK") => Self::Ok,
            Some("GetSessionConfigOK") => Self::SessionConfigOk,
            _ => Self::Ignored,
        }
    }
}

// ============================================================================
// SessionLinkEngine
// ============================================================================

/// State machine for one session-link shadow session.
#[derive(Debug)]
pub struct SessionLinkEngine {
    params: SessionLinkParams,
    state: SessionLinkState,
}

impl SessionLinkEngine {
    /// Creates an idle engine.
    #[must_use]
    pub fn new(params: SessionLinkParams) -> Self {
        Self {
            params,
            state: SessionLinkState::Idle,
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionLinkState {
        self.state
    }

    /// Forward-only transition; backward moves are ignored, terminal states
    /// never left.
    fn advance(&mut self, next: SessionLinkState) {
        if !self.state.is_terminal() && next > self.state {
            self.state = next;
        }
    }

    fn host_session_frame(&self) -> String {
        json!({
            "type": "HostSession",
            "id": self.params.request_id_base,
            "sessionId": self.params.session_id,
            "sessionKey": self.params.session_key,
        })
        .to_string()
    }

    fn query_frame(&self, name: &str, offset: u64) -> String {
        json!({
            "type": name,
            "id": self.params.request_id_base + offset,
            "sessionId": self.params.session_id,
        })
        .to_string()
    }
}

// ============================================================================
// SessionLinkEngine - ProtocolEngine
// ============================================================================

impl ProtocolEngine for SessionLinkEngine {
    fn on_connecting(&mut self) {
        self.advance(SessionLinkState::Connecting);
    }

    fn on_connect(&mut self) -> EngineStep {
        self.advance(SessionLinkState::HostSessionSent);
        EngineStep::frame(self.host_session_frame())
    }

    fn on_message(&mut self, raw: &str) -> EngineStep {
        if self.state.is_terminal() {
            return EngineStep::none();
        }

        match Inbound::decode(raw) {
            Inbound::Ok if self.state == SessionLinkState::HostSessionSent => {
                self.advance(SessionLinkState::Ok);
                // IsLinked first, GetSessionConfig second; distinct ids.
                EngineStep::frame(self.query_frame("IsLinked", 1))
                    .and_frame(self.query_frame("GetSessionConfig", 2))
            }
            Inbound::SessionConfigOk if self.state >= SessionLinkState::AwaitingConfig => {
                self.advance(SessionLinkState::ConfigReceived);
                EngineStep::frame(HEARTBEAT)
            }
            Inbound::Heartbeat if self.state >= SessionLinkState::AwaitingConfig => {
                self.advance(SessionLinkState::HeartbeatLoop);
                EngineStep::frame(HEARTBEAT)
            }
            _ => EngineStep::none(),
        }
    }

    fn on_sent(&mut self) {
        if self.state == SessionLinkState::Ok {
            self.advance(SessionLinkState::AwaitingConfig);
        }
    }

    fn on_close(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionLinkState::Closed;
        }
    }

    fn on_error(&mut self, _cause: &str) {
        if !self.state.is_terminal() {
            self.state = SessionLinkState::Errored;
        }
    }

    fn handshake_complete(&self) -> bool {
        self.state >= SessionLinkState::Ok && !self.state.is_terminal()
    }

    fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ============================================================================
// Tests
// ============================================================================
