//! Protocol engines: pure handshake/streaming state machines.
//!
//! An engine encodes the send/receive rules of one protocol family and does
//! no I/O. The owning [`ShadowSession`](crate::session::ShadowSession) feeds
//! it connection events and raw inbound payloads; the engine answers with an
//! [`EngineStep`]: frames to put on the wire and events for the observation
//! sink.
//!
//! # State discipline
//!
//! Engine state only advances forward. The absorbing states (`Closed`,
//! `Errored`) are reachable from anywhere and never left. A message that a
//! state does not expect is ignored, and a payload that does not parse is
//! treated as an empty message; neither terminates the session.
//!
//! # Engines
//!
//! | Engine | Family | Handshake |
//! |--------|--------|-----------|
//! | [`SubscriptionEngine`] | subscription | init → ack → subscribe → stream → ping/pong |
//! | [`SessionLinkEngine`] | session_link | host-session → ok → is-linked/get-config → heartbeat |

// ============================================================================
// Modules
// ============================================================================

pub mod session_link;
pub mod subscription;

pub use session_link::{SessionLinkEngine, SessionLinkState};
pub use subscription::{SubscriptionEngine, SubscriptionState};

// ============================================================================
// Imports
// ============================================================================

use crate::observe::ObservedEvent;

// ============================================================================
// EngineStep
// ============================================================================

/// Output of one engine call: frames to send, events to surface.
///
/// Frames are already-encoded wire payloads, sent in order. Events go to the
/// observation sink. An empty step means the input was absorbed silently.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineStep {
    /// Outbound wire payloads, in send order.
    pub frames: Vec<String>,

    /// Events for the observation sink.
    pub events: Vec<ObservedEvent>,
}

impl EngineStep {
    /// An empty step: nothing to send, nothing to report.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A step carrying a single outbound frame.
    #[inline]
    #[must_use]
    pub fn frame(frame: impl Into<String>) -> Self {
        Self {
            frames: vec![frame.into()],
            events: Vec::new(),
        }
    }

    /// A step carrying a single observed event.
    #[inline]
    #[must_use]
    pub fn event(event: ObservedEvent) -> Self {
        Self {
            frames: Vec::new(),
            events: vec![event],
        }
    }

    /// Appends another outbound frame.
    #[inline]
    #[must_use]
    pub fn and_frame(mut self, frame: impl Into<String>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Returns `true` if this step does nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.events.is_empty()
    }
}

// ============================================================================
// ProtocolEngine
// ============================================================================

/// One protocol family's handshake and streaming rules.
///
/// Implementations are pure: every method is synchronous, does no I/O, and
/// communicates only through the returned [`EngineStep`] and its own state.
pub trait ProtocolEngine: Send {
    /// The session began dialing the endpoint.
    fn on_connecting(&mut self);

    /// The underlying connection reported open; returns the opening frames.
    fn on_connect(&mut self) -> EngineStep;

    /// A raw inbound payload arrived.
    ///
    /// Malformed payloads and unrecognized message shapes produce an empty
    /// step, never an error.
    fn on_message(&mut self, raw: &str) -> EngineStep;

    /// The session flushed the frames of the previous step to the wire.
    fn on_sent(&mut self);

    /// The underlying connection closed.
    fn on_close(&mut self);

    /// The underlying connection or handshake failed.
    fn on_error(&mut self, cause: &str);

    /// Returns `true` once the handshake reached its acknowledged state.
    ///
    /// Drives the session's handshake deadline: sessions that never reach
    /// this within the configured timeout are closed and marked errored.
    fn handshake_complete(&self) -> bool;

    /// Returns `true` if the engine is in an absorbing state.
    fn is_terminal(&self) -> bool;
}

// ============================================================================
// Tag Extraction
// ============================================================================

/// Extracts the `type` tag from a raw JSON payload.
///
/// Returns `None` for non-JSON payloads, non-object payloads, and objects
/// without a string `type` field; callers map all of those to their ignored
/// case.
#[must_use]
pub(crate) fn message_type(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
