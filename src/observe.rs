//! Observation sink for shadow session activity.
//!
//! The sink receives every data-delivery event and every lifecycle
//! transition. It is purely advisory: no backpressure, no replies, and a
//! slow sink must never be able to stall a session, so `observe` is
//! synchronous and expected to return quickly.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::identifiers::SessionId;

// ============================================================================
// ObservedEvent
// ============================================================================

/// An event surfaced by a shadow session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEvent {
    /// Underlying connection reported open.
    Opened,

    /// A data-delivery frame arrived; carries the raw payload.
    Data(String),

    /// Connection closed (remote close or local teardown).
    Closed,

    /// Connection or handshake failed; carries the cause.
    Errored(String),
}

impl ObservedEvent {
    /// Short tag for logging.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Data(_) => "data",
            Self::Closed => "closed",
            Self::Errored(_) => "errored",
        }
    }
}

// ============================================================================
// ObservationSink
// ============================================================================

/// Receiver for shadow session events.
///
/// Implementations must be cheap and non-blocking; sessions call this from
/// their event loop.
pub trait ObservationSink: Send + Sync {
    /// Called once per observed event.
    fn observe(&self, session: SessionId, event: &ObservedEvent);
}

/// Shared sink handle passed around sessions.
pub type SharedSink = Arc<dyn ObservationSink>;

// ============================================================================
// TracingSink
// ============================================================================

/// Default sink that forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservationSink for TracingSink {
    fn observe(&self, session: SessionId, event: &ObservedEvent) {
        match event {
            ObservedEvent::Opened => info!(session = %session, "Shadow session opened"),
            ObservedEvent::Data(payload) => {
                info!(session = %session, payload = %payload, "Shadow session data");
            }
            ObservedEvent::Closed => info!(session = %session, "Shadow session closed"),
            ObservedEvent::Errored(cause) => {
                warn!(session = %session, cause = %cause, "Shadow session errored");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
