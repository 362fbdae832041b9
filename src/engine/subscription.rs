//! Subscription-family protocol engine.
//!
//! Reproduces the graphql-ws style handshake: the engine sends a
//! `connection_init` frame carrying a bearer credential, waits for
//! `connection_ack`, then subscribes to one operation with a fixed
//! watermark cursor and streams indefinitely, answering `ping` with a
//! keepalive `pong` and surfacing every `data` frame to the sink.
//!
//! The cursor is a subscribe-time parameter only: it is sent once in the
//! subscribe frame and never advanced as data arrives.

// ============================================================================
// Imports
// ============================================================================

use serde_json::json;

use crate::config::SubscriptionParams;
use crate::engine::{EngineStep, ProtocolEngine, message_type};
use crate::identifiers::RequestId;
use crate::observe::ObservedEvent;

// ============================================================================
// Constants
// ============================================================================

/// Fixed payload sent with every keepalive reply.
const KEEPALIVE_MESSAGE: &str = "keepalive";

// ============================================================================
// SubscriptionState
// ============================================================================

/// Subscription engine state. Transitions are forward-only; `Closed` and
/// `Errored` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubscriptionState {
    /// Constructed, not yet dialing.
    Idle,
    /// Dialing the endpoint.
    Connecting,
    /// Connection open, `connection_init` queued or sent.
    InitSent,
    /// `connection_ack` received, subscribe frame queued.
    Acked,
    /// Subscribe frame flushed to the wire.
    Subscribed,
    /// Receiving the stream.
    Streaming,
    /// Connection closed. Absorbing.
    Closed,
    /// Connection or handshake failed. Absorbing.
    Errored,
}

impl SubscriptionState {
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
///
/// Decode failures map to [`Inbound::Ignored`]; a payload that does not
/// parse is an empty message, not a fault.
#[derive(Debug)]
enum Inbound {
    /// `{"type":"connection_ack"}`: handshake acknowledged.
    ConnectionAck,
    /// `{"type":"ping"}`: liveness probe.
    Ping,
    /// `{"type":"data", ...}`: data delivery.
    Data,
    /// Anything else, including malformed payloads.
    Ignored,
}

impl Inbound {
    fn decode(raw: &str) -> Self {
        match message_type(raw).as_deref() {
            Some("connection_ack") => Self::ConnectionAck,
            Some("ping") => Self::Ping,
            Some("data") => Self::Data,
            _ => Self::Ignored,
        }
    }
}

// ============================================================================
// SubscriptionEngine
// ============================================================================

/// State machine for one subscription-family shadow session.
#[derive(Debug)]
pub struct SubscriptionEngine {
    params: SubscriptionParams,
    state: SubscriptionState,
    /// Request ID carried by the subscribe frame; fresh per engine.
    subscribe_id: RequestId,
}

impl SubscriptionEngine {
    /// Creates an idle engine with a fresh subscribe request ID.
    #[must_use]
    pub fn new(params: SubscriptionParams) -> Self {
        Self {
            params,
            state: SubscriptionState::Idle,
            subscribe_id: RequestId::generate(),
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Forward-only transition; backward moves are ignored, terminal states
    /// never left.
    fn advance(&mut self, next: SubscriptionState) {
        if !self.state.is_terminal() && next > self.state {
            self.state = next;
        }
    }

    fn init_frame(&self) -> String {
        json!({
            "type": "connection_init",
            "payload": {
                "headers": {
                    "Authorization": format!("Bearer {}", self.params.bearer_token),
                },
            },
        })
        .to_string()
    }

    fn subscribe_frame(&self) -> String {
        json!({
            "id": self.subscribe_id,
            "type": "subscribe",
            "payload": {
                "variables": { "initialValue": self.params.initial_cursor },
                "extensions": {},
                "operationName": self.params.operation_name,
                "query": self.params.query,
            },
        })
        .to_string()
    }

    fn pong_frame() -> String {
        json!({
            "type": "pong",
            "payload": { "message": KEEPALIVE_MESSAGE },
        })
        .to_string()
    }
}

// ============================================================================
// SubscriptionEngine - ProtocolEngine
// ============================================================================

impl ProtocolEngine for SubscriptionEngine {
    fn on_connecting(&mut self) {
        self.advance(SubscriptionState::Connecting);
    }

    fn on_connect(&mut self) -> EngineStep {
        self.advance(SubscriptionState::InitSent);
        EngineStep::frame(self.init_frame())
    }

    fn on_message(&mut self, raw: &str) -> EngineStep {
        if self.state.is_terminal() {
            return EngineStep::none();
        }

        match Inbound::decode(raw) {
            Inbound::ConnectionAck if self.state == SubscriptionState::InitSent => {
                self.advance(SubscriptionState::Acked);
                EngineStep::frame(self.subscribe_frame())
            }
            Inbound::Ping if self.state >= SubscriptionState::Acked => {
                self.advance(SubscriptionState::Streaming);
                EngineStep::frame(Self::pong_frame())
            }
            Inbound::Data if self.state >= SubscriptionState::Acked => {
                self.advance(SubscriptionState::Streaming);
                EngineStep::event(ObservedEvent::Data(raw.to_string()))
            }
            // Recognized tag in a state that does not expect it, or an
            // unrecognized/malformed payload: absorbed silently.
            _ => EngineStep::none(),
        }
    }

    fn on_sent(&mut self) {
        if self.state == SubscriptionState::Acked {
            self.advance(SubscriptionState::Subscribed);
        }
    }

    fn on_close(&mut self) {
        if !self.state.is_terminal() {
            self.state = SubscriptionState::Closed;
        }
    }

    fn on_error(&mut self, _cause: &str) {
        if !self.state.is_terminal() {
            self.state = SubscriptionState::Errored;
        }
    }

    fn handshake_complete(&self) -> bool {
        self.state >= SubscriptionState::Acked && !self.state.is_terminal()
    }

    fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::Value;

    fn params() -> SubscriptionParams {
        SubscriptionParams::new(
            "test-token",
            "LATEST_UNIQUE_SELL_ORDERS",
            "subscription LATEST_UNIQUE_SELL_ORDERS { unique_sell_orders_stream { hero_id } }",
        )
    }

    fn connected_engine() -> SubscriptionEngine {
        let mut engine = SubscriptionEngine::new(params());
        engine.on_connecting();
        engine.on_connect();
        engine
    }

    fn streaming_engine() -> SubscriptionEngine {
        let mut engine = connected_engine();
        engine.on_message(r#"{"type":"connection_ack"}"#);
        engine.on_sent();
        engine.on_message(r#"{"type":"data","payload":{}}"#);
        engine
    }

    #[test]
    fn test_connect_emits_init_with_bearer() {
        let mut engine = SubscriptionEngine::new(params());
        engine.on_connecting();
        assert_eq!(engine.state(), SubscriptionState::Connecting);

        let step = engine.on_connect();
        assert_eq!(engine.state(), SubscriptionState::InitSent);
        assert_eq!(step.frames.len(), 1);

        let frame: Value = serde_json::from_str(&step.frames[0]).expect("valid json");
        assert_eq!(frame["type"], "connection_init");
        assert_eq!(
            frame["payload"]["headers"]["Authorization"],
            "Bearer test-token"
        );
    }

    #[test]
    fn test_ack_emits_subscribe_and_acks() {
        let mut engine = connected_engine();

        let step = engine.on_message(r#"{"type":"connection_ack"}"#);
        assert_eq!(engine.state(), SubscriptionState::Acked);
        assert_eq!(step.frames.len(), 1);
        assert!(step.events.is_empty());

        let frame: Value = serde_json::from_str(&step.frames[0]).expect("valid json");
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["payload"]["operationName"], "LATEST_UNIQUE_SELL_ORDERS");
        assert_eq!(
            frame["payload"]["variables"]["initialValue"],
            "1970-01-01T00:00:00Z"
        );
        assert!(frame["id"].is_string());
    }

    #[test]
    fn test_subscribe_flush_advances_to_subscribed() {
        let mut engine = connected_engine();
        engine.on_message(r#"{"type":"connection_ack"}"#);
        engine.on_sent();
        assert_eq!(engine.state(), SubscriptionState::Subscribed);
    }

    #[test]
    fn test_ping_emits_keepalive_pong() {
        let mut engine = streaming_engine();
        assert_eq!(engine.state(), SubscriptionState::Streaming);

        let step = engine.on_message(r#"{"type":"ping"}"#);
        assert_eq!(engine.state(), SubscriptionState::Streaming);
        assert_eq!(step.frames.len(), 1);

        let frame: Value = serde_json::from_str(&step.frames[0]).expect("valid json");
        assert_eq!(frame["type"], "pong");
        assert_eq!(frame["payload"]["message"], "keepalive");
    }

    #[test]
    fn test_data_surfaces_event_without_reply() {
        let mut engine = streaming_engine();

        let raw = r#"{"type":"data","payload":{"hero_id":"7"}}"#;
        let step = engine.on_message(raw);

        assert!(step.frames.is_empty());
        assert_eq!(step.events, vec![ObservedEvent::Data(raw.to_string())]);
        assert_eq!(engine.state(), SubscriptionState::Streaming);
    }

    #[test]
    fn test_unknown_type_ignored() {
        let mut engine = streaming_engine();
        let step = engine.on_message(r#"{"type":"complete"}"#);
        assert!(step.is_empty());
        assert_eq!(engine.state(), SubscriptionState::Streaming);
    }

    #[test]
    fn test_ack_before_connect_ignored() {
        let mut engine = SubscriptionEngine::new(params());
        let step = engine.on_message(r#"{"type":"connection_ack"}"#);
        assert!(step.is_empty());
        assert_eq!(engine.state(), SubscriptionState::Idle);
    }

    #[test]
    fn test_duplicate_ack_ignored() {
        let mut engine = connected_engine();
        engine.on_message(r#"{"type":"connection_ack"}"#);
        let step = engine.on_message(r#"{"type":"connection_ack"}"#);
        assert!(step.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_noop() {
        let mut engine = streaming_engine();
        let before = engine.state();

        for raw in ["", "not json", "{", r#"{"type":7}"#, "[1,2,3]"] {
            let step = engine.on_message(raw);
            assert!(step.is_empty(), "payload {raw:?} produced output");
            assert_eq!(engine.state(), before);
        }
    }

    #[test]
    fn test_close_is_absorbing() {
        let mut engine = streaming_engine();
        engine.on_close();
        assert_eq!(engine.state(), SubscriptionState::Closed);
        assert!(engine.is_terminal());

        let step = engine.on_message(r#"{"type":"ping"}"#);
        assert!(step.is_empty());
        assert_eq!(engine.state(), SubscriptionState::Closed);
    }

    #[test]
    fn test_error_is_absorbing() {
        let mut engine = connected_engine();
        engine.on_error("connection reset");
        assert_eq!(engine.state(), SubscriptionState::Errored);

        engine.on_close();
        assert_eq!(engine.state(), SubscriptionState::Errored);
    }

    #[test]
    fn test_handshake_complete_at_ack() {
        let mut engine = connected_engine();
        assert!(!engine.handshake_complete());
        engine.on_message(r#"{"type":"connection_ack"}"#);
        assert!(engine.handshake_complete());
    }

    #[test]
    fn test_state_ordering_forward_only() {
        assert!(SubscriptionState::Idle < SubscriptionState::Connecting);
        assert!(SubscriptionState::Connecting < SubscriptionState::InitSent);
        assert!(SubscriptionState::InitSent < SubscriptionState::Acked);
        assert!(SubscriptionState::Acked < SubscriptionState::Subscribed);
        assert!(SubscriptionState::Subscribed < SubscriptionState::Streaming);
    }

    proptest! {
        /// Non-JSON payloads never emit frames or move the state machine.
        #[test]
        fn prop_unparseable_payload_is_noop(raw in "\\PC*") {
            prop_assume!(serde_json::from_str::<Value>(&raw).is_err());

            let mut engine = streaming_engine();
            let before = engine.state();
            let step = engine.on_message(&raw);

            prop_assert!(step.frames.is_empty());
            prop_assert!(step.events.is_empty());
            prop_assert_eq!(engine.state(), before);
        }
    }
}
