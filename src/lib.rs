//! Shadow session interception layer for embedded web views.
//!
//! This library watches every outbound network request a hosted page
//! initiates, recognizes message-oriented session endpoints by URL prefix,
//! and, without altering the original request, opens an independent,
//! parallel WebSocket session to the same endpoint. The shadow session runs
//! its own application-level handshake, subscription, and keepalive
//! protocol and surfaces everything it receives to an observation sink.
//!
//! # Architecture
//!
//! Control flow per intercepted request:
//!
//! 1. The host shell forwards the request notification to [`Interceptor`]
//! 2. The URL is prefix-matched against the static [`EndpointPattern`] table
//! 3. On a match, [`SessionRegistry`] returns the live [`ShadowSession`]
//!    for that endpoint or opens a new one on its own task
//! 4. The interceptor answers "allow, do not modify" synchronously,
//!    before, and independent of, any shadow-session network activity
//!
//! Each shadow session owns exactly one connection and drives a pure
//! protocol state machine ([`engine::ProtocolEngine`]) against it. Two
//! protocol families are implemented: a subscription handshake
//! (init → ack → subscribe → stream → ping/pong) and a session-linking RPC
//! handshake (host-session → ok → is-linked/get-config → heartbeat echo).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shadow_session::{
//!     EndpointPattern, InterceptConfig, Interceptor, ProtocolFamily, RequestNotification,
//!     SessionRegistry, SubscriptionParams, TracingSink,
//! };
//!
//! # fn main() -> shadow_session::Result<()> {
//! let config = InterceptConfig::new()
//!     .with_pattern(
//!         EndpointPattern::new("wss://api.example.com/v1/graphql", ProtocolFamily::Subscription)
//!             .with_sub_protocol("graphql-ws"),
//!     )
//!     .with_subscription_params(SubscriptionParams::new(
//!         std::env::var("API_BEARER_TOKEN").expect("token"),
//!         "LATEST_UNIQUE_SELL_ORDERS",
//!         "subscription LATEST_UNIQUE_SELL_ORDERS { unique_sell_orders_stream { hero_id } }",
//!     ));
//!
//! let registry = SessionRegistry::new(config, Arc::new(TracingSink))?;
//! let interceptor = Interceptor::new(Arc::clone(&registry));
//!
//! // Wired into the host shell's per-request hook:
//! let notification = RequestNotification::new("wss://api.example.com/v1/graphql", "GET");
//! interceptor.on_before_request(&notification, |decision| {
//!     assert!(!decision.cancel);
//! });
//!
//! // At window teardown:
//! registry.release_all();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Endpoint pattern table and injected protocol parameters |
//! | [`engine`] | Pure protocol state machines, one per family |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`intercept`] | Request classifier and non-blocking interception handler |
//! | [`observe`] | Observation sink for data and lifecycle events |
//! | [`session`] | Shadow sessions and their registry |
//!
//! # Failure Model
//!
//! Every failure is session-local and terminal only for that session:
//! connect failures mark the session errored without retry, malformed
//! payloads are treated as empty messages, out-of-state messages are
//! ignored, and sends after close are dropped. Nothing in this layer can
//! propagate an error to the host shell or affect an intercepted request.

// ============================================================================
// Modules
// ============================================================================

/// Static configuration: endpoint patterns and protocol parameters.
pub mod config;

/// Protocol engines: pure handshake/streaming state machines.
pub mod engine;

/// Error types and result aliases.
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Request classifier and interception handler.
pub mod intercept;

/// Observation sink for shadow session activity.
pub mod observe;

/// Shadow sessions and the session registry.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration types
pub use config::{
    DEFAULT_CURSOR, DEFAULT_HANDSHAKE_TIMEOUT, EndpointPattern, InterceptConfig, ProtocolFamily,
    SessionLinkParams, SubscriptionParams,
};

// Engine types
pub use engine::{
    EngineStep, ProtocolEngine, SessionLinkEngine, SessionLinkState, SubscriptionEngine,
    SubscriptionState,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, SessionId};

// Interception types
pub use intercept::{Decision, Interceptor, RequestNotification};

// Observation types
pub use observe::{ObservationSink, ObservedEvent, SharedSink, TracingSink};

// Session types
pub use session::{SessionRegistry, ShadowSession};
