//! Static configuration for the interception layer.
//!
//! Everything here is loaded once at process start and immutable afterward:
//! the endpoint pattern table plus the fixed construction parameters each
//! protocol family needs. Sensitive values (bearer token, session key) are
//! injected by the host shell at construction and never compiled in.
//!
//! # Example
//!
//! ```ignore
//! use shadow_session::{EndpointPattern, InterceptConfig, ProtocolFamily, SubscriptionParams};
//!
//! let config = InterceptConfig::new()
//!     .with_pattern(EndpointPattern::new(
//!         "wss://api.example.com/v1/graphql",
//!         ProtocolFamily::Subscription,
//!     ).with_sub_protocol("graphql-ws"))
//!     .with_subscription_params(SubscriptionParams::new(
//!         bearer_token,
//!         "LATEST_UNIQUE_SELL_ORDERS",
//!         query_text,
//!     ));
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default watermark cursor: the Unix epoch, RFC 3339.
///
/// The cursor is a fixed subscribe-time parameter; it is sent once in the
/// subscribe frame and never advanced afterward.
pub const DEFAULT_CURSOR: &str = "1970-01-01T00:00:00Z";

/// Default bound on how long a handshake may take to reach its acknowledged
/// state before the session is closed and marked errored.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ProtocolFamily
// ============================================================================

/// Which handshake protocol a matched endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// init → ack → subscribe → stream → ping/pong.
    Subscription,
    /// host-session → ok → is-linked/get-config → heartbeat echo.
    SessionLink,
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscription => f.write_str("subscription"),
            Self::SessionLink => f.write_str("session_link"),
        }
    }
}

// ============================================================================
// EndpointPattern
// ============================================================================

/// A static rule mapping a URL prefix to a protocol family.
///
/// Patterns are prefix matches: a request whose URL starts with
/// `url_prefix` belongs to `family`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPattern {
    /// URL prefix to match against outbound request URLs.
    pub url_prefix: String,

    /// Protocol family spoken at this endpoint.
    pub family: ProtocolFamily,

    /// WebSocket sub-protocol token for the shadow connection, if the
    /// endpoint requires one (e.g. `graphql-ws`).
    #[serde(default)]
    pub sub_protocol: Option<String>,
}

impl EndpointPattern {
    /// Creates a new pattern.
    #[inline]
    #[must_use]
    pub fn new(url_prefix: impl Into<String>, family: ProtocolFamily) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            family,
            sub_protocol: None,
        }
    }

    /// Sets the WebSocket sub-protocol token.
    #[inline]
    #[must_use]
    pub fn with_sub_protocol(mut self, token: impl Into<String>) -> Self {
        self.sub_protocol = Some(token.into());
        self
    }

    /// Returns `true` if `url` matches this pattern.
    #[inline]
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        url.starts_with(&self.url_prefix)
    }
}

// ============================================================================
// SubscriptionParams
// ============================================================================

/// Fixed construction parameters for the subscription family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionParams {
    /// Bearer credential sent in the init frame headers. Injected, secret.
    pub bearer_token: String,

    /// Subscription operation name (e.g. `LATEST_UNIQUE_SELL_ORDERS`).
    pub operation_name: String,

    /// Full subscription query text.
    pub query: String,

    /// Watermark cursor sent in the subscribe frame.
    ///
    /// Fixed at subscribe time; never advanced per-message.
    #[serde(default = "default_cursor")]
    pub initial_cursor: String,
}

fn default_cursor() -> String {
    DEFAULT_CURSOR.to_string()
}

impl SubscriptionParams {
    /// Creates parameters with the default epoch cursor.
    #[inline]
    #[must_use]
    pub fn new(
        bearer_token: impl Into<String>,
        operation_name: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            operation_name: operation_name.into(),
            query: query.into(),
            initial_cursor: default_cursor(),
        }
    }

    /// Overrides the watermark cursor.
    #[inline]
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.initial_cursor = cursor.into();
        self
    }
}

// ============================================================================
// SessionLinkParams
// ============================================================================

/// Fixed construction parameters for the session-link family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLinkParams {
    /// Session ID carried by every frame of the handshake.
    pub session_id: String,

    /// Session key sent in the host-session frame. Injected, secret.
    pub session_key: String,

    /// First numeric request ID; subsequent frames increment from it.
    #[serde(default = "default_request_id_base")]
    pub request_id_base: u64,
}

fn default_request_id_base() -> u64 {
    1
}

impl SessionLinkParams {
    /// Creates parameters with the default request ID base.
    #[inline]
    #[must_use]
    pub fn new(session_id: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            session_key: session_key.into(),
            request_id_base: default_request_id_base(),
        }
    }

    /// Overrides the numeric request ID base.
    #[inline]
    #[must_use]
    pub fn with_request_id_base(mut self, base: u64) -> Self {
        self.request_id_base = base;
        self
    }
}

// ============================================================================
// InterceptConfig
// ============================================================================

/// Complete static configuration for the interception layer.
#[derive(Debug, Clone)]
pub struct InterceptConfig {
    /// Endpoint pattern table, checked in order.
    pub patterns: Vec<EndpointPattern>,

    /// Subscription-family parameters; required if any pattern uses
    /// [`ProtocolFamily::Subscription`].
    pub subscription: Option<SubscriptionParams>,

    /// Session-link-family parameters; required if any pattern uses
    /// [`ProtocolFamily::SessionLink`].
    pub session_link: Option<SessionLinkParams>,

    /// Bound on handshake completion; `None` disables the deadline.
    pub handshake_timeout: Option<Duration>,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// InterceptConfig - Builder Methods
// ============================================================================

impl InterceptConfig {
    /// Creates an empty configuration with the default handshake timeout.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            subscription: None,
            session_link: None,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }

    /// Adds an endpoint pattern.
    #[inline]
    #[must_use]
    pub fn with_pattern(mut self, pattern: EndpointPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Sets the subscription-family parameters.
    #[inline]
    #[must_use]
    pub fn with_subscription_params(mut self, params: SubscriptionParams) -> Self {
        self.subscription = Some(params);
        self
    }

    /// Sets the session-link-family parameters.
    #[inline]
    #[must_use]
    pub fn with_session_link_params(mut self, params: SessionLinkParams) -> Self {
        self.session_link = Some(params);
        self
    }

    /// Sets the handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Disables the handshake deadline.
    #[inline]
    #[must_use]
    pub fn without_handshake_timeout(mut self) -> Self {
        self.handshake_timeout = None;
        self
    }
}

// ============================================================================
// InterceptConfig - Validation & Lookup
// ============================================================================

impl InterceptConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a pattern prefix is not a valid
    /// `ws`/`wss` URL, or a referenced family has no parameters.
    pub fn validate(&self) -> Result<()> {
        if self.patterns.is_empty() {
            return Err(Error::config("endpoint pattern table is empty"));
        }

        for pattern in &self.patterns {
            let url = Url::parse(&pattern.url_prefix)
                .map_err(|e| Error::config(format!("bad url prefix {}: {e}", pattern.url_prefix)))?;

            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(Error::config(format!(
                    "url prefix {} must use ws or wss scheme",
                    pattern.url_prefix
                )));
            }

            match pattern.family {
                ProtocolFamily::Subscription if self.subscription.is_none() => {
                    return Err(Error::config(
                        "pattern references subscription family but no subscription params set",
                    ));
                }
                ProtocolFamily::SessionLink if self.session_link.is_none() => {
                    return Err(Error::config(
                        "pattern references session_link family but no session_link params set",
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Returns the first pattern matching `url`, if any.
    #[inline]
    #[must_use]
    pub fn match_url(&self, url: &str) -> Option<&EndpointPattern> {
        self.patterns.iter().find(|p| p.matches(url))
    }
}

// ============================================================================
// Tests
// ============================================================================
