//! Request classifier and interception handler.
//!
//! The host shell invokes [`Interceptor::on_before_request`] once per
//! outbound request the displayed page issues, passing a completion
//! callback that must be answered for the request to proceed. The handler
//! prefix-matches the URL against the endpoint pattern table; on a match it
//! asks the registry for a shadow session without awaiting the result, and
//! in every case it answers the callback with "allow, do not modify"
//! synchronously before returning.
//!
//! That ordering is the core correctness property of the layer: the
//! decision is never gated on shadow-session connect latency or failure,
//! and the original request is never altered.

// ============================================================================
// Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::session::SessionRegistry;

// ============================================================================
// RequestNotification
// ============================================================================

/// Outbound-request notification from the host shell.
#[derive(Debug, Clone)]
pub struct RequestNotification {
    /// Target URL of the outbound request.
    pub url: String,

    /// HTTP method (`GET` for WebSocket upgrades).
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl RequestNotification {
    /// Creates a notification with no headers.
    #[inline]
    #[must_use]
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: HashMap::new(),
        }
    }

    /// Adds a request header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Answer to an interception notification.
///
/// This layer only ever allows: the original request proceeds unmodified
/// regardless of what happens to the shadow session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// `false` means the original request proceeds.
    pub cancel: bool,
}

impl Decision {
    /// The allow decision: proceed, do not modify.
    #[inline]
    #[must_use]
    pub fn allow() -> Self {
        Self { cancel: false }
    }
}

// ============================================================================
// Interceptor
// ============================================================================

/// Watches outbound requests and triggers shadow sessions for matches.
#[derive(Debug, Clone)]
pub struct Interceptor {
    registry: Arc<SessionRegistry>,
}

impl Interceptor {
    /// Creates an interceptor over a registry.
    #[inline]
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this interceptor feeds.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handles one outbound-request notification.
    ///
    /// `decide` is invoked exactly once, synchronously, with the allow
    /// decision before this method returns. A matched URL additionally
    /// triggers [`SessionRegistry::acquire`] for its pattern; the acquire
    /// outcome is logged and discarded, never awaited.
    pub fn on_before_request<F>(&self, notification: &RequestNotification, decide: F)
    where
        F: FnOnce(Decision),
    {
        if let Some(pattern) = self.registry.config().match_url(&notification.url) {
            debug!(
                url = %notification.url,
                family = %pattern.family,
                "Outbound request matched endpoint pattern"
            );

            let pattern = pattern.clone();
            if let Err(e) = self.registry.acquire(&pattern) {
                // Session-local failure; must not affect the decision.
                warn!(url = %notification.url, error = %e, "Shadow session acquire failed");
            }
        }

        decide(Decision::allow());
    }
}

// ============================================================================
// Tests
// ============================================================================
