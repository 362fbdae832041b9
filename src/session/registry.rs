//! Session registry: at most one live shadow session per endpoint key.
//!
//! The registry is the only shared mutable structure in the crate. It maps
//! `(url prefix, protocol family)` keys to live [`ShadowSession`] handles
//! and guards that map against concurrent `acquire` calls arising from
//! simultaneous interception events.
//!
//! A second acquire for a key with a live session returns the existing
//! handle unchanged; no duplicate connection is opened. Sessions deregister
//! themselves when their event loop ends, so map presence equals liveness.
//!
//! Lifecycle is injected, not ambient: the host shell constructs the
//! registry at window creation and calls [`SessionRegistry::release_all`]
//! once at window teardown.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::config::{EndpointPattern, InterceptConfig, ProtocolFamily};
use crate::engine::{ProtocolEngine, SessionLinkEngine, SubscriptionEngine};
use crate::error::{Error, Result};
use crate::observe::SharedSink;
use crate::session::ShadowSession;

// ============================================================================
// Types
// ============================================================================

/// Registry key: one live session per (endpoint prefix, family) pair.
type SessionKey = (String, ProtocolFamily);

// ============================================================================
// SessionRegistry
// ============================================================================

/// Tracks active shadow sessions keyed by endpoint and protocol family.
pub struct SessionRegistry {
    /// Static configuration; validated at construction.
    config: InterceptConfig,

    /// Observation sink handed to every session.
    sink: SharedSink,

    /// Live sessions. Entries are removed by the sessions themselves when
    /// their event loop terminates.
    sessions: Mutex<FxHashMap<SessionKey, ShadowSession>>,
}

// ============================================================================
// SessionRegistry - Constructor
// ============================================================================

impl SessionRegistry {
    /// Creates a registry over a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: InterceptConfig, sink: SharedSink) -> Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new(Self {
            config,
            sink,
            sessions: Mutex::new(FxHashMap::default()),
        }))
    }

    /// The configuration this registry was built over.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &InterceptConfig {
        &self.config
    }

    /// Number of tracked sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

// ============================================================================
// SessionRegistry - Acquire
// ============================================================================

impl SessionRegistry {
    /// Returns the live session for `pattern`, opening one if none exists.
    ///
    /// Non-blocking: a new session dials on its own task and this call
    /// returns its handle immediately. While a session for the key is
    /// already active the existing handle is returned unchanged and no
    /// second connection is opened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pattern's family has no parameters;
    /// cannot happen for patterns from this registry's validated config.
    pub fn acquire(self: &Arc<Self>, pattern: &EndpointPattern) -> Result<ShadowSession> {
        let key: SessionKey = (pattern.url_prefix.clone(), pattern.family);

        let mut sessions = self.sessions.lock();

        if let Some(existing) = sessions.get(&key) {
            debug!(
                endpoint = %key.0,
                family = %key.1,
                session = %existing.id(),
                "Reusing active shadow session"
            );
            return Ok(existing.clone());
        }

        let engine = self.build_engine(pattern.family)?;

        let registry = Arc::downgrade(self);
        let exit_key = key.clone();

        let session = ShadowSession::open(
            pattern.url_prefix.clone(),
            pattern.family,
            pattern.sub_protocol.clone(),
            engine,
            Arc::clone(&self.sink),
            self.config.handshake_timeout,
            move || Self::deregister(&registry, &exit_key),
        );

        info!(
            endpoint = %key.0,
            family = %key.1,
            session = %session.id(),
            "Shadow session opening"
        );

        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Builds the engine for `family` from the configured parameters.
    fn build_engine(&self, family: ProtocolFamily) -> Result<Box<dyn ProtocolEngine>> {
        match family {
            ProtocolFamily::Subscription => self
                .config
                .subscription
                .clone()
                .map(|params| Box::new(SubscriptionEngine::new(params)) as Box<dyn ProtocolEngine>)
                .ok_or_else(|| Error::config("no subscription params configured")),
            ProtocolFamily::SessionLink => self
                .config
                .session_link
                .clone()
                .map(|params| Box::new(SessionLinkEngine::new(params)) as Box<dyn ProtocolEngine>)
                .ok_or_else(|| Error::config("no session_link params configured")),
        }
    }

    /// Removes a terminated session's entry. Runs from the session's own
    /// task; the registry may already be gone at shell teardown.
    fn deregister(registry: &Weak<Self>, key: &SessionKey) {
        let Some(registry) = registry.upgrade() else {
            return;
        };

        let removed = registry.sessions.lock().remove(key);
        if removed.is_some() {
            debug!(endpoint = %key.0, family = %key.1, "Shadow session deregistered");
        }
    }
}

// ============================================================================
// SessionRegistry - Teardown
// ============================================================================

impl SessionRegistry {
    /// Cancels and closes every tracked session.
    ///
    /// Called once at host-window teardown. Pending sends are discarded and
    /// no result is awaited.
    pub fn release_all(&self) {
        let sessions: Vec<_> = {
            let mut map = self.sessions.lock();
            map.drain().collect()
        };

        let count = sessions.len();
        for ((endpoint, family), session) in sessions {
            session.shutdown();
            debug!(endpoint = %endpoint, family = %family, session = %session.id(), "Shadow session released");
        }

        if count > 0 {
            info!(count, "All shadow sessions released");
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
