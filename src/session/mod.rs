//! Shadow session: one owned WebSocket connection driving one engine.
//!
//! A [`ShadowSession`] mirrors a request the host page made on its own. It
//! owns exactly one outbound WebSocket connection, feeds inbound frames to
//! its [`ProtocolEngine`], puts the engine's outbound frames on the wire,
//! and reports lifecycle transitions and data deliveries to the observation
//! sink.
//!
//! # Event Loop
//!
//! Opening is non-blocking: construction spawns a tokio task that dials the
//! endpoint, runs the handshake, and then serves a `select!` loop over:
//!
//! - Inbound WebSocket messages (processed strictly in arrival order)
//! - Commands from the handle (send, shutdown)
//! - The handshake deadline, while the handshake is incomplete
//!
//! Close and error are absorbing: the loop exits, the session deregisters
//! itself, and later sends are dropped with a warning rather than queued.

// ============================================================================
// Modules
// ============================================================================

pub mod registry;

pub use registry::SessionRegistry;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::config::ProtocolFamily;
use crate::engine::{EngineStep, ProtocolEngine};
use crate::identifiers::SessionId;
use crate::observe::{ObservedEvent, SharedSink};

// ============================================================================
// Constants
// ============================================================================

/// Deadline used when no handshake timeout is configured.
///
/// Effectively "never"; keeps the select loop free of an `Option` arm.
const NO_DEADLINE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

// ============================================================================
// SessionCommand
// ============================================================================

/// Commands from a [`ShadowSession`] handle to its event loop.
enum SessionCommand {
    /// Put a payload on the wire.
    Send(String),
    /// Close the connection and end the loop.
    Shutdown,
}

// ============================================================================
// LoopExit
// ============================================================================

/// How the event loop ended.
enum LoopExit {
    Closed,
    Errored(String),
}

// ============================================================================
// ShadowSession
// ============================================================================

/// Handle to one shadow session.
///
/// Cheap to clone; all clones address the same underlying connection. The
/// connection itself lives in the spawned event loop task.
#[derive(Clone)]
pub struct ShadowSession {
    id: SessionId,
    endpoint: String,
    family: ProtocolFamily,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    open: Arc<AtomicBool>,
}

impl ShadowSession {
    /// Opens a shadow session to `endpoint`.
    ///
    /// Returns immediately; the connection is dialed on a spawned task.
    /// `on_exit` runs exactly once when the event loop terminates, whether
    /// by close, error, or failed connect; the registry uses it to drop
    /// its entry.
    pub(crate) fn open(
        endpoint: impl Into<String>,
        family: ProtocolFamily,
        sub_protocol: Option<String>,
        engine: Box<dyn ProtocolEngine>,
        sink: SharedSink,
        handshake_timeout: Option<Duration>,
        on_exit: impl FnOnce() + Send + 'static,
    ) -> Self {
        let id = SessionId::generate();
        let endpoint = endpoint.into();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        let session = Self {
            id,
            endpoint: endpoint.clone(),
            family,
            command_tx,
            open: Arc::clone(&open),
        };

        tokio::spawn(async move {
            run_session(
                id,
                endpoint,
                sub_protocol,
                engine,
                sink,
                handshake_timeout,
                command_rx,
                open,
            )
            .await;
            on_exit();
        });

        session
    }

    /// Session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Endpoint URL this session mirrors.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Protocol family this session speaks.
    #[inline]
    #[must_use]
    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    /// Returns `true` while the underlying connection reports itself open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Sends a payload on the shadow connection.
    ///
    /// Sends attempted while the connection is not open are dropped and
    /// logged, never queued and never an error.
    pub fn send(&self, payload: impl Into<String>) {
        let payload = payload.into();

        if !self.is_open() {
            warn!(session = %self.id, "Send after close dropped");
            return;
        }

        if self.command_tx.send(SessionCommand::Send(payload)).is_err() {
            warn!(session = %self.id, "Send after close dropped");
        }
    }

    /// Closes the connection and ends the event loop.
    ///
    /// Pending sends are discarded; no result is awaited.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown);
    }
}

impl std::fmt::Debug for ShadowSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowSession")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("family", &self.family)
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// Event Loop
// ============================================================================

type WsWrite =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Dials the endpoint and runs the session to completion.
#[allow(clippy::too_many_arguments)]
async fn run_session(
    id: SessionId,
    endpoint: String,
    sub_protocol: Option<String>,
    mut engine: Box<dyn ProtocolEngine>,
    sink: SharedSink,
    handshake_timeout: Option<Duration>,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    open: Arc<AtomicBool>,
) {
    engine.on_connecting();

    let ws_stream = match dial(&endpoint, sub_protocol.as_deref()).await {
        Ok(stream) => stream,
        Err(cause) => {
            warn!(session = %id, endpoint = %endpoint, cause = %cause, "Shadow connect failed");
            engine.on_error(&cause);
            sink.observe(id, &ObservedEvent::Errored(cause));
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    sink.observe(id, &ObservedEvent::Opened);
    debug!(session = %id, endpoint = %endpoint, "Shadow connection opened");

    let (mut ws_write, mut ws_read) = ws_stream.split();

    // Opening frames (init / host-session).
    let step = engine.on_connect();
    let mut exit = match flush_step(id, &mut ws_write, engine.as_mut(), &sink, step).await {
        Ok(()) => None,
        Err(e) => Some(e),
    };

    let deadline = tokio::time::sleep(handshake_timeout.unwrap_or(NO_DEADLINE));
    tokio::pin!(deadline);

    while exit.is_none() {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let step = engine.on_message(text.as_str());
                        if let Err(e) =
                            flush_step(id, &mut ws_write, engine.as_mut(), &sink, step).await
                        {
                            exit = Some(e);
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %id, "Shadow connection closed by remote");
                        exit = Some(LoopExit::Closed);
                    }

                    Some(Err(e)) => {
                        exit = Some(LoopExit::Errored(e.to_string()));
                    }

                    None => {
                        debug!(session = %id, "Shadow stream ended");
                        exit = Some(LoopExit::Closed);
                    }

                    // Ignore Binary, Ping, Pong, Frame.
                    _ => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(SessionCommand::Send(payload)) => {
                        if let Err(e) = ws_write.send(Message::Text(payload.into())).await {
                            warn!(session = %id, error = %e, "Wire send failed");
                            exit = Some(LoopExit::Errored(e.to_string()));
                        }
                    }

                    Some(SessionCommand::Shutdown) | None => {
                        let _ = ws_write.close().await;
                        exit = Some(LoopExit::Closed);
                    }
                }
            }

            () = &mut deadline, if !engine.handshake_complete() => {
                let timeout_ms = handshake_timeout.unwrap_or(NO_DEADLINE).as_millis() as u64;
                warn!(session = %id, timeout_ms, "Handshake deadline expired");
                let _ = ws_write.close().await;
                exit = Some(LoopExit::Errored(format!(
                    "handshake timeout after {timeout_ms}ms"
                )));
            }
        }
    }

    open.store(false, Ordering::SeqCst);

    match exit {
        Some(LoopExit::Errored(cause)) => {
            engine.on_error(&cause);
            sink.observe(id, &ObservedEvent::Errored(cause));
        }
        _ => {
            engine.on_close();
            sink.observe(id, &ObservedEvent::Closed);
        }
    }

    debug!(session = %id, "Shadow session terminated");
}

/// Dials the endpoint, negotiating the sub-protocol when one is configured.
async fn dial(
    endpoint: &str,
    sub_protocol: Option<&str>,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, String> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| format!("bad endpoint url: {e}"))?;

    if let Some(token) = sub_protocol {
        let value =
            HeaderValue::from_str(token).map_err(|e| format!("bad sub-protocol token: {e}"))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", value);
    }

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| format!("connect failed: {e}"))?;

    Ok(stream)
}

/// Sends a step's frames in order and surfaces its events to the sink.
async fn flush_step(
    id: SessionId,
    ws_write: &mut WsWrite,
    engine: &mut dyn ProtocolEngine,
    sink: &SharedSink,
    step: EngineStep,
) -> Result<(), LoopExit> {
    for event in &step.events {
        sink.observe(id, event);
    }

    if step.frames.is_empty() {
        return Ok(());
    }

    for frame in step.frames {
        if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
            warn!(session = %id, error = %e, "Wire send failed");
            return Err(LoopExit::Errored(e.to_string()));
        }
    }

    engine.on_sent();
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    use crate::config::{SessionLinkParams, SubscriptionParams};
    use crate::engine::{SessionLinkEngine, SubscriptionEngine};

    struct CollectSink {
        tx: UnboundedSender<ObservedEvent>,
    }

    impl crate::observe::ObservationSink for CollectSink {
        fn observe(&self, _session: SessionId, event: &ObservedEvent) {
            let _ = self.tx.send(event.clone());
        }
    }

    fn collect_sink() -> (SharedSink, UnboundedReceiver<ObservedEvent>) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let (tx, rx) = unbounded_channel();
        (Arc::new(CollectSink { tx }), rx)
    }

    fn subscription_engine() -> Box<dyn ProtocolEngine> {
        Box::new(SubscriptionEngine::new(SubscriptionParams::new(
            "token",
            "LATEST_UNIQUE_SELL_ORDERS",
            "subscription { x }",
        )))
    }

    fn session_link_engine() -> Box<dyn ProtocolEngine> {
        Box::new(SessionLinkEngine::new(SessionLinkParams::new(
            "session-1",
            "key",
        )))
    }

    /// Binds a local WebSocket server and returns its ws:// URL plus the
    /// listener for the test to script the server side.
    async fn local_server() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        (format!("ws://127.0.0.1:{port}"), listener)
    }

    #[tokio::test]
    async fn test_subscription_handshake_and_stream() {
        let (url, listener) = local_server().await;
        let (sink, mut events) = collect_sink();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            // Echo the requested sub-protocol so the client handshake
            // succeeds when one is negotiated.
            let callback = |req: &Request, mut resp: Response| {
                if let Some(proto) = req.headers().get("Sec-WebSocket-Protocol") {
                    resp.headers_mut()
                        .insert("Sec-WebSocket-Protocol", proto.clone());
                }
                Ok(resp)
            };
            let mut ws = accept_hdr_async(stream, callback).await.expect("upgrade");

            // Expect connection_init, then ack.
            let init = ws.next().await.expect("frame").expect("ok");
            let init: serde_json::Value =
                serde_json::from_str(init.to_text().expect("text")).expect("json");
            assert_eq!(init["type"], "connection_init");

            ws.send(Message::Text(r#"{"type":"connection_ack"}"#.into()))
                .await
                .expect("send ack");

            // Expect subscribe, then deliver two frames.
            let sub = ws.next().await.expect("frame").expect("ok");
            let sub: serde_json::Value =
                serde_json::from_str(sub.to_text().expect("text")).expect("json");
            assert_eq!(sub["type"], "subscribe");

            ws.send(Message::Text(r#"{"type":"data","payload":{"n":1}}"#.into()))
                .await
                .expect("send data");
            ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
                .await
                .expect("send ping");

            // Expect the keepalive pong back.
            let pong = ws.next().await.expect("frame").expect("ok");
            let pong: serde_json::Value =
                serde_json::from_str(pong.to_text().expect("text")).expect("json");
            assert_eq!(pong["type"], "pong");
            assert_eq!(pong["payload"]["message"], "keepalive");

            ws.close(None).await.expect("close");
        });

        let session = ShadowSession::open(
            url,
            ProtocolFamily::Subscription,
            Some("graphql-ws".to_string()),
            subscription_engine(),
            sink,
            Some(Duration::from_secs(5)),
            || {},
        );

        assert_eq!(events.recv().await, Some(ObservedEvent::Opened));
        let data = events.recv().await.expect("data event");
        assert!(matches!(data, ObservedEvent::Data(ref raw) if raw.contains("\"n\":1")));
        assert_eq!(events.recv().await, Some(ObservedEvent::Closed));

        server.await.expect("server");
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_session_link_handshake() {
        let (url, listener) = local_server().await;
        let (sink, mut events) = collect_sink();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");

            let host = ws.next().await.expect("frame").expect("ok");
            let host: serde_json::Value =
                serde_json::from_str(host.to_text().expect("text")).expect("json");
            assert_eq!(host["type"], "HostSession");

            ws.send(Message::Text(r#"{"type":"OK"}"#.into()))
                .await
                .expect("send ok");

            let linked = ws.next().await.expect("frame").expect("ok");
            let config = ws.next().await.expect("frame").expect("ok");
            assert!(linked.to_text().expect("text").contains("IsLinked"));
            assert!(config.to_text().expect("text").contains("GetSessionConfig"));

            // Heartbeat probe; expect the echo.
            ws.send(Message::Text("h".into())).await.expect("send h");
            let echo = ws.next().await.expect("frame").expect("ok");
            assert_eq!(echo.to_text().expect("text"), "h");

            ws.close(None).await.expect("close");
        });

        let _session = ShadowSession::open(
            url,
            ProtocolFamily::SessionLink,
            None,
            session_link_engine(),
            sink,
            Some(Duration::from_secs(5)),
            || {},
        );

        assert_eq!(events.recv().await, Some(ObservedEvent::Opened));
        assert_eq!(events.recv().await, Some(ObservedEvent::Closed));

        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_connect_failure_reports_errored() {
        // Bind-then-drop guarantees nothing listens on the port.
        let (url, listener) = local_server().await;
        drop(listener);

        let (sink, mut events) = collect_sink();
        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();

        let _session = ShadowSession::open(
            url,
            ProtocolFamily::Subscription,
            None,
            subscription_engine(),
            sink,
            None,
            move || {
                let _ = exit_tx.send(());
            },
        );

        let event = events.recv().await.expect("event");
        assert!(matches!(event, ObservedEvent::Errored(_)));
        exit_rx.await.expect("on_exit ran");
    }

    #[tokio::test]
    async fn test_handshake_timeout_errors_session() {
        let (url, listener) = local_server().await;
        let (sink, mut events) = collect_sink();

        // Server accepts but never acks.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            while let Some(Ok(_)) = ws.next().await {}
        });

        let _session = ShadowSession::open(
            url,
            ProtocolFamily::Subscription,
            None,
            subscription_engine(),
            sink,
            Some(Duration::from_millis(100)),
            || {},
        );

        assert_eq!(events.recv().await, Some(ObservedEvent::Opened));
        let event = events.recv().await.expect("event");
        assert!(
            matches!(event, ObservedEvent::Errored(ref cause) if cause.contains("handshake timeout"))
        );

        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_send_after_close_dropped() {
        let (url, listener) = local_server().await;
        let (sink, mut events) = collect_sink();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            let _ = ws.next().await;
            ws.close(None).await.expect("close");
        });

        let session = ShadowSession::open(
            url,
            ProtocolFamily::Subscription,
            None,
            subscription_engine(),
            sink,
            None,
            || {},
        );

        assert_eq!(events.recv().await, Some(ObservedEvent::Opened));
        assert_eq!(events.recv().await, Some(ObservedEvent::Closed));
        server.await.expect("server");

        // Dropped silently, never queued, never an error.
        assert!(!session.is_open());
        session.send("late payload");
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let (url, listener) = local_server().await;
        let (sink, mut events) = collect_sink();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let session = ShadowSession::open(
            url,
            ProtocolFamily::Subscription,
            None,
            subscription_engine(),
            sink,
            None,
            || {},
        );

        assert_eq!(events.recv().await, Some(ObservedEvent::Opened));
        session.shutdown();
        assert_eq!(events.recv().await, Some(ObservedEvent::Closed));

        server.await.expect("server");
        assert!(!session.is_open());
    }
}
