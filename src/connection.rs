//! The realtime socket.
//!
//! A [`Connection`] owns one driver task that owns the WebSocket. Inbound text frames are
//! handed to a [`FrameHandler`] on that task in transport order; outbound frames reach it
//! through an unbounded channel. When the socket drops, the [`ReconnectPolicy`] decides
//! whether and when to dial again.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::errors::{RealtimeError, Result};
use crate::frames::OutboundFrame;
use crate::reconnect::{Backoff, ReconnectPolicy};
use crate::typing::FrameSink;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Waiting `delay` before retry number `attempt` (1-based).
    Reconnecting { attempt: u32, delay: Duration },
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives what the driver task reads off the socket.
///
/// Both methods run on the driver task and must not block.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, raw: &str);

    fn on_state_change(&self, _state: &ConnectionState) {}
}

/// Builds the socket URL, passing the bearer token as the `token` query parameter.
pub fn socket_url(base: &str, token: &str) -> Result<Url> {
    if token.is_empty() {
        return Err(RealtimeError::MissingToken);
    }
    let mut url = Url::parse(base).map_err(|e| RealtimeError::invalid_url(base, e))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(RealtimeError::invalid_url(base, "scheme must be ws or wss"));
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Cloneable access to a running connection: state and outbound frames.
#[derive(Clone)]
pub struct ConnectionHandle {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<String>,
    attempts: Arc<AtomicU32>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_open()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Serializes and queues a frame if the socket is open.
    ///
    /// While not open the frame is dropped with a warning; nothing is buffered for a
    /// later connection.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        if !self.is_connected() {
            warn!(state = %self.state(), "socket not open, dropping outbound frame");
            return false;
        }
        match serde_json::to_string(value) {
            Ok(text) => self.outbound.send(text).is_ok(),
            Err(e) => {
                warn!(error = %e, "failed to encode outbound frame");
                false
            }
        }
    }

    /// Resolves once the socket is open.
    ///
    /// Fails when the connection reaches `Closed` first.
    pub async fn wait_for_open(&self) -> Result<()> {
        let mut state = self.state.clone();
        loop {
            match &*state.borrow_and_update() {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed => {
                    let attempts = self.attempts.load(Ordering::Acquire);
                    return Err(if attempts > 0 {
                        RealtimeError::ReconnectExhausted { attempts }
                    } else {
                        RealtimeError::NotConnected
                    });
                }
                _ => {}
            }
            if state.changed().await.is_err() {
                return Err(RealtimeError::NotConnected);
            }
        }
    }
}

impl FrameSink for ConnectionHandle {
    fn send_frame(&self, frame: &OutboundFrame) -> bool {
        self.send_json(frame)
    }
}

/// An owned realtime connection. Dropping it stops the driver task.
pub struct Connection {
    handle: ConnectionHandle,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Starts connecting to `base_url` with `token`. Must be called inside a tokio runtime.
    ///
    /// Only URL validation can fail here; connect failures are reported through the
    /// connection state.
    pub fn open(
        base_url: &str,
        token: &str,
        policy: ReconnectPolicy,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Self> {
        let url = socket_url(base_url, token)?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let attempts = Arc::new(AtomicU32::new(0));

        let driver = Driver {
            url,
            backoff: Backoff::new(policy),
            handler,
            state: state_tx,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
            attempts: attempts.clone(),
        };
        let task = tokio::spawn(driver.run());

        Ok(Self {
            handle: ConnectionHandle { state: state_rx, outbound: outbound_tx, attempts },
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.handle.watch_state()
    }

    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        self.handle.send_json(value)
    }

    /// Closes the socket and waits for the driver task to finish.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "connection driver panicked");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

enum PumpExit {
    Shutdown,
    ClosedByServer(Option<CloseFrame>),
}

struct Driver {
    url: Url,
    backoff: Backoff,
    handler: Arc<dyn FrameHandler>,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: oneshot::Receiver<()>,
    attempts: Arc<AtomicU32>,
}

impl Driver {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            debug!(from = %previous, to = %next, "connection state changed");
            self.handler.on_state_change(&next);
        }
    }

    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = &mut self.shutdown => break,
                res = connect_async(self.url.as_str()) => res.map_err(RealtimeError::from),
            };

            match connected {
                Ok((socket, _response)) => {
                    self.backoff.reset();
                    self.attempts.store(0, Ordering::Release);
                    // Frames accepted before the previous socket dropped are not replayed.
                    while self.outbound.try_recv().is_ok() {}
                    self.set_state(ConnectionState::Open);
                    info!(host = self.url.host_str().unwrap_or_default(), "realtime socket open");

                    match self.pump(socket).await {
                        Ok(PumpExit::Shutdown) => break,
                        Ok(PumpExit::ClosedByServer(frame)) => {
                            warn!(?frame, "realtime socket closed by server")
                        }
                        Err(e) => warn!(error = %e, "realtime socket dropped"),
                    }
                }
                Err(e) => error!(error = %e, "realtime socket connect failed"),
            }

            let Some(delay) = self.backoff.next_delay() else {
                if !self.backoff.policy().is_disabled() {
                    warn!(attempts = self.backoff.attempts(), "giving up reconnecting");
                }
                break;
            };
            let attempt = self.backoff.attempts();
            self.attempts.store(attempt, Ordering::Release);
            self.set_state(ConnectionState::Reconnecting { attempt, delay });
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = &mut self.shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.set_state(ConnectionState::Closed);
        info!("realtime connection closed");
    }

    /// Runs one open socket until shutdown or until it drops. Transport failures come
    /// back as [`RealtimeError::Transport`].
    async fn pump(&mut self, socket: Socket) -> Result<PumpExit> {
        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                _ = &mut self.shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return Ok(PumpExit::Shutdown);
                }
                Some(text) = self.outbound.recv() => sink.send(Message::text(text)).await?,
                incoming = stream.next() => match incoming.transpose()? {
                    Some(Message::Text(text)) => self.handler.on_frame(text.as_str()),
                    Some(Message::Close(frame)) => return Ok(PumpExit::ClosedByServer(frame)),
                    // Pings are answered by tungstenite; binary frames are not part of the protocol.
                    Some(_) => {}
                    None => return Ok(PumpExit::ClosedByServer(None)),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ignore;

    impl FrameHandler for Ignore {
        fn on_frame(&self, _raw: &str) {}
    }

    #[test]
    fn token_is_appended_as_query_pair() {
        let url = socket_url("ws://localhost:8080/ws", "a b&c").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?token=a+b%26c");

        let url = socket_url("wss://rt.example.com/ws?v=2", "t").unwrap();
        assert_eq!(url.query(), Some("v=2&token=t"));
    }

    #[test]
    fn rejects_bad_urls_and_missing_token() {
        assert!(matches!(
            socket_url("http://localhost/ws", "t"),
            Err(RealtimeError::InvalidUrl { .. })
        ));
        assert!(matches!(socket_url("not a url", "t"), Err(RealtimeError::InvalidUrl { .. })));
        assert!(matches!(socket_url("ws://localhost/ws", ""), Err(RealtimeError::MissingToken)));
    }

    #[tokio::test]
    async fn refused_connection_without_retries_closes() {
        // Port 9 on loopback is closed in test environments.
        let conn = Connection::open(
            "ws://127.0.0.1:9/ws",
            "t",
            ReconnectPolicy::disabled(),
            Arc::new(Ignore),
        )
        .unwrap();
        let handle = conn.handle();
        let err = handle.wait_for_open().await.unwrap_err();
        assert!(matches!(err, RealtimeError::NotConnected));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.send_json(&OutboundFrame::typing("c1", "me", true)));
        conn.close().await;
    }

    #[tokio::test]
    async fn exhausted_retries_are_reported() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        let conn = Connection::open("ws://127.0.0.1:9/ws", "t", policy, Arc::new(Ignore)).unwrap();
        let err = conn.handle().wait_for_open().await.unwrap_err();
        assert!(matches!(err, RealtimeError::ReconnectExhausted { attempts: 2 }));
    }
}
