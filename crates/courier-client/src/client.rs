//! The correlated WebSocket client.
//!
//! One client owns at most one live connection. Two tasks serve it: a writer
//! draining an unbounded channel into the socket, and a reader feeding every
//! text frame through [`crate::inbound::dispatch`] in arrival order.
//!
//! Every pending request ends with exactly one outcome: its reply, its
//! deadline, or `ConnectionClosed` when the connection closes, is replaced by
//! a new `connect()`, or the client is dropped.

use crate::config::ClientConfig;
use crate::error::{ClientError, RequestError};
use crate::inbound;
use crate::log::MessageLog;
use crate::pending::{PendingGuard, PendingRequestStore, PendingStatsSnapshot};
use crate::state::{CloseReason, ConnectionEvent, ConnectionState};
use courier_telemetry::metrics::{MESSAGES_SENT, SENDS_WHILE_DISCONNECTED};
use courier_types::{decode_payload, Envelope, EnvelopeError, RequestMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close()` waits for the close frame to be flushed.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// State shared between the client handle and its connection tasks.
struct Shared {
    config: ClientConfig,
    pending: PendingRequestStore,
    log: MessageLog,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    /// Writer channel of the live connection
    outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    /// Generation of the live connection, 0 when there is none
    live: AtomicU64,
    next_generation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No observers is fine
        let _ = self.events.send(event);
    }

    /// Queue a frame on the live connection; false when there is none.
    fn transmit(&self, message: Message) -> bool {
        if !self.state.borrow().is_open() {
            return false;
        }
        match self.outbound.read().as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Tear down connection `generation` once.
    ///
    /// Whoever gets here first (reader exit, `close()`, `connect()`, drop)
    /// does the cleanup; later callers are no-ops.
    fn retire(&self, generation: u64, reason: CloseReason, error: Option<String>) -> bool {
        if self
            .live
            .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.outbound.write().take();
        self.set_state(ConnectionState::Closed);

        if let Some(error) = error {
            warn!(error = %error, "WebSocket error");
            self.emit(ConnectionEvent::Error(error));
        }

        let failed = self.pending.fail_all(|| RequestError::ConnectionClosed);
        if reason == CloseReason::Superseded {
            info!(failed_requests = failed, "WebSocket connection replaced");
        } else {
            warn!(reason = ?reason, failed_requests = failed, "WebSocket closed");
        }
        self.emit(ConnectionEvent::Closed(reason));
        true
    }

    /// Handshake never completed.
    fn fail_connect(&self, error: &ClientError) {
        self.set_state(ConnectionState::Closed);
        warn!(error = %error, "WebSocket connection failed");
        self.emit(ConnectionEvent::Error(error.to_string()));
        self.emit(ConnectionEvent::Closed(CloseReason::Failed));
    }
}

/// Tasks serving one connection.
struct Connection {
    generation: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Client for one persistent WebSocket connection.
///
/// Wrap in an `Arc` to issue requests from several tasks; they share the
/// socket and the correlation registry.
pub struct CorrelatedClient {
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
}

impl CorrelatedClient {
    /// Create an idle client; nothing is opened until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let (state, _) = watch::channel(ConnectionState::Idle);
        let (events, _) = broadcast::channel(config.event_capacity);
        let log = MessageLog::new(config.event_capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                pending: PendingRequestStore::new(),
                log,
                state,
                events,
                outbound: RwLock::new(None),
                live: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
            }),
            connection: Mutex::new(None),
        })
    }

    /// Open the connection, replacing any previous one.
    ///
    /// Requests still pending from before (including ones issued while
    /// disconnected, which were never sent) fail with `ConnectionClosed`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let previous = self.connection.lock().take();
        if let Some(previous) = previous {
            self.shared
                .retire(previous.generation, CloseReason::Superseded, None);
            previous.abort();
        }
        let orphaned = self.shared.pending.fail_all(|| RequestError::ConnectionClosed);
        if orphaned > 0 {
            warn!(
                failed_requests = orphaned,
                "Failed requests issued while disconnected"
            );
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let url = self.shared.config.url.clone();
        let timeout = self.shared.config.connect_timeout;

        self.shared.set_state(ConnectionState::Connecting);
        debug!(url = %url, "Connecting WebSocket");

        let stream = match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let error = ClientError::Connect {
                    url,
                    reason: e.to_string(),
                };
                self.shared.fail_connect(&error);
                return Err(error);
            }
            Err(_) => {
                let error = ClientError::ConnectTimeout { url, timeout };
                self.shared.fail_connect(&error);
                return Err(error);
            }
        };

        let (sink, stream) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        *self.shared.outbound.write() = Some(tx);
        self.shared.live.store(generation, Ordering::Release);
        self.shared.set_state(ConnectionState::Open);
        self.shared.emit(ConnectionEvent::Opened);
        info!(url = %url, "WebSocket connected");

        let connection = Connection {
            generation,
            writer: tokio::spawn(write_loop(sink, rx)),
            reader: tokio::spawn(read_loop(Arc::clone(&self.shared), stream, generation)),
        };

        // A concurrent connect() may have finished first
        if let Some(stale) = self.connection.lock().replace(connection) {
            self.shared
                .retire(stale.generation, CloseReason::Superseded, None);
            stale.abort();
        }

        Ok(())
    }

    /// Broadcast an uncorrelated message.
    ///
    /// When the connection is not open this logs a warning and returns
    /// `Ok(())` without sending or queueing anything. Only a payload that
    /// cannot be encoded is an error.
    pub fn send<T>(&self, kind: &str, data: &T) -> Result<(), EnvelopeError>
    where
        T: Serialize + ?Sized,
    {
        if !self.is_open() {
            SENDS_WHILE_DISCONNECTED.inc();
            warn!(kind = kind, "WebSocket not connected; broadcast dropped");
            return Ok(());
        }

        let data = serde_json::to_value(data).map_err(EnvelopeError::Encode)?;
        let text = Envelope::broadcast(kind, data).to_text()?;

        if self.shared.transmit(Message::Text(text.into())) {
            MESSAGES_SENT.with_label_values(&["broadcast"]).inc();
            debug!(kind = kind, "Sent broadcast");
        } else {
            SENDS_WHILE_DISCONNECTED.inc();
            warn!(kind = kind, "WebSocket not connected; broadcast dropped");
        }
        Ok(())
    }

    /// Send a request and wait for its correlated reply.
    ///
    /// Uses the configured default deadline. The reply's `data` is decoded
    /// into `Resp`; an `error` reply becomes [`RequestError::Rejected`].
    pub async fn request<Req, Resp>(&self, kind: &str, data: &Req) -> Result<Resp, RequestError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.request_with_timeout(kind, data, self.shared.config.request_timeout)
            .await
    }

    /// [`request`](Self::request) with an explicit deadline (`None` = wait
    /// until the connection ends).
    pub async fn request_with_timeout<Req, Resp>(
        &self,
        kind: &str,
        data: &Req,
        timeout: Option<Duration>,
    ) -> Result<Resp, RequestError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let reply = self.exchange(kind, data, timeout).await?;
        decode_payload(&reply.kind, reply.data).map_err(RequestError::Decode)
    }

    /// Typed request over the message catalogue.
    ///
    /// The reply must carry `M::Response::TYPE`.
    pub async fn call<M: RequestMessage>(&self, message: &M) -> Result<M::Response, RequestError> {
        let reply = self
            .exchange(M::TYPE, message, self.shared.config.request_timeout)
            .await?;

        let expected = <M::Response as courier_types::Message>::TYPE;
        if reply.kind != expected {
            return Err(RequestError::UnexpectedType {
                expected,
                found: reply.kind,
            });
        }
        decode_payload(&reply.kind, reply.data).map_err(RequestError::Decode)
    }

    /// Register, transmit, await. Returns the whole reply envelope.
    async fn exchange<Req>(
        &self,
        kind: &str,
        data: &Req,
        timeout: Option<Duration>,
    ) -> Result<Envelope, RequestError>
    where
        Req: Serialize + ?Sized,
    {
        let data = serde_json::to_value(data)
            .map_err(|e| RequestError::Encode(EnvelopeError::Encode(e)))?;

        // Registered before transmitting so an immediate reply always matches
        let pending = &self.shared.pending;
        let (correlation_id, reply) = pending.register(kind, timeout);
        let _guard = PendingGuard::new(pending, correlation_id.clone());

        let text = Envelope::request(kind, correlation_id.clone(), data)
            .to_text()
            .map_err(RequestError::Encode)?;

        if self.shared.transmit(Message::Text(text.into())) {
            MESSAGES_SENT.with_label_values(&["request"]).inc();
            debug!(correlation_id = %correlation_id, kind = kind, "Sent request");
        } else {
            SENDS_WHILE_DISCONNECTED.inc();
            warn!(
                correlation_id = %correlation_id,
                kind = kind,
                "WebSocket not connected; request stays pending until the connection is replaced or closed"
            );
        }

        let outcome = pending
            .wait_for_outcome(&correlation_id, reply, timeout)
            .await;

        outcome.unwrap_or(Err(RequestError::ConnectionClosed))
    }

    /// Close the connection.
    ///
    /// Pending requests fail with `ConnectionClosed`, including ones issued
    /// while disconnected.
    pub async fn close(&self) {
        let connection = self.connection.lock().take();

        if let Some(connection) = connection {
            if let Some(tx) = self.shared.outbound.read().as_ref() {
                let _ = tx.send(Message::Close(None));
            }
            self.shared
                .retire(connection.generation, CloseReason::Local, None);

            // The writer flushes the close frame, then stops once its
            // channel is dropped
            let Connection { reader, writer, .. } = connection;
            if tokio::time::timeout(CLOSE_GRACE, writer).await.is_err() {
                debug!("Close frame not flushed in time");
            }
            reader.abort();
        }

        self.shared.pending.fail_all(|| RequestError::ConnectionClosed);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Follow state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Every decoded inbound envelope.
    pub fn messages(&self) -> &MessageLog {
        &self.shared.log
    }

    /// Requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.pending_count()
    }

    pub fn stats(&self) -> PendingStatsSnapshot {
        self.shared.pending.stats().snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }
}

impl Drop for CorrelatedClient {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            self.shared
                .retire(connection.generation, CloseReason::Local, None);
            connection.abort();
        }
    }
}

impl std::fmt::Debug for CorrelatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelatedClient")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "Failed to write WebSocket frame");
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<WsStream>, generation: u64) {
    let (reason, error) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                inbound::dispatch(&text, &shared.log, &shared.pending);
            }
            Some(Ok(Message::Binary(bytes))) => {
                warn!(len = bytes.len(), "Discarding binary frame");
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(frame = ?frame, "Server closed the connection");
                break (CloseReason::Remote, None);
            }
            // tungstenite answers pings itself
            Some(Ok(_)) => {}
            Some(Err(e)) => break (CloseReason::Failed, Some(e.to_string())),
            None => break (CloseReason::Remote, None),
        }
    };

    shared.retire(generation, reason, error);
}
