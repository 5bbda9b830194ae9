//! Scripted WebSocket server for driving the client end to end.
//!
//! Every text frame the server receives is recorded and handed to a
//! [`Handler`], whose returned actions are written back on the same socket.
//! Tests can also push actions to every open connection at any time.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_client::{ClientConfig, CorrelatedClient};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Something the server writes to a client.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// JSON text frame
    Send(Value),
    /// Text frame sent verbatim
    Raw(String),
    /// Binary frame
    Binary(Vec<u8>),
    /// Close frame, then drop the socket
    Close,
}

/// Decides the server's answer to one inbound frame.
pub type Handler = Arc<dyn Fn(&Value) -> Vec<ServerAction> + Send + Sync>;

/// Reply to a request frame with the same `correlationId`.
pub fn reply_to(request: &Value, kind: &str, data: Value) -> ServerAction {
    ServerAction::Send(json!({
        "type": kind,
        "correlationId": request["correlationId"].clone(),
        "data": data,
    }))
}

/// Answers every request with `<type>.reply` echoing its data.
pub fn echo() -> Handler {
    Arc::new(|frame: &Value| {
        if frame["correlationId"].is_string() {
            let kind = format!("{}.reply", frame["type"].as_str().unwrap_or_default());
            vec![reply_to(frame, &kind, frame["data"].clone())]
        } else {
            Vec::new()
        }
    })
}

/// Never answers.
pub fn silent() -> Handler {
    Arc::new(|_: &Value| Vec::new())
}

/// In-process WebSocket server on an ephemeral port.
pub struct MockServer {
    url: String,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    push: broadcast::Sender<ServerAction>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");

        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (push, _) = broadcast::channel(64);

        let task = tokio::spawn({
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            let push = push.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    // Subscribed before the handshake so no push is missed
                    let pushed = push.subscribe();
                    let Ok(socket) = accept_async(stream).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        socket,
                        Arc::clone(&handler),
                        Arc::clone(&received),
                        pushed,
                    ));
                }
            }
        });

        Self {
            url: format!("ws://{addr}/ws"),
            received,
            connections,
            push,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Client configured for this server.
    pub fn client(&self) -> CorrelatedClient {
        self.client_with(ClientConfig::default())
    }

    pub fn client_with(&self, config: ClientConfig) -> CorrelatedClient {
        CorrelatedClient::new(config.with_url(self.url.clone())).expect("valid client config")
    }

    /// Write `action` on every open connection.
    pub fn push(&self, action: ServerAction) {
        let _ = self.push.send(action);
    }

    /// Frames received so far, in order.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Wait until at least `n` frames have arrived.
    pub async fn wait_for_frames(&self, n: usize) -> Vec<Value> {
        wait_until(|| self.received.lock().len() >= n).await;
        self.received()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<S>(
    socket: WebSocketStream<S>,
    handler: Handler,
    received: Arc<Mutex<Vec<Value>>>,
    mut pushed: broadcast::Receiver<ServerAction>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = socket.split();

    loop {
        let actions = tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    received.lock().push(value.clone());
                    handler(&value)
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            },
            action = pushed.recv() => match action {
                Ok(action) => vec![action],
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            },
        };

        for action in actions {
            let message = match action {
                ServerAction::Send(value) => Message::Text(value.to_string().into()),
                ServerAction::Raw(text) => Message::Text(text.into()),
                ServerAction::Binary(bytes) => Message::Binary(bytes.into()),
                ServerAction::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            };
            if write.send(message).await.is_err() {
                return;
            }
        }
    }
}

/// Poll `condition` until it holds; panics after [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// Await `future`; panics after [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}
