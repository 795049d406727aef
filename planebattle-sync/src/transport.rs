//! Thin WebSocket wrapper with multicast observers.
//!
//! ```text
//! connect() ──► tungstenite stream ──split──► writer task ◄── send()/close()
//!                                      │
//!                                      └────► reader task ──► observer 1
//!                                                         ──► observer 2 …
//! ```
//!
//! The reader task only forwards frames; observers are plain `mpsc`
//! receivers that the owning backend drains from its own `tick`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// One application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

impl Frame {
    fn into_message(self) -> Message {
        match self {
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Text(text) => Message::Text(text.into()),
        }
    }
}

/// Notifications multicast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(Frame),
    Close,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<(ObserverId, mpsc::UnboundedSender<TransportEvent>)>,
}

impl Observers {
    /// Deliver to every observer in registration order. Observers whose
    /// receiver is gone are dropped.
    fn notify(&mut self, event: &TransportEvent) {
        self.list.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

enum Outgoing {
    Frame(Frame),
    Close,
}

struct Shared {
    state: Mutex<ReadyState>,
    observers: Mutex<Observers>,
}

impl Shared {
    fn notify(&self, event: TransportEvent) {
        self.observers.lock().notify(&event);
    }

    /// Transition to `Closed` once; only the first caller emits `Close`.
    fn mark_closed(&self) {
        let was = std::mem::replace(&mut *self.state.lock(), ReadyState::Closed);
        if was != ReadyState::Closed {
            self.notify(TransportEvent::Close);
        }
    }
}

pub struct TransportAdapter {
    url: String,
    shared: Arc<Shared>,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    reader: Option<JoinHandle<()>>,
}

impl TransportAdapter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(ReadyState::Closed),
                observers: Mutex::new(Observers::default()),
            }),
            outgoing: None,
            reader: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.shared.state.lock()
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Register an observer. Events are delivered in stream order.
    pub fn observe(&self) -> (ObserverId, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observers = self.shared.observers.lock();
        observers.next_id += 1;
        let id = ObserverId(observers.next_id);
        observers.list.push((id, tx));
        (id, rx)
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.lock();
        let before = observers.list.len();
        observers.list.retain(|(oid, _)| *oid != id);
        observers.list.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.shared.observers.lock().list.len()
    }

    /// Open the stream. Resolves on open; on failure observers receive
    /// `Error` and the adapter stays closed.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }
        *self.shared.state.lock() = ReadyState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.shared.state.lock() = ReadyState::Closed;
                let reason = e.to_string();
                log::warn!("Transport connect to {} failed: {reason}", self.url);
                self.shared.notify(TransportEvent::Error(reason.clone()));
                return Err(TransportError::Connect {
                    url: self.url.clone(),
                    reason,
                });
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();

        // Writer task: frames go out in send() order, Close flushes first
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                match out {
                    Outgoing::Frame(frame) => {
                        if ws_writer.send(frame.into_message()).await.is_err() {
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = ws_writer.send(Message::Close(None)).await;
                        let _ = ws_writer.close().await;
                        break;
                    }
                }
            }
        });

        *self.shared.state.lock() = ReadyState::Open;
        log::info!("Transport connected to {}", self.url);
        self.shared.notify(TransportEvent::Open);

        // Reader task: forward frames to observers in arrival order
        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        shared.notify(TransportEvent::Message(Frame::Binary(data.into())));
                    }
                    Ok(Message::Text(text)) => {
                        shared.notify(TransportEvent::Message(Frame::Text(text.to_string())));
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        shared.notify(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            shared.mark_closed();
        });

        self.outgoing = Some(out_tx);
        self.reader = Some(reader);
        Ok(())
    }

    /// Queue a frame. No-op unless the stream is open.
    pub fn send(&self, frame: Frame) {
        if !self.is_open() {
            return;
        }
        if let Some(ref tx) = self.outgoing {
            let _ = tx.send(Outgoing::Frame(frame));
        }
    }

    /// Flush queued frames, close the stream, stop reading. Idempotent.
    pub fn close(&mut self) {
        if let Some(tx) = self.outgoing.take() {
            let _ = tx.send(Outgoing::Close);
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.shared.mark_closed();
    }
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_adapter_is_closed() {
        let adapter = TransportAdapter::new("ws://127.0.0.1:1");
        assert_eq!(adapter.ready_state(), ReadyState::Closed);
        assert!(!adapter.is_open());
        assert_eq!(adapter.url(), "ws://127.0.0.1:1");
    }

    #[test]
    fn test_send_before_open_is_noop() {
        let adapter = TransportAdapter::new("ws://127.0.0.1:1");
        let (_, mut rx) = adapter.observe();
        adapter.send(Frame::Text("hello".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut adapter = TransportAdapter::new("ws://127.0.0.1:1");
        adapter.close();
        adapter.close();
        assert_eq!(adapter.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn test_observe_unobserve() {
        let adapter = TransportAdapter::new("ws://127.0.0.1:1");
        let (a, _rx_a) = adapter.observe();
        let (b, _rx_b) = adapter.observe();
        assert_ne!(a, b);
        assert_eq!(adapter.observer_count(), 2);
        assert!(adapter.unobserve(a));
        assert!(!adapter.unobserve(a));
        assert_eq!(adapter.observer_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut adapter = TransportAdapter::new(format!("ws://127.0.0.1:{port}"));
        let (_, mut rx) = adapter.observe();
        assert!(adapter.connect().await.is_err());
        assert!(matches!(rx.try_recv(), Ok(TransportEvent::Error(_))));
        assert_eq!(adapter.ready_state(), ReadyState::Closed);
    }
}
