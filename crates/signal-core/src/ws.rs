//! WebSocket push transport
//!
//! One reader task parses inbound frames into [`TransportEvent`]s, one
//! writer task drains an outbound queue into the socket sink. Closing the
//! transport aborts both.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{SignalError, SignalResult};
use crate::message::{CallId, Role, SignalMessage};
use crate::recovery::{RetryConfig, retry_with_backoff};
use crate::transport::{Delivery, SignalTransport, TransportEvent, TransportFactory};
use crate::wire::SocketMessage;

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Relay socket URL, e.g. `wss://relay.example.com/ws`
    pub url: String,
    pub channel_capacity: usize,
    /// Connect attempts before giving up
    pub connect_attempts: u32,
    pub connect_initial_delay_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            connect_attempts: 5,
            connect_initial_delay_ms: 250,
        }
    }
}

impl WebSocketConfig {
    fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.connect_attempts.max(1),
            initial_delay: Duration::from_millis(self.connect_initial_delay_ms),
            ..RetryConfig::quick()
        }
    }

    /// Socket URL with the call routing query appended
    fn call_url(&self, call_id: &CallId, role: Role) -> SignalResult<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| SignalError::InvalidEndpoint {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(SignalError::InvalidEndpoint {
                    url: self.url.clone(),
                    reason: format!("unsupported scheme {}", other),
                });
            }
        }
        url.query_pairs_mut()
            .append_pair("callId", call_id.as_str())
            .append_pair("role", &role.to_string());
        Ok(url)
    }
}

/// Push transport over a relay WebSocket
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WebSocketInner>,
}

struct WebSocketInner {
    url: Url,
    outbound_tx: mpsc::Sender<Message>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Connect to the relay for one call, retrying transient connect errors
    pub async fn connect(config: &WebSocketConfig, call_id: &CallId, role: Role) -> SignalResult<Self> {
        let url = config.call_url(call_id, role)?;
        let (stream, _response) = retry_with_backoff("ws_connect", config.retry(), || {
            let url = url.clone();
            async move { connect_async(url.as_str()).await.map_err(SignalError::from) }
        })
        .await?;
        info!(url = %url, call_id = %call_id, "Signal socket connected");

        let (mut sink, mut source) = stream.split();
        let capacity = config.channel_capacity.max(1);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "Signal socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_closed = closed.clone();
        let reader_call_id = call_id.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SocketMessage>(text.as_str()) {
                        Ok(message) => {
                            let event = message.into_event();
                            if let TransportEvent::Message(m) = &event {
                                if m.call_id != reader_call_id {
                                    trace!(call_id = %m.call_id, "Ignoring signal for another call");
                                    continue;
                                }
                            }
                            event
                        }
                        Err(e) => {
                            warn!(error = %e, "Discarding malformed signal frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Signal socket closed by relay");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        if reader_closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!(error = %e, "Signal socket read failed");
                        let _ = events_tx
                            .send(TransportEvent::Error { error: e.to_string() })
                            .await;
                        break;
                    }
                };

                if events_tx.send(event).await.is_err() {
                    break;
                }
            }

            reader_closed.store(true, Ordering::Relaxed);
            let _ = events_tx.send(TransportEvent::Closed).await;
        });

        Ok(Self {
            inner: Arc::new(WebSocketInner {
                url,
                outbound_tx,
                events_rx: Mutex::new(Some(events_rx)),
                tasks: Mutex::new(vec![writer, reader]),
                closed,
            }),
        })
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.inner.url.as_str())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl SignalTransport for WebSocketTransport {
    fn delivery(&self) -> Delivery {
        Delivery::Push
    }

    async fn send(&self, message: &SignalMessage) -> SignalResult<()> {
        if self.is_closed() {
            return Err(SignalError::Closed);
        }
        let json = serde_json::to_string(&SocketMessage::from_message(message))?;
        self.inner
            .outbound_tx
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| SignalError::Closed)
    }

    async fn poll(&self, _call_id: &CallId) -> SignalResult<Vec<SignalMessage>> {
        Ok(Vec::new())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.inner.events_rx.lock().take()
    }

    async fn close(&self) -> SignalResult<()> {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        debug!(url = %self.inner.url, "Signal socket transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

/// Opens a [`WebSocketTransport`] per call attempt
#[derive(Debug, Clone, Default)]
pub struct WebSocketFactory {
    config: WebSocketConfig,
}

impl WebSocketFactory {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for WebSocketFactory {
    async fn open(&self, call_id: &CallId, role: Role) -> SignalResult<Arc<dyn SignalTransport>> {
        let transport = WebSocketTransport::connect(&self.config, call_id, role).await?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_url_carries_routing_query() {
        let config = WebSocketConfig {
            url: "wss://relay.example.com/ws".to_string(),
            ..WebSocketConfig::default()
        };
        let url = config.call_url(&CallId::new("abc"), Role::Callee).unwrap();
        assert_eq!(url.as_str(), "wss://relay.example.com/ws?callId=abc&role=callee");
    }

    #[test]
    fn test_rejects_http_scheme() {
        let config = WebSocketConfig {
            url: "http://relay.example.com/ws".to_string(),
            ..WebSocketConfig::default()
        };
        assert!(matches!(
            config.call_url(&CallId::new("abc"), Role::Caller),
            Err(SignalError::InvalidEndpoint { .. })
        ));
    }
}
