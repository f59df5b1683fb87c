//! HTTP poll-and-post transport
//!
//! Outbound messages are posted to the relay's signal endpoint; inbound
//! messages are fetched by the owner through [`SignalTransport::poll`].
//!
//! The relay keys `poll-signal` by call id alone, so a poll can return the
//! call's whole state, including what this side posted. Those echoes are
//! dropped here before they reach the negotiator.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

use crate::error::{SignalError, SignalResult};
use crate::message::{CallId, CandidateKey, Role, SignalMessage, SignalPayload};
use crate::transport::{Delivery, SignalTransport, TransportEvent, TransportFactory};
use crate::wire::{PollRequest, PollResponse, SignalAck, SignalRequest};

/// Endpoint layout of the HTTP relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Relay base URL, e.g. `https://relay.example.com/api/`
    pub base_url: String,
    pub signal_path: String,
    pub poll_path: String,
    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            signal_path: "signal".to_string(),
            poll_path: "poll-signal".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl HttpTransportConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> SignalResult<Url> {
        let base = Url::parse(&self.base_url).map_err(|e| SignalError::InvalidEndpoint {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        base.join(path.trim_start_matches('/'))
            .map_err(|e| SignalError::InvalidEndpoint {
                url: format!("{}{}", self.base_url, path),
                reason: e.to_string(),
            })
    }
}

/// Pull transport talking to an HTTP relay
#[derive(Clone)]
pub struct HttpPollTransport {
    inner: Arc<HttpTransportInner>,
}

struct HttpTransportInner {
    client: reqwest::Client,
    signal_url: Url,
    poll_url: Url,
    role: Role,
    posted: Mutex<EchoFilter>,
    closed: AtomicBool,
}

/// What this side has posted for the call
#[derive(Debug, Default)]
struct EchoFilter {
    descriptions: HashSet<String>,
    candidates: HashSet<CandidateKey>,
}

impl EchoFilter {
    fn record(&mut self, message: &SignalMessage) {
        match &message.payload {
            SignalPayload::Offer(description) | SignalPayload::Answer(description) => {
                self.descriptions.insert(description.sdp.clone());
            }
            SignalPayload::Ice(candidate) => {
                self.candidates.insert(candidate.key());
            }
            SignalPayload::Hangup => {}
        }
    }

    fn is_echo(&self, message: &SignalMessage) -> bool {
        match &message.payload {
            SignalPayload::Offer(description) | SignalPayload::Answer(description) => {
                self.descriptions.contains(&description.sdp)
            }
            SignalPayload::Ice(candidate) => self.candidates.contains(&candidate.key()),
            SignalPayload::Hangup => false,
        }
    }

    fn retain_remote(&self, messages: &mut Vec<SignalMessage>) -> usize {
        let before = messages.len();
        messages.retain(|message| !self.is_echo(message));
        before - messages.len()
    }
}

impl HttpPollTransport {
    pub fn new(config: &HttpTransportConfig, role: Role) -> SignalResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SignalError::http(e.to_string()))?;
        Self::with_client(client, config, role)
    }

    /// Build on a shared `reqwest::Client` (connection pool reuse)
    pub fn with_client(client: reqwest::Client, config: &HttpTransportConfig, role: Role) -> SignalResult<Self> {
        let signal_url = config.endpoint(&config.signal_path)?;
        let poll_url = config.endpoint(&config.poll_path)?;
        debug!(signal = %signal_url, poll = %poll_url, role = %role, "HTTP signal transport ready");
        Ok(Self {
            inner: Arc::new(HttpTransportInner {
                client,
                signal_url,
                poll_url,
                role,
                posted: Mutex::new(EchoFilter::default()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    fn ensure_open(&self) -> SignalResult<()> {
        if self.inner.closed.load(Ordering::Relaxed) {
            Err(SignalError::Closed)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for HttpPollTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPollTransport")
            .field("signal_url", &self.inner.signal_url.as_str())
            .field("poll_url", &self.inner.poll_url.as_str())
            .field("role", &self.inner.role)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl SignalTransport for HttpPollTransport {
    fn delivery(&self) -> Delivery {
        Delivery::Pull
    }

    async fn send(&self, message: &SignalMessage) -> SignalResult<()> {
        self.ensure_open()?;
        let body = SignalRequest::from_message(message)?;
        trace!(call_id = %message.call_id, kind = %message.kind(), "Posting signal");
        // Recorded up front; a post that timed out may still have landed
        self.inner.posted.lock().record(message);

        let response = self
            .inner
            .client
            .post(self.inner.signal_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalError::rejected("signal", status.to_string()));
        }

        let ack: SignalAck = response.json().await?;
        if ack.success {
            Ok(())
        } else {
            Err(SignalError::rejected(
                "signal",
                ack.error.unwrap_or_else(|| "success=false".to_string()),
            ))
        }
    }

    async fn poll(&self, call_id: &CallId) -> SignalResult<Vec<SignalMessage>> {
        self.ensure_open()?;
        let response = self
            .inner
            .client
            .post(self.inner.poll_url.clone())
            .json(&PollRequest { call_id: call_id.clone() })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalError::rejected("poll", status.to_string()));
        }

        let batch: PollResponse = response.json().await?;
        let mut messages = batch.into_messages(call_id)?;
        let echoes = self.inner.posted.lock().retain_remote(&mut messages);
        if echoes > 0 {
            trace!(call_id = %call_id, role = %self.inner.role, echoes, "Dropped echoes of own signals");
        }
        if !messages.is_empty() {
            trace!(call_id = %call_id, count = messages.len(), "Poll returned messages");
        }
        Ok(messages)
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        None
    }

    async fn close(&self) -> SignalResult<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

/// Opens an [`HttpPollTransport`] per call attempt, sharing one client
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    config: HttpTransportConfig,
    client: reqwest::Client,
}

impl HttpTransportFactory {
    pub fn new(config: HttpTransportConfig) -> SignalResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SignalError::http(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TransportFactory for HttpTransportFactory {
    async fn open(&self, call_id: &CallId, role: Role) -> SignalResult<Arc<dyn SignalTransport>> {
        debug!(call_id = %call_id, role = %role, "Opening HTTP signal transport");
        let transport = HttpPollTransport::with_client(self.client.clone(), &self.config, role)?;
        Ok(Arc::new(transport))
    }
}
