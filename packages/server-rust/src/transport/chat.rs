//! Shared machinery for chat-platform transports.
//!
//! A `ChatPlatform` knows one platform's wire protocol. `ChatTransport` wraps
//! it with the parts every chat transport needs: a polling task, correlation
//! of replies to the message that caused them, and an outbox drained by the
//! same task so `send_message` never blocks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hahub_core::Inbox;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::correlation::CorrelationTable;
use super::stopped;
use crate::service::config::{ConfigurationError, ServiceSettings};
use crate::service::registry::Service;
use crate::traits::MessageTransport;

// ---------------------------------------------------------------------------
// ChatPlatform trait
// ---------------------------------------------------------------------------

/// A message received from a chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage<O> {
    pub text: String,
    /// Where replies to this message should go.
    pub origin: O,
}

/// One chat platform's wire protocol.
#[async_trait]
pub trait ChatPlatform: Send + Sync + Sized + 'static {
    /// Platform-specific reply address.
    type Origin: Clone + fmt::Debug + Send + Sync + 'static;

    /// Registry name of the transport built on this platform.
    const SERVICE_NAME: &'static str;

    /// Build a client from the service's settings bag.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` for missing or invalid settings.
    fn from_settings(settings: &ServiceSettings) -> Result<Self, ConfigurationError>;

    fn poll_interval(&self) -> Duration;

    /// Open the session. Returns the bot's display name.
    async fn connect(&self) -> anyhow::Result<String>;

    /// Fetch messages that arrived since the previous poll, oldest first.
    async fn poll(&self) -> anyhow::Result<Vec<IncomingMessage<Self::Origin>>>;

    async fn reply(&self, origin: &Self::Origin, text: &str) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ChatTransport
// ---------------------------------------------------------------------------

/// Upper bound on delivering replies still queued at stop.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

struct Outgoing<O> {
    origin: O,
    text: String,
}

/// Transport service for any [`ChatPlatform`].
pub struct ChatTransport<P: ChatPlatform> {
    platform: Option<Arc<P>>,
    inbox: Inbox,
    correlations: Mutex<CorrelationTable<P::Origin>>,
    outbox: mpsc::UnboundedSender<Outgoing<P::Origin>>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Outgoing<P::Origin>>>>,
    stop: watch::Sender<bool>,
}

impl<P: ChatPlatform> ChatTransport<P> {
    /// Unconfigured transport with the default correlation capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_correlation_capacity(super::correlation::DEFAULT_CORRELATION_CAPACITY)
    }

    #[must_use]
    pub fn with_correlation_capacity(capacity: usize) -> Self {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        Self {
            platform: None,
            inbox: Inbox::new(),
            correlations: Mutex::new(CorrelationTable::new(capacity)),
            outbox,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            stop,
        }
    }

    /// Transport around an already-built platform client.
    #[must_use]
    pub fn with_platform(platform: P) -> Self {
        let mut transport = Self::new();
        transport.platform = Some(Arc::new(platform));
        transport
    }

    #[must_use]
    pub fn platform(&self) -> Option<&Arc<P>> {
        self.platform.as_ref()
    }

    async fn poll_once(&self, platform: &P) {
        match platform.poll().await {
            Ok(messages) => {
                for message in messages {
                    debug!(
                        transport = P::SERVICE_NAME,
                        origin = ?message.origin,
                        "received message"
                    );
                    self.correlations
                        .lock()
                        .record(&message.text, message.origin);
                    self.receive_message(&message.text);
                }
            }
            Err(err) => warn!(transport = P::SERVICE_NAME, error = %err, "poll failed"),
        }
    }

    async fn deliver(&self, platform: &P, outgoing: Outgoing<P::Origin>) {
        if let Err(err) = platform.reply(&outgoing.origin, &outgoing.text).await {
            error!(
                transport = P::SERVICE_NAME,
                origin = ?outgoing.origin,
                error = %err,
                "failed to deliver reply"
            );
        }
    }
}

impl<P: ChatPlatform> Default for ChatTransport<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ChatPlatform> MessageTransport for ChatTransport<P> {
    fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    fn send_message(&self, text: &str, in_response_to: &str) {
        let origin = self.correlations.lock().get(in_response_to).cloned();
        let Some(origin) = origin else {
            error!(
                transport = P::SERVICE_NAME,
                in_response_to, "no origin recorded for message, dropping reply"
            );
            return;
        };
        let outgoing = Outgoing {
            origin,
            text: text.to_string(),
        };
        if self.outbox.send(outgoing).is_err() {
            error!(transport = P::SERVICE_NAME, "outbox closed, dropping reply");
        }
    }
}

#[async_trait]
impl<P: ChatPlatform> Service for ChatTransport<P> {
    fn name(&self) -> &'static str {
        P::SERVICE_NAME
    }

    fn threaded(&self) -> bool {
        true
    }

    fn configure(&mut self, settings: &ServiceSettings) -> Result<(), ConfigurationError> {
        self.platform = Some(Arc::new(P::from_settings(settings)?));
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let Some(platform) = self.platform.clone() else {
            anyhow::bail!("{} started before being configured", P::SERVICE_NAME);
        };
        let Some(mut outbox) = self.outbox_rx.lock().take() else {
            anyhow::bail!("{} already started", P::SERVICE_NAME);
        };
        let mut stop = self.stop.subscribe();

        let identity = tokio::select! {
            () = stopped(&mut stop) => {
                info!(transport = P::SERVICE_NAME, "stopped before the session was established");
                return Ok(());
            }
            identity = platform.connect() => identity?,
        };
        info!(transport = P::SERVICE_NAME, identity, "chat session established");
        self.inbox.set_ready(true);

        let mut ticker = tokio::time::interval(platform.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = stopped(&mut stop) => break,
                Some(outgoing) = outbox.recv() => tokio::select! {
                    () = stopped(&mut stop) => break,
                    () = self.deliver(&platform, outgoing) => {}
                },
                _ = ticker.tick() => tokio::select! {
                    () = stopped(&mut stop) => break,
                    () = self.poll_once(&platform) => {}
                },
            }
        }
        self.inbox.set_ready(false);

        // Flush replies queued before the stop request.
        let flush = async {
            while let Ok(outgoing) = outbox.try_recv() {
                self.deliver(&platform, outgoing).await;
            }
        };
        if tokio::time::timeout(FLUSH_TIMEOUT, flush).await.is_err() {
            warn!(transport = P::SERVICE_NAME, "gave up flushing queued replies");
        }
        info!(transport = P::SERVICE_NAME, "chat session closed");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop.send_replace(true);
        Ok(())
    }

    fn as_transport(self: Arc<Self>) -> Option<Arc<dyn MessageTransport>> {
        Some(self)
    }
}
