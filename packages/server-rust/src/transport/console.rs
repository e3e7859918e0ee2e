//! Interactive console transport.
//!
//! Reads one command per line and prints replies. Loaded automatically when
//! no other transport is configured.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use hahub_core::Inbox;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::stopped;
use crate::service::config::{ConfigurationError, ServiceSettings};
use crate::service::registry::Service;
use crate::traits::MessageTransport;

pub type ConsoleReader = Box<dyn AsyncBufRead + Send + Unpin>;
pub type ConsoleWriter = Box<dyn Write + Send>;

pub struct ConsoleTransport {
    inbox: Inbox,
    reader: Mutex<Option<ConsoleReader>>,
    writer: Mutex<ConsoleWriter>,
    stop: watch::Sender<bool>,
}

impl ConsoleTransport {
    /// Console bound to the process's stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_io(
            Box::new(BufReader::new(tokio::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    #[must_use]
    pub fn with_io(reader: ConsoleReader, writer: ConsoleWriter) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inbox: Inbox::new(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(writer),
            stop,
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTransport for ConsoleTransport {
    fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    fn send_message(&self, text: &str, _in_response_to: &str) {
        let mut writer = self.writer.lock();
        if let Err(err) = writeln!(writer, "{text}").and_then(|()| writer.flush()) {
            error!(error = %err, "failed to write console reply");
        }
    }
}

#[async_trait]
impl Service for ConsoleTransport {
    fn name(&self) -> &'static str {
        "command_line"
    }

    fn threaded(&self) -> bool {
        true
    }

    fn configure(&mut self, _settings: &ServiceSettings) -> Result<(), ConfigurationError> {
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let Some(reader) = self.reader.lock().take() else {
            anyhow::bail!("console transport already started");
        };
        let mut lines = reader.lines();
        let mut stop = self.stop.subscribe();
        self.inbox.set_ready(true);

        loop {
            tokio::select! {
                () = stopped(&mut stop) => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            self.receive_message(line);
                        }
                    }
                    Ok(None) => {
                        info!("console input closed");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "console read failed");
                        break;
                    }
                },
            }
        }
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
