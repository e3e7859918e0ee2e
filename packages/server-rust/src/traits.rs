use hahub_core::Inbox;

/// A messaging channel the dispatch loop reads commands from and replies to.
///
/// Implementors own an [`Inbox`] that their own execution unit fills; the
/// dispatch loop is its only consumer.
pub trait MessageTransport: Send + Sync {
    fn inbox(&self) -> &Inbox;

    /// Whether the transport has a live session. Not-ready transports are skipped.
    fn is_ready(&self) -> bool {
        self.inbox().is_ready()
    }

    /// Enqueue an inbound message. Safe from any context.
    fn receive_message(&self, text: &str) {
        self.inbox().push(text);
    }

    /// Deliver `text` to whoever sent `in_response_to`.
    ///
    /// Must not block on I/O and must not fail: an unknown origin or a delivery
    /// problem is logged by the transport.
    fn send_message(&self, text: &str, in_response_to: &str);
}
