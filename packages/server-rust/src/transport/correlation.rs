use std::collections::{HashMap, VecDeque};

/// Default number of correlations a chat transport remembers.
pub const DEFAULT_CORRELATION_CAPACITY: usize = 256;

/// Bounded message-text -> origin table used to route replies.
///
/// Keyed by the message text as received. Re-recording a text replaces its
/// origin and makes it the newest entry. When full, the oldest entry is
/// evicted.
#[derive(Debug)]
pub struct CorrelationTable<O> {
    capacity: usize,
    order: VecDeque<String>,
    origins: HashMap<String, O>,
}

impl<O> CorrelationTable<O> {
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            origins: HashMap::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, text: &str, origin: O) {
        if self.origins.insert(text.to_string(), origin).is_some() {
            self.order.retain(|t| t != text);
        }
        self.order.push_back(text.to_string());

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.origins.remove(&oldest);
            }
        }
    }

    #[must_use]
    pub fn get(&self, text: &str) -> Option<&O> {
        self.origins.get(text)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<O> Default for CorrelationTable<O> {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_CAPACITY)
    }
}
