//! Bounded, newest-first buffer of telemetry received by the parent.
//!
//! The parent UI only ever shows the latest handful of messages, so the
//! session keeps a small ring instead of an unbounded log.  Memory is capped by
//! *eviction*: a push into a full buffer drops the oldest entry.  Delivery is
//! never refused.

use std::collections::VecDeque;

use crate::protocol::messages::TelemetryMessage;

/// Number of messages retained by a [`ReceiveBuffer`].
pub const RECEIVE_BUFFER_CAPACITY: usize = 10;

/// Newest-first sequence of the most recently received telemetry messages.
///
/// Order reflects *arrival* order, not the `timestamp` inside each message.
#[derive(Debug, Clone, Default)]
pub struct ReceiveBuffer {
    entries: VecDeque<TelemetryMessage>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(RECEIVE_BUFFER_CAPACITY),
        }
    }

    /// Inserts `message` as the newest entry, evicting the oldest when full.
    ///
    /// Returns the evicted message, if any.
    pub fn push(&mut self, message: TelemetryMessage) -> Option<TelemetryMessage> {
        self.entries.push_front(message);
        if self.entries.len() > RECEIVE_BUFFER_CAPACITY {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// The most recently received message.
    pub fn latest(&self) -> Option<&TelemetryMessage> {
        self.entries.front()
    }

    /// Iterates newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &TelemetryMessage> {
        self.entries.iter()
    }

    /// Returns a newest-first copy of the buffer contents.
    pub fn snapshot(&self) -> Vec<TelemetryMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{AppActivity, AppActivityMessage};
    use chrono::Utc;

    fn activity(n: usize) -> TelemetryMessage {
        TelemetryMessage::AppActivity(AppActivityMessage {
            timestamp: Utc::now(),
            app: AppActivity {
                name: format!("app-{n}"),
                action: "opened".to_string(),
            },
        })
    }

    fn app_name(message: &TelemetryMessage) -> &str {
        match message {
            TelemetryMessage::AppActivity(m) => &m.app.name,
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = ReceiveBuffer::new();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
    }

    #[test]
    fn test_push_places_newest_first() {
        // Arrange
        let mut buffer = ReceiveBuffer::new();

        // Act
        buffer.push(activity(1));
        buffer.push(activity(2));

        // Assert
        let names: Vec<_> = buffer.iter().map(app_name).collect();
        assert_eq!(names, vec!["app-2", "app-1"]);
    }

    #[test]
    fn test_fifteen_pushes_keep_exactly_the_last_ten_newest_first() {
        // Arrange
        let mut buffer = ReceiveBuffer::new();

        // Act
        let evicted: Vec<_> = (0..15).filter_map(|n| buffer.push(activity(n))).collect();

        // Assert
        assert_eq!(buffer.len(), RECEIVE_BUFFER_CAPACITY);
        let names: Vec<_> = buffer.iter().map(app_name).collect();
        let expected: Vec<_> = (5..15).rev().map(|n| format!("app-{n}")).collect();
        assert_eq!(names, expected);
        let evicted_names: Vec<_> = evicted.iter().map(app_name).collect();
        assert_eq!(evicted_names, vec!["app-0", "app-1", "app-2", "app-3", "app-4"]);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut buffer = ReceiveBuffer::new();
        for n in 0..100 {
            buffer.push(activity(n));
            assert!(buffer.len() <= RECEIVE_BUFFER_CAPACITY);
        }
    }

    #[test]
    fn test_order_follows_arrival_not_timestamp() {
        let mut buffer = ReceiveBuffer::new();
        let mut older = activity(1);
        if let TelemetryMessage::AppActivity(m) = &mut older {
            m.timestamp = Utc::now() - chrono::Duration::hours(1);
        }
        buffer.push(activity(0));
        buffer.push(older);

        assert_eq!(app_name(buffer.latest().unwrap()), "app-1");
    }
}
