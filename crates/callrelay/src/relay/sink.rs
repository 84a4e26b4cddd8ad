//! Destinations for relay events.

use super::StreamEvent;
use tokio::sync::mpsc;

/// Where a request's events go.
///
/// `send` returns `false` once the destination can no longer accept events
/// (client gone, channel dropped). The session stops writing after that.
pub trait EventSink: Send {
    fn send(&mut self, event: StreamEvent) -> bool;
}

impl EventSink for Vec<StreamEvent> {
    fn send(&mut self, event: StreamEvent) -> bool {
        self.push(event);
        true
    }
}

/// Feeds a transport task through an unbounded channel.
///
/// There is no flow control: events queue in memory until the transport
/// writes them.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver the transport drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, event: StreamEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Records events, optionally refusing everything after `limit` of them to
/// stand in for a client that disconnects mid-stream.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<StreamEvent>,
    limit: Option<usize>,
    rejected: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disconnect_after(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Sends refused after the disconnect point.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// `type` tags of the recorded events, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.iter().map(StreamEvent::kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn send(&mut self, event: StreamEvent) -> bool {
        if self.limit.is_some_and(|limit| self.events.len() >= limit) {
            self.rejected += 1;
            return false;
        }
        self.events.push(event);
        true
    }
}
