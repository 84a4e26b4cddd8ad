use super::sink::EventSink;
use super::{RelayState, StreamEvent};
use tracing::{debug, trace};

/// One request's view of its sink.
///
/// Guarantees the terminal framing: `done` is written at most once, `error`
/// is always followed by `done`, and nothing is written after either. A sink
/// that refuses an event closes the session.
pub struct RelaySession<'s> {
    sink: &'s mut dyn EventSink,
    state: RelayState,
    closed: bool,
    emitted: usize,
}

impl<'s> RelaySession<'s> {
    pub fn new(sink: &'s mut dyn EventSink) -> Self {
        Self {
            sink,
            state: RelayState::Idle,
            closed: false,
            emitted: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Events accepted by the sink so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn transition(&mut self, to: RelayState) {
        if self.closed || self.state == to {
            return;
        }
        trace!("relay {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    /// Write one event. Returns `false` if the session is (now) closed.
    pub fn emit(&mut self, event: StreamEvent) -> bool {
        if self.closed {
            return false;
        }
        if !self.sink.send(event) {
            debug!("Event sink closed after {} events", self.emitted);
            self.closed = true;
            self.state = RelayState::Closed;
            return false;
        }
        self.emitted += 1;
        true
    }

    /// Write `done` and close. No-op when already closed.
    pub fn finish(&mut self) {
        if self.closed {
            return;
        }
        self.transition(RelayState::Terminating);
        self.emit(StreamEvent::Done);
        self.closed = true;
        self.state = RelayState::Closed;
    }

    /// Write `error` then `done`, and close. No-op when already closed.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.closed {
            return;
        }
        self.transition(RelayState::Terminating);
        self.emit(StreamEvent::Error {
            error: message.into(),
        });
        self.finish();
    }
}
