//! Event stream delivered to the UI/library consumer.
//!
//! Events are enqueued while a store transaction is open and fired only
//! after it commits (spec §4.I) — by the time anything reaches this module
//! the decision to emit has already been made, so `Events` itself is just a
//! bounded, lossy-on-overflow mailbox.

use async_channel::{Receiver, Sender, TrySendError};

/// One emitted event. The `Info`/`Warning`/`Error` variants back the
/// `info!`/`warn!`/`error!` logging macros; the rest are the library's
/// user-visible notifications (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Info(String),
    Warning(String),
    Error(String),

    /// A chat's message list changed; `msg_id` is 0 if not specific to one
    /// message.
    MsgsChanged { chat_id: u32, msg_id: u32 },

    /// A new, not-yet-noticed message arrived.
    IncomingMsg { chat_id: u32, msg_id: u32 },

    /// A sent message's disposition notification ("read receipt") arrived.
    MsgRead { chat_id: u32, msg_id: u32 },

    /// A chat's metadata (name, membership, ...) changed.
    ChatModified(u32),

    /// The wake-lock counter crossed 0↔1; `true` means "now held".
    WakeLock(bool),
}

/// Bound on the event queue; once full, `emit` drops the oldest event to
/// make room rather than block the pipeline thread.
const EVENT_QUEUE_CAPACITY: usize = 1_000;

/// Owns the sending half of the event channel; shared across threads that
/// touch the store.
#[derive(Debug)]
pub struct Events {
    sender: Sender<EventType>,
    receiver: Receiver<EventType>,
}

impl Default for Events {
    fn default() -> Self {
        let (sender, receiver) = async_channel::bounded(EVENT_QUEUE_CAPACITY);
        Self { sender, receiver }
    }
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `event`, dropping the oldest queued event if the channel is
    /// full rather than blocking the caller.
    pub fn emit(&self, event: EventType) {
        tracing::trace!(?event, "emitting event");
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let _ = self.receiver.try_recv();
                self.emit(event);
            }
            Err(TrySendError::Closed(_)) => {
                unreachable!("events channel closed while its Events handle is alive");
            }
        }
    }

    pub fn get_emitter(&self) -> EventEmitter {
        EventEmitter(self.receiver.clone())
    }
}

/// A cloneable handle a consumer polls for events.
#[derive(Debug, Clone)]
pub struct EventEmitter(Receiver<EventType>);

impl EventEmitter {
    /// Awaits the next event, or `None` once every [`Events`] producing
    /// this stream has been dropped.
    pub async fn recv(&self) -> Option<EventType> {
        self.0.recv().await.ok()
    }

    /// Non-blocking poll, for tests that assert an event was NOT yet
    /// delivered.
    pub fn try_recv(&self) -> Option<EventType> {
        self.0.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_recv() {
        let events = Events::new();
        let emitter = events.get_emitter();
        events.emit(EventType::ChatModified(42));
        assert_eq!(emitter.recv().await, Some(EventType::ChatModified(42)));
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let events = Events::new();
        let emitter = events.get_emitter();
        for i in 0..EVENT_QUEUE_CAPACITY + 5 {
            events.emit(EventType::ChatModified(i as u32));
        }
        // The oldest entries were dropped to make room; the stream should
        // still be internally consistent (monotonic, no panic already
        // proves the overflow path ran without deadlocking).
        let first = emitter.recv().await.unwrap();
        if let EventType::ChatModified(id) = first {
            assert!(id >= 5);
        } else {
            panic!("unexpected event");
        }
    }

    #[tokio::test]
    async fn test_wake_lock_event() {
        let events = Events::new();
        let emitter = events.get_emitter();
        events.emit(EventType::WakeLock(true));
        events.emit(EventType::WakeLock(false));
        assert_eq!(emitter.recv().await, Some(EventType::WakeLock(true)));
        assert_eq!(emitter.recv().await, Some(EventType::WakeLock(false)));
    }
}
