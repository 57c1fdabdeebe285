//! Bridge implementation that maps engine events to a broadcast channel.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between the engine and
//! observers, mapping typed events onto the channel the status API's event
//! stream subscribes to.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, SessionEvent, TransportEvent};

/// Bridges engine events to a `tokio::sync::broadcast` channel.
///
/// The bridge also forwards to an optional external emitter (for example a
/// [`LoggingEventEmitter`](super::LoggingEventEmitter)) that can be set after
/// construction.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every event before broadcast.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_session, SessionEvent, Session);
    impl_emit!(emit_transport, TransportEvent, Transport);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GuildId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventEmitter for Counter {
        fn emit_session(&self, _event: SessionEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn emit_transport(&self, _event: TransportEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn subscribers_and_external_emitter_both_receive() {
        let bridge = BroadcastEventBridge::new(8);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bridge.set_external_emitter(counter.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_session(SessionEvent::QueueChanged {
            guild_id: GuildId(3),
            length: 1,
            timestamp: 0,
        });

        match rx.recv().await.unwrap() {
            BroadcastEvent::Session(SessionEvent::QueueChanged { length, .. }) => {
                assert_eq!(length, 1)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(4);
        bridge.emit_transport(TransportEvent::Disconnected {
            guild_id: GuildId(1),
            code: None,
            timestamp: 0,
        });
    }
}
