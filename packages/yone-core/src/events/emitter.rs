//! Event emitter abstraction for decoupling the engine from delivery.
//!
//! Engine components depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative sinks.

use super::{SessionEvent, TransportEvent};

/// Trait for emitting engine events without knowledge of delivery.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn do_something(&self) {
///         self.emitter.emit_session(SessionEvent::Created { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a session lifecycle or playback event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a transport connectivity event.
    fn emit_transport(&self, event: TransportEvent);
}

/// No-op emitter for tests and embedders that don't observe events.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}

    fn emit_transport(&self, _event: TransportEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_transport(&self, event: TransportEvent) {
        tracing::debug!(?event, "transport_event");
    }
}
