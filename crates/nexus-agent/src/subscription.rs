use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{decode_stream_event, AgentStreamEvent, NexusAgentError};

pub type StreamEventHandler = Arc<dyn Fn(AgentStreamEvent) + Send + Sync>;
pub type StreamErrorHandler = Arc<dyn Fn(NexusAgentError) + Send + Sync>;

#[derive(Clone)]
/// Callbacks a transport delivers into.
pub struct StreamHandlers {
    pub on_event: StreamEventHandler,
    pub on_error: StreamErrorHandler,
}

impl StreamHandlers {
    pub fn new<E, R>(on_event: E, on_error: R) -> Self
    where
        E: Fn(AgentStreamEvent) + Send + Sync + 'static,
        R: Fn(NexusAgentError) + Send + Sync + 'static,
    {
        Self {
            on_event: Arc::new(on_event),
            on_error: Arc::new(on_error),
        }
    }
}

impl std::fmt::Debug for StreamHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandlers").finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
/// Delivery side of a subscription.
///
/// Every callback passes through the gate, which drops it once the paired
/// [`StreamSubscription`] has been closed, even when the underlying transport
/// reports late.
///
/// Suppression is best-effort across threads: a delivery that passed the
/// closed check before `close` ran on another thread still reaches its
/// handler, so handlers must tolerate one in-flight callback. Deliveries that
/// start after `close` returns are always dropped. Handlers may close their
/// own subscription; dispatch holds no lock.
pub struct StreamGate {
    closed: Arc<AtomicBool>,
    handlers: StreamHandlers,
}

impl StreamGate {
    pub fn new(handlers: StreamHandlers) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            handlers,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn deliver_event(&self, event: AgentStreamEvent) -> bool {
        if self.is_closed() {
            return false;
        }
        (self.handlers.on_event)(event);
        true
    }

    pub fn deliver_error(&self, error: NexusAgentError) -> bool {
        if self.is_closed() {
            return false;
        }
        (self.handlers.on_error)(error);
        true
    }

    /// Decodes one record payload and delivers it. A malformed record is
    /// reported through `on_error` without stopping the stream.
    pub fn deliver_payload(&self, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        match decode_stream_event(raw) {
            Ok(Some(event)) => {
                self.deliver_event(event);
            }
            Ok(None) => {}
            Err(error) => {
                self.deliver_error(error);
            }
        }
    }

    /// Pairs this gate with a close handle; `release` runs at most once.
    pub fn subscription<F>(&self, release: F) -> StreamSubscription
    where
        F: FnOnce() + Send + 'static,
    {
        StreamSubscription {
            closed: self.closed.clone(),
            release: Mutex::new(Some(Box::new(release))),
        }
    }
}

/// Close handle returned by [`crate::StreamTransport::open`].
///
/// `close` is idempotent: the first call silences the gate and releases the
/// transport resources, later calls do nothing. Dropping the handle closes it.
pub struct StreamSubscription {
    closed: Arc<AtomicBool>,
    release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl StreamSubscription {
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let release = match self.release.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(release) = release {
            release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSubscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{StreamGate, StreamHandlers, StreamSubscription};
    use crate::{AgentStreamEvent, NexusAgentError};

    fn counting_gate() -> (StreamGate, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let events = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let event_sink = events.clone();
        let error_sink = errors.clone();
        let gate = StreamGate::new(StreamHandlers::new(
            move |_| {
                event_sink.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                error_sink.fetch_add(1, Ordering::SeqCst);
            },
        ));
        (gate, events, errors)
    }

    #[test]
    fn unit_close_is_idempotent_and_releases_once() {
        let (gate, _, _) = counting_gate();
        let releases = Arc::new(AtomicUsize::new(0));
        let release_count = releases.clone();
        let subscription = gate.subscription(move || {
            release_count.fetch_add(1, Ordering::SeqCst);
        });

        subscription.close();
        subscription.close();
        drop(subscription);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(gate.is_closed());
    }

    #[test]
    fn functional_late_callbacks_after_close_are_suppressed() {
        let (gate, events, errors) = counting_gate();
        let subscription = gate.subscription(|| {});

        gate.deliver_payload(r#"{"type":"complete","result":{"runId":"r1"}}"#);
        assert_eq!(events.load(Ordering::SeqCst), 1);

        subscription.close();
        gate.deliver_payload(r#"{"type":"step","node":"late"}"#);
        assert!(!gate.deliver_error(NexusAgentError::StreamDisconnected));

        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn regression_handler_closing_its_own_subscription_silences_later_deliveries() {
        let events = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<StreamSubscription>>> = Arc::new(Mutex::new(None));
        let event_sink = events.clone();
        let closer = slot.clone();
        let gate = StreamGate::new(StreamHandlers::new(
            move |_| {
                event_sink.fetch_add(1, Ordering::SeqCst);
                let subscription = closer.lock().expect("lock").take();
                if let Some(subscription) = subscription {
                    subscription.close();
                }
            },
            |_| {},
        ));
        *slot.lock().expect("lock") = Some(gate.subscription(|| {}));

        assert!(gate.deliver_event(AgentStreamEvent::Heartbeat));
        assert!(gate.is_closed());
        assert!(!gate.deliver_event(AgentStreamEvent::Heartbeat));
        gate.deliver_payload(r#"{"type":"step","node":"late"}"#);

        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn functional_malformed_payload_reports_error_and_keeps_going() {
        let (gate, events, errors) = counting_gate();
        let _subscription = gate.subscription(|| {});

        gate.deliver_payload("{broken");
        gate.deliver_payload(r#"{"type":"heartbeat"}"#);

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }
}
