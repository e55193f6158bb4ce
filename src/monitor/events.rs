//! Group events and their fan-out to listeners

use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, UnboundedReceiver};
use futures::{Stream, StreamExt};
use tracing::error;
use uuid::Uuid;

use super::item::{lock, MonitoredItem};
use super::types::DataValue;

/// Why a group emitted [`GroupEvent::Terminated`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The server rejected the batched registration
    RegistrationFailed,
    /// `terminate()` was called
    Requested,
}

/// Lifecycle transitions and per-member value changes of a group
#[derive(Debug, Clone)]
pub enum GroupEvent {
    /// Registration succeeded
    Initialized,

    /// The group was terminated or failed to register
    Terminated { reason: TerminationReason },

    /// The member at `index` received a new value from the server
    Changed {
        index: usize,
        item: Arc<MonitoredItem>,
        value: DataValue,
    },
}

impl GroupEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GroupEvent::Initialized => "initialized",
            GroupEvent::Terminated { .. } => "terminated",
            GroupEvent::Changed { .. } => "changed",
        }
    }
}

/// Handle returned when registering a listener
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&GroupEvent) -> anyhow::Result<()> + Send + Sync>;

/// Synchronous in-process fan-out of [`GroupEvent`]s
///
/// Every listener runs inside its own error boundary: a listener returning an
/// error or panicking is logged and the remaining listeners still receive the
/// event.
pub struct EventHub {
    group_id: Uuid,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl EventHub {
    pub fn new(group_id: Uuid) -> Self {
        Self {
            group_id,
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GroupEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Deliver `event` to every listener registered at call time.
    ///
    /// Returns the number of listeners that faulted.
    pub fn dispatch(&self, event: &GroupEvent) -> usize {
        let listeners: Vec<(ListenerId, Listener)> = lock(&self.listeners).clone();

        let mut faults = 0;
        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    faults += 1;
                    error!(
                        group = %self.group_id,
                        listener = id,
                        event = event.name(),
                        "Group listener failed: {:#}",
                        e
                    );
                }
                Err(payload) => {
                    faults += 1;
                    error!(
                        group = %self.group_id,
                        listener = id,
                        event = event.name(),
                        "Group listener panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        faults
    }

    /// Register a listener that forwards every event into a [`Stream`]
    pub fn stream(self: &Arc<Self>) -> EventStream {
        let (tx, rx) = mpsc::unbounded();
        let id = self.subscribe(move |event| {
            // A dropped receiver unsubscribes itself, nothing to report here.
            let _ = tx.unbounded_send(event.clone());
            Ok(())
        });

        EventStream {
            rx,
            hub: Arc::downgrade(self),
            id,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Stream of group events, unsubscribed from the group when dropped
pub struct EventStream {
    rx: UnboundedReceiver<GroupEvent>,
    hub: Weak<EventHub>,
    id: ListenerId,
}

impl Stream for EventStream {
    type Item = GroupEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_faulting_listeners_are_isolated() {
        let hub = EventHub::new(Uuid::new_v4());
        let delivered = Arc::new(AtomicUsize::new(0));

        hub.subscribe(|_| anyhow::bail!("listener rejected event"));
        hub.subscribe(|_| panic!("listener blew up"));
        let counter = Arc::clone(&delivered);
        hub.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let faults = hub.dispatch(&GroupEvent::Initialized);
        assert_eq!(faults, 2);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        // The dispatcher keeps working after faults
        hub.dispatch(&GroupEvent::Initialized);
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = EventHub::new(Uuid::new_v4());
        let id = hub.subscribe(|_| Ok(()));
        assert_eq!(hub.listener_count(), 1);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_receives_events_and_unsubscribes_on_drop() {
        let hub = Arc::new(EventHub::new(Uuid::new_v4()));
        let mut stream = hub.stream();
        assert_eq!(hub.listener_count(), 1);

        hub.dispatch(&GroupEvent::Terminated {
            reason: TerminationReason::Requested,
        });
        match stream.next().await {
            Some(GroupEvent::Terminated { reason }) => {
                assert_eq!(reason, TerminationReason::Requested)
            }
            other => panic!("unexpected event: {:?}", other),
        }

        drop(stream);
        assert_eq!(hub.listener_count(), 0);
    }
}
