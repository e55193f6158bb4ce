//! Client-side record of one monitored item

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

use super::types::{DataValue, ItemResult, ItemToMonitor, MonitoringParameters, StatusCode};

static NEXT_CLIENT_HANDLE: AtomicU32 = AtomicU32::new(1);

type ChangeListener = Arc<dyn Fn(&DataValue) + Send + Sync>;

/// Server-facing state of a monitored item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemState {
    /// Parameters last requested for this item
    pub parameters: MonitoringParameters,
    /// Identifier assigned by the server once registered
    pub monitored_item_id: Option<u32>,
    /// Status of the last create/modify/delete for this item
    pub status: StatusCode,
    pub revised_sampling_interval: Option<f64>,
    pub revised_queue_size: Option<u32>,
    /// Last value pushed by the server
    pub last_value: Option<DataValue>,
}

/// One watched node attribute
///
/// The session routes notifications to the item through [`MonitoredItem::notify_changed`],
/// which relays them to every listener installed with [`MonitoredItem::on_changed`].
pub struct MonitoredItem {
    target: ItemToMonitor,
    client_handle: u32,
    state: Mutex<ItemState>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl MonitoredItem {
    pub fn new(target: ItemToMonitor, parameters: MonitoringParameters) -> Self {
        Self {
            target,
            client_handle: NEXT_CLIENT_HANDLE.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(ItemState {
                parameters,
                monitored_item_id: None,
                status: StatusCode::GOOD,
                revised_sampling_interval: None,
                revised_queue_size: None,
                last_value: None,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> &ItemToMonitor {
        &self.target
    }

    /// Process-unique handle the session uses to route notifications
    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    pub fn parameters(&self) -> MonitoringParameters {
        self.lock_state().parameters.clone()
    }

    pub fn monitored_item_id(&self) -> Option<u32> {
        self.lock_state().monitored_item_id
    }

    pub fn status(&self) -> StatusCode {
        self.lock_state().status
    }

    pub fn last_value(&self) -> Option<DataValue> {
        self.lock_state().last_value.clone()
    }

    pub fn snapshot(&self) -> ItemState {
        self.lock_state().clone()
    }

    /// Install a listener for value changes of this item
    pub fn on_changed<F>(&self, listener: F)
    where
        F: Fn(&DataValue) + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Arc::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Record a value pushed by the server and relay it to the listeners
    pub fn notify_changed(&self, value: DataValue) {
        self.lock_state().last_value = Some(value.clone());

        let listeners: Vec<ChangeListener> = lock(&self.listeners).clone();
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&value))).is_err() {
                error!(
                    client_handle = self.client_handle,
                    node_id = %self.target.node_id,
                    "Change listener panicked"
                );
            }
        }
    }

    pub(crate) fn apply_create_result(&self, result: &ItemResult) {
        let mut state = self.lock_state();
        state.status = result.status;
        if result.status.is_good() {
            state.monitored_item_id = Some(result.monitored_item_id);
            state.revised_sampling_interval = Some(result.revised_sampling_interval);
            state.revised_queue_size = Some(result.revised_queue_size);
        }
    }

    pub(crate) fn apply_modify_result(
        &self,
        result: &ItemResult,
        parameters: &MonitoringParameters,
    ) {
        let mut state = self.lock_state();
        state.status = result.status;
        if result.status.is_good() {
            state.parameters = parameters.clone();
            state.revised_sampling_interval = Some(result.revised_sampling_interval);
            state.revised_queue_size = Some(result.revised_queue_size);
        }
    }

    pub(crate) fn mark_deleted(&self) {
        let mut state = self.lock_state();
        state.monitored_item_id = None;
        state.revised_sampling_interval = None;
        state.revised_queue_size = None;
    }

    fn lock_state(&self) -> MutexGuard<'_, ItemState> {
        lock(&self.state)
    }
}

impl fmt::Debug for MonitoredItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItem")
            .field("target", &self.target)
            .field("client_handle", &self.client_handle)
            .field("state", &*self.lock_state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::monitor::types::{NodeId, Variant};

    fn item() -> MonitoredItem {
        MonitoredItem::new(
            ItemToMonitor::value(NodeId::string(2, "Pump.Speed")),
            MonitoringParameters::default(),
        )
    }

    #[test]
    fn test_client_handles_are_unique() {
        let a = item();
        let b = item();
        assert_ne!(a.client_handle(), b.client_handle());
    }

    #[test]
    fn test_notify_caches_last_value() {
        let item = item();
        assert!(item.last_value().is_none());

        item.notify_changed(DataValue::new(Variant::Double(42.0)));
        assert_eq!(item.last_value().unwrap().value, Variant::Double(42.0));
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let item = item();
        let hits = Arc::new(AtomicUsize::new(0));

        item.on_changed(|_| panic!("listener fault"));
        let counter = Arc::clone(&hits);
        item.on_changed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        item.notify_changed(DataValue::new(Variant::Int32(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_results() {
        let item = item();
        item.apply_create_result(&ItemResult {
            status: StatusCode::GOOD,
            monitored_item_id: 7,
            revised_sampling_interval: 250.0,
            revised_queue_size: 4,
        });
        assert_eq!(item.monitored_item_id(), Some(7));
        assert_eq!(item.snapshot().revised_queue_size, Some(4));

        let params = MonitoringParameters::default().with_sampling_interval(10.0);
        item.apply_modify_result(&ItemResult::bad(StatusCode::BAD_TIMEOUT), &params);
        assert_eq!(item.status(), StatusCode::BAD_TIMEOUT);
        assert_eq!(item.parameters().sampling_interval, 1000.0);

        item.mark_deleted();
        assert_eq!(item.monitored_item_id(), None);
    }
}
