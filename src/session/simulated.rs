//! In-process server simulation implementing [`SubscriptionSession`]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::monitor::item::lock;
use crate::monitor::{
    DataValue, ItemResult, MonitoredItem, MonitoringMode, MonitoringParameters, NodeId, StatusCode,
    TimestampsToReturn, Variant,
};

use super::provider::{SessionError, SubscriptionSession};

/// Behaviour of the simulated server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fastest sampling interval the server grants, in milliseconds
    #[serde(default = "default_min_sampling_interval")]
    pub min_sampling_interval: f64,

    /// Largest queue size the server grants
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u32,

    /// Delay applied to every request, in milliseconds
    #[serde(default)]
    pub latency_ms: u64,

    /// Interval of the background value publisher, in milliseconds
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    /// Seed for generated values
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_min_sampling_interval() -> f64 {
    50.0
}

fn default_max_queue_size() -> u32 {
    100
}

fn default_publish_interval_ms() -> u64 {
    500
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_sampling_interval: default_min_sampling_interval(),
            max_queue_size: default_max_queue_size(),
            latency_ms: 0,
            publish_interval_ms: default_publish_interval_ms(),
            seed: None,
        }
    }
}

/// Batched service of the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Modify,
    SetMode,
    Delete,
}

/// A request as received by the simulated server
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub operation: Operation,
    pub client_handles: Vec<u32>,
    pub timestamps: Option<TimestampsToReturn>,
    pub parameters: Option<MonitoringParameters>,
    pub mode: Option<MonitoringMode>,
}

impl RecordedRequest {
    fn new(operation: Operation, items: &[Arc<MonitoredItem>]) -> Self {
        Self {
            operation,
            client_handles: items.iter().map(|item| item.client_handle()).collect(),
            timestamps: None,
            parameters: None,
            mode: None,
        }
    }
}

struct Registration {
    item: Weak<MonitoredItem>,
    node_id: NodeId,
    timestamps: TimestampsToReturn,
    mode: MonitoringMode,
}

#[derive(Default)]
struct ServerState {
    next_id: u32,
    registrations: HashMap<u32, Registration>,
    requests: Vec<RecordedRequest>,
    faults: HashMap<Operation, VecDeque<StatusCode>>,
    rejected_nodes: HashMap<NodeId, StatusCode>,
    closed: bool,
}

impl ServerState {
    fn registration_mut(&mut self, item: &MonitoredItem) -> Option<&mut Registration> {
        let id = item.monitored_item_id()?;
        self.registrations.get_mut(&id)
    }

    fn take_fault(&mut self, operation: Operation) -> Option<StatusCode> {
        self.faults.get_mut(&operation).and_then(|queue| queue.pop_front())
    }
}

/// Subscription served from memory
///
/// Assigns monitored item ids, revises sampling parameters against
/// [`SimulationConfig`], records every request and pushes values to
/// registered items through [`SimulatedSession::publish`].
pub struct SimulatedSession {
    config: SimulationConfig,
    state: Mutex<ServerState>,
}

impl SimulatedSession {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ServerState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SimulationConfig::default())
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Fail the next request of `operation` with a service fault
    pub fn fail_next(&self, operation: Operation, status: StatusCode) {
        lock(&self.state)
            .faults
            .entry(operation)
            .or_default()
            .push_back(status);
    }

    /// Reject every future registration of `node_id` with `status`
    pub fn reject_node(&self, node_id: NodeId, status: StatusCode) {
        lock(&self.state).rejected_nodes.insert(node_id, status);
    }

    /// Make every further request fail with [`SessionError::Closed`]
    pub fn close(&self) {
        lock(&self.state).closed = true;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn requests_for(&self, operation: Operation) -> Vec<RecordedRequest> {
        lock(&self.state)
            .requests
            .iter()
            .filter(|request| request.operation == operation)
            .cloned()
            .collect()
    }

    pub fn registered_count(&self) -> usize {
        lock(&self.state).registrations.len()
    }

    pub fn monitoring_mode_of(&self, monitored_item_id: u32) -> Option<MonitoringMode> {
        lock(&self.state)
            .registrations
            .get(&monitored_item_id)
            .map(|registration| registration.mode)
    }

    /// Push a value change for a registered item.
    ///
    /// Only items in [`MonitoringMode::Reporting`] are notified. Returns
    /// whether a notification was delivered.
    pub fn publish(&self, monitored_item_id: u32, value: Variant) -> bool {
        let target = {
            let state = lock(&self.state);
            state
                .registrations
                .get(&monitored_item_id)
                .filter(|registration| registration.mode == MonitoringMode::Reporting)
                .and_then(|registration| {
                    registration
                        .item
                        .upgrade()
                        .map(|item| (item, registration.timestamps))
                })
        };

        match target {
            Some((item, timestamps)) => {
                trace!(monitored_item_id, "Publishing value change");
                item.notify_changed(DataValue::new(value).stamped(timestamps, Utc::now()));
                true
            }
            None => false,
        }
    }

    /// Push a value change to every registered item watching `node_id`
    pub fn publish_to_node(&self, node_id: &NodeId, value: Variant) -> usize {
        let ids: Vec<u32> = {
            let state = lock(&self.state);
            let mut ids: Vec<u32> = state
                .registrations
                .iter()
                .filter(|(_, registration)| &registration.node_id == node_id)
                .map(|(id, _)| *id)
                .collect();
            ids.sort_unstable();
            ids
        };

        ids.into_iter()
            .filter(|id| self.publish(*id, value.clone()))
            .count()
    }

    /// Publish a random walk for every reporting item until the task is aborted
    pub fn spawn_publisher(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let interval = Duration::from_millis(self.config.publish_interval_ms.max(1));
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut levels: HashMap<u32, f64> = HashMap::new();
            loop {
                ticker.tick().await;

                let mut ids: Vec<u32> =
                    lock(&session.state).registrations.keys().copied().collect();
                ids.sort_unstable();

                for id in ids {
                    let level = levels.entry(id).or_insert_with(|| rng.gen_range(0.0..100.0));
                    *level += rng.gen_range(-1.0..1.0);
                    session.publish(id, Variant::Double(*level));
                }
            }
        })
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// Record `request` and fail it when the session is closed or a fault is queued
    fn admit(&self, state: &mut ServerState, request: RecordedRequest) -> Result<(), SessionError> {
        let operation = request.operation;
        state.requests.push(request);

        if state.closed {
            return Err(SessionError::Closed);
        }
        if let Some(status) = state.take_fault(operation) {
            debug!(?operation, %status, "Injected service fault");
            return Err(SessionError::ServiceFault(status));
        }
        Ok(())
    }

    fn revise(&self, parameters: &MonitoringParameters) -> (f64, u32) {
        let sampling_interval = parameters.sampling_interval.max(self.config.min_sampling_interval);
        let queue_size = parameters.queue_size.clamp(1, self.config.max_queue_size.max(1));
        (sampling_interval, queue_size)
    }
}

#[async_trait]
impl SubscriptionSession for SimulatedSession {
    async fn create_monitored_items(
        &self,
        timestamps: TimestampsToReturn,
        items: &[Arc<MonitoredItem>],
    ) -> Result<Vec<ItemResult>, SessionError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        let mut request = RecordedRequest::new(Operation::Create, items);
        request.timestamps = Some(timestamps);
        self.admit(&mut state, request)?;

        let results = items
            .iter()
            .map(|item| {
                let node_id = &item.target().node_id;
                if let Some(status) = state.rejected_nodes.get(node_id) {
                    return ItemResult::bad(*status);
                }

                let id = state.next_id;
                state.next_id += 1;
                state.registrations.insert(
                    id,
                    Registration {
                        item: Arc::downgrade(item),
                        node_id: node_id.clone(),
                        timestamps,
                        mode: MonitoringMode::Reporting,
                    },
                );

                let (revised_sampling_interval, revised_queue_size) =
                    self.revise(&item.parameters());
                ItemResult {
                    status: StatusCode::GOOD,
                    monitored_item_id: id,
                    revised_sampling_interval,
                    revised_queue_size,
                }
            })
            .collect();

        Ok(results)
    }

    async fn modify_monitored_items(
        &self,
        timestamps: TimestampsToReturn,
        items: &[Arc<MonitoredItem>],
        parameters: &MonitoringParameters,
    ) -> Result<Vec<ItemResult>, SessionError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        let mut request = RecordedRequest::new(Operation::Modify, items);
        request.timestamps = Some(timestamps);
        request.parameters = Some(parameters.clone());
        self.admit(&mut state, request)?;

        let (revised_sampling_interval, revised_queue_size) = self.revise(parameters);
        let results = items
            .iter()
            .map(|item| {
                match state.registration_mut(item) {
                    Some(registration) => {
                        registration.timestamps = timestamps;
                        ItemResult {
                            status: StatusCode::GOOD,
                            monitored_item_id: 0,
                            revised_sampling_interval,
                            revised_queue_size,
                        }
                    }
                    None => ItemResult::bad(StatusCode::BAD_MONITORED_ITEM_ID_INVALID),
                }
            })
            .collect();

        Ok(results)
    }

    async fn set_monitoring_mode(
        &self,
        items: &[Arc<MonitoredItem>],
        mode: MonitoringMode,
    ) -> Result<Vec<StatusCode>, SessionError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        let mut request = RecordedRequest::new(Operation::SetMode, items);
        request.mode = Some(mode);
        self.admit(&mut state, request)?;

        let statuses = items
            .iter()
            .map(|item| {
                match state.registration_mut(item) {
                    Some(registration) => {
                        registration.mode = mode;
                        StatusCode::GOOD
                    }
                    None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                }
            })
            .collect();

        Ok(statuses)
    }

    async fn delete_monitored_items(
        &self,
        items: &[Arc<MonitoredItem>],
    ) -> Result<Vec<StatusCode>, SessionError> {
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        self.admit(&mut state, RecordedRequest::new(Operation::Delete, items))?;

        let statuses = items
            .iter()
            .map(|item| {
                let removed = item
                    .monitored_item_id()
                    .and_then(|id| state.registrations.remove(&id));
                match removed {
                    Some(_) => StatusCode::GOOD,
                    None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                }
            })
            .collect();

        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ItemToMonitor;

    fn items(names: &[&str]) -> Vec<Arc<MonitoredItem>> {
        names
            .iter()
            .map(|name| {
                Arc::new(MonitoredItem::new(
                    ItemToMonitor::value(NodeId::string(1, *name)),
                    MonitoringParameters::default()
                        .with_sampling_interval(10.0)
                        .with_queue_size(500),
                ))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_revises_parameters() {
        let session = SimulatedSession::with_defaults();
        let items = items(&["A", "B"]);

        let results = session
            .create_monitored_items(TimestampsToReturn::Both, &items)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_ne!(results[0].monitored_item_id, results[1].monitored_item_id);
        assert_eq!(results[0].revised_sampling_interval, 50.0);
        assert_eq!(results[0].revised_queue_size, 100);
        assert_eq!(session.registered_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed_once() {
        let session = SimulatedSession::with_defaults();
        let items = items(&["A"]);
        session.fail_next(Operation::Create, StatusCode::BAD_TIMEOUT);

        let first = session.create_monitored_items(TimestampsToReturn::Neither, &items).await;
        assert_eq!(first, Err(SessionError::ServiceFault(StatusCode::BAD_TIMEOUT)));

        let second = session.create_monitored_items(TimestampsToReturn::Neither, &items).await;
        assert!(second.is_ok());
        assert_eq!(session.requests_for(Operation::Create).len(), 2);
    }

    #[tokio::test]
    async fn test_publish_respects_monitoring_mode() {
        let session = SimulatedSession::with_defaults();
        let items = items(&["A"]);
        let results = session
            .create_monitored_items(TimestampsToReturn::Neither, &items)
            .await
            .unwrap();
        items[0].apply_create_result(&results[0]);
        let id = results[0].monitored_item_id;

        assert!(session.publish(id, Variant::Int32(1)));

        session
            .set_monitoring_mode(&items, MonitoringMode::Sampling)
            .await
            .unwrap();
        assert_eq!(session.monitoring_mode_of(id), Some(MonitoringMode::Sampling));
        assert!(!session.publish(id, Variant::Int32(2)));
        assert_eq!(items[0].last_value().unwrap().value, Variant::Int32(1));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_requests() {
        let session = SimulatedSession::with_defaults();
        session.close();

        let result = session.delete_monitored_items(&items(&["A"])).await;
        assert_eq!(result, Err(SessionError::Closed));
    }
}
