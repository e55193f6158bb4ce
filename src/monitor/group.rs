//! Batched lifecycle of a group of monitored items

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::{SessionError, SubscriptionSession};

use super::error::GroupError;
use super::events::{EventHub, EventStream, GroupEvent, ListenerId, TerminationReason};
use super::item::{lock, MonitoredItem};
use super::types::{
    ItemResult, ItemToMonitor, MonitoringMode, MonitoringParameters, TimestampsToReturn,
};

#[derive(Debug, Clone, Copy)]
struct GroupSettings {
    timestamps: TimestampsToReturn,
    mode: MonitoringMode,
}

/// A fixed, ordered set of monitored items sharing one lifecycle
///
/// Members are created 1:1 from the targets passed to [`MonitoredItemGroup::new`];
/// the position of a member is the `index` carried by its
/// [`GroupEvent::Changed`] events for the whole life of the group.
///
/// Operations against the server are serialized per group: a `modify` issued
/// while `monitor` is still pending waits for the registration to finish.
///
/// Change events are relayed only between a successful `monitor` and the next
/// `terminate`.
pub struct MonitoredItemGroup {
    id: Uuid,
    session: Arc<dyn SubscriptionSession>,
    items: Vec<Arc<MonitoredItem>>,
    settings: Mutex<GroupSettings>,
    hub: Arc<EventHub>,
    operation: tokio::sync::Mutex<()>,
    listeners_installed: Once,
    registered: AtomicBool,
    relaying: Arc<AtomicBool>,
}

impl MonitoredItemGroup {
    /// Build one member per target, in order, all sharing `parameters`.
    ///
    /// The group starts in [`MonitoringMode::Reporting`]; `timestamps` defaults
    /// to [`TimestampsToReturn::Neither`]. Nothing is sent to the server.
    pub fn new(
        session: Arc<dyn SubscriptionSession>,
        targets: Vec<ItemToMonitor>,
        parameters: MonitoringParameters,
        timestamps: Option<TimestampsToReturn>,
    ) -> Result<Self, GroupError> {
        if targets.is_empty() {
            return Err(GroupError::InvalidArgument(
                "a monitored item group needs at least one item to monitor".to_string(),
            ));
        }

        let items = targets
            .into_iter()
            .map(|target| Arc::new(MonitoredItem::new(target, parameters.clone())))
            .collect();

        let id = Uuid::new_v4();
        Ok(Self {
            id,
            session,
            items,
            settings: Mutex::new(GroupSettings {
                timestamps: timestamps.unwrap_or_default(),
                mode: MonitoringMode::Reporting,
            }),
            hub: Arc::new(EventHub::new(id)),
            operation: tokio::sync::Mutex::new(()),
            listeners_installed: Once::new(),
            registered: AtomicBool::new(false),
            relaying: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn items(&self) -> &[Arc<MonitoredItem>] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&Arc<MonitoredItem>> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn timestamps(&self) -> TimestampsToReturn {
        lock(&self.settings).timestamps
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        lock(&self.settings).mode
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Register a listener for lifecycle and change events
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GroupEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hub.subscribe(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.hub.unsubscribe(id)
    }

    /// Stream of every event emitted from now on
    pub fn events(&self) -> EventStream {
        self.hub.stream()
    }

    /// Register every member with the server in one batch.
    ///
    /// Emits [`GroupEvent::Initialized`] on success. On failure emits
    /// [`GroupEvent::Terminated`] with [`TerminationReason::RegistrationFailed`]
    /// and leaves the group unregistered; nothing is cleaned up on the server.
    /// Members the server accepted in a rejected batch keep their server ids,
    /// so a later [`MonitoredItemGroup::terminate`] removes them.
    pub async fn monitor(&self) -> Result<(), GroupError> {
        let _guard = self.operation.lock().await;

        if self.is_registered() {
            return Err(GroupError::AlreadyRegistered);
        }

        self.listeners_installed.call_once(|| self.install_change_listeners());

        let timestamps = self.timestamps();
        debug!(group = %self.id, items = self.items.len(), %timestamps, "Creating monitored items");

        let outcome = self
            .session
            .create_monitored_items(timestamps, &self.items)
            .await
            .and_then(|results| {
                for (item, result) in self.items.iter().zip(&results) {
                    item.apply_create_result(result);
                }
                check_results(self.items.len(), &results)
            });

        match outcome {
            Ok(()) => {
                self.registered.store(true, Ordering::SeqCst);
                self.relaying.store(true, Ordering::SeqCst);
                info!(
                    group = %self.id,
                    items = self.items.len(),
                    "Monitored item group initialized"
                );
                self.hub.dispatch(&GroupEvent::Initialized);
                Ok(())
            }
            Err(e) => {
                warn!(group = %self.id, "Monitored item group registration failed: {}", e);
                self.hub.dispatch(&GroupEvent::Terminated {
                    reason: TerminationReason::RegistrationFailed,
                });
                Err(GroupError::RegistrationFailed(e))
            }
        }
    }

    /// Apply `parameters` to every member.
    ///
    /// When `timestamps` is given it replaces the stored value before the
    /// request is sent; otherwise the stored value is reused.
    pub async fn modify(
        &self,
        parameters: MonitoringParameters,
        timestamps: Option<TimestampsToReturn>,
    ) -> Result<(), GroupError> {
        let _guard = self.operation.lock().await;

        let timestamps = {
            let mut settings = lock(&self.settings);
            if let Some(timestamps) = timestamps {
                settings.timestamps = timestamps;
            }
            settings.timestamps
        };

        debug!(
            group = %self.id,
            sampling_interval = parameters.sampling_interval,
            queue_size = parameters.queue_size,
            %timestamps,
            "Modifying monitored items"
        );

        let results = self
            .session
            .modify_monitored_items(timestamps, &self.items, &parameters)
            .await
            .map_err(GroupError::ModifyFailed)?;

        // Revised values are recorded for every member the server reported on,
        // even when the batch as a whole is rejected.
        for (item, result) in self.items.iter().zip(&results) {
            item.apply_modify_result(result, &parameters);
        }
        check_results(self.items.len(), &results).map_err(GroupError::ModifyFailed)?;

        info!(group = %self.id, "Monitored item group modified");
        Ok(())
    }

    /// Switch every member to `mode`; the stored mode follows on success
    pub async fn set_monitoring_mode(&self, mode: MonitoringMode) -> Result<(), GroupError> {
        let _guard = self.operation.lock().await;

        debug!(group = %self.id, %mode, "Setting monitoring mode");

        let statuses = self
            .session
            .set_monitoring_mode(&self.items, mode)
            .await
            .map_err(GroupError::ModeChangeFailed)?;
        SessionError::check_batch(self.items.len(), statuses)
            .map_err(GroupError::ModeChangeFailed)?;

        lock(&self.settings).mode = mode;
        info!(group = %self.id, %mode, "Monitoring mode changed");
        Ok(())
    }

    /// Remove every member from the server.
    ///
    /// [`GroupEvent::Terminated`] is emitted before the deletion request is
    /// sent, and before waiting for a pending `monitor`: listeners of a group
    /// terminated mid-registration see `Terminated` followed by `Initialized`.
    /// The members stay in place, so calling this again sends another
    /// deletion request.
    pub async fn terminate(&self) -> Result<(), GroupError> {
        self.relaying.store(false, Ordering::SeqCst);
        self.hub.dispatch(&GroupEvent::Terminated {
            reason: TerminationReason::Requested,
        });

        let _guard = self.operation.lock().await;
        // A registration that finished while we waited turned relaying back on
        self.relaying.store(false, Ordering::SeqCst);

        debug!(group = %self.id, items = self.items.len(), "Deleting monitored items");

        let statuses = self
            .session
            .delete_monitored_items(&self.items)
            .await
            .map_err(GroupError::DeletionFailed)?;

        for (item, status) in self.items.iter().zip(&statuses) {
            if status.is_good() {
                item.mark_deleted();
            }
        }
        SessionError::check_batch(self.items.len(), statuses)
            .map_err(GroupError::DeletionFailed)?;

        info!(group = %self.id, "Monitored item group terminated");
        Ok(())
    }

    fn install_change_listeners(&self) {
        for (index, item) in self.items.iter().enumerate() {
            let hub = Arc::clone(&self.hub);
            let relaying = Arc::clone(&self.relaying);
            let member = Arc::downgrade(item);
            item.on_changed(move |value| {
                if !relaying.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(member) = member.upgrade() {
                    hub.dispatch(&GroupEvent::Changed {
                        index,
                        item: member,
                        value: value.clone(),
                    });
                }
            });
        }
    }
}

fn check_results(expected: usize, results: &[ItemResult]) -> Result<(), SessionError> {
    SessionError::check_batch(expected, results.iter().map(|r| r.status))
}

impl fmt::Display for MonitoredItemGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settings = *lock(&self.settings);
        let targets: Vec<String> = self
            .items
            .iter()
            .map(|item| item.target().to_string())
            .collect();

        writeln!(f, "ClientMonitoredItemGroup : ")?;
        writeln!(f, "itemsToMonitor:       = [\n {}\n];", targets.join("\n"))?;
        writeln!(f, "timestampsToReturn:   {}", settings.timestamps)?;
        write!(f, "monitoringMode        {}", settings.mode)
    }
}

impl fmt::Debug for MonitoredItemGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItemGroup")
            .field("id", &self.id)
            .field("items", &self.items)
            .field("settings", &*lock(&self.settings))
            .field("registered", &self.is_registered())
            .finish()
    }
}
