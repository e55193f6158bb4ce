//! Subscription session trait

use std::sync::Arc;

use async_trait::async_trait;

use crate::monitor::{
    ItemResult, MonitoredItem, MonitoringMode, MonitoringParameters, StatusCode, TimestampsToReturn,
};

/// Batched monitored item services of a subscription
///
/// Every returned vector carries one entry per input item, in input order.
/// After a successful create the session routes notifications for each item
/// to [`MonitoredItem::notify_changed`].
#[async_trait]
pub trait SubscriptionSession: Send + Sync {
    /// Register items with the server
    async fn create_monitored_items(
        &self,
        timestamps: TimestampsToReturn,
        items: &[Arc<MonitoredItem>],
    ) -> Result<Vec<ItemResult>, SessionError>;

    /// Apply new sampling parameters to registered items
    async fn modify_monitored_items(
        &self,
        timestamps: TimestampsToReturn,
        items: &[Arc<MonitoredItem>],
        parameters: &MonitoringParameters,
    ) -> Result<Vec<ItemResult>, SessionError>;

    /// Change the monitoring mode of registered items
    async fn set_monitoring_mode(
        &self,
        items: &[Arc<MonitoredItem>],
        mode: MonitoringMode,
    ) -> Result<Vec<StatusCode>, SessionError>;

    /// Remove items from the server
    async fn delete_monitored_items(
        &self,
        items: &[Arc<MonitoredItem>],
    ) -> Result<Vec<StatusCode>, SessionError>;
}

/// Errors reported by a session for a batched request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Service fault: {0}")]
    ServiceFault(StatusCode),

    #[error("Session is closed")]
    Closed,

    #[error("Item {index} rejected by server: {status}")]
    ItemRejected { index: usize, status: StatusCode },

    #[error("Expected {expected} results, got {actual}")]
    ResultCountMismatch { expected: usize, actual: usize },
}

impl SessionError {
    /// Check a batch of per-item statuses, reporting the first rejected item
    pub fn check_batch<I>(expected: usize, statuses: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = StatusCode>,
    {
        let mut actual = 0;
        let mut rejected = None;
        for (index, status) in statuses.into_iter().enumerate() {
            actual += 1;
            if rejected.is_none() && status.is_bad() {
                rejected = Some(SessionError::ItemRejected { index, status });
            }
        }

        if actual != expected {
            return Err(SessionError::ResultCountMismatch { expected, actual });
        }
        match rejected {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
