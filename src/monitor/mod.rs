//! Monitored items and groups of monitored items
//! Batches the server lifecycle of several watched node attributes

pub mod error;
pub mod events;
pub mod group;
pub mod item;
pub mod types;

pub use error::GroupError;
pub use events::{EventHub, EventStream, GroupEvent, ListenerId, TerminationReason};
pub use group::MonitoredItemGroup;
pub use item::{ItemState, MonitoredItem};
pub use types::{
    AttributeId, DataChangeFilter, DataChangeTrigger, DataValue, DeadbandType, Identifier,
    ItemResult, ItemToMonitor, MonitoringMode, MonitoringParameters, NodeId, NodeIdParseError,
    StatusCode, TimestampsToReturn, Variant,
};
