//! Value types shared by monitored items, groups and sessions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier part of a [`NodeId`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
}

/// Address of a node in the server address space
///
/// Textual form is `ns=<namespace>;i=<number>` or `ns=<namespace>;s=<name>`.
/// The namespace prefix is omitted for namespace 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(id) => write!(f, "i={}", id),
            Identifier::String(id) => write!(f, "s={}", id),
        }
    }
}

/// Errors produced when parsing a textual [`NodeId`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdParseError {
    #[error("Invalid namespace in node id: {0}")]
    InvalidNamespace(String),

    #[error("Invalid numeric identifier in node id: {0}")]
    InvalidNumeric(String),

    #[error("Unsupported node id format: {0}")]
    UnsupportedFormat(String),
}

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or_else(|| NodeIdParseError::UnsupportedFormat(s.to_string()))?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|_| NodeIdParseError::InvalidNamespace(s.to_string()))?;
                (ns, rest)
            }
            None => (0, s),
        };

        if let Some(id) = rest.strip_prefix("i=") {
            let id = id
                .parse::<u32>()
                .map_err(|_| NodeIdParseError::InvalidNumeric(s.to_string()))?;
            return Ok(NodeId::numeric(namespace, id));
        }

        if let Some(id) = rest.strip_prefix("s=") {
            if id.is_empty() {
                return Err(NodeIdParseError::UnsupportedFormat(s.to_string()));
            }
            return Ok(NodeId::string(namespace, id));
        }

        Err(NodeIdParseError::UnsupportedFormat(s.to_string()))
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.to_string()
    }
}

/// Node attribute that a monitored item watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    NodeId,
    NodeClass,
    BrowseName,
    DisplayName,
    Description,
    EventNotifier,
    #[default]
    Value,
    DataType,
    ValueRank,
    AccessLevel,
    MinimumSamplingInterval,
}

impl AttributeId {
    /// Numeric attribute id as used on the wire
    pub fn as_u32(&self) -> u32 {
        match self {
            AttributeId::NodeId => 1,
            AttributeId::NodeClass => 2,
            AttributeId::BrowseName => 3,
            AttributeId::DisplayName => 4,
            AttributeId::Description => 5,
            AttributeId::EventNotifier => 12,
            AttributeId::Value => 13,
            AttributeId::DataType => 14,
            AttributeId::ValueRank => 15,
            AttributeId::AccessLevel => 17,
            AttributeId::MinimumSamplingInterval => 19,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeId::NodeId => "NodeId",
            AttributeId::NodeClass => "NodeClass",
            AttributeId::BrowseName => "BrowseName",
            AttributeId::DisplayName => "DisplayName",
            AttributeId::Description => "Description",
            AttributeId::EventNotifier => "EventNotifier",
            AttributeId::Value => "Value",
            AttributeId::DataType => "DataType",
            AttributeId::ValueRank => "ValueRank",
            AttributeId::AccessLevel => "AccessLevel",
            AttributeId::MinimumSamplingInterval => "MinimumSamplingInterval",
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.as_u32())
    }
}

/// Identity of one watched point: a node and one of its attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemToMonitor {
    pub node_id: NodeId,
    #[serde(default)]
    pub attribute_id: AttributeId,
}

impl ItemToMonitor {
    pub fn new(node_id: NodeId, attribute_id: AttributeId) -> Self {
        Self {
            node_id,
            attribute_id,
        }
    }

    /// Watch the Value attribute of a node
    pub fn value(node_id: NodeId) -> Self {
        Self::new(node_id, AttributeId::Value)
    }
}

impl fmt::Display for ItemToMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ nodeId: {}, attributeId: {} }}",
            self.node_id, self.attribute_id
        )
    }
}

/// Which timestamps the server attaches to reported values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampsToReturn {
    Source,
    Server,
    Both,
    #[default]
    Neither,
}

impl TimestampsToReturn {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampsToReturn::Source => "Source",
            TimestampsToReturn::Server => "Server",
            TimestampsToReturn::Both => "Both",
            TimestampsToReturn::Neither => "Neither",
        }
    }

    pub fn includes_source(&self) -> bool {
        matches!(self, TimestampsToReturn::Source | TimestampsToReturn::Both)
    }

    pub fn includes_server(&self) -> bool {
        matches!(self, TimestampsToReturn::Server | TimestampsToReturn::Both)
    }
}

impl fmt::Display for TimestampsToReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a registered item is disabled, sampled, or reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    Disabled,
    Sampling,
    #[default]
    Reporting,
}

impl MonitoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringMode::Disabled => "Disabled",
            MonitoringMode::Sampling => "Sampling",
            MonitoringMode::Reporting => "Reporting",
        }
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "disabled" => Ok(MonitoringMode::Disabled),
            "sampling" => Ok(MonitoringMode::Sampling),
            "reporting" => Ok(MonitoringMode::Reporting),
            _ => anyhow::bail!("Unknown monitoring mode: {}", s),
        }
    }
}

impl fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition under which a data change is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChangeTrigger {
    Status,
    #[default]
    StatusValue,
    StatusValueTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadbandType {
    #[default]
    None,
    Absolute,
    Percent,
}

/// Data change filter attached to monitoring parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataChangeFilter {
    #[serde(default)]
    pub trigger: DataChangeTrigger,
    #[serde(default)]
    pub deadband_type: DeadbandType,
    #[serde(default)]
    pub deadband_value: f64,
}

/// Sampling parameters shared by every member of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringParameters {
    /// Requested sampling interval in milliseconds
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: f64,
    #[serde(default)]
    pub filter: Option<DataChangeFilter>,
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,
    #[serde(default = "default_discard_oldest")]
    pub discard_oldest: bool,
}

fn default_sampling_interval() -> f64 {
    1000.0
}

fn default_queue_size() -> u32 {
    1
}

fn default_discard_oldest() -> bool {
    true
}

impl Default for MonitoringParameters {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            filter: None,
            queue_size: default_queue_size(),
            discard_oldest: default_discard_oldest(),
        }
    }
}

impl MonitoringParameters {
    pub fn with_sampling_interval(mut self, sampling_interval: f64) -> Self {
        self.sampling_interval = sampling_interval;
        self
    }

    pub fn with_queue_size(mut self, queue_size: u32) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_filter(mut self, filter: DataChangeFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// OPC UA status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0);
    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x8028_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    pub const BAD_MONITORING_MODE_INVALID: StatusCode = StatusCode(0x8041_0000);
    pub const BAD_MONITORED_ITEM_ID_INVALID: StatusCode = StatusCode(0x8042_0000);

    const SEVERITY_MASK: u32 = 0xC000_0000;
    const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;

    pub fn is_good(&self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0
    }

    pub fn is_uncertain(&self) -> bool {
        self.0 & Self::SEVERITY_MASK == Self::SEVERITY_UNCERTAIN
    }

    pub fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            StatusCode::GOOD => "Good",
            StatusCode::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            StatusCode::BAD_INTERNAL_ERROR => "BadInternalError",
            StatusCode::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            StatusCode::BAD_TIMEOUT => "BadTimeout",
            StatusCode::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            StatusCode::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            StatusCode::BAD_ATTRIBUTE_ID_INVALID => "BadAttributeIdInvalid",
            StatusCode::BAD_MONITORING_MODE_INVALID => "BadMonitoringModeInvalid",
            StatusCode::BAD_MONITORED_ITEM_ID_INVALID => "BadMonitoredItemIdInvalid",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// Scalar value carried by a [`DataValue`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    Double(f64),
    String(String),
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => f.write_str("<empty>"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{:?}", v),
        }
    }
}

/// A reported value with its status and optional timestamps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    pub fn new(value: Variant) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    /// Stamp the value with the timestamps requested by `timestamps`
    pub fn stamped(mut self, timestamps: TimestampsToReturn, now: DateTime<Utc>) -> Self {
        self.source_timestamp = timestamps.includes_source().then_some(now);
        self.server_timestamp = timestamps.includes_server().then_some(now);
        self
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.value, self.status)?;
        if let Some(ts) = self.source_timestamp {
            write!(f, " source={}", ts.to_rfc3339())?;
        }
        if let Some(ts) = self.server_timestamp {
            write!(f, " server={}", ts.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Per-item outcome of a create or modify request
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub status: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
}

impl ItemResult {
    pub fn bad(status: StatusCode) -> Self {
        Self {
            status,
            monitored_item_id: 0,
            revised_sampling_interval: 0.0,
            revised_queue_size: 0,
        }
    }
}
