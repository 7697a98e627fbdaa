//! Records accepted by the loader.

use crate::key::PartitionKey;
use serde::{Deserialize, Serialize};

/// A record that can be batched into a segment.
///
/// The payload is serialized as one JSON line in the segment.
pub trait Record: Send + 'static {
    /// Serializable payload type.
    type Payload: Serialize + ?Sized;

    /// Destination of this record.
    fn partition_key(&self) -> &PartitionKey;

    /// Data written for this record.
    fn payload(&self) -> &Self::Payload;
}

/// A JSON row bound for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Destination.
    pub key: PartitionKey,
    /// Row contents.
    pub data: serde_json::Value,
}

impl Row {
    /// Creates a row.
    pub fn new(key: PartitionKey, data: serde_json::Value) -> Self {
        Self { key, data }
    }
}

impl Record for Row {
    type Payload = serde_json::Value;

    fn partition_key(&self) -> &PartitionKey {
        &self.key
    }

    fn payload(&self) -> &serde_json::Value {
        &self.data
    }
}
