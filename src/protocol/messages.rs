//! Wire payloads published by the node
//!
//! Telemetry readings, lifecycle status records and the status report
//! returned for `get_status`. All payloads are JSON objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single sensor sample
///
/// Created by the telemetry publisher once per metric per cycle. The
/// timestamp is local bookkeeping and is not part of the wire payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: String,
    pub metric: String,
    pub unit: String,
    pub value: f64,
    /// 1-based cycle number the reading belongs to
    pub sequence_number: u32,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Wire representation of this reading
    pub fn to_payload(&self) -> TelemetryPayload {
        TelemetryPayload {
            device: self.device_id.clone(),
            value: round_to_tenth(self.value),
            unit: self.unit.clone(),
            reading: self.sequence_number,
        }
    }
}

/// Telemetry message body
///
/// ```
/// use sensornode::protocol::TelemetryPayload;
///
/// let payload = TelemetryPayload {
///     device: "esp32-qemu-01".to_string(),
///     value: 23.4,
///     unit: "C".to_string(),
///     reading: 3,
/// };
/// let json = serde_json::to_string(&payload).unwrap();
/// assert_eq!(json, r#"{"device":"esp32-qemu-01","value":23.4,"unit":"C","reading":3}"#);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPayload {
    pub device: String,
    pub value: f64,
    pub unit: String,
    pub reading: u32,
}

/// Node lifecycle status values published on the status topic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Complete,
}

/// Lifecycle status record: `{"status":"online"}` or
/// `{"status":"complete","total_published":20}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleStatus {
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_published: Option<u64>,
}

impl LifecycleStatus {
    pub fn online() -> Self {
        Self {
            status: NodeStatus::Online,
            total_published: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            status: NodeStatus::Offline,
            total_published: None,
        }
    }

    pub fn complete(total_published: u64) -> Self {
        Self {
            status: NodeStatus::Complete,
            total_published: Some(total_published),
        }
    }
}

/// Uptime and publish counter snapshot, sent in reply to `get_status`
/// and by the optional heartbeat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub uptime_s: u64,
    pub publish_count: u64,
}

/// Serialize any payload record to bytes
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
