//! Control-plane message types.
//!
//! Messages are exchanged as JSON objects over one session per remote node:
//!
//! ```json
//! {"method":"start","deviceId":"net-A","srcNetworkId":"net-B",
//!  "sinkNetworkId":"net-A","dhIds":["kbd-1"],"result":0}
//! ```
//!
//! A frame without `result` is a request; a frame with `result` answers the
//! pending request of the same method from the same device. There is no
//! request id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DhId;
use crate::machine::NetworkId;

/// Result code carried by a successful response.
pub const RESULT_OK: i32 = 0;

/// Result code used for locally synthesised failures.
pub const RESULT_FAILED: i32 = -1;

/// Message class. At most one request per class per device is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Prepare,
    Unprepare,
    Start,
    Stop,
}

impl Method {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Unprepare => "unprepare",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown control method: {0}")]
pub struct UnknownMethod(pub String);

impl std::str::FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepare" => Ok(Self::Prepare),
            "unprepare" => Ok(Self::Unprepare),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

/// Control-plane payload, tagged by `method` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Set up the input path between two nodes.
    #[serde(rename_all = "camelCase")]
    Prepare {
        src_network_id: NetworkId,
        sink_network_id: NetworkId,
    },

    /// Tear the input path down.
    #[serde(rename_all = "camelCase")]
    Unprepare {
        src_network_id: NetworkId,
        sink_network_id: NetworkId,
    },

    /// Move the listed device handles to the remote owner.
    #[serde(rename_all = "camelCase")]
    Start {
        src_network_id: NetworkId,
        sink_network_id: NetworkId,
        dh_ids: Vec<DhId>,
    },

    /// Bring the listed device handles back.
    #[serde(rename_all = "camelCase")]
    Stop {
        src_network_id: NetworkId,
        sink_network_id: NetworkId,
        dh_ids: Vec<DhId>,
    },
}

impl ControlMessage {
    /// The message class, used as the correlation key.
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::Prepare { .. } => Method::Prepare,
            Self::Unprepare { .. } => Method::Unprepare,
            Self::Start { .. } => Method::Start,
            Self::Stop { .. } => Method::Stop,
        }
    }

    /// Device handles carried by the message (empty for prepare/unprepare).
    #[must_use]
    pub fn dh_ids(&self) -> &[DhId] {
        match self {
            Self::Start { dh_ids, .. } | Self::Stop { dh_ids, .. } => dh_ids,
            Self::Prepare { .. } | Self::Unprepare { .. } => &[],
        }
    }
}

/// One JSON frame on a control session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFrame {
    #[serde(flatten)]
    pub message: ControlMessage,
    /// Network id of the node that wrote the frame.
    pub device_id: NetworkId,
    /// Present on responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<i32>,
}

impl ControlFrame {
    #[must_use]
    pub fn request(device_id: NetworkId, message: ControlMessage) -> Self {
        Self {
            message,
            device_id,
            result: None,
        }
    }

    /// Build the response to `self`, echoing its payload.
    #[must_use]
    pub fn respond(&self, device_id: NetworkId, result: i32) -> Self {
        Self {
            message: self.message.clone(),
            device_id,
            result: Some(result),
        }
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.result.is_some()
    }

    #[must_use]
    pub fn method(&self) -> Method {
        self.message.method()
    }
}

/// Coarse outcome reported to the event-notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CooperateMessage {
    InfoSuccess,
    InfoFail,
    StopSuccess,
    StopFail,
}

impl std::fmt::Display for CooperateMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InfoSuccess => write!(f, "InfoSuccess"),
            Self::InfoFail => write!(f, "InfoFail"),
            Self::StopSuccess => write!(f, "StopSuccess"),
            Self::StopFail => write!(f, "StopFail"),
        }
    }
}
