use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelId, ChannelStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ChannelStatusChanged(ChannelStatusEvent),
    Sweep(SweepEvent),
}

/// What moved a channel between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Terminal relay error classified as a channel fault.
    RelayError,
    /// Health sweep test outcome.
    HealthCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatusEvent {
    pub at: SystemTime,
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub from: ChannelStatus,
    pub to: ChannelStatus,
    pub cause: TransitionCause,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SweepEvent {
    Started {
        at: SystemTime,
        channels: usize,
    },
    Finished {
        at: SystemTime,
        tested: usize,
        enabled: Vec<ChannelId>,
        disabled: Vec<ChannelId>,
    },
}
