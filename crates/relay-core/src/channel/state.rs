use std::fmt;

use serde::{Deserialize, Serialize};

pub type ChannelId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Enabled,
    ManuallyDisabled,
    AutoDisabled,
}

impl ChannelStatus {
    /// Persisted integer encoding. `0` is reserved for "unknown".
    pub fn code(self) -> i32 {
        match self {
            ChannelStatus::Enabled => 1,
            ChannelStatus::ManuallyDisabled => 2,
            ChannelStatus::AutoDisabled => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ChannelStatus::Enabled),
            2 => Some(ChannelStatus::ManuallyDisabled),
            3 => Some(ChannelStatus::AutoDisabled),
            _ => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, ChannelStatus::Enabled)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Enabled => f.write_str("enabled"),
            ChannelStatus::ManuallyDisabled => f.write_str("manually_disabled"),
            ChannelStatus::AutoDisabled => f.write_str("auto_disabled"),
        }
    }
}

/// One upstream endpoint/credential pair the relay can route to.
#[derive(Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub status: ChannelStatus,
    pub base_url: String,
    pub key: String,
    /// Model used by health checks instead of the default test model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_model: Option<String>,
}

impl Channel {
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

// Hand-written so the API key never reaches logs.
impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("base_url", &self.base_url)
            .field("test_model", &self.test_model)
            .finish_non_exhaustive()
    }
}

/// Identity of the channel that served an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip_and_reject_unknown() {
        for status in [
            ChannelStatus::Enabled,
            ChannelStatus::ManuallyDisabled,
            ChannelStatus::AutoDisabled,
        ] {
            assert_eq!(ChannelStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(ChannelStatus::from_code(0), None);
        assert_eq!(ChannelStatus::from_code(7), None);
    }

    #[test]
    fn debug_output_hides_key() {
        let channel = Channel {
            id: 1,
            name: "primary".to_string(),
            status: ChannelStatus::Enabled,
            base_url: "https://api.example.com".to_string(),
            key: "sk-secret".to_string(),
            test_model: None,
        };
        let rendered = format!("{channel:?}");
        assert!(rendered.contains("primary"));
        assert!(!rendered.contains("sk-secret"));
    }
}
