//! Channel naming.
//!
//! A channel is either a device channel (`device_<id>`, simulated and
//! delta-synchronised) or a generic channel (cached, full payload).

/// Prefix shared by every device channel.
pub const DEVICE_PREFIX: &str = "device_";

/// Parsed form of a channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    /// `device_<id>` with a base-10 id.
    Device(u32),
    /// Any other name, including `device_` with a non-numeric suffix.
    Generic,
}

impl ChannelName {
    pub fn parse(name: &str) -> Self {
        name.strip_prefix(DEVICE_PREFIX)
            .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|id| id.parse().ok())
            .map_or(ChannelName::Generic, ChannelName::Device)
    }

    /// Channel name of device `id`.
    pub fn device_channel(id: u32) -> String {
        format!("{DEVICE_PREFIX}{id}")
    }

    pub fn device_id(self) -> Option<u32> {
        match self {
            ChannelName::Device(id) => Some(id),
            ChannelName::Generic => None,
        }
    }
}
