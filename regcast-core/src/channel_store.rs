//! Last-value cache for generic (non-simulated) channels.
//!
//! A publish overwrites the channel's cached payload and pushes it,
//! unchanged, to every current subscriber as a `data` message. There is
//! no diffing and no cadence. Entries never expire.

use std::collections::BTreeMap;

use serde_json::value::RawValue;
use tracing::debug;

use crate::error::RegcastError;
use crate::message::Response;
use crate::registry::SubscriptionRegistry;

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Subscribers the payload was written to.
    pub delivered: usize,
    /// Subscriptions dropped because their transport was closed.
    pub pruned: usize,
}

/// Channel name → raw JSON payload.
#[derive(Debug, Default)]
pub struct ChannelStore {
    data: BTreeMap<String, Box<RawValue>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache `payload` for `channel` and deliver it to every subscriber
    /// of that channel.
    pub fn publish(
        &mut self,
        registry: &mut SubscriptionRegistry,
        channel: &str,
        payload: Box<RawValue>,
    ) -> Result<PublishStats, RegcastError> {
        let text = Response::data(channel, payload.clone()).to_json()?;
        self.data.insert(channel.to_string(), payload);

        let mut delivered = 0;
        let pruned = registry.retain_on(channel, |sub| match sub.transport.send_text(text.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                debug!(client_id = %sub.client_id, channel, "publish dropped: {e}");
                !e.is_closed()
            }
        });

        Ok(PublishStats { delivered, pruned })
    }

    /// Cached payload of `channel`, if any.
    pub fn get(&self, channel: &str) -> Option<&RawValue> {
        self.data.get(channel).map(Box::as_ref)
    }

    /// Raw JSON text of every cached payload.
    pub fn preview(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|(ch, raw)| (ch.clone(), raw.get().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────
