//! Per-subscriber delta delivery.
//!
//! Each broadcast tick walks every device channel that has
//! subscribers, snapshots the device's published vector once, and for
//! each subscriber whose cadence has elapsed sends the delta against
//! what that subscriber last received.
//!
//! A due subscriber's cadence clock is reset even when nothing changed;
//! there is nothing stale to deliver, so the next check waits a full
//! interval. Generic channels are never touched here.

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::ChannelName;
use crate::delta;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::store::RegisterStore;

/// Outcome of one broadcast tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Subscriptions whose cadence had elapsed.
    pub due: usize,
    /// Non-empty deltas written to transports.
    pub deltas_sent: usize,
    /// Total delta bytes written.
    pub bytes_sent: usize,
    /// Subscriptions dropped because their transport was closed.
    pub pruned: usize,
}

impl BroadcastStats {
    pub fn is_idle(&self) -> bool {
        self.due == 0 && self.pruned == 0
    }
}

/// Deliver deltas to every due subscriber of every device channel.
pub fn broadcast_due(
    store: &RegisterStore,
    registry: &mut SubscriptionRegistry,
    now: Instant,
) -> BroadcastStats {
    let mut stats = BroadcastStats::default();
    let mut current = Vec::new();

    for (channel, subs) in registry.iter_mut() {
        let Some(device) = ChannelName::parse(channel)
            .device_id()
            .and_then(|id| store.get(id))
        else {
            continue;
        };
        if !subs.iter().any(|s| s.is_due(now)) {
            continue;
        }

        device.published_into(&mut current);
        subs.retain_mut(|sub| deliver(sub, &current, now, &mut stats));
    }

    if stats.pruned > 0 {
        registry.compact();
    }
    stats
}

/// Serve one subscription. Returns `false` when it should be dropped.
fn deliver(sub: &mut Subscription, current: &[u8], now: Instant, stats: &mut BroadcastStats) -> bool {
    if !sub.is_due(now) {
        return true;
    }
    stats.due += 1;

    // Without a primed snapshot the client is assumed to hold zeros.
    let previous = sub
        .last_known_state
        .get_or_insert_with(|| vec![0; current.len()]);
    let patch = delta::encode(current, previous.as_slice());

    if !patch.is_empty() {
        let len = patch.len();
        match sub.transport.send_binary(patch) {
            Ok(()) => {
                previous.clear();
                previous.extend_from_slice(current);
                stats.deltas_sent += 1;
                stats.bytes_sent += len;
            }
            Err(e) if e.is_closed() => {
                debug!(client_id = %sub.client_id, channel = %sub.channel, "dropping closed subscriber");
                stats.pruned += 1;
                return false;
            }
            Err(e) => {
                // State is left as-is so the next due tick resends the changes.
                warn!(client_id = %sub.client_id, channel = %sub.channel, "delta send failed: {e}");
            }
        }
    }

    sub.last_sent = now;
    true
}

// ── Tests ────────────────────────────────────────────────────────
