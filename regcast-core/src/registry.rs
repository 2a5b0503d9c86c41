//! Per-channel subscriber lists.
//!
//! Each [`Subscription`] is one client's view of one channel: where to
//! deliver, how often, and what that client was last sent. Entries are
//! appended by subscribe, mutated in place by the broadcast scheduler,
//! and removed by unsubscribe (all entries of the client on that
//! channel) or when the client's connection closes.
//!
//! Subscribing twice from the same client appends a second entry; both
//! are served until an unsubscribe removes them together.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::transport::TransportHandle;

/// Highest delivery rate a subscriber may request. Matches the
/// simulation rate; faster cadences would only resend unchanged state.
pub const MAX_FPS: u32 = 10;

/// Rate used when the client does not specify one (`fps <= 0`).
pub const DEFAULT_FPS: u32 = 10;

/// Clamp a requested rate into `1..=MAX_FPS`; zero or negative means
/// "unspecified" and yields [`DEFAULT_FPS`].
pub fn clamp_fps(requested: i64) -> u32 {
    if requested <= 0 {
        DEFAULT_FPS
    } else {
        requested.min(MAX_FPS as i64) as u32
    }
}

/// Minimum interval between deliveries for a requested rate.
pub fn cadence(requested_fps: i64) -> Duration {
    Duration::from_secs(1) / clamp_fps(requested_fps)
}

// ── Subscription ─────────────────────────────────────────────────

/// One client's subscription to one channel.
pub struct Subscription {
    pub client_id: String,
    pub channel: String,
    pub transport: TransportHandle,
    pub target_interval: Duration,
    pub last_sent: Instant,
    /// Last vector successfully delivered (or primed by a snapshot).
    /// `None` until the first delivery on a device channel.
    pub last_known_state: Option<Vec<u8>>,
}

impl Subscription {
    pub fn new(
        client_id: impl Into<String>,
        channel: impl Into<String>,
        transport: TransportHandle,
        requested_fps: i64,
        now: Instant,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            channel: channel.into(),
            transport,
            target_interval: cadence(requested_fps),
            last_sent: now,
            last_known_state: None,
        }
    }

    /// Whether the cadence interval has elapsed at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_sent) >= self.target_interval
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("client_id", &self.client_id)
            .field("channel", &self.channel)
            .field("target_interval", &self.target_interval)
            .field("last_sent", &self.last_sent)
            .field(
                "last_known_state",
                &self.last_known_state.as_ref().map(Vec::len),
            )
            .finish()
    }
}

// ── SubscriptionRegistry ─────────────────────────────────────────

/// Subscriptions grouped by channel name.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: BTreeMap<String, Vec<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `sub` to its channel and return it for priming.
    pub fn subscribe(&mut self, sub: Subscription) -> &mut Subscription {
        let list = self.channels.entry(sub.channel.clone()).or_default();
        list.push(sub);
        let last = list.len() - 1;
        &mut list[last]
    }

    /// Remove every subscription of `client_id` on `channel`. Returns
    /// how many were removed. Other clients are untouched.
    pub fn unsubscribe(&mut self, client_id: &str, channel: &str) -> usize {
        let Some(list) = self.channels.get_mut(channel) else {
            return 0;
        };
        let before = list.len();
        list.retain(|s| s.client_id != client_id);
        let removed = before - list.len();
        if list.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    /// Remove every subscription of `client_id` on every channel.
    pub fn remove_client(&mut self, client_id: &str) -> usize {
        let mut removed = 0;
        self.channels.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.client_id != client_id);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    /// Drop subscriptions on `channel` for which `keep` returns false.
    pub fn retain_on<F>(&mut self, channel: &str, keep: F) -> usize
    where
        F: FnMut(&Subscription) -> bool,
    {
        let Some(list) = self.channels.get_mut(channel) else {
            return 0;
        };
        let before = list.len();
        list.retain(keep);
        let removed = before - list.len();
        if list.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    /// Subscribers of `channel` (empty if none).
    pub fn subscribers(&self, channel: &str) -> &[Subscription] {
        self.channels.get(channel).map_or(&[], Vec::as_slice)
    }

    /// Channels with at least one subscriber, with mutable lists.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Vec<Subscription>)> {
        self.channels.iter_mut()
    }

    /// Subscriber count per channel. Channels are dropped with their last
    /// subscriber, so every reported count is at least 1.
    pub fn subscriber_counts(&self) -> BTreeMap<String, usize> {
        self.channels
            .iter()
            .map(|(ch, list)| (ch.clone(), list.len()))
            .collect()
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Total subscriptions across all channels.
    pub fn len(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Drop empty channel lists left behind by in-place pruning.
    pub(crate) fn compact(&mut self) {
        self.channels.retain(|_, list| !list.is_empty());
    }
}

// ── Tests ────────────────────────────────────────────────────────
