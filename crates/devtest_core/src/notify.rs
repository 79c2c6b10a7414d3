//! In-process change notifications.
//!
//! # Responsibility
//! - Tell interested clients that DevTest data changed so they re-fetch.
//!
//! # Invariants
//! - Broadcasting never fails, including when nobody listens.
//! - Events carry no payload; receivers reload what they need.

use log::debug;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// "Something changed, refresh your view."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChanged;

/// Fire-and-forget broadcaster shared by every controller instance.
///
/// Clones share one channel.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<DataChanged>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Slow receivers lag once `capacity` events are buffered.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataChanged> {
        self.sender.subscribe()
    }

    /// Broadcasts `DataChanged` and returns how many receivers got it.
    pub fn notify_data_changed(&self) -> usize {
        let delivered = self.sender.send(DataChanged).unwrap_or(0);
        debug!("event=notify_data_changed module=notify status=ok receivers={delivered}");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
