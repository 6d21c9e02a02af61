//! Network reachability tracking.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Reacts to the network coming back.
pub trait RecoveryTarget: Send + Sync {
    /// Called once per offline-to-online transition.
    ///
    /// Must not block; long work belongs on a spawned task.
    fn on_recovered(&self);
}

/// A change in reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEdge {
    /// The network became reachable.
    WentOnline,
    /// The network became unreachable.
    WentOffline,
}

/// Turns raw reachability reports into de-duplicated edges.
///
/// The platform probe calls [`ConnectivityMonitor::report`] as often as
/// it likes; only genuine transitions are published, and every
/// offline-to-online transition notifies the registered recovery targets
/// exactly once. The monitor never touches the store.
pub struct ConnectivityMonitor {
    online: Mutex<bool>,
    published: watch::Sender<bool>,
    targets: RwLock<Vec<Arc<dyn RecoveryTarget>>>,
    recoveries: AtomicU64,
}

impl ConnectivityMonitor {
    /// Creates a monitor with a known initial state.
    pub fn new(initially_online: bool) -> Self {
        let (published, _) = watch::channel(initially_online);
        Self {
            online: Mutex::new(initially_online),
            published,
            targets: RwLock::new(Vec::new()),
            recoveries: AtomicU64::new(0),
        }
    }

    /// Registers a target notified on every recovery.
    pub fn register(&self, target: Arc<dyn RecoveryTarget>) {
        self.targets.write().push(target);
    }

    /// Records the current reachability.
    ///
    /// Returns the edge this report caused, or `None` if the state did
    /// not change.
    pub fn report(&self, online: bool) -> Option<ConnectivityEdge> {
        let edge = {
            let mut current = self.online.lock();
            if *current == online {
                return None;
            }
            *current = online;
            self.published.send_replace(online);
            if online {
                self.recoveries.fetch_add(1, Ordering::AcqRel);
                ConnectivityEdge::WentOnline
            } else {
                ConnectivityEdge::WentOffline
            }
        };

        match edge {
            ConnectivityEdge::WentOnline => {
                let targets: Vec<_> = self.targets.read().clone();
                info!(targets = targets.len(), "network available");
                for target in targets {
                    target.on_recovered();
                }
            }
            ConnectivityEdge::WentOffline => debug!("network lost"),
        }
        Some(edge)
    }

    /// Returns the last reported state.
    pub fn is_online(&self) -> bool {
        *self.online.lock()
    }

    /// Subscribes to reachability changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.published.subscribe()
    }

    /// Returns the number of offline-to-online transitions seen.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Acquire)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
