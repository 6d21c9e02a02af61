//! In-memory push channel.
//!
//! A [`MemoryPushConnector`] plays the server side of the live channel:
//! it records the token each connection authorizes with and delivers
//! broadcasts only to connections authorized as the entity's owner.

use mirrorsync_protocol::{PushConnection, PushConnector, PushError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked `recv` re-checks the open flag.
const RECV_POLL: Duration = Duration::from_millis(20);

struct Peer {
    inbound: Sender<String>,
    token: Arc<Mutex<Option<String>>>,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct Hub {
    peers: Vec<Peer>,
    sent: Vec<String>,
    refuse: bool,
    connects: u64,
}

impl Hub {
    fn prune(&mut self) {
        self.peers.retain(|peer| peer.open.load(Ordering::Acquire));
    }
}

/// Server side of an in-memory push channel.
///
/// Clones share the same hub.
#[derive(Clone, Default)]
pub struct MemoryPushConnector {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryPushConnector {
    /// Creates a connector with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent connects fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.hub.lock().refuse = refuse;
    }

    /// Returns the number of connect attempts.
    pub fn connect_count(&self) -> u64 {
        self.hub.lock().connects
    }

    /// Returns the number of open connections.
    pub fn open_connections(&self) -> usize {
        let mut hub = self.hub.lock();
        hub.prune();
        hub.peers.len()
    }

    /// Returns every frame clients have sent, oldest first.
    pub fn sent_frames(&self) -> Vec<String> {
        self.hub.lock().sent.clone()
    }

    /// Returns the tokens of open, authorized connections.
    pub fn authorized_tokens(&self) -> Vec<String> {
        let mut hub = self.hub.lock();
        hub.prune();
        hub.peers
            .iter()
            .filter_map(|peer| peer.token.lock().clone())
            .collect()
    }

    /// Delivers a frame to every open connection authorized as `owner`.
    /// Returns the number of recipients.
    pub fn broadcast(&self, owner: &str, frame: &str) -> usize {
        let mut hub = self.hub.lock();
        hub.prune();
        hub.peers
            .iter()
            .filter(|peer| peer.token.lock().as_deref() == Some(owner))
            .filter(|peer| peer.inbound.send(frame.to_string()).is_ok())
            .count()
    }

    /// Delivers a frame to every open connection, authorized or not.
    pub fn send_raw(&self, frame: &str) -> usize {
        let mut hub = self.hub.lock();
        hub.prune();
        hub.peers
            .iter()
            .filter(|peer| peer.inbound.send(frame.to_string()).is_ok())
            .count()
    }

    /// Closes every connection from the server side.
    pub fn disconnect_all(&self) {
        let mut hub = self.hub.lock();
        for peer in &hub.peers {
            peer.open.store(false, Ordering::Release);
        }
        hub.peers.clear();
    }
}

impl PushConnector for MemoryPushConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>, PushError> {
        let mut hub = self.hub.lock();
        hub.connects += 1;
        if hub.refuse {
            return Err(PushError::Connect(format!("{url}: connection refused")));
        }

        let (inbound, receiver) = mpsc::channel();
        let token = Arc::new(Mutex::new(None));
        let open = Arc::new(AtomicBool::new(true));
        hub.peers.push(Peer {
            inbound,
            token: Arc::clone(&token),
            open: Arc::clone(&open),
        });

        Ok(Box::new(MemoryPushConnection {
            receiver: Mutex::new(receiver),
            token,
            open,
            hub: Arc::clone(&self.hub),
        }))
    }
}

/// Client side of an in-memory push connection.
pub struct MemoryPushConnection {
    receiver: Mutex<Receiver<String>>,
    token: Arc<Mutex<Option<String>>>,
    open: Arc<AtomicBool>,
    hub: Arc<Mutex<Hub>>,
}

impl PushConnection for MemoryPushConnection {
    fn send(&self, frame: &str) -> Result<(), PushError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(PushError::Closed);
        }
        if let Ok(value) = serde_json::from_str::<Value>(frame) {
            if value["type"] == "authorization" {
                if let Some(token) = value["payload"]["token"].as_str() {
                    *self.token.lock() = Some(token.to_string());
                }
            }
        }
        self.hub.lock().sent.push(frame.to_string());
        Ok(())
    }

    fn recv(&self) -> Result<Option<String>, PushError> {
        let receiver = self.receiver.lock();
        loop {
            if !self.open.load(Ordering::Acquire) {
                return Ok(None);
            }
            match receiver.recv_timeout(RECV_POLL) {
                Ok(frame) => return Ok(Some(frame)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Drop for MemoryPushConnection {
    fn drop(&mut self) {
        self.close();
    }
}
