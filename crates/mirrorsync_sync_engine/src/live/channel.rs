//! The push connection and its reader/merge tasks.

use super::merge::{apply_live_event, MergeOutcome};
use crate::config::SyncConfig;
use crate::connectivity::RecoveryTarget;
use crate::error::{SyncError, SyncResult};
use mirrorsync_core::Context;
use mirrorsync_protocol::{authorization_frame, LiveEvent, PushConnection, PushConnector, PushError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Connection state of a [`LiveChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection.
    Disconnected,
    /// A connection is being opened.
    Connecting,
    /// Frames are flowing.
    Connected,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
        }
    }
}

/// Counters of a live channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveStats {
    /// Frames received.
    pub frames: u64,
    /// Events stored.
    pub applied: u64,
    /// Events older than the local copy.
    pub stale: u64,
    /// Rows removed by delete events.
    pub removed: u64,
    /// Events with nothing to do.
    pub ignored: u64,
    /// Frames that could not be parsed.
    pub malformed: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    applied: AtomicU64,
    stale: AtomicU64,
    removed: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: MergeOutcome) {
        let counter = match outcome {
            MergeOutcome::Applied => &self.applied,
            MergeOutcome::Stale => &self.stale,
            MergeOutcome::Removed => &self.removed,
            MergeOutcome::Ignored => &self.ignored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LiveStats {
        LiveStats {
            frames: self.frames.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

struct Session {
    connection: Arc<dyn PushConnection>,
    generation: u64,
}

struct Inner {
    ctx: Arc<Context>,
    connector: Arc<dyn PushConnector>,
    url: String,
    buffer: usize,
    reconnect_delay: Duration,
    runtime: Handle,
    state: watch::Sender<ChannelState>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    counters: Arc<Counters>,
}

impl Inner {
    fn close_session(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.connection.close();
            debug!(generation = session.generation, "live connection closed");
        }
    }

    fn session_ended(&self, generation: u64) {
        let mut session = self.session.lock();
        if session.as_ref().map(|s| s.generation) == Some(generation) {
            session.take();
            self.state.send_replace(ChannelState::Disconnected);
            info!("live channel disconnected by server");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close_session();
    }
}

/// The server push channel of one session.
///
/// Cloning yields another handle to the same channel. Reconnection is
/// driven from outside, by [`LiveChannel::reconnect`] or by registering
/// the channel with a connectivity monitor.
#[derive(Clone)]
pub struct LiveChannel {
    inner: Arc<Inner>,
}

impl LiveChannel {
    /// Creates a disconnected channel on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] outside a tokio runtime.
    pub fn new(
        ctx: Arc<Context>,
        connector: Arc<dyn PushConnector>,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                connector,
                url: config.push_url.clone(),
                buffer: config.live_buffer.max(1),
                reconnect_delay: config.reconnect_delay,
                runtime,
                state,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                counters: Arc::new(Counters::default()),
            }),
        })
    }

    /// Returns the connection state.
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Returns the counters.
    pub fn stats(&self) -> LiveStats {
        self.inner.counters.snapshot()
    }

    /// Opens the connection, replacing any open one, and authorizes it
    /// with the context's credential.
    ///
    /// Blocks while connecting; async callers use
    /// [`LiveChannel::reconnect`].
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the authorization frame
    /// fails. The channel is then disconnected.
    pub fn connect(&self) -> SyncResult<()> {
        let inner = &self.inner;
        inner.close_session();
        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        inner.state.send_replace(ChannelState::Connecting);

        let connection: Arc<dyn PushConnection> = match inner.connector.connect(&inner.url) {
            Ok(connection) => Arc::from(connection),
            Err(err) => {
                warn!(url = %inner.url, error = %err, "live channel connect failed");
                inner.state.send_replace(ChannelState::Disconnected);
                return Err(err.into());
            }
        };

        match inner.ctx.credential() {
            Some(token) => {
                if let Err(err) = connection.send(&authorization_frame(&token)) {
                    warn!(error = %err, "live channel authorization failed");
                    connection.close();
                    inner.state.send_replace(ChannelState::Disconnected);
                    return Err(err.into());
                }
            }
            None => warn!("no credential, live channel opened without authorization"),
        }

        *inner.session.lock() = Some(Session {
            connection: Arc::clone(&connection),
            generation,
        });
        inner.state.send_replace(ChannelState::Connected);
        info!(url = %inner.url, generation, "live channel connected");

        let (frames_tx, frames_rx) = mpsc::channel::<String>(inner.buffer);
        inner
            .runtime
            .spawn_blocking(move || read_frames(connection.as_ref(), &frames_tx));

        let ctx = Arc::clone(&inner.ctx);
        let counters = Arc::clone(&inner.counters);
        let owner: Weak<Inner> = Arc::downgrade(inner);
        inner.runtime.spawn_blocking(move || {
            merge_frames(&ctx, &counters, frames_rx);
            if let Some(inner) = owner.upgrade() {
                inner.session_ended(generation);
            }
        });
        Ok(())
    }

    /// Closes the connection.
    pub fn disconnect(&self) {
        self.inner.close_session();
        self.inner.state.send_replace(ChannelState::Disconnected);
    }

    /// Closes the connection, waits the settle delay, and reopens.
    ///
    /// A connection that went stale during an outage is never reused.
    ///
    /// # Errors
    ///
    /// Returns an error if reopening fails.
    pub async fn reconnect(&self) -> SyncResult<()> {
        self.disconnect();
        tokio::time::sleep(self.inner.reconnect_delay).await;
        let channel = self.clone();
        tokio::task::spawn_blocking(move || channel.connect())
            .await
            .map_err(|err| SyncError::Push(PushError::Transport(err.to_string())))?
    }
}

impl RecoveryTarget for LiveChannel {
    fn on_recovered(&self) {
        let channel = self.clone();
        self.inner.runtime.spawn(async move {
            if let Err(err) = channel.reconnect().await {
                warn!(error = %err, "live channel reconnect failed");
            }
        });
    }
}

fn read_frames(connection: &dyn PushConnection, frames: &mpsc::Sender<String>) {
    loop {
        match connection.recv() {
            Ok(Some(frame)) => {
                // Blocks while the merge side is behind.
                if frames.blocking_send(frame).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "live connection failed");
                break;
            }
        }
    }
}

fn merge_frames(ctx: &Context, counters: &Counters, mut frames: mpsc::Receiver<String>) {
    while let Some(frame) = frames.blocking_recv() {
        counters.frames.fetch_add(1, Ordering::Relaxed);
        let event = match LiveEvent::parse(&frame) {
            Ok(event) => event,
            Err(err) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "discarding malformed live message");
                continue;
            }
        };

        let kind = event.kind();
        let entity = event.entity_id().clone();
        match apply_live_event(ctx, event) {
            Ok(outcome) => {
                counters.record(outcome);
                debug!(%kind, %entity, %outcome, "live event merged");
            }
            Err(err) => warn!(%kind, %entity, error = %err, "failed to merge live event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_protocol::EntityId;
    use mirrorsync_testkit::{synced_game, MemoryPushConnector};
    use serde_json::json;

    fn setup(buffer: usize) -> (Arc<Context>, MemoryPushConnector, LiveChannel) {
        let ctx = Arc::new(Context::open_in_memory().unwrap());
        ctx.set_credential("u1");
        let connector = MemoryPushConnector::new();
        let config = SyncConfig::new("http://test/api/games", "ws://test")
            .with_live_buffer(buffer)
            .with_reconnect_delay(Duration::from_millis(5));
        let channel =
            LiveChannel::new(Arc::clone(&ctx), Arc::new(connector.clone()), &config).unwrap();
        (ctx, connector, channel)
    }

    fn frame(kind: &str, version: u64, price: i64) -> String {
        json!({
            "type": kind,
            "payload": synced_game("g1", version, "u1", "Portal", price).to_wire(),
        })
        .to_string()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn authorizes_first() {
        let (_ctx, connector, channel) = setup(8);
        channel.connect().unwrap();

        assert_eq!(channel.state(), ChannelState::Connected);
        let sent = connector.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], authorization_frame("u1"));
        assert_eq!(connector.authorized_tokens(), vec!["u1".to_string()]);
        channel.disconnect();
    }

    #[tokio::test]
    async fn events_are_merged() {
        let (ctx, connector, channel) = setup(8);
        channel.connect().unwrap();

        connector.broadcast("u1", &frame("created", 1, 10));
        wait_for(|| ctx.store().get(&EntityId::new("g1")).is_some()).await;

        connector.broadcast("u1", &frame("updated", 3, 30));
        wait_for(|| ctx.store().get(&EntityId::new("g1")).map(|e| e.version) == Some(3)).await;

        connector.broadcast("u1", &frame("updated", 2, 20));
        wait_for(|| channel.stats().stale == 1).await;
        let entity = ctx.store().get(&EntityId::new("g1")).unwrap();
        assert_eq!(entity.field("price"), Some(&30.into()));
        channel.disconnect();
    }

    #[tokio::test]
    async fn malformed_frames_keep_the_channel_open() {
        let (ctx, connector, channel) = setup(8);
        channel.connect().unwrap();

        connector.send_raw("not json");
        connector.send_raw(r#"{"type":"updated"}"#);
        connector.send_raw(r#"{"type":"renamed","payload":{"_id":"g1"}}"#);
        connector.send_raw(r#"{"type":"created","payload":{"_id":"  "}}"#);
        connector.broadcast("u1", &frame("created", 1, 10));

        wait_for(|| ctx.store().get(&EntityId::new("g1")).is_some()).await;
        assert_eq!(channel.stats().malformed, 4);
        assert_eq!(channel.state(), ChannelState::Connected);
        channel.disconnect();
    }

    #[tokio::test]
    async fn no_credential_skips_authorization() {
        let (ctx, connector, channel) = setup(8);
        ctx.clear_credential();
        channel.connect().unwrap();

        assert!(connector.sent_frames().is_empty());
        assert_eq!(channel.state(), ChannelState::Connected);
        channel.disconnect();
    }

    #[tokio::test]
    async fn refused_connect_leaves_disconnected() {
        let (_ctx, connector, channel) = setup(8);
        connector.refuse_connections(true);

        assert!(channel.connect().is_err());
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn server_close_is_observed() {
        let (_ctx, connector, channel) = setup(8);
        channel.connect().unwrap();

        connector.disconnect_all();
        wait_for(|| channel.state() == ChannelState::Disconnected).await;
    }

    #[tokio::test]
    async fn reconnect_opens_a_fresh_connection() {
        let (ctx, connector, channel) = setup(8);
        channel.connect().unwrap();

        channel.reconnect().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.open_connections(), 1);
        assert_eq!(channel.state(), ChannelState::Connected);

        connector.broadcast("u1", &frame("created", 1, 10));
        wait_for(|| ctx.store().get(&EntityId::new("g1")).is_some()).await;
        channel.disconnect();
    }

    #[tokio::test]
    async fn full_buffer_applies_backpressure_without_loss() {
        let (ctx, connector, channel) = setup(1);
        channel.connect().unwrap();

        for version in 1..=40 {
            connector.broadcast("u1", &frame("updated", version, version as i64));
        }
        wait_for(|| channel.stats().applied == 40).await;
        assert_eq!(ctx.store().get(&EntityId::new("g1")).unwrap().version, 40);
        channel.disconnect();
    }

    #[tokio::test]
    async fn recovery_reconnects() {
        let (_ctx, connector, channel) = setup(8);
        channel.connect().unwrap();

        channel.on_recovered();
        wait_for(|| connector.connect_count() == 2 && channel.state() == ChannelState::Connected)
            .await;
        channel.disconnect();
    }
}
