//! Transport Connection: the single MQTT session to the broker.
//!
//! Each `connect()` starts a fresh *session* identified by a monotonically
//! increasing epoch. A session owns its `rumqttc` client and the task polling
//! its event loop; reconnecting aborts that task and throws the client away.
//! Messages from a superseded session are dropped at the dispatch point, so
//! nothing registered against an old session can be resolved by a new one.
//!
//! There is no background retry: when the event loop errors the
//! session goes `Disconnected` and stays there until a caller asks for
//! [`ConnectionManager::recover`] or [`ConnectionManager::reconnect`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeFilter, SubscribeReasonCode};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::camera_state::CameraStore;
use crate::config::MqttConfig;
use crate::error::{ActivityError, BusError};
use crate::topics::{InboundTopic, Topics};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// A message received on the bus, tagged with the session it arrived on.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub epoch: u64,
    pub topic: String,
    pub payload: String,
    /// Replayed by the broker on subscribe rather than sent live.
    pub retained: bool,
}

/// What the coordinator sends to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Subscribe { topics: Vec<String> },
    Publish { topic: String, payload: String },
}

enum Backend {
    Mqtt(MqttConfig),
    Loopback(mpsc::UnboundedSender<Outbound>),
}

#[derive(Clone)]
enum Link {
    Mqtt(AsyncClient),
    Loopback(mpsc::UnboundedSender<Outbound>),
}

struct Session {
    epoch: u64,
    link: Link,
    driver: Option<JoinHandle<()>>,
}

pub struct ConnectionManager {
    backend: Backend,
    topics: Topics,
    store: Arc<CameraStore>,
    session: Mutex<Option<Session>>,
    epoch: AtomicU64,
    state: watch::Sender<LinkState>,
    inbound: broadcast::Sender<Inbound>,
}

impl ConnectionManager {
    fn with_backend(backend: Backend, topics: Topics, store: Arc<CameraStore>) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Arc::new(Self {
            backend,
            topics,
            store,
            session: Mutex::new(None),
            epoch: AtomicU64::new(0),
            state,
            inbound,
        })
    }

    pub fn mqtt(cfg: MqttConfig, topics: Topics, store: Arc<CameraStore>) -> Arc<Self> {
        Self::with_backend(Backend::Mqtt(cfg), topics, store)
    }

    /// In-process transport: publishes go to the returned peer, which can
    /// inject inbound traffic as if it came from the NVR.
    pub fn loopback(topics: Topics, store: Arc<CameraStore>) -> (Arc<Self>, LoopbackPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self::with_backend(Backend::Loopback(tx), topics, store);
        let peer = LoopbackPeer {
            manager: Arc::clone(&manager),
            outbound: rx,
        };
        (manager, peer)
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn store(&self) -> &Arc<CameraStore> {
        &self.store
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe_inbound(&self) -> broadcast::Receiver<Inbound> {
        self.inbound.subscribe()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new session, discarding any existing one. Returns its epoch.
    pub fn connect(self: &Arc<Self>) -> u64 {
        let mut guard = self.lock_session();
        self.start_session(&mut guard)
    }

    /// Tear down the current session and start a new one.
    pub fn reconnect(self: &Arc<Self>) -> u64 {
        let mut guard = self.lock_session();
        warn!(epoch = self.epoch(), "reconnecting to broker");
        self.start_session(&mut guard)
    }

    /// Reconnect if `err` points at a dead connection and came from the
    /// current session. Concurrent failures of one session reconnect once.
    pub fn recover(self: &Arc<Self>, err: &BusError) -> bool {
        let Some(failed) = err.connection_epoch() else {
            return false;
        };

        let mut guard = self.lock_session();
        if self.epoch() != failed {
            debug!(failed, current = self.epoch(), "session already replaced");
            return false;
        }
        warn!(epoch = failed, topic = err.topic(), error = %err, "bus round trip failed, replacing session");
        self.start_session(&mut guard);
        true
    }

    fn start_session(self: &Arc<Self>, guard: &mut MutexGuard<'_, Option<Session>>) -> u64 {
        if let Some(old) = guard.take() {
            if let Some(driver) = old.driver {
                driver.abort();
            }
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(LinkState::Connecting);
        let subscriptions = self.topics.subscriptions(self.store.names().iter().map(String::as_str));

        let session = match &self.backend {
            Backend::Mqtt(cfg) => {
                let mut options = MqttOptions::new(cfg.client_id(), cfg.host.clone(), cfg.port);
                options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
                if let Some(username) = cfg.username.clone() {
                    options.set_credentials(username, cfg.password.clone().unwrap_or_default());
                }

                let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                info!(epoch, host = %cfg.host, port = cfg.port, "connecting to broker");

                let driver = tokio::spawn(drive(
                    Arc::downgrade(self),
                    epoch,
                    client.clone(),
                    eventloop,
                    subscriptions,
                ));
                Session {
                    epoch,
                    link: Link::Mqtt(client),
                    driver: Some(driver),
                }
            }
            Backend::Loopback(tx) => {
                let _ = tx.send(Outbound::Subscribe { topics: subscriptions });
                self.state.send_replace(LinkState::Connected);
                info!(epoch, "loopback session connected");
                Session {
                    epoch,
                    link: Link::Loopback(tx.clone()),
                    driver: None,
                }
            }
        };

        **guard = Some(session);
        epoch
    }

    /// Record a link state change reported by the session `epoch`.
    fn mark(&self, epoch: u64, state: LinkState) {
        if self.epoch() == epoch {
            self.state.send_replace(state);
        }
    }

    /// Block until the current session is connected or `timeout` elapses.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let connected = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == LinkState::Connected)).await,
            Ok(Ok(_))
        );
        connected
    }

    /// QoS 1 publish on the current session. Returns the session epoch.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<u64, BusError> {
        let (epoch, link) = {
            let guard = self.lock_session();
            match guard.as_ref() {
                Some(session) if self.state() == LinkState::Connected => (session.epoch, session.link.clone()),
                Some(session) => return Err(publish_error(topic, "not connected", session.epoch)),
                None => return Err(publish_error(topic, "no session", self.epoch())),
            }
        };

        match link {
            Link::Mqtt(client) => client
                .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
                .await
                .map_err(|e| publish_error(topic, e, epoch))?,
            Link::Loopback(tx) => tx
                .send(Outbound::Publish {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                })
                .map_err(|_| publish_error(topic, "loopback peer gone", epoch))?,
        }

        debug!(epoch, topic, payload, "published");
        Ok(epoch)
    }

    /// Deliver a live message from session `epoch`.
    pub fn on_message(&self, epoch: u64, topic: &str, payload: &str) {
        self.dispatch(epoch, topic, payload, false);
    }

    /// Single dispatch point for inbound traffic: update the store, then wake
    /// anyone waiting on the topic. Retained messages still update the store.
    fn dispatch(&self, epoch: u64, topic: &str, payload: &str, retained: bool) {
        if epoch != self.epoch() {
            debug!(epoch, topic, "dropping message from superseded session");
            return;
        }

        match self.topics.classify(topic) {
            Some(InboundTopic::Activity) => match self.store.apply_activity(payload) {
                Ok(changed) if !changed.is_empty() => debug!(topic, ?changed, "activity applied"),
                Ok(_) => {}
                Err(ActivityError::NotReady) => info!(topic, "NVR has not finished starting, activity ignored"),
                Err(err) => warn!(topic, error = %err, "discarding activity payload"),
            },
            Some(InboundTopic::State { camera, channel }) => {
                if let Err(err) = self.store.apply_token(&camera, channel, payload) {
                    warn!(camera = %camera, topic, error = %err, "discarding state payload");
                }
            }
            None => debug!(topic, "unrouted message"),
        }

        let _ = self.inbound.send(Inbound {
            epoch,
            topic: topic.to_string(),
            payload: payload.to_string(),
            retained,
        });
    }

    /// Best-effort disconnect on shutdown.
    pub async fn shutdown(&self) {
        let session = self.lock_session().take();
        self.state.send_replace(LinkState::Disconnected);

        let Some(session) = session else {
            return;
        };
        if let Link::Mqtt(client) = &session.link {
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "MQTT disconnect failed");
            }
        }
        if let Some(driver) = session.driver {
            let abort = driver.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, driver).await.is_err() {
                abort.abort();
            }
        }
        info!(epoch = session.epoch, "bus session closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(driver) = session.and_then(|s| s.driver) {
            driver.abort();
        }
    }
}

fn publish_error(topic: &str, reason: impl ToString, epoch: u64) -> BusError {
    BusError::Publish {
        topic: topic.to_string(),
        reason: reason.to_string(),
        epoch,
    }
}

/// Poll one session's event loop until it fails or is aborted.
async fn drive(
    manager: Weak<ConnectionManager>,
    epoch: u64,
    client: AsyncClient,
    mut eventloop: EventLoop,
    subscriptions: Vec<String>,
) {
    loop {
        let event = eventloop.poll().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };

        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                let filters = subscriptions
                    .iter()
                    .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce));
                if let Err(e) = client.try_subscribe_many(filters) {
                    error!(epoch, error = %e, "subscribe failed");
                    manager.mark(epoch, LinkState::Disconnected);
                    break;
                }
                info!(epoch, topics = subscriptions.len(), "connected, subscriptions issued");
            }
            // Requests only go out once the state topics are subscribed, or
            // their echoes could arrive before the broker routes them to us.
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                let refused = ack
                    .return_codes
                    .iter()
                    .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                    .count();
                if refused == ack.return_codes.len() {
                    error!(epoch, "broker refused every subscription");
                    manager.mark(epoch, LinkState::Disconnected);
                    break;
                }
                if refused > 0 {
                    warn!(epoch, refused, "broker refused some subscriptions");
                }
                info!(epoch, "subscriptions acknowledged");
                manager.mark(epoch, LinkState::Connected);
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                let payload = String::from_utf8_lossy(&p.payload).to_string();
                manager.dispatch(epoch, &p.topic, &payload, p.retain);
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                warn!(epoch, "broker closed the session");
                manager.mark(epoch, LinkState::Disconnected);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(epoch, error = %e, "MQTT connection lost");
                manager.mark(epoch, LinkState::Disconnected);
                break;
            }
        }
    }
}

/// The far end of a loopback transport.
pub struct LoopbackPeer {
    manager: Arc<ConnectionManager>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl LoopbackPeer {
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Deliver a message on the current session.
    pub fn inject(&self, topic: &str, payload: &str) {
        self.manager.on_message(self.manager.epoch(), topic, payload);
    }

    /// Deliver a message the way a broker replays a retained one.
    pub fn inject_retained(&self, topic: &str, payload: &str) {
        self.manager.dispatch(self.manager.epoch(), topic, payload, true);
    }

    /// Simulate the broker dropping the current session.
    pub fn drop_link(&self) {
        self.manager.mark(self.manager.epoch(), LinkState::Disconnected);
    }
}
