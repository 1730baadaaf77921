use std::fmt;
use std::sync::Arc;

use crate::config::MqttSettings;
use crate::error::MQTTError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, NetworkOptions, Outgoing, QoS};
use soilsense_core::topic_filters;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

mod broker;
mod router;

#[cfg(test)]
pub(crate) mod fakes;

use broker::BrokerAddress;
pub use router::MessageRouter;

// at-most-once, nothing is redelivered
const QOS: QoS = QoS::AtMostOnce;
const REQUEST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Offline,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Offline => f.write_str("offline"),
        }
    }
}

/// Outgoing half of a broker session.
pub(crate) trait SessionHandle: Send + Sync {
    fn subscribe(&self, filter: &str) -> Result<(), MQTTError>;
    fn disconnect(&self) -> Result<(), MQTTError>;
}

impl SessionHandle for AsyncClient {
    // try_* only enqueue, the event loop is driven by the same task
    fn subscribe(&self, filter: &str) -> Result<(), MQTTError> {
        Ok(self.try_subscribe(filter, QOS)?)
    }

    fn disconnect(&self) -> Result<(), MQTTError> {
        Ok(self.try_disconnect()?)
    }
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected,
    /// Our own DISCONNECT was written to the socket.
    Closed,
    Failed(String),
    Idle,
}

/// Incoming half of a broker session.
#[async_trait]
pub(crate) trait SessionEvents: Send {
    async fn next_event(&mut self) -> SessionEvent;
}

#[async_trait]
impl SessionEvents for EventLoop {
    /// Polling again after a failure makes rumqttc dial the broker anew.
    async fn next_event(&mut self) -> SessionEvent {
        match self.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => SessionEvent::Connected,
            Ok(Event::Incoming(Incoming::Publish(publish))) => SessionEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Incoming(Incoming::Disconnect)) => SessionEvent::Disconnected,
            Ok(Event::Outgoing(Outgoing::Disconnect)) => SessionEvent::Closed,
            Ok(_) => SessionEvent::Idle,
            Err(e) => SessionEvent::Failed(e.to_string()),
        }
    }
}

/// Owns the broker session: connect, subscribe, reconnect and shutdown.
///
/// Sessions are clean, so every transition into
/// [`ConnectionState::Connected`] re-issues all subscriptions. Failures are
/// retried forever at a fixed interval until [`MqttSensorClient::disconnect`]
/// is called, which is terminal.
pub struct MqttSensorClient {
    inner: Arc<MqttSensorClientInner>,
}

struct MqttSensorClientInner {
    settings: MqttSettings,
    topics: Vec<String>,
    router: Mutex<Option<MessageRouter>>,
    state: RwLock<ConnectionState>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl MqttSensorClient {
    pub fn new(settings: MqttSettings, router: MessageRouter) -> Self {
        let (shutdown, _) = watch::channel(false);
        MqttSensorClient {
            inner: Arc::new(MqttSensorClientInner {
                topics: topic_filters(settings.legacy_moisture_topic),
                settings,
                router: Mutex::new(Some(router)),
                state: RwLock::new(ConnectionState::Disconnected),
                listen_task: Mutex::new(None),
                shutdown,
            }),
        }
    }

    /// Starts a session in the background and returns immediately.
    ///
    /// A no-op while a session is already running. Fails once
    /// [`MqttSensorClient::disconnect`] was called.
    pub fn connect(&self) -> Result<(), MQTTError> {
        let settings = &self.inner.settings;
        let broker = BrokerAddress::parse(&settings.broker_url)?;
        if self.inner.is_terminated() {
            return Err(MQTTError::Terminated);
        }
        if self.inner.is_listening() {
            debug!("MQTT session already running, ignoring connect");
            return Ok(());
        }

        if broker.is_public() {
            warn!(
                broker = %broker,
                "!!! Connecting to PUBLIC broker {} - anybody can publish here. \
                 Sensor authorization is the only protection for stored data !!!",
                broker.host
            );
        }

        let client_id = format!("{}_{:08x}", settings.client_prefix, rand::random::<u32>());
        let mut options = broker.mqtt_options(&client_id);
        options
            .set_keep_alive(settings.keep_alive)
            .set_clean_session(true);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(settings.connect_timeout.as_secs());
        eventloop.set_network_options(network_options);

        info!(broker = %broker, client_id = %client_id, "Connecting to MQTT broker");
        self.attach_session(Arc::new(client), eventloop)
    }

    pub(crate) fn attach_session<E>(
        &self,
        session: Arc<dyn SessionHandle>,
        events: E,
    ) -> Result<(), MQTTError>
    where
        E: SessionEvents + 'static,
    {
        self.inner.clone().attach(session, events)
    }

    /// Stops retrying and closes the session. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        // the session task sends DISCONNECT and flushes it before ending
        let was_terminated = self.inner.shutdown.send_replace(true);

        let listen_task = self.inner.listen_task.lock().take();
        if let Some(handle) = listen_task {
            if let Err(e) = handle.await {
                error!("MQTT session task ended abnormally: {}", e);
            }
        }

        // never attached, release the router so its channel closes
        self.inner.router.lock().take();
        self.inner.set_state(ConnectionState::Disconnected);
        if !was_terminated {
            info!("Disconnected from MQTT broker");
        }
    }

    /// True once [`MqttSensorClient::disconnect`] was called.
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Point-in-time connectivity, no promise about the next message.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn broker_url(&self) -> &str {
        &self.inner.settings.broker_url
    }
}

impl MqttSensorClientInner {
    fn attach<E>(self: Arc<Self>, session: Arc<dyn SessionHandle>, events: E) -> Result<(), MQTTError>
    where
        E: SessionEvents + 'static,
    {
        // held until the task is stored, concurrent connects see it
        let mut listen_task = self.listen_task.lock();
        if self.is_terminated() {
            return Err(MQTTError::Terminated);
        }
        if listen_task.as_ref().map_or(false, |handle| !handle.is_finished()) {
            debug!("MQTT session already running, ignoring connect");
            return Ok(());
        }
        let router = self.router.lock().take().ok_or(MQTTError::Terminated)?;

        self.set_state(ConnectionState::Connecting);

        let shutdown = self.shutdown.subscribe();
        let inner = self.clone();
        *listen_task = Some(tokio::spawn(async move {
            inner.supervise(session, events, router, shutdown).await
        }));
        Ok(())
    }

    async fn supervise<E: SessionEvents>(
        self: Arc<Self>,
        session: Arc<dyn SessionHandle>,
        mut events: E,
        router: MessageRouter,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => None,
                event = events.next_event() => Some(event),
            };
            let Some(event) = event else {
                self.close_session(session.as_ref(), &mut events).await;
                break;
            };

            match event {
                SessionEvent::Connected => {
                    self.set_state(ConnectionState::Connected);
                    info!("Connected to MQTT broker");
                    self.subscribe_topics(session.as_ref());
                }
                SessionEvent::Message { topic, payload } => router.on_message(&topic, &payload),
                SessionEvent::Idle | SessionEvent::Closed => {}
                SessionEvent::Disconnected => {
                    warn!("MQTT broker closed the session");
                    if !self.retry_later(&mut shutdown).await {
                        break;
                    }
                }
                SessionEvent::Failed(reason) => {
                    error!("MQTT connection error: {}", reason);
                    if !self.retry_later(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Ended MQTT message loop");
    }

    /// Queues DISCONNECT and, on a live connection, drives the event loop
    /// until it is on the wire, bounded by the connect timeout. Publishes
    /// arriving meanwhile are dropped.
    async fn close_session<E: SessionEvents>(&self, session: &dyn SessionHandle, events: &mut E) {
        if let Err(e) = session.disconnect() {
            debug!("Failed sending disconnect to broker: {}", e);
            return;
        }
        if *self.state.read() != ConnectionState::Connected {
            return;
        }

        let flushed = tokio::time::timeout(self.settings.connect_timeout, async {
            loop {
                match events.next_event().await {
                    SessionEvent::Closed => return true,
                    SessionEvent::Disconnected | SessionEvent::Failed(_) => return false,
                    _ => {}
                }
            }
        })
        .await;
        match flushed {
            Ok(true) => debug!("Sent disconnect to broker"),
            Ok(false) => debug!("Session closed before disconnect was sent"),
            Err(_) => warn!("Timed out sending disconnect to broker"),
        }
    }

    /// Sleeps one retry interval. Returns false if shut down meanwhile.
    async fn retry_later(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        self.set_state(ConnectionState::Offline);
        tokio::select! {
            _ = wait_for_shutdown(shutdown) => return false,
            _ = tokio::time::sleep(self.settings.retry_interval) => {}
        }
        self.set_state(ConnectionState::Connecting);
        info!(
            retry_ms = self.settings.retry_interval.as_millis() as u64,
            "Reconnecting to MQTT broker"
        );
        true
    }

    fn subscribe_topics(&self, session: &dyn SessionHandle) {
        for topic in &self.topics {
            match session.subscribe(topic) {
                Ok(()) => info!(topic = %topic, "Subscribed"),
                Err(e) => error!(topic = %topic, "Failed subscribing: {}", e),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        let previous = *current;
        if previous != state {
            debug!(from = %previous, to = %state, "MQTT connection state changed");
            *current = state;
        }
    }

    fn is_terminated(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn is_listening(&self) -> bool {
        self.listen_task
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // a dropped sender counts as shutdown too
    let _ = shutdown.wait_for(|stop| *stop).await;
}
