//! Per-exchange streaming connection with channel multiplexing and automatic recovery.
//!
//! A [`ConnectionManager`] is a cheap handle; the socket, the subscription table and
//! the reconnect counters are owned by a single driver task that serializes every
//! event (commands, inbound frames, timers, network signals) through one
//! `tokio::select!` loop. No state is shared with the handle except the
//! statistics counters and the state/event channels.

use crate::core::config::ConnectionConfig;
use crate::core::errors::FeedError;
use crate::core::kernel::codec::{Inbound, WsCodec};
use crate::core::kernel::repair::parse_frame;
use crate::core::kernel::ws::WsSession;
use crate::core::traits::FrameHandler;
use crate::core::types::{ChannelMessage, ConnectionState, ConnectionStats, FeedEvent, Frame};
use crate::resilience::analytics::{ErrorAnalytics, ReportOptions};
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::stream::backoff::ReconnectPolicy;
use crate::stream::heartbeat::{HealthVerdict, HeartbeatMonitor};
use crate::stream::network::{NetworkMonitor, NetworkWatch};
use crate::stream::subscriptions::{HandlerId, SubscriptionTable};
use chrono::Utc;
use parking_lot::Mutex;
use std::any::Any;
use std::future::pending;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, trace, warn};

enum Command {
    Connect {
        reply: oneshot::Sender<ConnectionState>,
    },
    Subscribe {
        channel: String,
        id: HandlerId,
        handler: Arc<dyn FrameHandler>,
        reply: oneshot::Sender<()>,
    },
    Unsubscribe {
        channel: String,
        handler: Option<HandlerId>,
        reply: Option<oneshot::Sender<bool>>,
    },
    Reconnect {
        force: bool,
    },
    Channels {
        reply: oneshot::Sender<Vec<String>>,
    },
    Close {
        reply: Option<oneshot::Sender<()>>,
    },
}

/// Handle returned by [`ConnectionManager::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    id: HandlerId,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Remove this handler. Best effort: a closed manager is not an error.
    pub fn unsubscribe(self) {
        let _ = self.commands.send(Command::Unsubscribe {
            channel: self.channel,
            handler: Some(self.id),
            reply: None,
        });
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect { .. } => "Connect",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::Reconnect { .. } => "Reconnect",
            Self::Channels { .. } => "Channels",
            Self::Close { .. } => "Close",
        };
        f.write_str(name)
    }
}

/// Builder wiring a session and codec into a running [`ConnectionManager`]
pub struct ConnectionManagerBuilder<S: WsSession, C: WsCodec> {
    exchange: String,
    url: String,
    config: ConnectionConfig,
    codec: C,
    session: S,
    network: Option<Arc<NetworkMonitor>>,
    analytics: Option<Arc<ErrorAnalytics>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
}

impl<S: WsSession, C: WsCodec> ConnectionManagerBuilder<S, C> {
    pub fn new(
        exchange: impl Into<String>,
        url: impl Into<String>,
        config: ConnectionConfig,
        codec: C,
        session: S,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            url: url.into(),
            config,
            codec,
            session,
            network: None,
            analytics: None,
            breakers: None,
        }
    }

    pub fn with_network(mut self, network: Arc<NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<ErrorAnalytics>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Gate connect attempts through the `ws:<exchange>` circuit
    pub fn with_circuit_breaker(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Start the driver task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> ConnectionManager {
        let exchange: Arc<str> = Arc::from(self.exchange.as_str());
        let network = self.network.unwrap_or_default();
        let analytics = self.analytics.unwrap_or_default();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(self.config.event_buffer.max(1));
        let stats = Arc::new(Mutex::new(ConnectionStats::default()));
        let now = Instant::now();

        let driver = Driver {
            source: format!("ws:{}", exchange),
            exchange: exchange.clone(),
            url: self.url,
            heartbeat: HeartbeatMonitor::new(&self.config, now),
            policy: ReconnectPolicy::from_config(&self.config),
            config: self.config,
            codec: self.codec,
            session: self.session,
            table: SubscriptionTable::new(),
            state: state_tx,
            events: events.clone(),
            stats: stats.clone(),
            analytics,
            breakers: self.breakers,
            network: network.watch(),
            wanted: false,
            socket_open: false,
            reconnect_at: None,
            health: None,
        };

        let task = tokio::spawn(driver.run(command_rx));

        ConnectionManager {
            exchange,
            commands: command_tx,
            state: state_rx,
            events,
            network,
            stats,
            next_handler: AtomicU64::new(1),
            task: Some(task),
        }
    }
}

/// Handle to one exchange connection
#[derive(Debug)]
pub struct ConnectionManager {
    exchange: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<FeedEvent>,
    network: Arc<NetworkMonitor>,
    stats: Arc<Mutex<ConnectionStats>>,
    next_handler: AtomicU64,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Open the socket. Returns once the attempt finished; a failed attempt has
    /// already scheduled a reconnect.
    pub async fn connect(&self) -> Result<ConnectionState, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { reply })?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    /// Register `handler` for `channel`. Transport failures never surface here.
    pub async fn subscribe(
        &self,
        channel: impl Into<String>,
        handler: impl FrameHandler,
    ) -> Result<Subscription, FeedError> {
        let channel = channel.into();
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            channel: channel.clone(),
            id,
            handler: Arc::new(handler),
            reply,
        })?;
        rx.await.map_err(|_| FeedError::Closed)?;

        Ok(Subscription {
            channel,
            id,
            commands: self.commands.clone(),
        })
    }

    /// Remove one handler, or all of the channel's handlers when `handler` is `None`.
    /// Returns whether the channel has no handlers left.
    pub async fn unsubscribe(&self, channel: &str, handler: Option<HandlerId>) -> Result<bool, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unsubscribe {
            channel: channel.to_string(),
            handler,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    pub fn reconnect(&self, force: bool) -> Result<(), FeedError> {
        self.send(Command::Reconnect { force })
    }

    /// Connected and the network is reported available
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected && self.network.is_online()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    pub async fn subscribed_channels(&self) -> Result<Vec<String>, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Channels { reply })?;
        rx.await.map_err(|_| FeedError::Closed)
    }

    /// Close the socket and stop the driver
    pub async fn close(mut self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Close { reply: Some(reply) }).is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), FeedError> {
        self.commands.send(command).map_err(|_| FeedError::Closed)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close { reply: None });
    }
}

enum Step {
    Command(Option<Command>),
    Inbound(Option<Result<Message, FeedError>>),
    ReconnectDue,
    HealthTick,
    NetworkChanged,
    Foreground,
}

struct Driver<S: WsSession, C: WsCodec> {
    exchange: Arc<str>,
    /// Analytics source and circuit name
    source: String,
    url: String,
    config: ConnectionConfig,
    codec: C,
    session: S,
    table: SubscriptionTable,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatMonitor,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<FeedEvent>,
    stats: Arc<Mutex<ConnectionStats>>,
    analytics: Arc<ErrorAnalytics>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    network: NetworkWatch,
    /// `connect` was requested and `close` was not
    wanted: bool,
    socket_open: bool,
    reconnect_at: Option<Instant>,
    health: Option<Interval>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn changed<T>(rx: &mut watch::Receiver<T>) {
    if rx.changed().await.is_err() {
        pending::<()>().await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl<S: WsSession, C: WsCodec> Driver<S, C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!(exchange = %self.exchange, url = %self.url, "connection driver started");

        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                raw = self.session.next_raw(), if self.socket_open => Step::Inbound(raw),
                () = sleep_until_opt(self.reconnect_at) => Step::ReconnectDue,
                () = tick_opt(&mut self.health) => Step::HealthTick,
                () = changed(&mut self.network.online) => Step::NetworkChanged,
                () = changed(&mut self.network.foreground) => Step::Foreground,
            };

            match step {
                Step::Command(Some(command)) => {
                    if !self.on_command(command).await {
                        break;
                    }
                }
                Step::Command(None) => {
                    self.shutdown().await;
                    break;
                }
                Step::Inbound(raw) => {
                    self.on_inbound(raw).await;
                    if self.socket_open {
                        if let Err(err) = self.session.flush().await {
                            self.on_transport_lost(err.to_string()).await;
                        }
                    }
                }
                Step::ReconnectDue => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
                Step::HealthTick => self.on_health_tick().await,
                Step::NetworkChanged => self.on_network_changed().await,
                Step::Foreground => self.on_foreground().await,
            }
        }

        debug!(exchange = %self.exchange, "connection driver stopped");
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(exchange = %self.exchange, from = %previous, to = %next, "state transition");
        }
    }

    fn report(&self, error: &FeedError) {
        self.analytics
            .report_error(&self.source, error, ReportOptions::default());
    }

    /// Returns `false` once the driver must stop
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { reply } => {
                self.wanted = true;
                self.connect().await;
                let _ = reply.send(self.current_state());
            }
            Command::Subscribe {
                channel,
                id,
                handler,
                reply,
            } => {
                let first = self.table.add(&channel, id, handler);
                debug!(exchange = %self.exchange, channel = %channel, handler = %id, "handler registered");
                if first && self.current_state() == ConnectionState::Connected {
                    self.send_subscribe(&channel).await;
                }
                let _ = reply.send(());
            }
            Command::Unsubscribe {
                channel,
                handler,
                reply,
            } => {
                let emptied = self.table.remove(&channel, handler);
                if emptied && self.current_state() == ConnectionState::Connected {
                    self.send_unsubscribe(&channel).await;
                }
                if let Some(reply) = reply {
                    let _ = reply.send(self.table.handler_count(&channel) == 0);
                }
            }
            Command::Reconnect { force } => {
                self.wanted = true;
                self.reconnect(force).await;
            }
            Command::Channels { reply } => {
                let _ = reply.send(self.table.channels());
            }
            Command::Close { reply } => {
                self.shutdown().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                return false;
            }
        }
        true
    }

    #[instrument(skip(self), fields(exchange = %self.exchange, attempts = self.policy.attempts()))]
    async fn connect(&mut self) {
        if matches!(
            self.current_state(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return;
        }
        if !self.network.is_online() {
            debug!("offline, deferring connect");
            return;
        }
        self.reconnect_at = None;

        if let Some(breakers) = &self.breakers {
            if breakers.is_circuit_open(&self.source) {
                let err = FeedError::CircuitOpen {
                    name: self.source.clone(),
                };
                warn!("connect skipped: {}", err);
                self.report(&err);
                self.schedule_reconnect();
                return;
            }
        }

        self.set_state(ConnectionState::Connecting);
        let timeout = self.config.connect_timeout(self.policy.attempts());
        let result = match tokio::time::timeout(timeout, self.session.connect()).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout {
                operation: format!("connect {}", self.exchange),
                after: timeout,
            }),
        };

        match result {
            Ok(()) => self.on_open().await,
            Err(err) => {
                warn!(error = %err, "connect failed");
                if let Some(breakers) = &self.breakers {
                    breakers.record_failure(&self.source);
                }
                self.report(&err);
                self.reconnect(false).await;
            }
        }
    }

    async fn on_open(&mut self) {
        let now = Instant::now();
        self.policy.reset();
        self.heartbeat.reset(now);
        self.socket_open = true;
        self.set_state(ConnectionState::Connected);

        let tick = self.config.health_tick();
        let mut health = interval_at(now + tick, tick);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.health = Some(health);

        if let Some(breakers) = &self.breakers {
            breakers.record_success(&self.source);
        }
        {
            let mut stats = self.stats.lock();
            stats.connections += 1;
            stats.last_connected_at = Some(Utc::now());
        }

        let channels = self.table.channels();
        info!(exchange = %self.exchange, channels = channels.len(), "connected");
        for channel in &channels {
            self.send_subscribe(channel).await;
        }

        let _ = self.events.send(FeedEvent::Connected {
            exchange: self.exchange.clone(),
        });
    }

    async fn send_subscribe(&mut self, channel: &str) {
        let result = match self.codec.encode_subscribe(channel) {
            Ok(message) => self.session.send_raw(message).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => debug!(exchange = %self.exchange, channel, "subscribe sent"),
            Err(err) => {
                warn!(exchange = %self.exchange, channel, error = %err, "subscribe failed");
                self.report(&err);
            }
        }
    }

    async fn send_unsubscribe(&mut self, channel: &str) {
        let result = match self.codec.encode_unsubscribe(channel) {
            Ok(message) => self.session.send_raw(message).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            debug!(exchange = %self.exchange, channel, error = %err, "unsubscribe not delivered");
        }
    }

    /// Close the socket and stop health checks
    async fn teardown(&mut self, reason: &str) {
        let was_connected = self.current_state() == ConnectionState::Connected;
        if self.socket_open || self.session.is_connected() {
            let _ = self.session.close().await;
        }
        self.socket_open = false;
        self.health = None;
        self.set_state(ConnectionState::Disconnected);

        if was_connected {
            self.stats.lock().last_disconnected_at = Some(Utc::now());
            let _ = self.events.send(FeedEvent::Disconnected {
                exchange: self.exchange.clone(),
                reason: reason.to_string(),
            });
        }
    }

    async fn reconnect(&mut self, force: bool) {
        self.teardown(if force { "forced reconnect" } else { "reconnecting" })
            .await;
        if force {
            self.policy.reset();
            self.reconnect_at = None;
        }
        if !self.network.is_online() {
            info!(exchange = %self.exchange, "offline, reconnect deferred until network returns");
            self.reconnect_at = None;
            return;
        }
        self.schedule_reconnect();
    }

    /// Arm the single reconnect timer unless one is already pending
    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }
        let delay = self.policy.next_delay();
        self.reconnect_at = Some(Instant::now() + delay);
        self.stats.lock().reconnects_scheduled += 1;
        info!(
            exchange = %self.exchange,
            delay_ms = delay.as_millis() as u64,
            attempts = self.policy.attempts(),
            "reconnect scheduled"
        );
    }

    async fn on_transport_lost(&mut self, reason: String) {
        warn!(exchange = %self.exchange, reason = %reason, "transport lost");
        self.report(&FeedError::Transport(reason.clone()));
        self.teardown(&reason).await;
        if self.wanted {
            self.reconnect(false).await;
        }
    }

    async fn on_inbound(&mut self, raw: Option<Result<Message, FeedError>>) {
        match raw {
            Some(Ok(Message::Text(text))) => self.on_text(&text),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => self.on_text(&text),
                Err(e) => {
                    self.heartbeat.on_message(Instant::now());
                    self.stats.lock().malformed_frames += 1;
                    self.report(&FeedError::MalformedFrame {
                        reason: format!("binary frame is not UTF-8: {}", e),
                        offset: Some(e.utf8_error().valid_up_to()),
                    });
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map_or_else(
                    || "closed by peer".to_string(),
                    |f| format!("closed by peer: {} {}", u16::from(f.code), f.reason),
                );
                self.on_transport_lost(reason).await;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                self.heartbeat.on_message(Instant::now());
                self.stats.lock().control_frames += 1;
                trace!(exchange = %self.exchange, "control frame");
            }
            Some(Ok(_)) => self.heartbeat.on_message(Instant::now()),
            Some(Err(err)) => self.on_transport_lost(err.to_string()).await,
            None => self.on_transport_lost("stream ended".to_string()).await,
        }
    }

    fn on_text(&mut self, text: &str) {
        self.heartbeat.on_message(Instant::now());
        self.stats.lock().messages_received += 1;

        let inbound = match self.codec.classify_raw(text) {
            Some(inbound) => inbound,
            None => match parse_frame(text) {
                Ok((value, repaired)) => {
                    if repaired {
                        self.stats.lock().repaired_frames += 1;
                        debug!(exchange = %self.exchange, "truncated frame repaired");
                    }
                    match self.codec.decode(&value) {
                        Ok(inbound) => inbound,
                        Err(err) => {
                            self.report(&err);
                            return;
                        }
                    }
                }
                Err(err) => {
                    self.stats.lock().malformed_frames += 1;
                    self.report(&err);
                    return;
                }
            },
        };

        match inbound {
            Inbound::Data { channel, frame } => self.dispatch(channel, frame),
            Inbound::HeartbeatAck => trace!(exchange = %self.exchange, "heartbeat ack"),
            Inbound::Ack { channel } => {
                debug!(exchange = %self.exchange, channel = ?channel, "subscription acknowledged");
            }
            Inbound::Rejected { reason } => {
                warn!(exchange = %self.exchange, reason = %reason, "request rejected");
                self.report(&FeedError::fatal(format!("rejected by exchange: {}", reason)));
            }
            Inbound::Ignored => {}
        }
    }

    fn dispatch(&mut self, channel: String, frame: Frame) {
        let handlers = match self.table.handlers(&channel) {
            Some(handlers) => handlers.to_vec(),
            None => {
                trace!(exchange = %self.exchange, channel = %channel, "no handlers for channel");
                return;
            }
        };

        let kind = frame.kind();
        let message = ChannelMessage {
            exchange: self.exchange.clone(),
            channel,
            frame,
            received_at: Utc::now(),
        };

        for (id, handler) in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_frame(&message)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{:#}", err)),
                Err(payload) => Some(format!("panic: {}", panic_message(payload.as_ref()))),
            };
            if let Some(reason) = failure {
                warn!(exchange = %self.exchange, channel = %message.channel, handler = %id, reason = %reason, "handler failed");
                self.stats.lock().handler_failures += 1;
                self.report(&FeedError::Handler {
                    channel: message.channel.clone(),
                    message: reason,
                });
            }
        }

        self.stats.lock().frames_dispatched += 1;
        let _ = self.events.send(FeedEvent::Message {
            exchange: self.exchange.clone(),
            channel: message.channel,
            kind,
        });
    }

    async fn on_health_tick(&mut self) {
        if self.current_state() != ConnectionState::Connected {
            return;
        }
        match self.heartbeat.check(Instant::now()) {
            HealthVerdict::Healthy => {}
            HealthVerdict::SendPing => self.send_ping().await,
            HealthVerdict::Dead { idle } => {
                warn!(
                    exchange = %self.exchange,
                    idle_ms = idle.as_millis() as u64,
                    "no traffic, forcing reconnect"
                );
                self.report(&FeedError::Timeout {
                    operation: format!("heartbeat {}", self.exchange),
                    after: idle,
                });
                self.reconnect(true).await;
            }
        }
    }

    async fn send_ping(&mut self) {
        let Some(ping) = self.codec.encode_ping() else {
            return;
        };
        match self.session.send_raw(ping).await {
            Ok(()) => self.stats.lock().pings_sent += 1,
            Err(err) => self.on_transport_lost(err.to_string()).await,
        }
    }

    async fn on_network_changed(&mut self) {
        let online = *self.network.online.borrow_and_update();
        if online {
            if self.wanted {
                info!(exchange = %self.exchange, "network available, reconnecting now");
                self.reconnect_at = None;
                self.policy.reset();
                self.connect().await;
            }
        } else {
            info!(exchange = %self.exchange, "network unavailable, closing socket");
            self.reconnect_at = None;
            self.teardown("network unavailable").await;
        }
    }

    async fn on_foreground(&mut self) {
        self.network.foreground.borrow_and_update();
        if !self.wanted {
            return;
        }
        if self.current_state() == ConnectionState::Connected {
            match self.heartbeat.check(Instant::now()) {
                HealthVerdict::Dead { .. } => self.reconnect(true).await,
                HealthVerdict::Healthy | HealthVerdict::SendPing => self.send_ping().await,
            }
        } else {
            debug!(exchange = %self.exchange, "foregrounded while disconnected, connecting now");
            self.reconnect_at = None;
            self.policy.reset();
            self.connect().await;
        }
    }

    async fn shutdown(&mut self) {
        self.wanted = false;
        self.reconnect_at = None;
        self.set_state(ConnectionState::Closing);
        if self.socket_open || self.session.is_connected() {
            let _ = self.session.close().await;
        }
        self.socket_open = false;
        self.health = None;
        self.set_state(ConnectionState::Disconnected);
        info!(exchange = %self.exchange, "connection closed");
    }
}
