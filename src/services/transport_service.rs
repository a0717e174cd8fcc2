//! Push channel: one STOMP session over a socket, kept alive across failures.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::{Mutex, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until, timeout},
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::{
    dto::{
        frame::{Command, Frame, HEARTBEAT_EOL, HeartBeat, NegotiatedHeartBeat},
        payload::{MatchId, UpdateSource},
    },
    error::TransportError,
    services::{
        normalizer::normalize_message,
        socket::{FrameSocket, SocketConnector},
    },
    state::EngineHandle,
};

/// Default delay between a failed session and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Tunables of the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Prefix of the per-match destination, e.g. `/topic/`.
    pub topic_prefix: String,
    /// Value of the CONNECT `host` header.
    pub host: String,
    /// Heart-beat intervals offered in CONNECT.
    pub heartbeat: HeartBeat,
    /// Pause between a failed session and the next attempt.
    pub reconnect_delay: Duration,
    /// Maximum wait for CONNECTED after the socket opened.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "/topic/".into(),
            host: "/".into(),
            heartbeat: HeartBeat::from_millis(10_000, 10_000),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session is running.
    #[default]
    Disconnected,
    /// Socket or handshake in progress.
    Connecting,
    /// Subscribed and receiving.
    Connected,
    /// The last session failed; a reconnect is scheduled.
    Error,
}

/// Subscription of the current session to its match topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Client-chosen subscription id (`sub-<uuid>`).
    pub id: String,
    /// Topic the subscription listens on.
    pub destination: String,
    /// Match the topic belongs to.
    pub match_id: MatchId,
}

impl SubscriptionHandle {
    fn new(topic_prefix: &str, match_id: MatchId) -> Self {
        let separator = if topic_prefix.ends_with('/') { "" } else { "/" };
        Self {
            id: format!("sub-{}", Uuid::new_v4()),
            destination: format!("{topic_prefix}{separator}match/{match_id}"),
            match_id,
        }
    }
}

/// State shared between the [`Transport`] facade and its session task.
struct SessionContext {
    connector: Arc<dyn SocketConnector>,
    engine: EngineHandle,
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    subscription: watch::Sender<Option<SubscriptionHandle>>,
}

impl SessionContext {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            trace!(from = ?*current, to = ?next, "connection state changed");
            *current = next;
            true
        });
    }

    fn set_subscription(&self, subscription: Option<SubscriptionHandle>) {
        self.subscription.send_replace(subscription);
    }
}

struct ActiveSession {
    match_id: MatchId,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Push-channel client bound to at most one match at a time.
///
/// The session runs in its own task; the connection state is published on a
/// `watch` channel so the polling source can react to it.
pub struct Transport {
    ctx: Arc<SessionContext>,
    session: Mutex<Option<ActiveSession>>,
}

impl Transport {
    /// Idle transport; nothing is opened until [`Transport::connect`].
    pub fn new(
        connector: Arc<dyn SocketConnector>,
        engine: EngineHandle,
        config: TransportConfig,
    ) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        let (subscription, _rx) = watch::channel(None);
        Self {
            ctx: Arc::new(SessionContext {
                connector,
                engine,
                config,
                state,
                subscription,
            }),
            session: Mutex::new(None),
        }
    }

    /// Target `match_id`, replacing any other session.
    ///
    /// Does nothing when already connected to the same match.
    pub async fn connect(&self, match_id: MatchId) {
        let mut session = self.session.lock().await;

        if let Some(active) = session.as_ref()
            && active.match_id == match_id
            && self.connection_state() == ConnectionState::Connected
        {
            debug!(%match_id, "push channel already connected");
            return;
        }

        if let Some(active) = session.take() {
            self.stop(active).await;
        }

        info!(%match_id, "opening push channel");
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(self.ctx.clone(), match_id, shutdown_rx));
        *session = Some(ActiveSession {
            match_id,
            shutdown,
            task,
        });
    }

    /// Tear the session down and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        let active = self.session.lock().await.take();
        if let Some(active) = active {
            self.stop(active).await;
        }
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.ctx.state.borrow()
    }

    /// Observe connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state.subscribe()
    }

    /// Subscription of the live session, if any.
    pub fn subscription(&self) -> Option<SubscriptionHandle> {
        self.ctx.subscription.borrow().clone()
    }

    /// Match the transport is currently bound to.
    pub async fn target(&self) -> Option<MatchId> {
        self.session.lock().await.as_ref().map(|active| active.match_id)
    }

    async fn stop(&self, active: ActiveSession) {
        let ActiveSession {
            match_id,
            shutdown,
            mut task,
        } = active;

        let _ = shutdown.send(());
        if timeout(TEARDOWN_TIMEOUT, &mut task).await.is_err() {
            warn!(%match_id, "push session did not stop in time; aborting");
            task.abort();
        }

        self.ctx.set_subscription(None);
        self.ctx.set_state(ConnectionState::Disconnected);
        info!(%match_id, "push channel closed");
    }
}

/// Reconnect loop of one targeted match. Ends only on shutdown.
async fn run_session(
    ctx: Arc<SessionContext>,
    match_id: MatchId,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        ctx.set_state(ConnectionState::Connecting);

        match connect_and_serve(&ctx, match_id, &mut shutdown).await {
            Ok(()) => break,
            Err(err) => {
                ctx.set_subscription(None);
                ctx.set_state(ConnectionState::Error);
                warn!(
                    %match_id,
                    error = %err,
                    retry_in = ?ctx.config.reconnect_delay,
                    "push session failed"
                );
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            _ = sleep(ctx.config.reconnect_delay) => {}
        }
    }

    ctx.set_subscription(None);
    ctx.set_state(ConnectionState::Disconnected);
}

/// One session: open, handshake, subscribe, serve. `Ok` means a requested shutdown.
async fn connect_and_serve(
    ctx: &SessionContext,
    match_id: MatchId,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<(), TransportError> {
    let mut socket = tokio::select! {
        _ = &mut *shutdown => return Ok(()),
        socket = ctx.connector.connect() => socket?,
    };

    let handshake = async {
        socket
            .send(Frame::connect(&ctx.config.host, ctx.config.heartbeat).encode())
            .await?;
        timeout(ctx.config.handshake_timeout, await_connected(socket.as_mut()))
            .await
            .map_err(|_| TransportError::HandshakeTimeout(ctx.config.handshake_timeout))?
    };
    let connected = tokio::select! {
        _ = &mut *shutdown => {
            let _ = socket.close().await;
            return Ok(());
        }
        connected = handshake => connected,
    };
    let connected = match connected {
        Ok(frame) => frame,
        Err(err) => {
            let _ = socket.close().await;
            return Err(err);
        }
    };

    let server_beat = connected
        .header("heart-beat")
        .and_then(HeartBeat::parse)
        .unwrap_or_default();
    let schedule = ctx.config.heartbeat.negotiate(&server_beat);

    let subscription = SubscriptionHandle::new(&ctx.config.topic_prefix, match_id);
    ctx.set_state(ConnectionState::Connected);
    if let Err(err) = socket
        .send(Frame::subscribe(&subscription.id, &subscription.destination).encode())
        .await
    {
        let _ = socket.close().await;
        return Err(err);
    }
    info!(
        %match_id,
        destination = %subscription.destination,
        version = connected.header("version").unwrap_or("1.0"),
        "push channel subscribed"
    );
    ctx.set_subscription(Some(subscription.clone()));

    match serve(ctx, match_id, socket.as_mut(), schedule, shutdown).await {
        Ok(()) => {
            teardown(socket.as_mut(), &subscription).await;
            Ok(())
        }
        Err(err) => {
            let _ = socket.close().await;
            Err(err)
        }
    }
}

async fn await_connected(socket: &mut dyn FrameSocket) -> Result<Frame, TransportError> {
    loop {
        let raw = socket.recv().await.ok_or(TransportError::Closed)??;
        if Frame::is_heartbeat(&raw) {
            continue;
        }

        let frame = match Frame::decode(&raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame during handshake");
                continue;
            }
        };
        match frame.command {
            Command::Connected => return Ok(frame),
            Command::Error => return Err(broker_error(&frame)),
            ref other => debug!(command = %other, "ignoring frame before CONNECTED"),
        }
    }
}

async fn serve(
    ctx: &SessionContext,
    match_id: MatchId,
    socket: &mut dyn FrameSocket,
    schedule: NegotiatedHeartBeat,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<(), TransportError> {
    let mut outgoing = schedule.send_every.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let silence_limit = schedule.expect_every.map(|every| every * 2);
    let mut last_inbound = Instant::now();

    loop {
        let deadline = silence_limit.map(|limit| last_inbound + limit);

        tokio::select! {
            _ = &mut *shutdown => return Ok(()),
            inbound = socket.recv() => {
                let raw = inbound.ok_or(TransportError::Closed)??;
                last_inbound = Instant::now();
                handle_inbound(ctx, match_id, &raw).await?;
            }
            _ = tick(&mut outgoing) => {
                socket.send(HEARTBEAT_EOL.to_string()).await?;
            }
            _ = silence(deadline) => {
                return Err(TransportError::HeartbeatTimeout(silence_limit.unwrap_or_default()));
            }
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn silence(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Dispatch one inbound text message. Only broker errors end the session.
async fn handle_inbound(
    ctx: &SessionContext,
    match_id: MatchId,
    raw: &str,
) -> Result<(), TransportError> {
    if Frame::is_heartbeat(raw) {
        trace!("heart-beat received");
        return Ok(());
    }

    let frame = match Frame::decode(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%match_id, error = %err, "dropping undecodable frame");
            return Ok(());
        }
    };

    match frame.command {
        Command::Message => match normalize_message(&frame.body, UpdateSource::Push) {
            Ok(event) => {
                if let Err(err) = ctx.engine.submit(match_id, event).await {
                    warn!(%match_id, error = %err, "engine unavailable; dropping push update");
                }
            }
            Err(err) => warn!(%match_id, error = %err, "dropping unusable push message"),
        },
        Command::Error => return Err(broker_error(&frame)),
        Command::Receipt => trace!(receipt = frame.header("receipt-id"), "receipt received"),
        ref other => debug!(command = %other, "ignoring unexpected frame"),
    }
    Ok(())
}

async fn teardown(socket: &mut dyn FrameSocket, subscription: &SubscriptionHandle) {
    for frame in [Frame::unsubscribe(&subscription.id), Frame::disconnect()] {
        if let Err(err) = socket.send(frame.encode()).await {
            debug!(error = %err, command = %frame.command, "teardown frame not delivered");
            break;
        }
    }
    if let Err(err) = socket.close().await {
        debug!(error = %err, "socket close failed");
    }
}

fn broker_error(frame: &Frame) -> TransportError {
    let message = frame
        .header("message")
        .map(str::to_owned)
        .unwrap_or_else(|| frame.body.trim().to_owned());
    TransportError::Broker { message }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sockets scripted from the test body.

    use std::{
        collections::VecDeque,
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use futures::{FutureExt, future::BoxFuture};
    use tokio::sync::mpsc;

    use super::*;

    pub struct ScriptedSocket {
        inbound: mpsc::UnboundedReceiver<Result<String, TransportError>>,
        outbound: mpsc::UnboundedSender<String>,
    }

    impl FrameSocket for ScriptedSocket {
        fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
            let result = self
                .outbound
                .send(text)
                .map_err(|_| TransportError::Closed);
            async move { result }.boxed()
        }

        fn recv(&mut self) -> BoxFuture<'_, Option<Result<String, TransportError>>> {
            self.inbound.recv().boxed()
        }

        fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
            self.inbound.close();
            async { Ok(()) }.boxed()
        }
    }

    /// Server side of a [`ScriptedSocket`].
    pub struct ServerEnd {
        to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl ServerEnd {
        pub fn send(&self, frame: Frame) {
            self.send_raw(frame.encode());
        }

        pub fn send_raw(&self, raw: impl Into<String>) {
            let _ = self.to_client.send(Ok(raw.into()));
        }

        /// Next raw message from the client, heart-beats included.
        pub async fn next_raw(&mut self) -> String {
            self.from_client
                .recv()
                .await
                .expect("client side dropped")
        }

        /// Next non-heart-beat frame, which must carry `command`.
        pub async fn expect(&mut self, command: Command) -> Frame {
            loop {
                let raw = self.next_raw().await;
                if Frame::is_heartbeat(&raw) {
                    continue;
                }
                let frame = Frame::decode(&raw).expect("client sent an invalid frame");
                assert_eq!(frame.command, command, "unexpected frame {frame:?}");
                return frame;
            }
        }
    }

    pub fn pair() -> (Box<dyn FrameSocket>, ServerEnd) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        (
            Box::new(ScriptedSocket { inbound, outbound }),
            ServerEnd {
                to_client,
                from_client,
            },
        )
    }

    /// Hands out queued sockets; fails once the queue is empty.
    #[derive(Default)]
    pub struct ScriptedConnector {
        sockets: StdMutex<VecDeque<Result<Box<dyn FrameSocket>, TransportError>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedConnector {
        pub fn new(sockets: Vec<Result<Box<dyn FrameSocket>, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                sockets: StdMutex::new(sockets.into()),
                attempts: AtomicUsize::new(0),
            })
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl SocketConnector for ScriptedConnector {
        fn connect(&self) -> BoxFuture<'static, Result<Box<dyn FrameSocket>, TransportError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.sockets.lock().unwrap().pop_front();
            let result = next.unwrap_or_else(|| Err(TransportError::Closed));
            async move { result }.boxed()
        }
    }

    pub fn connected(heart_beat: &str) -> Frame {
        Frame::new(Command::Connected)
            .with_header("version", "1.2")
            .with_header("heart-beat", heart_beat)
    }

    pub fn message(body: &str) -> Frame {
        Frame::new(Command::Message)
            .with_header("subscription", "sub-0")
            .with_header("destination", "/topic/match/0")
            .with_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::*, *};
    use crate::state::{
        ManualClock, MatchEvent, ReconcilePolicy, ReconciliationEngine, ScoreHub, ScoreState,
    };

    async fn active_engine(match_id: MatchId) -> EngineHandle {
        let engine = ReconciliationEngine::new(
            ScoreState::default(),
            ReconcilePolicy::default(),
            Arc::new(ManualClock::new()),
        );
        let (handle, _task) = EngineHandle::spawn(engine, Arc::new(ScoreHub::new(16)), 16);
        handle.activate(match_id, ScoreState::default()).await.unwrap();
        handle
    }

    async fn wait_for_state(transport: &Transport, expected: ConnectionState) {
        transport
            .watch_state()
            .wait_for(|state| *state == expected)
            .await
            .unwrap();
    }

    async fn handshake(server: &mut ServerEnd, heart_beat: &str) -> Frame {
        server.expect(Command::Connect).await;
        server.send(connected(heart_beat));
        server.expect(Command::Subscribe).await
    }

    #[tokio::test]
    async fn handshake_subscribes_and_forwards_messages() {
        let (socket, mut server) = pair();
        let connector = ScriptedConnector::new(vec![Ok(socket)]);
        let engine = active_engine(MatchId(42)).await;
        let mut events = engine.hub().subscribe();
        let transport = Transport::new(connector, engine, TransportConfig::default());

        transport.connect(MatchId(42)).await;
        let connect = server.expect(Command::Connect).await;
        assert_eq!(connect.header("accept-version"), Some("1.1,1.2"));
        assert_eq!(connect.header("heart-beat"), Some("10000,10000"));

        server.send(connected("0,0"));
        let subscribe = server.expect(Command::Subscribe).await;
        assert_eq!(subscribe.header("destination"), Some("/topic/match/42"));
        let id = subscribe.header("id").unwrap().to_string();
        assert!(id.starts_with("sub-"));

        wait_for_state(&transport, ConnectionState::Connected).await;
        server.send(message(r#"{"eventType":"POINT","team1Score":3,"team2Score":1}"#));
        match events.recv().await.unwrap() {
            MatchEvent::ScoreChanged(snapshot) => {
                assert_eq!(snapshot.state.team1_score, 3);
                assert_eq!(snapshot.state.team2_score, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let handle = transport.subscription().unwrap();
        assert_eq!(handle.id, id);
        assert_eq!(handle.match_id, MatchId(42));

        transport.disconnect().await;
        let unsubscribe = server.expect(Command::Unsubscribe).await;
        assert_eq!(unsubscribe.header("id"), Some(id.as_str()));
        server.expect(Command::Disconnect).await;
        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
        assert!(transport.subscription().is_none());
        assert_eq!(transport.target().await, None);
    }

    #[tokio::test]
    async fn undecodable_frames_are_dropped() {
        let (socket, mut server) = pair();
        let engine = active_engine(MatchId(1)).await;
        let mut events = engine.hub().subscribe();
        let transport = Transport::new(
            ScriptedConnector::new(vec![Ok(socket)]),
            engine,
            TransportConfig::default(),
        );

        transport.connect(MatchId(1)).await;
        handshake(&mut server, "0,0").await;
        wait_for_state(&transport, ConnectionState::Connected).await;

        server.send_raw("MESSAGE\ndestination:/topic/match/1{\"team1Score\":9}\0");
        server.send(message("not json"));
        server.send_raw("\n");
        server.send(message(r#"{"type":"SCORE_UPDATE","scoreA":1,"scoreB":0}"#));

        match events.recv().await.unwrap() {
            MatchEvent::ScoreChanged(snapshot) => assert_eq!(snapshot.state.team1_score, 1),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(transport.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_socket_loss() {
        let (first, mut server1) = pair();
        let (second, mut server2) = pair();
        let connector = ScriptedConnector::new(vec![Ok(first), Ok(second)]);
        let transport = Transport::new(
            connector.clone(),
            active_engine(MatchId(5)).await,
            TransportConfig::default(),
        );

        transport.connect(MatchId(5)).await;
        handshake(&mut server1, "0,0").await;
        wait_for_state(&transport, ConnectionState::Connected).await;

        let lost_at = Instant::now();
        drop(server1);
        wait_for_state(&transport, ConnectionState::Error).await;
        assert!(transport.subscription().is_none());

        server2.expect(Command::Connect).await;
        assert!(lost_at.elapsed() >= DEFAULT_RECONNECT_DELAY);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn broker_error_triggers_reconnect() {
        let (first, mut server1) = pair();
        let (second, mut server2) = pair();
        let transport = Transport::new(
            ScriptedConnector::new(vec![Ok(first), Ok(second)]),
            active_engine(MatchId(5)).await,
            TransportConfig::default(),
        );

        transport.connect(MatchId(5)).await;
        handshake(&mut server1, "0,0").await;
        server1.send(
            Frame::new(Command::Error)
                .with_header("message", "subscription denied")
                .with_body("details"),
        );

        wait_for_state(&transport, ConnectionState::Error).await;
        handshake(&mut server2, "0,0").await;
        wait_for_state(&transport, ConnectionState::Connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_is_retried() {
        let (socket, mut server) = pair();
        let connector = ScriptedConnector::new(vec![Err(TransportError::Closed), Ok(socket)]);
        let transport = Transport::new(
            connector.clone(),
            active_engine(MatchId(3)).await,
            TransportConfig::default(),
        );

        transport.connect(MatchId(3)).await;
        handshake(&mut server, "0,0").await;
        wait_for_state(&transport, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_are_sent_and_silence_fails_the_session() {
        let (socket, mut server) = pair();
        let transport = Transport::new(
            ScriptedConnector::new(vec![Ok(socket)]),
            active_engine(MatchId(2)).await,
            TransportConfig::default(),
        );

        transport.connect(MatchId(2)).await;
        handshake(&mut server, "10000,10000").await;
        wait_for_state(&transport, ConnectionState::Connected).await;
        let connected_at = Instant::now();

        assert_eq!(server.next_raw().await, HEARTBEAT_EOL);
        assert!(connected_at.elapsed() >= Duration::from_secs(10));

        wait_for_state(&transport, ConnectionState::Error).await;
        assert!(connected_at.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_times_out_without_connected() {
        let (socket, mut server) = pair();
        let transport = Transport::new(
            ScriptedConnector::new(vec![Ok(socket)]),
            active_engine(MatchId(2)).await,
            TransportConfig::default(),
        );

        transport.connect(MatchId(2)).await;
        server.expect(Command::Connect).await;
        let started = Instant::now();

        wait_for_state(&transport, ConnectionState::Error).await;
        assert!(started.elapsed() >= HANDSHAKE_TIMEOUT);
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_retargets() {
        let (first, mut server1) = pair();
        let (second, mut server2) = pair();
        let connector = ScriptedConnector::new(vec![Ok(first), Ok(second)]);
        let transport = Transport::new(
            connector.clone(),
            active_engine(MatchId(7)).await,
            TransportConfig::default(),
        );

        transport.connect(MatchId(7)).await;
        handshake(&mut server1, "0,0").await;
        wait_for_state(&transport, ConnectionState::Connected).await;

        transport.connect(MatchId(7)).await;
        assert_eq!(connector.attempts(), 1);

        transport.connect(MatchId(8)).await;
        server1.expect(Command::Unsubscribe).await;
        server1.expect(Command::Disconnect).await;
        let subscribe = handshake(&mut server2, "0,0").await;
        assert_eq!(subscribe.header("destination"), Some("/topic/match/8"));
        assert_eq!(transport.target().await, Some(MatchId(8)));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let connector = ScriptedConnector::new(vec![]);
        let transport = Transport::new(
            connector.clone(),
            active_engine(MatchId(4)).await,
            TransportConfig::default(),
        );

        transport.connect(MatchId(4)).await;
        wait_for_state(&transport, ConnectionState::Error).await;
        transport.disconnect().await;

        tokio::time::sleep(DEFAULT_RECONNECT_DELAY * 3).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn destination_joins_prefix() {
        let handle = SubscriptionHandle::new("/topic", MatchId(3));
        assert_eq!(handle.destination, "/topic/match/3");
    }
}
