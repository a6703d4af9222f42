use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use penny_protocol::gateway::{Hello, Ready, UpdateVoiceState};
use penny_protocol::{GatewayEvent, GatewayFrame};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::dispatcher;
use crate::config::GatewayConfig;
use crate::error::SdkError;
use crate::heartbeat::{AckHandle, HeartbeatMonitor};
use crate::lock;
use crate::network::{transport, FrameReader, FrameSender, RestApi};
use crate::voice::{
    JoinSlots, PhaseReporter, VoiceJoin, VoiceJoinContext, VoicePhase, VoiceSession,
};

/// Lifecycle of a gateway session. `Disconnected` is both the starting and
/// the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Disconnected,
    /// Socket open, Hello received.
    Connected,
    /// Identify sent, waiting for Ready.
    Identified,
    Active,
}

/// Cancellation scope shared by every task of one gateway session.
#[derive(Clone)]
pub(crate) struct SessionScope {
    pub(crate) cancel: CancellationToken,
    state: Arc<watch::Sender<GatewayState>>,
    closing: Arc<AtomicBool>,
}

impl SessionScope {
    fn new() -> Self {
        let (state, _rx) = watch::channel(GatewayState::Disconnected);
        Self {
            cancel: CancellationToken::new(),
            state: Arc::new(state),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish `state` unless the session is already shutting down.
    fn set_state(&self, state: GatewayState) {
        self.state.send_if_modified(|current| {
            if self.closing.load(Ordering::SeqCst) || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Tear the session down. Only the first call has any effect.
    pub(crate) fn shutdown(&self, reason: &str) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[Gateway] Disconnecting: {}", reason);
        self.state.send_replace(GatewayState::Disconnected);
        self.cancel.cancel();
    }
}

/// Join in progress; the dispatcher fills its slots.
pub(crate) struct PendingJoin {
    pub(crate) id: u64,
    pub(crate) guild_id: String,
    pub(crate) slots: JoinSlots,
    /// Cancelled by `leave_voice` to abort the handshake.
    pub(crate) cancel: CancellationToken,
}

/// State shared between the public handle, the dispatch loop and the
/// interaction tasks.
pub(crate) struct GatewayInner {
    pub(crate) config: GatewayConfig,
    pub(crate) api: Arc<dyn RestApi>,
    pub(crate) scope: SessionScope,
    pub(crate) sender: FrameSender,
    pub(crate) acks: AckHandle,
    pub(crate) last_sequence: Arc<Mutex<Option<u64>>>,
    pub(crate) user_id: String,
    session_id: String,
    pub(crate) pending_join: Mutex<Option<PendingJoin>>,
    join_ids: AtomicU64,
    voice: Mutex<Option<Arc<VoiceSession>>>,
    phase: PhaseReporter,
}

/// Clears the pending join however the join ends, unless a leave already
/// took it and a newer join has replaced it.
struct PendingJoinGuard<'a> {
    inner: &'a GatewayInner,
    id: u64,
}

impl Drop for PendingJoinGuard<'_> {
    fn drop(&mut self) {
        let mut pending = lock(&self.inner.pending_join);
        if pending.as_ref().is_some_and(|join| join.id == self.id) {
            pending.take();
        }
    }
}

impl GatewayInner {
    pub(crate) async fn join_voice(
        self: &Arc<Self>,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<VoiceJoinContext, SdkError> {
        if self.scope.cancel.is_cancelled() {
            return Err(SdkError::Disconnected);
        }

        let slots = JoinSlots::default();
        let cancel = self.scope.cancel.child_token();
        let id = self.join_ids.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = lock(&self.pending_join);
            if pending.is_some() {
                return Err(SdkError::JoinInProgress);
            }
            *pending = Some(PendingJoin {
                id,
                guild_id: guild_id.to_string(),
                slots: slots.clone(),
                cancel: cancel.clone(),
            });
        }
        let _pending = PendingJoinGuard { inner: self, id };

        if let Some(previous) = lock(&self.voice).take() {
            previous.disconnect();
        }
        let phase = self.phase.next_attempt();

        let update = GatewayFrame::voice_state_update(&UpdateVoiceState {
            guild_id: guild_id.to_string(),
            channel_id: Some(channel_id.to_string()),
            self_mute: false,
            self_deaf: false,
        })?;
        self.sender.send_text(update.encode()?).await?;
        info!(guild_id, channel_id, "[Gateway] Requested voice join");

        let join = VoiceJoin {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            user_id: self.user_id.clone(),
            slots,
        };
        let session = VoiceSession::establish(
            join,
            &self.config,
            phase,
            cancel.clone(),
            self.scope.cancel.clone(),
        )
        .await?;
        if cancel.is_cancelled() {
            return Err(SdkError::Disconnected);
        }

        let context = session.context().clone();
        *lock(&self.voice) = Some(Arc::new(session));
        Ok(context)
    }

    /// Cancel the join in progress for `guild_id`, if any.
    pub(crate) fn abort_pending_join(&self, guild_id: &str) {
        let join = {
            let mut pending = lock(&self.pending_join);
            if pending.as_ref().is_some_and(|join| join.guild_id == guild_id) {
                pending.take()
            } else {
                None
            }
        };
        if let Some(join) = join {
            debug!(guild_id, "[Gateway] Aborting pending voice join");
            join.cancel.cancel();
        }
    }
}

/// A gateway connection that has received Hello but not yet identified.
pub struct GatewayHandshake {
    config: GatewayConfig,
    api: Arc<dyn RestApi>,
    scope: SessionScope,
    sender: FrameSender,
    reader: FrameReader,
    hello: Hello,
}

impl GatewayHandshake {
    /// Look up the gateway URL, open the socket and read Hello.
    ///
    /// # Errors
    /// Fails with [`SdkError::ProtocolViolation`] if the first frame is not
    /// Hello, or [`SdkError::HandshakeTimeout`] if none arrives in time.
    pub async fn connect(config: GatewayConfig, api: Arc<dyn RestApi>) -> Result<Self, SdkError> {
        let url = config.gateway_url(&api.gateway_url().await?);
        let scope = SessionScope::new();

        let (sender, mut reader) =
            transport::connect("Gateway", &url, config.step_timeout(), scope.cancel.clone()).await?;
        scope.set_state(GatewayState::Connected);

        let hello = match read_hello(&mut reader, config.step_timeout()).await {
            Ok(hello) => hello,
            Err(e) => {
                scope.shutdown("no Hello");
                return Err(e);
            }
        };
        info!("[Gateway] Hello, heartbeat every {}ms", hello.heartbeat_interval);

        Ok(Self {
            config,
            api,
            scope,
            sender,
            reader,
            hello,
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.hello.heartbeat_interval)
    }

    pub fn state(&self) -> GatewayState {
        *self.scope.state.borrow()
    }

    /// Start heartbeating, identify, wait for Ready and hand the socket to
    /// the dispatch loop.
    pub async fn identify(self) -> Result<GatewaySession, SdkError> {
        let Self {
            config,
            api,
            scope,
            sender,
            mut reader,
            hello,
        } = self;

        let acks = AckHandle::default();
        let last_sequence = Arc::new(Mutex::new(None));
        spawn_heartbeat(&config, &hello, &sender, &acks, &last_sequence, &scope);

        let identified =
            identify(&config, &scope, &sender, &mut reader, &acks, &last_sequence).await;
        let ready = match identified {
            Ok(ready) => ready,
            Err(e) => {
                scope.shutdown("identify failed");
                return Err(e);
            }
        };
        info!(
            user_id = %ready.user.id,
            "[Gateway] Ready as {}",
            ready.user.username
        );

        let inner = Arc::new(GatewayInner {
            config,
            api,
            scope: scope.clone(),
            sender,
            acks,
            last_sequence,
            user_id: ready.user.id,
            session_id: ready.session_id,
            pending_join: Mutex::new(None),
            join_ids: AtomicU64::new(0),
            voice: Mutex::new(None),
            phase: PhaseReporter::new(),
        });

        scope.set_state(GatewayState::Active);
        dispatcher::spawn(inner.clone(), reader);

        Ok(GatewaySession { inner })
    }
}

async fn read_hello(reader: &mut FrameReader, step: Duration) -> Result<Hello, SdkError> {
    let text = reader.next_text_until(Instant::now() + step, "gateway Hello").await?;
    match GatewayFrame::decode(&text)?.into_event()? {
        GatewayEvent::Hello(hello) => Ok(hello),
        other => Err(SdkError::ProtocolViolation(format!(
            "expected Hello, got {other:?}"
        ))),
    }
}

async fn identify(
    config: &GatewayConfig,
    scope: &SessionScope,
    sender: &FrameSender,
    reader: &mut FrameReader,
    acks: &AckHandle,
    last_sequence: &Mutex<Option<u64>>,
) -> Result<Ready, SdkError> {
    let frame = GatewayFrame::identify(&config.identify())?;
    sender.send_text(frame.encode()?).await?;
    scope.set_state(GatewayState::Identified);
    debug!(intents = config.intents, "[Gateway] Identify sent");

    let deadline = Instant::now() + config.step_timeout();
    loop {
        let text = reader.next_text_until(deadline, "Ready").await?;
        let frame = GatewayFrame::decode(&text)?;
        if let Some(sequence) = frame.s {
            *lock(last_sequence) = Some(sequence);
        }

        match frame.into_event()? {
            GatewayEvent::Ready(ready) => return Ok(ready),
            GatewayEvent::HeartbeatAck => {
                acks.acknowledge();
            }
            other => {
                return Err(SdkError::ProtocolViolation(format!(
                    "expected Ready, got {other:?}"
                )))
            }
        }
    }
}

fn spawn_heartbeat(
    config: &GatewayConfig,
    hello: &Hello,
    sender: &FrameSender,
    acks: &AckHandle,
    last_sequence: &Arc<Mutex<Option<u64>>>,
    scope: &SessionScope,
) {
    let jitter = if config.heartbeat_jitter {
        Duration::from_secs_f64(rand::random::<f64>())
    } else {
        Duration::ZERO
    };
    let sequence = last_sequence.clone();
    let on_failure = scope.clone();

    HeartbeatMonitor::new(
        "Gateway",
        Duration::from_millis(hello.heartbeat_interval),
        config.heartbeat_ack_timeout(),
    )
    .with_jitter(jitter)
    .spawn(
        sender.clone(),
        acks.clone(),
        move || Ok(GatewayFrame::heartbeat(*lock(&sequence)).encode()?),
        scope.cancel.clone(),
        move |e| on_failure.shutdown(&e.to_string()),
    );
}

/// An identified gateway session. Clones share the same connection.
#[derive(Clone)]
pub struct GatewaySession {
    inner: Arc<GatewayInner>,
}

impl GatewaySession {
    /// Connect and identify in one step.
    pub async fn start(config: GatewayConfig, api: Arc<dyn RestApi>) -> Result<Self, SdkError> {
        GatewayHandshake::connect(config, api).await?.identify().await
    }

    pub fn state(&self) -> GatewayState {
        if self.inner.scope.cancel.is_cancelled() {
            return GatewayState::Disconnected;
        }
        *self.inner.scope.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<GatewayState> {
        self.inner.scope.state.subscribe()
    }

    pub fn subscribe_voice_phase(&self) -> watch::Receiver<VoicePhase> {
        self.inner.phase.subscribe()
    }

    /// Our own user id, from Ready.
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Ask to join a voice channel and run the voice handshake.
    ///
    /// Resolves only once the voice session is fully connected, with the
    /// secret key in hand.
    ///
    /// # Errors
    /// [`SdkError::JoinInProgress`] if another join has not finished yet;
    /// otherwise whatever step of the handshake failed.
    pub async fn request_voice_join(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<VoiceJoinContext, SdkError> {
        self.inner.join_voice(guild_id, channel_id).await
    }

    /// The active voice session, if any.
    pub fn voice(&self) -> Option<Arc<VoiceSession>> {
        lock(&self.inner.voice).clone()
    }

    /// Leave voice in `guild_id` and tear down the voice session. A join
    /// still in progress for that guild is aborted.
    pub async fn leave_voice(&self, guild_id: &str) -> Result<(), SdkError> {
        self.inner.abort_pending_join(guild_id);

        let update = GatewayFrame::voice_state_update(&UpdateVoiceState {
            guild_id: guild_id.to_string(),
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        })?;
        self.inner.sender.send_text(update.encode()?).await?;

        let voice = {
            let mut voice = lock(&self.inner.voice);
            if voice.as_ref().is_some_and(|v| v.context().guild_id == guild_id) {
                voice.take()
            } else {
                None
            }
        };
        if let Some(voice) = voice {
            voice.disconnect();
        }

        info!(guild_id, "[Gateway] Left voice");
        Ok(())
    }

    /// Close the socket and stop every task of this session. Idempotent.
    pub fn disconnect(&self) {
        self.inner.scope.shutdown("disconnect requested");
    }

    /// Resolves once the session has been torn down and its state published.
    pub async fn closed(&self) {
        self.inner.scope.cancel.cancelled().await;
        let mut state = self.inner.scope.state.subscribe();
        let _ = state
            .wait_for(|state| *state == GatewayState::Disconnected)
            .await;
    }
}

/// REST stub for sessions built without a server.
#[cfg(test)]
pub(crate) struct NoApi;

#[cfg(test)]
#[async_trait::async_trait]
impl RestApi for NoApi {
    async fn gateway_url(&self) -> Result<String, SdkError> {
        Err(SdkError::Api("unused".to_string()))
    }

    async fn create_interaction_response(
        &self,
        _interaction_id: &str,
        _interaction_token: &str,
        _response: &penny_protocol::rest::InteractionResponse,
    ) -> Result<(), SdkError> {
        Ok(())
    }

    async fn register_guild_command(
        &self,
        _application_id: &str,
        _guild_id: &str,
        _command: &penny_protocol::rest::CommandRegistration,
    ) -> Result<(), SdkError> {
        Ok(())
    }
}

#[cfg(test)]
impl GatewayInner {
    /// Session state wired to an in-memory frame queue instead of a socket.
    pub(crate) fn for_test(
        api: Arc<dyn RestApi>,
        user_id: &str,
    ) -> (Arc<Self>, async_channel::Receiver<tokio_tungstenite::tungstenite::Message>) {
        let (tx, rx) = async_channel::unbounded();
        let scope = SessionScope::new();
        scope.set_state(GatewayState::Active);

        let inner = Arc::new(Self {
            config: GatewayConfig::default(),
            api,
            scope,
            sender: FrameSender::new(tx),
            acks: AckHandle::default(),
            last_sequence: Arc::new(Mutex::new(None)),
            user_id: user_id.to_string(),
            session_id: "session".to_string(),
            pending_join: Mutex::new(None),
            join_ids: AtomicU64::new(0),
            voice: Mutex::new(None),
            phase: PhaseReporter::new(),
        });
        (inner, rx)
    }

    pub(crate) fn state(&self) -> GatewayState {
        *self.scope.state.borrow()
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("user_id", &self.inner.user_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
