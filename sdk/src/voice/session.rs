use penny_protocol::gateway::{VoiceServerUpdate, VoiceState};
use penny_protocol::voice::{SelectProtocol, SessionDescription, Speaking, VoiceIdentify};
use penny_protocol::{VoiceEvent, VoiceFrame};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::context::{PhaseReporter, UdpEndpoint, VoiceJoinContext, VoicePhase};
use crate::config::GatewayConfig;
use crate::error::SdkError;
use crate::heartbeat::{AckHandle, HeartbeatMonitor};
use crate::network::{transport, FrameReader, FrameSender, VoiceUdp};
use crate::rendezvous::RendezvousSlot;

/// Slots the gateway dispatcher fills while a join is pending.
#[derive(Clone, Default)]
pub(crate) struct JoinSlots {
    pub(crate) voice_state: RendezvousSlot<VoiceState>,
    pub(crate) voice_server: RendezvousSlot<VoiceServerUpdate>,
}

pub(crate) struct VoiceJoin {
    pub(crate) guild_id: String,
    pub(crate) channel_id: String,
    pub(crate) user_id: String,
    pub(crate) slots: JoinSlots,
}

/// A connected voice gateway session plus its UDP socket.
pub struct VoiceSession {
    context: VoiceJoinContext,
    sender: FrameSender,
    cancel: CancellationToken,
}

impl VoiceSession {
    /// Run the voice handshake to completion. On failure every task started
    /// so far is cancelled and the voice socket is closed.
    pub(crate) async fn establish(
        join: VoiceJoin,
        config: &GatewayConfig,
        phase: PhaseReporter,
        cancel: CancellationToken,
        gateway_cancel: CancellationToken,
    ) -> Result<Self, SdkError> {
        let result = tokio::select! {
            result = handshake(&join, config, &phase, &cancel, &gateway_cancel) => result,
            () = cancel.cancelled() => Err(SdkError::Disconnected),
        };

        match result {
            Ok(session) => {
                let watcher = session.cancel.clone();
                tokio::spawn(async move {
                    watcher.cancelled().await;
                    phase.set(VoicePhase::Disconnected);
                    info!("[Voice] Session closed");
                });
                Ok(session)
            }
            Err(e) => {
                warn!(guild_id = %join.guild_id, "[Voice] Join failed: {}", e);
                cancel.cancel();
                phase.set(VoicePhase::Disconnected);
                Err(e)
            }
        }
    }

    pub fn context(&self) -> &VoiceJoinContext {
        &self.context
    }

    /// Send op 5 for our SSRC.
    pub async fn set_speaking(&self, speaking: bool) -> Result<(), SdkError> {
        let frame = VoiceFrame::speaking(&Speaking {
            speaking: u8::from(speaking),
            delay: 0,
            ssrc: self.context.udp.ssrc,
        })?;
        self.sender.send_text(frame.encode()?).await?;
        debug!("[Voice] Speaking={}", speaking);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Close the voice socket and stop the heartbeat and UDP tasks. Idempotent.
    pub fn disconnect(&self) {
        if !self.cancel.is_cancelled() {
            info!(guild_id = %self.context.guild_id, "[Voice] Disconnecting");
        }
        self.cancel.cancel();
    }

    /// Resolves once the session has been torn down, for whatever reason.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

async fn handshake(
    join: &VoiceJoin,
    config: &GatewayConfig,
    phase: &PhaseReporter,
    cancel: &CancellationToken,
    gateway_cancel: &CancellationToken,
) -> Result<VoiceSession, SdkError> {
    let step = config.step_timeout();

    // The slots keep whatever arrived first, so the event order doesn't matter.
    phase.set(VoicePhase::AwaitingVoiceState);
    let voice_state = join
        .slots
        .voice_state
        .wait(step)
        .await
        .map_err(|_| SdkError::HandshakeTimeout("VOICE_STATE_UPDATE"))?;

    phase.set(VoicePhase::AwaitingVoiceServer);
    let voice_server = join
        .slots
        .voice_server
        .wait(step)
        .await
        .map_err(|_| SdkError::HandshakeTimeout("VOICE_SERVER_UPDATE"))?;

    let endpoint = voice_server.endpoint.clone().ok_or_else(|| {
        SdkError::ProtocolViolation("VOICE_SERVER_UPDATE without an endpoint".to_string())
    })?;

    phase.set(VoicePhase::Connecting);
    let url = config.voice.url(&endpoint);
    let (sender, mut reader) = transport::connect("Voice", &url, step, cancel.clone()).await?;

    phase.set(VoicePhase::AwaitingHello);
    let hello = match next_event(&mut reader, step, "voice Hello").await? {
        VoiceEvent::Hello(hello) => hello,
        other => {
            return Err(SdkError::ProtocolViolation(format!(
                "expected voice Hello, got {other:?}"
            )))
        }
    };
    debug!("[Voice] Hello, heartbeat every {:?}", hello.interval());

    let acks = AckHandle::default();
    spawn_heartbeat(config, hello.interval(), &sender, &acks, cancel, gateway_cancel);

    phase.set(VoicePhase::Identifying);
    let identify = VoiceFrame::identify(&VoiceIdentify {
        server_id: voice_server.guild_id.clone(),
        user_id: join.user_id.clone(),
        session_id: voice_state.session_id.clone(),
        token: voice_server.token.clone(),
    })?;
    sender.send_text(identify.encode()?).await?;

    phase.set(VoicePhase::AwaitingReady);
    let deadline = Instant::now() + step;
    let ready = loop {
        let text = reader.next_text_until(deadline, "voice Ready").await?;
        match VoiceFrame::decode(&text)?.into_event()? {
            VoiceEvent::Ready(ready) => break ready,
            VoiceEvent::HeartbeatAck => {
                acks.acknowledge();
            }
            other => {
                return Err(SdkError::ProtocolViolation(format!(
                    "expected voice Ready, got {other:?}"
                )))
            }
        }
    };
    info!(ssrc = ready.ssrc, "[Voice] Ready, media server {}:{}", ready.ip, ready.port);

    // From here on the read loop is the only reader of the voice socket.
    let session_description = RendezvousSlot::new();
    spawn_reader(reader, acks, session_description.clone(), cancel.clone());

    phase.set(VoicePhase::DiscoveringIp);
    let udp = VoiceUdp::bind(&ready.ip, ready.port).await?;
    let external = udp.discover(ready.ssrc, step).await?;

    phase.set(VoicePhase::SelectingProtocol);
    let select = VoiceFrame::select_protocol(&SelectProtocol::udp(
        &external.ip,
        external.port,
        &config.voice.encryption_mode,
    ))?;
    sender.send_text(select.encode()?).await?;

    phase.set(VoicePhase::AwaitingSessionDescription);
    let description = session_description
        .wait(step)
        .await
        .map_err(|_| SdkError::HandshakeTimeout("Session Description"))?;

    udp.spawn_receiver(cancel.clone());
    phase.set(VoicePhase::Connected);
    info!(guild_id = %join.guild_id, channel_id = %join.channel_id, "[Voice] Connected");

    let context = VoiceJoinContext::new(
        join.guild_id.clone(),
        join.channel_id.clone(),
        voice_state.session_id,
        endpoint,
        UdpEndpoint {
            ip: ready.ip,
            port: ready.port,
            ssrc: ready.ssrc,
        },
        external,
        description.mode,
        description.secret_key,
    );

    Ok(VoiceSession {
        context,
        sender,
        cancel: cancel.clone(),
    })
}

async fn next_event(
    reader: &mut FrameReader,
    step: std::time::Duration,
    name: &'static str,
) -> Result<VoiceEvent, SdkError> {
    let text = reader.next_text_until(Instant::now() + step, name).await?;
    Ok(VoiceFrame::decode(&text)?.into_event()?)
}

fn spawn_heartbeat(
    config: &GatewayConfig,
    interval: std::time::Duration,
    sender: &FrameSender,
    acks: &AckHandle,
    cancel: &CancellationToken,
    gateway_cancel: &CancellationToken,
) {
    let escalate = config.voice.escalate_heartbeat_failure;
    let voice = cancel.clone();
    let gateway = gateway_cancel.clone();

    HeartbeatMonitor::new("Voice", interval, config.heartbeat_ack_timeout()).spawn(
        sender.clone(),
        acks.clone(),
        || Ok(VoiceFrame::heartbeat(rand::random::<u64>()).encode()?),
        cancel.clone(),
        move |e| {
            if escalate {
                error!("[Voice] {}, disconnecting the gateway session", e);
                gateway.cancel();
            } else {
                warn!("[Voice] {}, leaving voice", e);
                voice.cancel();
            }
        },
    );
}

fn spawn_reader(
    mut reader: FrameReader,
    acks: AckHandle,
    session_description: RendezvousSlot<SessionDescription>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                text = reader.next_text() => text,
            };

            let text = match text {
                Ok(text) => text,
                Err(e) => {
                    warn!("[Voice] Read loop ended: {}", e);
                    cancel.cancel();
                    break;
                }
            };

            let event = match VoiceFrame::decode(&text).and_then(VoiceFrame::into_event) {
                Ok(event) => event,
                Err(e) => {
                    warn!("[Voice] Skipping malformed frame: {}", e);
                    continue;
                }
            };

            match event {
                VoiceEvent::HeartbeatAck => {
                    if !acks.acknowledge() {
                        debug!("[Voice] Unsolicited heartbeat ACK");
                    }
                }
                VoiceEvent::SessionDescription(description) => {
                    if session_description.resolve(description) {
                        debug!("[Voice] Session description received");
                    } else {
                        debug!("[Voice] Ignoring repeated session description");
                    }
                }
                other => trace!("[Voice] Ignoring {:?}", other),
            }
        }

        debug!("[Voice] Read loop stopped");
    });
}
