use std::sync::Arc;

use penny_protocol::gateway::{Interaction, VoiceServerUpdate, VoiceState};
use penny_protocol::rest::InteractionResponse;
use penny_protocol::{GatewayEvent, GatewayFrame};
use tracing::{debug, error, info, trace, warn};

use super::session::GatewayInner;
use crate::error::SdkError;
use crate::lock;
use crate::network::FrameReader;

/// Hand the socket's read half to the dispatch loop. From here on this task
/// is the only reader of the gateway socket.
pub(super) fn spawn(inner: Arc<GatewayInner>, mut reader: FrameReader) {
    tokio::spawn(async move {
        let cancel = inner.scope.cancel.clone();

        let reason = loop {
            let text = tokio::select! {
                biased;
                () = cancel.cancelled() => break "session cancelled".to_string(),
                text = reader.next_text() => text,
            };

            match text {
                Ok(text) => inner.handle_text(&text),
                Err(e) => break format!("read loop ended: {e}"),
            }
        };

        inner.scope.shutdown(&reason);
        debug!("[Gateway] Dispatch loop stopped");
    });
}

impl GatewayInner {
    /// Decode one inbound frame and act on it. Unknown opcodes and events
    /// are ignored; malformed payloads are logged and skipped.
    pub(crate) fn handle_text(self: &Arc<Self>, text: &str) {
        let frame = match GatewayFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[Gateway] Skipping undecodable frame: {}", e);
                return;
            }
        };

        if let Some(sequence) = frame.s {
            *lock(&self.last_sequence) = Some(sequence);
        }

        match frame.into_event() {
            Ok(event) => self.dispatch(event),
            Err(e) => warn!("[Gateway] Skipping malformed payload: {}", e),
        }
    }

    fn dispatch(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::HeartbeatAck => {
                if !self.acks.acknowledge() {
                    debug!("[Gateway] Unsolicited heartbeat ACK");
                }
            }
            GatewayEvent::HeartbeatRequest => self.handle_heartbeat_request(),
            GatewayEvent::VoiceStateUpdate(state) => self.handle_voice_state(state),
            GatewayEvent::VoiceServerUpdate(server) => self.handle_voice_server(server),
            GatewayEvent::InteractionCreate(interaction) => {
                tokio::spawn(handle_interaction(self.clone(), interaction));
            }
            GatewayEvent::Reconnect => self.scope.shutdown("server requested a reconnect"),
            GatewayEvent::InvalidSession { resumable } => {
                warn!(resumable, "[Gateway] Session invalidated");
                self.scope.shutdown("invalid session");
            }
            GatewayEvent::Dispatch { name } => trace!("[Gateway] Ignoring {}", name),
            other => debug!("[Gateway] Ignoring {:?}", other),
        }
    }

    fn handle_heartbeat_request(&self) {
        let sequence = *lock(&self.last_sequence);
        let sent = GatewayFrame::heartbeat(sequence)
            .encode()
            .map_err(SdkError::from)
            .and_then(|text| self.sender.queue_text(text));

        match sent {
            Ok(()) => debug!("[Gateway] Heartbeat sent on request"),
            Err(e) => warn!("[Gateway] Requested heartbeat not sent: {}", e),
        }
    }

    fn handle_voice_state(&self, state: VoiceState) {
        if state.subject_id() != Some(self.user_id.as_str()) {
            trace!("[Gateway] Voice state of another user");
            return;
        }

        let pending = lock(&self.pending_join);
        let Some(join) = pending.as_ref() else {
            trace!("[Gateway] Voice state without a pending join");
            return;
        };
        if state.guild_id.as_deref().is_some_and(|guild| guild != join.guild_id) {
            debug!("[Gateway] Voice state for another guild");
            return;
        }

        if join.slots.voice_state.resolve(state) {
            debug!("[Gateway] Voice state received");
        } else {
            debug!("[Gateway] Ignoring repeated voice state");
        }
    }

    fn handle_voice_server(&self, server: VoiceServerUpdate) {
        let pending = lock(&self.pending_join);
        let Some(join) = pending.as_ref() else {
            trace!("[Gateway] Voice server without a pending join");
            return;
        };
        if server.guild_id != join.guild_id {
            debug!("[Gateway] Voice server for another guild");
            return;
        }
        if server.endpoint.is_none() {
            debug!("[Gateway] Voice server has no endpoint yet, waiting for the next update");
            return;
        }

        if join.slots.voice_server.resolve(server) {
            debug!("[Gateway] Voice server received");
        } else {
            debug!("[Gateway] Ignoring repeated voice server");
        }
    }
}

/// Reply to a slash command and, for commands that join voice, join the
/// configured target. Runs outside the dispatch loop, which must keep
/// reading to deliver the join events.
async fn handle_interaction(inner: Arc<GatewayInner>, interaction: Interaction) {
    let Some(name) = interaction.command_name() else {
        debug!("[Gateway] Interaction without a command");
        return;
    };
    let Some(command) = inner.config.command(name).cloned() else {
        debug!("[Gateway] No handler for /{}", name);
        return;
    };
    info!(interaction_id = %interaction.id, "[Gateway] /{} invoked", command.name);

    let reply = InteractionResponse::message(&command.reply);
    if let Err(e) = inner
        .api
        .create_interaction_response(&interaction.id, &interaction.token, &reply)
        .await
    {
        error!("[Gateway] Failed to answer /{}: {}", command.name, e);
    }

    if !command.joins_voice {
        return;
    }
    let Some(target) = inner.config.summon_target.clone() else {
        warn!("[Gateway] /{} needs a summon target, none configured", command.name);
        return;
    };

    match inner.join_voice(&target.guild_id, &target.channel_id).await {
        Ok(context) => info!(ssrc = context.udp.ssrc, "[Gateway] /{} joined voice", command.name),
        Err(e) => warn!("[Gateway] /{} could not join voice: {}", command.name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::session::{NoApi, PendingJoin};
    use crate::gateway::GatewayState;
    use crate::voice::JoinSlots;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    fn session() -> (
        Arc<GatewayInner>,
        async_channel::Receiver<tokio_tungstenite::tungstenite::Message>,
    ) {
        GatewayInner::for_test(Arc::new(NoApi), "42")
    }

    fn pending_join(inner: &GatewayInner) -> JoinSlots {
        let slots = JoinSlots::default();
        *lock(&inner.pending_join) = Some(PendingJoin {
            id: 0,
            guild_id: "7".to_string(),
            slots: slots.clone(),
            cancel: CancellationToken::new(),
        });
        slots
    }

    fn dispatch(inner: &Arc<GatewayInner>, frame: &Value) {
        inner.handle_text(&frame.to_string());
    }

    fn voice_state(user_id: &str) -> Value {
        json!({"op": 0, "s": 3, "t": "VOICE_STATE_UPDATE",
               "d": {"guild_id": "7", "channel_id": "8", "user_id": user_id, "session_id": "abc"}})
    }

    fn voice_server() -> Value {
        json!({"op": 0, "s": 4, "t": "VOICE_SERVER_UPDATE",
               "d": {"guild_id": "7", "token": "vt", "endpoint": "voice.example:443"}})
    }

    #[tokio::test]
    async fn unknown_event_leaves_slots_untouched() {
        let (inner, _rx) = session();
        let slots = pending_join(&inner);

        dispatch(&inner, &json!({"op": 0, "s": 5, "t": "GUILD_CREATE", "d": {"id": "7"}}));
        dispatch(&inner, &json!({"op": 42, "d": null}));

        assert!(!slots.voice_state.is_resolved());
        assert!(!slots.voice_server.is_resolved());
        assert_eq!(*lock(&inner.last_sequence), Some(5));
        assert_eq!(inner.state(), GatewayState::Active);
    }

    #[tokio::test]
    async fn voice_events_resolve_in_either_order() {
        for server_first in [false, true] {
            let (inner, _rx) = session();
            let slots = pending_join(&inner);

            if server_first {
                dispatch(&inner, &voice_server());
                dispatch(&inner, &voice_state("42"));
            } else {
                dispatch(&inner, &voice_state("42"));
                dispatch(&inner, &voice_server());
            }

            assert_eq!(slots.voice_state.peek().map(|s| s.session_id), Some("abc".to_string()));
            assert_eq!(
                slots.voice_server.peek().and_then(|s| s.endpoint),
                Some("voice.example:443".to_string())
            );
        }
    }

    #[tokio::test]
    async fn null_endpoint_waits_for_allocated_server() {
        let (inner, _rx) = session();
        let slots = pending_join(&inner);

        dispatch(&inner, &json!({"op": 0, "s": 4, "t": "VOICE_SERVER_UPDATE",
                                 "d": {"guild_id": "7", "token": "vt", "endpoint": null}}));
        assert!(!slots.voice_server.is_resolved());

        dispatch(&inner, &voice_server());
        assert_eq!(
            slots.voice_server.peek().and_then(|s| s.endpoint),
            Some("voice.example:443".to_string())
        );
    }

    #[tokio::test]
    async fn voice_state_of_other_user_is_ignored() {
        let (inner, _rx) = session();
        let slots = pending_join(&inner);

        dispatch(&inner, &voice_state("99"));

        assert!(!slots.voice_state.is_resolved());
    }

    #[tokio::test]
    async fn voice_events_without_pending_join_are_ignored() {
        let (inner, _rx) = session();

        dispatch(&inner, &voice_state("42"));
        dispatch(&inner, &voice_server());

        let slots = pending_join(&inner);
        assert!(!slots.voice_state.is_resolved());
        assert!(!slots.voice_server.is_resolved());
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped() {
        let (inner, _rx) = session();
        let slots = pending_join(&inner);

        dispatch(
            &inner,
            &json!({"op": 0, "s": 9, "t": "VOICE_STATE_UPDATE", "d": {"user_id": "42"}}),
        );
        dispatch(&inner, &voice_state("42"));

        assert!(slots.voice_state.is_resolved());
        assert_eq!(inner.state(), GatewayState::Active);
    }

    #[tokio::test]
    async fn heartbeat_request_is_answered_with_last_sequence() {
        let (inner, rx) = session();

        dispatch(&inner, &json!({"op": 0, "s": 12, "t": "TYPING_START", "d": {}}));
        dispatch(&inner, &json!({"op": 1, "d": null}));

        let message = rx.try_recv().expect("heartbeat queued");
        let frame: Value = serde_json::from_str(message.to_text().expect("text")).expect("json");
        assert_eq!(frame["op"], 1);
        assert_eq!(frame["d"], 12);
    }

    #[tokio::test]
    async fn reconnect_request_disconnects() {
        let (inner, _rx) = session();

        dispatch(&inner, &json!({"op": 7, "d": null}));

        assert!(inner.scope.cancel.is_cancelled());
        assert_eq!(inner.state(), GatewayState::Disconnected);
    }

    #[tokio::test]
    async fn invalid_session_disconnects() {
        let (inner, _rx) = session();

        dispatch(&inner, &json!({"op": 9, "d": false}));

        assert!(inner.scope.cancel.is_cancelled());
        assert_eq!(inner.state(), GatewayState::Disconnected);
    }
}
