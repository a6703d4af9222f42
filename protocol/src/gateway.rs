//! Primary gateway frames: `{op, d, s, t}` JSON text messages.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::opcode::GatewayOpcode;

/// Dispatch event names consumed by the session engine.
pub mod event_name {
    pub const READY: &str = "READY";
    pub const VOICE_STATE_UPDATE: &str = "VOICE_STATE_UPDATE";
    pub const VOICE_SERVER_UPDATE: &str = "VOICE_SERVER_UPDATE";
    pub const INTERACTION_CREATE: &str = "INTERACTION_CREATE";
}

/// Raw gateway frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// A gateway frame decoded once into the shape the dispatcher switches on.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum GatewayEvent {
    Hello(Hello),
    /// The server asked for an immediate heartbeat (op 1 inbound).
    HeartbeatRequest,
    HeartbeatAck,
    Reconnect,
    InvalidSession { resumable: bool },
    Ready(Ready),
    VoiceStateUpdate(VoiceState),
    VoiceServerUpdate(VoiceServerUpdate),
    InteractionCreate(Interaction),
    /// Any dispatch this engine does not consume.
    Dispatch { name: String },
    /// An opcode this engine does not know.
    Unknown { op: u8 },
}

impl GatewayFrame {
    /// # Errors
    /// Returns [`ProtocolError::Json`] if the text is not a gateway frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    fn command(op: GatewayOpcode, d: Value) -> Self {
        Self {
            op: op.as_u8(),
            d: Some(d),
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last dispatch sequence seen (null before the first one).
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::command(
            GatewayOpcode::Heartbeat,
            last_sequence.map_or(Value::Null, Value::from),
        )
    }

    /// # Errors
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn identify(identify: &Identify) -> Result<Self, ProtocolError> {
        Ok(Self::command(GatewayOpcode::Identify, serde_json::to_value(identify)?))
    }

    /// # Errors
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn voice_state_update(update: &UpdateVoiceState) -> Result<Self, ProtocolError> {
        Ok(Self::command(GatewayOpcode::VoiceStateUpdate, serde_json::to_value(update)?))
    }

    /// Decode the payload according to `op` and `t`.
    ///
    /// Unknown opcodes and dispatch names are not errors; they come back as
    /// [`GatewayEvent::Unknown`] and [`GatewayEvent::Dispatch`].
    ///
    /// # Errors
    /// Returns an error if a known frame is missing its payload or the payload has the wrong shape.
    pub fn into_event(self) -> Result<GatewayEvent, ProtocolError> {
        let op = self.op;
        let Some(opcode) = GatewayOpcode::from_u8(op) else {
            return Ok(GatewayEvent::Unknown { op });
        };

        let event = match opcode {
            GatewayOpcode::Hello => GatewayEvent::Hello(payload(op, self.d)?),
            GatewayOpcode::Heartbeat => GatewayEvent::HeartbeatRequest,
            GatewayOpcode::HeartbeatAck => GatewayEvent::HeartbeatAck,
            GatewayOpcode::Reconnect => GatewayEvent::Reconnect,
            GatewayOpcode::InvalidSession => GatewayEvent::InvalidSession {
                resumable: self.d.as_ref().and_then(Value::as_bool).unwrap_or(false),
            },
            GatewayOpcode::Dispatch => {
                let name = self.t.unwrap_or_default();
                match name.as_str() {
                    event_name::READY => GatewayEvent::Ready(payload(op, self.d)?),
                    event_name::VOICE_STATE_UPDATE => {
                        GatewayEvent::VoiceStateUpdate(payload(op, self.d)?)
                    }
                    event_name::VOICE_SERVER_UPDATE => {
                        GatewayEvent::VoiceServerUpdate(payload(op, self.d)?)
                    }
                    event_name::INTERACTION_CREATE => {
                        GatewayEvent::InteractionCreate(payload(op, self.d)?)
                    }
                    _ => GatewayEvent::Dispatch { name },
                }
            }
            // Client-to-server only
            GatewayOpcode::Identify | GatewayOpcode::VoiceStateUpdate => {
                GatewayEvent::Unknown { op }
            }
        };

        Ok(event)
    }
}

fn payload<T: DeserializeOwned>(op: u8, d: Option<Value>) -> Result<T, ProtocolError> {
    let d = d.ok_or(ProtocolError::MissingPayload { op })?;
    Ok(serde_json::from_value(d)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

/// Identify payload (op 2).
#[derive(Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("properties", &self.properties)
            .field("presence", &self.presence)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presence {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: String,
    pub afk: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    pub user: User,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
}

/// Voice-state-update command (op 4). `channel_id: None` leaves the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateVoiceState {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// `VOICE_STATE_UPDATE` dispatch payload.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub member: Option<Member>,
}

impl VoiceState {
    /// The user this state belongs to.
    #[must_use]
    pub fn subject_id(&self) -> Option<&str> {
        self.user_id.as_deref().or_else(|| {
            self.member
                .as_ref()
                .and_then(|m| m.user.as_ref())
                .map(|u| u.id.as_str())
        })
    }
}

/// `VOICE_SERVER_UPDATE` dispatch payload.
#[derive(Clone, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: String,
    /// `None` while the voice server is being reallocated.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl fmt::Debug for VoiceServerUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceServerUpdate")
            .field("token", &"<redacted>")
            .field("guild_id", &self.guild_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// `INTERACTION_CREATE` dispatch payload.
#[derive(Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub member: Option<Member>,
}

impl Interaction {
    /// Name of the invoked application command, if any.
    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.name.as_str())
    }
}

impl fmt::Debug for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interaction")
            .field("id", &self.id)
            .field("guild_id", &self.guild_id)
            .field("command", &self.command_name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionData {
    pub name: String,
}
