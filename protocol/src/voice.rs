//! Voice gateway frames: `{op, d}` JSON text messages.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::opcode::VoiceOpcode;

/// Transport protocol announced in Select Protocol.
pub const UDP_PROTOCOL: &str = "udp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
}

/// A voice frame decoded once into the shape the voice reader switches on.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum VoiceEvent {
    Hello(VoiceHello),
    Ready(VoiceReady),
    HeartbeatAck,
    SessionDescription(SessionDescription),
    /// Anything else, including client-to-server opcodes echoed back and
    /// opcodes this engine does not know.
    Other { op: u8 },
}

impl VoiceFrame {
    /// # Errors
    /// Returns [`ProtocolError::Json`] if the text is not a voice frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    fn command<T: Serialize>(op: VoiceOpcode, d: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            op: op.as_u8(),
            d: Some(serde_json::to_value(d)?),
        })
    }

    /// # Errors
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn identify(identify: &VoiceIdentify) -> Result<Self, ProtocolError> {
        Self::command(VoiceOpcode::Identify, identify)
    }

    #[must_use]
    pub fn heartbeat(nonce: u64) -> Self {
        Self {
            op: VoiceOpcode::Heartbeat.as_u8(),
            d: Some(Value::from(nonce)),
        }
    }

    /// # Errors
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn select_protocol(select: &SelectProtocol) -> Result<Self, ProtocolError> {
        Self::command(VoiceOpcode::SelectProtocol, select)
    }

    /// # Errors
    /// Returns [`ProtocolError::Json`] if serialization fails.
    pub fn speaking(speaking: &Speaking) -> Result<Self, ProtocolError> {
        Self::command(VoiceOpcode::Speaking, speaking)
    }

    /// # Errors
    /// Returns an error if a known frame is missing its payload or the payload has the wrong shape.
    pub fn into_event(self) -> Result<VoiceEvent, ProtocolError> {
        let op = self.op;
        let event = match VoiceOpcode::from_u8(op) {
            Some(VoiceOpcode::Hello) => VoiceEvent::Hello(payload(op, self.d)?),
            Some(VoiceOpcode::Ready) => VoiceEvent::Ready(payload(op, self.d)?),
            Some(VoiceOpcode::HeartbeatAck) => VoiceEvent::HeartbeatAck,
            Some(VoiceOpcode::SessionDescription) => {
                VoiceEvent::SessionDescription(payload(op, self.d)?)
            }
            _ => VoiceEvent::Other { op },
        };
        Ok(event)
    }
}

fn payload<T: DeserializeOwned>(op: u8, d: Option<Value>) -> Result<T, ProtocolError> {
    let d = d.ok_or(ProtocolError::MissingPayload { op })?;
    Ok(serde_json::from_value(d)?)
}

/// Voice Hello (op 8). The interval is sent as a float number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceHello {
    pub heartbeat_interval: f64,
}

impl VoiceHello {
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval.max(0.0) as u64)
    }
}

/// Voice Identify (op 0).
#[derive(Clone, Serialize)]
pub struct VoiceIdentify {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

impl fmt::Debug for VoiceIdentify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceIdentify")
            .field("server_id", &self.server_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Voice Ready (op 2): where to send UDP traffic and which SSRC to use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceReady {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Select Protocol (op 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

impl SelectProtocol {
    #[must_use]
    pub fn udp(address: &str, port: u16, mode: &str) -> Self {
        Self {
            protocol: UDP_PROTOCOL.to_string(),
            data: SelectProtocolData {
                address: address.to_string(),
                port,
                mode: mode.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

/// Session Description (op 4): the key for the media stream.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

impl fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescription")
            .field("mode", &self.mode)
            .field("secret_key", &format_args!("<{} bytes>", self.secret_key.len()))
            .finish()
    }
}

/// Speaking (op 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Speaking {
    pub speaking: u8,
    pub delay: u32,
    pub ssrc: u32,
}
