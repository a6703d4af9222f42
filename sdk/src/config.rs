use std::fmt;
use std::time::Duration;

use penny_protocol::gateway::{Activity, ConnectionProperties, Identify, Presence};
use serde::{Deserialize, Serialize};

/// Gateway API version requested in the connect URL
pub const GATEWAY_VERSION: u8 = 10;

/// Voice gateway version requested in the voice connect URL
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// GUILDS | GUILD_VOICE_STATES | GUILD_MESSAGES
pub const DEFAULT_INTENTS: u64 = 641;

/// Deadline for each handshake step (Hello, Ready, join events, discovery, session description)
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 5000;

/// How long a heartbeat may go unacknowledged
pub const DEFAULT_HEARTBEAT_ACK_TIMEOUT_MS: u64 = 5000;

pub const DEFAULT_ENCRYPTION_MODE: &str = "xsalsa20_poly1305_suffix";

/// Activity type shown as "Listening to"
pub const ACTIVITY_LISTENING: u8 = 2;

const CLIENT_NAME: &str = "penny";

/// Everything a [`GatewaySession`](crate::GatewaySession) needs besides its
/// REST collaborator. The token is never serialized.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    #[serde(skip)]
    pub token: String,
    pub application_id: String,
    pub intents: u64,
    pub step_timeout_ms: u64,
    pub heartbeat_ack_timeout_ms: u64,
    /// Delay the first gateway heartbeat by a random fraction of a second.
    pub heartbeat_jitter: bool,
    pub presence: PresenceConfig,
    pub voice: VoiceConfig,
    /// Channel joined by commands with `joins_voice`.
    pub summon_target: Option<VoiceTarget>,
    pub commands: Vec<CommandConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            application_id: String::new(),
            intents: DEFAULT_INTENTS,
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            heartbeat_ack_timeout_ms: DEFAULT_HEARTBEAT_ACK_TIMEOUT_MS,
            heartbeat_jitter: true,
            presence: PresenceConfig::default(),
            voice: VoiceConfig::default(),
            summon_target: None,
            commands: default_commands(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("application_id", &self.application_id)
            .field("intents", &self.intents)
            .field("step_timeout_ms", &self.step_timeout_ms)
            .field("heartbeat_ack_timeout_ms", &self.heartbeat_ack_timeout_ms)
            .field("heartbeat_jitter", &self.heartbeat_jitter)
            .field("presence", &self.presence)
            .field("voice", &self.voice)
            .field("summon_target", &self.summon_target)
            .field("commands", &self.commands)
            .finish()
    }
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn heartbeat_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ack_timeout_ms)
    }

    /// Gateway URL with the version and encoding query appended.
    pub fn gateway_url(&self, base: &str) -> String {
        format!(
            "{}/?v={}&encoding=json",
            base.trim_end_matches('/'),
            GATEWAY_VERSION
        )
    }

    pub fn command(&self, name: &str) -> Option<&CommandConfig> {
        self.commands.iter().find(|command| command.name == name)
    }

    pub(crate) fn identify(&self) -> Identify {
        Identify {
            token: self.token.clone(),
            intents: self.intents,
            properties: ConnectionProperties {
                os: std::env::consts::OS.to_string(),
                browser: CLIENT_NAME.to_string(),
                device: CLIENT_NAME.to_string(),
            },
            presence: Some(self.presence.to_presence()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub status: String,
    pub activity_name: Option<String>,
    pub activity_kind: u8,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            status: "online".to_string(),
            activity_name: Some("T-Swizzle".to_string()),
            activity_kind: ACTIVITY_LISTENING,
        }
    }
}

impl PresenceConfig {
    fn to_presence(&self) -> Presence {
        Presence {
            since: None,
            activities: self
                .activity_name
                .iter()
                .map(|name| Activity {
                    name: name.clone(),
                    kind: self.activity_kind,
                })
                .collect(),
            status: self.status.clone(),
            afk: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// `wss` in production; tests point this at a plain `ws` server.
    pub url_scheme: String,
    pub encryption_mode: String,
    /// A missed voice heartbeat ACK tears down the whole gateway session
    /// instead of just the voice session.
    pub escalate_heartbeat_failure: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            url_scheme: "wss".to_string(),
            encryption_mode: DEFAULT_ENCRYPTION_MODE.to_string(),
            escalate_heartbeat_failure: true,
        }
    }
}

impl VoiceConfig {
    /// Voice gateway URL for an endpoint from `VOICE_SERVER_UPDATE`.
    pub fn url(&self, endpoint: &str) -> String {
        let host = endpoint
            .split_once("://")
            .map_or(endpoint, |(_, rest)| rest)
            .trim_end_matches('/');
        format!("{}://{}/?v={}", self.url_scheme, host, VOICE_GATEWAY_VERSION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceTarget {
    pub guild_id: String,
    pub channel_id: String,
}

/// A slash command the bot answers: a fixed reply, optionally followed by
/// joining [`GatewayConfig::summon_target`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    pub description: String,
    pub reply: String,
    #[serde(default)]
    pub joins_voice: bool,
}

pub fn default_commands() -> Vec<CommandConfig> {
    vec![
        CommandConfig {
            name: "summon".to_string(),
            description: "Summons the bot to your voice channel".to_string(),
            reply: "On my way!".to_string(),
            joins_voice: true,
        },
        CommandConfig {
            name: "jack".to_string(),
            description: "Jack".to_string(),
            reply: "https://tenor.com/view/asd-gif-19268779".to_string(),
            joins_voice: false,
        },
    ]
}
