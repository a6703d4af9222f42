//! Bodies exchanged with the REST collaborator.

use serde::{Deserialize, Serialize};

/// Interaction callback type: reply with a message in the channel.
pub const CHANNEL_MESSAGE_WITH_SOURCE: u8 = 4;

/// `GET /gateway/bot` response. Only the URL is consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotResponse {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    pub data: InteractionResponseData,
}

impl InteractionResponse {
    /// A plain message reply.
    #[must_use]
    pub fn message(content: &str) -> Self {
        Self {
            kind: CHANNEL_MESSAGE_WITH_SOURCE,
            data: InteractionResponseData {
                content: content.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionResponseData {
    pub content: String,
}

/// Guild command registration body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRegistration {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_reply_shape() {
        let body = serde_json::to_value(InteractionResponse::message("On my way!")).expect("json");
        assert_eq!(body, json!({"type": 4, "data": {"content": "On my way!"}}));
    }
}
