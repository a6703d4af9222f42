#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use penny_sdk::protocol::rest::{CommandRegistration, InteractionResponse};
use penny_sdk::{GatewayConfig, GatewaySession, RestApi, SdkError, VoiceTarget};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const USER_ID: &str = "42";
pub const GUILD_ID: &str = "7";
pub const CHANNEL_ID: &str = "8";

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// An interaction reply as seen by the REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub interaction_id: String,
    pub interaction_token: String,
    pub content: String,
}

/// Records every REST call the session makes.
pub struct RecordingApi {
    gateway_url: String,
    replies_tx: async_channel::Sender<Reply>,
}

impl RecordingApi {
    pub fn new(gateway_url: String) -> (Arc<Self>, async_channel::Receiver<Reply>) {
        let (replies_tx, replies_rx) = async_channel::unbounded();
        (Arc::new(Self { gateway_url, replies_tx }), replies_rx)
    }
}

#[async_trait]
impl RestApi for RecordingApi {
    async fn gateway_url(&self) -> Result<String, SdkError> {
        Ok(self.gateway_url.clone())
    }

    async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), SdkError> {
        let _ = self
            .replies_tx
            .send(Reply {
                interaction_id: interaction_id.to_string(),
                interaction_token: interaction_token.to_string(),
                content: response.data.content.clone(),
            })
            .await;
        Ok(())
    }

    async fn register_guild_command(
        &self,
        _application_id: &str,
        _guild_id: &str,
        _command: &CommandRegistration,
    ) -> Result<(), SdkError> {
        Ok(())
    }
}

/// The server end of a websocket, driven by the test.
pub struct Peer {
    ws: WebSocketStream<TcpStream>,
}

impl Peer {
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(FRAME_TIMEOUT, listener.accept())
            .await
            .expect("client connected in time")
            .expect("accept");
        let ws = tokio_tungstenite::accept_async(stream).await.expect("websocket handshake");
        Self { ws }
    }

    pub async fn send(&mut self, frame: Value) {
        self.ws.send(Message::text(frame.to_string())).await.expect("send frame");
    }

    pub async fn recv(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(FRAME_TIMEOUT, self.ws.next())
                .await
                .expect("frame in time");
            match message {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("json frame")
                }
                Some(Ok(Message::Close(_))) => panic!("client closed the socket"),
                Some(Ok(_)) => {}
                other => panic!("stream ended: {other:?}"),
            }
        }
    }

    /// Next frame with opcode `op`, skipping anything else (heartbeats).
    pub async fn recv_op(&mut self, op: u64) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["op"] == op {
                return frame;
            }
        }
    }

    /// Drain the socket until it ends and count the Close frames received.
    pub async fn count_closes(mut self) -> usize {
        let mut closes = 0;
        while let Ok(Some(message)) = tokio::time::timeout(FRAME_TIMEOUT, self.ws.next()).await {
            match message {
                Ok(Message::Close(_)) => closes += 1,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        closes
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::new("bot-token");
    config.heartbeat_jitter = false;
    config.voice.url_scheme = "ws".to_string();
    config.summon_target = Some(VoiceTarget {
        guild_id: GUILD_ID.to_string(),
        channel_id: CHANNEL_ID.to_string(),
    });
    config
}

pub struct Harness {
    pub session: GatewaySession,
    pub gateway: Peer,
    pub replies: async_channel::Receiver<Reply>,
}

/// Bring a session up to Active against a mock gateway.
pub async fn start_session(config: GatewayConfig, heartbeat_interval: u64) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
    let addr = listener.local_addr().expect("gateway addr");
    let (api, replies) = RecordingApi::new(format!("ws://{addr}"));

    let start = tokio::spawn(GatewaySession::start(config, api));

    let mut gateway = Peer::accept(&listener).await;
    gateway
        .send(json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}}))
        .await;

    let identify = gateway.recv_op(2).await;
    assert_eq!(identify["d"]["token"], "bot-token");
    assert_eq!(identify["d"]["intents"], 641);

    gateway
        .send(json!({"op": 0, "s": 1, "t": "READY",
                     "d": {"session_id": "gateway-session",
                           "user": {"id": USER_ID, "username": "penny"}}}))
        .await;

    let session = start.await.expect("join").expect("session started");
    Harness {
        session,
        gateway,
        replies,
    }
}

pub fn interaction(name: &str) -> Value {
    json!({"op": 0, "s": 2, "t": "INTERACTION_CREATE",
           "d": {"id": "interaction-1", "token": "interaction-token", "guild_id": GUILD_ID,
                 "channel_id": "100", "data": {"name": name}}})
}
