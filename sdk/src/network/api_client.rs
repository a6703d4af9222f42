use std::time::Duration;

use async_trait::async_trait;
use penny_protocol::rest::{CommandRegistration, GatewayBotResponse, InteractionResponse};
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::error::SdkError;

/// Default REST base for API v10.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// The REST calls the gateway and the command handlers depend on.
#[async_trait]
pub trait RestApi: Send + Sync {
    /// Websocket URL to open the gateway against, without query parameters.
    async fn gateway_url(&self) -> Result<String, SdkError>;

    /// Answer an interaction through its callback endpoint.
    async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), SdkError>;

    /// Create or overwrite a guild-scoped slash command.
    async fn register_guild_command(
        &self,
        application_id: &str,
        guild_id: &str,
        command: &CommandRegistration,
    ) -> Result<(), SdkError>;
}

/// [`RestApi`] over HTTPS with bot-token authorization.
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    pub fn new(token: impl Into<String>) -> Result<Self, SdkError> {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, SdkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response, SdkError> {
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SdkError::Api("bot token was rejected (401 Unauthorized)".to_string()));
        }
        Ok(response.error_for_status()?)
    }
}

#[async_trait]
impl RestApi for HttpApi {
    async fn gateway_url(&self) -> Result<String, SdkError> {
        let response = self
            .http
            .get(format!("{}/gateway/bot", self.base_url))
            .header("Authorization", self.authorization())
            .send()
            .await?;

        let body: GatewayBotResponse = Self::check(response)?.json().await?;
        debug!("[API] Gateway URL is {}", body.url);
        Ok(body.url)
    }

    async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        response: &InteractionResponse,
    ) -> Result<(), SdkError> {
        let reply = self
            .http
            .post(format!(
                "{}/interactions/{}/{}/callback",
                self.base_url, interaction_id, interaction_token
            ))
            .header("Authorization", self.authorization())
            .json(response)
            .send()
            .await?;

        Self::check(reply)?;
        debug!("[API] Answered interaction {}", interaction_id);
        Ok(())
    }

    async fn register_guild_command(
        &self,
        application_id: &str,
        guild_id: &str,
        command: &CommandRegistration,
    ) -> Result<(), SdkError> {
        let response = self
            .http
            .post(format!(
                "{}/applications/{}/guilds/{}/commands",
                self.base_url, application_id, guild_id
            ))
            .header("Authorization", self.authorization())
            .json(command)
            .send()
            .await?;

        Self::check(response)?;
        info!("[API] Registered /{} in guild {}", command.name, guild_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one HTTP request with `status` and `body`; yields the raw
    /// request text.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }

            let reply = format!(
                "HTTP/1.1 {status}\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.expect("write");
            stream.shutdown().await.ok();
            String::from_utf8(request).expect("utf-8 request")
        });
        (base, handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = header(&text, "content-length").map_or(0, |v| v.parse().unwrap_or(0));
        request.len() >= end + 4 + length
    }

    fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
        request.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then_some(value.trim())
        })
    }

    fn request_line(request: &str) -> &str {
        request.lines().next().unwrap_or_default()
    }

    #[tokio::test]
    async fn gateway_url_sends_bot_authorization() {
        let (base, server) = serve_once("200 OK", r#"{"url":"wss://gateway.example"}"#).await;
        let api = HttpApi::with_base_url("tok", base).expect("client");

        let url = api.gateway_url().await.expect("gateway url");
        let request = server.await.expect("server");

        assert_eq!(url, "wss://gateway.example");
        assert_eq!(request_line(&request), "GET /gateway/bot HTTP/1.1");
        assert_eq!(header(&request, "authorization"), Some("Bot tok"));
    }

    #[tokio::test]
    async fn interaction_response_sends_bot_authorization() {
        let (base, server) = serve_once("204 No Content", "").await;
        let api = HttpApi::with_base_url("tok", format!("{base}/")).expect("client");

        api.create_interaction_response("i1", "itok", &InteractionResponse::message("hi"))
            .await
            .expect("callback");
        let request = server.await.expect("server");

        assert_eq!(request_line(&request), "POST /interactions/i1/itok/callback HTTP/1.1");
        assert_eq!(header(&request, "authorization"), Some("Bot tok"));
        assert_eq!(header(&request, "content-type"), Some("application/json"));
        assert!(request.contains(r#""content":"hi""#), "{request}");
    }

    #[tokio::test]
    async fn command_registration_sends_bot_authorization() {
        let (base, server) = serve_once("201 Created", r#"{"id":"1"}"#).await;
        let api = HttpApi::with_base_url("tok", base).expect("client");
        let command = CommandRegistration {
            name: "summon".to_string(),
            description: "Join voice".to_string(),
        };

        api.register_guild_command("app", "g", &command).await.expect("register");
        let request = server.await.expect("server");

        assert_eq!(request_line(&request), "POST /applications/app/guilds/g/commands HTTP/1.1");
        assert_eq!(header(&request, "authorization"), Some("Bot tok"));
        assert!(request.contains(r#""name":"summon""#), "{request}");
    }

    #[tokio::test]
    async fn rejected_token_maps_to_api_error() {
        let (base, server) =
            serve_once("401 Unauthorized", r#"{"message":"401: Unauthorized"}"#).await;
        let api = HttpApi::with_base_url("bad", base).expect("client");

        let result = api.gateway_url().await;
        server.await.expect("server");

        match result {
            Err(SdkError::Api(message)) => assert!(message.contains("401"), "{message}"),
            other => panic!("expected an API error, got {other:?}"),
        }
    }
}
