mod config;

use std::sync::Arc;

use penny_sdk::protocol::rest::CommandRegistration;
use penny_sdk::{GatewayConfig, GatewaySession, HttpApi, RestApi};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BotConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = config::config_path();
    let bot_config = BotConfig::load(&config_path)?;
    let token = config::read_token(&bot_config)?;

    let mut gateway_config = bot_config.gateway.clone();
    gateway_config.token = token.clone();

    let api = Arc::new(HttpApi::with_base_url(token, &bot_config.api_base)?);

    if let Some(guild_id) = &bot_config.registration_guild {
        register_commands(api.as_ref(), &gateway_config, guild_id).await;
    }

    info!("Connecting to the gateway...");
    let session = GatewaySession::start(gateway_config, api).await?;
    info!("Bot is running as {}, press Ctrl+C to stop", session.user_id());

    tokio::select! {
        () = session.closed() => warn!("Gateway session closed"),
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutting down");
        }
    }

    session.disconnect();
    Ok(())
}

/// Register every configured command in `guild_id`. Failures are logged;
/// commands registered earlier keep working.
async fn register_commands(api: &dyn RestApi, config: &GatewayConfig, guild_id: &str) {
    if config.application_id.is_empty() {
        warn!("gateway.application_id is not set, skipping command registration");
        return;
    }

    for command in &config.commands {
        let registration = CommandRegistration {
            name: command.name.clone(),
            description: command.description.clone(),
        };
        if let Err(e) = api
            .register_guild_command(&config.application_id, guild_id, &registration)
            .await
        {
            error!("Failed to register /{}: {}", command.name, e);
        }
    }
}
