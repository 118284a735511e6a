//! Core bot infrastructure: wiring, gateway bridge, and the event loop.
//!
//! [`start`] builds the heist registry on top of the JSON store and the
//! Discord presenter, connects to the gateway, and dispatches each event to
//! [`crate::handlers`]. Interactions are handled on their own tasks so a slow
//! REST call never holds up the gateway.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, trace, warn};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig, DEFAULT_INTENTS};
use crate::handlers;
use crate::heist::{HeistRegistry, TargetCatalog};
use crate::http::DiscordHttpClient;
use crate::render::{DiscordPresenter, Presenter};
use crate::store::{HeistStore, JsonFileStore, StoreError};
use crate::types::Snowflake;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("failed to open heist store: {0}")]
    Store(#[from] StoreError),

    #[error("gateway connection ended")]
    GatewayClosed,
}

/// Everything an interaction handler needs, shared across tasks.
pub struct BotContext<S, P> {
    pub http: DiscordHttpClient,
    pub registry: HeistRegistry<S, P>,
    /// Only accept `/heist` here, when set.
    pub heist_channel_id: Option<Snowflake>,
}

/// Session-level bookkeeping owned by the event loop.
#[derive(Debug)]
pub struct BotState {
    /// Application whose slash commands have been registered, so reconnects
    /// don't re-register them.
    pub commands_registered_for: Option<Snowflake>,
    pub start_time: Instant,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            commands_registered_for: None,
            start_time: Instant::now(),
        }
    }
}

/// Run the bot until the gateway gives up.
pub async fn start(config: Config) -> Result<(), BotError> {
    let http = DiscordHttpClient::new(&config.token);
    let store = Arc::new(JsonFileStore::open(&config.store_path).await?);
    let presenter = Arc::new(DiscordPresenter::new(http.clone()));
    let registry = HeistRegistry::new(
        TargetCatalog::default(),
        store,
        presenter,
        Arc::new(SystemClock),
        config.heist,
    );

    let ctx = Arc::new(BotContext {
        http: http.clone(),
        registry,
        heist_channel_id: config.heist_channel_id.clone(),
    });

    let gateway_config = GatewayConfig {
        token: config.token.clone(),
        intents: DEFAULT_INTENTS,
    };
    let mut gw = gateway::connect(gateway_config);
    info!(
        heist_channel = ?config.heist_channel_id,
        store = %config.store_path.display(),
        "gateway started, entering event loop"
    );

    run_event_loop(&mut gw.events, &ctx, config.guild_id.as_deref()).await;

    warn!("event stream ended, bot shutting down");
    Err(BotError::GatewayClosed)
}

async fn run_event_loop<S: HeistStore, P: Presenter>(
    events: &mut tokio::sync::mpsc::Receiver<GatewayEvent>,
    ctx: &Arc<BotContext<S, P>>,
    guild_id: Option<&str>,
) {
    let mut state = BotState::default();

    while let Some(event) = events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => {
                handlers::on_ready(&ctx.http, &mut state, guild_id, ready).await;
            }

            GatewayEvent::Resumed => info!("gateway session resumed"),

            GatewayEvent::InteractionCreate(interaction) => {
                let ctx = Arc::clone(ctx);
                tokio::spawn(async move {
                    if let Err(e) = handlers::on_interaction(&ctx, &interaction).await {
                        error!(error = %e, "failed to handle interaction");
                    }
                });
            }

            GatewayEvent::Unknown {
                event_name: Some(ref name),
                ..
            } => {
                trace!(event = %name, "unhandled gateway event");
            }

            // Heartbeats, reconnects and invalid sessions are handled inside
            // the gateway driver.
            _ => {}
        }
    }

    info!(
        uptime_s = state.start_time.elapsed().as_secs(),
        "event loop finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_state_default_has_no_identity() {
        let state = BotState::default();
        assert!(state.commands_registered_for.is_none());
    }

    #[test]
    fn bot_state_start_time_is_recent() {
        let before = Instant::now();
        let state = BotState::default();
        assert!(state.start_time >= before);
        assert!(state.start_time <= Instant::now());
    }
}
