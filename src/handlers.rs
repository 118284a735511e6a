//! Event handlers for the Discord bot.
//!
//! Each public function handles one category of gateway event, talking to
//! Discord through a [`DiscordHttpClient`]. The heist logic itself lives in
//! [`crate::commands`].

use tracing::{debug, error, info, warn};

use crate::bot::{BotContext, BotState};
use crate::commands::{self, HeistRequest, HEIST_COMMAND};
use crate::http::{DiscordHttpClient, HttpError};
use crate::render::Presenter;
use crate::store::HeistStore;
use crate::types::*;

// ---------------------------------------------------------------------------
// READY handler
// ---------------------------------------------------------------------------

/// Register slash commands once per application.
pub async fn on_ready(
    http: &DiscordHttpClient,
    state: &mut BotState,
    guild_id: Option<&str>,
    ready: ReadyEvent,
) {
    info!(user = %ready.user.tag(), "bot is ready!");

    let app_id = ready.application.id;
    if state.commands_registered_for.as_deref() == Some(app_id.as_str()) {
        debug!("slash commands already registered for this application");
        return;
    }

    match register_commands(http, &app_id, guild_id).await {
        Ok(count) => {
            info!(count, guild_id, "registered slash commands");
            state.commands_registered_for = Some(app_id);
        }
        Err(e) => warn!(error = %e, "failed to register slash commands"),
    }
}

/// Guild-scoped registration propagates instantly, so prefer it when a guild
/// is configured and clear the global set to avoid duplicates.
async fn register_commands(
    http: &DiscordHttpClient,
    app_id: &str,
    guild_id: Option<&str>,
) -> Result<usize, HttpError> {
    let cmds = commands::slash_commands();
    match guild_id {
        Some(guild_id) => {
            let registered = http
                .bulk_overwrite_guild_commands(app_id, guild_id, &cmds)
                .await?;
            if let Err(e) = http.bulk_overwrite_global_commands(app_id, &[]).await {
                warn!(error = %e, "failed to clear global commands");
            }
            Ok(registered.len())
        }
        None => {
            let registered = http.bulk_overwrite_global_commands(app_id, &cmds).await?;
            Ok(registered.len())
        }
    }
}

// ---------------------------------------------------------------------------
// INTERACTION_CREATE handler
// ---------------------------------------------------------------------------

/// Answer an interaction. Slash commands are deferred ephemerally first, then
/// the reply replaces the "thinking…" placeholder.
pub async fn on_interaction<S: HeistStore, P: Presenter>(
    ctx: &BotContext<S, P>,
    interaction: &Interaction,
) -> Result<(), HttpError> {
    match interaction.kind {
        InteractionType::Ping => {
            ctx.http
                .create_interaction_response(
                    &interaction.id,
                    &interaction.token,
                    &InteractionResponse::pong(),
                )
                .await
        }
        InteractionType::ApplicationCommand => handle_slash_command(ctx, interaction).await,
        other => {
            debug!(kind = ?other, "ignoring interaction");
            Ok(())
        }
    }
}

async fn handle_slash_command<S: HeistStore, P: Presenter>(
    ctx: &BotContext<S, P>,
    interaction: &Interaction,
) -> Result<(), HttpError> {
    let Some(name) = interaction.command_name() else {
        return Ok(());
    };
    if name != HEIST_COMMAND {
        warn!(command = name, "unknown slash command");
        return Ok(());
    }

    ctx.http
        .create_interaction_response(
            &interaction.id,
            &interaction.token,
            &InteractionResponse::deferred_ephemeral(),
        )
        .await?;

    let reply = match HeistRequest::from_interaction(interaction) {
        Ok(request) => {
            info!(
                user_id = %request.user_id,
                guild_id = %request.guild_id,
                amount = %request.amount,
                "/heist"
            );
            commands::run_heist_command(&ctx.registry, ctx.heist_channel_id.as_deref(), request)
                .await
        }
        Err(e) => {
            debug!(error = %e, "unusable /heist interaction");
            format!("Sorry, {}.", e)
        }
    };

    let data = InteractionCallbackData {
        content: Some(reply),
        ..Default::default()
    };
    if let Err(e) = ctx
        .http
        .edit_original_interaction_response(&interaction.application_id, &interaction.token, &data)
        .await
    {
        error!(interaction_id = %interaction.id, error = %e, "failed to send /heist reply");
        return Err(e);
    }
    Ok(())
}
