//! The `/heist` slash command: definition, argument parsing and the reply.
//!
//! Nothing here talks to Discord directly; [`crate::handlers`] feeds
//! interactions in and sends the returned text back.

use thiserror::Error;
use tracing::{debug, info};

use crate::heist::{HeistContext, HeistRegistry};
use crate::render::Presenter;
use crate::store::HeistStore;
use crate::types::*;

pub const HEIST_COMMAND: &str = "heist";

/// Slash command option type for strings.
const OPTION_STRING: u8 = 3;

/// Returns the list of slash commands to register with Discord.
pub fn slash_commands() -> Vec<ApplicationCommand> {
    vec![ApplicationCommand {
        id: None,
        name: HEIST_COMMAND.to_string(),
        description: "Start a heist that could take several hours and have multiple stages. \
                      Try your luck for big payouts!"
            .to_string(),
        options: vec![ApplicationCommandOption {
            name: "amount".to_string(),
            description: "How much you want to contribute to the Heist.".to_string(),
            kind: OPTION_STRING,
            required: true,
        }],
        kind: 1,
    }]
}

// ---------------------------------------------------------------------------
// Amount parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("no amount given")]
    Empty,

    #[error("`{0}` is not an amount")]
    Invalid(String),

    #[error("amount is too large")]
    TooLarge,
}

/// Parse a user-typed amount such as `5000`, `5,000`, `5_000`, `5k` or
/// `1.5m` into whole units.
pub fn parse_amount(input: &str) -> Result<u64, AmountError> {
    let trimmed = input.trim().trim_start_matches('$');
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    let invalid = || AmountError::Invalid(input.trim().to_string());

    let cleaned: String = trimmed
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();

    let (number, multiplier) = match cleaned.char_indices().last() {
        Some((i, 'k')) => (&cleaned[..i], 1_000u64),
        Some((i, 'm')) => (&cleaned[..i], 1_000_000u64),
        _ => (cleaned.as_str(), 1u64),
    };

    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| AmountError::TooLarge)?
    };
    let mut amount = whole.checked_mul(multiplier).ok_or(AmountError::TooLarge)?;

    // Fractional part, only as far as the multiplier reaches.
    let mut scale = multiplier;
    for digit in fraction.chars() {
        scale /= 10;
        let value = u64::from(digit as u8 - b'0');
        if scale == 0 {
            if value != 0 {
                return Err(invalid());
            }
            continue;
        }
        amount = amount
            .checked_add(value * scale)
            .ok_or(AmountError::TooLarge)?;
    }

    Ok(amount)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("this command can only be used in a server")]
    NotInGuild,

    #[error("interaction has no author")]
    MissingAuthor,

    #[error("the amount option is required")]
    MissingAmount,
}

/// The parts of a `/heist` interaction the command needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeistRequest {
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
    pub user_id: Snowflake,
    /// The raw `amount` option, unparsed.
    pub amount: String,
}

impl HeistRequest {
    pub fn from_interaction(interaction: &Interaction) -> Result<Self, RequestError> {
        let guild_id = interaction
            .guild_id
            .clone()
            .ok_or(RequestError::NotInGuild)?;
        let channel_id = interaction
            .channel_id
            .clone()
            .ok_or(RequestError::NotInGuild)?;
        let user_id = interaction
            .author()
            .map(|u| u.id.clone())
            .ok_or(RequestError::MissingAuthor)?;
        let amount = interaction
            .option_string("amount")
            .ok_or(RequestError::MissingAmount)?;
        Ok(Self {
            guild_id,
            channel_id,
            user_id,
            amount,
        })
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Run `/heist` and return the (ephemeral) reply text.
///
/// `heist_channel` restricts the command to one channel when set.
pub async fn run_heist_command<S: HeistStore, P: Presenter>(
    registry: &HeistRegistry<S, P>,
    heist_channel: Option<&str>,
    request: HeistRequest,
) -> String {
    if let Some(channel) = heist_channel {
        if request.channel_id != channel {
            debug!(channel_id = %request.channel_id, "heist command used outside the heist channel");
            return format!("You can only use /heist commands in the <#{channel}> channel.");
        }
    }

    let amount = match parse_amount(&request.amount) {
        Ok(amount) => amount,
        Err(AmountError::TooLarge) => return "That amount is too large.".to_string(),
        Err(_) => {
            return format!(
                "`{}` is not an amount. Try something like `5000` or `5k`.",
                request.amount.trim()
            )
        }
    };

    let context = HeistContext {
        guild_id: request.guild_id,
        channel_id: request.channel_id,
    };
    match registry.join(context, &request.user_id, amount).await {
        Ok(outcome) if outcome.first_join => "Welcome to the Heist!".to_string(),
        Ok(_) => "Contribution updated.".to_string(),
        Err(rejection) => {
            info!(user_id = %request.user_id, amount, reason = %rejection, "heist join rejected");
            rejection.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::heist::{HeistSettings, TargetCatalog};
    use crate::render::MemoryPresenter;
    use crate::store::MemoryStore;

    #[test]
    fn parses_plain_and_separated_amounts() {
        assert_eq!(parse_amount("5000"), Ok(5_000));
        assert_eq!(parse_amount(" 5,000 "), Ok(5_000));
        assert_eq!(parse_amount("1_000_000"), Ok(1_000_000));
        assert_eq!(parse_amount("$250"), Ok(250));
        assert_eq!(parse_amount("0"), Ok(0));
    }

    #[test]
    fn parses_suffixes() {
        assert_eq!(parse_amount("5k"), Ok(5_000));
        assert_eq!(parse_amount("1.5K"), Ok(1_500));
        assert_eq!(parse_amount("2m"), Ok(2_000_000));
        assert_eq!(parse_amount(".25m"), Ok(250_000));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_amount(""), Err(AmountError::Empty));
        assert_eq!(parse_amount("lots"), Err(AmountError::Invalid("lots".into())));
        assert_eq!(parse_amount("-5"), Err(AmountError::Invalid("-5".into())));
        assert_eq!(parse_amount("1.5"), Err(AmountError::Invalid("1.5".into())));
        assert_eq!(parse_amount("k"), Err(AmountError::Invalid("k".into())));
        assert_eq!(
            parse_amount("99999999999999999999"),
            Err(AmountError::TooLarge)
        );
    }

    #[test]
    fn registers_one_required_string_option() {
        let commands = slash_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "heist");
        let option = &commands[0].options[0];
        assert_eq!(option.name, "amount");
        assert_eq!(option.kind, OPTION_STRING);
        assert!(option.required);
    }

    fn registry() -> HeistRegistry<MemoryStore, MemoryPresenter> {
        HeistRegistry::new(
            TargetCatalog::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryPresenter::new()),
            Arc::new(ManualClock::default()),
            HeistSettings::default(),
        )
    }

    fn request(user: &str, amount: &str) -> HeistRequest {
        HeistRequest {
            guild_id: "g".into(),
            channel_id: "gambling".into(),
            user_id: user.into(),
            amount: amount.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replies_follow_the_join_outcome() {
        let registry = registry();
        let channel = Some("gambling");

        assert_eq!(
            run_heist_command(&registry, channel, request("alice", "1k")).await,
            "Welcome to the Heist!"
        );
        assert_eq!(
            run_heist_command(&registry, channel, request("alice", "500")).await,
            "Contribution updated."
        );
        assert_eq!(
            run_heist_command(&registry, channel, request("bob", "10")).await,
            "The minimum buyin for the Heist is $1,000!"
        );
        assert_eq!(
            run_heist_command(&registry, channel, request("bob", "0")).await,
            "You need to contribute a positive amount."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_channel_is_turned_away() {
        let registry = registry();
        let mut req = request("alice", "1000");
        req.channel_id = "general".into();

        assert_eq!(
            run_heist_command(&registry, Some("gambling"), req.clone()).await,
            "You can only use /heist commands in the <#gambling> channel."
        );
        assert!(!registry.has_active("g").await);

        // Without a configured channel any channel works.
        assert_eq!(
            run_heist_command(&registry, None, req).await,
            "Welcome to the Heist!"
        );
    }

    #[test]
    fn request_needs_a_guild() {
        let interaction: Interaction = serde_json::from_value(serde_json::json!({
            "id": "1",
            "application_id": "2",
            "type": 2,
            "token": "tok",
            "channel_id": "20",
            "user": { "id": "30", "username": "robber" },
            "data": { "name": "heist", "options": [{ "name": "amount", "type": 3, "value": "5k" }] }
        }))
        .unwrap();
        assert_eq!(
            HeistRequest::from_interaction(&interaction),
            Err(RequestError::NotInGuild)
        );
    }
}
