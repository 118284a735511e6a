//! Presenting heist state to a Discord channel.
//!
//! [`heist_embed`] turns a [`HeistSnapshot`] into the status embed; a
//! [`Presenter`] gets that embed in front of people. Each heist owns one
//! status message: the first render creates it and every later render edits
//! it in place.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::heist::{HeistSnapshot, HeistState};
use crate::types::{Embed, Snowflake};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("heist has no target yet, nothing to render")]
    NothingToRender,

    #[error("presenter unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "io")]
    #[error(transparent)]
    Http(#[from] crate::http::HttpError),
}

/// Message surface for heist updates.
pub trait Presenter: Send + Sync + 'static {
    /// Show `snapshot`, editing `message_id` when given and sending a new
    /// message otherwise. Returns the id of the message now showing it.
    fn render(
        &self,
        snapshot: &HeistSnapshot,
        message_id: Option<&str>,
    ) -> impl Future<Output = Result<Snowflake, RenderError>> + Send;

    /// Post a one-off line of text (target upgrades).
    fn announce(
        &self,
        channel_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), RenderError>> + Send;
}

// ---------------------------------------------------------------------------
// Embed
// ---------------------------------------------------------------------------

/// Build the status embed. `None` until a target has been chosen.
pub fn heist_embed(snapshot: &HeistSnapshot) -> Option<Embed> {
    let target = snapshot.target.as_ref()?;

    let mut embed = Embed::new()
        .title(target.title)
        .description(target.description)
        .color(target.color)
        .field("Minimum Buyin", format_money(target.minimum_buyin), true)
        .field(
            "Total Contributed",
            format_money(snapshot.total_contributed),
            true,
        );

    embed = match snapshot.state {
        HeistState::Init | HeistState::Setup => {
            embed.field("Starting In", format_duration_long(snapshot.remaining), false)
        }
        HeistState::Running => embed.field("Status", "In Progress", false),
        HeistState::Ended => embed.field("Status", "Completed", false),
    };

    if let Some(next) = snapshot.next_target.as_ref() {
        let needed = next.upgrade_cost.saturating_sub(snapshot.total_contributed);
        embed = embed.field(
            "Next Target",
            format!("{} - {}", next.title, format_money(needed)),
            true,
        );
    }

    let members: String = snapshot
        .participants
        .iter()
        .map(|c| {
            format!(
                "- <@!{}> | {}\n",
                c.user_id,
                format_money(c.total_contributed)
            )
        })
        .collect();
    let members = if members.is_empty() {
        "No Participants".to_string()
    } else {
        members
    };

    Some(embed.field("Members", members, false))
}

/// `1234567` → `$1,234,567`.
pub fn format_money(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    out.push('$');
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Long-form duration in the largest fitting unit, rounded:
/// `58 seconds`, `1 minute`, `2 hours`.
///
/// The unit is pluralised once the value reaches one and a half units.
pub fn format_duration_long(duration: Duration) -> String {
    const SECOND: f64 = 1_000.0;
    const MINUTE: f64 = SECOND * 60.0;
    const HOUR: f64 = MINUTE * 60.0;
    const DAY: f64 = HOUR * 24.0;
    const UNITS: [(f64, &str); 4] = [
        (DAY, "day"),
        (HOUR, "hour"),
        (MINUTE, "minute"),
        (SECOND, "second"),
    ];

    let ms = duration.as_millis() as f64;
    for (unit, name) in UNITS {
        if ms >= unit {
            let plural = if ms >= unit * 1.5 { "s" } else { "" };
            return format!("{} {}{}", (ms / unit).round(), name, plural);
        }
    }
    format!("{} ms", ms)
}

// ---------------------------------------------------------------------------
// In-memory presenter
// ---------------------------------------------------------------------------

/// One call to [`MemoryPresenter::render`].
#[derive(Debug, Clone)]
pub struct Rendered {
    pub message_id: Snowflake,
    /// `true` when this call created the message rather than editing it.
    pub created: bool,
    pub snapshot: HeistSnapshot,
    pub embed: Embed,
}

/// Keeps every render and announcement in memory instead of sending them.
#[derive(Debug, Default)]
pub struct MemoryPresenter {
    inner: Mutex<MemoryPresenterState>,
}

#[derive(Debug, Default)]
struct MemoryPresenterState {
    renders: Vec<Rendered>,
    announcements: Vec<(Snowflake, String)>,
    messages_created: u64,
    failing: bool,
}

impl MemoryPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`RenderError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn renders(&self) -> Vec<Rendered> {
        self.lock().renders.clone()
    }

    pub fn last_render(&self) -> Option<Rendered> {
        self.lock().renders.last().cloned()
    }

    pub fn announcements(&self) -> Vec<(Snowflake, String)> {
        self.lock().announcements.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryPresenterState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Presenter for MemoryPresenter {
    async fn render(
        &self,
        snapshot: &HeistSnapshot,
        message_id: Option<&str>,
    ) -> Result<Snowflake, RenderError> {
        let embed = heist_embed(snapshot).ok_or(RenderError::NothingToRender)?;
        let mut state = self.lock();
        if state.failing {
            return Err(RenderError::Unavailable("presenter set to fail".to_string()));
        }
        let (message_id, created) = match message_id {
            Some(id) => (id.to_string(), false),
            None => {
                state.messages_created += 1;
                (format!("message-{}", state.messages_created), true)
            }
        };
        state.renders.push(Rendered {
            message_id: message_id.clone(),
            created,
            snapshot: snapshot.clone(),
            embed,
        });
        Ok(message_id)
    }

    async fn announce(&self, channel_id: &str, text: &str) -> Result<(), RenderError> {
        let mut state = self.lock();
        if state.failing {
            return Err(RenderError::Unavailable("presenter set to fail".to_string()));
        }
        state
            .announcements
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Discord presenter
// ---------------------------------------------------------------------------

/// Sends and edits the status message through the Discord REST API.
#[cfg(feature = "io")]
#[derive(Debug, Clone)]
pub struct DiscordPresenter {
    http: crate::http::DiscordHttpClient,
}

#[cfg(feature = "io")]
impl DiscordPresenter {
    pub fn new(http: crate::http::DiscordHttpClient) -> Self {
        Self { http }
    }
}

#[cfg(feature = "io")]
impl Presenter for DiscordPresenter {
    async fn render(
        &self,
        snapshot: &HeistSnapshot,
        message_id: Option<&str>,
    ) -> Result<Snowflake, RenderError> {
        use crate::types::CreateMessage;

        let embed = heist_embed(snapshot).ok_or(RenderError::NothingToRender)?;
        let body = CreateMessage::new().embed(embed);
        let message = match message_id {
            Some(id) => {
                self.http
                    .edit_message(&snapshot.channel_id, id, &body)
                    .await?
            }
            None => self.http.create_message(&snapshot.channel_id, &body).await?,
        };
        Ok(message.id)
    }

    async fn announce(&self, channel_id: &str, text: &str) -> Result<(), RenderError> {
        self.http.send_message(channel_id, text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heist::ledger::Contribution;
    use crate::heist::target::{BANK_HEIST, HOUSE_ROBBERY};

    fn snapshot(state: HeistState) -> HeistSnapshot {
        HeistSnapshot {
            event_id: 1,
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            state,
            target: Some(HOUSE_ROBBERY),
            next_target: Some(BANK_HEIST),
            total_contributed: 1_500,
            remaining: Duration::from_secs(58),
            participants: vec![
                Contribution {
                    user_id: "1".to_string(),
                    total_contributed: 1_000,
                },
                Contribution {
                    user_id: "2".to_string(),
                    total_contributed: 500,
                },
            ],
        }
    }

    #[test]
    fn money_is_grouped_in_thousands() {
        assert_eq!(format_money(0), "$0");
        assert_eq!(format_money(999), "$999");
        assert_eq!(format_money(1_000), "$1,000");
        assert_eq!(format_money(1_234_567), "$1,234,567");
    }

    #[test]
    fn durations_use_largest_unit() {
        assert_eq!(format_duration_long(Duration::ZERO), "0 ms");
        assert_eq!(format_duration_long(Duration::from_millis(400)), "400 ms");
        assert_eq!(format_duration_long(Duration::from_secs(1)), "1 second");
        assert_eq!(format_duration_long(Duration::from_secs(58)), "58 seconds");
        assert_eq!(format_duration_long(Duration::from_secs(60)), "1 minute");
        assert_eq!(format_duration_long(Duration::from_secs(90)), "2 minutes");
        assert_eq!(format_duration_long(Duration::from_secs(3_600)), "1 hour");
    }

    #[test]
    fn setup_embed_shows_countdown_next_target_and_members() {
        let embed = heist_embed(&snapshot(HeistState::Setup)).unwrap();
        assert_eq!(embed.title.as_deref(), Some("House Robbery"));
        assert_eq!(embed.color, Some(HOUSE_ROBBERY.color));
        assert_eq!(embed.field_value("Minimum Buyin"), Some("$1,000"));
        assert_eq!(embed.field_value("Total Contributed"), Some("$1,500"));
        assert_eq!(embed.field_value("Starting In"), Some("58 seconds"));
        assert_eq!(embed.field_value("Next Target"), Some("Bank Heist - $3,500"));
        assert_eq!(
            embed.field_value("Members"),
            Some("- <@!1> | $1,000\n- <@!2> | $500\n")
        );
    }

    #[test]
    fn status_field_follows_state() {
        let running = heist_embed(&snapshot(HeistState::Running)).unwrap();
        assert_eq!(running.field_value("Status"), Some("In Progress"));
        assert_eq!(running.field_value("Starting In"), None);

        let ended = heist_embed(&snapshot(HeistState::Ended)).unwrap();
        assert_eq!(ended.field_value("Status"), Some("Completed"));
    }

    #[test]
    fn last_tier_has_no_next_target_and_empty_members_placeholder() {
        let mut snap = snapshot(HeistState::Setup);
        snap.target = Some(BANK_HEIST);
        snap.next_target = None;
        snap.participants.clear();
        let embed = heist_embed(&snap).unwrap();
        assert_eq!(embed.field_value("Next Target"), None);
        assert_eq!(embed.field_value("Members"), Some("No Participants"));
    }

    #[test]
    fn nothing_to_render_without_target() {
        let mut snap = snapshot(HeistState::Init);
        snap.target = None;
        assert!(heist_embed(&snap).is_none());
    }

    #[tokio::test]
    async fn memory_presenter_creates_then_edits() {
        let presenter = MemoryPresenter::new();
        let snap = snapshot(HeistState::Setup);
        let id = presenter.render(&snap, None).await.unwrap();
        let again = presenter.render(&snap, Some(&id)).await.unwrap();
        assert_eq!(id, again);

        let renders = presenter.renders();
        assert!(renders[0].created);
        assert!(!renders[1].created);
    }

    #[tokio::test]
    async fn memory_presenter_can_fail_on_demand() {
        let presenter = MemoryPresenter::new();
        presenter.set_failing(true);
        let err = presenter
            .render(&snapshot(HeistState::Setup), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Unavailable(_)));
        assert!(presenter.announce("c", "hi").await.is_err());
        assert!(presenter.renders().is_empty());
    }
}
