//! The heist engine.
//!
//! A heist is a cooperative, time-boxed event: members pool money, the pool
//! picks a [`target`](target::Target) and upgrades it as thresholds are
//! crossed, a setup countdown runs down, and the heist starts and later ends.
//!
//! - [`target`]: the tier catalog and the selection rules.
//! - [`ledger`]: who contributed what.
//! - [`event`]: the state machine for a single heist.
//! - [`actor`]: the task that owns an event and serialises every mutation.
//! - [`registry`]: one active heist per guild, plus the cooldown between them.

pub mod actor;
pub mod event;
pub mod ledger;
pub mod registry;
pub mod target;

use thiserror::Error;

use crate::render::format_money;

pub use actor::{HeistHandle, ManualScheduler, Scheduler, TaskScheduler};
pub use event::{EventDeps, HeistContext, HeistEvent, HeistSnapshot, HeistState, JoinOutcome};
pub use ledger::{Contribution, ContributionLedger, ParticipantId};
pub use registry::{HeistRegistry, HeistSettings};
pub use target::{Target, TargetCatalog};

/// In-process identifier of a heist, assigned by the registry.
pub type EventId = u64;

/// Why a join was turned away. The `Display` text is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinRejection {
    #[error("The Heist has already started.")]
    AlreadyRunning,

    #[error("The Heist has already ended.")]
    AlreadyEnded,

    #[error("The minimum buyin for the Heist is {}!", format_money(*minimum))]
    BelowMinimumBuyin { minimum: u64 },

    #[error("You need to contribute a positive amount.")]
    InvalidAmount,

    #[error("That amount is too large.")]
    TooLarge,

    #[error("There is too much heat from the last heist. Come back later to start another one.")]
    Cooldown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_text_is_user_facing() {
        assert_eq!(
            JoinRejection::BelowMinimumBuyin { minimum: 5_000 }.to_string(),
            "The minimum buyin for the Heist is $5,000!"
        );
        assert_eq!(
            JoinRejection::AlreadyRunning.to_string(),
            "The Heist has already started."
        );
        assert_eq!(JoinRejection::TooLarge.to_string(), "That amount is too large.");
    }
}
