//! The state machine for a single heist.
//!
//! ```text
//!  INIT ──first join──▶ SETUP ──countdown hits 0──▶ RUNNING ──▶ ENDED
//!    └──────────────────────┴──────── end() ────────────┴────────▲
//! ```
//!
//! A [`HeistEvent`] is owned by exactly one task (see [`super::actor`]) and
//! is only ever mutated through `&mut self`, so each operation sees the
//! state left by the previous one. Join rejections come back as
//! [`JoinRejection`] values with nothing changed. Storage and presentation
//! failures are logged and otherwise ignored: the in-memory event stays the
//! source of truth.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::actor::Scheduler;
use super::ledger::{Contribution, ContributionLedger, LedgerError};
use super::registry::RegistrySlot;
use super::target::{Target, TargetCatalog};
use super::{EventId, JoinRejection};
use crate::clock::Clock;
use crate::render::{format_money, Presenter};
use crate::store::{HeistRecord, HeistStore, RecordId};
use crate::types::Snowflake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeistState {
    /// Created, no target chosen, waiting for the first join.
    Init,
    /// Target chosen, countdown running, joins and upgrades accepted.
    Setup,
    /// Countdown expired. No more joins.
    Running,
    /// Terminal.
    Ended,
}

/// Where a heist lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeistContext {
    pub guild_id: Snowflake,
    /// Channel the status message and announcements go to.
    pub channel_id: Snowflake,
}

/// Everything a heist needs from the outside world.
pub struct EventDeps<S, P> {
    pub catalog: Arc<TargetCatalog>,
    pub store: Arc<S>,
    pub presenter: Arc<P>,
    pub clock: Arc<dyn Clock>,
    pub tick_interval: Duration,
}

impl<S, P> Clone for EventDeps<S, P> {
    fn clone(&self) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            store: Arc::clone(&self.store),
            presenter: Arc::clone(&self.presenter),
            clock: Arc::clone(&self.clock),
            tick_interval: self.tick_interval,
        }
    }
}

/// What an accepted join did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// `true` the first time this participant joins; later joins top up.
    pub first_join: bool,
    pub participant_total: u64,
    pub total_contributed: u64,
    /// Id of the target after the join.
    pub target: &'static str,
    pub upgraded: bool,
}

/// Read-only view of a heist handed to presenters.
#[derive(Debug, Clone, PartialEq)]
pub struct HeistSnapshot {
    pub event_id: EventId,
    pub guild_id: Snowflake,
    pub channel_id: Snowflake,
    pub state: HeistState,
    pub target: Option<Target>,
    pub next_target: Option<Target>,
    pub total_contributed: u64,
    /// Time left on the setup countdown.
    pub remaining: Duration,
    pub participants: Vec<Contribution>,
}

pub struct HeistEvent<S, P> {
    id: EventId,
    context: HeistContext,
    state: HeistState,
    /// Index into `catalog`; only ever moves forward.
    target: Option<usize>,
    ledger: ContributionLedger,
    countdown: Duration,
    /// Bumped on every countdown reset; ticks from before it are stale.
    countdown_epoch: u64,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    record_id: Option<RecordId>,
    message_id: Option<Snowflake>,
    deps: EventDeps<S, P>,
    scheduler: Box<dyn Scheduler>,
    slot: Option<RegistrySlot>,
}

impl<S: HeistStore, P: Presenter> HeistEvent<S, P> {
    pub fn new(
        id: EventId,
        context: HeistContext,
        deps: EventDeps<S, P>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        let created_at = deps.clock.now();
        Self {
            id,
            context,
            state: HeistState::Init,
            target: None,
            ledger: ContributionLedger::new(),
            countdown: Duration::ZERO,
            countdown_epoch: 0,
            created_at,
            ended_at: None,
            record_id: None,
            message_id: None,
            deps,
            scheduler,
            slot: None,
        }
    }

    /// Free `slot` in the registry when this heist ends.
    pub fn with_slot(mut self, slot: RegistrySlot) -> Self {
        self.slot = Some(slot);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn context(&self) -> &HeistContext {
        &self.context
    }

    pub fn state(&self) -> HeistState {
        self.state
    }

    pub fn target_index(&self) -> Option<usize> {
        self.target
    }

    pub fn target(&self) -> Option<Target> {
        self.target.and_then(|i| self.deps.catalog.get(i)).copied()
    }

    /// The tier an upgrade would move to next.
    pub fn next_target(&self) -> Option<Target> {
        let next = match self.target {
            Some(current) => self.deps.catalog.next(current)?,
            None => 0,
        };
        self.deps.catalog.get(next).copied()
    }

    pub fn ledger(&self) -> &ContributionLedger {
        &self.ledger
    }

    pub fn countdown(&self) -> Duration {
        self.countdown
    }

    pub fn countdown_epoch(&self) -> u64 {
        self.countdown_epoch
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_ticking(&self) -> bool {
        self.scheduler.is_ticking()
    }

    /// Run length the end timer was armed with, while one is pending.
    pub fn scheduled_end(&self) -> Option<Duration> {
        self.scheduler.scheduled_end()
    }

    pub fn snapshot(&self) -> HeistSnapshot {
        HeistSnapshot {
            event_id: self.id,
            guild_id: self.context.guild_id.clone(),
            channel_id: self.context.channel_id.clone(),
            state: self.state,
            target: self.target(),
            next_target: self.target.and(self.next_target()),
            total_contributed: self.ledger.total(),
            remaining: self.countdown,
            participants: self.ledger.iter().cloned().collect(),
        }
    }

    /// The document persisted for this heist, stamped as updated at `now`.
    pub fn record(&self, now: DateTime<Utc>) -> HeistRecord {
        HeistRecord {
            id: self.record_id.clone(),
            guild_id: self.context.guild_id.clone(),
            participants: self.ledger.clone(),
            heist: self.target().map(|t| t.id.to_string()),
            created_at: Some(self.created_at),
            updated_at: Some(now),
            ended_at: self.ended_at,
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Put `amount` into the heist on behalf of `participant`.
    ///
    /// The first accepted join picks the target and opens setup. Later joins
    /// either upgrade the target by one tier or restart the countdown.
    pub async fn join(
        &mut self,
        participant: &str,
        amount: u64,
    ) -> Result<JoinOutcome, JoinRejection> {
        match self.state {
            HeistState::Running => return Err(JoinRejection::AlreadyRunning),
            HeistState::Ended => return Err(JoinRejection::AlreadyEnded),
            HeistState::Init | HeistState::Setup => {}
        }
        if amount == 0 {
            return Err(JoinRejection::InvalidAmount);
        }

        let minimum = self
            .target()
            .unwrap_or(*self.deps.catalog.first())
            .minimum_buyin;
        let prospective = self.ledger.contributed(participant).saturating_add(amount);
        if prospective < minimum {
            return Err(JoinRejection::BelowMinimumBuyin { minimum });
        }

        let added = self.ledger.add(participant, amount).map_err(|e| match e {
            LedgerError::ZeroAmount => JoinRejection::InvalidAmount,
            LedgerError::Overflow => JoinRejection::TooLarge,
        })?;

        let upgraded = if self.state == HeistState::Init {
            self.state = HeistState::Setup;
            self.choose_target();
            false
        } else {
            let upgraded = self.try_upgrade();
            if !upgraded {
                self.reset_countdown();
            }
            upgraded
        };

        self.persist("join").await;
        if upgraded {
            self.announce_upgrade().await;
        }
        self.render().await;

        let target = self.target().map_or("", |t| t.id);
        info!(
            event_id = self.id,
            participant,
            amount,
            total = self.ledger.total(),
            tier = target,
            first_join = added.first,
            "heist contribution recorded"
        );

        Ok(JoinOutcome {
            first_join: added.first,
            participant_total: added.participant_total,
            total_contributed: self.ledger.total(),
            target,
            upgraded,
        })
    }

    /// Advance the setup countdown by one tick interval.
    ///
    /// Outside SETUP this only makes sure ticking is stopped.
    pub async fn tick(&mut self) {
        if self.state != HeistState::Setup {
            self.scheduler.stop_ticking();
            return;
        }

        self.countdown = self.countdown.saturating_sub(self.deps.tick_interval);
        if self.countdown.is_zero() {
            self.start().await;
        } else {
            self.render().await;
        }
    }

    /// Apply a tick sent by the ticker armed at `epoch`. Ticks that were
    /// already queued when the countdown was last reset are dropped, so they
    /// never eat into the new window.
    pub async fn tick_for(&mut self, epoch: u64) {
        if epoch != self.countdown_epoch {
            trace!(
                event_id = self.id,
                epoch,
                current = self.countdown_epoch,
                "dropping stale tick"
            );
            return;
        }
        self.tick().await;
    }

    /// SETUP → RUNNING. No-op in any other state.
    pub async fn start(&mut self) {
        if self.state != HeistState::Setup {
            return;
        }

        self.scheduler.stop_ticking();
        self.state = HeistState::Running;
        self.countdown = Duration::ZERO;
        if let Some(target) = self.target() {
            self.scheduler.schedule_end(target.run_duration);
        }
        self.render().await;

        info!(
            event_id = self.id,
            tier = self.target().map_or("", |t| t.title),
            "heist has begun"
        );
    }

    /// Any state → ENDED. Stops timers, records the end time, and frees the
    /// registry slot.
    pub async fn end(&mut self) {
        if self.state == HeistState::Ended {
            debug!(event_id = self.id, "heist already ended");
            return;
        }

        let from = self.state;
        self.state = HeistState::Ended;
        self.scheduler.cancel_all();
        self.ended_at = Some(self.deps.clock.now());

        if self.record_id.is_some() || !self.ledger.is_empty() {
            self.persist("end").await;
        }
        if let Some(slot) = self.slot.take() {
            slot.release().await;
        }
        if self.target.is_some() {
            self.render().await;
        }

        info!(
            event_id = self.id,
            from = ?from,
            tier = self.target().map_or("", |t| t.title),
            "heist has ended"
        );
    }

    // -----------------------------------------------------------------------
    // Target selection
    // -----------------------------------------------------------------------

    fn choose_target(&mut self) {
        if self.target.is_some() {
            warn!(event_id = self.id, "trying to choose a target when one is already chosen");
            return;
        }
        let index = self.deps.catalog.first_affordable(self.ledger.total());
        self.set_target(index);
    }

    /// Move up exactly one tier if the pool now covers its upgrade cost.
    fn try_upgrade(&mut self) -> bool {
        let Some(current) = self.target else {
            warn!(event_id = self.id, "upgrade attempted before a target was chosen");
            return false;
        };
        let Some(next) = self.deps.catalog.next(current) else {
            return false;
        };
        let Some(cost) = self.deps.catalog.get(next).map(|t| t.upgrade_cost) else {
            return false;
        };
        if self.ledger.total() < cost {
            return false;
        }
        self.set_target(next);
        true
    }

    fn set_target(&mut self, index: usize) {
        if self.target.is_some_and(|current| index <= current) {
            warn!(event_id = self.id, index, "refusing to move target backwards");
            return;
        }
        self.target = Some(index);
        self.reset_countdown();
    }

    /// Rearm the countdown at the current target's full setup window and
    /// restart the ticker in step with it.
    fn reset_countdown(&mut self) {
        if self.state != HeistState::Setup {
            return;
        }
        let Some(target) = self.target() else {
            return;
        };
        self.countdown = target.setup_duration;
        self.countdown_epoch += 1;
        self.scheduler
            .start_ticking(self.deps.tick_interval, self.countdown_epoch);
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    async fn persist(&mut self, op: &'static str) {
        let record = self.record(self.deps.clock.now());
        let result = if self.record_id.is_some() {
            self.deps.store.update(record).await
        } else {
            self.deps.store.create(record).await
        };

        match result {
            Ok(saved) => {
                if self.record_id.is_none() {
                    debug!(event_id = self.id, record_id = ?saved.id, "heist record created");
                }
                self.record_id = saved.id;
            }
            Err(e) => {
                error!(event_id = self.id, op, error = %e, "failed to persist heist");
            }
        }
    }

    async fn render(&mut self) {
        if self.target.is_none() {
            warn!(event_id = self.id, "render requested before a target was chosen");
            return;
        }

        let snapshot = self.snapshot();
        let result = self
            .deps
            .presenter
            .render(&snapshot, self.message_id.as_deref())
            .await;

        match result {
            Ok(message_id) => self.message_id = Some(message_id),
            Err(e) => {
                error!(event_id = self.id, op = "render", error = %e, "failed to render heist");
            }
        }
    }

    async fn announce_upgrade(&mut self) {
        let Some(target) = self.target() else {
            return;
        };

        let mut text = format!("We're aiming for a {} now!", target.title);
        if let Some(next) = self.next_target() {
            let needed = next.upgrade_cost.saturating_sub(self.ledger.total());
            if needed > 0 {
                text.push_str(&format!(
                    " Contribute another {} to upgrade to {}.",
                    format_money(needed),
                    next.title
                ));
            }
        }

        info!(event_id = self.id, tier = target.id, "heist target upgraded");
        if let Err(e) = self
            .deps
            .presenter
            .announce(&self.context.channel_id, &text)
            .await
        {
            error!(event_id = self.id, op = "announce", error = %e, "failed to announce upgrade");
        }
    }
}

impl<S, P> std::fmt::Debug for HeistEvent<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeistEvent")
            .field("id", &self.id)
            .field("guild_id", &self.context.guild_id)
            .field("state", &self.state)
            .field("target", &self.target)
            .field("total", &self.ledger.total())
            .field("countdown", &self.countdown)
            .finish()
    }
}
