//! At most one active heist per guild, and a cooldown between heists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_lock::Mutex;
use tracing::{debug, error, info};

use super::actor::{self, HeistHandle};
use super::event::{EventDeps, HeistContext, JoinOutcome};
use super::target::TargetCatalog;
use super::{EventId, JoinRejection};
use crate::clock::Clock;
use crate::render::Presenter;
use crate::store::HeistStore;
use crate::types::Snowflake;

type ActiveMap = Mutex<HashMap<Snowflake, HeistHandle>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeistSettings {
    /// Minimum time between one heist ending and the next starting.
    pub cooldown: Duration,
    /// How often the setup countdown advances.
    pub tick_interval: Duration,
}

impl Default for HeistSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60 * 60),
            tick_interval: Duration::from_secs(2),
        }
    }
}

/// A claim on one guild's entry in the registry, held by the event that
/// occupies it. Releasing only removes the entry if it still belongs to the
/// same event.
#[derive(Debug)]
pub struct RegistrySlot {
    active: Weak<ActiveMap>,
    guild_id: Snowflake,
    event_id: EventId,
}

impl RegistrySlot {
    pub async fn release(self) {
        if let Some(active) = self.active.upgrade() {
            release_from(&active, &self.guild_id, self.event_id).await;
        }
    }
}

async fn release_from(active: &ActiveMap, guild_id: &str, event_id: EventId) -> bool {
    let mut active = active.lock().await;
    if active.get(guild_id).map(HeistHandle::id) != Some(event_id) {
        return false;
    }
    active.remove(guild_id);
    debug!(guild_id, event_id, "released heist slot");
    true
}

pub struct HeistRegistry<S, P> {
    deps: EventDeps<S, P>,
    settings: HeistSettings,
    active: Arc<ActiveMap>,
    next_id: AtomicU64,
}

impl<S: HeistStore, P: Presenter> HeistRegistry<S, P> {
    pub fn new(
        catalog: TargetCatalog,
        store: Arc<S>,
        presenter: Arc<P>,
        clock: Arc<dyn Clock>,
        settings: HeistSettings,
    ) -> Self {
        Self {
            deps: EventDeps {
                catalog: Arc::new(catalog),
                store,
                presenter,
                clock,
                tick_interval: settings.tick_interval,
            },
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> HeistSettings {
        self.settings
    }

    pub fn catalog(&self) -> &TargetCatalog {
        &self.deps.catalog
    }

    pub fn store(&self) -> &Arc<S> {
        &self.deps.store
    }

    /// The live heist in `guild_id`, if any.
    pub async fn active(&self, guild_id: &str) -> Option<HeistHandle> {
        self.active
            .lock()
            .await
            .get(guild_id)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    pub async fn has_active(&self, guild_id: &str) -> bool {
        self.active(guild_id).await.is_some()
    }

    /// Whether a new heist may begin in `guild_id`: nothing is active and the
    /// last one ended at least one cooldown ago.
    ///
    /// If history cannot be read the answer is `true`.
    pub async fn can_start(&self, guild_id: &str) -> bool {
        if self.has_active(guild_id).await {
            return false;
        }

        let latest = match self.deps.store.latest_ended(guild_id).await {
            Ok(latest) => latest,
            Err(e) => {
                error!(guild_id, op = "can_start", error = %e, "failed to read heist history");
                return true;
            }
        };

        let Some(ended_at) = latest.and_then(|record| record.ended_at) else {
            return true;
        };
        match (self.deps.clock.now() - ended_at).to_std() {
            Ok(elapsed) => elapsed >= self.settings.cooldown,
            // Ended "in the future": treat as just ended.
            Err(_) => false,
        }
    }

    /// The live heist in the context's guild, creating one if there is none.
    pub async fn get_or_create(&self, context: HeistContext) -> HeistHandle {
        let mut active = self.active.lock().await;
        if let Some(handle) = active.get(&context.guild_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = RegistrySlot {
            active: Arc::downgrade(&self.active),
            guild_id: context.guild_id.clone(),
            event_id: id,
        };
        let guild_id = context.guild_id.clone();
        let handle = actor::spawn(id, context, self.deps.clone(), Some(slot));
        active.insert(guild_id.clone(), handle.clone());

        info!(event_id = id, guild_id = %guild_id, "a new heist has been created");
        handle
    }

    /// Drop the guild's entry, but only if it still belongs to `event_id`.
    pub async fn release(&self, guild_id: &str, event_id: EventId) -> bool {
        release_from(&self.active, guild_id, event_id).await
    }

    /// Join the guild's heist, creating one if the cooldown allows it.
    ///
    /// A join that could not open a heist is turned away before anything is
    /// created, so a rejected first join leaves the guild free.
    pub async fn join(
        &self,
        context: HeistContext,
        participant: &str,
        amount: u64,
    ) -> Result<JoinOutcome, JoinRejection> {
        let handle = match self.active(&context.guild_id).await {
            Some(handle) => handle,
            None => {
                if !self.can_start(&context.guild_id).await {
                    return Err(JoinRejection::Cooldown);
                }
                self.check_opening_join(amount)?;
                self.get_or_create(context).await
            }
        };
        handle.join(participant, amount).await
    }

    /// The checks a fresh heist would apply to its first join.
    fn check_opening_join(&self, amount: u64) -> Result<(), JoinRejection> {
        if amount == 0 {
            return Err(JoinRejection::InvalidAmount);
        }
        let minimum = self.deps.catalog.first().minimum_buyin;
        if amount < minimum {
            return Err(JoinRejection::BelowMinimumBuyin { minimum });
        }
        Ok(())
    }

    /// Force-end the guild's heist. Returns `false` if there was none.
    pub async fn end(&self, guild_id: &str) -> bool {
        match self.active(guild_id).await {
            Some(handle) => {
                handle.end().await;
                true
            }
            None => false,
        }
    }
}
