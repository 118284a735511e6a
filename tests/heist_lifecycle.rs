//! End-to-end heist lifecycles through the registry, with in-memory storage
//! and presentation and a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use heist_bot::clock::{Clock, ManualClock};
use heist_bot::commands::{run_heist_command, HeistRequest};
use heist_bot::heist::target::{BANK_HEIST, HOUSE_ROBBERY};
use heist_bot::heist::{
    HeistContext, HeistRegistry, HeistSettings, HeistState, JoinRejection, TargetCatalog,
};
use heist_bot::render::MemoryPresenter;
use heist_bot::store::{HeistStore, MemoryStore};

const GUILD: &str = "807465587633553409";
const CHANNEL: &str = "gambling";

struct Harness {
    registry: HeistRegistry<MemoryStore, MemoryPresenter>,
    store: Arc<MemoryStore>,
    presenter: Arc<MemoryPresenter>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let presenter = Arc::new(MemoryPresenter::new());
        let clock = Arc::new(ManualClock::default());
        let registry = HeistRegistry::new(
            TargetCatalog::default(),
            Arc::clone(&store),
            Arc::clone(&presenter),
            clock.clone(),
            HeistSettings::default(),
        );
        Self {
            registry,
            store,
            presenter,
            clock,
        }
    }

    fn context() -> HeistContext {
        HeistContext {
            guild_id: GUILD.to_string(),
            channel_id: CHANNEL.to_string(),
        }
    }

    async fn join(&self, who: &str, amount: u64) -> Result<heist_bot::heist::JoinOutcome, JoinRejection> {
        self.registry.join(Self::context(), who, amount).await
    }

    async fn snapshot(&self) -> heist_bot::heist::HeistSnapshot {
        self.registry
            .active(GUILD)
            .await
            .expect("an active heist")
            .snapshot()
            .await
            .expect("heist task alive")
    }
}

#[tokio::test(start_paused = true)]
async fn first_join_opens_setup_on_the_entry_tier() {
    let h = Harness::new();

    let outcome = h.join("alice", 1_000).await.unwrap();
    assert!(outcome.first_join);

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, HeistState::Setup);
    assert_eq!(snapshot.target, Some(HOUSE_ROBBERY));
    assert_eq!(snapshot.total_contributed, 1_000);
}

#[tokio::test(start_paused = true)]
async fn crossing_the_upgrade_cost_moves_to_the_next_tier() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;

    let outcome = h.join("bob", 4_000).await.unwrap();
    assert!(outcome.upgraded);

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.total_contributed, 5_000);
    assert_eq!(snapshot.target, Some(BANK_HEIST));
    assert_eq!(snapshot.remaining, BANK_HEIST.setup_duration);
    assert_eq!(
        h.presenter.announcements(),
        vec![(CHANNEL.to_string(), "We're aiming for a Bank Heist now!".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn buy_in_follows_the_current_tier() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();
    h.join("bob", 4_000).await.unwrap();

    assert_eq!(
        h.join("carol", 100).await.unwrap_err(),
        JoinRejection::BelowMinimumBuyin { minimum: 5_000 }
    );
    assert_eq!(h.snapshot().await.total_contributed, 5_000);
}

#[tokio::test(start_paused = true)]
async fn running_heist_turns_joins_away() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();

    tokio::time::sleep(HOUSE_ROBBERY.setup_duration + Duration::from_secs(1)).await;
    let before = h.snapshot().await;
    assert_eq!(before.state, HeistState::Running);

    assert_eq!(
        h.join("bob", 50_000).await.unwrap_err(),
        JoinRejection::AlreadyRunning
    );
    assert_eq!(h.snapshot().await, before);
}

#[tokio::test(start_paused = true)]
async fn cooldown_gates_the_next_heist() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();
    assert!(h.registry.end(GUILD).await);

    assert!(!h.registry.can_start(GUILD).await);
    h.clock.advance(chrono::Duration::minutes(59));
    assert!(!h.registry.can_start(GUILD).await);
    h.clock.advance(chrono::Duration::minutes(1));
    assert!(h.registry.can_start(GUILD).await);
}

#[tokio::test(start_paused = true)]
async fn full_lifecycle_is_persisted() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();
    h.join("bob", 4_000).await.unwrap();
    h.join("alice", 4_000).await.unwrap();

    // Bank Heist: one minute of setup, ten minutes of running.
    tokio::time::sleep(BANK_HEIST.setup_duration + BANK_HEIST.run_duration + Duration::from_secs(5))
        .await;
    assert!(!h.registry.has_active(GUILD).await);

    let records = h.store.records().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.heist.as_deref(), Some(BANK_HEIST.id));
    assert_eq!(record.participants.total(), 9_000);
    assert_eq!(record.participants.contributed("alice"), 5_000);
    assert!(record.ended_at.is_some());

    let latest = h.store.latest_ended(GUILD).await.unwrap().unwrap();
    assert_eq!(latest.ended_at, Some(h.clock.now()));

    let last = h.presenter.last_render().unwrap();
    assert_eq!(last.snapshot.state, HeistState::Ended);
    assert!(h.presenter.renders().iter().skip(1).all(|r| !r.created));
}

#[tokio::test(start_paused = true)]
async fn countdown_takes_the_expected_number_of_ticks() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();

    let tick = HeistSettings::default().tick_interval;
    let ticks = HOUSE_ROBBERY.setup_duration.as_millis().div_ceil(tick.as_millis()) as u32;

    tokio::time::sleep(tick * (ticks - 1) + tick / 2).await;
    assert_eq!(h.snapshot().await.state, HeistState::Setup);

    tokio::time::sleep(tick).await;
    assert_eq!(h.snapshot().await.state, HeistState::Running);
}

#[tokio::test(start_paused = true)]
async fn slash_command_drives_the_registry() {
    let h = Harness::new();
    let request = |user: &str, amount: &str| HeistRequest {
        guild_id: GUILD.to_string(),
        channel_id: CHANNEL.to_string(),
        user_id: user.to_string(),
        amount: amount.to_string(),
    };

    assert_eq!(
        run_heist_command(&h.registry, Some(CHANNEL), request("alice", "1k")).await,
        "Welcome to the Heist!"
    );
    assert_eq!(
        run_heist_command(&h.registry, Some(CHANNEL), request("bob", "4,000")).await,
        "Welcome to the Heist!"
    );
    assert_eq!(h.snapshot().await.target, Some(BANK_HEIST));

    h.registry.end(GUILD).await;
    assert_eq!(
        run_heist_command(&h.registry, Some(CHANNEL), request("carol", "5k")).await,
        "There is too much heat from the last heist. Come back later to start another one."
    );
}

#[tokio::test(start_paused = true)]
async fn ticks_queued_behind_slow_writes_do_not_shorten_a_reset() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Each write takes 20s, so ticks pile up behind both joins.
    h.store.set_delay(Duration::from_secs(20));
    let (bob, carol) = tokio::join!(h.join("bob", 1_000), h.join("carol", 1_000));
    bob.unwrap();
    carol.unwrap();
    h.store.set_delay(Duration::ZERO);

    // Carol's reset landed 20s ago.
    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, HeistState::Setup);
    assert!(snapshot.remaining >= Duration::from_secs(40), "{:?}", snapshot.remaining);
    assert!(snapshot.remaining <= Duration::from_secs(42), "{:?}", snapshot.remaining);
}

#[tokio::test(start_paused = true)]
async fn countdown_waits_for_a_join_stuck_in_storage() {
    let h = Harness::new();
    h.join("alice", 1_000).await.unwrap();
    tokio::time::sleep(Duration::from_secs(57)).await;
    assert_eq!(h.snapshot().await.remaining, Duration::from_secs(4));

    // The old countdown runs out while bob's write is still in flight.
    h.store.set_delay(Duration::from_secs(20));
    h.join("bob", 1_000).await.unwrap();
    h.store.set_delay(Duration::ZERO);

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, HeistState::Setup);
    assert!(snapshot.remaining >= Duration::from_secs(40), "{:?}", snapshot.remaining);
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_joins_share_one_heist() {
    let h = Harness::new();
    h.store.set_delay(Duration::from_secs(1));

    let (alice, bob) = tokio::join!(h.join("alice", 1_000), h.join("bob", 1_000));
    assert!(alice.unwrap().first_join);
    assert!(bob.unwrap().first_join);
    h.store.set_delay(Duration::ZERO);

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.total_contributed, 2_000);
    assert_eq!(snapshot.participants.len(), 2);
    assert_eq!(h.store.records().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_writes_leave_the_heist_running() {
    let h = Harness::new();
    h.store.set_failing(true);

    // History can't be read either; the heist still opens.
    h.join("alice", 1_000).await.unwrap();
    h.join("bob", 1_000).await.unwrap();

    let snapshot = h.snapshot().await;
    assert_eq!(snapshot.state, HeistState::Setup);
    assert_eq!(snapshot.total_contributed, 2_000);
    assert!(h.store.records().await.is_empty());
    assert!(h.presenter.last_render().is_some());
}
