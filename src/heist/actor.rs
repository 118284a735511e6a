//! One task per heist.
//!
//! Joins from slash commands, countdown ticks and run-timer expiry all
//! arrive as [`HeistCommand`]s on a single queue. The task that owns the
//! [`HeistEvent`] applies them one at a time, so a tick can never observe a
//! half-applied join. Once the event is ENDED the task exits and the queue
//! closes; anything still queued gets [`JoinRejection::AlreadyEnded`].

use std::time::Duration;

use async_channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::event::{EventDeps, HeistContext, HeistEvent, HeistSnapshot, HeistState, JoinOutcome};
use super::ledger::ParticipantId;
use super::registry::RegistrySlot;
use super::{EventId, JoinRejection};
use crate::render::Presenter;
use crate::store::HeistStore;

pub enum HeistCommand {
    Join {
        participant: ParticipantId,
        amount: u64,
        reply: oneshot::Sender<Result<JoinOutcome, JoinRejection>>,
    },
    /// Advance the countdown. A tick stamped with an older countdown epoch
    /// than the event's current one is dropped; `None` always applies.
    Tick {
        epoch: Option<u64>,
    },
    Start,
    End {
        reply: Option<oneshot::Sender<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<HeistSnapshot>,
    },
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Drives the periodic setup tick and the end-of-run timer for one event.
pub trait Scheduler: Send {
    /// Begin ticking every `interval`, replacing any running ticker. Each
    /// tick carries `epoch`.
    fn start_ticking(&mut self, interval: Duration, epoch: u64);

    fn stop_ticking(&mut self);

    /// End the event once `after` has elapsed.
    fn schedule_end(&mut self, after: Duration);

    /// Stop the ticker and the run timer.
    fn cancel_all(&mut self);

    fn is_ticking(&self) -> bool;

    fn scheduled_end(&self) -> Option<Duration>;
}

/// Posts `Tick` and `End` commands back onto the event's own queue from
/// tokio timer tasks.
pub struct TaskScheduler {
    commands: Sender<HeistCommand>,
    ticker: Option<JoinHandle<()>>,
    run_timer: Option<(Duration, JoinHandle<()>)>,
}

impl TaskScheduler {
    pub fn new(commands: Sender<HeistCommand>) -> Self {
        Self {
            commands,
            ticker: None,
            run_timer: None,
        }
    }
}

impl Scheduler for TaskScheduler {
    fn start_ticking(&mut self, interval: Duration, epoch: u64) {
        self.stop_ticking();
        let commands = self.commands.clone();
        self.ticker = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticks = tokio::time::interval_at(start, interval);
            loop {
                ticks.tick().await;
                let tick = HeistCommand::Tick { epoch: Some(epoch) };
                if commands.send(tick).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_ticking(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn schedule_end(&mut self, after: Duration) {
        if let Some((_, timer)) = self.run_timer.take() {
            timer.abort();
        }
        let commands = self.commands.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = commands.send(HeistCommand::End { reply: None }).await;
        });
        self.run_timer = Some((after, timer));
    }

    fn cancel_all(&mut self) {
        self.stop_ticking();
        if let Some((_, timer)) = self.run_timer.take() {
            timer.abort();
        }
    }

    fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    fn scheduled_end(&self) -> Option<Duration> {
        self.run_timer.as_ref().map(|(after, _)| *after)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Records what was asked of it and never fires. Tests drive `tick` and
/// `end` by hand.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    ticking: Option<(Duration, u64)>,
    end_after: Option<Duration>,
}

impl ManualScheduler {
    pub fn interval(&self) -> Option<Duration> {
        self.ticking.map(|(interval, _)| interval)
    }

    pub fn epoch(&self) -> Option<u64> {
        self.ticking.map(|(_, epoch)| epoch)
    }
}

impl Scheduler for ManualScheduler {
    fn start_ticking(&mut self, interval: Duration, epoch: u64) {
        self.ticking = Some((interval, epoch));
    }

    fn stop_ticking(&mut self) {
        self.ticking = None;
    }

    fn schedule_end(&mut self, after: Duration) {
        self.end_after = Some(after);
    }

    fn cancel_all(&mut self) {
        self.ticking = None;
        self.end_after = None;
    }

    fn is_ticking(&self) -> bool {
        self.ticking.is_some()
    }

    fn scheduled_end(&self) -> Option<Duration> {
        self.end_after
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cheap, cloneable address of a running heist.
#[derive(Debug, Clone)]
pub struct HeistHandle {
    id: EventId,
    commands: Sender<HeistCommand>,
}

impl HeistHandle {
    pub fn id(&self) -> EventId {
        self.id
    }

    /// `true` once the owning task has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn join(
        &self,
        participant: impl Into<ParticipantId>,
        amount: u64,
    ) -> Result<JoinOutcome, JoinRejection> {
        let (reply, response) = oneshot::channel();
        let command = HeistCommand::Join {
            participant: participant.into(),
            amount,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return Err(JoinRejection::AlreadyEnded);
        }
        response.await.unwrap_or(Err(JoinRejection::AlreadyEnded))
    }

    /// Queue one countdown tick. Returns `false` if the heist is gone.
    pub async fn tick(&self) -> bool {
        self.commands
            .send(HeistCommand::Tick { epoch: None })
            .await
            .is_ok()
    }

    /// Queue a start. Returns `false` if the heist is gone.
    pub async fn start(&self) -> bool {
        self.commands.send(HeistCommand::Start).await.is_ok()
    }

    /// End the heist and wait until it has been processed.
    pub async fn end(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(HeistCommand::End { reply: Some(reply) })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// Current state, or `None` if the heist has already shut down.
    pub async fn snapshot(&self) -> Option<HeistSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HeistCommand::Snapshot { reply })
            .await
            .ok()?;
        response.await.ok()
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Create an event and spawn the task that owns it.
pub fn spawn<S: HeistStore, P: Presenter>(
    id: EventId,
    context: HeistContext,
    deps: EventDeps<S, P>,
    slot: Option<RegistrySlot>,
) -> HeistHandle {
    let (tx, rx) = async_channel::unbounded();
    let scheduler = TaskScheduler::new(tx.clone());
    let mut event = HeistEvent::new(id, context, deps, Box::new(scheduler));
    if let Some(slot) = slot {
        event = event.with_slot(slot);
    }
    tokio::spawn(run(event, rx));
    HeistHandle { id, commands: tx }
}

async fn run<S: HeistStore, P: Presenter>(
    mut event: HeistEvent<S, P>,
    commands: Receiver<HeistCommand>,
) {
    debug!(event_id = event.id(), guild_id = %event.context().guild_id, "heist task started");

    while let Ok(command) = commands.recv().await {
        match command {
            HeistCommand::Join {
                participant,
                amount,
                reply,
            } => {
                let result = event.join(&participant, amount).await;
                let _ = reply.send(result);
            }
            HeistCommand::Tick { epoch } => {
                trace!(event_id = event.id(), epoch, "tick");
                match epoch {
                    Some(epoch) => event.tick_for(epoch).await,
                    None => event.tick().await,
                }
            }
            HeistCommand::Start => event.start().await,
            HeistCommand::End { reply } => {
                event.end().await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            HeistCommand::Snapshot { reply } => {
                let _ = reply.send(event.snapshot());
            }
        }

        if event.state() == HeistState::Ended {
            break;
        }
    }

    commands.close();
    debug!(event_id = event.id(), "heist task stopped");
}
