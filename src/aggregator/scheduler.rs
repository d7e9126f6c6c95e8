//! Fixed-interval polling loop with external cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Work driven by the scheduler, one unit per tick.
pub trait PollTask: Send {
    type Error: Display + Send;

    /// Name used in log lines
    fn name(&self) -> &'static str;

    /// Perform one unit of work. Failures are logged by the scheduler and
    /// never stop it.
    fn run_once(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Where the loop is between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next tick or for cancellation
    Idle,
    /// A task run is in progress; cancellation waits for it to finish
    Running,
    /// Terminal: the loop has returned
    Cancelled,
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub failures: u64,
}

/// Runs `task` immediately and then once per `every`, until `shutdown`
/// resolves.
///
/// Runs never overlap: a tick that comes due while a run is in progress is
/// deferred until that run completes, and later ticks are spaced `every`
/// apart from there. Cancellation is observed between runs, so a run in
/// progress always finishes before this returns. Cancellation is the only
/// way out of the loop.
pub async fn run_until_cancelled<T, S>(task: &mut T, every: Duration, shutdown: S) -> PollStats
where
    T: PollTask,
    S: Future<Output = ()>,
{
    // A zero period would spin; `interval` rejects it outright.
    let every = every.max(Duration::from_millis(1));
    let mut timer = tokio::time::interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);
    let mut stats = PollStats::default();
    let mut state = PollState::Idle;

    while state != PollState::Cancelled {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                state = PollState::Cancelled;
            }
            _ = timer.tick() => {
                state = PollState::Running;
                stats.cycles += 1;
                tracing::trace!(task = task.name(), cycle = stats.cycles, ?state, "Poll tick");
                if let Err(e) = task.run_once().await {
                    stats.failures += 1;
                    tracing::warn!(task = task.name(), cycle = stats.cycles, error = %e, "Poll cycle failed");
                }
                state = PollState::Idle;
            }
        }
    }

    tracing::info!(
        task = task.name(),
        cycles = stats.cycles,
        failures = stats.failures,
        "Poll loop stopped"
    );
    stats
}
