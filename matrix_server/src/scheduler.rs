//! Fixed-tick frame scheduler.
//!
//! Each tick:
//! 1. fold newly bound players into the session,
//! 2. issue one bounded read per bound connection, all racing a single
//!    absolute deadline equal to the tick budget. Stragglers are cancelled
//!    and their partial bytes dropped, so a stalled client can never push
//!    the tick past budget,
//! 3. decode the most recent bytes into at most one command per player,
//! 4. run the simulation callback,
//! 5. sleep the remaining budget (never negative).
//!
//! Absent or disconnected clients yield "no command" rather than erroring
//! the loop.

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use matrix_shared::net::{decode_command, Command};

use crate::rendezvous::Session;

/// Upper bound on bytes pulled per player per tick; only the most recent
/// bytes are decoded anyway.
const READ_CHUNK: usize = 32;

/// Per-player input for one tick.
#[derive(Debug, Default)]
pub struct TickInputs {
    /// Players whose read completed this tick, with the decoded command
    /// (`None` = bytes arrived but matched no command).
    received: HashMap<String, Option<Command>>,
    /// All currently bound players, sorted.
    bound: Vec<String>,
    /// Players folded in at the start of this tick.
    joined: Vec<String>,
    tick: u64,
}

impl TickInputs {
    pub fn command(&self, name: &str) -> Option<Command> {
        self.received.get(name).copied().flatten()
    }

    /// True if any bytes arrived from this player this tick.
    pub fn received_from(&self, name: &str) -> bool {
        self.received.contains_key(name)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bound.iter().any(|n| n == name)
    }

    pub fn bound(&self) -> &[String] {
        &self.bound
    }

    pub fn joined(&self) -> &[String] {
        &self.joined
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}

/// Outcome of one simulation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    Continue,
    /// Distinct terminal condition (e.g. a stuck 2048 board); ends the run
    /// loop instead of being swallowed as a no-op.
    Terminal(String),
}

/// Remaining sleep after a tick: `max(0, tick_duration - elapsed)`.
pub fn sleep_budget(tick_duration: Duration, elapsed: Duration) -> Duration {
    tick_duration.saturating_sub(elapsed)
}

/// Drives a session at a fixed cadence.
pub struct FrameScheduler {
    tick_duration: Duration,
}

impl FrameScheduler {
    pub fn new(tick_duration: Duration) -> Self {
        Self { tick_duration }
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Runs until `on_tick` reports a terminal condition; returns its
    /// reason. Exactly one simulation tick is in flight at a time.
    pub async fn run<F>(&self, session: &mut Session, mut on_tick: F) -> anyhow::Result<String>
    where
        F: FnMut(&TickInputs) -> TickResult,
    {
        let mut tick: u64 = 0;
        loop {
            let t_start = Instant::now();

            let joined = session.poll_joins(tick);
            let received = gather_inputs(session, self.tick_duration).await;
            let inputs = TickInputs {
                received,
                bound: session.names(),
                joined,
                tick,
            };

            match on_tick(&inputs) {
                TickResult::Continue => {}
                TickResult::Terminal(reason) => {
                    info!(tick, %reason, "tick loop terminal");
                    return Ok(reason);
                }
            }

            time::sleep(sleep_budget(self.tick_duration, t_start.elapsed())).await;
            tick += 1;
        }
    }
}

/// One bounded read per bound connection, all racing the same absolute
/// deadline concurrently, so a silent player cannot starve the others.
/// A read still pending at the deadline is cancelled, dropping its
/// partial bytes.
async fn gather_inputs(
    session: &mut Session,
    budget: Duration,
) -> HashMap<String, Option<Command>> {
    let deadline = Instant::now() + budget;

    let mut reads = JoinSet::new();
    for (name, mut slot) in session.players_mut().drain() {
        reads.spawn(async move {
            let mut buf = BytesMut::zeroed(READ_CHUNK);
            let outcome = time::timeout_at(deadline, slot.stream.read(&mut buf[..])).await;
            (name, slot, outcome, buf)
        });
    }

    let mut received = HashMap::new();
    while let Some(joined) = reads.join_next().await {
        let Ok((name, slot, outcome, buf)) = joined else {
            continue;
        };
        match outcome {
            // EOF: client gone; its paddle simply stops responding.
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => {
                received.insert(name.clone(), decode_command(&buf[..n]));
            }
            Ok(Err(e)) => {
                debug!(player = %name, error = %e, "tick read failed");
            }
            // Deadline hit: no input from this player this tick.
            Err(_) => {}
        }
        session.players_mut().insert(name, slot);
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_shared::net::Direction;

    #[test]
    fn overlong_tick_sleeps_exactly_zero() {
        let tick = Duration::from_millis(25);
        assert_eq!(
            sleep_budget(tick, Duration::from_millis(40)),
            Duration::ZERO
        );
        assert_eq!(sleep_budget(tick, tick), Duration::ZERO);
    }

    #[test]
    fn budget_shrinks_with_elapsed() {
        let tick = Duration::from_millis(25);
        assert_eq!(
            sleep_budget(tick, Duration::from_millis(10)),
            Duration::from_millis(15)
        );
    }

    #[test]
    fn inputs_distinguish_silence_from_garbage() {
        let mut received = HashMap::new();
        received.insert("P1".to_string(), Some(Command::Move(Direction::Up)));
        received.insert("P2".to_string(), None);
        let inputs = TickInputs {
            received,
            bound: vec!["P1".into(), "P2".into(), "P3".into()],
            joined: vec![],
            tick: 7,
        };
        assert_eq!(inputs.command("P1"), Some(Command::Move(Direction::Up)));
        assert!(inputs.received_from("P2"));
        assert_eq!(inputs.command("P2"), None);
        assert!(!inputs.received_from("P3"));
        assert!(inputs.is_bound("P3"));
    }
}
