//! A rendezvous barrier enforcing the completion order A, B, C, A, B, C, ...
//!
//! Any number of threads may call into a [`Relay`] for any stage in any order. A call blocks
//! until its stage holds the turn, completes, and passes the turn to the next stage in the
//! cycle. The first stage to complete is always [`Stage::A`].
//!
//! Callers are responsible for balancing the stages. A call whose stage never gets the turn
//! back (for example a second `B` when only one `A` is ever issued) blocks forever. Use
//! [`Relay::try_run`] where that must be bounded.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crossbeam_utils::CachePadded;
use parking_lot::{const_mutex, Condvar, Mutex, MutexGuard};
use static_assertions::{assert_impl_all, const_assert};
use tracing::{debug, trace};

use crate::{Error, Result};

/// One of the three stages of the relay cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Stage {
    A = 0,
    B = 1,
    C = 2,
}

const_assert!(std::mem::size_of::<Stage>() == 1);

impl Stage {
    /// All stages in cycle order.
    pub const ALL: [Stage; 3] = [Stage::A, Stage::B, Stage::C];

    /// Returns the stage that gets the turn after `self`.
    #[inline]
    pub const fn next(self) -> Self {
        match self {
            Stage::A => Stage::B,
            Stage::B => Stage::C,
            Stage::C => Stage::A,
        }
    }

    /// Position of the stage in the cycle (`A` = 0, `B` = 1, `C` = 2).
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The stage expected at position `i` of a completion log.
    #[inline]
    pub const fn at(i: usize) -> Self {
        Self::ALL[i % 3]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::A => "A",
            Stage::B => "B",
            Stage::C => "C",
        };
        f.write_str(name)
    }
}

struct Turn {
    next: Stage,
    completed: u64,
}

/// The relay state: which stage holds the turn and how many stages have completed.
///
/// The turn is the only piece of shared state. Waiting callers sleep on the condition variable
/// of their stage and are woken only when the turn passes to that stage.
pub struct Relay {
    turn: CachePadded<Mutex<Turn>>,
    batons: [Condvar; 3],
}

assert_impl_all!(Relay: Send, Sync);

impl Relay {
    /// Creates a relay whose first turn belongs to [`Stage::A`].
    pub const fn new() -> Self {
        Self {
            turn: CachePadded::new(const_mutex(Turn {
                next: Stage::A,
                completed: 0,
            })),
            batons: [Condvar::new(), Condvar::new(), Condvar::new()],
        }
    }

    /// Waits for the turn of `stage`, runs `work` while holding it, then hands the turn to
    /// `stage.next()`.
    ///
    /// The turn is handed on even if `work` panics.
    ///
    /// `work` must not call back into this relay.
    pub fn run<R>(&self, stage: Stage, work: impl FnOnce() -> R) -> R {
        let turn = self.wait_turn(stage);
        self.complete(turn, stage, work)
    }

    /// Like [`Relay::run`], but gives up if the turn of `stage` has not arrived within
    /// `timeout`. On timeout `work` is not run and the relay state is unchanged.
    pub fn try_run<R>(
        &self,
        stage: Stage,
        timeout: Duration,
        work: impl FnOnce() -> R,
    ) -> Result<R> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Ok(self.run(stage, work));
        };
        let mut turn = self.turn.lock();
        while turn.next != stage {
            let baton = &self.batons[stage.index()];
            if baton.wait_until(&mut turn, deadline).timed_out() && turn.next != stage {
                debug!(%stage, ?timeout, expected = %turn.next, "relay wait timed out");
                return Err(Error::Timeout {
                    stage,
                    waited: timeout,
                });
            }
        }
        Ok(self.complete(turn, stage, work))
    }

    /// Completes stage A, returning its zero-based position in the completion order.
    #[inline]
    pub fn stage_a(&self) -> u64 {
        self.run_stage(Stage::A)
    }

    /// Completes stage B, returning its zero-based position in the completion order.
    #[inline]
    pub fn stage_b(&self) -> u64 {
        self.run_stage(Stage::B)
    }

    /// Completes stage C, returning its zero-based position in the completion order.
    #[inline]
    pub fn stage_c(&self) -> u64 {
        self.run_stage(Stage::C)
    }

    /// The stage allowed to complete next.
    pub fn next_stage(&self) -> Stage {
        self.turn.lock().next
    }

    /// Number of stages completed since the relay was created.
    pub fn completed(&self) -> u64 {
        self.turn.lock().completed
    }

    fn run_stage(&self, stage: Stage) -> u64 {
        let turn = self.wait_turn(stage);
        let position = turn.completed;
        self.complete(turn, stage, || position)
    }

    fn wait_turn(&self, stage: Stage) -> MutexGuard<'_, Turn> {
        let mut turn = self.turn.lock();
        while turn.next != stage {
            self.batons[stage.index()].wait(&mut turn);
        }
        turn
    }

    fn complete<R>(
        &self,
        turn: MutexGuard<'_, Turn>,
        stage: Stage,
        work: impl FnOnce() -> R,
    ) -> R {
        debug_assert!(turn.next == stage);
        let _handoff = scopeguard::guard(turn, |mut turn| {
            turn.next = stage.next();
            turn.completed += 1;
            trace!(%stage, completed = turn.completed, "stage completed");
            // Every waiter of the next stage rechecks; one of them takes the turn.
            self.batons[stage.next().index()].notify_all();
        });
        work()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Relay");
        match self.turn.try_lock() {
            Some(turn) => dbg
                .field("next", &turn.next)
                .field("completed", &turn.completed),
            None => dbg.field("next", &format_args!("<locked>")),
        };
        dbg.finish()
    }
}

static GLOBAL: Relay = Relay::new();

/// The process-wide relay used by [`stage_a`], [`stage_b`] and [`stage_c`].
pub fn global() -> &'static Relay {
    &GLOBAL
}

/// Runs stage A on the process-wide relay, returning its position in the completion order.
pub fn stage_a() -> u64 {
    GLOBAL.stage_a()
}

/// Runs stage B on the process-wide relay, returning its position in the completion order.
pub fn stage_b() -> u64 {
    GLOBAL.stage_b()
}

/// Runs stage C on the process-wide relay, returning its position in the completion order.
pub fn stage_c() -> u64 {
    GLOBAL.stage_c()
}
