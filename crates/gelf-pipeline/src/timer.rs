// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Restartable one-shot delay timer.
//!
//! A [`DelayTimer`] owns a single waiter thread for its whole lifetime. Arming
//! the timer wakes the waiter, which counts down `timeout` and then invokes the
//! callback. The callback always runs on the waiter thread without the state
//! lock held, so it may re-arm the timer.
//!
//! ```text
//!            start            waiter picks up
//!   Idle ───────────► Starting ─────────────► Running ──timeout──► Idle (+ callback)
//!    │
//!    │ clear                  waiter picks up
//!    └──────────► SkipRequested ────────────► Skipping ──────────► Idle
//!
//!   any ──close──► Closed
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::errors::TimerError;
use crate::GELF_PROGRAM;

const WAITER_THREAD_NAME: &str = "gelf-timer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Starting,
    Running,
    SkipRequested,
    Skipping,
    Closed,
}

/// Inputs of the timer state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    Start,
    Clear,
    Close,
    /// The waiter picked up an activation request.
    Arm,
    /// The countdown ran out.
    Expire,
    /// The waiter picked up a skip request.
    Skip,
    /// The waiter finished skipping.
    Settle,
}

/// The single transition function of the timer. Pairs not listed leave the
/// state unchanged.
pub(crate) fn transition(state: TimerState, event: TimerEvent) -> TimerState {
    use TimerEvent as E;
    use TimerState as S;

    match (state, event) {
        (S::Closed, _) | (_, E::Close) => S::Closed,
        (S::Idle, E::Start) => S::Starting,
        (S::Idle, E::Clear) => S::SkipRequested,
        (S::Starting, E::Arm) => S::Running,
        (S::Running, E::Expire) => S::Idle,
        (S::SkipRequested, E::Skip) => S::Skipping,
        (S::Skipping, E::Settle) => S::Idle,
        (state, _) => state,
    }
}

struct Shared {
    state: Mutex<TimerState>,
    signal: Condvar,
}

impl Shared {
    /// Applies `event` and wakes the waiter if the state changed. A poisoned
    /// lock closes the timer for good.
    fn apply(&self, event: TimerEvent) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                *poisoned.into_inner() = TimerState::Closed;
                self.signal.notify_all();
                return;
            }
        };

        let next = transition(*state, event);
        if next != *state {
            *state = next;
            self.signal.notify_all();
        }
    }

    fn current(&self) -> TimerState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(TimerState::Closed)
    }
}

/// One-shot countdown that invokes a callback once per activation.
///
/// `start` and `clear` are no-ops unless the timer is idle, so a burst of
/// `start` calls results in a single callback. Dropping the timer closes it
/// without waiting for the waiter thread.
pub struct DelayTimer {
    shared: Arc<Shared>,
}

impl DelayTimer {
    /// Creates the timer and spawns its waiter thread.
    pub fn new<F>(timeout: Duration, callback: F) -> Result<Self, TimerError>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::Idle),
            signal: Condvar::new(),
        });

        let waiter = Arc::clone(&shared);
        thread::Builder::new()
            .name(WAITER_THREAD_NAME.to_string())
            .spawn(move || wait_loop(&waiter, timeout, &callback))?;

        Ok(DelayTimer { shared })
    }

    /// Arms the timer if it is idle.
    pub fn start(&self) {
        self.shared.apply(TimerEvent::Start);
    }

    /// Asks an idle waiter to go through a skip cycle. This does not cancel a
    /// running countdown; callers flush on their own right after.
    pub fn clear(&self) {
        self.shared.apply(TimerEvent::Clear);
    }

    /// Terminates the waiter. Subsequent calls to `start` and `clear` are
    /// ignored and the callback never fires again.
    pub fn close(&self) {
        self.shared.apply(TimerEvent::Close);
    }

    #[must_use]
    pub fn state(&self) -> TimerState {
        self.shared.current()
    }
}

impl Drop for DelayTimer {
    fn drop(&mut self) {
        self.close();
    }
}

fn wait_loop<F>(shared: &Shared, timeout: Duration, callback: &F)
where
    F: Fn(),
{
    loop {
        match countdown(shared, timeout) {
            Some(true) => {
                if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
                    error!(
                        suppress = true,
                        program = GELF_PROGRAM,
                        "Multi-line timer callback panicked, closing timer"
                    );
                    shared.apply(TimerEvent::Close);
                    break;
                }
            }
            Some(false) => {}
            None => break,
        }
    }
    debug!(suppress = true, program = GELF_PROGRAM, "Multi-line timer closed");
}

/// Runs one activation cycle under the lock.
///
/// Returns `Some(true)` when the callback is due, `Some(false)` after a skip
/// cycle and `None` once the timer is closed. The state is back to `Idle`
/// before the callback runs, so a `start` issued meanwhile arms a new cycle.
fn countdown(shared: &Shared, timeout: Duration) -> Option<bool> {
    let mut state = shared.state.lock().ok()?;
    while *state == TimerState::Idle {
        state = shared.signal.wait(state).ok()?;
    }

    match *state {
        TimerState::Starting => {
            step(&mut state, TimerEvent::Arm);
            // no deadline when `now + timeout` overflows: only close ends the wait
            let deadline = Instant::now().checked_add(timeout);
            while *state == TimerState::Running {
                let Some(deadline) = deadline else {
                    state = shared.signal.wait(state).ok()?;
                    continue;
                };
                let now = Instant::now();
                if now >= deadline {
                    step(&mut state, TimerEvent::Expire);
                    return Some(true);
                }
                state = shared.signal.wait_timeout(state, deadline - now).ok()?.0;
            }
            close_observed(&mut state)
        }
        TimerState::SkipRequested => {
            step(&mut state, TimerEvent::Skip);
            step(&mut state, TimerEvent::Settle);
            Some(false)
        }
        _ => close_observed(&mut state),
    }
}

fn step(state: &mut MutexGuard<'_, TimerState>, event: TimerEvent) {
    **state = transition(**state, event);
}

fn close_observed(state: &mut MutexGuard<'_, TimerState>) -> Option<bool> {
    step(state, TimerEvent::Close);
    None
}
