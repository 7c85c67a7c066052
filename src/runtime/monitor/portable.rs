//! Portable substrate built from `parking_lot` primitives.
//!
//! `parking_lot` guards cannot outlive a call, but the monitor contract
//! splits `enter` and `exit` across separate calls. The lock is therefore
//! modelled as a `held` flag protected by a short-lived internal mutex; the
//! condition variable is a broadcast generation counter.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::RawMonitor;
use crate::sys::nano_time;

#[derive(Debug, Default)]
struct State {
    held: bool,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct PortableMonitor {
    state: Mutex<State>,
    /// Signalled whenever `held` goes from true to false.
    released: Condvar,
    /// Signalled on broadcast.
    notified: Condvar,
}

impl PortableMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn release(&self, state: &mut State) {
        state.held = false;
        self.released.notify_one();
    }

    fn acquire(&self, state: &mut parking_lot::MutexGuard<'_, State>) {
        while state.held {
            self.released.wait(state);
        }
        state.held = true;
    }
}

impl RawMonitor for PortableMonitor {
    fn enter(&self) {
        let mut state = self.state.lock();
        self.acquire(&mut state);
    }

    fn exit(&self) {
        let mut state = self.state.lock();
        self.release(&mut state);
    }

    fn wait(&self) {
        let mut state = self.state.lock();
        let generation = state.generation;
        self.release(&mut state);
        while state.generation == generation {
            self.notified.wait(&mut state);
        }
        self.acquire(&mut state);
    }

    fn wait_until(&self, deadline_nanos: i64) {
        let now = nano_time();
        if deadline_nanos <= now {
            return;
        }
        let remaining = deadline_nanos.saturating_sub(now).unsigned_abs();
        let Some(deadline) = Instant::now().checked_add(Duration::from_nanos(remaining)) else {
            return self.wait();
        };

        let mut state = self.state.lock();
        let generation = state.generation;
        self.release(&mut state);
        while state.generation == generation {
            if self.notified.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        self.acquire(&mut state);
    }

    fn broadcast(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        self.notified.notify_all();
    }
}
