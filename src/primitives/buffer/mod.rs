#![forbid(unsafe_code)]

//! Two-slot buffering with a background flusher.
//!
//! Work is enqueued into the *filling* slot. A [`Potential`] decides after
//! every unit whether that slot must be flushed; if so the slot is sealed,
//! the other slot becomes the filling one, and a dedicated worker thread
//! hands the sealed batch to the flusher. Enqueue and flush never overlap on
//! the same slot: an enqueuer whose filling slot is still sealed or being
//! flushed waits until the worker releases it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::primitives::concurrency::abandoned;
use crate::types::{BitsyError, Result};

/// One of the two buffer slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    /// First slot.
    A,
    /// Second slot.
    B,
}

impl Slot {
    /// The opposite slot.
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// Position of the slot in a two-element array.
    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::A => write!(f, "A"),
            Slot::B => write!(f, "B"),
        }
    }
}

/// Decides when the filling slot has accumulated enough work.
pub trait Potential<T>: Send {
    /// Accounts for `unit`; returns `true` when the filling slot must flush.
    fn add(&mut self, unit: &T) -> bool;
    /// Called whenever the filling slot is sealed.
    fn reset(&mut self);
}

/// Potential that seals the slot after every unit.
#[derive(Default, Debug, Clone, Copy)]
pub struct AlwaysFlush;

impl<T> Potential<T> for AlwaysFlush {
    fn add(&mut self, _unit: &T) -> bool {
        true
    }

    fn reset(&mut self) {}
}

/// Synchronous side effect run at enqueue time, before the unit is counted.
pub type Queuer<T> = Box<dyn FnMut(Slot, &T) -> Result<()> + Send>;
/// Asynchronous batch handler run on the worker thread.
pub type Flusher<T> = Box<dyn FnMut(Slot, Vec<T>) -> Result<()> + Send>;
/// Receives units that will never be flushed (after a failure or at stop).
pub type Abandon<T> = Box<dyn FnMut(Vec<T>, &BitsyError) + Send>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Sealed,
    Flushing,
}

struct State<T> {
    slots: [Vec<T>; 2],
    phase: [Phase; 2],
    active: Slot,
    ready: VecDeque<Slot>,
    potential: Box<dyn Potential<T>>,
    queuer: Option<Queuer<T>>,
    failure: Option<BitsyError>,
    stop: bool,
    stopped: bool,
    flushes: u64,
}

impl<T> State<T> {
    fn seal(&mut self, slot: Slot) {
        self.phase[slot.index()] = Phase::Sealed;
        self.ready.push_back(slot);
        self.active = slot.other();
        self.potential.reset();
    }

    fn idle(&self) -> bool {
        self.ready.is_empty() && self.phase.iter().all(|p| *p == Phase::Open)
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

/// Counters describing a buffer's progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Completed flushes.
    pub flushes: u64,
    /// Units waiting in either slot.
    pub pending_units: usize,
    /// Whether a fatal failure has been recorded.
    pub failed: bool,
}

/// Configures and spawns a [`DoubleBuffer`].
pub struct DoubleBufferBuilder<T> {
    name: &'static str,
    potential: Box<dyn Potential<T>>,
    flusher: Flusher<T>,
    queuer: Option<Queuer<T>>,
    abandon: Option<Abandon<T>>,
    initial: Slot,
}

impl<T: Send + 'static> DoubleBufferBuilder<T> {
    /// Installs a queuer.
    pub fn queuer(mut self, queuer: Queuer<T>) -> Self {
        self.queuer = Some(queuer);
        self
    }

    /// Installs a handler for units that are dropped without flushing.
    pub fn on_abandon(mut self, abandon: Abandon<T>) -> Self {
        self.abandon = Some(abandon);
        self
    }

    /// Selects the slot that fills first.
    pub fn initial_slot(mut self, slot: Slot) -> Self {
        self.initial = slot;
        self
    }

    /// Starts the worker thread.
    pub fn spawn(self) -> Result<DoubleBuffer<T>> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                slots: [Vec::new(), Vec::new()],
                phase: [Phase::Open, Phase::Open],
                active: self.initial,
                ready: VecDeque::new(),
                potential: self.potential,
                queuer: self.queuer,
                failure: None,
                stop: false,
                stopped: false,
                flushes: 0,
            }),
            cv: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let name = self.name;
        let flusher = self.flusher;
        let abandon = self.abandon;
        let handle = thread::Builder::new()
            .name(format!("bitsy-{name}"))
            .spawn(move || worker_loop(name, worker_shared, flusher, abandon))?;
        Ok(DoubleBuffer {
            name,
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }
}

/// Two-slot buffer drained by a dedicated worker thread.
pub struct DoubleBuffer<T: Send + 'static> {
    name: &'static str,
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> DoubleBuffer<T> {
    /// Starts configuring a buffer named `name`.
    pub fn builder(
        name: &'static str,
        potential: Box<dyn Potential<T>>,
        flusher: Flusher<T>,
    ) -> DoubleBufferBuilder<T> {
        DoubleBufferBuilder {
            name,
            potential,
            flusher,
            queuer: None,
            abandon: None,
            initial: Slot::A,
        }
    }

    /// Adds `unit` to the filling slot, running the queuer first.
    ///
    /// Blocks while the filling slot is still sealed or being flushed.
    /// Returns the recorded failure if this buffer has been poisoned.
    pub fn enqueue(&self, unit: T) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(err) = state.failure.as_ref() {
                return Err(err.duplicate());
            }
            if state.stop {
                return Err(BitsyError::Invalid("pipeline stage is shut down"));
            }
            if state.phase[state.active.index()] == Phase::Open {
                break;
            }
            self.shared.cv.wait(&mut state);
        }
        let slot = state.active;
        if let Some(queuer) = state.queuer.as_mut() {
            if let Err(err) = queuer(slot, &unit) {
                error!(stage = self.name, slot = %slot, error = %err, "pipeline.queuer.failed");
                state.failure = Some(err.duplicate());
                self.shared.cv.notify_all();
                return Err(err);
            }
        }
        let trigger = state.potential.add(&unit);
        state.slots[slot.index()].push(unit);
        if trigger {
            debug!(
                stage = self.name,
                slot = %slot,
                units = state.slots[slot.index()].len(),
                "pipeline.stage.seal"
            );
            state.seal(slot);
            self.shared.cv.notify_all();
        }
        Ok(())
    }

    /// Seals the filling slot (if it holds work) and waits until both slots
    /// have been flushed.
    pub fn flush_now(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if let Some(err) = state.failure.as_ref() {
                return Err(err.duplicate());
            }
            let slot = state.active;
            if state.phase[slot.index()] == Phase::Open && !state.slots[slot.index()].is_empty() {
                debug!(stage = self.name, slot = %slot, "pipeline.stage.flush_now");
                state.seal(slot);
                self.shared.cv.notify_all();
            }
        }
        self.drain()
    }

    /// Waits until every sealed slot has been flushed.
    pub fn drain(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(err) = state.failure.as_ref() {
                return Err(err.duplicate());
            }
            if state.idle() || state.stopped {
                return Ok(());
            }
            self.shared.cv.wait(&mut state);
        }
    }

    /// Returns the recorded failure, if any.
    pub fn failure(&self) -> Option<BitsyError> {
        self.shared.state.lock().failure.as_ref().map(BitsyError::duplicate)
    }

    /// Current counters.
    pub fn stats(&self) -> BufferStats {
        let state = self.shared.state.lock();
        BufferStats {
            flushes: state.flushes,
            pending_units: state.slots.iter().map(Vec::len).sum(),
            failed: state.failure.is_some(),
        }
    }

    /// Asks the worker to stop after its in-flight flush and joins it,
    /// waiting at most `timeout`. Returns `false` if the worker was detached.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
            self.shared.cv.notify_all();
            while !state.stopped {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                self.shared.cv.wait_for(&mut state, deadline - now);
            }
            if !state.stopped {
                warn!(stage = self.name, "pipeline.stage.join_timeout");
                self.worker.lock().take();
                return false;
            }
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(stage = self.name, "pipeline.stage.worker_panicked");
                return false;
            }
        }
        true
    }
}

impl<T: Send + 'static> Drop for DoubleBuffer<T> {
    fn drop(&mut self) {
        if self.worker.lock().is_some() {
            self.shutdown(Duration::from_secs(5));
        }
    }
}

fn worker_loop<T>(
    name: &'static str,
    shared: Arc<Shared<T>>,
    mut flusher: Flusher<T>,
    mut abandon: Option<Abandon<T>>,
) {
    loop {
        let (slot, units, failure) = {
            let mut state = shared.state.lock();
            loop {
                if state.stop {
                    let err = state
                        .failure
                        .as_ref()
                        .map(BitsyError::duplicate)
                        .unwrap_or_else(abandoned);
                    let mut leftovers = Vec::new();
                    for slot in [Slot::A, Slot::B] {
                        leftovers.append(&mut state.slots[slot.index()]);
                    }
                    state.ready.clear();
                    state.phase = [Phase::Open, Phase::Open];
                    state.stopped = true;
                    shared.cv.notify_all();
                    drop(state);
                    if let Some(abandon) = abandon.as_mut() {
                        if !leftovers.is_empty() {
                            abandon(leftovers, &err);
                        }
                    }
                    debug!(stage = name, "pipeline.stage.stopped");
                    return;
                }
                if let Some(slot) = state.ready.pop_front() {
                    state.phase[slot.index()] = Phase::Flushing;
                    let units = std::mem::take(&mut state.slots[slot.index()]);
                    let failure = state.failure.as_ref().map(BitsyError::duplicate);
                    break (slot, units, failure);
                }
                shared.cv.wait(&mut state);
            }
        };

        let outcome = match failure {
            Some(err) => {
                if let Some(abandon) = abandon.as_mut() {
                    abandon(units, &err);
                }
                Ok(())
            }
            None => {
                debug!(stage = name, slot = %slot, units = units.len(), "pipeline.stage.flush");
                flusher(slot, units)
            }
        };

        let mut state = shared.state.lock();
        state.phase[slot.index()] = Phase::Open;
        match outcome {
            Ok(()) => state.flushes += 1,
            Err(err) => {
                error!(stage = name, slot = %slot, error = %err, "pipeline.stage.flush_failed");
                if state.failure.is_none() {
                    state.failure = Some(err);
                }
            }
        }
        shared.cv.notify_all();
    }
}
