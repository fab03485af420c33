//! Coordination primitives shared by the simulation thread and the sector
//! tasks: a reusable tick barrier, a binary permit and a shutdown signal.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{PhysicsError, PhysicsResult};

#[derive(Debug, Default)]
struct BarrierState {
    parties: usize,
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Cyclic barrier whose party count can change between generations.
///
/// Interrupting breaks the barrier: every waiter, current and future, gets
/// [`PhysicsError::Interrupted`] until [`TickBarrier::repair`] is called.
#[derive(Debug, Default)]
pub struct TickBarrier {
    state: Mutex<BarrierState>,
    tripped: Condvar,
}

impl TickBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                parties,
                ..BarrierState::default()
            }),
            tripped: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.state.lock().parties
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    /// Adds one party. Returns the new party count.
    pub fn register(&self) -> usize {
        let mut state = self.state.lock();
        state.parties += 1;
        state.parties
    }

    /// Removes one party, releasing the current generation if everyone left
    /// has already arrived.
    pub fn deregister(&self) -> usize {
        let mut state = self.state.lock();
        state.parties = state.parties.saturating_sub(1);
        if state.arrived > 0 && state.arrived >= state.parties {
            self.trip(&mut state);
        }
        state.parties
    }

    /// Blocks until every party has arrived. Returns the generation passed.
    pub fn wait(&self) -> PhysicsResult<u64> {
        let mut state = self.state.lock();
        if state.broken {
            return Err(PhysicsError::Interrupted);
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived >= state.parties {
            self.trip(&mut state);
            return Ok(generation);
        }
        loop {
            self.tripped.wait(&mut state);
            if state.generation != generation {
                return Ok(generation);
            }
            if state.broken {
                state.arrived = state.arrived.saturating_sub(1);
                return Err(PhysicsError::Interrupted);
            }
        }
    }

    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.broken = true;
        self.tripped.notify_all();
    }

    /// Clears the broken state and any partial arrivals.
    pub fn repair(&self) {
        let mut state = self.state.lock();
        state.broken = false;
        state.arrived = 0;
    }

    fn trip(&self, state: &mut BarrierState) {
        state.arrived = 0;
        state.generation += 1;
        self.tripped.notify_all();
    }
}

#[derive(Debug)]
struct PermitState {
    available: bool,
    interrupted: bool,
}

/// Binary semaphore handing one turn at a time between two tasks.
#[derive(Debug)]
pub struct Permit {
    state: Mutex<PermitState>,
    released: Condvar,
}

impl Default for Permit {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Permit {
    pub fn new(available: bool) -> Self {
        Self {
            state: Mutex::new(PermitState {
                available,
                interrupted: false,
            }),
            released: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> PhysicsResult<()> {
        let mut state = self.state.lock();
        while !state.available {
            if state.interrupted {
                return Err(PhysicsError::Interrupted);
            }
            self.released.wait(&mut state);
        }
        state.available = false;
        Ok(())
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.available, false)
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        state.available = true;
        self.released.notify_one();
    }

    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.released.notify_all();
    }
}

/// Cloneable shutdown flag. Triggering disconnects the internal channel so
/// any `select!` on [`ShutdownSignal::receiver`] wakes immediately.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        self.sender.lock().take();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

/// Receives from `channel`, returning [`PhysicsError::Interrupted`] as soon as
/// `shutdown` is triggered.
pub fn recv_or_shutdown<T>(
    channel: &Receiver<T>,
    shutdown: &ShutdownSignal,
    label: &'static str,
) -> PhysicsResult<T> {
    if shutdown.is_triggered() {
        return Err(PhysicsError::Interrupted);
    }
    select! {
        recv(channel) -> message => message.map_err(|_| PhysicsError::Disconnected(label)),
        recv(shutdown.receiver()) -> _ => Err(PhysicsError::Interrupted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn barrier_releases_all_parties() {
        let barrier = Arc::new(TickBarrier::new(3));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.wait())
            })
            .collect();
        assert_eq!(barrier.wait().unwrap(), 0);
        for worker in workers {
            assert_eq!(worker.join().unwrap().unwrap(), 0);
        }
        assert_eq!(barrier.generation(), 1);
    }

    #[test]
    fn interrupt_wakes_waiters() {
        let barrier = Arc::new(TickBarrier::new(2));
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait())
        };
        thread::sleep(Duration::from_millis(20));
        barrier.interrupt();
        assert!(waiter.join().unwrap().unwrap_err().is_interrupted());
        barrier.repair();
        barrier.deregister();
        assert_eq!(barrier.wait().unwrap(), 0);
    }

    #[test]
    fn permit_hands_over_turns() {
        let permit = Permit::new(false);
        assert!(!permit.try_acquire());
        permit.release();
        permit.acquire().unwrap();
        permit.interrupt();
        assert!(permit.acquire().is_err());
    }

    #[test]
    fn shutdown_unblocks_receivers() {
        let (_tx, rx) = crossbeam_channel::unbounded::<u32>();
        let shutdown = ShutdownSignal::new();
        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || recv_or_shutdown(&rx, &shutdown, "test"))
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert!(handle.join().unwrap().unwrap_err().is_interrupted());
    }
}
