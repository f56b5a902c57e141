use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::cache::token::TokenRecord;
use crate::error::TokenError;

pub type Outcome = Result<TokenRecord, TokenError>;

type Waiter = oneshot::Sender<Outcome>;

#[derive(Debug, Default)]
struct WaveSlots {
    waiters: Vec<Waiter>,
    /// waiters of a forced refresh requested while a wave was running
    next_forced: Vec<Waiter>,
    forced_pending: bool,
    in_flight: bool,
    /// bumped on every publish or unpublish
    generation: u64,
}

/// Local fan-out list and wave bookkeeping for one app.
///
/// Every waiter is resolved exactly once, by the first `publish` or
/// `unpublish` after it joined. Both drain the list, so a later
/// subscriber never sees an earlier outcome.
///
/// At most one refresh wave runs per app in this process. `join` and
/// `request` report whether the caller has to start it; `finish_wave`
/// hands over to a queued forced refresh, if any.
#[derive(Debug, Default)]
pub struct Dispatcher {
    slots: Mutex<WaveSlots>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the outcome of the running wave, or of a new one.
    ///
    /// The flag is true when no wave was running and the caller must start
    /// it. A forced join while a wave runs waits for the forced wave that
    /// follows it.
    pub fn join(&self, force: bool) -> (oneshot::Receiver<Outcome>, bool) {
        let (tx, rx) = oneshot::channel();
        let start = self.enroll(force, Some(tx));
        (rx, start)
    }

    /// Same as `join` without a waiter.
    pub fn request(&self, force: bool) -> bool {
        self.enroll(force, None)
    }

    /// Ends the running wave. Returns true when a forced wave was queued
    /// behind it, in which case the caller must start that one and the
    /// dispatcher stays in flight.
    pub fn finish_wave(&self) -> bool {
        let mut slots = self.lock();
        if slots.forced_pending {
            slots.forced_pending = false;
            let queued = std::mem::take(&mut slots.next_forced);
            slots.waiters.extend(queued);
            return true;
        }
        slots.in_flight = false;
        false
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Returns how many waiters were released.
    pub fn publish(&self, record: &TokenRecord) -> usize {
        self.resolve(Ok(record.clone()))
    }

    pub fn unpublish(&self, err: &TokenError) -> usize {
        self.resolve(Err(err.clone()))
    }

    /// Releases every waiter, queued forced ones included.
    pub fn close(&self, err: &TokenError) -> usize {
        let (waiters, queued) = {
            let mut slots = self.lock();
            slots.forced_pending = false;
            slots.generation += 1;
            (
                std::mem::take(&mut slots.waiters),
                std::mem::take(&mut slots.next_forced),
            )
        };
        deliver(waiters.into_iter().chain(queued), Err(err.clone()))
    }

    pub fn pending(&self) -> usize {
        let slots = self.lock();
        slots.waiters.len() + slots.next_forced.len()
    }

    fn enroll(&self, force: bool, waiter: Option<Waiter>) -> bool {
        let mut slots = self.lock();
        if !slots.in_flight {
            slots.in_flight = true;
            slots.waiters.extend(waiter);
            return true;
        }
        if force {
            slots.forced_pending = true;
            slots.next_forced.extend(waiter);
        } else {
            slots.waiters.extend(waiter);
        }
        false
    }

    fn resolve(&self, outcome: Outcome) -> usize {
        let waiters = {
            let mut slots = self.lock();
            slots.generation += 1;
            std::mem::take(&mut slots.waiters)
        };
        deliver(waiters, outcome)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WaveSlots> {
        // the slots stay consistent even if a holder panicked
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn deliver(waiters: impl IntoIterator<Item = Waiter>, outcome: Outcome) -> usize {
    let mut delivered = 0;
    for waiter in waiters {
        // a waiter that gave up dropped its receiver
        if waiter.send(outcome.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}
