//! In-flight writer barrier
//!
//! Attack sequencers hold a [`WriteTicket`] while they transmit; stopping the
//! engine waits until every ticket has been dropped before releasing the
//! radio.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct WriteBarrier {
    in_flight: AtomicUsize,
    drained: Notify,
}

impl WriteBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an in-flight writer until the ticket is dropped
    pub fn enter(self: &Arc<Self>) -> WriteTicket {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        WriteTicket {
            barrier: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no writer is in flight
    pub async fn wait(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            // Register interest before checking so a release in between is not lost
            drained.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// RAII registration with a [`WriteBarrier`]
#[derive(Debug)]
pub struct WriteTicket {
    barrier: Arc<WriteBarrier>,
}

impl Drop for WriteTicket {
    fn drop(&mut self) {
        if self.barrier.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.barrier.drained.notify_waiters();
        }
    }
}
