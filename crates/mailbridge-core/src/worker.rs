//! Auth event worker.
//!
//! Applies the events reported on the registry's auth channel. A storage
//! fault is retried a few times with a doubling delay; an event that still
//! fails is parked per account and retried on a timer until it lands or a
//! newer event for the same account replaces it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use mailbridge_api::ClientAuth;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::ClientRegistry;
use crate::panic::{PanicHandler, panic_message};

/// Attempts per delivery before an event is parked.
const RETRY_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubled for each later one.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// How often parked events are retried.
const PENDING_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct PendingAuth {
    event: ClientAuth,
    generation: u64,
}

/// Applies auth events to the registry and keeps the ones storage rejected.
#[derive(Clone)]
pub(crate) struct AuthEvents {
    clients: Arc<ClientRegistry>,
    panic_handler: Arc<dyn PanicHandler>,
    /// Newest unapplied event per account.
    pending: Arc<DashMap<String, PendingAuth>>,
    next_generation: Arc<AtomicU64>,
}

impl AuthEvents {
    pub(crate) fn new(clients: Arc<ClientRegistry>, panic_handler: Arc<dyn PanicHandler>) -> Self {
        Self {
            clients,
            panic_handler,
            pending: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Applies a freshly reported event. It supersedes any parked one for
    /// the same account.
    pub(crate) async fn apply(&self, event: ClientAuth) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.deliver(PendingAuth { event, generation }, RETRY_ATTEMPTS)
            .await;
    }

    /// Tries every parked event once.
    pub(crate) async fn retry_pending(&self) {
        let parked: Vec<PendingAuth> = self
            .pending
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if parked.is_empty() {
            return;
        }

        debug!(count = parked.len(), "Retrying parked auth events");
        for pending in parked {
            self.deliver(pending, 1).await;
        }
    }

    async fn deliver(&self, pending: PendingAuth, attempts: u32) {
        let account_id = pending.event.user_id.clone();
        let mut delay = RETRY_BASE_DELAY;

        for attempt in 1..=attempts {
            let outcome = AssertUnwindSafe(self.clients.apply_auth_event(pending.event.clone()))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {
                    self.settle(&account_id, pending.generation);
                    return;
                }
                Ok(Err(e)) if e.is_storage_fault() => {
                    if attempt == attempts {
                        warn!(account_id = %account_id, "Auth event parked for retry: {e}");
                        self.park(pending);
                        return;
                    }
                    debug!(account_id = %account_id, attempt, "Retrying auth event in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Ok(Err(e)) => {
                    warn!(account_id = %account_id, "Dropped auth event: {e}");
                    self.settle(&account_id, pending.generation);
                    return;
                }
                Err(payload) => {
                    self.panic_handler
                        .handle_panic(&panic_message(payload.as_ref()));
                    self.settle(&account_id, pending.generation);
                    return;
                }
            }
        }
    }

    /// Forgets the parked event for an account unless a newer one replaced it.
    fn settle(&self, account_id: &str, generation: u64) {
        self.pending
            .remove_if(account_id, |_, parked| parked.generation <= generation);
    }

    fn park(&self, pending: PendingAuth) {
        match self.pending.entry(pending.event.user_id.clone()) {
            Entry::Occupied(parked) if parked.get().generation > pending.generation => {}
            Entry::Occupied(mut parked) => {
                parked.insert(pending);
            }
            Entry::Vacant(slot) => {
                slot.insert(pending);
            }
        }
    }
}

/// Drains the auth channel until `shutdown` fires.
///
/// Events queued before shutdown are still applied, and parked events get a
/// last attempt.
pub(crate) async fn run_auth_worker(
    auth: AuthEvents,
    mut events: UnboundedReceiver<ClientAuth>,
    shutdown: CancellationToken,
) {
    let mut retry = tokio::time::interval_at(
        Instant::now() + PENDING_RETRY_INTERVAL,
        PENDING_RETRY_INTERVAL,
    );
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Auth worker running");
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => auth.apply(event).await,
                None => break,
            },
            _ = retry.tick() => auth.retry_pending().await,
        }
    }

    events.close();
    while let Ok(event) = events.try_recv() {
        auth.apply(event).await;
    }
    auth.retry_pending().await;

    for parked in auth.pending.iter() {
        error!(account_id = %parked.key(), "Auth event not stored before shutdown");
    }
    info!("Auth worker stopped");
}
