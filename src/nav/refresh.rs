use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::PageView;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RefreshEvent {
    Rendered { page: String },
    Failed { page: String, error: String },
}

/// Pending-refresh signal owned by a page. Holds at most one outstanding
/// request; the receiving end is borrowed by whichever loop is attached.
#[derive(Debug)]
pub struct RefreshChannel {
    tx: mpsc::Sender<()>,
    rx: AsyncMutex<mpsc::Receiver<()>>,
}

impl Default for RefreshChannel {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: AsyncMutex::new(rx),
        }
    }
}

impl RefreshChannel {
    /// Never blocks. Returns false when a refresh was already pending.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("refresh already pending, request coalesced");
                false
            }
            Err(TrySendError::Closed(())) => false,
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.tx.capacity() == 0
    }

    async fn borrow(&self) -> AsyncMutexGuard<'_, mpsc::Receiver<()>> {
        self.rx.lock().await
    }
}

struct Activation {
    page: String,
    generation: u64,
    token: CancellationToken,
}

struct LiveLoop(Arc<AtomicUsize>);

impl LiveLoop {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveLoop {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Keeps exactly one refresh loop attached to the visible page.
pub struct RefreshCoordinator {
    active: Mutex<Option<Activation>>,
    live: Arc<AtomicUsize>,
    generations: AtomicU64,
    events: mpsc::UnboundedSender<RefreshEvent>,
}

impl RefreshCoordinator {
    pub fn new(events: mpsc::UnboundedSender<RefreshEvent>) -> Self {
        Self {
            active: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
            generations: AtomicU64::new(0),
            events,
        }
    }

    /// Retires the current loop and attaches a fresh one to `view`.
    pub fn activate(&self, view: Arc<dyn PageView>) {
        let page = view.name().to_string();
        let token = CancellationToken::new();
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = active.take() {
            previous.token.cancel();
            debug!(
                page = %previous.page,
                generation = previous.generation,
                "refresh loop cancelled"
            );
        }

        tokio::spawn(run_refresh_loop(
            view,
            token.clone(),
            self.events.clone(),
            LiveLoop::enter(&self.live),
        ));
        debug!(page = %page, generation, "refresh loop attached");
        *active = Some(Activation {
            page,
            generation,
            token,
        });
    }

    /// Number of loops attached so far.
    #[cfg(test)]
    pub fn activations(&self) -> u64 {
        self.generations.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn active_page(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|activation| activation.page.clone())
    }

    #[cfg(test)]
    pub fn live_loops(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        if let Some(previous) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            previous.token.cancel();
            debug!(page = %previous.page, "refresh loop stopped on shutdown");
        }
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_refresh_loop(
    view: Arc<dyn PageView>,
    token: CancellationToken,
    events: mpsc::UnboundedSender<RefreshEvent>,
    _live: LiveLoop,
) {
    let page = view.name().to_string();

    // A loop retired by a quick A -> B -> A bounce may still hold the receiver.
    let mut signals = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        signals = view.signals().borrow() => signals,
    };

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(page = %page, "refresh loop exited");
                return;
            }
            signal = signals.recv() => {
                if signal.is_none() {
                    return;
                }

                let outcome = view.refresh().await;
                if token.is_cancelled() {
                    debug!(page = %page, "dropping refresh result after cancellation");
                    return;
                }

                let event = match outcome {
                    Ok(()) => RefreshEvent::Rendered { page: page.clone() },
                    Err(error) => {
                        let error = format!("{error:#}");
                        warn!(page = %page, %error, "page refresh failed");
                        RefreshEvent::Failed { page: page.clone(), error }
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
