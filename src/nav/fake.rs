use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::Notify;

use super::{PageView, Position, RefreshChannel};

pub struct FakeView {
    name: String,
    signals: RefreshChannel,
    refreshes: AtomicUsize,
    fail: AtomicBool,
    restored: Mutex<Option<Position>>,
    gate: Option<Arc<Notify>>,
}

impl FakeView {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            signals: RefreshChannel::default(),
            refreshes: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            restored: Mutex::new(None),
            gate: None,
        }
    }

    /// Each refresh counts itself, then parks until `gate` is notified.
    pub fn gated(name: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(name)
        }
    }

    pub fn failing(name: &str) -> Self {
        let view = Self::new(name);
        view.fail.store(true, Ordering::SeqCst);
        view
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn restored(&self) -> Option<Position> {
        *self.restored.lock().expect("restored lock")
    }
}

impl PageView for FakeView {
    fn name(&self) -> &str {
        &self.name
    }

    fn signals(&self) -> &RefreshChannel {
        &self.signals
    }

    fn refresh(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("backend unavailable for {}", self.name);
            }
            Ok(())
        })
    }

    fn restore_position(&self, position: Position) {
        *self.restored.lock().expect("restored lock") = Some(position);
    }
}

pub async fn wait_until(condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
