//! Keyed, cancellable timers for polling subscriptions and resolution
//! deadlines.
//!
//! Cancelling a key stops future firings. A callback that already fired
//! runs on its own task and is left to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::debug;
use uuid::Uuid;

struct Timer {
    token: Uuid,
    handle: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct Scheduler {
    timers: Arc<DashMap<String, Timer>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` once after `delay`. Re-arming a key replaces its timer.
    pub fn arm_once<F, Fut>(&self, key: &str, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = Uuid::new_v4();
        let timers = Arc::clone(&self.timers);
        let owned_key = key.to_string();
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // Wait until the timer is in the map so the removal below cannot
            // run ahead of the insert.
            if armed_rx.await.is_err() {
                return;
            }
            sleep(delay).await;
            timers.remove_if(&owned_key, |_, timer| timer.token == token);
            debug!(key = %owned_key, "one-shot timer fired");
            tokio::spawn(task());
        });

        self.install(key, token, handle);
        let _ = armed_tx.send(());
    }

    /// Runs `task` immediately and then every `period`. A run that outlasts
    /// the period delays the next tick instead of overlapping it.
    pub fn arm_interval<F, Fut>(&self, key: &str, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = Uuid::new_v4();
        let owned_key = key.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(key = %owned_key, "interval timer fired");
                // Detached: aborting this loop leaves the running callback alone.
                let _ = tokio::spawn(task()).await;
            }
        });

        self.install(key, token, handle);
    }

    fn install(&self, key: &str, token: Uuid, handle: JoinHandle<()>) {
        if let Some(previous) = self.timers.insert(key.to_string(), Timer { token, handle }) {
            previous.handle.abort();
        }
    }

    /// Returns whether a timer was armed under `key`.
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.remove(key) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
    }

    pub fn is_armed(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    pub fn armed_keys(&self) -> Vec<String> {
        self.timers.iter().map(|entry| entry.key().clone()).collect()
    }
}
