//! Background expiry sweeper.
//!
//! Lazy expiry (rejection on access) alone leaks items that are never
//! read again. The sweeper closes that gap: a background task pops due
//! entries off the expiry heap on a fixed tick, so the cost per cycle
//! is proportional to how many items actually expired.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::keyspace::Keyspace;

/// How often the sweeper wakes up.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to the running sweeper task. Stop it explicitly or drop it;
/// either ends the task.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns the sweeper over the shared keyspace.
    pub fn start(keyspace: Arc<RwLock<Keyspace>>) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(keyspace, rx));
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signals the task to stop and waits for it to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn sweep_loop(keyspace: Arc<RwLock<Keyspace>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }

        let removed = keyspace.write().expect("keyspace lock poisoned").sweep();
        if removed > 0 {
            debug!(removed, "swept expired keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_removes_expired_keys_without_access() {
        let keyspace = Arc::new(RwLock::new(Keyspace::new()));
        {
            let mut ks = keyspace.write().unwrap();
            for i in 0..10 {
                ks.set(&format!("tmp{i}"), Value::String("x".into()), 10_000_000);
            }
            ks.set("keep", Value::String("y".into()), 0);
        }

        let sweeper = Sweeper::start(keyspace.clone());
        tokio::time::sleep(Duration::from_millis(350)).await;
        sweeper.stop().await;

        let ks = keyspace.read().unwrap();
        assert_eq!(ks.len(), 1);
        assert!(ks.get("keep").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stopped_sweeper_leaves_keyspace_alone() {
        let keyspace = Arc::new(RwLock::new(Keyspace::new()));
        let sweeper = Sweeper::start(keyspace.clone());
        sweeper.stop().await;

        {
            let mut ks = keyspace.write().unwrap();
            ks.set("tmp", Value::String("x".into()), 10_000_000);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        // lazy expiry still hides the value, but the entry was not swept
        let ks = keyspace.read().unwrap();
        assert_eq!(ks.get("tmp"), None);
        assert_eq!(ks.len(), 1);
    }
}
