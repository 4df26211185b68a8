// Background scheduling: debounced auto-save and deferred reclamation.

pub mod debounce;
pub mod session;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

pub use debounce::{PendingSlot, QuietPeriod};
pub use session::{EditTicket, SessionTracker};

struct AutosaveShared<T> {
    slot: Mutex<PendingSlot<T>>,
    wake: Notify,
    closed: AtomicBool,
}

impl<T> AutosaveShared<T> {
    fn with_slot<R>(&self, f: impl FnOnce(&mut PendingSlot<T>) -> R) -> R {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut slot)
    }
}

/// Drives a [`PendingSlot`]: the handler runs once per quiet period with the
/// latest pushed value. A handler call is never interrupted; values pushed
/// while it runs wait for the next quiet period.
pub struct Autosave<T> {
    shared: Arc<AutosaveShared<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Autosave<T> {
    pub fn spawn<H, Fut>(quiet: QuietPeriod, mut handler: H) -> Self
    where
        H: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = Arc::new(AutosaveShared {
            slot: Mutex::new(PendingSlot::new(quiet)),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let task = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                loop {
                    if shared.closed.load(Ordering::SeqCst) {
                        if let Some(value) = shared.with_slot(PendingSlot::take) {
                            debug!("flushing pending edit on close");
                            handler(value).await;
                        }
                        break;
                    }

                    match shared.with_slot(|slot| slot.next_deadline()) {
                        None => shared.wake.notified().await,
                        Some(deadline) => {
                            tokio::select! {
                                _ = tokio::time::sleep_until(deadline) => {}
                                _ = shared.wake.notified() => continue,
                            }
                        }
                    }

                    let ready = shared.with_slot(|slot| slot.take_ready_at(Instant::now()));
                    if let Some(value) = ready {
                        handler(value).await;
                    }
                }
            }
        });

        Self { shared, task }
    }

    /// Replace the pending value and restart the quiet period.
    pub fn push(&self, value: T) {
        if self.shared.with_slot(|slot| slot.push(value)).is_some() {
            debug!("pending edit superseded");
        }
        self.shared.wake.notify_one();
    }

    pub fn is_pending(&self) -> bool {
        self.shared.with_slot(|slot| slot.is_pending())
    }

    /// Run the handler for any pending value now, then stop.
    pub async fn close(self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        let _ = self.task.await;
    }
}

/// Counts edits in flight so background work can wait for a lull.
#[derive(Debug, Clone, Default)]
pub struct EditGate {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Held for the duration of one edit.
#[derive(Debug)]
pub struct EditGuard {
    gate: EditGate,
}

impl Drop for EditGuard {
    fn drop(&mut self) {
        if self.gate.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.idle.notify_waiters();
        }
    }
}

impl EditGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> EditGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        EditGuard { gate: self.clone() }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no edit is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Run `job` on the blocking pool once `delay` has passed and no edit is in
/// flight. Used for reclamation after a session ends.
pub fn defer_until_idle<F, R>(delay: Duration, gate: EditGate, job: F) -> JoinHandle<anyhow::Result<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        gate.wait_idle().await;
        info!(delay_ms = delay.as_millis() as u64, "running deferred job");
        tokio::task::spawn_blocking(job).await.context("deferred job did not complete")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn autosave_runs_once_with_latest_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let autosave = Autosave::spawn(QuietPeriod::default(), {
            let seen = Arc::clone(&seen);
            move |value: u32| {
                let seen = Arc::clone(&seen);
                async move { seen.lock().unwrap().push(value) }
            }
        });

        for value in 1..=5 {
            autosave.push(value);
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert!(!autosave.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_pending_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let autosave = Autosave::spawn(QuietPeriod::default(), {
            let seen = Arc::clone(&seen);
            move |value: &'static str| {
                let seen = Arc::clone(&seen);
                async move { seen.lock().unwrap().push(value) }
            }
        });

        autosave.push("draft");
        autosave.close().await;

        assert_eq!(*seen.lock().unwrap(), vec!["draft"]);
    }

    #[tokio::test(start_paused = true)]
    async fn separated_edits_each_save() {
        let count = Arc::new(AtomicUsize::new(0));
        let autosave = Autosave::spawn(QuietPeriod::with_millis(500), {
            let count = Arc::clone(&count);
            move |_: ()| {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        autosave.push(());
        tokio::time::sleep(Duration::from_secs(1)).await;
        autosave.push(());
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_job_waits_for_edits_to_finish() {
        let gate = EditGate::new();
        let guard = gate.enter();
        let ran = Arc::new(AtomicBool::new(false));

        let handle = defer_until_idle(Duration::from_secs(5), gate.clone(), {
            let ran = Arc::clone(&ran);
            move || ran.store(true, Ordering::SeqCst)
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!ran.load(Ordering::SeqCst));

        drop(guard);
        handle.await.unwrap().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_job_honours_delay() {
        let start = Instant::now();
        defer_until_idle(Duration::from_secs(5), EditGate::new(), || ()).await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
