// Debounced autosave: one pending window, latest value and callback win.
//
// Every observed change bumps a generation counter and restarts the timer.
// A window only fires if its generation is still current when the timer
// elapses, so a stale timer racing a newer change never saves.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use smol::channel::{self, Receiver};
use smol::future::{Boxed, FutureExt};
use smol::{Task, Timer};

use crate::status::SaveStatus;

/// Quiet period used when a call site does not pick its own.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(900);

/// What a save callback reports back.
pub type SaveResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback<T> = Arc<dyn Fn(T) -> Boxed<SaveResult> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub delay: Duration,
    /// Make each fired save wait for the previous one to finish.
    /// Off by default, in which case saves from consecutive windows may overlap
    /// and complete out of order.
    pub serialize_saves: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            serialize_saves: false,
        }
    }
}

struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    callback: Mutex<Callback<T>>,
    status: Mutex<SaveStatus>,
    in_flight: Option<smol::lock::Mutex<()>>,
    /// Fired saves, running or queued behind `in_flight`
    saves: Mutex<Vec<Task<()>>>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn boxed_callback<T, F, Fut>(callback: F) -> Callback<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SaveResult> + Send + 'static,
{
    Arc::new(move |value: T| callback(value).boxed())
}

/// Debounces a changing value into calls of a save callback.
///
/// - `observe` with a changed value cancels the pending window and starts a
///   new one of the full delay; a steady stream of changes never saves.
/// - The callback that runs is the one installed when the window fires.
/// - `dispose` (or dropping the scheduler) cancels the pending window. A save
///   that already started runs to completion.
pub struct DebounceScheduler<T> {
    shared: Arc<Shared<T>>,
    timer: Option<Task<()>>,
    last_seen: Option<T>,
    delay: Duration,
}

impl<T> DebounceScheduler<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    pub fn new<F, Fut>(delay: Duration, callback: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SaveResult> + Send + 'static,
    {
        Self::with_options(SchedulerOptions { delay, ..Default::default() }, callback)
    }

    pub fn with_options<F, Fut>(options: SchedulerOptions, callback: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SaveResult> + Send + 'static,
    {
        let shared = Shared {
            slot: Mutex::new(Slot { generation: 0, value: None }),
            callback: Mutex::new(boxed_callback(callback)),
            status: Mutex::new(SaveStatus::Idle),
            in_flight: options.serialize_saves.then(|| smol::lock::Mutex::new(())),
            saves: Mutex::new(Vec::new()),
        };
        Self {
            shared: Arc::new(shared),
            timer: None,
            last_seen: None,
            delay: options.delay,
        }
    }

    /// Replace the save callback. Applies to the pending window too.
    pub fn set_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SaveResult> + Send + 'static,
    {
        *lock(&self.shared.callback) = boxed_callback(callback);
    }

    /// Record the current value. Returns true if it differed from the last
    /// observed value and a new window was started.
    pub fn observe(&mut self, value: T) -> bool {
        if self.last_seen.as_ref() == Some(&value) {
            return false;
        }
        self.last_seen = Some(value.clone());

        let generation = {
            let mut slot = lock(&self.shared.slot);
            slot.generation += 1;
            slot.value = Some(value);
            slot.generation
        };
        *lock(&self.shared.status) = SaveStatus::Pending;

        let shared = Arc::clone(&self.shared);
        let delay = self.delay;
        // Replacing the task drops the previous one, which cancels its timer
        self.timer = Some(smol::spawn(async move {
            Timer::after(delay).await;
            if fire(&shared, Some(generation)).is_some() {
                log::debug!("autosave: window {} fired", generation);
            }
        }));
        log::trace!("autosave: window {} scheduled in {:?}", generation, delay);
        true
    }

    /// Fire the pending window now (quit, window close) and wait for its save.
    /// Returns `None` when nothing was pending. Saves fired by earlier windows
    /// may still be running; see [`settle`](Self::settle).
    pub async fn flush(&mut self) -> Option<SaveStatus> {
        self.timer = None;
        let done = fire(&self.shared, None)?;
        done.recv().await.ok()
    }
}

impl<T> DebounceScheduler<T> {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// True while a change is waiting out the debounce window.
    pub fn is_pending(&self) -> bool {
        lock(&self.shared.slot).value.is_some()
    }

    pub fn status(&self) -> SaveStatus {
        lock(&self.shared.status).clone()
    }

    /// Number of fired saves that have not finished, including ones waiting
    /// for their turn when saves are serialized.
    pub fn saves_in_flight(&self) -> usize {
        lock(&self.shared.saves).iter().filter(|save| !save.is_finished()).count()
    }

    /// Wait until every fired save has finished and return the final status.
    ///
    /// A window that has not fired yet is not waited for; call
    /// [`flush`](DebounceScheduler::flush) first to include it.
    pub async fn settle(&self) -> SaveStatus {
        loop {
            let saves = std::mem::take(&mut *lock(&self.shared.saves));
            if saves.is_empty() {
                return self.status();
            }
            for save in saves {
                save.await;
            }
        }
    }

    /// Cancel the pending window, if any. The callback will not see its value.
    pub fn dispose(&mut self) {
        self.timer = None;
        self.last_seen = None;

        let cancelled = {
            let mut slot = lock(&self.shared.slot);
            slot.generation += 1;
            slot.value.take().is_some()
        };
        if cancelled {
            log::debug!("autosave: pending window cancelled");
            let mut status = lock(&self.shared.status);
            if *status == SaveStatus::Pending {
                *status = SaveStatus::Idle;
            }
        }
    }
}

impl<T> Drop for DebounceScheduler<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Take the pending value and start its save on the executor.
///
/// With `Some(generation)` this only fires if no newer change arrived since
/// that window was scheduled; `None` fires whatever is pending. The returned
/// receiver yields the final status. The save task is kept in `saves` so
/// [`DebounceScheduler::settle`] can wait for it.
fn fire<T: Send + 'static>(shared: &Arc<Shared<T>>, generation: Option<u64>) -> Option<Receiver<SaveStatus>> {
    let value = {
        let mut slot = lock(&shared.slot);
        if generation.is_some_and(|g| g != slot.generation) {
            return None;
        }
        slot.value.take()?
    };
    let callback = Arc::clone(&*lock(&shared.callback));

    let (done_tx, done_rx) = channel::bounded(1);
    let task_shared = Arc::clone(shared);
    let save = smol::spawn(async move {
        let shared = task_shared;
        let _turn = match &shared.in_flight {
            Some(gate) => Some(gate.lock().await),
            None => None,
        };
        *lock(&shared.status) = SaveStatus::Saving;

        let status = match callback(value).await {
            Ok(()) => SaveStatus::Saved { at: Utc::now() },
            Err(e) => {
                log::warn!("autosave: save failed: {}", e);
                SaveStatus::Failed { message: e.to_string() }
            }
        };
        *lock(&shared.status) = status.clone();
        let _ = done_tx.try_send(status);
    });

    let mut saves = lock(&shared.saves);
    saves.retain(|save| !save.is_finished());
    saves.push(save);
    Some(done_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(i32) -> Boxed<SaveResult> + Send + Sync + 'static) {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&saved);
        let callback = move |v: i32| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(v);
                SaveResult::Ok(())
            }
            .boxed()
        };
        (saved, callback)
    }

    #[test]
    fn test_burst_saves_once_with_last_value() {
        smol::block_on(async {
            let (saved, callback) = recorder();
            let mut scheduler = DebounceScheduler::new(Duration::from_millis(80), callback);

            for v in 1..=5 {
                assert!(scheduler.observe(v));
                Timer::after(Duration::from_millis(10)).await;
            }
            assert!(saved.lock().unwrap().is_empty(), "no save during the burst");
            assert!(scheduler.is_pending());

            Timer::after(Duration::from_millis(250)).await;
            assert_eq!(*saved.lock().unwrap(), vec![5]);
            assert!(!scheduler.is_pending());
            assert!(matches!(scheduler.status(), SaveStatus::Saved { .. }));
        });
    }

    #[test]
    fn test_unchanged_value_does_not_restart() {
        smol::block_on(async {
            let (saved, callback) = recorder();
            let mut scheduler = DebounceScheduler::new(Duration::from_millis(30), callback);
            assert!(scheduler.observe(7));
            assert!(!scheduler.observe(7));

            Timer::after(Duration::from_millis(150)).await;
            assert_eq!(*saved.lock().unwrap(), vec![7]);
            assert!(!scheduler.observe(7), "same value after a save is still unchanged");
        });
    }

    #[test]
    fn test_dispose_cancels_pending_window() {
        smol::block_on(async {
            let (saved, callback) = recorder();
            let mut scheduler = DebounceScheduler::new(Duration::from_millis(60), callback);
            scheduler.observe(1);
            Timer::after(Duration::from_millis(10)).await;
            scheduler.dispose();

            assert!(!scheduler.is_pending());
            assert_eq!(scheduler.status(), SaveStatus::Idle);
            Timer::after(Duration::from_millis(200)).await;
            assert!(saved.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_drop_cancels_pending_window() {
        smol::block_on(async {
            let (saved, callback) = recorder();
            {
                let mut scheduler = DebounceScheduler::new(Duration::from_millis(40), callback);
                scheduler.observe(1);
            }
            Timer::after(Duration::from_millis(150)).await;
            assert!(saved.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_latest_callback_runs() {
        smol::block_on(async {
            let (stale, stale_cb) = recorder();
            let (fresh, fresh_cb) = recorder();
            let mut scheduler = DebounceScheduler::new(Duration::from_millis(50), stale_cb);
            scheduler.observe(3);
            scheduler.set_callback(fresh_cb);

            Timer::after(Duration::from_millis(200)).await;
            assert!(stale.lock().unwrap().is_empty());
            assert_eq!(*fresh.lock().unwrap(), vec![3]);
        });
    }

    #[test]
    fn test_flush_saves_immediately() {
        smol::block_on(async {
            let (saved, callback) = recorder();
            let mut scheduler = DebounceScheduler::new(Duration::from_secs(60), callback);
            assert_eq!(scheduler.flush().await, None);

            scheduler.observe(9);
            let status = scheduler.flush().await;
            assert!(matches!(status, Some(SaveStatus::Saved { .. })));
            assert_eq!(*saved.lock().unwrap(), vec![9]);
            assert!(!scheduler.is_pending());
        });
    }

    #[test]
    fn test_failure_is_reported_not_retried() {
        smol::block_on(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let mut scheduler = DebounceScheduler::new(Duration::from_millis(20), move |_v: i32| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { SaveResult::Err("backend unavailable".into()) }
            });
            scheduler.observe(1);

            Timer::after(Duration::from_millis(200)).await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(scheduler.status(), SaveStatus::Failed { message: "backend unavailable".into() });
        });
    }

    /// Callback that sleeps while tracking how many saves run at once.
    fn slow_callback(
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<i32>>>,
    ) -> impl Fn(i32) -> Boxed<SaveResult> + Send + Sync + 'static {
        move |v| {
            let (active, peak, order) = (active.clone(), peak.clone(), order.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                Timer::after(Duration::from_millis(150)).await;
                order.lock().unwrap().push(v);
                active.fetch_sub(1, Ordering::SeqCst);
                SaveResult::Ok(())
            }
            .boxed()
        }
    }

    #[test]
    fn test_windows_overlap_without_guard() {
        smol::block_on(async {
            let (active, peak) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
            let order = Arc::new(Mutex::new(Vec::new()));
            let mut scheduler = DebounceScheduler::new(
                Duration::from_millis(20),
                slow_callback(active, peak.clone(), order.clone()),
            );

            scheduler.observe(1);
            Timer::after(Duration::from_millis(60)).await;
            scheduler.observe(2);
            Timer::after(Duration::from_millis(400)).await;

            assert_eq!(peak.load(Ordering::SeqCst), 2, "second save starts while the first is in flight");
            assert_eq!(order.lock().unwrap().len(), 2);
        });
    }

    #[test]
    fn test_serialized_saves_do_not_overlap() {
        smol::block_on(async {
            let (active, peak) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
            let order = Arc::new(Mutex::new(Vec::new()));
            let options = SchedulerOptions {
                delay: Duration::from_millis(20),
                serialize_saves: true,
            };
            let mut scheduler =
                DebounceScheduler::with_options(options, slow_callback(active, peak.clone(), order.clone()));

            scheduler.observe(1);
            Timer::after(Duration::from_millis(60)).await;
            scheduler.observe(2);
            Timer::after(Duration::from_millis(600)).await;

            assert_eq!(peak.load(Ordering::SeqCst), 1);
            assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        });
    }

    #[test]
    fn test_settle_waits_for_queued_saves() {
        smol::block_on(async {
            let (active, peak) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
            let order = Arc::new(Mutex::new(Vec::new()));
            let options = SchedulerOptions {
                delay: Duration::from_millis(20),
                serialize_saves: true,
            };
            let mut scheduler = DebounceScheduler::with_options(options, slow_callback(active, peak, order.clone()));

            scheduler.observe(1);
            Timer::after(Duration::from_millis(50)).await;
            scheduler.observe(2);
            Timer::after(Duration::from_millis(50)).await;

            // Both windows fired; the second waits behind the first
            assert_eq!(scheduler.flush().await, None);
            assert_eq!(scheduler.status(), SaveStatus::Pending);
            assert_eq!(scheduler.saves_in_flight(), 2);

            let status = scheduler.settle().await;
            assert!(matches!(status, SaveStatus::Saved { .. }), "got {status:?}");
            assert_eq!(*order.lock().unwrap(), vec![1, 2]);
            assert_eq!(scheduler.saves_in_flight(), 0);
        });
    }

    #[test]
    fn test_settle_with_nothing_fired() {
        smol::block_on(async {
            let (saved, callback) = recorder();
            let mut scheduler = DebounceScheduler::new(Duration::from_secs(60), callback);
            assert_eq!(scheduler.settle().await, SaveStatus::Idle);

            scheduler.observe(4);
            assert_eq!(scheduler.settle().await, SaveStatus::Pending, "unfired window is not saved");
            assert!(saved.lock().unwrap().is_empty());
        });
    }

    #[test]
    fn test_overlapping_windows_last_completion_wins() {
        smol::block_on(async {
            let order = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&order);
            let mut scheduler = DebounceScheduler::new(Duration::from_millis(20), move |v: i32| {
                let sink = Arc::clone(&sink);
                async move {
                    let took = if v == 1 { 150 } else { 400 };
                    Timer::after(Duration::from_millis(took)).await;
                    sink.lock().unwrap().push(v);
                    SaveResult::Ok(())
                }
            });

            // Save 1 runs 20..170ms, save 2 runs 80..480ms
            scheduler.observe(1);
            Timer::after(Duration::from_millis(60)).await;
            scheduler.observe(2);
            Timer::after(Duration::from_millis(200)).await;

            // The older save finished while the newer one is still running
            assert_eq!(*order.lock().unwrap(), vec![1]);
            assert_eq!(scheduler.saves_in_flight(), 1);
            assert!(matches!(scheduler.status(), SaveStatus::Saved { .. }));

            let status = scheduler.settle().await;
            assert!(matches!(status, SaveStatus::Saved { .. }));
            assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        });
    }
}
