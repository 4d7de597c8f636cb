//! # Streaming Worker
//!
//! One background thread per cache. Each iteration claims a single
//! region under the ledger lock, does the store I/O with no lock held,
//! then commits under the ledger lock.
//!
//! ```text
//!   claim (ledger lock) ──► load/save (no lock) ──► commit (ledger ─► live)
//!        │ nothing to do
//!        ▼
//!   save orphaned entities, or wait on `wake` for idle_backoff_ms
//! ```
//!
//! A region whose entities changed during its save is evicted anyway:
//! the changed entities are taken out of the live set and saved once
//! more. Entities that wandered into a region nobody tracks are merged
//! into that region's stored contents when the worker has nothing else
//! to do, and by the shutdown flush.
//!
//! A failed load or save is put back in its queue and the worker pauses
//! for `failure_backoff_ms`. An invariant violation is published as a
//! fault and stops the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use tessera_core::{Entity, RegionKey};

use crate::config::StreamingConfig;
use crate::error::{StorageError, StorageResult, StreamingError, StreamingResult};
use crate::events::{StreamingEvent, StreamingStats};
use crate::ledger::{Claim, SubscriptionLedger, UnloadOutcome};
use crate::live_set::{Eviction, LiveEntitySet};
use crate::store::EntityStore;

/// State shared between the cache handle and its worker.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) ledger: Mutex<SubscriptionLedger>,
    /// Wakes the worker. Paired with `ledger`.
    pub(crate) wake: Condvar,
    /// Signals callers that the ledger settled or the worker stopped.
    /// Paired with `ledger`.
    pub(crate) settled: Condvar,
    pub(crate) live: LiveEntitySet,
    pub(crate) stats: Mutex<StreamingStats>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) running: AtomicBool,
    pub(crate) config: StreamingConfig,
    events: Sender<StreamingEvent>,
}

impl Shared {
    pub(crate) fn new(config: StreamingConfig, events: Sender<StreamingEvent>) -> Self {
        Self {
            ledger: Mutex::new(SubscriptionLedger::new(config.soft_border)),
            wake: Condvar::new(),
            settled: Condvar::new(),
            live: LiveEntitySet::new(),
            stats: Mutex::new(StreamingStats::default()),
            shutdown: AtomicBool::new(false),
            running: AtomicBool::new(true),
            config,
            events,
        }
    }

    /// An occupied region with no ledger entry.
    fn orphan(&self, ledger: &SubscriptionLedger) -> Option<RegionKey> {
        self.live.find_region(|key| ledger.get(key).is_none())
    }

    /// True if nothing is queued or in flight and every resident entity
    /// lies in a tracked region.
    pub(crate) fn is_settled(&self, ledger: &SubscriptionLedger) -> bool {
        ledger.is_settled() && self.orphan(ledger).is_none()
    }

    fn emit(&self, event: StreamingEvent) {
        if let Err(TrySendError::Full(_)) = self.events.try_send(event) {
            self.stats.lock().events_dropped += 1;
        }
    }

    fn notify_if_settled(&self, ledger: &SubscriptionLedger) {
        if self.is_settled(ledger) {
            self.settled.notify_all();
        }
    }

    /// Sleeps until woken or `timeout`, unless there is work or a stop
    /// request.
    fn idle(&self, timeout: Duration) {
        let mut ledger = self.ledger.lock();
        if self.shutdown.load(Ordering::Acquire) || ledger.has_queued_work() {
            return;
        }
        self.settled.notify_all();
        self.wake.wait_for(&mut ledger, timeout);
    }

    fn pause(&self, timeout: Duration) {
        let mut ledger = self.ledger.lock();
        if !self.shutdown.load(Ordering::Acquire) {
            self.wake.wait_for(&mut ledger, timeout);
        }
    }
}

enum Step {
    Worked,
    Failed,
    Idle,
}

/// Starts the worker thread.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    store: Arc<dyn EntityStore>,
) -> StreamingResult<JoinHandle<()>> {
    let name = shared.config.worker_name.clone();
    thread::Builder::new()
        .name(name)
        .spawn(move || run(&shared, store.as_ref()))
        .map_err(|e| StreamingError::WorkerSpawn(e.to_string()))
}

fn run(shared: &Shared, store: &dyn EntityStore) {
    let idle_backoff = Duration::from_millis(shared.config.idle_backoff_ms);
    let failure_backoff = Duration::from_millis(shared.config.failure_backoff_ms);
    info!(worker = %shared.config.worker_name, "streaming worker started");

    while !shared.shutdown.load(Ordering::Acquire) {
        match step(shared, store) {
            Ok(Step::Worked) => {}
            Ok(Step::Failed) => shared.pause(failure_backoff),
            Ok(Step::Idle) => shared.idle(idle_backoff),
            Err(fault) => {
                error!(error = %fault, "streaming worker fault, stopping");
                shared.emit(StreamingEvent::Fault { error: fault });
                break;
            }
        }
    }

    if shared.config.flush_on_shutdown {
        flush(shared, store);
    }

    shared.running.store(false, Ordering::Release);
    {
        let _ledger = shared.ledger.lock();
        shared.settled.notify_all();
    }
    info!(worker = %shared.config.worker_name, "streaming worker stopped");
}

fn step(shared: &Shared, store: &dyn EntityStore) -> StreamingResult<Step> {
    let claim = shared.ledger.lock().claim_next()?;
    match claim {
        None => Ok(save_orphans(shared, store)),
        Some(Claim::Load(key)) => load(shared, store, key),
        Some(Claim::Unload(key)) => unload(shared, store, key),
    }
}

fn load(shared: &Shared, store: &dyn EntityStore, key: RegionKey) -> StreamingResult<Step> {
    trace!(planet = key.planet.0, x = key.column.x, y = key.column.y, "loading region");

    match store.load_entities(key.planet, key.column) {
        Ok(entities) => {
            let (state, count) = {
                let mut ledger = shared.ledger.lock();
                let state = ledger.commit_load(key)?;
                let count = shared.live.insert_loaded(key, entities);
                shared.notify_if_settled(&ledger);
                (state, count)
            };
            {
                let mut stats = shared.stats.lock();
                stats.loads += 1;
                stats.entities_loaded += count as u64;
            }
            debug!(planet = key.planet.0, x = key.column.x, y = key.column.y, count,
                state = %state, "region loaded");
            shared.emit(StreamingEvent::Loaded { key, count });
            Ok(Step::Worked)
        }
        Err(source) => {
            let state = {
                let mut ledger = shared.ledger.lock();
                let state = ledger.fail_load(key)?;
                shared.notify_if_settled(&ledger);
                state
            };
            shared.stats.lock().load_failures += 1;
            warn!(planet = key.planet.0, x = key.column.x, y = key.column.y,
                error = %source, state = ?state, "region load failed");
            shared.emit(StreamingEvent::LoadFailed { key, error: source });
            Ok(Step::Failed)
        }
    }
}

fn unload(shared: &Shared, store: &dyn EntityStore, key: RegionKey) -> StreamingResult<Step> {
    let snapshot = shared.live.snapshot(&key);
    trace!(planet = key.planet.0, x = key.column.x, y = key.column.y,
        count = snapshot.entities.len(), "saving region");

    if let Err(source) = store.save_entities(key.planet, key.column, &snapshot.entities) {
        return failed_save(shared, key, source, Vec::new());
    }

    let mut changed = Vec::new();
    let outcome = {
        let mut ledger = shared.ledger.lock();
        let outcome = ledger.commit_unload(key, || match shared.live.evict(&key, snapshot.revision) {
            Eviction::Unchanged(count) => Some(count),
            Eviction::Changed(entities) => {
                changed = entities;
                None
            }
        })?;
        shared.notify_if_settled(&ledger);
        outcome
    };
    shared.stats.lock().saves += 1;

    if outcome == UnloadOutcome::Resave {
        return resave(shared, store, key, changed);
    }
    report_unload(shared, key, outcome);
    Ok(Step::Worked)
}

/// Saves entities that changed during their region's save. They are out
/// of the live set already, so this save is the last one.
fn resave(
    shared: &Shared,
    store: &dyn EntityStore,
    key: RegionKey,
    entities: Vec<Entity>,
) -> StreamingResult<Step> {
    shared.stats.lock().unloads_resaved += 1;
    debug!(planet = key.planet.0, x = key.column.x, y = key.column.y,
        count = entities.len(), "region changed during save, saving again");

    if let Err(source) = store.save_entities(key.planet, key.column, &entities) {
        return failed_save(shared, key, source, entities);
    }

    let count = entities.len();
    let outcome = {
        let mut ledger = shared.ledger.lock();
        let outcome = ledger.commit_unload(key, || Some(count))?;
        if outcome == UnloadOutcome::Restored {
            shared.live.insert_loaded(key, entities);
        }
        shared.notify_if_settled(&ledger);
        outcome
    };
    shared.stats.lock().saves += 1;
    report_unload(shared, key, outcome);
    Ok(Step::Worked)
}

fn report_unload(shared: &Shared, key: RegionKey, outcome: UnloadOutcome) {
    match outcome {
        UnloadOutcome::Evicted { count } => {
            shared.stats.lock().entities_evicted += count as u64;
            debug!(planet = key.planet.0, x = key.column.x, y = key.column.y, count,
                "region unloaded");
            shared.emit(StreamingEvent::Unloaded { key, count });
        }
        UnloadOutcome::Restored => {
            shared.stats.lock().unloads_cancelled += 1;
            debug!(planet = key.planet.0, x = key.column.x, y = key.column.y,
                "unload cancelled, region stays resident");
            shared.emit(StreamingEvent::UnloadCancelled { key });
        }
        UnloadOutcome::Resave => {}
    }
}

/// Puts a failed save back in the queue. `taken` holds entities already
/// removed from the live set; they become resident again.
fn failed_save(
    shared: &Shared,
    key: RegionKey,
    source: StorageError,
    taken: Vec<Entity>,
) -> StreamingResult<Step> {
    let state = {
        let mut ledger = shared.ledger.lock();
        let state = ledger.fail_unload(key)?;
        if !taken.is_empty() {
            shared.live.insert_loaded(key, taken);
        }
        shared.notify_if_settled(&ledger);
        state
    };
    shared.stats.lock().save_failures += 1;
    warn!(planet = key.planet.0, x = key.column.x, y = key.column.y,
        error = %source, state = %state, "region save failed");
    shared.emit(StreamingEvent::SaveFailed { key, error: source });
    Ok(Step::Failed)
}

/// Writes `entities` into a region's stored contents, replacing stored
/// copies with the same id. Returns the size of the saved region.
fn merge_into_stored(
    store: &dyn EntityStore,
    key: RegionKey,
    entities: &[Entity],
) -> StorageResult<usize> {
    let mut merged = store.load_entities(key.planet, key.column)?;
    merged.retain(|stored| entities.iter().all(|entity| entity.id != stored.id));
    merged.extend_from_slice(entities);
    store.save_entities(key.planet, key.column, &merged)?;
    Ok(merged.len())
}

/// Persists one region of entities that lie outside every tracked
/// region. They leave the live set first; a subscription arriving
/// meanwhile loads them back from the store.
fn save_orphans(shared: &Shared, store: &dyn EntityStore) -> Step {
    let (key, orphans) = {
        let ledger = shared.ledger.lock();
        let Some(key) = shared.orphan(&ledger) else {
            return Step::Idle;
        };
        (key, shared.live.take_region(&key))
    };

    match merge_into_stored(store, key, &orphans) {
        Ok(total) => {
            let count = orphans.len();
            shared.stats.lock().orphans_saved += 1;
            debug!(planet = key.planet.0, x = key.column.x, y = key.column.y, count, total,
                "orphaned entities saved");
            shared.emit(StreamingEvent::OrphansSaved { key, count });
            let ledger = shared.ledger.lock();
            shared.notify_if_settled(&ledger);
            Step::Worked
        }
        Err(source) => {
            {
                let _ledger = shared.ledger.lock();
                shared.live.insert_loaded(key, orphans);
            }
            shared.stats.lock().save_failures += 1;
            warn!(planet = key.planet.0, x = key.column.x, y = key.column.y,
                error = %source, "saving orphaned entities failed");
            shared.emit(StreamingEvent::SaveFailed { key, error: source });
            Step::Failed
        }
    }
}

/// Saves every occupied region without evicting it. Regions whose stored
/// contents were loaded are overwritten; any other occupied region is
/// merged into what the store holds.
fn flush(shared: &Shared, store: &dyn EntityStore) {
    let (resident, strays) = {
        let ledger = shared.ledger.lock();
        let resident = ledger.resident_keys();
        let strays: Vec<_> = shared
            .live
            .region_keys()
            .into_iter()
            .filter(|key| resident.binary_search(key).is_err())
            .collect();
        (resident, strays)
    };
    let mut flushed = 0_u64;

    for key in resident {
        let snapshot = shared.live.snapshot(&key);
        match store.save_entities(key.planet, key.column, &snapshot.entities) {
            Ok(()) => flushed += 1,
            Err(source) => flush_failed(shared, key, source),
        }
    }
    for key in strays {
        let entities = shared.live.in_region(&key);
        if entities.is_empty() {
            continue;
        }
        match merge_into_stored(store, key, &entities) {
            Ok(_) => flushed += 1,
            Err(source) => flush_failed(shared, key, source),
        }
    }

    shared.stats.lock().flushed_regions += flushed;
    info!(flushed, "flushed resident regions");
}

fn flush_failed(shared: &Shared, key: RegionKey, source: StorageError) {
    shared.stats.lock().save_failures += 1;
    warn!(planet = key.planet.0, x = key.column.x, y = key.column.y,
        error = %source, "flush failed");
    shared.emit(StreamingEvent::SaveFailed { key, error: source });
}
