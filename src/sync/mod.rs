//! Sync event engine.
//!
//! The engine queues validated changes, delivers them to in-process
//! listeners, retries failed deliveries with a linear backoff, and keeps an
//! audit log of every event it accepted. One engine exists per execution
//! context; it is a cheap cloneable handle, constructed once and passed to
//! whoever needs it.
//!
//! Processing happens on the tokio runtime: right after every submit and on
//! a fixed interval once [`SyncEngine::start`] was called. Runs never
//! overlap; a run that finds another one in progress does nothing and the
//! next trigger picks up what is still pending.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Bus, ChangeNotice};
use crate::config::SyncConfig;
use crate::validate::{sanitize, unchecked, validate_record};

mod event;
pub use event::{Origin, SyncEvent, SyncEventType, SyncStats, SyncStatus};

mod error;
pub use error::{ListenerError, SubmitError};

mod listener;
pub use listener::{FnListener, SyncListener};

/// Handle to the sync engine of one execution context.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Shared>,
}

struct Shared {
    config: SyncConfig,
    broadcaster: Broadcaster,
    state: Mutex<QueueState>,
    listeners: Mutex<HashMap<SyncEventType, Vec<Arc<dyn SyncListener>>>>,
    processing: AtomicBool,
}

/// Live queue plus its audit mirror. Every queued event also has an audit
/// entry carrying the same status.
#[derive(Default)]
struct QueueState {
    queue: Vec<SyncEvent>,
    audit: Vec<SyncEvent>,
}

impl QueueState {
    /// Mutate the queued event `id` and copy the result into the audit log.
    fn update(&mut self, id: Uuid, f: impl FnOnce(&mut SyncEvent)) -> Option<SyncEvent> {
        let event = self.queue.iter_mut().find(|e| e.id == id)?;
        f(event);
        let updated = event.clone();
        if let Some(entry) = self.audit.iter_mut().find(|e| e.id == id) {
            *entry = updated.clone();
        }
        Some(updated)
    }

    /// Put every queued event matching `pred` back to pending with a fresh retry budget.
    fn reset(&mut self, pred: impl Fn(&SyncEvent) -> bool) -> usize {
        let ids: Vec<Uuid> = self.queue.iter().filter(|e| pred(e)).map(|e| e.id).collect();
        for id in &ids {
            self.update(*id, |e| {
                e.status = SyncStatus::Pending;
                e.retry_count = 0;
                e.last_error = None;
            });
        }
        ids.len()
    }
}

/// Resets the busy flag when a processing run ends, even by panic.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the periodic processor alive; dropping it stops the processor.
pub struct ProcessorHandle {
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Public API
impl SyncEngine {
    pub fn new(config: SyncConfig, bus: Arc<dyn Bus>) -> Self {
        Self {
            inner: Arc::new(Shared {
                config,
                broadcaster: Broadcaster::new(bus),
                state: Mutex::new(QueueState::default()),
                listeners: Mutex::new(HashMap::new()),
                processing: AtomicBool::new(false),
            }),
        }
    }

    /// Sanitize, validate and queue a change, then trigger processing.
    ///
    /// Invalid payloads are rejected and nothing is queued. Validation
    /// warnings are logged only.
    pub fn submit(
        &self,
        event_type: impl Into<SyncEventType>,
        user_id: impl Into<String>,
        data: Value,
        origin: Origin,
    ) -> Result<Uuid, SubmitError> {
        let event_type = event_type.into();
        let user_id = user_id.into();
        let data = sanitize(&data);

        let validation = match event_type.record_kind() {
            Some(kind) => validate_record(kind, &data),
            None => unchecked(event_type.as_str(), &data),
        };
        for warning in &validation.warnings {
            warn!(%event_type, user_id = %user_id, warning = %warning, "sync event warning");
        }
        if !validation.is_valid {
            warn!(
                %event_type,
                user_id = %user_id,
                errors = ?validation.errors,
                "sync event rejected"
            );
            return Err(SubmitError::Invalid {
                event_type,
                errors: validation.errors,
            });
        }

        let event = SyncEvent::new(event_type, user_id, validation.sanitized, origin);
        let id = event.id;
        info!(
            event_id = %id,
            event_type = %event.event_type,
            user_id = %event.user_id,
            origin = ?origin,
            "sync event queued"
        );
        {
            let mut state = self.inner.state.lock();
            state.audit.push(event.clone());
            state.queue.push(event);
        }

        self.trigger();
        Ok(id)
    }

    pub fn register_listener(
        &self,
        event_type: impl Into<SyncEventType>,
        listener: Arc<dyn SyncListener>,
    ) {
        self.inner
            .listeners
            .lock()
            .entry(event_type.into())
            .or_default()
            .push(listener);
    }

    /// Remove a previously registered listener. Returns whether it was found.
    pub fn unregister_listener(
        &self,
        event_type: impl Into<SyncEventType>,
        listener: &Arc<dyn SyncListener>,
    ) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(registered) = listeners.get_mut(&event_type.into()) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|l| !same_listener(l, listener));
        before != registered.len()
    }

    /// Spawn the periodic processor on the current tokio runtime.
    pub fn start(&self) -> ProcessorHandle {
        let engine = self.clone();
        let period = self.inner.config.process_interval().max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                engine.process_pending().await;
            }
        });
        ProcessorHandle { task }
    }

    /// Deliver every pending event once. Returns how many events were attempted.
    pub async fn process_pending(&self) -> usize {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync processor busy, skipping run");
            return 0;
        }
        let _busy = BusyGuard(&self.inner.processing);

        let pending: Vec<SyncEvent> = self
            .inner
            .state
            .lock()
            .queue
            .iter()
            .filter(|e| e.status == SyncStatus::Pending)
            .cloned()
            .collect();

        for event in &pending {
            match self.dispatch(event).await {
                Ok(()) => self.mark_synced(event),
                Err(e) => self.mark_failed(event, e),
            }
        }

        self.collect_garbage();
        pending.len()
    }

    /// Delivery counts over the whole audit log.
    pub fn stats(&self) -> SyncStats {
        let state = self.inner.state.lock();
        let count = |status: SyncStatus| state.audit.iter().filter(|e| e.status == status).count();

        let total = state.audit.len();
        let synced = count(SyncStatus::Synced);
        SyncStats {
            total,
            synced,
            failed: count(SyncStatus::Failed),
            pending: count(SyncStatus::Pending),
            success_rate: if total == 0 {
                0.0
            } else {
                synced as f64 / total as f64
            },
            queue_len: state.queue.len(),
        }
    }

    /// Requeue every failed event with a fresh retry budget.
    pub fn retry_failed_events(&self) -> usize {
        let reset = self
            .inner
            .state
            .lock()
            .reset(|e| e.status == SyncStatus::Failed);
        info!(reset, "retrying failed sync events");
        self.trigger();
        reset
    }

    /// Requeue every event still in the live queue, synced ones included.
    pub fn force_sync_all(&self) -> usize {
        let reset = self.inner.state.lock().reset(|_| true);
        info!(reset, "forcing sync of all queued events");
        self.trigger();
        reset
    }

    /// Drop synced events older than the queue retention from the live queue.
    pub fn collect_garbage(&self) -> usize {
        let Some(cutoff) = cutoff(self.inner.config.queue_retention()) else {
            return 0;
        };
        let mut state = self.inner.state.lock();
        let before = state.queue.len();
        state
            .queue
            .retain(|e| e.status != SyncStatus::Synced || e.created_at >= cutoff);
        let pruned = before - state.queue.len();
        if pruned > 0 {
            debug!(pruned, "pruned synced events from queue");
        }
        pruned
    }

    /// Drop audit entries older than the audit retention.
    pub fn prune_audit_log(&self) -> usize {
        let Some(cutoff) = cutoff(self.inner.config.audit_retention()) else {
            return 0;
        };
        let mut state = self.inner.state.lock();
        let before = state.audit.len();
        state.audit.retain(|e| e.created_at >= cutoff);
        let pruned = before - state.audit.len();
        info!(pruned, "pruned audit log");
        pruned
    }

    pub fn clear_audit_log(&self) {
        self.inner.state.lock().audit.clear();
        info!("audit log cleared");
    }

    pub fn queue(&self) -> Vec<SyncEvent> {
        self.inner.state.lock().queue.clone()
    }

    pub fn audit_log(&self) -> Vec<SyncEvent> {
        self.inner.state.lock().audit.clone()
    }

    /// Queued events that exhausted their automatic retries or await one.
    pub fn failed_events(&self) -> Vec<SyncEvent> {
        self.inner
            .state
            .lock()
            .queue
            .iter()
            .filter(|e| e.status == SyncStatus::Failed)
            .cloned()
            .collect()
    }
}

/// Private API
impl SyncEngine {
    /// Start a processing run in the background, if a runtime is available.
    fn trigger(&self) {
        match Handle::try_current() {
            Ok(handle) => {
                let engine = self.clone();
                handle.spawn(async move {
                    engine.process_pending().await;
                });
            }
            Err(_) => debug!("no async runtime, pending events wait for the next run"),
        }
    }

    /// Await every listener for the event's type in registration order.
    ///
    /// Without listeners the event is published on the in-context channel.
    async fn dispatch(&self, event: &SyncEvent) -> Result<(), ListenerError> {
        let listeners = self
            .inner
            .listeners
            .lock()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        if listeners.is_empty() {
            self.inner.broadcaster.notify_local(ChangeNotice::new(
                event.event_type.clone(),
                event.data.clone(),
            ));
            return Ok(());
        }

        for listener in listeners {
            listener.on_event(event).await?;
        }
        Ok(())
    }

    /// Mark delivered; local changes are then relayed to other contexts.
    fn mark_synced(&self, event: &SyncEvent) {
        self.inner.state.lock().update(event.id, |e| {
            e.status = SyncStatus::Synced;
            e.last_error = None;
        });
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            user_id = %event.user_id,
            "sync event synced"
        );

        if event.origin == Origin::Local {
            self.inner
                .broadcaster
                .announce(event.event_type.clone(), event.data.clone());
        }
    }

    fn mark_failed(&self, event: &SyncEvent, reason: ListenerError) {
        let reason = reason.to_string();
        let updated = self.inner.state.lock().update(event.id, |e| {
            e.status = SyncStatus::Failed;
            e.retry_count += 1;
            e.last_error = Some(reason.clone());
        });
        let Some(updated) = updated else {
            return;
        };

        if updated.retry_count < self.inner.config.max_retries {
            let delay = self.inner.config.retry_backoff() * updated.retry_count;
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                retry_count = updated.retry_count,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "sync event failed, retry scheduled"
            );
            self.schedule_retry(event.id, delay);
        } else {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                retry_count = updated.retry_count,
                reason = %reason,
                "sync event failed, retries exhausted"
            );
        }
    }

    fn schedule_retry(&self, id: Uuid, delay: Duration) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let engine = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            engine.inner.state.lock().update(id, |e| {
                if e.status == SyncStatus::Failed {
                    e.status = SyncStatus::Pending;
                }
            });
            engine.trigger();
        });
    }
}

fn same_listener(a: &Arc<dyn SyncListener>, b: &Arc<dyn SyncListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn cutoff(window: Duration) -> Option<DateTime<Utc>> {
    let window = TimeDelta::from_std(window).ok()?;
    Utc::now().checked_sub_signed(window)
}
