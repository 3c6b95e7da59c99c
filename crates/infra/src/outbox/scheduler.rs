//! Outbox scheduler: one tick attempts every `NEW` entry once, oldest first.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use crate::config::OutboxConfig;
use crate::periodic::{ScheduledJobId, SchedulerPool};

use super::registry::OperationHandlerRegistry;
use super::store::OutboxStore;
use super::types::{OutboxEntry, OutboxStatus, NO_HANDLER_MESSAGE};

/// Name of the periodic job registered by [`install`].
pub const TICK_JOB_NAME: &str = "outbox-tick";

/// Counts for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TickReport {
    pub attempted: usize,
    pub done: usize,
    pub failed: usize,
}

pub struct OutboxScheduler<S: OutboxStore> {
    store: S,
    registry: OperationHandlerRegistry,
}

impl<S: OutboxStore> OutboxScheduler<S> {
    pub fn new(store: S, registry: OperationHandlerRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &OperationHandlerRegistry {
        &self.registry
    }

    /// Attempt every `NEW` entry once, in ascending id order.
    ///
    /// Nothing escapes a tick: handler errors and panics become `ERROR`
    /// rows, and store failures are logged.
    pub fn tick(&self) -> TickReport {
        let span = info_span!("outbox_tick");
        let _enter = span.enter();

        let entries = match self.store.find_by_status(OutboxStatus::New) {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "failed to fetch pending outbox entries");
                return TickReport::default();
            }
        };

        let mut report = TickReport::default();
        for entry in &entries {
            report.attempted += 1;
            match self.dispatch(entry) {
                Ok(()) => {
                    report.done += 1;
                    if let Err(e) = self.store.mark_done(entry.id) {
                        error!(entry_id = %entry.id, error = %e, "failed to mark outbox entry done");
                    }
                }
                Err(message) => {
                    report.failed += 1;
                    warn!(
                        entry_id = %entry.id,
                        operation = %entry.operation,
                        error = %message,
                        "outbox entry failed"
                    );
                    if let Err(e) = self.store.mark_error(entry.id, &message) {
                        error!(entry_id = %entry.id, error = %e, "failed to mark outbox entry error");
                    }
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                done = report.done,
                failed = report.failed,
                "outbox tick finished"
            );
        }
        report
    }

    /// Run the entry's handler; `Err` carries the message to persist.
    fn dispatch(&self, entry: &OutboxEntry) -> Result<(), String> {
        let Some(handler) = self.registry.lookup(entry.operation) else {
            return Err(NO_HANDLER_MESSAGE.to_string());
        };

        debug!(entry_id = %entry.id, operation = %entry.operation, "dispatching outbox entry");
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(entry))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{}: {}", e.kind(), e)),
            Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Register the tick on `pool` with fixed-delay semantics.
///
/// Returns `None` and registers nothing unless `config.enabled`.
pub fn install<S>(
    scheduler: Arc<OutboxScheduler<S>>,
    pool: &SchedulerPool,
    config: &OutboxConfig,
) -> Option<ScheduledJobId>
where
    S: OutboxStore + 'static,
{
    if !config.enabled {
        info!("outbox scheduler disabled");
        return None;
    }

    let operations = scheduler.registry().operations();
    info!(
        delay_ms = config.delay.as_millis() as u64,
        initial_delay_ms = config.initial_delay.as_millis() as u64,
        operations = ?operations,
        "outbox scheduler enabled"
    );
    match pool.schedule_with_fixed_delay(TICK_JOB_NAME, config.initial_delay, config.delay, move || {
        scheduler.tick();
    }) {
        Ok(id) => Some(id),
        Err(e) => {
            error!(error = %e, "failed to schedule outbox tick");
            None
        }
    }
}
