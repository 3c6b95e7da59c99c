//! Process wiring: registry, scheduler pool, background pool and the outbox tick.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;

use workforce_context::BackgroundPool;

use crate::config::AppConfig;
use crate::outbox::{install, OperationHandler, OperationHandlerRegistry, OutboxScheduler, OutboxStore, ScheduledJobId};
use crate::periodic::SchedulerPool;

pub struct OutboxRuntime<S: OutboxStore + 'static> {
    scheduler: Arc<OutboxScheduler<S>>,
    periodic: SchedulerPool,
    background: BackgroundPool,
    tick_job: Option<ScheduledJobId>,
}

impl<S: OutboxStore + 'static> OutboxRuntime<S> {
    /// Build everything and, when enabled, start ticking.
    ///
    /// Fails on a duplicate handler or when a pool cannot start.
    pub fn start(config: &AppConfig, store: S, handlers: Vec<Arc<dyn OperationHandler>>) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let registry = OperationHandlerRegistry::new(handlers).context("building operation handler registry")?;
        let scheduler = Arc::new(OutboxScheduler::new(store, registry));

        let periodic = SchedulerPool::new("scheduler", config.scheduler.threads).context("starting scheduler pool")?;
        let background = BackgroundPool::new(config.background.to_pool_config("background"))
            .context("starting background pool")?;

        let tick_job = install(Arc::clone(&scheduler), &periodic, &config.outbox);

        info!(
            operations = ?scheduler.registry().operations(),
            outbox_enabled = tick_job.is_some(),
            "outbox runtime started"
        );
        Ok(Self {
            scheduler,
            periodic,
            background,
            tick_job,
        })
    }

    pub fn scheduler(&self) -> &Arc<OutboxScheduler<S>> {
        &self.scheduler
    }

    pub fn background(&self) -> &BackgroundPool {
        &self.background
    }

    pub fn periodic(&self) -> &SchedulerPool {
        &self.periodic
    }

    pub fn tick_job(&self) -> Option<ScheduledJobId> {
        self.tick_job
    }

    /// Stop ticking, then drain the background pool.
    pub fn shutdown(&self) {
        self.periodic.shutdown();
        self.background.shutdown();
        info!("outbox runtime stopped");
    }
}
