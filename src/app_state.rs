//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::domain::TemplateCatalog;
use crate::persistence::{DeviceDirectory, LedgerStore, ProfileDirectory, UserStore, WorkflowStore};
use crate::service::{
    DispatchLimits, Dispatcher, LedgerService, ScheduleService, SchedulerDriver, WorkflowService,
};
use crate::transport::PushTransport;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Event ledger and derived user state.
    pub ledger: Arc<LedgerService>,
    /// Notification preferences and schedules.
    pub schedule: Arc<ScheduleService>,
    /// Deferred-link workflows.
    pub workflows: Arc<WorkflowService>,
    /// Scheduler driver, used by the on-demand tick route and the
    /// background loop.
    pub driver: Arc<SchedulerDriver>,
    /// Landing page the public workflow link redirects to.
    pub landing_url: Arc<str>,
}

impl AppState {
    /// Wires every service over one store that implements all persistence
    /// traits.
    #[must_use]
    pub fn from_store<S>(
        store: Arc<S>,
        transport: Arc<dyn PushTransport>,
        config: &ServiceConfig,
    ) -> Self
    where
        S: LedgerStore + UserStore + WorkflowStore + DeviceDirectory + ProfileDirectory + 'static,
    {
        let users: Arc<dyn UserStore> = Arc::clone(&store) as Arc<dyn UserStore>;
        let ledger = LedgerService::new(
            Arc::clone(&store) as Arc<dyn LedgerStore>,
            Arc::clone(&users),
        )
        .with_max_clock_skew(config.max_event_clock_skew());
        let schedule = ScheduleService::new(Arc::clone(&users));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as Arc<dyn DeviceDirectory>,
            Arc::clone(&store) as Arc<dyn ProfileDirectory>,
            transport,
            Arc::new(TemplateCatalog::standard()),
            ledger.clone(),
            DispatchLimits::from(&config.scheduler),
        );
        let driver = SchedulerDriver::new(
            Arc::clone(&users),
            schedule.clone(),
            dispatcher,
            &config.scheduler,
        );
        let workflows = WorkflowService::new(
            Arc::clone(&store) as Arc<dyn WorkflowStore>,
            config.workflow_link_base.clone(),
        );

        Self {
            ledger: Arc::new(ledger),
            schedule: Arc::new(schedule),
            workflows: Arc::new(workflows),
            driver: Arc::new(driver),
            landing_url: Arc::from(config.workflow_landing_url.as_str()),
        }
    }
}
