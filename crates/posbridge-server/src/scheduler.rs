//! Background job scheduler.
//!
//! Keeps the store-config cache warm when request traffic is light. The job
//! goes through the same single-flight refresh as request-driven reads, so
//! overlapping with them never causes a second load.

use std::sync::Arc;

use posbridge_cache::{RefreshOutcome, StoreConfigService};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, the
/// cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(
    service: Arc<StoreConfigService>,
    refresh_cron: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_refresh_job(&scheduler, service, refresh_cron).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_refresh_job(
    scheduler: &JobScheduler,
    service: Arc<StoreConfigService>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let service = Arc::clone(&service);
        Box::pin(async move {
            run_refresh_job(&service).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron, "scheduler: store-config refresh job registered");
    Ok(())
}

async fn run_refresh_job(service: &StoreConfigService) {
    match service.refresh_if_due().await {
        RefreshOutcome::NotDue => {
            tracing::debug!("scheduler: store configs fresh; nothing to do");
        }
        RefreshOutcome::Refreshed { entities } => {
            tracing::info!(entities, "scheduler: store configs refreshed");
        }
        RefreshOutcome::Failed(e) => {
            let health = service.health();
            tracing::warn!(
                error = %e,
                status = health.status.as_str(),
                age_seconds = health.age_seconds,
                "scheduler: store-config refresh failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use posbridge_cache::{CacheSettings, ConfigLoader, LoadError};
    use posbridge_core::{ManualClock, StoreConfig, TimezoneResolver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader(AtomicUsize);

    #[async_trait]
    impl ConfigLoader for CountingLoader {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn load_all(&self) -> Result<Vec<StoreConfig>, LoadError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn refresh_job_only_loads_when_due() {
        let loader = Arc::new(CountingLoader(AtomicUsize::new(0)));
        let service = StoreConfigService::new(
            loader.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            CacheSettings::default(),
            TimezoneResolver::default(),
        );

        run_refresh_job(&service).await;
        run_refresh_job(&service).await;
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_expression_is_rejected() {
        let service = Arc::new(StoreConfigService::new(
            Arc::new(CountingLoader(AtomicUsize::new(0))),
            Arc::new(ManualClock::new(Utc::now())),
            CacheSettings::default(),
            TimezoneResolver::default(),
        ));
        assert!(build_scheduler(service, "every five minutes").await.is_err());
    }
}
