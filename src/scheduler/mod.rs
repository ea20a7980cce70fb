//! Periodic background jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::SchedulerConfig;
use crate::middleware::RateLimiter;
use crate::services::{DataRetentionService, DeviceHealthService, GlobalRuleService, ServiceResult, TrashService};

/// Run `job` every `period`, starting one period from now. Errors are logged
/// and the next tick runs as usual.
pub fn spawn_job<F, Fut>(name: &'static str, period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ServiceResult<usize>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Scheduled job '{}' every {:?}", name, period);

        loop {
            ticker.tick().await;
            match job().await {
                Ok(count) => tracing::debug!("Job '{}' finished ({} affected)", name, count),
                Err(e) => tracing::error!("Job '{}' failed: {}", name, e),
            }
        }
    })
}

fn period(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

/// Spawn every job. The handles are returned so shutdown can abort them.
pub fn start(settings: &SchedulerConfig, pool: PgPool, limiters: Vec<Arc<RateLimiter>>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let p = pool.clone();
    handles.push(spawn_job("global-rules", period(settings.global_rules_secs), move || {
        let service = GlobalRuleService::new(p.clone());
        async move { service.evaluate_all_due().await }
    }));

    let p = pool.clone();
    handles.push(spawn_job("device-health", period(settings.device_health_secs), move || {
        let service = DeviceHealthService::new(p.clone());
        async move { service.run().await }
    }));

    let p = pool.clone();
    handles.push(spawn_job("trash-purge", period(settings.trash_purge_secs), move || {
        let service = TrashService::new(p.clone());
        async move { service.purge_expired().await }
    }));

    let p = pool;
    handles.push(spawn_job("data-retention", period(settings.data_retention_secs), move || {
        let service = DataRetentionService::new(p.clone());
        async move { service.execute_all().await }
    }));

    handles.push(spawn_job("rate-limit-cleanup", period(settings.rate_limit_cleanup_secs), move || {
        let removed: usize = limiters.iter().map(|limiter| limiter.cleanup()).sum();
        async move { Ok(removed) }
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn job_runs_on_each_tick_and_survives_errors() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = spawn_job("test", Duration::from_secs(10), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(crate::services::ServiceError::bad_request("first run fails"))
                } else {
                    Ok(n)
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        handle.abort();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
