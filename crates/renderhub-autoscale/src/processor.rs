//! Scale-up request processor.
//!
//! Drains the pending request table: each request is resolved against its
//! environment and pool, turned into fixed node targets and applied as a
//! pool resize. Finished requests are deleted; requests waiting on an
//! in-flight resize stay queued for the next pass.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use renderhub_batch::ComputePoolClientFactory;
use renderhub_core::{AllocationState, EnvironmentDirectory, PoolState};
use renderhub_state::{ScaleUpRequest, StateStore};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::signal::WakeSignal;
use crate::targets::targets_for_pool;

/// Default delay between passes when no wake-up arrives.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Left in the queue; the pool is busy resizing.
    InProgress,
    /// Applied or no longer applicable; removed from the queue.
    Completed,
}

pub struct ScaleUpProcessor {
    store: StateStore,
    directory: Arc<dyn EnvironmentDirectory>,
    pools: Arc<dyn ComputePoolClientFactory>,
    wake: WakeSignal,
    poll_delay: Duration,
}

impl ScaleUpProcessor {
    pub fn new(
        store: StateStore,
        directory: Arc<dyn EnvironmentDirectory>,
        pools: Arc<dyn ComputePoolClientFactory>,
        wake: WakeSignal,
    ) -> Self {
        Self {
            store,
            directory,
            pools,
            wake,
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Process the queue until `shutdown` flips, waking early on signal.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(poll_delay_secs = self.poll_delay.as_secs(), "scale-up processor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_delay) => {}
                _ = self.wake.wait() => {
                    debug!("scale-up processor woken");
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        info!("scale-up processor shutting down");
    }

    /// Handle every pending request once, concurrently.
    pub async fn run_cycle(&self) -> Vec<(ScaleUpRequest, AutoscaleResult<RequestStatus>)> {
        let requests = match self.store.list_scale_requests() {
            Ok(requests) => requests,
            Err(e) => {
                error!(error = %e, "failed to list scale requests");
                return Vec::new();
            }
        };

        join_all(requests.into_iter().map(|request| async move {
            let result = self.handle_request(&request).await;
            if let Err(e) = &result {
                error!(
                    environment = %request.environment,
                    pool = %request.pool,
                    etag = request.etag,
                    error = %e,
                    "error handling scale request"
                );
            }
            (request, result)
        }))
        .await
    }

    async fn handle_request(&self, request: &ScaleUpRequest) -> AutoscaleResult<RequestStatus> {
        let status = match self.perform_request(request).await {
            Err(e) if e.is_not_found() => {
                debug!(
                    environment = %request.environment,
                    pool = %request.pool,
                    error = %e,
                    "pool is gone, discarding scale request"
                );
                RequestStatus::Completed
            }
            other => other?,
        };

        if status == RequestStatus::Completed {
            // A false return means the row changed since it was listed; the
            // newer request is picked up next pass.
            let deleted = self.store.delete_scale_request(request)?;
            if !deleted {
                debug!(
                    environment = %request.environment,
                    pool = %request.pool,
                    etag = request.etag,
                    "scale request changed or already removed"
                );
            }
        }
        Ok(status)
    }

    async fn perform_request(&self, request: &ScaleUpRequest) -> AutoscaleResult<RequestStatus> {
        let env = self
            .directory
            .get_environment(&request.environment)
            .await
            .map_err(AutoscaleError::Directory)?;
        let Some(env) = env else {
            info!(
                environment = %request.environment,
                etag = request.etag,
                "environment has been deleted, discarding scale request"
            );
            return Ok(RequestStatus::Completed);
        };

        let client = self.pools.connect(&env)?;

        let pool = match client.get_pool(&request.pool).await? {
            Some(pool) if pool.state != PoolState::Deleting => pool,
            _ => {
                info!(
                    environment = %request.environment,
                    pool = %request.pool,
                    etag = request.etag,
                    "pool has been deleted, discarding scale request"
                );
                return Ok(RequestStatus::Completed);
            }
        };

        if pool.allocation_state == AllocationState::Resizing {
            if pool.target_total() >= request.target_nodes {
                info!(
                    environment = %request.environment,
                    pool = %request.pool,
                    etag = request.etag,
                    in_flight_target = pool.target_total(),
                    requested = request.target_nodes,
                    "in-flight resize covers scale request, discarding it"
                );
                return Ok(RequestStatus::Completed);
            }
            info!(
                environment = %request.environment,
                pool = %request.pool,
                etag = request.etag,
                "pool is already resizing, deferring scale request"
            );
            return Ok(RequestStatus::InProgress);
        }

        let targets = targets_for_pool(&pool, request.target_nodes);
        client.update_pool(&request.pool, targets).await?;

        info!(
            environment = %request.environment,
            pool = %request.pool,
            etag = request.etag,
            requested = request.target_nodes,
            dedicated = targets.dedicated,
            low_priority = targets.low_priority,
            "applied scale request"
        );
        if targets.dedicated.saturating_add(targets.low_priority) < request.target_nodes {
            warn!(
                environment = %request.environment,
                pool = %request.pool,
                requested = request.target_nodes,
                "pool maximums cap the requested node count"
            );
        }
        Ok(RequestStatus::Completed)
    }
}
