// src/synchronizer.rs
//! Contract synchronization
//!
//! A refresh cycle walks every stored contract id in order, resolves each
//! one against the escrow service and publishes the resulting collection
//! in a single replacement. `SyncLoop` repeats the cycle on a fixed period
//! until it is shut down.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::contract::{Contract, ContractId};
use crate::database::ContractStore;
use crate::error::SyncError;
use crate::metrics;
use crate::resolver::{ContractResolver, Resolution};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// An id that could not be resolved in the last cycle
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub contract_id: ContractId,
    pub reason: String,
}

/// Working set exposed to the view layer
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub contracts: Vec<Contract>,
    pub is_loading: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub failures: Vec<SyncFailure>,
}

impl SyncState {
    pub fn find(&self, id: &ContractId) -> Option<&Contract> {
        self.contracts.iter().find(|c| &c.id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub active: usize,
    pub confirmed: usize,
    pub canceled: Vec<ContractId>,
    pub failed: usize,
}

pub struct ContractSynchronizer {
    resolver: ContractResolver,
    store: Arc<dyn ContractStore>,
    state: watch::Sender<SyncState>,
    cycle_guard: Mutex<()>,
    cycles_completed: AtomicU64,
    prune_canceled: bool,
}

impl ContractSynchronizer {
    pub fn new(
        resolver: ContractResolver,
        store: Arc<dyn ContractStore>,
        prune_canceled: bool,
    ) -> Self {
        let (state, _) = watch::channel(SyncState {
            is_loading: true,
            ..SyncState::default()
        });

        Self {
            resolver,
            store,
            state,
            cycle_guard: Mutex::new(()),
            cycles_completed: AtomicU64::new(0),
            prune_canceled,
        }
    }

    pub fn resolver(&self) -> &ContractResolver {
        &self.resolver
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::SeqCst)
    }

    /// Run a cycle now, waiting for any cycle already in flight to finish first
    pub async fn refresh(&self) -> Result<CycleReport, SyncError> {
        let _guard = self.cycle_guard.lock().await;
        self.run_cycle().await
    }

    /// Run a cycle unless one is already in flight, in which case `None`
    pub async fn try_refresh(&self) -> Option<Result<CycleReport, SyncError>> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            metrics::SYNC_CYCLES_SKIPPED.inc();
            return None;
        };
        Some(self.run_cycle().await)
    }

    async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        self.state.send_modify(|state| state.is_loading = true);

        match self.collect().await {
            Ok((contracts, failures, report)) => {
                metrics::SYNC_CYCLES.inc();
                metrics::CONTRACTS_ACTIVE.set(contracts.len() as i64);

                self.state.send_replace(SyncState {
                    contracts,
                    is_loading: false,
                    last_synced_at: Some(Utc::now()),
                    failures,
                });
                self.cycles_completed.fetch_add(1, Ordering::SeqCst);

                Ok(report)
            }
            Err(e) => {
                self.state.send_modify(|state| state.is_loading = false);
                Err(e)
            }
        }
    }

    async fn collect(
        &self,
    ) -> Result<(Vec<Contract>, Vec<SyncFailure>, CycleReport), SyncError> {
        let ids = self.store.list_contract_ids().await?;
        debug!("Refreshing {} contracts", ids.len());

        let mut contracts = Vec::with_capacity(ids.len());
        let mut failures = Vec::new();
        let mut report = CycleReport::default();

        // Sequential on purpose: one request in flight at a time
        for id in &ids {
            match self.resolver.resolve(id).await {
                Ok(Resolution::Active(contract)) => {
                    if contract.escrow_confirmed {
                        report.confirmed += 1;
                        metrics::ESCROW_CONFIRMATIONS.inc();
                    }
                    contracts.push(contract);
                }
                Ok(Resolution::Canceled(canceled)) => {
                    report.canceled.push(canceled);
                }
                Err(e) => {
                    warn!("Failed to resolve contract {}: {}", id, e);
                    metrics::FETCH_FAILURES.inc();
                    failures.push(SyncFailure {
                        contract_id: id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.prune_canceled {
            for id in &report.canceled {
                match self.store.remove_contract_id(id).await {
                    Ok(()) => info!("Stopped tracking canceled contract {}", id),
                    Err(e) => warn!("Failed to prune canceled contract {}: {}", id, e),
                }
            }
        }

        report.active = contracts.len();
        report.failed = failures.len();

        Ok((contracts, failures, report))
    }
}

/// Owned handle to the periodic refresh task
pub struct SyncLoop {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncLoop {
    /// First tick fires one `period` from now; the mount-time cycle is the
    /// caller's job. Periods below `MIN_POLL_INTERVAL` are raised to it.
    pub fn start(synchronizer: Arc<ContractSynchronizer>, period: Duration) -> Self {
        if period < MIN_POLL_INTERVAL {
            warn!("Poll interval {:?} too short, using {:?}", period, MIN_POLL_INTERVAL);
        }
        let period = period.max(MIN_POLL_INTERVAL);
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut tick_count = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {}
                }
                tick_count += 1;

                match synchronizer.try_refresh().await {
                    Some(Ok(report)) => debug!(
                        "Tick #{}: {} active, {} canceled, {} failed",
                        tick_count,
                        report.active,
                        report.canceled.len(),
                        report.failed
                    ),
                    Some(Err(e)) => error!("Refresh cycle failed: {}", e),
                    None => debug!("Tick #{} skipped, previous cycle still running", tick_count),
                }
            }

            debug!("Sync loop stopped after {} ticks", tick_count);
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stops future ticks. A cycle already in flight runs to completion
    /// before this returns.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Sync loop task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SyncLoop {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
