//! Versioned enrichment scheduling.
//!
//! Each cycle runs the registered modules one after another. For a module,
//! every document whose version field is behind becomes a job; jobs run
//! newest-first, at most `max_workers` at a time, inside a per-module time
//! box. When the time box expires, unfinished jobs are abandoned and stay
//! pending for the next cycle.

use fsindex_core::{EnrichmentModule, Fields, JobOutcome, OutcomeCounts, PendingJob, ID_FIELD};
use fsindex_store::IndexGateway;
use futures::StreamExt;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a module's cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// No document was behind; init and cleanup were skipped
    NothingPending,
    /// Pending jobs could not be fetched
    QueryFailed,
    /// `init` failed; no job ran
    InitFailed,
    /// Jobs ran to an outcome
    Completed,
}

/// Result of one module's cycle.
#[derive(Debug, Clone)]
pub struct ModuleCycleReport {
    pub module: String,
    pub status: CycleStatus,
    pub pending: usize,
    pub counts: OutcomeCounts,
    pub elapsed: Duration,
}

/// Runs enrichment modules against pending documents.
pub struct EnrichmentScheduler {
    gateway: Arc<IndexGateway>,
    modules: Vec<Arc<dyn EnrichmentModule>>,
    time_per_module: Duration,
}

impl EnrichmentScheduler {
    pub fn new(
        gateway: Arc<IndexGateway>,
        modules: Vec<Arc<dyn EnrichmentModule>>,
        time_per_module: Duration,
    ) -> Self {
        Self {
            gateway,
            modules,
            time_per_module,
        }
    }

    /// Run every module once, in registration order.
    pub async fn run_cycle(&self) -> Vec<ModuleCycleReport> {
        let mut reports = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            reports.push(self.run_module(Arc::clone(module)).await);
        }
        reports
    }

    /// Run cycles until `shutdown` fires, sleeping `pause` between them.
    pub async fn run_forever(&self, pause: Duration, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.run_cycle() => {}
            }
            info!("Waiting {:?} for the next module cycle", pause);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!("Enrichment loop stopped");
    }

    /// Run one module's cycle.
    pub async fn run_module(&self, module: Arc<dyn EnrichmentModule>) -> ModuleCycleReport {
        let started = Instant::now();
        let name = module.name().to_string();
        let report = |status, pending, counts| ModuleCycleReport {
            module: name.clone(),
            status,
            pending,
            counts,
            elapsed: started.elapsed(),
        };

        let mut jobs = match self.gateway.get_pending_jobs(module.as_ref()).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("{} failed to get pending jobs: {}", name, e);
                return report(CycleStatus::QueryFailed, 0, OutcomeCounts::default());
            }
        };
        if jobs.is_empty() {
            debug!("{} has nothing pending", name);
            return report(CycleStatus::NothingPending, 0, OutcomeCounts::default());
        }
        jobs.sort_by(|a, b| b.mtime.total_cmp(&a.mtime));
        let pending = jobs.len();
        info!("Starting {} for {} files", name, pending);

        if let Err(e) = module.init().await {
            error!("Failed to init {}: {}", name, e);
            return report(CycleStatus::InitFailed, pending, OutcomeCounts::default());
        }

        let counts = self.run_jobs(&module, jobs).await;
        info!("{}: {}", name, counts);

        if let Err(e) = module.cleanup().await {
            error!("{} failed to clean up: {}", name, e);
        }
        report(CycleStatus::Completed, pending, counts)
    }

    async fn run_jobs(
        &self,
        module: &Arc<dyn EnrichmentModule>,
        jobs: Vec<PendingJob>,
    ) -> OutcomeCounts {
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(module.max_workers().max(1)));

        let watchdog = tokio::spawn({
            let cancel = cancel.clone();
            let budget = self.time_per_module;
            let name = module.name().to_string();
            async move {
                tokio::time::sleep(budget).await;
                info!("{} yielding time to other modules", name);
                cancel.cancel();
            }
        });

        let mut tasks = JoinSet::new();
        for job in jobs {
            tasks.spawn(process_job(
                Arc::clone(&self.gateway),
                Arc::clone(module),
                job,
                Arc::clone(&semaphore),
                cancel.clone(),
            ));
        }

        let mut counts = OutcomeCounts::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => counts.record(outcome),
                Err(e) => {
                    error!("{} job task failed: {}", module.name(), e);
                    counts.record(JobOutcome::Failure);
                }
            }
        }

        watchdog.abort();
        counts
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Drive one file through a module.
///
/// Every suspension point up to the version stamp races the cycle's
/// cancellation token; losing the race means the job is postponed.
async fn process_job(
    gateway: Arc<IndexGateway>,
    module: Arc<dyn EnrichmentModule>,
    job: PendingJob,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> JobOutcome {
    let name = module.name();

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return JobOutcome::Postponed,
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return JobOutcome::Postponed,
        },
    };

    if !file_exists(&job.path).await {
        warn!("{} failed \"{}\": not found", name, job.relative_path);
        return JobOutcome::NotFound;
    }
    info!("{} trying \"{}\"", name, job.relative_path);

    let mut stream = module.produce_fields(&job.path, &job.fields);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("{} postponing \"{}\"", name, job.relative_path);
                return JobOutcome::Postponed;
            }
            next = stream.next() => next,
        };

        match next {
            None => break,
            Some(Ok(mut fields)) => {
                if !file_exists(&job.path).await {
                    warn!("{} failed \"{}\": not found after processing", name, job.relative_path);
                    return JobOutcome::NotFound;
                }
                fields.remove(module.field_name());
                fields.insert(ID_FIELD.to_string(), Value::String(job.id.clone()));
                if let Some(outcome) = write(&gateway, fields, &cancel, name, &job).await {
                    return outcome;
                }
            }
            Some(Err(e)) => {
                if !file_exists(&job.path).await {
                    warn!("{} failed \"{}\": not found during processing", name, job.relative_path);
                    return JobOutcome::NotFound;
                }
                error!("{} failed \"{}\": {}", name, job.relative_path, e);
                return JobOutcome::Failure;
            }
        }
    }
    drop(stream);

    if cancel.is_cancelled() {
        info!("{} postponing \"{}\"", name, job.relative_path);
        return JobOutcome::Postponed;
    }

    // A submitted stamp is waited on to the end, time box or not, so the
    // reported outcome agrees with the stored version.
    let mut stamp = Fields::new();
    stamp.insert(ID_FIELD.to_string(), Value::String(job.id.clone()));
    stamp.insert(module.field_name().to_string(), Value::from(module.version()));
    if let Err(e) = gateway.upsert_fields(stamp, true).await {
        error!("{} failed to stamp \"{}\": {}", name, job.relative_path, e);
        return JobOutcome::Failure;
    }

    debug!("{} finished \"{}\"", name, job.relative_path);
    JobOutcome::Success
}

/// Write a data field map, returning the outcome if the job must stop.
async fn write(
    gateway: &IndexGateway,
    fields: Fields,
    cancel: &CancellationToken,
    name: &str,
    job: &PendingJob,
) -> Option<JobOutcome> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("{} postponing \"{}\"", name, job.relative_path);
            Some(JobOutcome::Postponed)
        }
        written = gateway.upsert_fields(fields, true) => match written {
            Ok(()) => None,
            Err(e) => {
                error!("{} failed to update \"{}\": {}", name, job.relative_path, e);
                Some(JobOutcome::Failure)
            }
        },
    }
}
