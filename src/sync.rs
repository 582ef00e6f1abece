use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{
    sync::{oneshot, Semaphore},
    task::JoinHandle,
};

use crate::{
    engine::{ReconcileError, ReconciliationEngine},
    git::GitBackend,
    model::{ReconciliationOutcome, RepositorySpec},
    path,
};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Could not start the async runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Acquire(#[from] tokio::sync::AcquireError),
}

/// Shared flag telling not yet started reconciliations to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Pending {
    Done(ReconciliationOutcome),
    Running {
        final_path: PathBuf,
        handle: JoinHandle<ReconciliationOutcome>,
    },
}

/// Runs a list of specs through one engine, at most `jobs` at a time.
///
/// Specs resolving to the same directory run one after the other in input
/// order, and the outcomes come back in input order.
pub struct SyncRunner<B> {
    engine: Arc<ReconciliationEngine<B>>,
    jobs: usize,
    cancel: CancelFlag,
}

impl<B> SyncRunner<B>
where
    B: GitBackend + Send + Sync + 'static,
{
    pub fn new(engine: ReconciliationEngine<B>, jobs: usize) -> Self {
        SyncRunner {
            engine: Arc::new(engine),
            jobs: jobs.max(1),
            cancel: CancelFlag::default(),
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Blocks until every spec has an outcome.
    ///
    /// With `handle_interrupt`, Ctrl-C cancels the specs that have not started yet.
    pub fn run(
        &self,
        specs: Vec<RepositorySpec>,
        handle_interrupt: bool,
    ) -> Result<Vec<ReconciliationOutcome>, SyncError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.jobs)
            .enable_all()
            .build()?;

        runtime.block_on(async {
            if handle_interrupt {
                tokio::spawn(cancel_on_interrupt(self.cancel.clone()));
            }
            self.reconcile_all(specs).await
        })
    }

    pub async fn reconcile_all(
        &self,
        specs: Vec<RepositorySpec>,
    ) -> Result<Vec<ReconciliationOutcome>, SyncError> {
        debug!("Reconciling {} repositories, {} at a time", specs.len(), self.jobs);
        let semaphore = Arc::new(Semaphore::new(self.jobs));
        // Closed when the latest spec queued for a directory is done with it
        let mut turns: HashMap<PathBuf, oneshot::Receiver<()>> = HashMap::new();

        let mut pending = Vec::with_capacity(specs.len());
        for spec in specs {
            let target = match path::resolve(&spec.target_path, &spec.url) {
                Ok(target) => target,
                Err(error) => {
                    let error = ReconcileError::from(error);
                    error!("Failed to process {}: {}", spec.url, error);
                    pending.push(Pending::Done(ReconciliationOutcome::failed(
                        &spec.target_path,
                        error,
                    )));
                    continue;
                }
            };
            let final_path = target.final_path.clone();
            let (done, turn) = oneshot::channel::<()>();
            let previous = turns.insert(final_path.clone(), turn);

            // Permits are handed out in order, so jobs = 1 runs strictly one after another
            let permit = semaphore.clone().acquire_owned().await?;
            let engine = self.engine.clone();
            let cancel = self.cancel.clone();
            let handle = tokio::task::spawn_blocking(move || {
                if let Some(previous) = previous {
                    let _ = previous.blocking_recv();
                }
                let outcome = if cancel.is_cancelled() {
                    info!("Skipping {}, cancelled", target.path().display());
                    ReconciliationOutcome::failed(target.path(), ReconcileError::Cancelled)
                } else {
                    engine.reconcile_at(&spec, &target)
                };
                drop(done);
                drop(permit);
                outcome
            });
            pending.push(Pending::Running { final_path, handle });
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            let outcome = match entry {
                Pending::Done(outcome) => outcome,
                Pending::Running { final_path, handle } => match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_error) => {
                        let error = ReconcileError::Aborted {
                            message: join_error.to_string(),
                        };
                        error!("Failed to process {}: {}", final_path.display(), error);
                        ReconciliationOutcome::failed(final_path, error)
                    }
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

async fn cancel_on_interrupt(cancel: CancelFlag) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, waiting for running repositories to finish");
        cancel.cancel();
    }
}
