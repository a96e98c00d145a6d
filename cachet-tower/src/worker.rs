//! Background worker pool for asynchronous optimization jobs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cachet_core::{read_to_end, reader_from_bytes, CacheKey, CacheStore, StoreError};
use cachet_optimizer::{Pipeline, TransformError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wall-clock budget for one job's store round trips and transforms.
const JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bounded queue capacity; a full queue drops new jobs.
    pub queue_size: usize,
    /// Number of long-lived worker tasks.
    pub workers: usize,
    /// Additional attempts after a failed job.
    pub retry_attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            queue_size: 1000,
            workers: 4,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Zero-valued fields fall back to their defaults.
    fn normalized(mut self) -> Self {
        let defaults = WorkerConfig::default();
        if self.queue_size == 0 {
            self.queue_size = defaults.queue_size;
        }
        if self.workers == 0 {
            self.workers = defaults.workers;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = defaults.retry_delay;
        }
        self
    }
}

/// A request to re-run the optimization pipeline over a stored entry.
///
/// The store and pipeline are shared handles whose lifetime outlives
/// the pool.
#[derive(Clone)]
pub struct OptimizationJob {
    pub key: CacheKey,
    pub store: Arc<dyn CacheStore>,
    pub pipeline: Arc<Pipeline>,
}

impl fmt::Debug for OptimizationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationJob")
            .field("key", &self.key)
            .finish()
    }
}

/// Cloneable, non-blocking enqueue handle.
///
/// The handle holds only a weak reference to the channel: once the
/// pool shuts down, enqueues become no-ops instead of keeping the
/// queue alive.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::WeakSender<OptimizationJob>,
    capacity: usize,
}

impl JobQueue {
    /// Enqueues a job without blocking. When the queue is full or the
    /// pool has stopped the job is dropped with a log line; the cached
    /// entry simply remains un-optimized.
    pub fn enqueue(&self, job: OptimizationJob) {
        let Some(tx) = self.tx.upgrade() else {
            debug!(key = %job.key, "worker pool stopped, dropping optimization job");
            return;
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(key = %job.key, "optimization queue full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!(key = %job.key, "worker pool stopped, dropping optimization job");
            }
        }
    }

    /// Total queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.tx
            .upgrade()
            .map(|tx| self.capacity - tx.capacity())
            .unwrap_or(0)
    }
}

/// Fixed-size pool of background workers draining a bounded job queue.
pub struct WorkerPool {
    tx: mpsc::Sender<OptimizationJob>,
    handles: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawns the workers and returns the running pool.
    pub fn start(config: WorkerConfig) -> Self {
        let config = config.normalized();
        let (tx, rx) = mpsc::channel(config.queue_size);
        let rx = Arc::new(Mutex::new(rx));

        info!(workers = config.workers, "starting cache optimization workers");
        let handles = (0..config.workers)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let config = config.clone();
                tokio::spawn(worker_loop(id, rx, config))
            })
            .collect();

        WorkerPool {
            tx,
            handles,
            capacity: config.queue_size,
        }
    }

    /// Enqueue handle to hand to the middleware.
    pub fn queue(&self) -> JobQueue {
        JobQueue {
            tx: self.tx.downgrade(),
            capacity: self.capacity,
        }
    }

    /// Closes the queue, lets the workers drain the remaining jobs,
    /// and waits until every worker has terminated.
    pub async fn stop(self) {
        info!("stopping cache optimization workers");
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("cache optimization workers stopped");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<OptimizationJob>>>,
    config: WorkerConfig,
) {
    loop {
        // The lock is held only while waiting for the next job, so one
        // idle worker parks on the channel while the rest process.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };
        process_job(id, &job, &config).await;
    }
    debug!(worker = id, "optimization worker exiting");
}

async fn process_job(id: usize, job: &OptimizationJob, config: &WorkerConfig) {
    for attempt in 0..=config.retry_attempts {
        match run_job(job).await {
            Ok(JobOutcome::Optimized { before, after }) => {
                info!(
                    worker = id,
                    key = %job.key,
                    before,
                    after,
                    "optimized cached entry"
                );
                return;
            }
            Ok(JobOutcome::Missing) => {
                debug!(worker = id, key = %job.key, "entry no longer cached, skipping");
                return;
            }
            Err(error) => {
                warn!(
                    worker = id,
                    key = %job.key,
                    attempt,
                    error = %error,
                    "optimization attempt failed"
                );
                if attempt < config.retry_attempts {
                    tokio::time::sleep(config.retry_delay).await;
                }
            }
        }
    }
}

enum JobOutcome {
    Optimized { before: usize, after: usize },
    Missing,
}

#[derive(Debug, Error)]
enum JobError {
    #[error("job timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One get → transform → put cycle under the job timeout.
async fn run_job(job: &OptimizationJob) -> Result<JobOutcome, JobError> {
    tokio::time::timeout(JOB_TIMEOUT, async {
        let Some((reader, meta)) = job.store.get(&job.key).await? else {
            return Ok(JobOutcome::Missing);
        };
        let raw = read_to_end(reader).await?;
        let before = raw.len();

        let (optimized, new_meta) = job.pipeline.apply_bytes(Bytes::from(raw), &meta).await?;
        let after = optimized.len();

        job.store
            .put(&job.key, reader_from_bytes(optimized), new_meta)
            .await?;
        Ok(JobOutcome::Optimized { before, after })
    })
    .await?
}
