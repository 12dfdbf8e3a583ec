//! Bounded-pool dispatch: a fixed set of workers owning connections.
//!
//! The accept loop submits each socket onto a bounded queue; a pool of
//! worker tasks dequeues connections and serves each to completion
//! through the same per-line loop as the per-connection strategy. The
//! pool bounds concurrent socket ownership and memory, not logical
//! throughput — every command still serializes on the keyspace lock.
//!
//! Sizing is dynamic: every 5 seconds the pool scales up by a quarter
//! of the target (to at most twice the target) when the queue is deep
//! or nearly every worker is busy, and retires an eighth of the
//! current workers (to no fewer than a quarter of the target) when the
//! queue is empty and the rolling average task time is under a
//! millisecond.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::connection;
use crate::handler::Shared;

/// How long a submission may wait for queue space before the
/// connection is rejected.
const SUBMIT_TIMEOUT: Duration = Duration::from_millis(100);

/// How often the pool considers resizing itself.
const SCALE_INTERVAL: Duration = Duration::from_secs(5);

/// Samples in the rolling task-time window.
const TIME_WINDOW: usize = 100;

/// Scale-down threshold for the rolling mean task time.
const FAST_TASK_NANOS: u64 = 1_000_000;

enum PoolTask {
    Conn(TcpStream),
    /// Poison pill: the receiving worker exits. Used for scale-down.
    Retire,
}

/// Rolling window of per-task execution times (nanoseconds).
struct TaskWindow {
    samples: [u64; TIME_WINDOW],
    next: usize,
}

impl TaskWindow {
    fn new() -> Self {
        Self {
            samples: [0; TIME_WINDOW],
            next: 0,
        }
    }

    fn record(&mut self, nanos: u64) {
        self.samples[self.next] = nanos.max(1);
        self.next = (self.next + 1) % TIME_WINDOW;
    }

    fn mean(&self) -> u64 {
        let mut sum = 0u64;
        let mut count = 0u64;
        for &sample in &self.samples {
            if sample > 0 {
                sum += sample;
                count += 1;
            }
        }
        if count == 0 {
            0
        } else {
            sum / count
        }
    }
}

/// The worker pool and its metrics.
pub struct WorkerPool {
    ctx: Arc<Shared>,
    tx: mpsc::Sender<PoolTask>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PoolTask>>>,
    target: usize,
    min_workers: usize,
    max_workers: usize,
    workers: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    window: Mutex<TaskWindow>,
}

impl WorkerPool {
    /// Creates the pool and spawns the initial `target` workers plus
    /// the scaling task.
    pub fn start(target: usize, ctx: Arc<Shared>, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let target = target.max(1);
        let min_workers = (target / 4).max(1);
        let max_workers = target * 2;
        let (tx, rx) = mpsc::channel(max_workers);

        let pool = Arc::new(Self {
            ctx,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            target,
            min_workers,
            max_workers,
            workers: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            window: Mutex::new(TaskWindow::new()),
        });

        for _ in 0..target {
            pool.spawn_worker();
        }
        tokio::spawn(scale_loop(pool.clone(), shutdown));

        info!(
            workers = target,
            min = min_workers,
            max = max_workers,
            "worker pool started"
        );
        pool
    }

    /// Hands a connection to the pool. Blocks up to the submission
    /// timeout; on a full queue the connection is dropped and counted.
    pub async fn submit(&self, stream: TcpStream) -> bool {
        match self
            .tx
            .send_timeout(PoolTask::Conn(stream), SUBMIT_TIMEOUT)
            .await
        {
            Ok(()) => true,
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn queue_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn spawn_worker(self: &Arc<Self>) {
        self.workers.fetch_add(1, Ordering::Relaxed);
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                let task = {
                    let mut rx = pool.rx.lock().await;
                    rx.recv().await
                };
                match task {
                    Some(PoolTask::Conn(stream)) => {
                        pool.active.fetch_add(1, Ordering::Relaxed);
                        let start = Instant::now();
                        if let Err(e) = connection::handle(stream, pool.ctx.clone()).await {
                            error!("pooled connection error: {e}");
                        }
                        let elapsed = start.elapsed().as_nanos() as u64;
                        pool.window
                            .lock()
                            .expect("task window lock poisoned")
                            .record(elapsed);
                        pool.active.fetch_sub(1, Ordering::Relaxed);
                        pool.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(PoolTask::Retire) | None => {
                        pool.workers.fetch_sub(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
        });
    }

    fn consider_scaling(self: &Arc<Self>) {
        let current = self.workers.load(Ordering::Relaxed);
        let active = self.active.load(Ordering::Relaxed);
        let queue = self.queue_len();
        let mean_nanos = self
            .window
            .lock()
            .expect("task window lock poisoned")
            .mean();

        let busy = active * 10 >= current * 9;
        if (queue > self.target / 2 || busy) && current < self.max_workers {
            let add = (self.target / 4).max(1).min(self.max_workers - current);
            for _ in 0..add {
                self.spawn_worker();
            }
            info!(
                added = add,
                workers = current + add,
                queue,
                "scaled worker pool up"
            );
            return;
        }

        if queue == 0 && mean_nanos > 0 && mean_nanos < FAST_TASK_NANOS && current > self.min_workers
        {
            let remove = (current / 8).min(current - self.min_workers);
            let mut retired = 0;
            for _ in 0..remove {
                if self.tx.try_send(PoolTask::Retire).is_err() {
                    break;
                }
                retired += 1;
            }
            if retired > 0 {
                info!(
                    retired,
                    workers = current - retired,
                    "scaled worker pool down"
                );
            }
        }
    }
}

async fn scale_loop(pool: Arc<WorkerPool>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SCALE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => pool.consider_scaling(),
            _ = shutdown.changed() => return,
        }
    }
}

/// Runs the accept loop for the pooled strategy until shutdown.
pub async fn run_pooled(
    listener: TcpListener,
    ctx: Arc<Shared>,
    workers: usize,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let pool = WorkerPool::start(workers, ctx, shutdown.clone());

    info!(
        addr = %listener.local_addr()?,
        workers,
        "pooled server started"
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                if !pool.submit(stream).await {
                    warn!(%peer, "connection rejected: pool full");
                }
            }
            _ = shutdown.changed() => {
                info!("stopping accept loop");
                return Ok(());
            }
        }
    }
}
