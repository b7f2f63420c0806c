use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{Dispatcher, Route, RunMode, BATCH_SIZE};

/// Work that can be computed in-process or shipped to the cluster in batches.
#[async_trait]
pub trait BatchBackend: Send + Sync + 'static {
    type Unit: Send + 'static;

    /// Short identifier of a unit, for logs.
    fn label(&self, unit: &Self::Unit) -> String;

    /// Compute one unit in-process, filling in its result.
    async fn local(&self, unit: &mut Self::Unit) -> Result<()>;

    /// Compute a batch remotely with one multi-item call.
    async fn remote(&self, units: &mut [Self::Unit]) -> Result<()>;
}

/// Outcome of one pool run.
#[derive(Debug)]
pub struct PoolReport<U> {
    /// Completed units, in no particular order
    pub done: Vec<U>,
    /// Units lost with a failed remote batch in REMOTE mode
    pub remote_failed: usize,
    /// Units whose local computation failed
    pub local_failed: usize,
}

impl<U> PoolReport<U> {
    fn empty() -> Self {
        Self {
            done: Vec::new(),
            remote_failed: 0,
            local_failed: 0,
        }
    }
}

enum Outcome<U> {
    Done(U),
    RemoteFailed,
    LocalFailed,
}

/// Drain `units` through a pool of `parallel_level` workers.
///
/// Units that fail on every available path are logged and counted in the
/// report instead of being returned.
pub async fn run_pool<B: BatchBackend>(
    backend: Arc<B>,
    dispatcher: Arc<Dispatcher>,
    units: Vec<B::Unit>,
) -> PoolReport<B::Unit> {
    let total = units.len();
    if total == 0 {
        return PoolReport::empty();
    }
    let level = dispatcher.parallel_level().await;
    let started = Instant::now();
    info!(
        "Dispatching {} units over {} workers ({} mode)",
        total,
        level,
        dispatcher.mode()
    );

    let (work_tx, work_rx) = mpsc::channel::<B::Unit>(level);
    let work_rx = Arc::new(Mutex::new(work_rx));
    let (done_tx, mut done_rx) = mpsc::channel::<Outcome<B::Unit>>(level);

    let collector = tokio::spawn(async move {
        let mut report = PoolReport::empty();
        report.done.reserve(total);
        while let Some(outcome) = done_rx.recv().await {
            match outcome {
                Outcome::Done(unit) => report.done.push(unit),
                Outcome::RemoteFailed => report.remote_failed += 1,
                Outcome::LocalFailed => report.local_failed += 1,
            }
        }
        report
    });

    let mut workers = JoinSet::new();
    for id in 0..level {
        let rx = work_rx.clone();
        let tx = done_tx.clone();
        let backend = backend.clone();
        let dispatcher = dispatcher.clone();
        workers.spawn(async move { worker(id, backend, dispatcher, rx, tx).await });
    }

    for unit in units {
        if work_tx.send(unit).await.is_err() {
            error!("all workers exited early, stopping dispatch");
            break;
        }
    }
    drop(work_tx);

    // every worker must finish before the result channel can close
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            error!("worker panicked: {}", e);
        }
    }
    drop(done_tx);

    let report = match collector.await {
        Ok(report) => report,
        Err(e) => {
            error!("collector failed: {}", e);
            PoolReport::empty()
        }
    };
    info!(
        "{}/{} units completed in {:.1}s ({} remote failures, {} local failures)",
        report.done.len(),
        total,
        started.elapsed().as_secs_f64(),
        report.remote_failed,
        report.local_failed
    );
    report
}

async fn worker<B: BatchBackend>(
    id: usize,
    backend: Arc<B>,
    dispatcher: Arc<Dispatcher>,
    rx: Arc<Mutex<mpsc::Receiver<B::Unit>>>,
    tx: mpsc::Sender<Outcome<B::Unit>>,
) {
    let mut buf: Vec<B::Unit> = Vec::with_capacity(BATCH_SIZE);
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(unit) = next else {
            break;
        };

        match dispatcher.route().await {
            Route::Local => {
                let _ = tx.send(run_local(backend.as_ref(), unit).await).await;
            }
            Route::Remote => {
                buf.push(unit);
                if buf.len() >= BATCH_SIZE {
                    flush(id, backend.as_ref(), dispatcher.mode(), &mut buf, &tx).await;
                }
            }
        }
    }
    flush(id, backend.as_ref(), dispatcher.mode(), &mut buf, &tx).await;
    debug!("worker {} done", id);
}

async fn run_local<B: BatchBackend>(backend: &B, mut unit: B::Unit) -> Outcome<B::Unit> {
    match backend.local(&mut unit).await {
        Ok(()) => Outcome::Done(unit),
        Err(e) => {
            warn!("{}: local scoring failed, skipped: {:#}", backend.label(&unit), e);
            Outcome::LocalFailed
        }
    }
}

async fn flush<B: BatchBackend>(
    id: usize,
    backend: &B,
    mode: RunMode,
    buf: &mut Vec<B::Unit>,
    tx: &mpsc::Sender<Outcome<B::Unit>>,
) {
    if buf.is_empty() {
        return;
    }
    let mut batch = std::mem::take(buf);
    match backend.remote(&mut batch).await {
        Ok(()) => {
            for unit in batch {
                let _ = tx.send(Outcome::Done(unit)).await;
            }
        }
        Err(e) if mode == RunMode::Remote => {
            error!(
                "worker {}: remote batch of {} failed, skipped: {:#}",
                id,
                batch.len(),
                e
            );
            for _ in 0..batch.len() {
                let _ = tx.send(Outcome::RemoteFailed).await;
            }
        }
        Err(e) => {
            warn!(
                "worker {}: remote batch of {} failed, computing locally: {:#}",
                id,
                batch.len(),
                e
            );
            for unit in batch {
                let _ = tx.send(run_local(backend, unit).await).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{dispatcher, FixedCpu, StaticHealth};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Unit {
        id: usize,
        score: Option<f64>,
        via_remote: bool,
    }

    #[derive(Default)]
    struct Counting {
        fail_remote: bool,
        fail_local_id: Option<usize>,
        remote_calls: AtomicUsize,
        max_batch: AtomicUsize,
        local_calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchBackend for Counting {
        type Unit = Unit;

        fn label(&self, unit: &Unit) -> String {
            unit.id.to_string()
        }

        async fn local(&self, unit: &mut Unit) -> Result<()> {
            self.local_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_local_id == Some(unit.id) {
                anyhow::bail!("bad unit");
            }
            unit.score = Some(unit.id as f64);
            Ok(())
        }

        async fn remote(&self, units: &mut [Unit]) -> Result<()> {
            self.remote_calls.fetch_add(1, Ordering::SeqCst);
            self.max_batch.fetch_max(units.len(), Ordering::SeqCst);
            if self.fail_remote {
                anyhow::bail!("ids do not match");
            }
            for u in units.iter_mut() {
                u.score = Some(u.id as f64);
                u.via_remote = true;
            }
            Ok(())
        }
    }

    fn units(n: usize) -> Vec<Unit> {
        (0..n)
            .map(|id| Unit {
                id,
                score: None,
                via_remote: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn local_mode_completes_everything() {
        let backend = Arc::new(Counting::default());
        let d = Arc::new(dispatcher(RunMode::Local, StaticHealth::new(0, 0.0), FixedCpu::ok(0.0)));
        let mut done = run_pool(backend.clone(), d, units(200)).await.done;
        done.sort_by_key(|u| u.id);
        assert_eq!(done.len(), 200);
        assert!(done.iter().all(|u| u.score == Some(u.id as f64) && !u.via_remote));
        assert_eq!(backend.remote_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_batches_are_capped() {
        let backend = Arc::new(Counting::default());
        let d = Arc::new(dispatcher(RunMode::Remote, StaticHealth::new(2, 1.0), FixedCpu::ok(0.0)));
        let done = run_pool(backend.clone(), d, units(300)).await.done;
        assert_eq!(done.len(), 300);
        assert!(done.iter().all(|u| u.via_remote));
        assert!(backend.max_batch.load(Ordering::SeqCst) <= BATCH_SIZE);
        assert_eq!(backend.local_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_batch_falls_back_locally_in_auto() {
        let backend = Arc::new(Counting {
            fail_remote: true,
            ..Default::default()
        });
        let d = Arc::new(dispatcher(RunMode::Auto, StaticHealth::new(1, 1.0), FixedCpu::ok(95.0)));
        let report = run_pool(backend.clone(), d, units(100)).await;
        assert_eq!(report.remote_failed, 0);
        let done = report.done;
        assert_eq!(done.len(), 100);
        assert!(done.iter().all(|u| !u.via_remote && u.score.is_some()));
        assert!(backend.remote_calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(backend.local_calls.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn failed_batch_is_skipped_in_remote_mode() {
        let backend = Arc::new(Counting {
            fail_remote: true,
            ..Default::default()
        });
        let d = Arc::new(dispatcher(RunMode::Remote, StaticHealth::new(1, 1.0), FixedCpu::ok(0.0)));
        let report = run_pool(backend.clone(), d, units(10)).await;
        assert!(report.done.is_empty());
        assert_eq!(report.remote_failed, 10);
        assert_eq!(report.local_failed, 0);
        assert_eq!(backend.local_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_unit_does_not_stop_the_batch() {
        let backend = Arc::new(Counting {
            fail_local_id: Some(3),
            ..Default::default()
        });
        let d = Arc::new(dispatcher(RunMode::Local, StaticHealth::new(0, 0.0), FixedCpu::ok(0.0)));
        let report = run_pool(backend, d, units(10)).await;
        assert_eq!(report.done.len(), 9);
        assert_eq!(report.local_failed, 1);
        assert_eq!(report.remote_failed, 0);
        assert!(report.done.iter().all(|u| u.id != 3));
    }
}
