//! Single-flight, age-gated rebuild coordinator.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub type RebuildFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

const IDLE: u32 = 0;
const RUNNING: u32 = 1;

/// Runs a rebuild function when the last successful run is older than
/// `max_age`, with at most one background rebuild in flight.
///
/// A panic inside the rebuild is caught; the in-flight flag is released and
/// `last_run` keeps its old value so the next trigger retries.
///
/// Forced and background runs never overlap: a forced run waits for a
/// background one to finish, so the last publish always wins.
pub struct AsyncRebuilder {
    rebuild: RebuildFn,
    max_age: Duration,
    in_flight: Arc<AtomicU32>,
    running: Arc<tokio::sync::Mutex<()>>,
    last_run: Arc<Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for AsyncRebuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRebuilder")
            .field("max_age", &self.max_age)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("last_run", &*self.last_run.lock())
            .finish()
    }
}

async fn run_guarded(rebuild: &RebuildFn) -> Result<()> {
    match AssertUnwindSafe(rebuild()).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(Error::Internal("rebuild panicked".into())),
    }
}

impl AsyncRebuilder {
    /// `max_age` of zero means every check sees the snapshot as stale.
    pub fn new(max_age: Duration, rebuild: RebuildFn) -> Self {
        Self {
            rebuild,
            max_age,
            in_flight: Arc::new(AtomicU32::new(IDLE)),
            running: Arc::new(tokio::sync::Mutex::new(())),
            last_run: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_stale(&self) -> bool {
        match *self.last_run.lock() {
            None => true,
            Some(at) => self.max_age.is_zero() || at.elapsed() >= self.max_age,
        }
    }

    pub fn mark_fresh(&self) {
        *self.last_run.lock() = Some(Instant::now());
    }

    pub fn last_run(&self) -> Option<Instant> {
        *self.last_run.lock()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == RUNNING
    }

    /// Rebuild now and wait for it.
    pub async fn force(&self) -> Result<()> {
        let _running = self.running.lock().await;
        run_guarded(&self.rebuild).await?;
        self.mark_fresh();
        Ok(())
    }

    /// Start a background rebuild if stale and none is running. Returns
    /// whether one was started. Needs a tokio runtime; outside one this is
    /// a no-op.
    pub fn trigger(&self) -> bool {
        if !self.is_stale() {
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        if self
            .in_flight
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let rebuild = self.rebuild.clone();
        let in_flight = self.in_flight.clone();
        let running = self.running.clone();
        let last_run = self.last_run.clone();
        handle.spawn(async move {
            let _running = running.lock().await;
            match run_guarded(&rebuild).await {
                Ok(()) => *last_run.lock() = Some(Instant::now()),
                Err(e) => tracing::error!(error = %e, "background rebuild failed"),
            }
            in_flight.store(IDLE, Ordering::Release);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: Arc<AtomicUsize>, delay: Duration) -> RebuildFn {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(delay).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), Error>(())
            }
            .boxed()
        })
    }

    async fn wait_idle(r: &AsyncRebuilder) {
        for _ in 0..200 {
            if !r.in_flight() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("rebuild never finished");
    }

    #[tokio::test]
    async fn fresh_snapshot_does_not_rebuild() {
        let n = Arc::new(AtomicUsize::new(0));
        let r = AsyncRebuilder::new(Duration::from_secs(3600), counting(n.clone(), Duration::ZERO));
        r.force().await.unwrap();
        assert!(!r.trigger());
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_age_allows_one_rebuild_at_a_time() {
        let n = Arc::new(AtomicUsize::new(0));
        let r = AsyncRebuilder::new(Duration::ZERO, counting(n.clone(), Duration::from_millis(50)));
        r.mark_fresh();
        assert!(r.trigger());
        assert!(!r.trigger());
        assert!(!r.trigger());
        wait_idle(&r).await;
        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert!(r.trigger());
        wait_idle(&r).await;
        assert_eq!(n.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panic_releases_flag_and_keeps_last_run() {
        fn explode() -> Result<()> {
            panic!("boom")
        }
        let rebuild: RebuildFn = Arc::new(|| async { explode() }.boxed());
        let r = AsyncRebuilder::new(Duration::ZERO, rebuild);
        assert!(r.last_run().is_none());

        assert!(r.trigger());
        wait_idle(&r).await;
        assert!(r.last_run().is_none());

        let err = r.force().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(r.last_run().is_none());
        assert!(r.trigger());
        wait_idle(&r).await;
    }

    #[tokio::test]
    async fn force_publishes_after_a_running_trigger() {
        let source = Arc::new(AtomicUsize::new(0));
        let published = Arc::new(AtomicUsize::new(usize::MAX));
        let calls = Arc::new(AtomicUsize::new(0));
        let rebuild: RebuildFn = {
            let (source, published, calls) = (source.clone(), published.clone(), calls.clone());
            Arc::new(move || {
                let (source, published, calls) = (source.clone(), published.clone(), calls.clone());
                async move {
                    let seen = source.load(Ordering::SeqCst);
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    published.store(seen, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
                .boxed()
            })
        };
        let r = AsyncRebuilder::new(Duration::ZERO, rebuild);

        // the background run reads the old value, then stalls
        assert!(r.trigger());
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.store(1, Ordering::SeqCst);

        r.force().await.unwrap();
        assert_eq!(published.load(Ordering::SeqCst), 1);
        wait_idle(&r).await;
        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_force_does_not_mark_fresh() {
        let rebuild: RebuildFn =
            Arc::new(|| async { Err::<(), _>(Error::Internal("nope".into())) }.boxed());
        let r = AsyncRebuilder::new(Duration::from_secs(60), rebuild);
        assert!(r.force().await.is_err());
        assert!(r.is_stale());
    }
}
