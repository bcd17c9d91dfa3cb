//! Background execution.
//!
//! Queued async invalidations and all warm actions run off the request path
//! as plain tokio tasks; bulk warming runs on a recurring interval.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Run a named job once, immediately, in the background.
pub fn spawn_once<F>(job: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    debug!(job, "background job scheduled");
    tokio::spawn(fut)
}

/// Run a named job on a fixed interval. The first run happens one interval
/// after start, not immediately.
pub fn start_recurring<F, Fut>(job: &'static str, every: Duration, mut run: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            debug!(job, "recurring job tick");
            run().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn spawn_once_runs_the_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let job_counter = Arc::clone(&counter);

        spawn_once("test", async move {
            job_counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("join");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_job_ticks_on_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let job_counter = Arc::clone(&counter);

        let handle = start_recurring("test", Duration::from_secs(60), move || {
            let counter = Arc::clone(&job_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(125)).await;
        handle.abort();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
