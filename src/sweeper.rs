use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A store that can drop its expired state in one pass.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Remove expired state and return how many records were dropped.
    fn sweep_expired(&self) -> usize;
}

/// Spawn a maintenance task that sweeps `target` every `every` until `shutdown` fires.
///
/// The first tick is skipped so a freshly started service is not swept immediately.
pub fn spawn_sweeper(
    target: Arc<dyn Sweep>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(store = target.name(), "sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = target.sweep_expired();
                    if removed > 0 {
                        tracing::debug!(store = target.name(), removed, "swept expired records");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl Sweep for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn sweep_expired(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let target = Arc::new(Counting(AtomicUsize::new(0)));
        let token = CancellationToken::new();
        let handle = spawn_sweeper(target.clone(), Duration::from_secs(10), token.clone());

        // ticks at 10s, 20s and 30s; the immediate first tick is skipped
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 3);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 3);
    }
}
