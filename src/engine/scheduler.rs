// Periodic task runner with at-most-one concurrent execution per task

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Shortest period a cycle may be scheduled at
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Run `body` every `period` until `shutdown` becomes true.
///
/// The body is awaited inside the loop, so two executions never overlap; a
/// slow run delays the next tick instead of stacking up. Once shutdown is
/// observed no new run starts, but a run already in progress completes.
///
/// The period is measured start to start: a run that takes less than
/// `period` does not push later runs back.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut body: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!("{} cycle started ({:?})", name, period);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if *shutdown.borrow() {
                break;
            }

            body().await;
        }

        log::debug!("{} cycle stopped", name);
    })
}
