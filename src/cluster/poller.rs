use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Run `tick` every `period` until `shutdown` flips to true (or its sender is dropped)
///
/// The first tick fires immediately. A tick that overruns the period delays
/// the next one instead of bursting to catch up, so at most one cycle of a
/// given loop is in flight at a time.
pub async fn run_every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        tick().await;
    }

    debug!("{} loop stopped", name);
}
