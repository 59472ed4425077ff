use std::{sync::Arc, time::Duration};

use nix::sys::signal::Signal;
use tokio::{
    sync::oneshot, task::JoinHandle, time::{Instant, MissedTickBehavior, interval_at}
};
use tracing::{debug, info, warn};

use super::control::ChannelControl;
use crate::runner::Runner;

/// Check the channel every `period`; hang up the process once a check fails.
///
/// The task ends after the first failed check or when `stop` fires.
pub fn spawn(
    control: Arc<dyn ChannelControl>,
    runner: Arc<dyn Runner>,
    pid: u32,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!(pid, "keepalive stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let result = control.keepalive().await;
                    debug!(pid, success = result.is_ok(), "keepalive");
                    if result.is_err() {
                        match runner.signal(pid, Signal::SIGHUP) {
                            Ok(()) => info!(pid, "keepalive failed; process hung up"),
                            Err(err) => warn!(pid, error = %err, "keepalive failed; hangup signal failed"),
                        }
                        return;
                    }
                }
            }
        }
    })
}
