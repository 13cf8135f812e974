use std::{sync::Weak, time::Duration};

use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::store::Shared;

/// Background task that sweeps expired reveals on a fixed interval.
///
/// Holds only a weak reference to the store; the task ends on its own once
/// the store is gone. Dropping the handle aborts the task.
pub(crate) struct Sweeper {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub(crate) fn spawn(shared: Weak<Shared>, every: Duration) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::format_err!("sweeper needs a tokio runtime: {}", e))?;
        let (shutdown, mut stopped) = oneshot::channel();
        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };
                        // Sweeping writes the snapshot; keep that off the workers.
                        if let Err(e) = tokio::task::spawn_blocking(move || shared.sweep()).await {
                            warn!(error = %e, "sweep task failed");
                        }
                    }
                }
            }
            debug!("sweeper stopped");
        });
        Ok(Sweeper {
            shutdown: Some(shutdown),
            handle,
        })
    }

    pub(crate) async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
