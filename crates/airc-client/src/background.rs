//! Maintenance loop: periodic heartbeat and poll for long-running agents.
//!
//! The protocol itself needs no background thread; this is a convenience
//! for processes that want presence and inbound delivery kept up on their
//! own cadence. Poll events are forwarded through an `mpsc` channel.

use crate::client::{Client, PollEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Handle to a running maintenance loop.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Ask the loop to stop after its current tick.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }
    }

    /// Whether the loop has exited (shutdown, fatal error, or closed channel).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn period(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

impl Client {
    /// Heartbeat and poll on the configured intervals until stopped.
    ///
    /// Transient failures are logged and retried on the next tick. A fatal
    /// error (corrupt key, rejected key proof) or a dropped receiver ends the
    /// loop.
    pub fn spawn_maintenance(self: &Arc<Self>, events: mpsc::Sender<PollEvent>) -> MaintenanceHandle {
        let client = Arc::clone(self);
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let heartbeat_every = period(client.config().heartbeat_interval_secs);
        let poll_every = period(client.config().poll_interval_secs);

        info!(
            agent = client.agent_name(),
            heartbeat_secs = heartbeat_every.as_secs(),
            poll_secs = poll_every.as_secs(),
            "Starting maintenance loop"
        );

        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_every);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut poll = tokio::time::interval(poll_every);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!(agent = client.agent_name(), "Maintenance loop: shutdown signal received");
                        break;
                    }
                    _ = heartbeat.tick() => {
                        match client.heartbeat().await {
                            Ok(session) => debug!(ttl = session.ttl_secs, "Maintenance heartbeat"),
                            Err(e) if e.is_fatal() => {
                                error!(error = %e, "Maintenance loop stopping on fatal error");
                                break;
                            }
                            Err(e) => warn!(error = %e, "Heartbeat failed"),
                        }
                    }
                    _ = poll.tick() => {
                        match client.poll().await {
                            Ok(batch) => {
                                for event in batch {
                                    if events.send(event).await.is_err() {
                                        info!("Event receiver dropped; stopping maintenance loop");
                                        return;
                                    }
                                }
                            }
                            Err(e) if e.is_fatal() => {
                                error!(error = %e, "Maintenance loop stopping on fatal error");
                                break;
                            }
                            Err(e) => warn!(error = %e, "Poll failed"),
                        }
                    }
                }
            }
        });

        MaintenanceHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_never_zero() {
        assert_eq!(period(0), Duration::from_secs(1));
        assert_eq!(period(5), Duration::from_secs(5));
    }
}
