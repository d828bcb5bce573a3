//! Postgres NOTIFY listener for minuano events.
//!
//! Listens on `task_events` and `planner_events`, decodes payloads into typed
//! events and pushes them onto bounded channels. Delivery is at-most-once by
//! design: the queue board is re-derived on the next event, so a dropped
//! notification only delays it.

use std::time::Duration;

use futures_util::{future, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TASK_CHANNEL_CAPACITY: usize = 64;
const PLANNER_CHANNEL_CAPACITY: usize = 16;
const MAX_BACKOFF_SECS: u64 = 30;

/// A task status change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskEvent {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub old_status: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub ts: f64,
}

/// A planner session status change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlannerEvent {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub topic_id: i64,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub old_status: String,
}

/// The listener half: owns the receivers handed to the router.
pub struct EventListener {
    database_url: String,
    pub task_events: mpsc::Receiver<TaskEvent>,
    pub planner_events: mpsc::Receiver<PlannerEvent>,
    task_tx: mpsc::Sender<TaskEvent>,
    planner_tx: mpsc::Sender<PlannerEvent>,
}

impl EventListener {
    pub fn new(database_url: &str) -> Self {
        let (task_tx, task_events) = mpsc::channel(TASK_CHANNEL_CAPACITY);
        let (planner_tx, planner_events) = mpsc::channel(PLANNER_CHANNEL_CAPACITY);
        Self {
            database_url: database_url.to_string(),
            task_events,
            planner_events,
            task_tx,
            planner_tx,
        }
    }

    /// Split off the receivers for the router and the run-loop driver.
    pub fn split(
        self,
    ) -> (
        ListenerDriver,
        mpsc::Receiver<TaskEvent>,
        mpsc::Receiver<PlannerEvent>,
    ) {
        (
            ListenerDriver {
                database_url: self.database_url,
                task_tx: self.task_tx,
                planner_tx: self.planner_tx,
            },
            self.task_events,
            self.planner_events,
        )
    }
}

/// The connection-owning half of the listener.
pub struct ListenerDriver {
    database_url: String,
    task_tx: mpsc::Sender<TaskEvent>,
    planner_tx: mpsc::Sender<PlannerEvent>,
}

impl ListenerDriver {
    /// Listen until cancelled, reconnecting with `min(attempt², 30)`-second
    /// backoff on connection loss.
    pub async fn run(self, cancel: CancellationToken) {
        let mut attempt: u64 = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.listen_once(&cancel) => result,
            };
            if cancel.is_cancelled() {
                return;
            }

            attempt += 1;
            let delay = backoff(attempt);
            warn!(
                "listener: connection lost ({}), reconnecting in {:?} (attempt {})",
                result.err().map(|e| e.to_string()).unwrap_or_default(),
                delay,
                attempt
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn listen_once(&self, cancel: &CancellationToken) -> Result<(), tokio_postgres::Error> {
        let (client, mut connection) = tokio_postgres::connect(&self.database_url, NoTls).await?;

        // Notifications arrive on the connection's message stream.
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::poll_fn(move |cx| connection.poll_message(cx));
        let pump = stream.for_each(move |message| {
            if let Ok(AsyncMessage::Notification(n)) = message {
                let _ = notify_tx.send(n);
            }
            future::ready(())
        });
        let pump_handle = tokio::spawn(pump);

        client.batch_execute("LISTEN task_events").await?;
        client.batch_execute("LISTEN planner_events").await?;
        info!("listener: connected and listening on task_events, planner_events");

        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                n = notify_rx.recv() => match n {
                    Some(n) => n,
                    // Stream ended: the connection is gone.
                    None => break,
                },
            };

            match notification.channel() {
                "task_events" => match serde_json::from_str::<TaskEvent>(notification.payload()) {
                    Ok(event) => {
                        if self.task_tx.try_send(event.clone()).is_err() {
                            warn!(
                                "listener: task_events channel full, dropping event for {}",
                                event.task_id
                            );
                        }
                    }
                    Err(err) => warn!("listener: bad task_events payload: {}", err),
                },
                "planner_events" => {
                    match serde_json::from_str::<PlannerEvent>(notification.payload()) {
                        Ok(event) => {
                            if self.planner_tx.try_send(event.clone()).is_err() {
                                warn!(
                                    "listener: planner_events channel full, dropping event for {}",
                                    event.session_id
                                );
                            }
                        }
                        Err(err) => warn!("listener: bad planner_events payload: {}", err),
                    }
                }
                other => warn!("listener: notification on unexpected channel {}", other),
            }
        }

        pump_handle.abort();
        Ok(())
    }
}

/// `min(attempt², 30)` seconds, floor one second.
fn backoff(attempt: u64) -> Duration {
    let secs = (attempt * attempt).min(MAX_BACKOFF_SECS).max(1);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_squares_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(5), Duration::from_secs(25));
        assert_eq!(backoff(6), Duration::from_secs(30));
        assert_eq!(backoff(100), Duration::from_secs(30));
    }

    #[test]
    fn task_event_payload() {
        let raw = r#"{"task_id":"t-9","title":"Fix","status":"pending_approval","old_status":"draft","project_id":"game","agent_id":"a1","ts":1700000000.5}"#;
        let event: TaskEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.task_id, "t-9");
        assert_eq!(event.status, "pending_approval");
        assert_eq!(event.project_id, "game");
    }

    #[test]
    fn planner_event_payload() {
        let raw = r#"{"session_id":"s-1","topic_id":42,"project_id":"game","status":"crashed","old_status":"running"}"#;
        let event: PlannerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.topic_id, 42);
        assert_eq!(event.status, "crashed");
    }

    #[test]
    fn undecodable_payload_is_rejected() {
        assert!(serde_json::from_str::<TaskEvent>("not json").is_err());
    }
}
