//! Event router: fans listener events out to the chat-side handlers.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::listener::{PlannerEvent, TaskEvent};

/// Handles tasks entering `pending_approval`.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn handle_pending_approval(&self, event: TaskEvent);
}

/// Handles every other task status change (queue board upkeep).
#[async_trait]
pub trait QueueBoardHandler: Send + Sync {
    async fn handle_task_update(&self, event: TaskEvent);
}

/// Handles planner sessions entering `crashed`.
#[async_trait]
pub trait PlannerCrashHandler: Send + Sync {
    async fn handle_planner_crash(&self, event: PlannerEvent);
}

/// Dispatches events from the listener channels. Any handler may be absent;
/// its events are logged and discarded.
pub struct EventRouter {
    pub approval: Option<Box<dyn ApprovalHandler>>,
    pub board: Option<Box<dyn QueueBoardHandler>>,
    pub crash: Option<Box<dyn PlannerCrashHandler>>,
}

impl EventRouter {
    /// Run until cancellation. Selects over both listener channels.
    pub async fn run(
        self,
        mut task_events: mpsc::Receiver<TaskEvent>,
        mut planner_events: mpsc::Receiver<PlannerEvent>,
        cancel: CancellationToken,
    ) {
        info!("event router started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(event) = task_events.recv() => {
                    if event.status == "pending_approval" {
                        match &self.approval {
                            Some(handler) => handler.handle_pending_approval(event).await,
                            None => debug!("router: no approval handler for task {}", event.task_id),
                        }
                    } else {
                        // done, ready, failed, claimed and the rest.
                        match &self.board {
                            Some(handler) => handler.handle_task_update(event).await,
                            None => debug!("router: no board handler for task {}", event.task_id),
                        }
                    }
                }

                Some(event) = planner_events.recv() => {
                    if event.status != "crashed" {
                        continue;
                    }
                    match &self.crash {
                        Some(handler) => handler.handle_planner_crash(event).await,
                        None => debug!(
                            "router: no crash handler for planner session {}",
                            event.session_id
                        ),
                    }
                }
            }
        }
        info!("event router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Seen {
        approvals: Mutex<Vec<String>>,
        updates: Mutex<Vec<String>>,
        crashes: Mutex<Vec<i64>>,
    }

    struct TestApproval(Arc<Seen>);
    struct TestBoard(Arc<Seen>);
    struct TestCrash(Arc<Seen>);

    #[async_trait]
    impl ApprovalHandler for TestApproval {
        async fn handle_pending_approval(&self, event: TaskEvent) {
            self.0.approvals.lock().unwrap().push(event.task_id);
        }
    }

    #[async_trait]
    impl QueueBoardHandler for TestBoard {
        async fn handle_task_update(&self, event: TaskEvent) {
            self.0.updates.lock().unwrap().push(event.task_id);
        }
    }

    #[async_trait]
    impl PlannerCrashHandler for TestCrash {
        async fn handle_planner_crash(&self, event: PlannerEvent) {
            self.0.crashes.lock().unwrap().push(event.topic_id);
        }
    }

    #[tokio::test]
    async fn routes_by_status() {
        let seen = Arc::new(Seen::default());
        let router = EventRouter {
            approval: Some(Box::new(TestApproval(seen.clone()))),
            board: Some(Box::new(TestBoard(seen.clone()))),
            crash: Some(Box::new(TestCrash(seen.clone()))),
        };

        let (task_tx, task_rx) = mpsc::channel(8);
        let (planner_tx, planner_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(router.run(task_rx, planner_rx, cancel.clone()));

        task_tx
            .send(TaskEvent {
                task_id: "t-approve".into(),
                status: "pending_approval".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        task_tx
            .send(TaskEvent {
                task_id: "t-done".into(),
                status: "done".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        planner_tx
            .send(PlannerEvent {
                topic_id: 42,
                status: "crashed".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        planner_tx
            .send(PlannerEvent {
                topic_id: 43,
                status: "stopped".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        run.await.unwrap();

        assert_eq!(*seen.approvals.lock().unwrap(), vec!["t-approve"]);
        assert_eq!(*seen.updates.lock().unwrap(), vec!["t-done"]);
        assert_eq!(*seen.crashes.lock().unwrap(), vec![42]);
    }
}
