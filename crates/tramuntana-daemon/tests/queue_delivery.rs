//! End-to-end delivery queue behavior through the public API.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tramuntana_core::flood::FloodControl;
use tramuntana_daemon::queue::{ChatSender, ContentType, MessageTask, Queue};

#[derive(Default)]
struct CapturingSender {
    sent: Mutex<Vec<(i64, i64, String)>>,
    next_id: AtomicI64,
}

#[async_trait]
impl ChatSender for CapturingSender {
    async fn send(&self, chat_id: i64, thread_id: i64, text: &str) -> Result<i64, String> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id, thread_id, text.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn edit(&self, _chat_id: i64, _message_id: i64, _text: &str) -> Result<(), String> {
        Ok(())
    }

    async fn delete(&self, _chat_id: i64, _message_id: i64) -> Result<(), String> {
        Ok(())
    }
}

fn task(user_id: i64, thread_id: i64, text: &str) -> MessageTask {
    MessageTask {
        user_id,
        thread_id,
        chat_id: -100500,
        content_type: ContentType::Content,
        parts: vec![text.to_string()],
        window_id: "@1".into(),
    }
}

async fn drain(queue: &Queue, user_id: i64) {
    while queue.queue_len(user_id) > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}

#[tokio::test]
async fn independent_users_deliver_independently() {
    let sender = Arc::new(CapturingSender::default());
    let queue = Queue::new(
        sender.clone(),
        Arc::new(FloodControl::new()),
        CancellationToken::new(),
    );

    queue.enqueue(task(100, 42, "for user 100"));
    queue.enqueue(task(200, 43, "for user 200"));
    drain(&queue, 100).await;
    drain(&queue, 200).await;

    let sent = sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    let bodies: Vec<&str> = sent.iter().map(|(_, _, text)| text.as_str()).collect();
    assert!(bodies.contains(&"for user 100"));
    assert!(bodies.contains(&"for user 200"));
}

#[tokio::test]
async fn per_user_order_survives_bursts() {
    let sender = Arc::new(CapturingSender::default());
    let queue = Queue::new(
        sender.clone(),
        Arc::new(FloodControl::new()),
        CancellationToken::new(),
    );

    for i in 0..20 {
        queue.enqueue(task(100, 42, &format!("part-{i:02}")));
    }
    drain(&queue, 100).await;

    // However the burst was merged and chunked, the parts must appear in
    // enqueue order in the concatenated output.
    let sent = sender.sent.lock().unwrap().clone();
    let joined: String = sent
        .iter()
        .map(|(_, _, text)| text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let mut last_pos = 0;
    for i in 0..20 {
        let pos = joined
            .find(&format!("part-{i:02}"))
            .unwrap_or_else(|| panic!("missing part-{i:02}"));
        assert!(pos >= last_pos, "part-{i:02} delivered out of order");
        last_pos = pos;
    }
}

#[tokio::test]
async fn status_lifecycle_is_edit_then_delete() {
    let sender = Arc::new(CapturingSender::default());
    let queue = Queue::new(
        sender.clone(),
        Arc::new(FloodControl::new()),
        CancellationToken::new(),
    );

    let status = |kind: ContentType, text: &str| MessageTask {
        user_id: 100,
        thread_id: 42,
        chat_id: -100500,
        content_type: kind,
        parts: vec![text.to_string()],
        window_id: "@1".into(),
    };

    queue.enqueue(status(ContentType::StatusUpdate, "Reading main.rs"));
    drain(&queue, 100).await;
    queue.enqueue(status(ContentType::StatusClear, ""));
    drain(&queue, 100).await;

    // Only the initial status send hits the wire as a message; the clear is
    // a delete, not a send.
    let sent = sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].2, "Reading main.rs");
}
