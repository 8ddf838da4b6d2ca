//! Per-chat FIFO dispatcher.
//!
//! No original-source file implements this; the contract comes directly
//! from the ordering guarantees (`handler invocations are strictly FIFO
//! and non-overlapping` per `chat_id`), built in the style of the
//! teacher's `chat::hub::ChatHub` — `Arc<RwLock<HashMap<...>>>` for shared
//! maps, `tracing` for every state transition, structured `thiserror`
//! errors.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::adapters::InboundEvent;

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

pub type Result<T> = std::result::Result<T, DispatcherError>;

/// The core's entry point for a single inbound event. Implementations run
/// the self-healing loop; dispatched calls for the same `chat_id` never
/// overlap.
#[async_trait]
pub trait ChatHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}

#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub chat_id: i64,
    pub text: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

struct ChatLane {
    lock: Arc<Mutex<()>>,
    queued: u64,
}

/// Serializes handler invocations per `chat_id`: at most one handler runs
/// for a given chat at a time, and events for that chat are processed in
/// the order `dispatch` was called.
pub struct Dispatcher<H: ChatHandler + 'static> {
    handler: Arc<H>,
    lanes: RwLock<HashMap<i64, ChatLane>>,
    active_tasks: RwLock<HashMap<u64, ActiveTask>>,
    next_task_id: AtomicU64,
}

impl<H: ChatHandler + 'static> Dispatcher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            lanes: RwLock::new(HashMap::new()),
            active_tasks: RwLock::new(HashMap::new()),
            next_task_id: AtomicU64::new(1),
        }
    }

    /// Enqueues `event` for its chat and returns immediately. The handler
    /// runs on a spawned task, acquiring the chat's lane lock in the order
    /// `dispatch` calls arrived.
    pub async fn dispatch(self: &Arc<Self>, event: InboundEvent) {
        let lane_lock = {
            let mut lanes = self.lanes.write().await;
            let lane = lanes.entry(event.chat_id).or_insert_with(|| ChatLane {
                lock: Arc::new(Mutex::new(())),
                queued: 0,
            });
            lane.queued += 1;
            Arc::clone(&lane.lock)
        };

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = lane_lock.lock().await;
            let chat_id = event.chat_id;
            if let Some(lane) = dispatcher.lanes.write().await.get_mut(&chat_id) {
                lane.queued = lane.queued.saturating_sub(1);
            }

            let task_id = dispatcher.next_task_id.fetch_add(1, Ordering::SeqCst);
            dispatcher.active_tasks.write().await.insert(
                task_id,
                ActiveTask {
                    chat_id,
                    text: event.text.clone(),
                    started_at: chrono::Utc::now(),
                },
            );

            tracing::debug!(chat_id, task_id, "handler starting");
            let result = std::panic::AssertUnwindSafe(dispatcher.handler.handle(event))
                .catch_unwind()
                .await;
            if let Err(panic) = result {
                let message = panic_message(&panic);
                tracing::error!(chat_id, task_id, error = %message, "handler panicked");
            }

            dispatcher.active_tasks.write().await.remove(&task_id);
            tracing::debug!(chat_id, task_id, "handler finished");
        });
    }

    /// Snapshot of tasks currently executing (lock held), keyed by internal
    /// task id.
    pub async fn running(&self) -> Vec<ActiveTask> {
        self.active_tasks.read().await.values().cloned().collect()
    }

    /// Number of events waiting for `chat_id`'s lane lock. The event
    /// currently holding the lock (if any) is not counted — use `running`
    /// to observe it.
    pub async fn queued(&self, chat_id: i64) -> u64 {
        self.lanes
            .read()
            .await
            .get(&chat_id)
            .map(|lane| lane.queued)
            .unwrap_or(0)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct RecordingHandler {
        order: Mutex<Vec<String>>,
        notify: Notify,
        expected: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl ChatHandler for RecordingHandler {
        async fn handle(&self, event: InboundEvent) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.order.lock().await.push(event.text);
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.expected {
                self.notify.notify_one();
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl ChatHandler for PanickingHandler {
        async fn handle(&self, _event: InboundEvent) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn same_chat_events_process_in_fifo_order() {
        let handler = Arc::new(RecordingHandler {
            order: Mutex::new(Vec::new()),
            notify: Notify::new(),
            expected: 2,
            seen: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&handler)));

        dispatcher.dispatch(InboundEvent::new(1, "first")).await;
        dispatcher.dispatch(InboundEvent::new(1, "second")).await;

        handler.notify.notified().await;
        let order = handler.order.lock().await;
        assert_eq!(*order, vec!["first".to_string(), "second".to_string()]);
    }

    struct BlockingHandler {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ChatHandler for BlockingHandler {
        async fn handle(&self, _event: InboundEvent) {
            self.started.notify_one();
            self.release.notified().await;
        }
    }

    #[tokio::test]
    async fn queued_count_drops_to_zero_once_the_handler_starts_running() {
        let handler = Arc::new(BlockingHandler {
            started: Notify::new(),
            release: Notify::new(),
        });
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&handler)));

        dispatcher.dispatch(InboundEvent::new(1, "first")).await;
        handler.started.notified().await;

        assert_eq!(dispatcher.queued(1).await, 0);
        assert_eq!(dispatcher.running().await.len(), 1);

        handler.release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dispatcher.running().await.is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_releases_the_lane() {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(PanickingHandler)));

        dispatcher.dispatch(InboundEvent::new(1, "first")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(dispatcher.queued(1).await, 0);
        assert!(dispatcher.running().await.is_empty());
    }
}
