//! Wires the dispatcher, self-healing loop, store, and boot-time sweeper
//! into one entry point a front-end adapter can hand events to.
//!
//! Grounded on `gateway.rs`'s role as the single place that owns every
//! subsystem handle and exposes a small surface to `main.rs`/`cli.rs`.

use std::sync::Arc;

use crate::adapters::{InboundEvent, NullReplySink, ReplySink};
use crate::config::Config;
use crate::dispatcher::{ActiveTask, ChatHandler, Dispatcher};
use crate::healing::SelfHealingRunner;
use crate::store::session::SCOPE_MAIN;
use crate::store::{SessionStats, Store, StoreResult};
use crate::sweeper;
use crate::transport::BoxedTransport;
use crate::Result;

const AGENT_ID: &str = "agentcore";

struct RuntimeHandler {
    store: Store,
    runner: SelfHealingRunner,
    reply_sink: Arc<dyn ReplySink>,
}

#[async_trait::async_trait]
impl ChatHandler for RuntimeHandler {
    async fn handle(&self, event: InboundEvent) {
        let session_id = match self
            .store
            .get_or_create_session(event.chat_id, SCOPE_MAIN, AGENT_ID)
            .await
        {
            Ok(id) => id,
            Err(error) => {
                tracing::error!(chat_id = event.chat_id, %error, "failed to open session");
                self.reply_sink
                    .reply(event.chat_id, "Internal error: could not open session.".to_string())
                    .await;
                return;
            }
        };

        match self.runner.run(session_id, event.chat_id, &event.text, None).await {
            Ok(result) => self.reply_sink.reply(event.chat_id, result.output).await,
            Err(error) => {
                tracing::error!(chat_id = event.chat_id, session_id, %error, "self-healing loop errored");
                self.reply_sink
                    .reply(event.chat_id, "Internal error: the task could not be completed.".to_string())
                    .await;
            }
        }
    }
}

/// The runtime's entry point: owns the dispatcher, the store, and the
/// self-healing runner used both for live traffic and for boot-time
/// resumes.
pub struct AgentRuntime {
    dispatcher: Arc<Dispatcher<RuntimeHandler>>,
    store: Store,
    resume_runner: SelfHealingRunner,
    reply_sink: Arc<dyn ReplySink>,
    config: Arc<Config>,
}

impl AgentRuntime {
    pub async fn new(transport: BoxedTransport, config: Config, reply_sink: Arc<dyn ReplySink>) -> Result<Self> {
        let config = Arc::new(config);
        let store = Store::open(&config.db_path).await?;

        let handler = Arc::new(RuntimeHandler {
            store: store.clone(),
            runner: SelfHealingRunner::new(store.clone(), Arc::clone(&transport), Arc::clone(&config)),
            reply_sink: Arc::clone(&reply_sink),
        });

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(handler)),
            resume_runner: SelfHealingRunner::new(store.clone(), transport, Arc::clone(&config)),
            store,
            reply_sink,
            config,
        })
    }

    #[cfg(any(test, feature = "test-util"))]
    pub async fn new_in_memory(transport: BoxedTransport, config: Config) -> Result<Self> {
        Self::new_in_memory_with_sink(transport, config, Arc::new(NullReplySink)).await
    }

    #[cfg(any(test, feature = "test-util"))]
    pub async fn new_in_memory_with_sink(
        transport: BoxedTransport,
        config: Config,
        reply_sink: Arc<dyn ReplySink>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let store = Store::open_in_memory().await?;

        let handler = Arc::new(RuntimeHandler {
            store: store.clone(),
            runner: SelfHealingRunner::new(store.clone(), Arc::clone(&transport), Arc::clone(&config)),
            reply_sink: Arc::clone(&reply_sink),
        });

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(handler)),
            resume_runner: SelfHealingRunner::new(store.clone(), transport, Arc::clone(&config)),
            store,
            reply_sink,
            config,
        })
    }

    /// Enqueues an inbound event; returns immediately, the handler runs on
    /// the dispatcher's per-chat lane.
    pub async fn dispatch(&self, event: InboundEvent) {
        self.dispatcher.dispatch(event).await;
    }

    /// Resumes every task left `running` from a prior process, sequentially
    /// and before any live traffic is dispatched, so it never contends
    /// with the dispatcher's per-chat lanes.
    pub async fn sweep_resumable_tasks(&self) -> StoreResult<usize> {
        let runner = &self.resume_runner;
        sweeper::sweep(&self.store, &self.config, &self.reply_sink, |session_id, chat_id, prompt| async move {
            let task = match self.store.list_running_tasks().await {
                Ok(tasks) => tasks.into_iter().find(|t| t.session_id == session_id && t.chat_id == chat_id),
                Err(error) => {
                    tracing::error!(%error, "failed to look up resumed task");
                    None
                }
            };
            let task_id = task.map(|t| t.id);
            if let Err(error) = runner.run(session_id, chat_id, &prompt, task_id).await {
                tracing::error!(session_id, chat_id, %error, "resumed task failed to run");
            }
        })
        .await
    }

    pub async fn running_tasks(&self) -> Vec<ActiveTask> {
        self.dispatcher.running().await
    }

    pub async fn queued(&self, chat_id: i64) -> u64 {
        self.dispatcher.queued(chat_id).await
    }

    pub async fn session_stats(&self, session_id: i64, include_last_messages: usize) -> StoreResult<SessionStats> {
        self.store.get_session_stats(session_id, include_last_messages).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
