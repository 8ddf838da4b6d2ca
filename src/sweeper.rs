//! Boot-time sweep of interrupted resumable tasks.
//!
//! Grounded on `runner.py`'s top-level retry orchestration for the general
//! shape (list, act, re-dispatch) and on spec §4.6.3 for the exact
//! resume/give-up thresholds, which have no direct source counterpart.

use std::sync::Arc;

use crate::adapters::ReplySink;
use crate::config::Config;
use crate::healing::build_resume_prompt;
use crate::store::{Store, StoreResult};

/// Re-dispatches every `running` task found at startup, in insertion
/// order. `redispatch` is supplied by the caller (normally the runtime's
/// `ChatHandler`) so the sweeper has no dependency on the dispatcher's
/// generic handler type.
pub async fn sweep<F, Fut>(
    store: &Store,
    config: &Config,
    reply_sink: &Arc<dyn ReplySink>,
    redispatch: F,
) -> StoreResult<usize>
where
    F: Fn(i64, i64, String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let running = store.list_running_tasks().await?;
    let mut resumed = 0;

    for task in running {
        if (task.resume_count as u32) < config.max_resume_count {
            let resume_count = store.increment_resume_and_set_resumed_at(task.id).await?;
            reply_sink
                .reply(task.chat_id, "Resuming a previously interrupted task...".to_string())
                .await;

            let prompt = build_resume_prompt(&task.goal, resume_count);
            redispatch(task.session_id, task.chat_id, prompt).await;
            resumed += 1;
        } else {
            store
                .mark_resumable_task_failed(task.id, "max resume count exceeded")
                .await?;
            reply_sink
                .reply(
                    task.chat_id,
                    "Giving up on a previously interrupted task: too many resume attempts.".to_string(),
                )
                .await;
        }
    }

    Ok(resumed)
}
