//! End-to-end scenarios exercising the dispatcher, self-healing loop, and
//! boot-time sweeper together through `AgentRuntime`.

use std::sync::Arc;
use std::time::Duration;

use agentcore::adapters::{InboundEvent, RecordingReplySink};
use agentcore::config::Config;
use agentcore::runtime::AgentRuntime;
use agentcore::store::session::SCOPE_MAIN;
use agentcore::store::MessageRole;
use agentcore::transport::mock::MockTransport;

async fn wait_for_idle(runtime: &AgentRuntime, chat_id: i64) {
    for _ in 0..50 {
        if runtime.queued(chat_id).await == 0 && runtime.running_tasks().await.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("dispatcher did not drain within the test timeout");
}

#[tokio::test]
async fn happy_path_produces_one_user_and_one_assistant_message() {
    let transport = Arc::new(MockTransport::new());
    transport.push_success("hi");
    let sink = Arc::new(RecordingReplySink::new());
    let runtime = AgentRuntime::new_in_memory_with_sink(transport, Config::default(), sink.clone())
        .await
        .unwrap();

    runtime.dispatch(InboundEvent::new(1, "Say hi")).await;
    wait_for_idle(&runtime, 1).await;

    let session_id = runtime
        .store()
        .get_or_create_session(1, SCOPE_MAIN, "agentcore")
        .await
        .unwrap();
    let session = runtime.store().get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.message_count, 2);

    let messages = runtime.store().get_messages(session_id, 10, 0).await.unwrap();
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "hi");

    let replies = sink.replies.lock().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0], (1, "hi".to_string()));

    assert!(runtime.store().list_running_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn two_messages_in_one_chat_process_strictly_in_order() {
    let transport = Arc::new(MockTransport::new());
    transport.push_success("first reply");
    transport.push_success("second reply");
    let sink = Arc::new(RecordingReplySink::new());
    let runtime = AgentRuntime::new_in_memory_with_sink(transport, Config::default(), sink.clone())
        .await
        .unwrap();

    runtime.dispatch(InboundEvent::new(100, "first task")).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    runtime.dispatch(InboundEvent::new(100, "second task")).await;

    wait_for_idle(&runtime, 100).await;

    let replies = sink.replies.lock().await;
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0], (100, "first reply".to_string()));
    assert_eq!(replies[1], (100, "second reply".to_string()));
}

#[tokio::test]
async fn context_overflow_then_success_compresses_and_recovers() {
    let transport = Arc::new(MockTransport::new());
    transport.push_failure("context too long for this model");
    transport.push_success("recovered output");
    let sink = Arc::new(RecordingReplySink::new());
    let runtime = AgentRuntime::new_in_memory_with_sink(transport, Config::default(), sink.clone())
        .await
        .unwrap();

    runtime.dispatch(InboundEvent::new(2, "summarize the repo")).await;
    wait_for_idle(&runtime, 2).await;

    let replies = sink.replies.lock().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0], (2, "recovered output".to_string()));

    let session_id = runtime
        .store()
        .get_or_create_session(2, SCOPE_MAIN, "agentcore")
        .await
        .unwrap();
    let history = runtime.store().get_model_message_history(session_id).await.unwrap();
    assert!(history.is_some());
    assert!(runtime.store().list_running_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn usage_limit_aborts_once_and_emits_auto_repair() {
    let transport = Arc::new(MockTransport::new());
    transport.push_failure("monthly usage limit exceeded for this account");
    let sink = Arc::new(RecordingReplySink::new());
    let runtime = AgentRuntime::new_in_memory_with_sink(transport.clone(), Config::default(), sink.clone())
        .await
        .unwrap();

    runtime.dispatch(InboundEvent::new(42, "finish the report")).await;
    wait_for_idle(&runtime, 42).await;

    assert_eq!(transport.call_count(), 1);

    let replies = sink.replies.lock().await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].1.contains("Usage limit reached"));
    drop(replies);

    let running = runtime.store().list_running_tasks().await.unwrap();
    assert_eq!(running.len(), 1);
    assert!(running[0].goal.contains("finish the report"));
    assert!(running[0].goal.starts_with("[Auto-repair]"));
}

#[tokio::test]
async fn resume_after_restart_redispatches_and_completes() {
    let transport = Arc::new(MockTransport::new());
    let sink = Arc::new(RecordingReplySink::new());
    let runtime = AgentRuntime::new_in_memory_with_sink(transport.clone(), Config::default(), sink.clone())
        .await
        .unwrap();

    let session_id = runtime
        .store()
        .get_or_create_session(9, SCOPE_MAIN, "agentcore")
        .await
        .unwrap();
    runtime
        .store()
        .upsert_resumable_task(session_id, 9, "Implement X")
        .await
        .unwrap();

    transport.push_success("implemented");
    let resumed = runtime.sweep_resumable_tasks().await.unwrap();
    assert_eq!(resumed, 1);

    assert!(runtime.store().list_running_tasks().await.unwrap().is_empty());
    let task = runtime.store().get_resumable_task(1).await.unwrap().unwrap();
    assert_eq!(task.status, agentcore::store::TaskStatus::Completed);

    let replies = sink.replies.lock().await;
    assert!(replies.iter().any(|(chat, text)| *chat == 9 && text.contains("Resuming")));
}

#[tokio::test]
async fn resume_gives_up_once_max_resume_count_is_reached() {
    let transport = Arc::new(MockTransport::new());
    let sink = Arc::new(RecordingReplySink::new());
    let mut config = Config::default();
    config.max_resume_count = 1;
    let runtime = AgentRuntime::new_in_memory_with_sink(transport, config, sink.clone())
        .await
        .unwrap();

    let session_id = runtime
        .store()
        .get_or_create_session(9, SCOPE_MAIN, "agentcore")
        .await
        .unwrap();
    let task_id = runtime
        .store()
        .upsert_resumable_task(session_id, 9, "Implement X")
        .await
        .unwrap();
    runtime.store().increment_resume_and_set_resumed_at(task_id).await.unwrap();

    let resumed = runtime.sweep_resumable_tasks().await.unwrap();
    assert_eq!(resumed, 0);

    let task = runtime.store().get_resumable_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, agentcore::store::TaskStatus::Failed);
}

#[tokio::test]
async fn concurrent_memory_search_is_filterable_by_category() {
    let transport = Arc::new(MockTransport::new());
    let runtime = AgentRuntime::new_in_memory(transport, Config::default()).await.unwrap();

    runtime
        .store()
        .save_memory(
            "api_config",
            agentcore::store::MemoryCategory::Environment,
            "API configuration",
            None,
            None,
            1.0,
        )
        .await
        .unwrap();
    runtime
        .store()
        .save_memory(
            "api_keys",
            agentcore::store::MemoryCategory::Security,
            "API keys management",
            None,
            None,
            1.0,
        )
        .await
        .unwrap();

    let all = runtime.store().search_memory("api", None, 10).await.unwrap();
    assert_eq!(all.len(), 2);

    let security_only = runtime
        .store()
        .search_memory("api", Some(agentcore::store::MemoryCategory::Security), 10)
        .await
        .unwrap();
    assert_eq!(security_only.len(), 1);
    assert_eq!(security_only[0].key, "api_keys");
}
