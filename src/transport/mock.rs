//! A scriptable transport for exercising the self-healing loop without a
//! real LLM. Responses and errors can be queued in order; each `run` call
//! consumes the next scripted outcome, falling back to a default success
//! once the script is exhausted.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{LlmTransport, OpaqueMessage, RunContext, RunOutcome};

enum Scripted {
    Success(String),
    Failure(String),
}

pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    call_count: Mutex<usize>,
    last_goal: Mutex<Option<String>>,
    last_history_len: Mutex<Option<usize>>,
    default_model: String,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            call_count: Mutex::new(0),
            last_goal: Mutex::new(None),
            last_history_len: Mutex::new(None),
            default_model: "mock-model".to_string(),
        }
    }

    /// Queues a successful response to be returned on the next `run`.
    pub fn push_success(&self, output: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Success(output.into()));
        self
    }

    /// Queues a raised error (as the transport's error string) for the next `run`.
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Failure(message.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_goal(&self) -> Option<String> {
        self.last_goal.lock().unwrap().clone()
    }

    pub fn last_history_len(&self) -> Option<usize> {
        *self.last_history_len.lock().unwrap()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmTransport for MockTransport {
    async fn run(
        &self,
        goal: &str,
        _context: &RunContext,
        message_history: Option<&[OpaqueMessage]>,
    ) -> Result<RunOutcome, String> {
        *self.call_count.lock().unwrap() += 1;
        *self.last_goal.lock().unwrap() = Some(goal.to_string());
        *self.last_history_len.lock().unwrap() = message_history.map(|h| h.len());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Success(output)) => Ok(RunOutcome {
                new_messages: vec![
                    serde_json::json!({"role": "user", "content": goal}),
                    serde_json::json!({"role": "assistant", "content": output}),
                ],
                output,
            }),
            Some(Scripted::Failure(message)) => Err(message),
            None => Ok(RunOutcome {
                output: "mock response".to_string(),
                new_messages: vec![],
            }),
        }
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
