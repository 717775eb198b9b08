//! `TaskExecutor` backing `DigitalTaskService` (spec §4.7): runs a
//! device-initiated goal as a single-turn completion against the same
//! LLM collaborator the voice turn uses, with no tool access. A richer
//! agentic executor (tool use, multi-step planning) would implement
//! [`ocn_tasks::executor::StagedExecutor`] and plug into
//! `TwoStageExecutor` instead of this leaf.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use ocn_domain::interfaces::LLMClient;
use ocn_domain::stream::StreamEvent;
use ocn_domain::tool::Message;
use ocn_tasks::executor::TaskExecutor;
use serde_json::Value;

pub struct LlmGoalExecutor {
    llm: Arc<dyn LLMClient>,
}

impl LlmGoalExecutor {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TaskExecutor for LlmGoalExecutor {
    async fn execute(&self, goal: &str, session_id: &str) -> anyhow::Result<Value> {
        let messages = vec![
            Message::system("Carry out the requested goal and report the outcome in one short sentence."),
            Message::user(goal.to_string()),
        ];
        let mut stream = self.llm.chat_stream(messages, vec![]).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Token { text: chunk } => text.push_str(&chunk),
                StreamEvent::Error { message } => return Err(anyhow::anyhow!(message)),
                StreamEvent::Done { .. } => break,
                _ => {}
            }
        }
        Ok(serde_json::json!({ "session_id": session_id, "outcome": text }))
    }
}
