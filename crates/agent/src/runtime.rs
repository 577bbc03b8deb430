use std::sync::Arc;

use chrono_tz::Tz;
use crmbot_core::config::{AgentConfig, ConfigError};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::llm::{ChatMessage, LlmClient, LlmError, ToolSchema};
use crate::prompt::system_prompt;
use crate::session::{SessionId, SessionStore};
use crate::tools::{ToolInvocation, ToolRegistry};

/// Tool message recorded for calls that were not run because an earlier call
/// in the same step failed.
pub const SKIPPED_TOOL_RESULT: &str =
    r#"{"skipped":true,"reason":"an earlier tool call in this turn failed"}"#;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transcript is empty")]
    EmptyTranscript,
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnOutcome {
    pub answer: Option<String>,
    pub invocations: Vec<ToolInvocation>,
}

/// Runs one user turn: prompt the model, execute the tool calls it asks for,
/// feed results back, and stop at a text answer or the step limit.
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    sessions: SessionStore,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    max_tool_steps: u32,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        config: &AgentConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            llm,
            tools,
            sessions: SessionStore::new(config.session_ttl(), config.max_history_turns),
            clock: Arc::new(SystemClock),
            timezone: config.tz()?,
            max_tool_steps: config.max_tool_steps.max(1),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn handle_turn(
        &self,
        session_id: &SessionId,
        transcript: &str,
    ) -> Result<TurnOutcome, AgentError> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(AgentError::EmptyTranscript);
        }

        let now = self.clock.now().with_timezone(&self.timezone);
        let mut messages = vec![ChatMessage::System(system_prompt(now))];
        messages.extend(self.sessions.history(session_id).await);
        let turn_start = messages.len();
        messages.push(ChatMessage::User(transcript.to_string()));

        let schemas = self.tools.schemas();
        let mut tools_enabled = true;
        let mut outcome = TurnOutcome::default();
        let mut finished = false;

        let mut step: u32 = 0;
        loop {
            step += 1;
            let offered: &[ToolSchema] = if tools_enabled { &schemas } else { &[] };
            let reply = match self.llm.chat(&messages, offered).await {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(
                        event_name = "agent.turn.failed",
                        session_id = %session_id,
                        step,
                        error = %error,
                        "model call failed"
                    );
                    return Err(error.into());
                }
            };

            if let Some(text) = reply.content.as_deref().filter(|text| !text.trim().is_empty()) {
                outcome.answer = Some(text.to_string());
            }
            let calls = if tools_enabled { reply.tool_calls } else { Vec::new() };
            messages.push(ChatMessage::Assistant { content: reply.content, tool_calls: calls.clone() });

            if calls.is_empty() {
                finished = true;
                break;
            }

            let mut halted = false;
            for call in calls {
                if halted {
                    messages.push(ChatMessage::Tool {
                        tool_call_id: call.id,
                        content: SKIPPED_TOOL_RESULT.to_string(),
                    });
                    continue;
                }
                let invocation = self.tools.execute(&call.name, &call.arguments).await;
                messages.push(ChatMessage::Tool {
                    tool_call_id: call.id,
                    content: invocation.output.to_string(),
                });
                halted = invocation.failed;
                outcome.invocations.push(invocation);
            }
            // A failed call gets one tool-less follow-up, even past the step limit.
            if halted {
                tools_enabled = false;
                continue;
            }
            if step >= self.max_tool_steps {
                break;
            }
        }

        if !finished {
            warn!(
                event_name = "agent.turn.step_limit",
                session_id = %session_id,
                max_tool_steps = self.max_tool_steps,
                "turn stopped at the tool step limit"
            );
        }

        self.sessions.record_turn(session_id, messages.split_off(turn_start)).await;
        info!(
            event_name = "agent.turn.completed",
            session_id = %session_id,
            tool_calls = outcome.invocations.len(),
            answered = outcome.answer.is_some(),
            "turn completed"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use crmbot_core::config::AppConfig;
    use serde_json::{json, Value};

    use super::{AgentError, AgentRuntime, SKIPPED_TOOL_RESULT};
    use crate::llm::{AssistantTurn, ChatMessage, LlmClient, LlmError, ToolCall, ToolSchema};
    use crate::session::SessionId;
    use crate::tools::{Tool, ToolRegistry};

    #[derive(Default)]
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<AssistantTurn, LlmError>>>,
        seen: Mutex<Vec<(Vec<ChatMessage>, usize)>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<AssistantTurn, LlmError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), seen: Mutex::default() })
        }

        fn seen(&self) -> Vec<(Vec<ChatMessage>, usize)> {
            self.seen.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            messages: &[ChatMessage],
            tools: &[ToolSchema],
        ) -> Result<AssistantTurn, LlmError> {
            self.seen.lock().expect("lock").push((messages.to_vec(), tools.len()));
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok(text("script exhausted")))
        }
    }

    struct EchoTool(&'static str);

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            self.0
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.0.to_string(),
                description: "echo".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            if input.get("fail").is_some() {
                return Ok(json!({"error": "Validation errors: ['Invalid phone number']", "error_kind": "validation"}));
            }
            Ok(json!({"echo": input}))
        }
    }

    fn text(content: &str) -> AssistantTurn {
        AssistantTurn { content: Some(content.to_string()), tool_calls: Vec::new() }
    }

    fn calls(calls: &[(&str, &str, &str)]) -> AssistantTurn {
        AssistantTurn {
            content: None,
            tool_calls: calls
                .iter()
                .map(|(id, name, arguments)| ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                })
                .collect(),
        }
    }

    fn runtime(llm: Arc<ScriptedLlm>, max_tool_steps: u32) -> AgentRuntime {
        let mut tools = ToolRegistry::default();
        tools.register(EchoTool("first"));
        tools.register(EchoTool("second"));
        let mut config = AppConfig::default().agent;
        config.max_tool_steps = max_tool_steps;
        AgentRuntime::new(llm, tools, &config).expect("runtime")
    }

    fn session(id: &str) -> SessionId {
        SessionId::parse(id).expect("session id")
    }

    #[tokio::test]
    async fn plain_reply_needs_no_tools() {
        let llm = ScriptedLlm::new(vec![Ok(text("Hello! How can I help?"))]);
        let runtime = runtime(Arc::clone(&llm), 5);

        let outcome = runtime.handle_turn(&session("s"), "hi").await.expect("turn");

        assert_eq!(outcome.answer.as_deref(), Some("Hello! How can I help?"));
        assert!(outcome.invocations.is_empty());
        let seen = llm.seen();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0].0[0], ChatMessage::System(prompt) if prompt.contains("CRM assistant")));
        assert_eq!(seen[0].0[1], ChatMessage::User("hi".to_string()));
        assert_eq!(seen[0].1, 2);
    }

    #[tokio::test]
    async fn tool_calls_run_in_order_and_results_feed_back() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("c1", "first", r#"{"n": 1}"#), ("c2", "second", r#"{"n": 2}"#)])),
            Ok(text("done")),
        ]);
        let runtime = runtime(Arc::clone(&llm), 5);

        let outcome = runtime.handle_turn(&session("s"), "do both").await.expect("turn");

        let names = outcome.invocations.iter().map(|i| i.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(outcome.answer.as_deref(), Some("done"));
        let second_call = &llm.seen()[1].0;
        assert!(matches!(
            second_call.last(),
            Some(ChatMessage::Tool { tool_call_id, content }) if tool_call_id == "c2" && content.contains("\"n\":2")
        ));
    }

    #[tokio::test]
    async fn failing_tool_skips_the_rest_and_disables_tools() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("c1", "first", r#"{"fail": true}"#), ("c2", "second", "{}")])),
            Ok(AssistantTurn {
                content: Some("Invalid phone number, please check it.".to_string()),
                tool_calls: vec![ToolCall {
                    id: "c3".to_string(),
                    name: "second".to_string(),
                    arguments: "{}".to_string(),
                }],
            }),
        ]);
        let runtime = runtime(Arc::clone(&llm), 5);

        let outcome = runtime.handle_turn(&session("s"), "create and schedule").await.expect("turn");

        assert_eq!(outcome.invocations.len(), 1);
        assert!(outcome.invocations[0].failed);
        assert_eq!(outcome.answer.as_deref(), Some("Invalid phone number, please check it."));
        let seen = llm.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, 0, "follow-up call must not offer tools");
        assert!(matches!(
            seen[1].0.last(),
            Some(ChatMessage::Tool { tool_call_id, content }) if tool_call_id == "c2" && content == SKIPPED_TOOL_RESULT
        ));
    }

    #[tokio::test]
    async fn failure_on_the_last_step_still_gets_a_follow_up_answer() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("c1", "first", r#"{"fail": true}"#)])),
            Ok(text("Invalid phone number")),
        ]);
        let runtime = runtime(Arc::clone(&llm), 1);

        let outcome = runtime.handle_turn(&session("s"), "create lead").await.expect("turn");

        assert_eq!(outcome.invocations.len(), 1);
        assert!(outcome.invocations[0].failed);
        assert_eq!(outcome.answer.as_deref(), Some("Invalid phone number"));
        let seen = llm.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, 0, "follow-up call must not offer tools");
    }

    #[tokio::test]
    async fn step_limit_bounds_model_calls() {
        let llm = ScriptedLlm::new(vec![
            Ok(calls(&[("c1", "first", "{}")])),
            Ok(calls(&[("c2", "first", "{}")])),
            Ok(calls(&[("c3", "first", "{}")])),
        ]);
        let runtime = runtime(Arc::clone(&llm), 2);

        let outcome = runtime.handle_turn(&session("s"), "loop").await.expect("turn");

        assert_eq!(llm.seen().len(), 2);
        assert_eq!(outcome.invocations.len(), 2);
        assert_eq!(outcome.answer, None);
    }

    #[tokio::test]
    async fn history_carries_over_within_a_session_only() {
        let llm = ScriptedLlm::new(vec![Ok(text("one")), Ok(text("two")), Ok(text("three"))]);
        let runtime = runtime(Arc::clone(&llm), 5);

        runtime.handle_turn(&session("a"), "first message").await.expect("turn");
        runtime.handle_turn(&session("a"), "second message").await.expect("turn");
        runtime.handle_turn(&session("b"), "other session").await.expect("turn");

        let seen = llm.seen();
        assert_eq!(seen[1].0.len(), 4);
        assert_eq!(seen[1].0[1], ChatMessage::User("first message".to_string()));
        assert_eq!(seen[2].0.len(), 2);
    }

    #[tokio::test]
    async fn blank_transcript_and_model_failure_are_errors() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Transport("connection refused".to_string()))]);
        let runtime = runtime(Arc::clone(&llm), 5);

        assert!(matches!(
            runtime.handle_turn(&session("s"), "   ").await,
            Err(AgentError::EmptyTranscript)
        ));
        assert!(matches!(
            runtime.handle_turn(&session("s"), "hello").await,
            Err(AgentError::Llm(LlmError::Transport(_)))
        ));
        assert!(runtime.sessions().history(&session("s")).await.is_empty());
    }
}
