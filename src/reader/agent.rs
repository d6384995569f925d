//! Bounded tool-calling loop.

use tracing::{debug, info};

use super::tools::{Action, ToolExecutor};
use crate::llm::{ChatMessage, Decision, LanguageModel, ToolSpec};
use crate::{Error, Result};

/// Result of a finished agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    /// Final text of the model
    pub answer: String,
    /// Model turns taken, including the final one
    pub steps: usize,
    /// Executed actions in order
    pub actions: Vec<Action>,
}

/// Ask the model to decide until it produces a final answer.
///
/// Every tool call is answered with a tool message before the next turn.
/// Calls to tools not in `tools` abort the run with a schema violation, and
/// executor errors propagate unchanged. More than `max_steps` turns is a
/// service error.
pub async fn run_agent(
    llm: &dyn LanguageModel,
    mut messages: Vec<ChatMessage>,
    tools: &[ToolSpec],
    executor: &mut dyn ToolExecutor,
    max_steps: usize,
) -> Result<AgentOutcome> {
    let mut actions = Vec::new();

    for step in 1..=max_steps {
        let calls = match llm.decide(&messages, tools).await? {
            Decision::Final(answer) => {
                info!(steps = step, actions = actions.len(), "Agent finished");
                return Ok(AgentOutcome {
                    answer,
                    steps: step,
                    actions,
                });
            }
            Decision::ToolCalls(calls) if calls.is_empty() => {
                return Err(Error::SchemaViolation(
                    "model returned neither tool calls nor an answer".to_string(),
                ));
            }
            Decision::ToolCalls(calls) => calls,
        };

        messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
        for call in &calls {
            if !tools.iter().any(|t| t.name == call.function.name) {
                return Err(Error::SchemaViolation(format!(
                    "tool '{}' was not offered",
                    call.function.name
                )));
            }
            let action = Action::parse(call)?;
            debug!(step, "Executing {}", action);
            let observation = executor.execute(&action)?;
            messages.push(ChatMessage::tool(&call.id, observation));
            actions.push(action);
        }
    }

    Err(Error::Service(format!(
        "agent did not finish within {} steps",
        max_steps
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{OutputSchema, ToolCall};
    use crate::reader::tools::explore_tools;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Replays decisions and records the transcript it was shown.
    struct Scripted {
        decisions: Mutex<Vec<Decision>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(mut decisions: Vec<Decision>) -> Self {
            decisions.reverse();
            Self {
                decisions: Mutex::new(decisions),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            unreachable!("agent only decides")
        }

        async fn complete_structured(
            &self,
            _messages: &[ChatMessage],
            _schema: &OutputSchema,
        ) -> Result<Value> {
            unreachable!("agent only decides")
        }

        async fn decide(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<Decision> {
            self.seen.lock().unwrap().push(messages.len());
            self.decisions
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::Service("script exhausted".into()))
        }
    }

    /// Echoes the action back.
    struct Echo;

    impl ToolExecutor for Echo {
        fn execute(&mut self, action: &Action) -> Result<String> {
            Ok(action.to_string())
        }
    }

    fn read_node(id: &str, node: &str) -> ToolCall {
        ToolCall::new(id, "read_node", json!({ "node_name": node }))
    }

    #[tokio::test]
    async fn executes_calls_until_final_answer() {
        let llm = Scripted::new(vec![
            Decision::ToolCalls(vec![read_node("a", "paris"), read_node("b", "france")]),
            Decision::Final("[0, 1]".into()),
        ]);

        let outcome = run_agent(
            &llm,
            vec![ChatMessage::user("q")],
            &explore_tools(),
            &mut Echo,
            5,
        )
        .await
        .unwrap();

        assert_eq!(outcome.answer, "[0, 1]");
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.actions.len(), 2);
        // user, assistant tool calls, two tool replies
        assert_eq!(*llm.seen.lock().unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn step_cap_is_a_service_error() {
        let llm = Scripted::new(vec![
            Decision::ToolCalls(vec![read_node("a", "paris")]),
            Decision::ToolCalls(vec![read_node("b", "paris")]),
            Decision::Final("never reached".into()),
        ]);

        let err = run_agent(&llm, vec![], &explore_tools(), &mut Echo, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Service(_)));
    }

    #[tokio::test]
    async fn undeclared_tool_is_rejected() {
        let llm = Scripted::new(vec![Decision::ToolCalls(vec![ToolCall::new(
            "a",
            "read_chunk",
            json!({ "chunk_id": 1 }),
        )])]);

        let err = run_agent(&llm, vec![], &explore_tools(), &mut Echo, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn empty_tool_call_list_is_rejected() {
        let llm = Scripted::new(vec![Decision::ToolCalls(vec![])]);
        let err = run_agent(&llm, vec![], &explore_tools(), &mut Echo, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn oracle_failure_surfaces() {
        let llm = Scripted::new(vec![]);
        let err = run_agent(&llm, vec![], &explore_tools(), &mut Echo, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Service(_)));
    }
}
