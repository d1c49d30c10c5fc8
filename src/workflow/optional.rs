//! Optional mode: the model decides which tools to call.

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ModelClient, ModelReply};
use crate::manager::ClientManager;
use std::sync::Arc;

/// What one turn of the loop produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The model's final text answer
    pub text: String,
    /// How many tool calls were executed along the way
    pub tool_calls_made: usize,
}

/// Single-turn loop: present the aggregated tool schemas, execute whatever
/// the model requests, feed results back, repeat until plain text.
pub struct OptionalWorkflow {
    model: Arc<dyn ModelClient>,
    manager: Arc<ClientManager>,
    max_iterations: usize,
    /// Conversation context, persisted across turns
    context: Vec<ChatMessage>,
}

impl OptionalWorkflow {
    pub fn new(
        model: Arc<dyn ModelClient>,
        manager: Arc<ClientManager>,
        max_iterations: usize,
    ) -> Self {
        Self {
            model,
            manager,
            max_iterations,
            context: Vec::new(),
        }
    }

    /// Process one user query. The iteration cap bounds runaway tool-call
    /// loops; hitting it fails with WorkflowExhausted.
    pub async fn run_turn(&mut self, query: &str) -> Result<TurnOutcome> {
        self.context.push(ChatMessage::user(query));
        let tools = self.manager.tool_definitions().await;
        let mut tool_calls_made = 0;

        for _ in 0..self.max_iterations {
            let reply = self.model.chat(&self.context, Some(&tools)).await?;

            match reply {
                ModelReply::Text(text) => {
                    self.context.push(ChatMessage::assistant(&text));
                    return Ok(TurnOutcome {
                        text,
                        tool_calls_made,
                    });
                }
                ModelReply::ToolCalls(calls) => {
                    self.context
                        .push(ChatMessage::assistant_tool_calls(calls.clone()));

                    for call in calls {
                        tracing::debug!(tool = %call.name, "model requested tool call");
                        tool_calls_made += 1;

                        // A failed call is reported back to the model, not
                        // fatal to the turn
                        let content = match self
                            .manager
                            .call_tool(&call.name, call.arguments.clone())
                            .await
                        {
                            Ok(result) if result.is_error => {
                                format!("tool error: {}", result.to_text())
                            }
                            Ok(result) => result.to_text(),
                            Err(e) => {
                                tracing::warn!(tool = %call.name, "tool call failed: {}", e);
                                format!("tool error: {}", e)
                            }
                        };
                        self.context.push(ChatMessage::tool_result(call.id, content));
                    }
                }
            }
        }

        Err(Error::WorkflowExhausted {
            limit: self.max_iterations,
        })
    }

    /// Drop accumulated conversation context
    pub fn clear_context(&mut self) {
        self.context.clear();
    }
}
