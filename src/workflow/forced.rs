//! Forced mode: a deterministic search -> extract -> summarize pipeline.
//!
//! The model has no say in which tools run; it is only consulted for the
//! final summary. A failure in any non-terminal state produces a reported
//! error carrying the originating state — the pipeline never silently
//! skips a step.

use crate::config::WorkflowSettings;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ModelClient, ModelReply};
use crate::manager::ClientManager;
use serde_json::{json, Value};
use std::sync::Arc;

/// Pipeline states. Transitions are strictly
/// Idle -> Searching -> Extracting -> Summarizing -> Done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Searching,
    Extracting,
    Summarizing,
    Done,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Searching => "Searching",
            Self::Extracting => "Extracting",
            Self::Summarizing => "Summarizing",
            Self::Done => "Done",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one pipeline run. `Failed` is distinct from `Done`
/// and records where the pipeline was when the error happened.
#[derive(Debug)]
pub enum PipelineOutcome {
    Done {
        summary: String,
        papers: Vec<Value>,
    },
    Failed {
        state: WorkflowState,
        error: Error,
    },
}

pub struct ForcedWorkflow {
    model: Arc<dyn ModelClient>,
    manager: Arc<ClientManager>,
    settings: WorkflowSettings,
    state: WorkflowState,
}

impl ForcedWorkflow {
    pub fn new(
        model: Arc<dyn ModelClient>,
        manager: Arc<ClientManager>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            model,
            manager,
            settings,
            state: WorkflowState::Idle,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Run the full pipeline for one query
    pub async fn run(&mut self, topic: &str) -> PipelineOutcome {
        self.run_with_limit(topic, None).await
    }

    /// Run with a per-run override of the configured search result cap
    /// (prompts may bind their own paper count)
    pub async fn run_with_limit(
        &mut self,
        topic: &str,
        max_results: Option<u32>,
    ) -> PipelineOutcome {
        self.state = WorkflowState::Idle;
        let limit = max_results.unwrap_or(self.settings.max_results);
        match self.drive(topic, limit).await {
            Ok((summary, papers)) => {
                self.state = WorkflowState::Done;
                PipelineOutcome::Done { summary, papers }
            }
            Err(error) => {
                tracing::warn!(state = %self.state, "pipeline failed: {}", error);
                PipelineOutcome::Failed {
                    state: self.state,
                    error,
                }
            }
        }
    }

    async fn drive(&mut self, topic: &str, max_results: u32) -> Result<(String, Vec<Value>)> {
        // Idle -> Searching
        self.state = WorkflowState::Searching;
        tracing::info!(topic, tool = %self.settings.search_tool, "searching");
        let search_result = self
            .manager
            .call_tool(
                &self.settings.search_tool,
                json!({ "topic": topic, "max_results": max_results }),
            )
            .await?;

        let ids = extract_identifiers(&search_result.structured_content, &search_result.to_text());
        if ids.is_empty() {
            // Zero results is a reported error, not a default summary
            return Err(Error::EmptySearch {
                topic: topic.to_string(),
            });
        }
        tracing::info!("found {} paper(s)", ids.len());

        // Searching -> Extracting. Sequential on purpose: output ordering
        // must be deterministic.
        self.state = WorkflowState::Extracting;
        let mut papers = Vec::with_capacity(ids.len());
        for id in &ids {
            tracing::debug!(paper = %id, tool = %self.settings.extract_tool, "extracting");
            let result = self
                .manager
                .call_tool(&self.settings.extract_tool, json!({ "paper_id": id }))
                .await?;
            let text = result.to_text();
            papers.push(serde_json::from_str(&text).unwrap_or(Value::String(text)));
        }

        // Extracting -> Summarizing: the model, not a tool
        self.state = WorkflowState::Summarizing;
        let prompt = format!(
            "Based on the following research papers about '{}', please provide a brief summary:\n\n\
             Papers found:\n{}\n\n\
             Please summarize the key findings and relevance of these papers.",
            topic,
            serde_json::to_string_pretty(&papers).unwrap_or_default()
        );

        let reply = self.model.chat(&[ChatMessage::user(prompt)], None).await?;
        let summary = match reply {
            ModelReply::Text(text) => text,
            ModelReply::ToolCalls(_) => {
                return Err(Error::Model(
                    "model requested tool calls during summarization".to_string(),
                ))
            }
        };

        Ok((summary, papers))
    }
}

/// Pull paper identifiers out of a search result: the structured payload
/// first, then the text content parsed as a JSON string array.
fn extract_identifiers(structured: &Option<Value>, text: &str) -> Vec<String> {
    let from_value = |value: &Value| -> Vec<String> {
        value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    if let Some(structured) = structured {
        let candidate = structured.get("result").unwrap_or(structured);
        let ids = from_value(candidate);
        if !ids.is_empty() {
            return ids;
        }
    }

    serde_json::from_str::<Value>(text)
        .map(|value| from_value(&value))
        .unwrap_or_default()
}
