//! OpenAI-compatible chat completions provider.
//!
//! Works against any endpoint speaking the Chat Completions dialect; the
//! base URL, model, and API key env var come from settings.

use super::{ChatMessage, ModelClient, ModelReply, Role, ToolCallRequest, ToolSchema};
use crate::config::ModelSettings;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(settings: &ModelSettings) -> Self {
        let api_key = std::env::var(&settings.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; model requests will be unauthenticated",
                settings.api_key_env
            );
        }
        Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the wire format
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_calls = m.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        call_type: "function".to_string(),
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect()
            });
            WireMessage {
                role,
                content: if m.content.is_empty() && tool_calls.is_some() {
                    None
                } else {
                    Some(m.content.clone())
                },
                tool_call_id: m.tool_call_id.clone(),
                tool_calls,
            }
        })
        .collect()
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
    ) -> Result<ModelReply> {
        let wire_tools = tools.filter(|t| !t.is_empty()).map(|tools| {
            tools
                .iter()
                .map(|t| WireTool {
                    tool_type: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect::<Vec<_>>()
        });

        let body = WireRequest {
            model: &self.model,
            messages: convert_messages(messages),
            tool_choice: wire_tools.as_ref().map(|_| "auto"),
            tools: wire_tools,
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Model(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("{}: {}", status, detail)));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::Model(format!("unparseable response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Model("response has no choices".to_string()))?;

        let calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::Null),
            })
            .collect();

        if calls.is_empty() {
            Ok(ModelReply::Text(choice.message.content.unwrap_or_default()))
        } else {
            Ok(ModelReply::ToolCalls(calls))
        }
    }
}
