mod client;
pub(crate) mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AiError, Result};
use crate::retry::RetryPolicy;
use crate::schema::StructuredOutput;
use crate::tool::DynTool;

use client::ClaudeClient;
use types::*;

const STRUCTURED_TOOL: &str = "structured_response";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    model: String,
    client: ClaudeClient,
}

/// One tool invocation made during an agent loop.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub input: serde_json::Value,
    pub ok: bool,
}

/// Outcome of [`Claude::run_tools`].
#[derive(Debug, Clone, Default)]
pub struct AgentTranscript {
    /// Final assistant text, absent when the step budget ran out mid-loop.
    pub final_text: Option<String>,
    /// Model round-trips performed.
    pub steps: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    /// True when the loop stopped because `max_steps` was reached.
    pub exhausted: bool,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            client: ClaudeClient::new(api_key.into(), DEFAULT_TIMEOUT),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.client.base_url = url.into();
        self
    }

    /// Per-request timeout; a timed-out attempt counts against the retry budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.client.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask for a `T` via a forced tool call and deserialize the tool input.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        debug!(type_name = T::type_name(), "Claude structured extraction");

        let request = ChatRequest::new(&self.model)
            .system(system_prompt)
            .temperature(0.0)
            .message(WireMessage::user(user_prompt))
            .tool(ToolSpec {
                name: STRUCTURED_TOOL.to_string(),
                description: "Return the requested data in this exact structure.".to_string(),
                input_schema: T::input_schema(),
            })
            .tool_choice(ToolChoice::Tool {
                name: STRUCTURED_TOOL.to_string(),
            });

        let response = self.client.chat(&request).await?;

        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { input, .. } => Some(input),
                _ => None,
            })
            .ok_or_else(|| AiError::Parse("no structured output in Claude response".into()))
            .and_then(|input| serde_json::from_value(input).map_err(AiError::from))
    }

    /// Let the model call `tools` for at most `max_steps` round-trips.
    ///
    /// Tool failures are reported back to the model as error results rather
    /// than aborting the loop. Running out of steps is not an error: the
    /// transcript is returned with `exhausted` set.
    pub async fn run_tools(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
        tools: &[Arc<dyn DynTool>],
        max_steps: usize,
    ) -> Result<AgentTranscript> {
        let mut request = ChatRequest::new(&self.model)
            .system(system)
            .max_tokens(2048)
            .message(WireMessage::user(user));
        for tool in tools {
            let def = tool.definition();
            request = request.tool(ToolSpec {
                name: def.name,
                description: def.description,
                input_schema: def.parameters,
            });
        }
        if !tools.is_empty() {
            request = request.tool_choice(ToolChoice::Auto);
        }

        let mut transcript = AgentTranscript::default();

        while transcript.steps < max_steps {
            transcript.steps += 1;
            let response = self.client.chat(&request).await?;

            if !response.wants_tools() {
                transcript.final_text = response.text();
                return Ok(transcript);
            }

            let mut results = Vec::new();
            for block in &response.content {
                let ContentBlock::ToolUse { id, name, input } = block else {
                    continue;
                };
                let outcome = match tools.iter().find(|t| t.name() == name.as_str()) {
                    Some(tool) => tool.call_json(input.clone()).await,
                    None => Err(format!("unknown tool: {name}")),
                };
                debug!(tool = %name, ok = outcome.is_ok(), step = transcript.steps, "Tool call");

                transcript.tool_calls.push(ToolCallRecord {
                    name: name.clone(),
                    input: input.clone(),
                    ok: outcome.is_ok(),
                });

                let (content, is_error) = match outcome {
                    Ok(value) => (serde_json::to_string(&value)?, false),
                    Err(e) => (e, true),
                };
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id.clone(),
                    content,
                    is_error,
                });
            }

            request
                .messages
                .push(WireMessage::assistant_blocks(response.content));
            request.messages.push(WireMessage::tool_results(results));
        }

        warn!(max_steps, tool_calls = transcript.tool_calls.len(), "Agent step budget exhausted");
        transcript.exhausted = true;
        Ok(transcript)
    }
}
