//! OpenAI-compatible chat completion client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{
    InferenceOptions, InferenceOutput, InferenceProvider, ModelStyle, ProviderError, ProviderResult,
    ResponseMetadata,
};
use crate::cases::{ChatMessage, TestCase, ToolDefinition};
use crate::config::ProviderConfig;
use crate::runner::RateLimiter;

const RELEASED_TOOLS_NOTE: &str = "The following functions are now also available to you:\n";

const PROMPTING_SYSTEM_PROMPT: &str = "You are an expert in composing functions. You are given a question \
and a set of possible functions. Based on the question, make one or more function calls to achieve the \
purpose. If none of the functions can be used, point it out. If the given question lacks the parameters \
required by the function, also point it out. Respond only with the function calls in the format \
[func_name1(params_name1=params_value1, params_name2=params_value2...), func_name2(params)]. \
Here is the list of functions you can invoke, in JSON format:\n";

/// Client for any endpoint speaking the OpenAI chat completions protocol
pub struct OpenAiCompatClient {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    function_calling: bool,
    max_tokens: u32,
}

impl OpenAiCompatClient {
    pub fn new(name: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(500)),
            function_calling: true,
            max_tokens: 4096,
        }
    }

    /// Build from a `[providers.<name>]` entry; the API key comes from the
    /// configured environment variable
    pub fn from_config(name: &str, config: &ProviderConfig) -> ProviderResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ProviderError::Config(format!("{} not set", config.api_key_env)))?;

        Ok(Self::new(name, &config.model, api_key)
            .with_base_url(&config.base_url)
            .with_rate_limit(config.rpm)
            .with_function_calling(config.function_calling)
            .with_max_tokens(config.max_tokens))
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set requests per minute
    pub fn with_rate_limit(mut self, rpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm));
        self
    }

    pub fn with_function_calling(mut self, enabled: bool) -> Self {
        self.function_calling = enabled;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, body: &ChatRequest<'_>) -> ProviderResult<ChatResponse> {
        self.rate_limiter.acquire().await;

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(error) => error.error.message,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "<[Value]>::is_empty")]
    tools: &'a [Value],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.clone(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Map a dataset type name onto its JSON-schema counterpart
fn schema_type(name: &str) -> &str {
    match name {
        "dict" | "HashMap" | "Hashtable" => "object",
        "float" | "double" => "number",
        "tuple" | "list" | "ArrayList" | "Array" | "Queue" | "Stack" => "array",
        "any" | "Any" | "char" | "String" => "string",
        "bool" => "boolean",
        "byte" | "short" | "long" | "Bigint" => "integer",
        other => other,
    }
}

fn to_json_schema(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(ty)) = map.get("type") {
                let mapped = schema_type(ty).to_string();
                map.insert("type".to_string(), Value::String(mapped));
            }
            map.values_mut().for_each(to_json_schema);
        }
        Value::Array(items) => items.iter_mut().for_each(to_json_schema),
        _ => {}
    }
}

/// Function-tool entry for one catalog tool. Dots are not allowed in tool
/// names, so the normalized name is sent.
pub fn to_tool(tool: &ToolDefinition) -> Value {
    let mut parameters = serde_json::to_value(&tool.parameters).unwrap_or_else(|_| json!({}));
    to_json_schema(&mut parameters);
    json!({
        "type": "function",
        "function": {
            "name": tool.normalized_name(),
            "description": tool.description,
            "parameters": parameters,
        }
    })
}

fn prompting_system_message(tools: &[&ToolDefinition]) -> WireMessage {
    let listing = serde_json::to_string_pretty(tools).unwrap_or_default();
    WireMessage {
        role: "system".to_string(),
        content: format!("{}{}", PROMPTING_SYSTEM_PROMPT, listing),
    }
}

/// Prompting models only see tools through the conversation, so tools released
/// mid-case are announced in a note of their own
fn released_tools_message(tools: &[&ToolDefinition]) -> WireMessage {
    let listing = serde_json::to_string_pretty(tools).unwrap_or_default();
    WireMessage {
        role: "system".to_string(),
        content: format!("{}{}", RELEASED_TOOLS_NOTE, listing),
    }
}

/// Decoded reply of one turn: `[{name: arguments}]` for tool calls, else the text
fn turn_output(message: &ResponseMessage) -> Value {
    if message.tool_calls.is_empty() {
        return Value::String(message.content.clone().unwrap_or_default());
    }
    message
        .tool_calls
        .iter()
        .map(|call| {
            let mut entry = Map::new();
            entry.insert(call.function.name.clone(), Value::String(call.function.arguments.clone()));
            Value::Object(entry)
        })
        .collect()
}

/// What the model said, as carried into the next turn's history
fn history_text(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl InferenceProvider for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn style(&self) -> ModelStyle {
        if self.function_calling {
            ModelStyle::ToolCalling
        } else {
            ModelStyle::Prompting
        }
    }

    async fn run(&self, case: TestCase, options: &InferenceOptions) -> ProviderResult<InferenceOutput> {
        let multi_turn = case.is_multi_turn();
        let mut catalog: Vec<&ToolDefinition> = case.function.iter().collect();
        let mut messages: Vec<WireMessage> = Vec::new();

        let mut outputs = Vec::with_capacity(case.question.len());
        let mut input_tokens = Vec::new();
        let mut output_tokens = Vec::new();
        let mut latencies = Vec::new();
        let mut input_log = Vec::new();

        for (turn, user_messages) in case.question.iter().enumerate() {
            let released = case.holdouts_for_turn(turn);
            catalog.extend(released.iter().copied());

            if !self.function_calling {
                if turn == 0 {
                    messages.push(prompting_system_message(&catalog));
                } else if !released.is_empty() {
                    messages.push(released_tools_message(&released));
                }
            }
            messages.extend(user_messages.iter().map(WireMessage::from));

            let tools: Vec<Value> = if self.function_calling {
                catalog.iter().map(|tool| to_tool(tool)).collect()
            } else {
                Vec::new()
            };
            let body = ChatRequest {
                model: &self.model,
                messages: &messages,
                temperature: options.temperature,
                max_tokens: self.max_tokens,
                tools: &tools,
            };

            if options.include_input_log {
                input_log.push(json!({ "message": &messages, "tools": &tools }));
            }

            let start = Instant::now();
            let response = self.complete(&body).await?;
            latencies.push(start.elapsed().as_secs_f64());

            let message = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?
                .message;
            let (prompt, completion) = response
                .usage
                .map(|u| (u.prompt_tokens, u.completion_tokens))
                .unwrap_or((0, 0));
            input_tokens.push(prompt);
            output_tokens.push(completion);

            let output = turn_output(&message);
            tracing::debug!(case_id = %case.id, turn, "Turn complete");
            messages.push(WireMessage {
                role: "assistant".to_string(),
                content: history_text(&output),
            });
            outputs.push(output);
        }

        // single-turn cases store scalars, multi-turn cases one entry per turn
        let collapse = |values: Vec<Value>| -> Value {
            if multi_turn || values.len() != 1 {
                Value::Array(values)
            } else {
                values.into_iter().next().unwrap_or(Value::Null)
            }
        };

        let result = if multi_turn {
            Value::Array(outputs.into_iter().map(|o| Value::Array(vec![o])).collect())
        } else {
            collapse(outputs)
        };

        let metadata = ResponseMetadata {
            input_token_count: Some(collapse(input_tokens.into_iter().map(Value::from).collect())),
            output_token_count: Some(collapse(output_tokens.into_iter().map(Value::from).collect())),
            latency: Some(collapse(latencies.into_iter().map(Value::from).collect())),
            inference_log: options.include_input_log.then(|| Value::Array(input_log)),
            ..Default::default()
        };

        Ok(InferenceOutput { result, metadata })
    }
}
