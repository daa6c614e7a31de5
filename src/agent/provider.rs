//! Chat backends for the reporting agent.
//!
//! The agent loop talks to one [`ChatBackend`]; each backend converts the
//! shared message history to its provider's wire format and back.

use crate::agent::tools::{FunctionCall, ToolCall, ToolDefinition};
use crate::config::{ModelConfig, ProviderKind};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

/// Message in the chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Id of the call a `tool` message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool a `tool` message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(turn: &AssistantTurn) -> Self {
        Self {
            tool_calls: (!turn.tool_calls.is_empty()).then(|| turn.tool_calls.clone()),
            ..Self::plain("assistant", turn.content.clone())
        }
    }

    pub fn tool(call: &ToolCall, content: String) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: Some(call.function.name.clone()),
            ..Self::plain("tool", content)
        }
    }
}

/// One model reply: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Provider name for logs and report metadata.
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, ProviderError>;
}

/// Pick and build the backend for the configured model.
pub fn build_backend(
    config: &ModelConfig,
    user_id: &str,
) -> Result<Box<dyn ChatBackend>, ProviderError> {
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let http = Http {
        client: http_client,
        timeout_seconds: config.timeout_seconds,
    };

    let backend: Box<dyn ChatBackend> = match config.provider.resolve(&config.name) {
        ProviderKind::Openai => {
            let api_key = config
                .openai_api_key
                .clone()
                .ok_or(ProviderError::MissingApiKey("OPENAI_API_KEY"))?;
            Box::new(OpenAiBackend {
                http,
                base_url: config.openai_url.trim_end_matches('/').to_string(),
                model: config
                    .name
                    .strip_prefix("openai/")
                    .unwrap_or(&config.name)
                    .to_string(),
                api_key,
                temperature: config.temperature,
                user_id: user_id.to_string(),
            })
        }
        ProviderKind::Gemini => {
            let api_key = config
                .google_api_key
                .clone()
                .ok_or(ProviderError::MissingApiKey("GOOGLE_API_KEY"))?;
            Box::new(GeminiBackend {
                http,
                base_url: config.gemini_url.trim_end_matches('/').to_string(),
                model: config
                    .name
                    .trim_start_matches("gemini/")
                    .trim_start_matches("models/")
                    .to_string(),
                api_key,
                temperature: config.temperature,
            })
        }
        ProviderKind::Ollama | ProviderKind::Auto => Box::new(OllamaBackend {
            http,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.name.clone(),
            temperature: config.temperature,
        }),
    };

    debug!("Using {} backend with model {}", backend.name(), backend.model());
    Ok(backend)
}

/// HTTP plumbing shared by the backends.
struct Http {
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl Http {
    async fn send<T: DeserializeOwned>(
        &self,
        provider: &'static str,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<T, ProviderError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    provider,
                    seconds: self.timeout_seconds,
                }
            } else if e.is_connect() {
                ProviderError::Connect {
                    provider,
                    url: url.to_string(),
                }
            } else {
                ProviderError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider,
                status,
                body,
            });
        }

        response.json().await.map_err(|e| ProviderError::Decode {
            provider,
            detail: e.to_string(),
        })
    }
}

/// Tool arguments arrive as objects from some providers and JSON strings from others.
fn parse_arguments(raw: Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Value::Null => json!({}),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

pub struct OllamaBackend {
    http: Http,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    stream: bool,
    options: OllamaOptions,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

fn ollama_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut value = json!({ "role": m.role, "content": m.content });
            if let Some(calls) = &m.tool_calls {
                value["tool_calls"] = json!(calls
                    .iter()
                    .map(|c| json!({
                        "function": { "name": c.function.name, "arguments": c.function.arguments }
                    }))
                    .collect::<Vec<_>>());
            }
            if let (Some(name), "tool") = (&m.name, m.role.as_str()) {
                value["tool_name"] = json!(name);
            }
            value
        })
        .collect()
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: &self.model,
            messages: ollama_messages(messages),
            tools,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        debug!("Sending Ollama chat request with {} messages", messages.len());
        let response: OllamaChatResponse = self
            .http
            .send(self.name(), self.http.client.post(&url).json(&request), &url)
            .await?;

        Ok(AssistantTurn {
            content: response.message.content,
            tool_calls: response
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|mut call| {
                    call.function.arguments = parse_arguments(call.function.arguments);
                    call
                })
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

pub struct OpenAiBackend {
    http: Http,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn openai_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut value = json!({ "role": m.role, "content": m.content });
            if let Some(calls) = &m.tool_calls {
                value["tool_calls"] = json!(calls
                    .iter()
                    .enumerate()
                    .map(|(i, c)| json!({
                        "id": c.id.clone().unwrap_or_else(|| format!("call_{}", i)),
                        "type": "function",
                        "function": {
                            "name": c.function.name,
                            "arguments": c.function.arguments.to_string(),
                        }
                    }))
                    .collect::<Vec<_>>());
            }
            if let Some(id) = &m.tool_call_id {
                value["tool_call_id"] = json!(id);
            }
            value
        })
        .collect()
}

fn openai_turn(response: OpenAiResponse) -> Result<AssistantTurn, ProviderError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Decode {
            provider: "openai",
            detail: "response has no choices".to_string(),
        })?;

    Ok(AssistantTurn {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: Some(call.id),
                function: FunctionCall {
                    name: call.function.name,
                    arguments: parse_arguments(Value::String(call.function.arguments)),
                },
            })
            .collect(),
    })
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = json!({
            "model": self.model,
            "messages": openai_messages(messages),
            "temperature": self.temperature,
            "user": self.user_id,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!("Sending OpenAI chat request with {} messages", messages.len());
        let response: OpenAiResponse = self
            .http
            .send(
                self.name(),
                self.http
                    .client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body),
                &url,
            )
            .await?;

        openai_turn(response)
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

pub struct GeminiBackend {
    http: Http,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

/// System instruction plus `contents` for a Gemini request.
fn gemini_contents(messages: &[ChatMessage]) -> (Option<Value>, Vec<Value>) {
    let mut system = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        match message.role.as_str() {
            "system" => system.push(json!({ "text": message.content })),
            "assistant" => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(json!({ "text": message.content }));
                }
                for call in message.tool_calls.iter().flatten() {
                    parts.push(json!({
                        "functionCall": { "name": call.function.name, "args": call.function.arguments }
                    }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            "tool" => {
                let response = serde_json::from_str::<Value>(&message.content)
                    .unwrap_or_else(|_| Value::String(message.content.clone()));
                let part = json!({
                    "functionResponse": {
                        "name": message.name.clone().unwrap_or_default(),
                        "response": { "content": response }
                    }
                });
                // consecutive tool results go back in a single turn
                match contents.last_mut() {
                    Some(last) if last["role"] == "function" => {
                        if let Some(parts) = last["parts"].as_array_mut() {
                            parts.push(part);
                        }
                    }
                    _ => contents.push(json!({ "role": "function", "parts": [part] })),
                }
            }
            _ => contents.push(json!({ "role": "user", "parts": [{ "text": message.content }] })),
        }
    }

    let system = (!system.is_empty()).then(|| json!({ "parts": system }));
    (system, contents)
}

fn gemini_tools(tools: &[ToolDefinition]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            let mut declaration = Map::new();
            declaration.insert("name".to_string(), json!(t.function.name));
            declaration.insert("description".to_string(), json!(t.function.description));
            // parameterless functions must omit the schema entirely
            let has_properties = t.function.parameters["properties"]
                .as_object()
                .map(|p| !p.is_empty())
                .unwrap_or(false);
            if has_properties {
                declaration.insert("parameters".to_string(), t.function.parameters.clone());
            }
            Value::Object(declaration)
        })
        .collect();
    json!([{ "functionDeclarations": declarations }])
}

fn gemini_turn(response: Value) -> Result<AssistantTurn, ProviderError> {
    let parts = response["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| ProviderError::Decode {
            provider: "gemini",
            detail: format!(
                "response has no content parts (finishReason: {})",
                response["candidates"][0]["finishReason"]
            ),
        })?;

    let mut turn = AssistantTurn::default();
    for (i, part) in parts.iter().enumerate() {
        if let Some(text) = part["text"].as_str() {
            turn.content.push_str(text);
        }
        if let Some(name) = part["functionCall"]["name"].as_str() {
            turn.tool_calls.push(ToolCall {
                id: Some(format!("gemini_call_{}", i)),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: parse_arguments(part["functionCall"]["args"].clone()),
                },
            });
        }
    }
    Ok(turn)
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let (system, contents) = gemini_contents(messages);

        let mut body = json!({
            "contents": contents,
            "generationConfig": { "temperature": self.temperature },
        });
        if let Some(system) = system {
            body["systemInstruction"] = system;
        }
        if !tools.is_empty() {
            body["tools"] = gemini_tools(tools);
        }

        debug!("Sending Gemini request with {} messages", messages.len());
        let response: Value = self
            .http
            .send(
                self.name(),
                self.http
                    .client
                    .post(&url)
                    .query(&[("key", self.api_key.as_str())])
                    .json(&body),
                &url,
            )
            .await?;

        gemini_turn(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::get_tool_definitions;

    fn call(id: Option<&str>, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.map(str::to_string),
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }

    fn history() -> Vec<ChatMessage> {
        let turn = AssistantTurn {
            content: String::new(),
            tool_calls: vec![
                call(Some("call_a"), "list_sources", json!({})),
                call(Some("call_b"), "get_execution_date_info", json!({})),
            ],
        };
        vec![
            ChatMessage::system("be precise"),
            ChatMessage::user("report for 2025-09-08"),
            ChatMessage::assistant(&turn),
            ChatMessage::tool(&turn.tool_calls[0], r#"{"sources": []}"#.to_string()),
            ChatMessage::tool(&turn.tool_calls[1], "plain text".to_string()),
        ]
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(json!("")), json!({}));
        assert_eq!(parse_arguments(json!(r#"{"source_id":"1"}"#)), json!({"source_id": "1"}));
        assert_eq!(parse_arguments(Value::Null), json!({}));
        assert_eq!(parse_arguments(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn test_openai_messages_keep_call_ids() {
        let messages = openai_messages(&history());
        assert_eq!(messages[2]["tool_calls"][1]["id"], "call_b");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_a");
    }

    #[test]
    fn test_openai_turn_parses_string_arguments() {
        let response: OpenAiResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_source_cv_and_data", "arguments": "{\"source_id\": \"195385\"}"}
                    }]
                }
            }]
        }))
        .unwrap();

        let turn = openai_turn(response).unwrap();
        assert_eq!(turn.content, "");
        assert_eq!(turn.tool_calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(turn.tool_calls[0].function.arguments["source_id"], "195385");
    }

    #[test]
    fn test_openai_turn_without_choices_is_decode_error() {
        let response = OpenAiResponse { choices: vec![] };
        assert!(matches!(
            openai_turn(response),
            Err(ProviderError::Decode { .. })
        ));
    }

    #[test]
    fn test_gemini_contents_group_tool_results() {
        let (system, contents) = gemini_contents(&history());
        assert_eq!(system.unwrap()["parts"][0]["text"], "be precise");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "list_sources");

        let responses = contents[2]["parts"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0]["functionResponse"]["response"]["content"]["sources"],
            json!([])
        );
        assert_eq!(
            responses[1]["functionResponse"]["response"]["content"],
            "plain text"
        );
    }

    #[test]
    fn test_gemini_tools_omit_empty_schemas() {
        let tools = gemini_tools(&get_tool_definitions());
        let declarations = tools[0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(declarations.len(), 3);
        assert!(declarations[0].get("parameters").is_none());
        assert!(declarations[1].get("parameters").is_some());
    }

    #[test]
    fn test_gemini_turn() {
        let turn = gemini_turn(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "checking"},
                        {"functionCall": {"name": "list_sources", "args": {}}}
                    ]
                }
            }]
        }))
        .unwrap();
        assert_eq!(turn.content, "checking");
        assert_eq!(turn.tool_calls.len(), 1);

        assert!(gemini_turn(json!({"candidates": []})).is_err());
    }

    #[test]
    fn test_ollama_messages() {
        let messages = ollama_messages(&history());
        assert_eq!(messages[2]["tool_calls"][0]["function"]["name"], "list_sources");
        assert_eq!(messages[3]["tool_name"], "list_sources");
        assert!(messages[3].get("tool_call_id").is_none());
    }

    #[test]
    fn test_build_backend_selects_provider() {
        let mut config = ModelConfig {
            name: "llama3.2:latest".to_string(),
            ..ModelConfig::default()
        };
        assert_eq!(build_backend(&config, "ops").unwrap().name(), "ollama");

        config.name = "gpt-4o-mini".to_string();
        config.openai_api_key = None;
        assert!(matches!(
            build_backend(&config, "ops").err(),
            Some(ProviderError::MissingApiKey("OPENAI_API_KEY"))
        ));

        config.openai_api_key = Some("sk-test".to_string());
        let backend = build_backend(&config, "ops").unwrap();
        assert_eq!(backend.name(), "openai");
        assert_eq!(backend.model(), "gpt-4o-mini");

        config.name = "gemini-2.5-flash".to_string();
        config.google_api_key = Some("key".to_string());
        assert_eq!(build_backend(&config, "ops").unwrap().name(), "gemini");
    }
}
