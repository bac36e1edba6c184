//! OpenAI-compatible chat adapter.
//!
//! Works with any endpoint exposing `/chat/completions`, which covers both
//! configured providers: OpenAI directly and Gemini through its
//! OpenAI-compatible surface. Tool calling is mapped both ways; streaming
//! is not used by the run loop and is not implemented here.

use async_trait::async_trait;
use ema_core::{
    Content, GenerateRequest, LlmClient, LlmError, LlmResponse, Message, ToolCall,
    ToolDefinition,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// An OpenAI-compatible chat client bound to one model.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        http_proxy: Option<&str>,
        https_proxy: Option<&str>,
    ) -> Result<Self, LlmError> {
        let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(120));
        if let Some(proxy) = http_proxy {
            builder = builder.proxy(
                reqwest::Proxy::http(proxy).map_err(|e| LlmError::Network(e.to_string()))?,
            );
        }
        if let Some(proxy) = https_proxy {
            builder = builder.proxy(
                reqwest::Proxy::https(proxy).map_err(|e| LlmError::Network(e.to_string()))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Convert our messages to the wire format.
    fn to_api_messages(request: &GenerateRequest) -> Vec<ApiMessage> {
        let mut api = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system_prompt {
            api.push(ApiMessage {
                role: "system".into(),
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for (index, message) in request.messages.iter().enumerate() {
            match message {
                Message::User { contents, .. } => api.push(ApiMessage {
                    role: "user".into(),
                    content: Some(join_text(contents)),
                    tool_calls: None,
                    tool_call_id: None,
                }),
                Message::Model {
                    contents,
                    tool_calls,
                } => api.push(ApiMessage {
                    role: "assistant".into(),
                    content: Some(join_text(contents)),
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            tool_calls
                                .iter()
                                .enumerate()
                                .map(|(i, tc)| ApiToolCall {
                                    id: tc
                                        .id
                                        .clone()
                                        .unwrap_or_else(|| format!("call_{index}_{i}")),
                                    r#type: "function".into(),
                                    function: ApiFunction {
                                        name: tc.name.clone(),
                                        arguments: tc.args.to_string(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: None,
                }),
                Message::Tool { id, name, result } => api.push(ApiMessage {
                    role: "tool".into(),
                    content: Some(
                        serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string()),
                    ),
                    tool_calls: None,
                    tool_call_id: id.clone().or_else(|| Some(name.clone())),
                }),
            }
        }
        api
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

fn join_text(contents: &[Content]) -> String {
    contents
        .iter()
        .map(Content::as_text)
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request),
            "stream": false,
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(client = %self.name, model = %self.model, "Sending completion request");

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            r = send => r.map_err(|e| LlmError::Network(e.to_string()))?,
        };

        let status = response.status().as_u16();
        if status == 429 {
            return Err(LlmError::RateLimited { retry_after_secs: 5 });
        }
        if status == 401 || status == 403 {
            return Err(LlmError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Chat endpoint returned error");
            return Err(LlmError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            r = response.json() => r.map_err(|e| LlmError::InvalidResponse(e.to_string()))?,
        };

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: Some(tc.id),
                name: tc.function.name,
                args: serde_json::from_str(&tc.function.arguments).unwrap_or_default(),
                thought_signature: None,
            })
            .collect();

        let contents = match choice.message.content {
            Some(text) if !text.is_empty() => vec![Content::text(text)],
            _ => vec![],
        };

        Ok(LlmResponse {
            message: Message::Model {
                contents,
                tool_calls,
            },
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
            total_tokens: api_response.usage.map(|u| u.total_tokens),
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}
