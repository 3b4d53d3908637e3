// backend/src/llm/anthropic.rs
//
// Streaming client for the Anthropic messages API. All SSE event parsing and
// history formatting lives here; the rest of the service only sees the
// `AiClient` trait and normalized `StreamEvent`s.

use crate::config::Config;
use crate::errors::AppError;
use crate::llm::{
    AiClient, ChatRequest, ChatStream, LlmError, ProviderRole, StreamEvent,
};
use crate::models::turns::ContentBlock;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as ReqwestClient;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    client: ReqwestClient,
    base_url: String,
    api_key: String,
}

pub fn build_anthropic_client(config: Arc<Config>) -> Result<AnthropicClient, AppError> {
    let api_key = config
        .anthropic_api_key
        .clone()
        .ok_or_else(|| AppError::ConfigError("ANTHROPIC_API_KEY not configured".to_string()))?;

    // No total request timeout: the body is a long-lived event stream and the
    // turn timeout governs overall latency.
    let client = ReqwestClient::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

    Ok(AnthropicClient {
        client,
        base_url: config.anthropic_api_base_url.trim_end_matches('/').to_string(),
        api_key,
    })
}

impl AnthropicClient {
    fn format_messages(messages: &[crate::llm::ProviderMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    ProviderRole::User => "user",
                    ProviderRole::Assistant => "assistant",
                };
                let content: Vec<Value> = msg
                    .blocks
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                        ContentBlock::ToolUse { id, name, input } => json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name,
                            "input": input,
                        }),
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                        } => json!({
                            "type": "tool_result",
                            "tool_use_id": tool_use_id,
                            "content": content,
                        }),
                    })
                    .collect();
                json!({"role": role, "content": content})
            })
            .collect()
    }

    fn build_body(request: &ChatRequest, model: &str) -> Value {
        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": Self::format_messages(&request.messages),
            "stream": true,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if let Some(budget) = request.reasoning_budget {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        }
        body
    }

    fn parse_sse_data(data: &str, stop_reason: &mut Option<String>) -> Option<ChatStreamResult> {
        let v: Value = serde_json::from_str(data).ok()?;
        match v["type"].as_str()? {
            "content_block_start" => {
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    Some(Ok(StreamEvent::ToolUseStart {
                        index: v["index"].as_u64().unwrap_or(0) as usize,
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                    }))
                } else {
                    None
                }
            }
            "content_block_delta" => {
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"]
                        .as_str()
                        .map(|t| Ok(StreamEvent::TextDelta(t.to_string()))),
                    "thinking_delta" => delta["thinking"]
                        .as_str()
                        .map(|t| Ok(StreamEvent::ReasoningDelta(t.to_string()))),
                    "input_json_delta" => Some(Ok(StreamEvent::ToolInputDelta {
                        index: v["index"].as_u64().unwrap_or(0) as usize,
                        partial_json: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                    })),
                    // signature_delta and friends carry no content
                    _ => None,
                }
            }
            "content_block_stop" => Some(Ok(StreamEvent::BlockStop {
                index: v["index"].as_u64().unwrap_or(0) as usize,
            })),
            "message_delta" => {
                if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                    *stop_reason = Some(reason.to_string());
                }
                None
            }
            "message_stop" => Some(Ok(StreamEvent::Done {
                stop_reason: stop_reason.take(),
            })),
            "error" => {
                let message = v["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                error!(%message, "Anthropic stream error event");
                Some(Err(if v["error"]["type"].as_str() == Some("overloaded_error") {
                    LlmError::RateLimited(message)
                } else {
                    LlmError::Fatal(message)
                }))
            }
            _ => None,
        }
    }

    fn classify_status(status: u16, body: &str) -> LlmError {
        let summary: String = body.chars().take(200).collect();
        let message = format!("API error {status}: {summary}");
        match status {
            429 | 529 => LlmError::RateLimited(message),
            500..=528 | 530..=599 => LlmError::Transient(message),
            _ => LlmError::Fatal(message),
        }
    }
}

type ChatStreamResult = Result<StreamEvent, LlmError>;

#[async_trait]
impl AiClient for AnthropicClient {
    #[instrument(skip(self, request), fields(model, messages = request.messages.len(), tools = request.tools.len()))]
    async fn stream_chat(&self, model: &str, request: ChatRequest) -> Result<ChatStream, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request, model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Anthropic request failed to send");
                LlmError::Transient(format!("connection error: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &error_body));
        }

        let mut byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            let mut stop_reason: Option<String> = None;

            while let Some(result) = byte_stream.next().await {
                let bytes = match result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(LlmError::Transient(format!("stream read error: {e}")));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer.drain(..=line_end);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if let Some(item) = Self::parse_sse_data(data, &mut stop_reason) {
                        let terminal =
                            item.is_err() || matches!(item, Ok(StreamEvent::Done { .. }));
                        yield item;
                        if terminal {
                            return;
                        }
                    }
                }
            }

            debug!("Anthropic stream ended without message_stop");
            yield Err(LlmError::Transient(
                "stream closed before message_stop".to_string(),
            ));
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderMessage;

    #[test]
    fn parses_text_and_tool_events() {
        let mut stop = None;
        let event = AnthropicClient::parse_sse_data(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
            &mut stop,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event, StreamEvent::TextDelta("hi".into()));

        let event = AnthropicClient::parse_sse_data(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"search_drs"}}"#,
            &mut stop,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::ToolUseStart {
                index: 1,
                id: "toolu_01".into(),
                name: "search_drs".into()
            }
        );
    }

    #[test]
    fn stop_reason_travels_from_message_delta_to_message_stop() {
        let mut stop = None;
        assert!(AnthropicClient::parse_sse_data(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
            &mut stop,
        )
        .is_none());
        assert_eq!(stop.as_deref(), Some("tool_use"));

        let event =
            AnthropicClient::parse_sse_data(r#"{"type":"message_stop"}"#, &mut stop)
                .unwrap()
                .unwrap();
        assert_eq!(
            event,
            StreamEvent::Done {
                stop_reason: Some("tool_use".into())
            }
        );
    }

    #[test]
    fn text_start_block_is_ignored() {
        let mut stop = None;
        assert!(AnthropicClient::parse_sse_data(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            &mut stop,
        )
        .is_none());
    }

    #[test]
    fn status_classification_matches_retry_policy() {
        assert!(matches!(
            AnthropicClient::classify_status(429, "busy"),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            AnthropicClient::classify_status(529, "overloaded"),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            AnthropicClient::classify_status(503, "unavailable"),
            LlmError::Transient(_)
        ));
        assert!(matches!(
            AnthropicClient::classify_status(401, "bad key"),
            LlmError::Fatal(_)
        ));
    }

    #[test]
    fn tool_results_are_conveyed_under_user_role() {
        let messages = vec![
            ProviderMessage::assistant(vec![ContentBlock::ToolUse {
                id: "toolu_01".into(),
                name: "fetch_cfr_section".into(),
                input: json!({"part": 25, "section": "1309"}),
            }]),
            ProviderMessage::user(vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_01".into(),
                content: "## 14 CFR §25.1309".into(),
            }]),
        ];
        let formatted = AnthropicClient::format_messages(&messages);
        assert_eq!(formatted[0]["role"], "assistant");
        assert_eq!(formatted[0]["content"][0]["type"], "tool_use");
        assert_eq!(formatted[1]["role"], "user");
        assert_eq!(formatted[1]["content"][0]["type"], "tool_result");
        assert_eq!(formatted[1]["content"][0]["tool_use_id"], "toolu_01");
    }

    #[test]
    fn reasoning_budget_enables_thinking() {
        let request = ChatRequest {
            system: "prompt".into(),
            messages: vec![ProviderMessage::user(vec![ContentBlock::text("hi")])],
            tools: vec![],
            max_tokens: 1024,
            reasoning_budget: Some(10_000),
        };
        let body = AnthropicClient::build_body(&request, "claude-sonnet-4-5");
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 10_000);

        let request = ChatRequest {
            reasoning_budget: None,
            ..request
        };
        let body = AnthropicClient::build_body(&request, "claude-sonnet-4-5");
        assert!(body.get("thinking").is_none());
    }
}
