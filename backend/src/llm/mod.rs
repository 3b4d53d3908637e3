// backend/src/llm/mod.rs
//
// Provider abstraction for streaming chat completions. The orchestrator only
// sees this interface; Anthropic specifics live in `anthropic.rs`.

use crate::models::turns::ContentBlock;
use futures::stream::Stream;
use serde_json::Value as JsonValue;
use std::pin::Pin;
use thiserror::Error;

pub mod anthropic;
pub mod embeddings;

pub use embeddings::{EmbeddingClient, EmbeddingInputType};

/// Provider error kinds, classified for the retry driver: rate limits retry
/// with exponential backoff, transient failures retry once, fatal errors
/// surface immediately.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type ChatStreamItem = Result<StreamEvent, LlmError>;
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatStreamItem> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    User,
    Assistant,
}

/// One prior turn as conveyed to the provider. Tool-result turns travel
/// under the user role with `ToolResult` blocks.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub blocks: Vec<ContentBlock>,
}

impl ProviderMessage {
    pub fn user(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: ProviderRole::User,
            blocks,
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: ProviderRole::Assistant,
            blocks,
        }
    }
}

/// A tool exposed to the model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: JsonValue,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    /// Extended reasoning token budget; `None` disables reasoning.
    pub reasoning_budget: Option<u32>,
}

/// Normalized streaming events from the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ToolUseStart {
        index: usize,
        id: String,
        name: String,
    },
    ToolInputDelta {
        index: usize,
        partial_json: String,
    },
    BlockStop {
        index: usize,
    },
    Done {
        stop_reason: Option<String>,
    },
}

#[async_trait::async_trait]
pub trait AiClient: Send + Sync {
    /// Opens a streaming completion. The returned stream yields normalized
    /// events and terminates after `StreamEvent::Done` (or an error).
    async fn stream_chat(&self, model: &str, request: ChatRequest) -> Result<ChatStream, LlmError>;
}

/// Assembles the model's structured output from the event stream.
///
/// Text deltas concatenate, in order, into text blocks; tool-use blocks
/// collect their streamed partial-JSON input. The result is the pending
/// assistant turn's block list.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    blocks: Vec<PendingBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug)]
enum PendingBlock {
    Text(String),
    ToolUse {
        index: usize,
        id: String,
        name: String,
        input_json: String,
    },
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta(text) => match self.blocks.last_mut() {
                Some(PendingBlock::Text(buf)) => buf.push_str(text),
                _ => self.blocks.push(PendingBlock::Text(text.clone())),
            },
            StreamEvent::ToolUseStart { index, id, name } => {
                self.blocks.push(PendingBlock::ToolUse {
                    index: *index,
                    id: id.clone(),
                    name: name.clone(),
                    input_json: String::new(),
                });
            }
            StreamEvent::ToolInputDelta {
                index,
                partial_json,
            } => {
                if let Some(PendingBlock::ToolUse { input_json, .. }) =
                    self.blocks.iter_mut().rev().find(|b| {
                        matches!(b, PendingBlock::ToolUse { index: i, .. } if i == index)
                    })
                {
                    input_json.push_str(partial_json);
                }
            }
            StreamEvent::Done { stop_reason } => {
                self.stop_reason.clone_from(stop_reason);
            }
            StreamEvent::ReasoningDelta(_) | StreamEvent::BlockStop { .. } => {}
        }
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Finalizes into content blocks. Tool inputs that fail to parse fall
    /// back to an empty object so the dispatcher can still surface an error
    /// string through the tool result.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        self.blocks
            .into_iter()
            .filter_map(|block| match block {
                PendingBlock::Text(text) => {
                    if text.is_empty() {
                        None
                    } else {
                        Some(ContentBlock::Text { text })
                    }
                }
                PendingBlock::ToolUse {
                    id,
                    name,
                    input_json,
                    ..
                } => {
                    let input = if input_json.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&input_json)
                            .unwrap_or_else(|_| serde_json::json!({}))
                    };
                    Some(ContentBlock::ToolUse { id, name, input })
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_concatenates_text_deltas_in_order() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&StreamEvent::TextDelta("Equipment ".into()));
        acc.push(&StreamEvent::TextDelta("and systems".into()));
        acc.push(&StreamEvent::Done {
            stop_reason: Some("end_turn".into()),
        });
        assert_eq!(acc.stop_reason(), Some("end_turn"));
        let blocks = acc.into_blocks();
        assert_eq!(
            blocks,
            vec![ContentBlock::Text {
                text: "Equipment and systems".into()
            }]
        );
    }

    #[test]
    fn accumulator_assembles_tool_input_json() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&StreamEvent::TextDelta("Looking that up.".into()));
        acc.push(&StreamEvent::ToolUseStart {
            index: 1,
            id: "toolu_01".into(),
            name: "fetch_cfr_section".into(),
        });
        acc.push(&StreamEvent::ToolInputDelta {
            index: 1,
            partial_json: "{\"part\": 25,".into(),
        });
        acc.push(&StreamEvent::ToolInputDelta {
            index: 1,
            partial_json: " \"section\": \"1309\"}".into(),
        });
        acc.push(&StreamEvent::BlockStop { index: 1 });

        let blocks = acc.into_blocks();
        assert_eq!(blocks.len(), 2);
        match &blocks[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_01");
                assert_eq!(name, "fetch_cfr_section");
                assert_eq!(input["part"], 25);
                assert_eq!(input["section"], "1309");
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn accumulator_defaults_unparseable_tool_input_to_empty_object() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&StreamEvent::ToolUseStart {
            index: 0,
            id: "toolu_02".into(),
            name: "search_drs".into(),
        });
        acc.push(&StreamEvent::ToolInputDelta {
            index: 0,
            partial_json: "{\"keywords\": [\"HIRF".into(),
        });
        let blocks = acc.into_blocks();
        match &blocks[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(*input, serde_json::json!({}));
            }
            other => panic!("expected tool_use block, got {other:?}"),
        }
    }
}
