// backend/src/tools/mod.rs
//
// The retrieval tool framework. Tools are pure functions over
// (model inputs, injected context) -> model-facing string. A tool declares
// which contextual slots it consumes (`wants_index`, `wants_fingerprint`);
// the dispatcher fills them from the agent binding and the turn fingerprint.
// Callers never pass these and model-supplied values are discarded.

pub mod aps;
pub mod cfr;
pub mod drs;
pub mod personal_docs;
pub mod search_indexed;

use crate::errors::AppError;
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub type ToolInput = JsonValue;

/// Per-conversation memo of reassembled personal-document text, keyed by
/// `personal_doc_{id}`. Evicted with the conversation.
#[derive(Clone, Default)]
pub struct PersonalDocMemo {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl PersonalDocMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: String, value: String) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(key, value);
        }
    }
}

/// Transient context injected into a tool execution. Built by the dispatcher
/// for each call; the model cannot influence any of it.
#[derive(Clone)]
pub struct ToolContext {
    pub index_name: String,
    pub fingerprint: Option<String>,
    pub memo: PersonalDocMemo,
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("{0}")]
    ExecutionFailed(String),
    #[error("{0}")]
    App(#[from] AppError),
}

#[async_trait]
pub trait RetrievalTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema for the model-supplied inputs. Injected slots do not
    /// appear here.
    fn input_schema(&self) -> JsonValue;

    /// Contextual slots this tool consumes.
    fn wants_index(&self) -> bool {
        false
    }

    fn wants_fingerprint(&self) -> bool {
        false
    }

    /// Upper bound on one execution; exceeding it surfaces as an error
    /// string in the tool result.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Process-wide, immutable-after-init tool catalog.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn RetrievalTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn RetrievalTool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RetrievalTool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions for one agent, in the agent's catalog order, with
    /// per-agent description overrides applied.
    pub fn definitions_for(&self, agent: &crate::agents::AgentConfig) -> Vec<ToolDefinition> {
        agent
            .tools
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let description = agent
                    .tool_description_overrides
                    .get(tool.name())
                    .cloned()
                    .unwrap_or_else(|| tool.description().to_string());
                ToolDefinition {
                    name: tool.name().to_string(),
                    description,
                    input_schema: tool.input_schema(),
                }
            })
            .collect()
    }
}

/// Strips injected slot names from a model-supplied argument object. The
/// executed values always come from the turn context, so whatever the model
/// put there is dropped before dispatch.
pub fn scrub_injected_slots(input: &ToolInput) -> ToolInput {
    match input {
        JsonValue::Object(map) => {
            let mut scrubbed = map.clone();
            scrubbed.remove("index_name");
            scrubbed.remove("fingerprint");
            JsonValue::Object(scrubbed)
        }
        other => other.clone(),
    }
}

/// Bounds a tool result, appending an explicit model-visible marker when
/// content was dropped.
pub fn truncate_result(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    format!("{}\n\n…truncated…", &text[..end])
}
