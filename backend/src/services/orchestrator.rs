// backend/src/services/orchestrator.rs
//
// The per-turn conversation loop: load history, stream a completion, execute
// tool calls with injected context, feed results back, repeat until the
// model stops naturally or the round bound forces a synthesis pass.
//
// Events flow through a bounded channel; a full client applies backpressure
// through `send`, and a dropped receiver (client disconnect) cancels the
// turn cooperatively. Turns are committed to the store only at the terminal
// event, so an aborted turn persists nothing beyond what already existed.

use crate::agents::AgentConfig;
use crate::config::Config;
use crate::errors::AppError;
use crate::llm::{
    AiClient, ChatRequest, LlmError, ProviderMessage, ProviderRole, ResponseAccumulator,
    StreamEvent,
};
use crate::models::turns::{ContentBlock, NewTurn, Turn, TurnRole};
use crate::services::conversation::ConversationStore;
use crate::tools::{PersonalDocMemo, ToolContext, ToolRegistry, scrub_injected_slots};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

const MAX_PROVIDER_RETRIES: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Model-facing tool results are unbounded-ish; the client event carries a
/// short summary only.
const TOOL_RESULT_SUMMARY_CHARS: usize = 500;

/// Normalized events streamed to the client, in the order guaranteed by the
/// turn loop: text deltas concatenate to the assistant's final text, each
/// tool produces tool_use -> tool_executing -> tool_result, and done/error
/// are mutually exclusive terminals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Text {
        content: String,
    },
    Reasoning {
        content: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: JsonValue,
    },
    ToolExecuting {
        id: String,
        name: String,
        input: JsonValue,
    },
    ToolResult {
        id: String,
        name: String,
        result: String,
    },
    Warning {
        content: String,
    },
    QuotaUpdate {
        requests_used: u32,
        requests_remaining: u32,
        daily_limit: u32,
    },
    Error {
        classification: String,
        content: String,
    },
    Done,
}

/// Why a turn stopped before its terminal event.
enum TurnAbort {
    /// Client went away; nothing further may be sent or persisted.
    Cancelled,
    Fatal(AppError),
}

type TurnStep<T> = Result<T, TurnAbort>;

pub struct Orchestrator {
    store: Arc<dyn ConversationStore>,
    ai: Arc<dyn AiClient>,
    tools: Arc<ToolRegistry>,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        ai: Arc<dyn AiClient>,
        tools: Arc<ToolRegistry>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            ai,
            tools,
            config,
        })
    }

    /// Runs one turn, streaming events to the returned receiver. The turn is
    /// cancelled when the receiver is dropped and aborted with a timeout
    /// error at the soft turn cap.
    pub fn handle_turn(
        self: &Arc<Self>,
        agent: Arc<AgentConfig>,
        conversation_id: String,
        user_text: String,
        fingerprint: Option<String>,
        memo: PersonalDocMemo,
    ) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(32);
        let orchestrator = Arc::clone(self);
        let timeout = Duration::from_secs(self.config.turn_timeout_s);

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                timeout,
                orchestrator.run_turn(&tx, agent, &conversation_id, user_text, fingerprint, memo),
            )
            .await;

            match outcome {
                Err(_) => {
                    warn!(%conversation_id, "Turn exceeded soft timeout");
                    let _ = tx
                        .send(TurnEvent::Error {
                            classification: AppError::TurnTimeout.classification().to_string(),
                            content: "The request took too long and was aborted.".to_string(),
                        })
                        .await;
                }
                Ok(Err(TurnAbort::Cancelled)) => {
                    info!(%conversation_id, "Turn cancelled by client");
                }
                Ok(Err(TurnAbort::Fatal(e))) => {
                    error!(%conversation_id, error = %e, "Turn failed");
                    let _ = tx
                        .send(TurnEvent::Error {
                            classification: e.classification().to_string(),
                            content: e.to_string(),
                        })
                        .await;
                }
                Ok(Ok(())) => {}
            }
        });

        rx
    }

    #[instrument(skip_all, fields(agent = agent.name, %conversation_id))]
    async fn run_turn(
        &self,
        tx: &mpsc::Sender<TurnEvent>,
        agent: Arc<AgentConfig>,
        conversation_id: &str,
        user_text: String,
        fingerprint: Option<String>,
        memo: PersonalDocMemo,
    ) -> TurnStep<()> {
        // Load failures are fatal to the turn: answering against a hole in
        // history would silently rewrite the conversation.
        let history = self
            .store
            .load_turns(conversation_id)
            .await
            .map_err(TurnAbort::Fatal)?;

        let mut messages = provider_history(&history);
        messages.push(ProviderMessage::user(vec![ContentBlock::text(
            user_text.clone(),
        )]));
        let mut pending: Vec<NewTurn> = vec![NewTurn::user_text(user_text)];

        let context = ToolContext {
            index_name: agent.search_index.clone(),
            fingerprint: fingerprint.clone(),
            memo,
        };

        let max_rounds = self.config.max_tool_rounds;
        let mut round: u32 = 0;
        loop {
            let tools_enabled = round < max_rounds;
            if !tools_enabled {
                warn!("Tool round limit reached, forcing synthesis round");
                send(
                    tx,
                    TurnEvent::Warning {
                        content: format!(
                            "Reached the limit of {max_rounds} tool rounds; answering with the context gathered so far."
                        ),
                    },
                )
                .await?;
            }

            let request = ChatRequest {
                system: agent.system_prompt.to_string(),
                messages: messages.clone(),
                tools: if tools_enabled {
                    self.tools.definitions_for(&agent)
                } else {
                    Vec::new()
                },
                max_tokens: self.config.llm_max_tokens,
                reasoning_budget: match self.config.llm_reasoning_budget {
                    0 => None,
                    budget => Some(budget),
                },
            };

            info!(round, messages = request.messages.len(), "Calling model");
            let blocks = self.stream_round(tx, request).await?;
            let tool_uses: Vec<(String, String, JsonValue)> = blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            // Natural stop, or the synthesis round finished (tool blocks
            // from a round with tools disabled are not executed).
            if tool_uses.is_empty() || !tools_enabled {
                pending.push(NewTurn::assistant(blocks));
                break;
            }

            // Announce every requested tool before any execution starts.
            for (id, name, input) in &tool_uses {
                send(
                    tx,
                    TurnEvent::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    },
                )
                .await?;
            }

            let mut results: Vec<ContentBlock> = Vec::with_capacity(tool_uses.len());
            for (id, name, input) in tool_uses {
                let result = self
                    .execute_tool(tx, &context, &id, &name, &input)
                    .await?;
                send(
                    tx,
                    TurnEvent::ToolResult {
                        id: id.clone(),
                        name,
                        result: summarize(&result),
                    },
                )
                .await?;
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: result,
                });
            }

            messages.push(ProviderMessage::assistant(blocks.clone()));
            messages.push(ProviderMessage::user(results.clone()));
            pending.push(NewTurn::assistant(blocks));
            pending.push(NewTurn::tool_results(results));
            round += 1;
        }

        // Commit the whole turn at the terminal. A save failure is a warning:
        // the user has the answer, the next turn's history may be one round
        // short, and that trade-off is logged.
        if let Err(e) = self.store.append_turns(conversation_id, pending).await {
            error!(error = %e, "Failed to persist turn");
            send(
                tx,
                TurnEvent::Warning {
                    content: "This exchange could not be saved; it may be missing from the conversation history.".to_string(),
                },
            )
            .await?;
        }

        send(tx, TurnEvent::Done).await?;
        info!("Turn completed");
        Ok(())
    }

    /// One model round: open the stream (with the retry policy applied to
    /// rate-limited and transient failures), forward deltas, and return the
    /// accumulated assistant blocks.
    async fn stream_round(
        &self,
        tx: &mpsc::Sender<TurnEvent>,
        request: ChatRequest,
    ) -> TurnStep<Vec<ContentBlock>> {
        let mut rate_attempts: u32 = 0;
        let mut transient_attempts: u32 = 0;

        'attempt: loop {
            if tx.is_closed() {
                return Err(TurnAbort::Cancelled);
            }

            let stream_result = self
                .ai
                .stream_chat(&self.config.llm_model, request.clone())
                .await;

            let mut stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    self.handle_provider_error(tx, e, &mut rate_attempts, &mut transient_attempts)
                        .await?;
                    continue 'attempt;
                }
            };

            let mut accumulator = ResponseAccumulator::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        accumulator.push(&event);
                        match &event {
                            StreamEvent::TextDelta(text) => {
                                send(
                                    tx,
                                    TurnEvent::Text {
                                        content: text.clone(),
                                    },
                                )
                                .await?;
                            }
                            StreamEvent::ReasoningDelta(text) => {
                                send(
                                    tx,
                                    TurnEvent::Reasoning {
                                        content: text.clone(),
                                    },
                                )
                                .await?;
                            }
                            StreamEvent::Done { stop_reason } => {
                                if stop_reason.as_deref() == Some("max_tokens") {
                                    warn!("Response truncated at max_tokens");
                                }
                                return Ok(accumulator.into_blocks());
                            }
                            _ => {}
                        }
                    }
                    Err(e) => {
                        // A failure mid-stream restarts the round; partial
                        // text already forwarded stays on the client, which
                        // is the same contract the provider SDKs give.
                        self.handle_provider_error(
                            tx,
                            e,
                            &mut rate_attempts,
                            &mut transient_attempts,
                        )
                        .await?;
                        continue 'attempt;
                    }
                }
            }

            // Stream ended without a Done event.
            self.handle_provider_error(
                tx,
                LlmError::Transient("provider stream ended early".to_string()),
                &mut rate_attempts,
                &mut transient_attempts,
            )
            .await?;
        }
    }

    /// Applies the retry schedule. Returns `Ok(())` when the caller should
    /// retry, `Err` when the error must surface.
    async fn handle_provider_error(
        &self,
        tx: &mpsc::Sender<TurnEvent>,
        error: LlmError,
        rate_attempts: &mut u32,
        transient_attempts: &mut u32,
    ) -> TurnStep<()> {
        match error {
            LlmError::RateLimited(msg) => {
                if *rate_attempts >= MAX_PROVIDER_RETRIES {
                    return Err(TurnAbort::Fatal(AppError::ProviderRateLimited(msg)));
                }
                let delay = BASE_RETRY_DELAY * 2u32.pow(*rate_attempts);
                *rate_attempts += 1;
                warn!(
                    attempt = *rate_attempts,
                    delay_s = delay.as_secs(),
                    "Provider rate limited, backing off"
                );
                send(
                    tx,
                    TurnEvent::Warning {
                        content: format!("Model busy, retrying in {}s…", delay.as_secs()),
                    },
                )
                .await?;
                tokio::time::sleep(delay).await;
                Ok(())
            }
            LlmError::Transient(msg) => {
                if *transient_attempts >= 1 {
                    return Err(TurnAbort::Fatal(AppError::ProviderTransient(msg)));
                }
                *transient_attempts += 1;
                warn!("Provider connection error, retrying once: {msg}");
                tokio::time::sleep(BASE_RETRY_DELAY).await;
                Ok(())
            }
            LlmError::Fatal(msg) => Err(TurnAbort::Fatal(AppError::ProviderFatal(msg))),
        }
    }

    /// Resolves and executes one tool call. Never fatal to the turn: every
    /// failure path ends up as an `Error: …` string the model can read.
    async fn execute_tool(
        &self,
        tx: &mpsc::Sender<TurnEvent>,
        context: &ToolContext,
        id: &str,
        name: &str,
        input: &JsonValue,
    ) -> TurnStep<String> {
        let Some(tool) = self.tools.get(name) else {
            warn!("Model requested unknown tool '{name}'");
            send(
                tx,
                TurnEvent::ToolExecuting {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: input.clone(),
                },
            )
            .await?;
            return Ok(format!("Error: Unknown tool '{name}'"));
        };

        // Injected slots come from the turn context; whatever the model put
        // in the argument object is dropped here.
        let resolved = scrub_injected_slots(input);
        send(
            tx,
            TurnEvent::ToolExecuting {
                id: id.to_string(),
                name: name.to_string(),
                input: resolved.clone(),
            },
        )
        .await?;

        info!(tool = name, "Executing tool");
        let execution = tokio::time::timeout(tool.timeout(), tool.execute(&resolved, context));
        let result = tokio::select! {
            () = tx.closed() => return Err(TurnAbort::Cancelled),
            result = execution => result,
        };

        Ok(match result {
            Ok(Ok(text)) if text.trim().is_empty() => {
                format!("Tool {name} completed but returned no content.")
            }
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "Tool failed");
                format!("Error: {e}")
            }
            Err(_) => {
                warn!(tool = name, "Tool timed out");
                format!("Error: {name} timed out, please retry")
            }
        })
    }
}

fn provider_history(turns: &[Turn]) -> Vec<ProviderMessage> {
    turns
        .iter()
        .map(|turn| ProviderMessage {
            role: match turn.role {
                TurnRole::Assistant => ProviderRole::Assistant,
                // Tool-result turns travel under the user role.
                TurnRole::User | TurnRole::Tool => ProviderRole::User,
            },
            blocks: turn.blocks.clone(),
        })
        .collect()
}

fn summarize(result: &str) -> String {
    if result.chars().count() <= TOOL_RESULT_SUMMARY_CHARS {
        return result.to_string();
    }
    let end = result
        .char_indices()
        .nth(TOOL_RESULT_SUMMARY_CHARS)
        .map_or(result.len(), |(i, _)| i);
    format!("{}…", &result[..end])
}

async fn send(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> TurnStep<()> {
    tx.send(event).await.map_err(|_| TurnAbort::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tags() {
        let event = TurnEvent::Text {
            content: "hello".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["content"], "hello");

        let event = TurnEvent::ToolResult {
            id: "toolu_01".into(),
            name: "fetch_cfr_section".into(),
            result: "## 14 CFR §25.1309".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_result");

        let value = serde_json::to_value(&TurnEvent::Done).unwrap();
        assert_eq!(value["type"], "done");

        let event = TurnEvent::Error {
            classification: "timeout".into(),
            content: "The request took too long".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["classification"], "timeout");
    }

    #[test]
    fn summary_is_bounded() {
        let long = "a".repeat(1000);
        let summary = summarize(&long);
        assert!(summary.chars().count() <= TOOL_RESULT_SUMMARY_CHARS + 1);
        assert!(summary.ends_with('…'));
        assert_eq!(summarize("short"), "short");
    }

    #[test]
    fn provider_history_maps_tool_turns_to_user_role() {
        let turns = vec![
            Turn {
                role: TurnRole::User,
                blocks: vec![ContentBlock::text("q")],
                sequence: 0,
            },
            Turn {
                role: TurnRole::Assistant,
                blocks: vec![ContentBlock::text("a")],
                sequence: 1,
            },
            Turn {
                role: TurnRole::Tool,
                blocks: vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_01".into(),
                    content: "result".into(),
                }],
                sequence: 2,
            },
        ];
        let messages = provider_history(&turns);
        assert_eq!(messages[0].role, ProviderRole::User);
        assert_eq!(messages[1].role, ProviderRole::Assistant);
        assert_eq!(messages[2].role, ProviderRole::User);
    }
}
