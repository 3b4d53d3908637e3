// backend/src/state.rs
//
// Shared application state: every dependency is an explicit, injected trait
// object built once at startup. There is no module-level global state; tests
// assemble the same struct from mocks.

use crate::agents::AgentRegistry;
use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::errors::AppError;
use crate::llm::EmbeddingClient;
use crate::pdf::PdfExtractor;
use crate::services::cache::{DocumentCache, KeyLocks};
use crate::services::conversation::ConversationStore;
use crate::services::indexer::IndexScheduler;
use crate::services::orchestrator::Orchestrator;
use crate::services::quota::QuotaTracker;
use crate::services::search_proxy::SearchProxy;
use crate::tools::PersonalDocMemo;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub agents: Arc<AgentRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn ConversationStore>,
    pub cache: Arc<dyn DocumentCache>,
    pub indexer: Arc<IndexScheduler>,
    pub embedding_client: Arc<dyn EmbeddingClient>,
    pub search_proxy: Arc<dyn SearchProxy>,
    pub quota: Arc<dyn QuotaTracker>,
    pub pdf: Arc<dyn PdfExtractor>,
    pub token_verifier: Option<Arc<TokenVerifier>>,
    pub sessions: Arc<ConversationSessions>,
    pub fetch_locks: Arc<KeyLocks>,
}

/// Per-conversation runtime state: the personal-document memo and the gate
/// that serializes turns. Entries live for the process; the memo is scoped
/// to its conversation and never shared across them.
pub struct ConversationSession {
    pub memo: PersonalDocMemo,
    pub turn_gate: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
pub struct ConversationSessions {
    inner: Mutex<HashMap<String, Arc<ConversationSession>>>,
}

impl ConversationSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, conversation_id: &str) -> Result<Arc<ConversationSession>, AppError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| AppError::InternalServerError(anyhow::anyhow!("sessions lock poisoned")))?;
        Ok(map
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                Arc::new(ConversationSession {
                    memo: PersonalDocMemo::new(),
                    turn_gate: Arc::new(tokio::sync::Mutex::new(())),
                })
            })
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_per_conversation() {
        let sessions = ConversationSessions::new();
        let a = sessions.get_or_create("conv-a").unwrap();
        let a_again = sessions.get_or_create("conv-a").unwrap();
        let b = sessions.get_or_create("conv-b").unwrap();

        a.memo.insert("personal_doc_x".into(), "body".into());
        assert!(a_again.memo.get("personal_doc_x").is_some());
        assert!(b.memo.get("personal_doc_x").is_none());
    }

    #[tokio::test]
    async fn turn_gate_rejects_concurrent_turns() {
        let sessions = ConversationSessions::new();
        let session = sessions.get_or_create("conv-a").unwrap();
        let guard = session.turn_gate.clone().try_lock_owned().unwrap();
        assert!(session.turn_gate.clone().try_lock_owned().is_err());
        drop(guard);
        assert!(session.turn_gate.clone().try_lock_owned().is_ok());
    }
}
