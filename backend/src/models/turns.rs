// backend/src/models/turns.rs
//
// Conversation turns and their structured content blocks. A conversation is
// an append-only sequence of turns; sequences are gap-free and strictly
// ascending (enforced by the store on append).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    /// Carries the tool results of the preceding assistant turn. On the
    /// provider wire this travels under the user role, but the store keeps
    /// the distinction so history reconstruction is unambiguous.
    Tool,
}

/// One structured block within a turn payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: JsonValue,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A persisted turn. `sequence` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub blocks: Vec<ContentBlock>,
    pub sequence: i64,
}

/// A turn that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub role: TurnRole,
    pub blocks: Vec<ContentBlock>,
}

impl NewTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            blocks: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: TurnRole::Assistant,
            blocks,
        }
    }

    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: TurnRole::Tool,
            blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_block_round_trips_through_json() {
        let block = ContentBlock::ToolUse {
            id: "toolu_01".into(),
            name: "fetch_cfr_section".into(),
            input: json!({"title": 14, "part": 25, "section": "1309"}),
        };
        let serialized = serde_json::to_string(&block).unwrap();
        assert!(serialized.contains("\"type\":\"tool_use\""));
        let back: ContentBlock = serde_json::from_str(&serialized).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn tool_result_keeps_use_id_binding() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "toolu_01".into(),
            content: "## 14 CFR §25.1309".into(),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["tool_use_id"], "toolu_01");
    }
}
