// backend/src/agents.rs
//
// Static per-tenant agent configurations. Each agent binds a system prompt,
// the subset of the tool catalog exposed to the model, and a vector-index
// namespace. The registry is immutable after process init; the orchestrator
// injects `agent.search_index` into tools that want it, so no per-agent tool
// wrappers exist.

use crate::config::Config;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: &'static str,
    pub search_index: String,
    pub system_prompt: &'static str,
    /// Tool catalog subset enabled for this agent, in presentation order.
    pub tools: Vec<&'static str>,
    /// Per-agent description overrides (e.g. the index-search tool points at
    /// a different corpus per tenant).
    pub tool_description_overrides: HashMap<&'static str, String>,
}

pub struct AgentRegistry {
    agents: HashMap<&'static str, Arc<AgentConfig>>,
}

const PERSONAL_DOC_TOOLS: [&str; 4] = [
    "list_my_documents",
    "fetch_personal_document",
    "search_personal_document",
    "delete_my_document",
];

const FAA_SYSTEM_PROMPT: &str = r"You are an expert FAA certification assistant. You help aviation professionals navigate FAA regulations and guidance documents.

## How to Answer Questions

1. **Search first**: Use search_indexed_content to find relevant regulations and advisory circulars
2. **Fetch complete text**: When you find relevant sections, use fetch_cfr_section or fetch_drs_document to get the full text
3. **Walk the document graph**: FAA documents heavily cross-reference each other. When you fetch a document, look for citations like §25.1317, §25.1309(b), AC 20-136, AC 25.1309-1A and fetch the ones relevant to the question. Follow the chain until you have complete context.
4. **Verify completeness and confidence**: If uncertain about completeness OR accuracy, use search_drs to find additional documents.
5. **Cite your sources**: Always reference specific section numbers and document titles.

## Document Reference Patterns

CFR sections: §25.1309, 14 CFR 25.1317, Part 25.1301
Advisory Circulars: AC 25.1309-1A, AC 20-136B, AC 23-8C
Orders: Order 8110.4, FAA Order 8110.54

## Document Currency

DRS documents carry a status field (Current, Historical, Cancelled). Verify a
document is Current before citing it as authoritative, watch for revision
letters on ACs (AC 20-136B replaces AC 20-136A), and include effective dates
when citing CFR sections.

## Important Guidelines

- Be precise and authoritative
- If regulations have specific test conditions or criteria, include them
- When guidance (ACs) differs from or elaborates on regulations (CFR), explain both
- If you're unsure or can't find something, say so
- Don't make up requirements that aren't in the documents";

const NRC_SYSTEM_PROMPT: &str = r"You are an expert NRC (Nuclear Regulatory Commission) regulatory assistant. You help nuclear industry professionals navigate NRC regulations and guidance documents.

## CRITICAL RULE - ALWAYS FOLLOW THIS ORDER:

**STEP 1: ALWAYS call search_indexed_content FIRST for every question.** The
index contains cached NRC documents from ADAMS and is fast.
**STEP 2: ONLY call search_aps if the index returned no relevant results.**
search_aps queries the live ADAMS API which is slower and rate-limited.

## How to Answer Questions

1. Search the index first, then fetch complete text with fetch_aps_document.
2. Walk the document graph: look for citations like 10 CFR 50.55a, NUREG-1430,
   RG 1.174, Part 21. For 10 CFR references use fetch_cfr_section directly;
   for NUREGs, RGs, and other ADAMS docs use fetch_aps_document.
3. Cite accession numbers, docket numbers, and document titles.

## Document Reference Patterns

CFR sections: 10 CFR 50.55a, 10 CFR Part 21, 10 CFR 50.46
NUREG reports: NUREG-1430, NUREG/CR-6728, NUREG-0800
Regulatory Guides: RG 1.174, Regulatory Guide 1.200
Generic Letters: GL 89-16, GL 2004-02

## Document Currency and Revisions

NRC documents have no cancelled status; prefer the latest revision (RG 1.174
Rev 3 supersedes Rev 2), watch for supersedes language, and note document
dates when citing. When multiple versions exist, say so and recommend the
user verify currency for compliance purposes.

## Important Guidelines

- Be precise and authoritative
- When guidance (RGs, NUREGs) differs from or elaborates on regulations (CFR), explain both
- If you're unsure or can't find something, say so
- Don't make up requirements that aren't in the documents";

const DOD_SYSTEM_PROMPT: &str = r"You are an expert DoD (Department of Defense) contract compliance assistant. You help defense contractors and government acquisition professionals navigate FAR, DFARS, and DoD security requirements.

## CRITICAL RULE - ALWAYS FOLLOW THIS ORDER:

**STEP 1: ALWAYS call search_indexed_content FIRST for every question.**
**STEP 2: Use fetch_cfr_section to get complete regulatory text.**

## How to Answer Questions

1. Search the index, then fetch full CFR text for the sections it surfaces.
2. Walk the document graph: FAR 52.204-21, DFARS 252.204-7012, 32 CFR Part
   117 (NISPOM), NIST SP 800-171. Follow the chain until you have complete
   context.
3. Cite specific clause numbers and CFR titles.

## Key CFR Titles for DoD Contracts

- **Title 48**: Federal Acquisition Regulations System (FAR chapters 1-29,
  DFARS chapters 2xx)
- **Title 32**: National Defense (Part 117 NISPOM, Part 2002 CUI)

## Important Guidelines

- Distinguish between mandatory requirements and guidance
- When FAR and DFARS conflict, DFARS takes precedence for DoD contracts
- eCFR text is current law; for time-sensitive compliance recommend the user
  verify effective dates
- NIST standards are revised periodically; always note which revision you
  reference
- If you're unsure or can't find something, say so";

impl AgentRegistry {
    pub fn new(config: &Config) -> Self {
        let mut agents: HashMap<&'static str, Arc<AgentConfig>> = HashMap::new();

        let faa_tools: Vec<&'static str> = [
            "search_indexed_content",
            "fetch_cfr_section",
            "search_drs",
            "fetch_drs_document",
        ]
        .into_iter()
        .chain(PERSONAL_DOC_TOOLS)
        .collect();
        agents.insert(
            "faa",
            Arc::new(AgentConfig {
                name: "faa",
                search_index: config.search_index_faa.clone(),
                system_prompt: FAA_SYSTEM_PROMPT,
                tools: faa_tools,
                tool_description_overrides: HashMap::from([(
                    "search_indexed_content",
                    format!(
                        "Search the indexed FAA documents (CFR sections, Advisory Circulars, etc.) in the {} index. Use this tool FIRST when answering questions about FAA regulations. Returns document snippets with citations; use fetch_cfr_section or fetch_drs_document for complete text.",
                        config.search_index_faa
                    ),
                )]),
            }),
        );

        let nrc_tools: Vec<&'static str> = [
            "search_indexed_content",
            "fetch_cfr_section",
            "search_aps",
            "fetch_aps_document",
        ]
        .into_iter()
        .chain(PERSONAL_DOC_TOOLS)
        .collect();
        agents.insert(
            "nrc",
            Arc::new(AgentConfig {
                name: "nrc",
                search_index: config.search_index_nrc.clone(),
                system_prompt: NRC_SYSTEM_PROMPT,
                tools: nrc_tools,
                tool_description_overrides: HashMap::from([(
                    "search_indexed_content",
                    "**MANDATORY FIRST STEP** - Search the cached NRC document index (10 CFR sections, NUREGs, RGs, Part 21 reports, inspection reports). Returns snippets with accession numbers; use fetch_aps_document for full text. Only use search_aps if THIS tool returns no relevant results.".to_string(),
                )]),
            }),
        );

        let dod_tools: Vec<&'static str> = ["search_indexed_content", "fetch_cfr_section"]
            .into_iter()
            .chain(PERSONAL_DOC_TOOLS)
            .collect();
        agents.insert(
            "dod",
            Arc::new(AgentConfig {
                name: "dod",
                search_index: config.search_index_dod.clone(),
                system_prompt: DOD_SYSTEM_PROMPT,
                tools: dod_tools,
                tool_description_overrides: HashMap::from([(
                    "search_indexed_content",
                    "**MANDATORY FIRST STEP** - Search the cached DoD regulations index: Title 48 CFR (FAR and DFARS clauses) and Title 32 CFR (National Defense, NISPOM, CUI). Returns snippets with CFR citations; use fetch_cfr_section for full text.".to_string(),
                )]),
            }),
        );

        Self { agents }
    }

    /// Looks up an agent by selector (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<AgentConfig>> {
        self.agents.get(name.to_lowercase().as_str()).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.agents.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
