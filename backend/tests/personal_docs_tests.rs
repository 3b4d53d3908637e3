// Personal-document isolation and retrieval: chunk-order reassembly, the
// per-conversation memo, in-document semantic search, ownership on delete,
// and the proxy filter as the sole privacy mechanism.

mod helpers;

use chrono::Utc;
use helpers::{FakeSearchProxy, HashEmbeddings};
use regagent_backend::errors::AppError;
use regagent_backend::models::documents::ChunkUpload;
use regagent_backend::services::search_proxy::{SearchProxy, SearchRequest};
use regagent_backend::tools::personal_docs::{
    DeleteMyDocumentTool, FetchPersonalDocumentTool, ListMyDocumentsTool,
    SearchPersonalDocumentTool,
};
use regagent_backend::tools::search_indexed::SearchIndexedContentTool;
use regagent_backend::tools::{PersonalDocMemo, RetrievalTool, ToolContext};
use serde_json::json;
use std::sync::Arc;

const F1: &str = "fp-user-one-0001";
const F2: &str = "fp-user-two-0002";
const INDEX: &str = "faa-agent";

fn manual_chunk(i: usize, content: &str) -> ChunkUpload {
    ChunkUpload {
        id: format!("{F1}-manual-chunk{i}"),
        parent_id: format!("{F1}-manual"),
        title: "manual.pdf".to_string(),
        content: content.to_string(),
        source: "personal".to_string(),
        doc_type: "user_upload".to_string(),
        citation: None,
        owner_fingerprint: Some(F1.to_string()),
        uploaded_at: Utc::now(),
        page_count: Some(12),
        file_hash: Some("abc123".to_string()),
        embedding: Some(vec![0.5; 1024]),
    }
}

async fn seeded_proxy() -> Arc<FakeSearchProxy> {
    let proxy = FakeSearchProxy::new();
    // Out-of-order upload; reassembly must sort by chunk index.
    proxy
        .index_chunks(
            INDEX,
            Some(F1),
            vec![
                manual_chunk(2, "Third part covers maintenance schedules."),
                manual_chunk(0, "First part introduces the zephyr flange assembly."),
                manual_chunk(1, "Second part lists torque specifications for bolts."),
            ],
        )
        .await
        .unwrap();
    proxy
}

fn ctx(fingerprint: &str, memo: PersonalDocMemo) -> ToolContext {
    ToolContext {
        index_name: INDEX.to_string(),
        fingerprint: Some(fingerprint.to_string()),
        memo,
    }
}

#[tokio::test]
async fn fetch_reassembles_chunks_in_order_and_memoizes() {
    let proxy = seeded_proxy().await;
    let memo = PersonalDocMemo::new();
    let tool = FetchPersonalDocumentTool::new(proxy);

    let result = tool
        .execute(
            &json!({"document_id": format!("{F1}-manual")}),
            &ctx(F1, memo.clone()),
        )
        .await
        .unwrap();

    // Round-trip property: body equals the chunk concatenation in chunk
    // order.
    let first = result.find("First part").unwrap();
    let second = result.find("Second part").unwrap();
    let third = result.find("Third part").unwrap();
    assert!(first < second && second < third);
    assert!(result.contains("**Pages:** 12"));

    // Memo is populated for follow-up searches.
    let memoized = memo.get(&format!("personal_doc_{F1}-manual")).unwrap();
    assert!(memoized.starts_with("First part"));
    assert!(memoized.contains("Third part"));
}

#[tokio::test]
async fn other_users_cannot_see_or_fetch_the_document() {
    let proxy = seeded_proxy().await;

    // Scenario: U2 searches for a phrase that exists only in U1's upload.
    let search = SearchIndexedContentTool::new(proxy.clone());
    let miss = search
        .execute(
            &json!({"query": "zephyr flange"}),
            &ctx(F2, PersonalDocMemo::new()),
        )
        .await
        .unwrap();
    assert!(miss.starts_with("No results found"));

    // U1 gets the hit, attributed to their fingerprint.
    let hit = search
        .execute(
            &json!({"query": "zephyr flange"}),
            &ctx(F1, PersonalDocMemo::new()),
        )
        .await
        .unwrap();
    assert!(hit.contains("zephyr flange"));
    let raw = proxy
        .search(SearchRequest {
            query: "zephyr flange".to_string(),
            index: INDEX.to_string(),
            fingerprint: F1.to_string(),
            top: 5,
            doc_type: None,
        })
        .await
        .unwrap();
    assert!(
        raw.results
            .iter()
            .all(|hit| hit.owner_fingerprint.is_none()
                || hit.owner_fingerprint.as_deref() == Some(F1))
    );

    // Direct fetch by id is refused too: the filter means U2 cannot even
    // observe the document.
    let fetch = FetchPersonalDocumentTool::new(proxy);
    let denied = fetch
        .execute(
            &json!({"document_id": format!("{F1}-manual")}),
            &ctx(F2, PersonalDocMemo::new()),
        )
        .await;
    assert!(denied.is_err());
}

#[tokio::test]
async fn in_document_search_ranks_relevant_paragraph_first() {
    let proxy = seeded_proxy().await;
    let memo = PersonalDocMemo::new();
    let tool = SearchPersonalDocumentTool::new(proxy, Arc::new(HashEmbeddings));

    // Cold memo: the tool fetches the document first, then searches it.
    let result = tool
        .execute(
            &json!({
                "document_id": format!("{F1}-manual"),
                "query": "torque specifications bolts",
            }),
            &ctx(F1, memo.clone()),
        )
        .await
        .unwrap();

    assert!(result.contains("## Search Results for: torque specifications bolts"));
    let top_match = result.find("Second part lists torque specifications").unwrap();
    // Neighbor context (±1 paragraph) comes along with the match.
    assert!(result.contains("First part") || result.contains("Third part"));
    // The best match appears in the first reported passage.
    let first_marker = result.find("**Match 1").unwrap();
    assert!(top_match > first_marker);

    // The memo now holds the document; a second search must not refetch.
    assert!(memo.get(&format!("personal_doc_{F1}-manual")).is_some());
}

#[tokio::test]
async fn list_and_delete_respect_ownership() {
    let proxy = seeded_proxy().await;

    let list = ListMyDocumentsTool::new(proxy.clone());
    let listing = list
        .execute(&json!({}), &ctx(F1, PersonalDocMemo::new()))
        .await
        .unwrap();
    assert!(listing.contains("manual.pdf"));
    assert!(listing.contains("Chunks: 3"));

    // U2 sees nothing.
    let empty = list
        .execute(&json!({}), &ctx(F2, PersonalDocMemo::new()))
        .await
        .unwrap();
    assert!(empty.starts_with("You haven't uploaded any documents yet"));

    // U2 cannot delete U1's document.
    let delete = DeleteMyDocumentTool::new(proxy.clone());
    let denied = delete
        .execute(
            &json!({"document_id": format!("{F1}-manual")}),
            &ctx(F2, PersonalDocMemo::new()),
        )
        .await
        .unwrap();
    assert!(denied.contains("not found") || denied.contains("permission"));
    assert_eq!(proxy.chunks_in(INDEX).len(), 3);

    // The owner can.
    let removed = delete
        .execute(
            &json!({"document_id": format!("{F1}-manual")}),
            &ctx(F1, PersonalDocMemo::new()),
        )
        .await
        .unwrap();
    assert!(removed.contains("3 chunk(s) removed"));
    assert!(proxy.chunks_in(INDEX).is_empty());
}

#[tokio::test]
async fn forged_owner_uploads_are_rejected() {
    let proxy = FakeSearchProxy::new();
    let mut chunk = manual_chunk(0, "body");
    chunk.owner_fingerprint = Some(F2.to_string());

    let result = proxy.index_chunks(INDEX, Some(F1), vec![chunk]).await;
    assert!(matches!(result, Err(AppError::OwnershipViolation(_))));
    assert!(proxy.chunks_in(INDEX).is_empty());
}
