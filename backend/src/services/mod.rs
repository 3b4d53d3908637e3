pub mod cache;
pub mod conversation;
pub mod indexer;
pub mod orchestrator;
pub mod quota;
pub mod search_proxy;
