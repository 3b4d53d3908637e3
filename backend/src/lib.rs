pub mod agents;
pub mod auth;
pub mod clients;
pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pdf;
pub mod routes;
pub mod schema;
pub mod services;
pub mod state;
pub mod text_processing;
pub mod tools;

use deadpool_diesel::postgres::Pool as DeadpoolPool;

// Library-wide alias for the conversation-store connection pool.
pub type PgPool = DeadpoolPool;

pub use state::AppState;

#[cfg(test)]
pub mod test_helpers;
