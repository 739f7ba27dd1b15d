pub mod auth;
pub mod error;
pub mod models;
pub mod openapi;
pub mod password;
pub mod rate_limit;
pub mod realtime;
pub mod repo;
pub mod routes;
pub mod security;
pub mod storage;
pub mod taxonomy;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
