//! Knowledge-augmented natural-language query orchestrator.
//!
//! Builds model context from a learned schema, user knowledge and the wall
//! clock, runs generated or saved queries through a backend proxy, and keeps
//! knowledge, schema and query history in a versioned local store.

pub mod config;
pub mod context_engine;
pub mod deadline;
pub mod error;
pub mod knowledge_db;
pub mod metrics;
pub mod session;
pub mod shared_state;
pub mod telemetry;
pub mod time_context;
pub mod utils;
pub mod workers;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use config::Config;
pub use context_engine::{QueryOrchestrator, QueryOutcome, Submission};
pub use error::{ErrorKind, QueryError, QueryResult};
pub use knowledge_db::{Bucket, KnowledgeDatabase};
pub use session::SessionState;

#[cfg(feature = "cli")]
pub use server::run_server;
