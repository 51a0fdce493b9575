//! Context engine module - builds model context and drives the query pipeline

pub mod analyzer;
pub mod context_builder;
pub mod generator;
pub mod orchestrator;
pub mod reconciler;
pub mod schema_learner;

pub use analyzer::ResultAnalyzer;
pub use context_builder::{ContextBuilder, ContextBuilderConfig, ContextBundle};
pub use generator::{GeneratedQuery, GeneratorConfig, QueryGenerator};
pub use orchestrator::{
    ConnectReport, OrchestratorConfig, QueryOrchestrator, QueryOutcome, StartupReport, Submission,
};
pub use reconciler::{KnowledgeReconciler, KnowledgeSource, Reconciliation, RemoteSync};

