//! Natural-language query generation
//!
//! Sends the request plus the rendered context bundle to the completion
//! backend. Failures never propagate as errors: the caller always receives
//! query text (a placeholder on failure) together with the failure class.
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context_engine::context_builder::ContextBundle;
use crate::deadline::{Deadline, Interrupted};
use crate::error::QueryError;
use crate::utils::TextUtils;
use crate::workers::CompletionBackend;

pub const UNCONFIGURED_PLACEHOLDER: &str =
    "-- API Key not configured. Please check the LLM_API_KEY environment variable.";
pub const ERROR_PLACEHOLDER: &str = "SELECT 'Error generating query' as Status";

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub dialect: String,
    pub system_instruction: String,
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            dialect: "Microsoft SQL Server (T-SQL)".to_string(),
            system_instruction: "You are an expert SQL developer for a retail point-of-sale database. \
                You prioritize the real-time monthly partition tables for current sales summaries."
                .to_string(),
            temperature: 0.0,
        }
    }
}

/// Query text is always present; `failure` is set when it is a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuery {
    pub query: String,
    pub failure: Option<QueryError>,
}

impl GeneratedQuery {
    fn placeholder(failure: QueryError) -> Self {
        let query = match failure {
            QueryError::GenerationUnavailable => UNCONFIGURED_PLACEHOLDER,
            _ => ERROR_PLACEHOLDER,
        };
        Self { query: query.to_string(), failure: Some(failure) }
    }

    pub fn is_placeholder(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct QueryGenerator {
    backend: Arc<dyn CompletionBackend>,
    config: GeneratorConfig,
}

impl QueryGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: GeneratorConfig) -> Self {
        Self { backend, config }
    }

    pub fn build_prompt(&self, user_request: &str, bundle: &ContextBundle, partition_table_prefix: &str) -> String {
        let tokens = &bundle.tokens;
        let mut instructions = Vec::new();
        if !partition_table_prefix.is_empty() {
            instructions.push(format!(
                "Strictly follow the table naming convention: {}{} for real-time summaries of the current month.",
                partition_table_prefix, tokens.yymm
            ));
        }
        instructions.push(format!(
            "Compare dates in YYYY-MM-DD format; today is '{}'.",
            tokens.iso_date
        ));
        instructions.push("Do not use markdown formatting. Return only the query string.".to_string());

        let numbered = instructions
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{}. {}", i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Convert the natural language request into a {} query.\n\n{}\n\nInstructions:\n{}\n\nRequest: {}",
            self.config.dialect,
            bundle.render(),
            numbered,
            user_request
        )
    }

    /// Generate query text for `user_request`, bounded by `deadline`.
    pub async fn generate(
        &self,
        user_request: &str,
        bundle: &ContextBundle,
        partition_table_prefix: &str,
        deadline: &Deadline,
    ) -> GeneratedQuery {
        if !self.backend.is_configured() {
            warn!("Generation skipped: no language-model credential");
            return GeneratedQuery::placeholder(QueryError::GenerationUnavailable);
        }

        let prompt = self.build_prompt(user_request, bundle, partition_table_prefix);
        debug!("Generation prompt is {} chars", prompt.chars().count());

        let completion = deadline
            .run(self.backend.complete(&self.config.system_instruction, &prompt, self.config.temperature))
            .await;

        match completion {
            Ok(Ok(text)) => {
                let query = TextUtils::strip_code_fences(&text).into_owned();
                if query.is_empty() {
                    warn!("Language model returned an empty query");
                    return GeneratedQuery::placeholder(QueryError::Generation("empty response".to_string()));
                }
                info!("Generated query ({} chars)", query.len());
                GeneratedQuery { query, failure: None }
            }
            Ok(Err(e)) => {
                warn!("Query generation failed: {}", e);
                GeneratedQuery::placeholder(e)
            }
            Err(Interrupted::Expired) => {
                warn!("Query generation timed out after {} ms", deadline.budget_ms());
                GeneratedQuery::placeholder(QueryError::Generation(format!(
                    "no answer within {} ms",
                    deadline.budget_ms()
                )))
            }
            Err(Interrupted::Cancelled) => GeneratedQuery::placeholder(QueryError::Superseded),
        }
    }
}
